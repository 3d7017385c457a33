use async_trait::async_trait;
use evalcore::{ActionContext, ActionHandler, FlowNode, NodeError, NodeOutput, NodeType, Value};
use evalruntime::{ActionDefinition, ActionParam, ActionParamType};
use std::path::Path;

/// Reads a local file for FILE_UPLOAD nodes
pub struct FileLoadAction;

#[async_trait]
impl ActionHandler for FileLoadAction {
    async fn call(&self, node: &FlowNode, ctx: ActionContext) -> Result<NodeOutput, NodeError> {
        let path = ctx.require_str("path")?;

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Cannot read {}: {}", path, e)))?;

        let file_name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let decoded = String::from_utf8_lossy(&bytes);
        let lossy = matches!(decoded, std::borrow::Cow::Owned(_));
        let content = decoded.into_owned();
        tracing::info!(node_id = %node.id, file = %file_name, size = bytes.len(), "File loaded");
        ctx.events.info(format!("Loaded {} ({} bytes)", file_name, bytes.len()));

        let mut output = NodeOutput::new()
            .with_output("path", path)
            .with_output("file_name", file_name.as_str())
            .with_output("size_bytes", bytes.len())
            .with_metadata("lossy_utf8", lossy);

        if file_name.ends_with(".json") {
            let parsed: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
                NodeError::ExecutionFailed(format!("{} is not valid JSON: {}", file_name, e))
            })?;
            output = output.with_output("json", Value::from(parsed));
        }

        Ok(output.with_output("content", content))
    }
}

pub(crate) fn definition() -> ActionDefinition {
    ActionDefinition::new("file.load", "Load file", NodeType::FileUpload)
        .with_description("Read a local file into the flow")
        .with_param(ActionParam::new("path", "File", ActionParamType::File))
}
