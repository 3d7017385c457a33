use async_trait::async_trait;
use evalcore::{ActionContext, ActionHandler, FlowNode, Map, NodeError, NodeOutput, NodeType, Value};
use evalruntime::{ActionDefinition, ActionParam, ActionParamType};

/// Keys the engine reads from node data; never echoed back.
const RESERVED: [&str; 4] = ["actionId", "label", "timeoutMs", "params"];

/// Returns its resolved params as outputs
pub struct EchoAction;

#[async_trait]
impl ActionHandler for EchoAction {
    async fn call(&self, _node: &FlowNode, ctx: ActionContext) -> Result<NodeOutput, NodeError> {
        let mut outputs: Map = ctx
            .params
            .iter()
            .filter(|(key, _)| !RESERVED.contains(&key.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(nested) = ctx.params.get("params").and_then(Value::as_object) {
            outputs.extend(nested.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        ctx.events.info(format!("echo: {} fields", outputs.len()));
        Ok(NodeOutput::from(outputs))
    }
}

pub(crate) fn echo_definition() -> ActionDefinition {
    ActionDefinition::new("debug.echo", "Echo", NodeType::Action)
        .with_description("Returns its params unchanged")
}

/// Logs a message through the run's event stream
pub struct LogAction;

#[async_trait]
impl ActionHandler for LogAction {
    async fn call(&self, node: &FlowNode, ctx: ActionContext) -> Result<NodeOutput, NodeError> {
        let message = ctx
            .param("message")
            .map(Value::render)
            .unwrap_or_else(|| "(no message)".to_string());
        let level = ctx.param_or("level", Value::from("info"));

        match level.as_str() {
            Some("warn") | Some("warning") => {
                tracing::warn!(node_id = %node.id, "{}", message);
                ctx.events.warn(format!("DEBUG: {message}"));
            }
            _ => {
                tracing::info!(node_id = %node.id, "{}", message);
                ctx.events.info(format!("DEBUG: {message}"));
            }
        }

        Ok(NodeOutput::new().with_output("message", message))
    }
}

pub(crate) fn log_definition() -> ActionDefinition {
    ActionDefinition::new("debug.log", "Log message", NodeType::Action)
        .with_description("Logs a message for debugging")
        .with_param(ActionParam::new("message", "Message", ActionParamType::String))
        .with_param(
            ActionParam::new("level", "Level", ActionParamType::Select)
                .with_options(["info", "warn"])
                .optional(Some("info".into())),
        )
}
