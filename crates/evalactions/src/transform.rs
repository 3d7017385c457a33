use async_trait::async_trait;
use evalcore::{ActionContext, ActionHandler, FlowNode, NodeError, NodeOutput, NodeType, Value};
use evalruntime::{ActionDefinition, ActionParam, ActionParamType};

/// Parse a JSON string into a value
pub struct JsonParseAction;

#[async_trait]
impl ActionHandler for JsonParseAction {
    async fn call(&self, _node: &FlowNode, ctx: ActionContext) -> Result<NodeOutput, NodeError> {
        let input = ctx.require_str("json")?;

        let parsed: serde_json::Value = serde_json::from_str(input)
            .map_err(|e| NodeError::ExecutionFailed(format!("JSON parse error: {}", e)))?;

        Ok(NodeOutput::new().with_output("parsed", Value::from(parsed)))
    }
}

pub(crate) fn parse_definition() -> ActionDefinition {
    ActionDefinition::new("transform.json_parse", "Parse JSON", NodeType::Action)
        .with_description("Parse a JSON string")
        .with_param(ActionParam::new("json", "JSON text", ActionParamType::String))
}

/// Serialize a value to JSON text
pub struct JsonStringifyAction;

#[async_trait]
impl ActionHandler for JsonStringifyAction {
    async fn call(&self, _node: &FlowNode, ctx: ActionContext) -> Result<NodeOutput, NodeError> {
        let value = ctx.require_param("value")?.to_json();
        let pretty = ctx.param("pretty").map(Value::is_truthy).unwrap_or(true);

        let json_str = if pretty {
            serde_json::to_string_pretty(&value)
        } else {
            serde_json::to_string(&value)
        }
        .map_err(|e| NodeError::ExecutionFailed(format!("JSON stringify error: {}", e)))?;

        Ok(NodeOutput::new().with_output("json", json_str))
    }
}

pub(crate) fn stringify_definition() -> ActionDefinition {
    ActionDefinition::new("transform.json_stringify", "Stringify JSON", NodeType::Action)
        .with_description("Convert a value to a JSON string")
        .with_param(ActionParam::new("value", "Value", ActionParamType::Json))
        .with_param(
            ActionParam::new("pretty", "Pretty print", ActionParamType::Boolean)
                .optional(Some(Value::Bool(true))),
        )
}
