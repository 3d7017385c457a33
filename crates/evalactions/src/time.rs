use async_trait::async_trait;
use evalcore::{ActionContext, ActionHandler, FlowNode, NodeError, NodeOutput, NodeType, Value};
use evalruntime::{ActionDefinition, ActionParam, ActionParamType};
use tokio::time::{sleep, Duration};

/// Delay execution for a specified duration
pub struct DelayAction;

#[async_trait]
impl ActionHandler for DelayAction {
    async fn call(&self, _node: &FlowNode, ctx: ActionContext) -> Result<NodeOutput, NodeError> {
        let delay_ms = ctx
            .param("delay_ms")
            .and_then(Value::as_f64)
            .unwrap_or(1000.0)
            .max(0.0) as u64;

        ctx.events.info(format!("Delaying for {}ms", delay_ms));

        tokio::select! {
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
            _ = sleep(Duration::from_millis(delay_ms)) => {}
        }

        // pass the value through untouched
        Ok(NodeOutput::new()
            .with_output("delayed_ms", delay_ms as f64)
            .with_output("value", ctx.param_or("value", Value::Null)))
    }

    fn validate_params(&self, params: &evalcore::Map) -> Result<(), NodeError> {
        match params.get("delay_ms") {
            Some(v) if !v.is_null() && v.as_f64().is_none() => Err(NodeError::InvalidInputType {
                field: "delay_ms".into(),
                expected: "number".into(),
                actual: v.type_name().into(),
            }),
            _ => Ok(()),
        }
    }
}

pub(crate) fn definition() -> ActionDefinition {
    ActionDefinition::new("time.delay", "Delay", NodeType::Action)
        .with_description("Delay execution for specified milliseconds")
        .with_param(
            ActionParam::new("delay_ms", "Delay (ms)", ActionParamType::Number)
                .optional(Some(Value::from(1000))),
        )
        .with_param(ActionParam::new("value", "Value", ActionParamType::Json).optional(None))
}
