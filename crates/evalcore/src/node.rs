use crate::template::{Reference, ReferenceSource};
use crate::{events::EventEmitter, ExecutionContext, FlowNode, Map, NodeError, SharedContext, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Operation invoked by ACTION and FILE_UPLOAD nodes.
///
/// The engine treats the body as opaque: it is awaited cooperatively, bounded
/// by a per-node timeout and cancelled together with its run.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Execute the action for `node` with resolved params in `ctx`
    async fn call(&self, node: &FlowNode, ctx: ActionContext) -> Result<NodeOutput, NodeError>;

    /// Optional: reject params before the call is made
    fn validate_params(&self, _params: &Map) -> Result<(), NodeError> {
        Ok(())
    }
}

/// Read-only view of the run's execution context.
#[derive(Clone)]
pub struct ContextView {
    inner: SharedContext,
}

impl ContextView {
    pub fn new(inner: SharedContext) -> Self {
        Self { inner }
    }

    pub fn from_context(context: ExecutionContext) -> Self {
        Self::new(context.into_shared())
    }

    pub async fn output(&self, node_id: &str) -> Option<Map> {
        self.inner.read().await.output(node_id).cloned()
    }

    pub async fn variable(&self, name: &str) -> Option<Value> {
        self.inner.read().await.variables().get(name).cloned()
    }

    /// Look up a `root.path` reference the same way interpolation does.
    pub async fn lookup(&self, reference: &str) -> Option<Value> {
        let reference = Reference::parse(reference)?;
        self.inner.read().await.lookup(&reference)
    }

    pub async fn snapshot(&self) -> ExecutionContext {
        self.inner.read().await.clone()
    }
}

/// Everything a handler receives besides its node.
#[derive(Clone)]
pub struct ActionContext {
    pub node_id: String,
    pub action_id: String,

    /// Node data with every `${...}` marker already resolved
    pub params: Map,

    pub context: ContextView,
    pub events: EventEmitter,
    pub cancellation: CancellationToken,
}

impl ActionContext {
    /// Context for invoking a handler directly, outside a run.
    pub fn standalone(node_id: impl Into<String>, action_id: impl Into<String>, params: Map) -> Self {
        let node_id = node_id.into();
        Self {
            events: EventEmitter::detached(node_id.clone()),
            node_id,
            action_id: action_id.into(),
            params,
            context: ContextView::from_context(ExecutionContext::default()),
            cancellation: CancellationToken::new(),
        }
    }

    /// Param lookup: editor-style `params` sub-map first, then top-level data.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params
            .get("params")
            .and_then(Value::as_object)
            .and_then(|nested| nested.get(name))
            .or_else(|| self.params.get(name))
            .filter(|v| !v.is_null())
    }

    pub fn require_param(&self, name: &str) -> Result<&Value, NodeError> {
        self.param(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    pub fn require_str(&self, name: &str) -> Result<&str, NodeError> {
        let value = self.require_param(name)?;
        value.as_str().ok_or_else(|| NodeError::InvalidInputType {
            field: name.to_string(),
            expected: "string".to_string(),
            actual: value.type_name().to_string(),
        })
    }

    pub fn param_or(&self, name: &str, default: Value) -> Value {
        self.param(name).cloned().unwrap_or(default)
    }
}

/// Output from a handler
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeOutput {
    pub outputs: Map,
    /// Handler-reported details kept beside the outputs, not interpolatable
    pub metadata: Map,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, port: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(port.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl From<Map> for NodeOutput {
    fn from(outputs: Map) -> Self {
        Self {
            outputs,
            metadata: Map::new(),
        }
    }
}

/// Adapter turning an async closure into an [`ActionHandler`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> ActionHandler for FnHandler<F>
where
    F: Fn(FlowNode, ActionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<NodeOutput, NodeError>> + Send,
{
    async fn call(&self, node: &FlowNode, ctx: ActionContext) -> Result<NodeOutput, NodeError> {
        (self.f)(node.clone(), ctx).await
    }
}

pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ActionHandler>
where
    F: Fn(FlowNode, ActionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<NodeOutput, NodeError>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}
