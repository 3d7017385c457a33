use crate::executor::{FlowExecutor, ReviewDecision};
use crate::graph;
use crate::registry::{ActionDefinition, ActionRegistry};
use crate::snapshot::{InMemorySnapshotStore, SnapshotStore};
use evalcore::{
    EventBus, ExecutionEvent, ExecutionId, FlowError, FlowExecutionResult, FlowRequest,
    FlowSettings, NodeType,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Main entry point for running flows
pub struct FlowRuntime {
    registry: Arc<ActionRegistry>,
    executor: FlowExecutor,
    event_bus: Arc<EventBus>,
    snapshots: Arc<dyn SnapshotStore>,
}

impl FlowRuntime {
    /// Runtime with an empty registry and default settings
    pub fn new() -> Self {
        Self::with_registry(Arc::new(ActionRegistry::empty()), RuntimeConfig::default())
    }

    pub fn with_registry(registry: Arc<ActionRegistry>, config: RuntimeConfig) -> Self {
        Self::with_snapshot_store(registry, config, Arc::new(InMemorySnapshotStore::new()))
    }

    pub fn with_snapshot_store(
        registry: Arc<ActionRegistry>,
        config: RuntimeConfig,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let executor = FlowExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&event_bus),
            Arc::clone(&snapshots),
            config.defaults,
        );

        Self {
            registry,
            executor,
            event_bus,
            snapshots,
        }
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    pub fn snapshot_store(&self) -> &Arc<dyn SnapshotStore> {
        &self.snapshots
    }

    pub fn actions_for_node_type(&self, node_type: NodeType) -> Vec<&ActionDefinition> {
        self.registry.actions_for_node_type(node_type)
    }

    /// Validate a flow and return its execution order without running it
    pub fn validate(&self, request: &FlowRequest) -> Result<Vec<String>, FlowError> {
        let graph = graph::validate(&request.nodes, &request.edges)?;
        Ok(graph.order().to_vec())
    }

    pub async fn execute_flow(&self, request: FlowRequest) -> Result<FlowExecutionResult, FlowError> {
        self.executor.execute_flow(request, CancellationToken::new()).await
    }

    /// Execute a flow that stops dispatching once `cancellation` fires
    pub async fn execute_flow_with_cancel(
        &self,
        request: FlowRequest,
        cancellation: CancellationToken,
    ) -> Result<FlowExecutionResult, FlowError> {
        self.executor.execute_flow(request, cancellation).await
    }

    /// Resume a run suspended at a review gate
    pub async fn resume(
        &self,
        execution_id: ExecutionId,
        decision: ReviewDecision,
    ) -> Result<FlowExecutionResult, FlowError> {
        self.executor
            .resume(execution_id, decision, CancellationToken::new())
            .await
    }

    pub async fn resume_with_cancel(
        &self,
        execution_id: ExecutionId,
        decision: ReviewDecision,
        cancellation: CancellationToken,
    ) -> Result<FlowExecutionResult, FlowError> {
        self.executor.resume(execution_id, decision, cancellation).await
    }

    /// Ids of runs currently waiting for review
    pub async fn suspended_executions(&self) -> Result<Vec<ExecutionId>, FlowError> {
        self.snapshots.list().await
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub event_buffer_size: usize,
    /// Used for requests that carry no settings of their own
    pub defaults: FlowSettings,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
            defaults: FlowSettings::default(),
        }
    }
}
