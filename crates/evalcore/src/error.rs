use thiserror::Error;

/// Run-level failures. Only these ever escape the orchestrator as `Err`.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Invalid flow: {0}")]
    Validation(#[from] ValidationError),

    #[error("Cycle detected between nodes: {}", nodes.join(", "))]
    CycleDetected { nodes: Vec<String> },

    #[error("No suspended execution with id {0}")]
    SnapshotNotFound(String),

    #[error("Execution {execution_id} is not waiting on node {node_id}")]
    NotSuspended {
        execution_id: String,
        node_id: String,
    },

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowError {
    /// Structural errors are the caller's fault and map to client-error responses.
    pub fn is_structural(&self) -> bool {
        matches!(self, FlowError::Validation(_) | FlowError::CycleDetected { .. })
    }
}

/// Malformed graph detected before any node runs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Edge '{edge_id}' references unknown node '{node_id}'")]
    DanglingEdge { edge_id: String, node_id: String },

    #[error("Flow has no START node")]
    MissingStart,

    #[error("Flow has more than one START node: {}", .0.join(", "))]
    MultipleStart(Vec<String>),

    #[error("Invalid LOOP node '{node_id}': {reason}")]
    InvalidLoop { node_id: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Action already registered: {0}")]
    DuplicateAction(String),

    #[error("Action not found: {0}")]
    ActionNotFound(String),
}

/// Failure of a single node. Captured into that node's result, never raised.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("No handler registered for action {0}")]
    ActionNotFound(String),

    #[error("Node has no actionId configured")]
    MissingActionId,

    #[error("Action '{action_id}' failed: {cause}")]
    HandlerExecution { action_id: String, cause: String },

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invalid condition expression: {0}")]
    Expression(String),

    #[error("Loop over {count} items exceeds the limit of {max} iterations")]
    LoopLimitExceeded { count: usize, max: usize },

    /// Left without a result when the run could make no further progress.
    #[error("Node was never scheduled: dependencies did not resolve")]
    Unscheduled,

    #[error("Review rejected{}", .0.as_deref().map(|c| format!(": {c}")).unwrap_or_default())]
    ReviewRejected(Option<String>),
}

impl From<RegistryError> for NodeError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::ActionNotFound(id) => NodeError::ActionNotFound(id),
            RegistryError::DuplicateAction(id) => {
                NodeError::Configuration(format!("Action already registered: {id}"))
            }
        }
    }
}
