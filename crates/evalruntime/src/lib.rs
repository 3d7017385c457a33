//! Flow execution runtime
//!
//! Validates flow graphs, keeps the action catalog, and runs flows with
//! dependency-gated parallel dispatch, loops, and review suspension.

mod executor;
pub mod graph;
mod node_executor;
mod registry;
mod runtime;
pub mod snapshot;
pub mod templates;

pub use executor::{FlowExecutor, ReviewDecision};
pub use graph::{topological_order, validate, FlowGraph};
pub use node_executor::{Dispatch, NodeExecutor, NodeRun};
pub use registry::{
    ActionDefinition, ActionParam, ActionParamType, ActionRegistry, ActionRegistryBuilder,
};
pub use runtime::{FlowRuntime, RuntimeConfig};
pub use snapshot::{
    ExecutionSnapshot, FileSnapshotStore, InMemorySnapshotStore, Outcome, SnapshotStore,
};
pub use templates::{load_template, load_templates, TemplateError};
