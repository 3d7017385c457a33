//! Core abstractions for the evaluation flow engine
//!
//! This crate provides the data model, the execution context with its
//! `${node.field}` interpolation, condition expressions, events and the
//! action handler trait. It has no scheduling logic.

mod context;
mod error;
pub mod events;
pub mod expr;
mod flow;
mod node;
mod result;
pub mod template;
mod value;

pub use context::{ExecutionContext, SharedContext};
pub use error::{FlowError, NodeError, RegistryError, ValidationError};
pub use events::{EventBus, EventEmitter, ExecutionEvent, NodeEvent};
pub use flow::{FlowEdge, FlowNode, FlowRequest, FlowSettings, FlowTemplate, NodeType};
pub use node::{handler_fn, ActionContext, ActionHandler, ContextView, FnHandler, NodeOutput};
pub use result::{
    ExecutionId, FlowExecutionResult, FlowStatus, LogEntry, LogLevel, NodeExecutionResult,
    NodeStatus, SkipReason,
};
pub use value::{Map, Value};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
