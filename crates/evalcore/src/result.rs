use crate::{Map, NodeError, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

pub type ExecutionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Success,
    Skipped,
    Error,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeStatus::Success => "success",
            NodeStatus::Skipped => "skipped",
            NodeStatus::Error => "error",
        })
    }
}

/// Why a node was not executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum SkipReason {
    /// Every inbound edge belongs to a CONDITION branch that was not taken.
    BranchNotTaken,
    /// An upstream node failed or was itself skipped because of a failure.
    UpstreamFailed { node_id: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::BranchNotTaken => f.write_str("branch not taken"),
            SkipReason::UpstreamFailed { node_id } => {
                write!(f, "unmet dependency on '{node_id}'")
            }
        }
    }
}

/// Outcome of a single node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecutionResult {
    pub node_id: String,
    pub status: NodeStatus,
    #[serde(default)]
    pub output: Map,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl NodeExecutionResult {
    pub fn success(node_id: impl Into<String>, output: Map, started_at: DateTime<Utc>) -> Self {
        Self {
            node_id: node_id.into(),
            status: NodeStatus::Success,
            output,
            error: None,
            metadata: Map::new(),
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn error(node_id: impl Into<String>, err: &NodeError, started_at: DateTime<Utc>) -> Self {
        Self {
            node_id: node_id.into(),
            status: NodeStatus::Error,
            output: Map::new(),
            error: Some(err.to_string()),
            metadata: Map::new(),
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn skipped(node_id: impl Into<String>, reason: &SkipReason) -> Self {
        let now = Utc::now();
        let mut output = Map::new();
        output.insert("skipped".into(), Value::Bool(true));
        output.insert("reason".into(), Value::String(reason.to_string()));
        Self {
            node_id: node_id.into(),
            status: NodeStatus::Skipped,
            output,
            error: None,
            metadata: Map::new(),
            started_at: now,
            finished_at: now,
        }
    }

    pub fn with_metadata(mut self, metadata: Map) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == NodeStatus::Success
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    Completed,
    Failed,
    Cancelled,
    /// Paused at a REVIEW_GOLDENS gate, resumable by execution id.
    Suspended,
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlowStatus::Completed => "completed",
            FlowStatus::Failed => "failed",
            FlowStatus::Cancelled => "cancelled",
            FlowStatus::Suspended => "suspended",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One line of the run log returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub node_id: String,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(node_id: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            node_id: node_id.into(),
            level,
            message: message.into(),
        }
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowExecutionResult {
    pub execution_id: ExecutionId,
    pub status: FlowStatus,
    pub results: HashMap<String, NodeExecutionResult>,
    pub logs: Vec<LogEntry>,
    pub executed_nodes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspended_at: Option<String>,
}

impl FlowExecutionResult {
    pub fn status_of(&self, node_id: &str) -> Option<NodeStatus> {
        self.results.get(node_id).map(|r| r.status)
    }

    pub fn output_of(&self, node_id: &str) -> Option<&Map> {
        self.results.get(node_id).map(|r| &r.output)
    }

    pub fn failed_nodes(&self) -> Vec<&str> {
        let mut failed: Vec<&str> = self
            .results
            .values()
            .filter(|r| r.status == NodeStatus::Error)
            .map(|r| r.node_id.as_str())
            .collect();
        failed.sort_unstable();
        failed
    }
}
