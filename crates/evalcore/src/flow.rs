use crate::{Map, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Node kinds understood by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    Start,
    Action,
    Condition,
    Loop,
    Merge,
    End,
    ReviewGoldens,
    FileUpload,
}

impl NodeType {
    pub const ALL: [NodeType; 8] = [
        NodeType::Start,
        NodeType::Action,
        NodeType::Condition,
        NodeType::Loop,
        NodeType::Merge,
        NodeType::End,
        NodeType::ReviewGoldens,
        NodeType::FileUpload,
    ];

    /// Node types whose work is performed by a registered action handler.
    pub fn dispatches_action(&self) -> bool {
        matches!(self, NodeType::Action | NodeType::FileUpload)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Start => "START",
            NodeType::Action => "ACTION",
            NodeType::Condition => "CONDITION",
            NodeType::Loop => "LOOP",
            NodeType::Merge => "MERGE",
            NodeType::End => "END",
            NodeType::ReviewGoldens => "REVIEW_GOLDENS",
            NodeType::FileUpload => "FILE_UPLOAD",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase().replace('-', "_");
        NodeType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| format!("unknown node type: {s}"))
    }
}

/// A typed step in a flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub data: Map,
}

impl FlowNode {
    pub fn new(id: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            node_type,
            data: Map::new(),
        }
    }

    /// ACTION node bound to a registered action id.
    pub fn action(id: impl Into<String>, action_id: impl Into<String>) -> Self {
        Self::new(id, NodeType::Action).with_data("actionId", action_id.into())
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn action_id(&self) -> Option<&str> {
        self.data
            .get("actionId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    /// Label shown by the editor, falling back to the node id.
    pub fn label(&self) -> &str {
        self.data
            .get("label")
            .and_then(Value::as_str)
            .unwrap_or(&self.id)
    }
}

/// Directed connection between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowEdge {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub target: String,
    /// Branch label used when the source is a CONDITION node.
    #[serde(default, alias = "sourceHandle", alias = "label", skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl FlowEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("{source}->{target}"),
            source,
            target,
            branch: None,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Identifier used in error messages when the wire id was omitted.
    pub fn display_id(&self) -> String {
        if self.id.is_empty() {
            format!("{}->{}", self.source, self.target)
        } else {
            self.id.clone()
        }
    }
}

/// Per-flow execution limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowSettings {
    pub max_parallel_nodes: usize,
    pub node_timeout_ms: u64,
    pub max_loop_iterations: usize,
    pub loop_concurrency: usize,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            max_parallel_nodes: 10,
            node_timeout_ms: 300_000,
            max_loop_iterations: 1_000,
            loop_concurrency: 4,
        }
    }
}

/// Everything a caller submits to run a flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FlowRequest {
    pub nodes: Vec<FlowNode>,
    #[serde(default)]
    pub edges: Vec<FlowEdge>,
    #[serde(default, alias = "context")]
    pub params: Map,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<FlowSettings>,
}

impl FlowRequest {
    pub fn new(nodes: Vec<FlowNode>, edges: Vec<FlowEdge>) -> Self {
        Self {
            nodes,
            edges,
            params: Map::new(),
            settings: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_settings(mut self, settings: FlowSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn find_node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Reusable flow shipped as a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub nodes: Vec<FlowNode>,
    #[serde(default)]
    pub edges: Vec<FlowEdge>,
}

impl FlowTemplate {
    pub fn into_request(self, params: Map) -> FlowRequest {
        FlowRequest {
            nodes: self.nodes,
            edges: self.edges,
            params,
            settings: None,
        }
    }
}
