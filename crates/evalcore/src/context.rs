use crate::template::{self, Reference, ReferenceSource};
use crate::{Map, NodeExecutionResult, NodeStatus, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per-run accumulator of node outputs and interpolation variables.
///
/// Outputs are namespaced by the id of the node that produced them. A fresh
/// context is created for every run and never shared between runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionContext {
    data: HashMap<String, Map>,
    variables: Map,
    history: Vec<NodeExecutionResult>,
    #[serde(default)]
    ready: bool,
}

/// Context handle shared between the orchestrator and running handlers.
pub type SharedContext = Arc<RwLock<ExecutionContext>>;

impl ExecutionContext {
    /// Seed a context with the caller's params as variables.
    pub fn new(params: Map) -> Self {
        Self {
            variables: params,
            ..Self::default()
        }
    }

    pub fn into_shared(self) -> SharedContext {
        Arc::new(RwLock::new(self))
    }

    pub fn mark_ready(&mut self) {
        self.ready = true;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.variables.insert(name.into(), value.into());
    }

    pub fn get_variable(&self, name: &str, default: Value) -> Value {
        self.variables.get(name).cloned().unwrap_or(default)
    }

    pub fn variables(&self) -> &Map {
        &self.variables
    }

    /// Output namespace of a node that has already produced a result.
    pub fn output(&self, node_id: &str) -> Option<&Map> {
        self.data.get(node_id)
    }

    pub fn data(&self) -> &HashMap<String, Map> {
        &self.data
    }

    pub fn history(&self) -> &[NodeExecutionResult] {
        &self.history
    }

    /// Write an output namespace. Only used for a node's own id.
    pub fn set_output(&mut self, node_id: impl Into<String>, output: Map) {
        self.data.insert(node_id.into(), output);
    }

    /// Append a result to the history; successful outputs become referenceable.
    pub fn record(&mut self, result: NodeExecutionResult) {
        if result.status == NodeStatus::Success {
            self.data.insert(result.node_id.clone(), result.output.clone());
        }
        self.history.push(result);
    }

    /// Substitute every `${node.field}` marker in `value`.
    pub fn resolve_references(&self, value: &Value) -> Value {
        template::resolve_value(value, self)
    }

    pub fn resolve_map(&self, map: &Map) -> Map {
        map.iter()
            .map(|(k, v)| (k.clone(), self.resolve_references(v)))
            .collect()
    }

    /// Isolated copy used by one LOOP iteration. History is not carried over.
    pub fn fork_for_iteration(&self) -> Self {
        Self {
            data: self.data.clone(),
            variables: self.variables.clone(),
            history: Vec::new(),
            ready: self.ready,
        }
    }
}

impl ReferenceSource for ExecutionContext {
    fn lookup(&self, reference: &Reference) -> Option<Value> {
        if let Some(output) = self.data.get(&reference.root) {
            if reference.path.is_empty() {
                return Some(Value::Object(output.clone()));
            }
            let (first, rest) = reference.path.split_first()?;
            return output.get(first)?.get_path(rest).cloned();
        }
        self.variables
            .get(&reference.root)?
            .get_path(&reference.path)
            .cloned()
    }
}
