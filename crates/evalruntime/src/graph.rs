//! Structural validation and deterministic topological ordering.

use evalcore::{FlowEdge, FlowError, FlowNode, NodeType, ValidationError, Value};
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Validated flow graph: execution order plus adjacency.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    graph: DiGraph<String, usize>,
    index: HashMap<String, NodeIndex>,
    order: Vec<String>,
    incoming: HashMap<String, Vec<FlowEdge>>,
    outgoing: HashMap<String, Vec<FlowEdge>>,
    loop_owner: HashMap<String, String>,
    loop_bodies: HashMap<String, Vec<String>>,
}

impl FlowGraph {
    /// Node ids in dependency order, ties broken by array position.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Position of a node in the submitted `nodes` array.
    pub fn position(&self, node_id: &str) -> Option<usize> {
        self.index.get(node_id).map(|idx| idx.index())
    }

    pub fn incoming(&self, node_id: &str) -> &[FlowEdge] {
        self.incoming.get(node_id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn outgoing(&self, node_id: &str) -> &[FlowEdge] {
        self.outgoing.get(node_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Distinct direct predecessors, in array order.
    pub fn predecessors(&self, node_id: &str) -> Vec<&str> {
        self.neighbors(node_id, Direction::Incoming)
    }

    /// Distinct direct successors, in array order.
    pub fn successors(&self, node_id: &str) -> Vec<&str> {
        self.neighbors(node_id, Direction::Outgoing)
    }

    fn neighbors(&self, node_id: &str, direction: Direction) -> Vec<&str> {
        let Some(&idx) = self.index.get(node_id) else {
            return Vec::new();
        };
        let mut found: Vec<NodeIndex> = self.graph.neighbors_directed(idx, direction).collect();
        found.sort_unstable();
        found.dedup();
        found.into_iter().map(|i| self.graph[i].as_str()).collect()
    }

    /// LOOP node that owns `node_id` as part of its body, if any.
    pub fn loop_owner(&self, node_id: &str) -> Option<&str> {
        self.loop_owner.get(node_id).map(String::as_str)
    }

    pub fn loop_body(&self, loop_id: &str) -> &[String] {
        self.loop_bodies.get(loop_id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn has_path(&self, from: &str, to: &str) -> bool {
        match (self.index.get(from), self.index.get(to)) {
            (Some(&a), Some(&b)) => has_path_connecting(&self.graph, a, b, None),
            _ => false,
        }
    }
}

/// Full structural validation of a flow.
///
/// Checks, in order: duplicate ids, dangling edges, exactly one START node
/// (an empty flow is valid), LOOP body declarations, and acyclicity.
pub fn validate(nodes: &[FlowNode], edges: &[FlowEdge]) -> Result<FlowGraph, FlowError> {
    let mut graph = build(nodes, edges)?;

    if !nodes.is_empty() {
        let starts: Vec<String> = nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Start)
            .map(|n| n.id.clone())
            .collect();
        match starts.len() {
            0 => return Err(ValidationError::MissingStart.into()),
            1 => {}
            _ => return Err(ValidationError::MultipleStart(starts).into()),
        }
    }

    collect_loops(nodes, &mut graph)?;
    graph.order = kahn_order(&graph.graph)?;

    tracing::debug!(
        nodes = nodes.len(),
        edges = edges.len(),
        "Flow graph validated, order: [{}]",
        graph.order.join(", ")
    );
    Ok(graph)
}

/// Topological order only: duplicate, dangling-edge and cycle checks.
pub fn topological_order(nodes: &[FlowNode], edges: &[FlowEdge]) -> Result<Vec<String>, FlowError> {
    let graph = build(nodes, edges)?;
    kahn_order(&graph.graph)
}

fn build(nodes: &[FlowNode], edges: &[FlowEdge]) -> Result<FlowGraph, FlowError> {
    let mut graph = DiGraph::with_capacity(nodes.len(), edges.len());
    let mut index = HashMap::with_capacity(nodes.len());

    // indices follow array order, which Kahn's tie-break relies on
    for node in nodes {
        if index.contains_key(&node.id) {
            return Err(ValidationError::DuplicateNode(node.id.clone()).into());
        }
        let idx = graph.add_node(node.id.clone());
        index.insert(node.id.clone(), idx);
    }

    let mut incoming: HashMap<String, Vec<FlowEdge>> = HashMap::new();
    let mut outgoing: HashMap<String, Vec<FlowEdge>> = HashMap::new();

    for (i, edge) in edges.iter().enumerate() {
        let lookup = |id: &str| {
            index.get(id).copied().ok_or_else(|| ValidationError::DanglingEdge {
                edge_id: edge.display_id(),
                node_id: id.to_string(),
            })
        };
        let from = lookup(&edge.source)?;
        let to = lookup(&edge.target)?;
        graph.add_edge(from, to, i);
        outgoing.entry(edge.source.clone()).or_default().push(edge.clone());
        incoming.entry(edge.target.clone()).or_default().push(edge.clone());
    }

    Ok(FlowGraph {
        graph,
        index,
        order: Vec::new(),
        incoming,
        outgoing,
        loop_owner: HashMap::new(),
        loop_bodies: HashMap::new(),
    })
}

/// Kahn's algorithm with a min-heap over array positions.
fn kahn_order(graph: &DiGraph<String, usize>) -> Result<Vec<String>, FlowError> {
    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|idx| graph.edges_directed(idx, Direction::Incoming).count())
        .collect();

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(in_degree.len());
    while let Some(Reverse(i)) = ready.pop() {
        let idx = NodeIndex::new(i);
        order.push(graph[idx].clone());
        for target in graph.neighbors_directed(idx, Direction::Outgoing) {
            let t = target.index();
            in_degree[t] -= 1;
            if in_degree[t] == 0 {
                ready.push(Reverse(t));
            }
        }
    }

    if order.len() < in_degree.len() {
        let nodes: Vec<String> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d > 0)
            .map(|(i, _)| graph[NodeIndex::new(i)].clone())
            .collect();
        tracing::warn!("Cycle detected among [{}]", nodes.join(", "));
        return Err(FlowError::CycleDetected { nodes });
    }

    Ok(order)
}

fn collect_loops(nodes: &[FlowNode], graph: &mut FlowGraph) -> Result<(), FlowError> {
    let types: HashMap<&str, NodeType> = nodes.iter().map(|n| (n.id.as_str(), n.node_type)).collect();

    for node in nodes.iter().filter(|n| n.node_type == NodeType::Loop) {
        let invalid = |reason: String| ValidationError::InvalidLoop {
            node_id: node.id.clone(),
            reason,
        };

        if !node.data.contains_key("items") {
            return Err(invalid("missing 'items'".into()).into());
        }

        let body: Vec<String> = match node.data.get("body") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<_>>()
                .ok_or_else(|| invalid("'body' must list node ids".into()))?,
            _ => return Err(invalid("missing 'body' node list".into()).into()),
        };
        if body.is_empty() {
            return Err(invalid("'body' is empty".into()).into());
        }

        let mut seen = HashSet::new();
        for member in &body {
            match types.get(member.as_str()) {
                None => return Err(invalid(format!("unknown body node '{member}'")).into()),
                Some(t) if !t.dispatches_action() => {
                    return Err(invalid(format!("body node '{member}' has type {t}")).into())
                }
                _ => {}
            }
            if !seen.insert(member.as_str()) {
                return Err(invalid(format!("body node '{member}' listed twice")).into());
            }
            if let Some(owner) = graph.loop_owner.get(member) {
                return Err(invalid(format!("body node '{member}' already belongs to '{owner}'")).into());
            }
        }

        // a body node may only depend on the loop, its siblings, or the loop's ancestors
        for member in &body {
            for pred in graph.predecessors(member) {
                let allowed = pred == node.id || seen.contains(pred) || graph.has_path(pred, &node.id);
                if !allowed {
                    return Err(invalid(format!(
                        "body node '{member}' depends on '{pred}' which does not precede the loop"
                    ))
                    .into());
                }
            }
        }

        // body nodes must not feed back into their own loop
        for member in &body {
            if graph.has_path(member, &node.id) {
                return Err(invalid(format!(
                    "body node '{member}' leads back into the loop"
                ))
                .into());
            }
        }

        let body = order_body(graph, body);
        for member in &body {
            graph.loop_owner.insert(member.clone(), node.id.clone());
        }
        graph.loop_bodies.insert(node.id.clone(), body);
    }

    Ok(())
}

/// Order body members so each runs after the siblings it depends on, keeping
/// the listed order otherwise. Members caught in a cycle are appended as
/// listed; the cycle check reports them.
fn order_body(graph: &FlowGraph, mut pending: Vec<String>) -> Vec<String> {
    let mut ordered: Vec<String> = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let next = pending.iter().position(|member| {
            graph
                .predecessors(member)
                .iter()
                .all(|pred| !pending.iter().any(|p| p.as_str() == *pred))
        });
        match next {
            Some(i) => ordered.push(pending.remove(i)),
            None => ordered.append(&mut pending),
        }
    }

    ordered
}
