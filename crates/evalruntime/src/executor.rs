use crate::graph::{self, FlowGraph};
use crate::node_executor::{Dispatch, NodeExecutor, NodeRun};
use crate::registry::ActionRegistry;
use crate::snapshot::{ExecutionSnapshot, Outcome, SnapshotStore};
use chrono::{DateTime, Utc};
use evalcore::{
    EventBus, ExecutionEvent, ExecutionId, FlowError, FlowExecutionResult, FlowNode, FlowRequest,
    FlowSettings, FlowStatus, LogEntry, LogLevel, Map, NodeError, NodeExecutionResult, NodeStatus,
    NodeType, SharedContext, SkipReason, Value,
};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

/// Reviewer verdict delivered to a suspended REVIEW_GOLDENS node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Goldens as edited by the reviewer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goldens: Option<Value>,
}

impl ReviewDecision {
    pub fn approve() -> Self {
        Self {
            approved: true,
            ..Self::default()
        }
    }

    pub fn reject(comment: impl Into<String>) -> Self {
        Self {
            approved: false,
            comment: Some(comment.into()),
            ..Self::default()
        }
    }

    pub fn with_goldens(mut self, goldens: impl Into<Value>) -> Self {
        self.goldens = Some(goldens.into());
        self
    }

    fn to_output(&self) -> Map {
        let mut output = Map::new();
        output.insert("approved".into(), Value::Bool(self.approved));
        if let Some(reviewer) = &self.reviewer {
            output.insert("reviewer".into(), Value::from(reviewer.as_str()));
        }
        if let Some(comment) = &self.comment {
            output.insert("comment".into(), Value::from(comment.as_str()));
        }
        if let Some(goldens) = &self.goldens {
            output.insert("goldens".into(), goldens.clone());
        }
        output
    }
}

/// Drives flows end to end: validation, frontier dispatch, failure policy,
/// suspension and resumption.
pub struct FlowExecutor {
    registry: Arc<ActionRegistry>,
    events: Arc<EventBus>,
    snapshots: Arc<dyn SnapshotStore>,
    defaults: FlowSettings,
}

struct InFlight {
    abort: AbortHandle,
    started_at: DateTime<Utc>,
}

enum Gate {
    Run(Vec<String>),
    Skip(SkipReason),
}

enum Ending {
    Finished,
    Cancelled,
    Suspended(String),
}

impl FlowExecutor {
    pub fn new(
        registry: Arc<ActionRegistry>,
        events: Arc<EventBus>,
        snapshots: Arc<dyn SnapshotStore>,
        defaults: FlowSettings,
    ) -> Self {
        Self {
            registry,
            events,
            snapshots,
            defaults,
        }
    }

    /// Run a flow to completion, suspension or cancellation.
    ///
    /// Only structural problems are returned as `Err`; every runtime failure is
    /// captured in the failing node's result.
    pub async fn execute_flow(
        &self,
        request: FlowRequest,
        cancellation: CancellationToken,
    ) -> Result<FlowExecutionResult, FlowError> {
        let graph = graph::validate(&request.nodes, &request.edges)?;
        let settings = request.settings.clone().unwrap_or_else(|| self.defaults.clone());
        let execution_id = ExecutionId::new_v4();

        tracing::info!(
            %execution_id,
            nodes = request.nodes.len(),
            edges = request.edges.len(),
            params = ?request.params.keys().collect::<Vec<_>>(),
            "Flow execution started"
        );
        self.events.emit(ExecutionEvent::FlowStarted {
            execution_id,
            node_count: request.nodes.len(),
            timestamp: Utc::now(),
        });

        let state = ExecutionSnapshot::new(execution_id, request, settings);
        self.drive(state, &graph, cancellation).await
    }

    /// Continue a run suspended at a REVIEW_GOLDENS node.
    pub async fn resume(
        &self,
        execution_id: ExecutionId,
        decision: ReviewDecision,
        cancellation: CancellationToken,
    ) -> Result<FlowExecutionResult, FlowError> {
        let mut state = self
            .snapshots
            .load(execution_id)
            .await?
            .ok_or_else(|| FlowError::SnapshotNotFound(execution_id.to_string()))?;
        let node_id = state.suspended_at.take().ok_or_else(|| FlowError::NotSuspended {
            execution_id: execution_id.to_string(),
            node_id: String::new(),
        })?;
        let graph = graph::validate(&state.request.nodes, &state.request.edges)?;

        tracing::info!(%execution_id, node_id = %node_id, approved = decision.approved, "Resuming flow after review");

        let output = decision.to_output();
        state.context.set_variable("review", Value::Object(output.clone()));
        let result = if decision.approved {
            NodeExecutionResult::success(&node_id, output, state.updated_at)
        } else {
            NodeExecutionResult::error(
                &node_id,
                &NodeError::ReviewRejected(decision.comment.clone()),
                state.updated_at,
            )
        };
        record_into(&self.events, &mut state, None, result, true).await;
        self.snapshots.remove(execution_id).await?;

        self.drive(state, &graph, cancellation).await
    }

    async fn drive(
        &self,
        mut state: ExecutionSnapshot,
        graph: &FlowGraph,
        cancellation: CancellationToken,
    ) -> Result<FlowExecutionResult, FlowError> {
        let clock = Instant::now();
        let execution_id = state.execution_id;
        let nodes: HashMap<String, FlowNode> = state
            .request
            .nodes
            .iter()
            .map(|n| (n.id.clone(), n.clone()))
            .collect();
        let executor = NodeExecutor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.events),
            execution_id,
            state.settings.clone(),
        );
        let max_parallel = state.settings.max_parallel_nodes.max(1);

        let shared: SharedContext = std::mem::take(&mut state.context).into_shared();
        let mut running: FuturesUnordered<_> = FuturesUnordered::new();
        let mut in_flight: HashMap<String, InFlight> = HashMap::new();
        let mut awaiting_review: Vec<String> = Vec::new();

        let ending = loop {
            if cancellation.is_cancelled() {
                break Ending::Cancelled;
            }

            let runnable = self
                .settle(graph, &nodes, &mut state, &shared, &in_flight, &awaiting_review)
                .await;

            for (node_id, inbound) in runnable {
                if in_flight.len() >= max_parallel {
                    break;
                }
                let Some(node) = nodes.get(&node_id) else {
                    continue;
                };
                let dispatch = Dispatch {
                    node: node.clone(),
                    inbound,
                    body: graph
                        .loop_body(&node_id)
                        .iter()
                        .filter_map(|id| nodes.get(id).cloned())
                        .collect(),
                };

                self.events.emit(ExecutionEvent::NodeStarted {
                    execution_id,
                    node_id: node_id.clone(),
                    node_type: node.node_type,
                    timestamp: Utc::now(),
                });
                state.logs.push(LogEntry::new(
                    &node_id,
                    LogLevel::Info,
                    format!("Executing {} node{}", node.node_type, describe_action(node)),
                ));
                tracing::info!(%execution_id, node_id = %node_id, node_type = %node.node_type, "Executing node");

                let exec = executor.clone();
                let ctx = Arc::clone(&shared);
                let token = cancellation.child_token();
                let handle = tokio::spawn(async move { exec.execute(dispatch, ctx, token).await });
                in_flight.insert(
                    node_id.clone(),
                    InFlight {
                        abort: handle.abort_handle(),
                        started_at: Utc::now(),
                    },
                );
                running.push(async move { (node_id, handle.await) });
            }

            if in_flight.is_empty() {
                match awaiting_review.first() {
                    Some(node_id) => break Ending::Suspended(node_id.clone()),
                    None => break Ending::Finished,
                }
            }

            tokio::select! {
                _ = cancellation.cancelled() => break Ending::Cancelled,
                Some((node_id, joined)) = running.next() => {
                    let Some(flight) = in_flight.remove(&node_id) else { continue };
                    match joined {
                        Ok(NodeRun::Finished(result)) => {
                            record_into(&self.events, &mut state, Some(&shared), result, true).await;
                        }
                        Ok(NodeRun::Loop { result, body }) => {
                            record_into(&self.events, &mut state, Some(&shared), result, true).await;
                            for member in body {
                                record_into(&self.events, &mut state, Some(&shared), member, true).await;
                            }
                        }
                        Ok(NodeRun::AwaitingReview) => {
                            tracing::info!(%execution_id, node_id = %node_id, "Review gate reached");
                            awaiting_review.push(node_id);
                            awaiting_review.sort_by_key(|id| graph.position(id));
                        }
                        Err(join_error) => {
                            let action_id = nodes
                                .get(&node_id)
                                .and_then(|n| n.action_id().map(str::to_string))
                                .unwrap_or_default();
                            let err = NodeError::HandlerExecution {
                                action_id,
                                cause: join_error.to_string(),
                            };
                            let result = NodeExecutionResult::error(&node_id, &err, flight.started_at);
                            record_into(&self.events, &mut state, Some(&shared), result, true).await;
                        }
                    }
                }
            }
        };

        if matches!(ending, Ending::Cancelled) {
            for (node_id, flight) in in_flight.drain() {
                flight.abort.abort();
                let result = NodeExecutionResult::error(&node_id, &NodeError::Cancelled, flight.started_at);
                record_into(&self.events, &mut state, Some(&shared), result, true).await;
            }
            tracing::warn!(%execution_id, "Flow execution cancelled");
        }

        if matches!(ending, Ending::Finished) {
            let stranded: Vec<String> = graph
                .order()
                .iter()
                .filter(|id| !state.outcomes.contains_key(*id))
                .cloned()
                .collect();
            for node_id in stranded {
                tracing::warn!(%execution_id, node_id = %node_id, "Node left unscheduled");
                let result = NodeExecutionResult::error(&node_id, &NodeError::Unscheduled, Utc::now());
                record_into(&self.events, &mut state, Some(&shared), result, false).await;
            }
        }

        state.context = shared.read().await.clone();
        state.updated_at = Utc::now();
        state.remaining = graph
            .order()
            .iter()
            .filter(|id| !state.outcomes.contains_key(*id))
            .cloned()
            .collect();

        let status = match &ending {
            Ending::Cancelled => FlowStatus::Cancelled,
            Ending::Suspended(node_id) => {
                state.suspended_at = Some(node_id.clone());
                state.logs.push(LogEntry::new(
                    node_id,
                    LogLevel::Info,
                    "Flow paused, waiting for golden review",
                ));
                self.snapshots.save(&state).await?;
                self.events.emit(ExecutionEvent::FlowSuspended {
                    execution_id,
                    node_id: node_id.clone(),
                    timestamp: Utc::now(),
                });
                tracing::info!(
                    %execution_id,
                    node_id = %node_id,
                    remaining = state.remaining.len(),
                    "Flow suspended for review"
                );
                FlowStatus::Suspended
            }
            Ending::Finished => {
                if state.results.values().any(|r| r.status == NodeStatus::Error) {
                    FlowStatus::Failed
                } else {
                    FlowStatus::Completed
                }
            }
        };

        let duration_ms = clock.elapsed().as_millis() as u64;
        if status != FlowStatus::Suspended {
            self.events.emit(ExecutionEvent::FlowFinished {
                execution_id,
                status,
                duration_ms,
                timestamp: Utc::now(),
            });
        }
        tracing::info!(
            %execution_id,
            %status,
            executed = state.executed_nodes.len(),
            total = graph.len(),
            duration_ms,
            "Flow execution finished"
        );

        Ok(FlowExecutionResult {
            execution_id,
            status,
            results: state.results,
            logs: state.logs,
            executed_nodes: state.executed_nodes,
            suspended_at: state.suspended_at,
        })
    }

    /// Record skips until nothing changes, then return the runnable nodes in
    /// topological order together with their satisfied inbound sources.
    async fn settle(
        &self,
        graph: &FlowGraph,
        nodes: &HashMap<String, FlowNode>,
        state: &mut ExecutionSnapshot,
        shared: &SharedContext,
        in_flight: &HashMap<String, InFlight>,
        awaiting_review: &[String],
    ) -> Vec<(String, Vec<String>)> {
        let pending: HashSet<&str> = awaiting_review.iter().map(String::as_str).collect();

        loop {
            let mut runnable = Vec::new();
            let mut skipped = Vec::new();

            for node_id in graph.order() {
                if state.outcomes.contains_key(node_id)
                    || in_flight.contains_key(node_id)
                    || pending.contains(node_id.as_str())
                    || graph.loop_owner(node_id).is_some()
                {
                    continue;
                }
                let ready = graph
                    .predecessors(node_id)
                    .iter()
                    .all(|p| state.outcomes.contains_key(*p));
                if !ready {
                    continue;
                }
                match gate(graph, nodes, state, node_id) {
                    Gate::Run(inbound) => runnable.push((node_id.clone(), inbound)),
                    Gate::Skip(reason) => skipped.push((node_id.clone(), reason)),
                }
            }

            if skipped.is_empty() {
                return runnable;
            }

            for (node_id, reason) in skipped {
                let body = graph.loop_body(&node_id).to_vec();
                for member in std::iter::once(node_id).chain(body) {
                    let result = NodeExecutionResult::skipped(&member, &reason);
                    record_into(&self.events, state, Some(shared), result, false).await;
                    state.outcomes.insert(member, outcome_for_skip(&reason));
                }
            }
        }
    }
}

/// Dependency rule: any failed inbound edge skips the node; otherwise it runs
/// when it has no inbound edges or at least one satisfied one.
fn gate(
    graph: &FlowGraph,
    nodes: &HashMap<String, FlowNode>,
    state: &ExecutionSnapshot,
    node_id: &str,
) -> Gate {
    let incoming = graph.incoming(node_id);
    let mut satisfied: Vec<String> = Vec::new();

    for edge in incoming {
        match state.outcomes.get(&edge.source) {
            Some(outcome) if outcome.is_failure() => {
                return Gate::Skip(SkipReason::UpstreamFailed {
                    node_id: edge.source.clone(),
                });
            }
            Some(Outcome::Succeeded) => {
                if branch_matches(nodes, state, edge.source.as_str(), edge.branch.as_deref())
                    && !satisfied.contains(&edge.source)
                {
                    satisfied.push(edge.source.clone());
                }
            }
            _ => {}
        }
    }

    if incoming.is_empty() || !satisfied.is_empty() {
        satisfied.sort_by_key(|id| graph.position(id));
        Gate::Run(satisfied)
    } else {
        Gate::Skip(SkipReason::BranchNotTaken)
    }
}

fn branch_matches(
    nodes: &HashMap<String, FlowNode>,
    state: &ExecutionSnapshot,
    source: &str,
    label: Option<&str>,
) -> bool {
    let is_condition = nodes
        .get(source)
        .is_some_and(|n| n.node_type == NodeType::Condition);
    let Some(label) = label.filter(|_| is_condition) else {
        return true;
    };
    let taken = state
        .results
        .get(source)
        .and_then(|r| r.output.get("branch"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    label.trim().eq_ignore_ascii_case(taken)
}

fn outcome_for_skip(reason: &SkipReason) -> Outcome {
    match reason {
        SkipReason::BranchNotTaken => Outcome::SkippedBranch,
        SkipReason::UpstreamFailed { .. } => Outcome::SkippedUpstream,
    }
}

fn describe_action(node: &FlowNode) -> String {
    node.action_id()
        .map(|id| format!(" (action {id})"))
        .unwrap_or_default()
}

/// Store a node result everywhere it is observed: outcomes, results, the
/// execution context, the run log and the event bus.
async fn record_into(
    events: &EventBus,
    state: &mut ExecutionSnapshot,
    shared: Option<&SharedContext>,
    result: NodeExecutionResult,
    attempted: bool,
) {
    let execution_id = state.execution_id;
    let node_id = result.node_id.clone();
    let now = Utc::now();

    let outcome = match result.status {
        NodeStatus::Success => {
            tracing::info!(%execution_id, node_id = %node_id, duration_ms = result.duration_ms(), "Node completed");
            events.emit(ExecutionEvent::NodeCompleted {
                execution_id,
                node_id: node_id.clone(),
                output: result.output.clone(),
                duration_ms: result.duration_ms(),
                timestamp: now,
            });
            state.logs.push(LogEntry::new(
                &node_id,
                LogLevel::Info,
                format!("Completed in {}ms", result.duration_ms()),
            ));
            Outcome::Succeeded
        }
        NodeStatus::Error => {
            let error = result.error.clone().unwrap_or_default();
            tracing::error!(%execution_id, node_id = %node_id, "Node failed: {}", error);
            events.emit(ExecutionEvent::NodeFailed {
                execution_id,
                node_id: node_id.clone(),
                error: error.clone(),
                timestamp: now,
            });
            state.logs.push(LogEntry::new(&node_id, LogLevel::Error, error));
            Outcome::Failed
        }
        NodeStatus::Skipped => {
            let reason = result
                .output
                .get("reason")
                .map(Value::render)
                .unwrap_or_default();
            tracing::info!(%execution_id, node_id = %node_id, "Node skipped: {}", reason);
            events.emit(ExecutionEvent::NodeSkipped {
                execution_id,
                node_id: node_id.clone(),
                reason: reason.clone(),
                timestamp: now,
            });
            state
                .logs
                .push(LogEntry::new(&node_id, LogLevel::Warn, format!("Skipped: {reason}")));
            Outcome::SkippedBranch
        }
    };

    state.outcomes.insert(node_id.clone(), outcome);
    if attempted {
        state.executed_nodes.push(node_id.clone());
    }
    match shared {
        Some(shared) => shared.write().await.record(result.clone()),
        None => state.context.record(result.clone()),
    }
    state.results.insert(node_id, result);
}
