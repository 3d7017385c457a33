//! Per-node-type semantics.
//!
//! Nothing raised by a handler escapes this module: errors, timeouts, panics
//! and cancellation all come back as an `error` [`NodeExecutionResult`].

use crate::registry::ActionRegistry;
use chrono::{DateTime, Utc};
use evalcore::expr;
use evalcore::{
    ActionContext, ContextView, EventBus, ExecutionContext, ExecutionId, FlowNode, FlowSettings,
    Map, NodeError, NodeExecutionResult, NodeOutput, NodeType, SharedContext, Value,
};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What the orchestrator hands over for one node.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub node: FlowNode,
    /// Inbound sources whose edges are satisfied, in array order
    pub inbound: Vec<String>,
    /// Sub-path nodes of a LOOP, in iteration order
    pub body: Vec<FlowNode>,
}

impl Dispatch {
    pub fn new(node: FlowNode) -> Self {
        Self {
            node,
            inbound: Vec::new(),
            body: Vec::new(),
        }
    }
}

/// Outcome of running one node.
#[derive(Debug, Clone)]
pub enum NodeRun {
    Finished(NodeExecutionResult),
    /// A LOOP plus one aggregated result per body node
    Loop {
        result: NodeExecutionResult,
        body: Vec<NodeExecutionResult>,
    },
    /// REVIEW_GOLDENS gate reached; the run must suspend here
    AwaitingReview,
}

/// Applies node-type semantics and invokes registered handlers.
#[derive(Clone)]
pub struct NodeExecutor {
    registry: Arc<ActionRegistry>,
    events: Arc<EventBus>,
    execution_id: ExecutionId,
    settings: FlowSettings,
}

struct Iteration {
    outputs: Map,
    per_node: Vec<(String, Value)>,
    failure: Option<(String, NodeError)>,
}

impl NodeExecutor {
    pub fn new(
        registry: Arc<ActionRegistry>,
        events: Arc<EventBus>,
        execution_id: ExecutionId,
        settings: FlowSettings,
    ) -> Self {
        Self {
            registry,
            events,
            execution_id,
            settings,
        }
    }

    pub async fn execute(
        &self,
        dispatch: Dispatch,
        context: SharedContext,
        cancellation: CancellationToken,
    ) -> NodeRun {
        let started_at = Utc::now();
        let node = &dispatch.node;
        let mut metadata = Map::new();

        let outcome = match node.node_type {
            NodeType::Start => Ok(self.start(&context).await),
            NodeType::Action | NodeType::FileUpload => {
                let params = context.read().await.resolve_map(&node.data);
                self.run_action(node, params, ContextView::new(context.clone()), &cancellation)
                    .await
                    .map(|out| {
                        metadata = out.metadata;
                        out.outputs
                    })
            }
            NodeType::Condition => self.condition(node, &context).await,
            NodeType::Merge => Ok(self.merge(&dispatch.inbound, &context).await),
            NodeType::End => Ok(Map::from([("completed".to_string(), Value::Bool(true))])),
            NodeType::ReviewGoldens => return NodeRun::AwaitingReview,
            NodeType::Loop => {
                return self
                    .run_loop(node, &dispatch.body, &context, &cancellation, started_at)
                    .await
            }
        };

        NodeRun::Finished(finish(&node.id, outcome, started_at).with_metadata(metadata))
    }

    async fn start(&self, context: &SharedContext) -> Map {
        let mut ctx = context.write().await;
        ctx.mark_ready();
        ctx.variables().clone()
    }

    async fn condition(&self, node: &FlowNode, context: &SharedContext) -> Result<Map, NodeError> {
        let expression = node
            .data
            .get("expression")
            .or_else(|| node.data.get("condition"))
            .ok_or_else(|| NodeError::Configuration("CONDITION node requires 'expression'".into()))?;

        let ctx = context.read().await;
        let result = match expression {
            Value::String(text) => expr::evaluate(text, &*ctx)?,
            other => ctx.resolve_references(other).is_truthy(),
        };
        tracing::debug!(node_id = %node.id, result, "Condition evaluated");

        Ok(Map::from([
            ("result".to_string(), Value::Bool(result)),
            ("branch".to_string(), Value::from(if result { "true" } else { "false" })),
        ]))
    }

    async fn merge(&self, inbound: &[String], context: &SharedContext) -> Map {
        let ctx = context.read().await;
        inbound
            .iter()
            .map(|source| {
                let output = ctx.output(source).cloned().unwrap_or_default();
                (source.clone(), Value::Object(output))
            })
            .collect()
    }

    /// Resolve the handler and call it under timeout and cancellation.
    pub async fn run_action(
        &self,
        node: &FlowNode,
        params: Map,
        context: ContextView,
        cancellation: &CancellationToken,
    ) -> Result<NodeOutput, NodeError> {
        let action_id = node.action_id().ok_or(NodeError::MissingActionId)?;
        let handler = self.registry.handler_for(action_id)?;
        handler.validate_params(&params)?;

        let timeout_ms = node
            .data
            .get("timeoutMs")
            .and_then(Value::as_f64)
            .map(|ms| ms.max(0.0) as u64)
            .unwrap_or(self.settings.node_timeout_ms);

        let ctx = ActionContext {
            node_id: node.id.clone(),
            action_id: action_id.to_string(),
            params,
            context,
            events: self.events.create_emitter(self.execution_id, node.id.clone()),
            cancellation: cancellation.child_token(),
        };

        tracing::debug!(node_id = %node.id, action_id, timeout_ms, "Invoking action handler");
        let call = AssertUnwindSafe(handler.call(node, ctx)).catch_unwind();

        tokio::select! {
            _ = cancellation.cancelled() => Err(NodeError::Cancelled),
            res = tokio::time::timeout(Duration::from_millis(timeout_ms), call) => match res {
                Err(_) => Err(NodeError::Timeout { millis: timeout_ms }),
                Ok(Err(_panic)) => Err(NodeError::HandlerExecution {
                    action_id: action_id.to_string(),
                    cause: "handler panicked".to_string(),
                }),
                Ok(Ok(Ok(output))) => Ok(output),
                Ok(Ok(Err(NodeError::Cancelled))) => Err(NodeError::Cancelled),
                Ok(Ok(Err(e))) => Err(NodeError::HandlerExecution {
                    action_id: action_id.to_string(),
                    cause: e.to_string(),
                }),
            }
        }
    }

    async fn run_loop(
        &self,
        node: &FlowNode,
        body: &[FlowNode],
        context: &SharedContext,
        cancellation: &CancellationToken,
        started_at: DateTime<Utc>,
    ) -> NodeRun {
        let prepared = self.prepare_loop(node, context).await;
        let (items, concurrency, base) = match prepared {
            Ok(p) => p,
            Err(e) => {
                let body_results = body
                    .iter()
                    .map(|b| NodeExecutionResult::error(&b.id, &e, started_at))
                    .collect();
                return NodeRun::Loop {
                    result: NodeExecutionResult::error(&node.id, &e, started_at),
                    body: body_results,
                };
            }
        };

        tracing::info!(
            node_id = %node.id,
            iterations = items.len(),
            concurrency,
            "Running loop body [{}]",
            body.iter().map(|b| b.id.as_str()).collect::<Vec<_>>().join(", ")
        );

        let iterations: Vec<Iteration> = stream::iter(items.into_iter().enumerate().map(|(index, item)| {
            self.run_iteration(node, body, base.fork_for_iteration(), index, item, cancellation)
        }))
        .buffered(concurrency)
        .collect()
        .await;

        let mut per_node: Vec<(String, Vec<Value>, Option<NodeError>)> =
            body.iter().map(|b| (b.id.clone(), Vec::new(), None)).collect();
        let mut results = Vec::with_capacity(iterations.len());
        let mut loop_error = None;

        for (index, iteration) in iterations.into_iter().enumerate() {
            for (node_id, value) in iteration.per_node {
                if let Some(slot) = per_node.iter_mut().find(|(id, _, _)| *id == node_id) {
                    slot.1.push(value);
                }
            }
            if let Some((failed_id, err)) = iteration.failure {
                if let Some(slot) = per_node.iter_mut().find(|(id, _, _)| *id == failed_id) {
                    slot.2.get_or_insert_with(|| err.clone());
                }
                if loop_error.is_none() {
                    loop_error = Some(match err {
                        NodeError::Cancelled => NodeError::Cancelled,
                        other => NodeError::ExecutionFailed(format!(
                            "iteration {index} failed at '{failed_id}': {other}"
                        )),
                    });
                }
            }
            results.push(Value::Object(iteration.outputs));
        }

        let body_results = per_node
            .into_iter()
            .map(|(node_id, values, error)| match error {
                Some(e) => NodeExecutionResult::error(node_id, &e, started_at),
                None => NodeExecutionResult::success(
                    node_id,
                    Map::from([("iterations".to_string(), Value::Array(values))]),
                    started_at,
                ),
            })
            .collect();

        let count = results.len();
        let outcome = match loop_error {
            Some(e) => Err(e),
            None => Ok(Map::from([
                ("results".to_string(), Value::Array(results)),
                ("count".to_string(), Value::from(count)),
            ])),
        };

        NodeRun::Loop {
            result: finish(&node.id, outcome, started_at),
            body: body_results,
        }
    }

    async fn prepare_loop(
        &self,
        node: &FlowNode,
        context: &SharedContext,
    ) -> Result<(Vec<Value>, usize, ExecutionContext), NodeError> {
        let ctx = context.read().await;
        let raw = node.data.get("items").cloned().unwrap_or_default();
        let items = match ctx.resolve_references(&raw) {
            Value::Array(items) => items,
            other => {
                return Err(NodeError::InvalidInputType {
                    field: "items".into(),
                    expected: "array".into(),
                    actual: other.type_name().into(),
                })
            }
        };

        let max = node
            .data
            .get("maxIterations")
            .and_then(Value::as_f64)
            .map(|n| n as usize)
            .unwrap_or(self.settings.max_loop_iterations);
        if items.len() > max {
            return Err(NodeError::LoopLimitExceeded {
                count: items.len(),
                max,
            });
        }

        let concurrency = node
            .data
            .get("concurrency")
            .and_then(Value::as_f64)
            .map(|n| n as usize)
            .unwrap_or(self.settings.loop_concurrency)
            .max(1);

        Ok((items, concurrency, ctx.fork_for_iteration()))
    }

    async fn run_iteration(
        &self,
        node: &FlowNode,
        body: &[FlowNode],
        mut base: ExecutionContext,
        index: usize,
        item: Value,
        cancellation: &CancellationToken,
    ) -> Iteration {
        base.set_output(
            node.id.clone(),
            Map::from([
                ("item".to_string(), item),
                ("index".to_string(), Value::from(index)),
            ]),
        );
        let shared = base.into_shared();
        let mut iteration = Iteration {
            outputs: Map::new(),
            per_node: Vec::with_capacity(body.len()),
            failure: None,
        };

        for member in body {
            let params = shared.read().await.resolve_map(&member.data);
            let view = ContextView::new(shared.clone());
            match self.run_action(member, params, view, cancellation).await {
                Ok(output) => {
                    shared.write().await.set_output(member.id.clone(), output.outputs.clone());
                    let value = Value::Object(output.outputs);
                    iteration.outputs.insert(member.id.clone(), value.clone());
                    iteration.per_node.push((member.id.clone(), value));
                }
                Err(err) => {
                    tracing::warn!(loop_id = %node.id, node_id = %member.id, index, "Loop body failed: {}", err);
                    iteration.failure = Some((member.id.clone(), err));
                    break;
                }
            }
        }

        iteration
    }
}

fn finish(node_id: &str, outcome: Result<Map, NodeError>, started_at: DateTime<Utc>) -> NodeExecutionResult {
    match outcome {
        Ok(output) => NodeExecutionResult::success(node_id, output, started_at),
        Err(e) => NodeExecutionResult::error(node_id, &e, started_at),
    }
}
