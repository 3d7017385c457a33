#![allow(dead_code)]

use evalcore::{
    handler_fn, FlowEdge, FlowNode, FlowRequest, NodeError, NodeOutput, NodeType, Value,
};
use evalruntime::{ActionDefinition, ActionRegistry, FlowRuntime, RuntimeConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Observations made by the scripted handlers.
#[derive(Default)]
pub struct Recorder {
    pub calls: Mutex<Vec<String>>,
    pub active: AtomicUsize,
    pub peak: AtomicUsize,
}

impl Recorder {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

/// Registry with scripted actions:
/// `echo` returns its resolved params, `fail` errors, `slow` sleeps for
/// `sleepMs` (default 10s), `panic` panics, `track` records call order and
/// concurrency.
pub fn scripted_registry(recorder: Arc<Recorder>) -> ActionRegistry {
    let mut builder = ActionRegistry::builder();

    builder
        .register(
            ActionDefinition::new("echo", "Echo", NodeType::Action),
            handler_fn(|_node, ctx| async move {
                let mut outputs = ctx.params.clone();
                outputs.remove("actionId");
                Ok::<_, NodeError>(NodeOutput::from(outputs))
            }),
        )
        .unwrap();

    builder
        .register(
            ActionDefinition::new("fail", "Fail", NodeType::Action),
            handler_fn(|_node, _ctx| async move {
                Err::<NodeOutput, _>(NodeError::ExecutionFailed("boom".into()))
            }),
        )
        .unwrap();

    builder
        .register(
            ActionDefinition::new("slow", "Slow", NodeType::Action),
            handler_fn(|_node, ctx| async move {
                let ms = ctx.param("sleepMs").and_then(Value::as_f64).unwrap_or(10_000.0);
                tokio::time::sleep(Duration::from_millis(ms as u64)).await;
                Ok::<_, NodeError>(NodeOutput::new().with_output("slept", ms))
            }),
        )
        .unwrap();

    builder
        .register(
            ActionDefinition::new("panic", "Panic", NodeType::Action),
            handler_fn(|node, _ctx| async move { explode(&node.id) }),
        )
        .unwrap();

    let tracker = Arc::clone(&recorder);
    builder
        .register(
            ActionDefinition::new("track", "Track", NodeType::Action),
            handler_fn(move |node, _ctx| {
                let recorder = Arc::clone(&tracker);
                async move {
                    recorder.calls.lock().unwrap().push(node.id.clone());
                    let now = recorder.active.fetch_add(1, Ordering::SeqCst) + 1;
                    recorder.peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    recorder.active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, NodeError>(NodeOutput::new().with_output("node", node.id.as_str()))
                }
            }),
        )
        .unwrap();

    builder
        .register(
            ActionDefinition::new("upload", "Upload", NodeType::FileUpload),
            handler_fn(|_node, ctx| async move {
                let name = ctx.param_or("fileName", Value::from("data.csv"));
                Ok::<_, NodeError>(NodeOutput::new().with_output("file_name", name))
            }),
        )
        .unwrap();

    builder.build()
}

fn explode(node_id: &str) -> Result<NodeOutput, NodeError> {
    panic!("handler for {node_id} blew up")
}

/// Route engine logs through the test harness; `RUST_LOG=debug` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn runtime() -> (FlowRuntime, Arc<Recorder>) {
    init_tracing();
    let recorder = Arc::new(Recorder::default());
    let registry = Arc::new(scripted_registry(Arc::clone(&recorder)));
    (FlowRuntime::with_registry(registry, RuntimeConfig::default()), recorder)
}

pub fn start() -> FlowNode {
    FlowNode::new("start", NodeType::Start)
}

pub fn echo(id: &str) -> FlowNode {
    FlowNode::action(id, "echo")
}

pub fn edge(source: &str, target: &str) -> FlowEdge {
    FlowEdge::new(source, target)
}

pub fn request(nodes: Vec<FlowNode>, edges: Vec<FlowEdge>) -> FlowRequest {
    FlowRequest::new(nodes, edges)
}

pub fn ids(values: &[&str]) -> Value {
    Value::Array(values.iter().map(|v| Value::from(*v)).collect())
}
