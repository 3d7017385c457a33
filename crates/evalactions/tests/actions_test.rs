use evalactions::{
    register_all, DelayAction, EchoAction, FileLoadAction, HttpRequestAction, JsonParseAction,
    JsonStringifyAction, LogAction,
};
use evalcore::{
    ActionContext, ActionHandler, FlowEdge, FlowNode, FlowRequest, FlowStatus, Map, NodeError,
    NodeType, Value,
};
use evalruntime::{ActionRegistry, FlowRuntime, RuntimeConfig};
use std::sync::Arc;
use std::time::Duration;

fn params(entries: &[(&str, Value)]) -> Map {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn ctx(action_id: &str, entries: &[(&str, Value)]) -> ActionContext {
    ActionContext::standalone("n1", action_id, params(entries))
}

fn node(action_id: &str) -> FlowNode {
    FlowNode::action("n1", action_id)
}

fn standard_runtime() -> FlowRuntime {
    let mut builder = ActionRegistry::builder();
    register_all(&mut builder).unwrap();
    FlowRuntime::with_registry(Arc::new(builder.build()), RuntimeConfig::default())
}

#[test]
fn test_register_all_catalog() {
    let mut builder = ActionRegistry::builder();
    register_all(&mut builder).unwrap();
    let registry = builder.build();

    let ids: Vec<&str> = registry.list_actions().iter().map(|d| d.id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            "debug.echo",
            "debug.log",
            "transform.json_parse",
            "transform.json_stringify",
            "time.delay",
            "http.request",
            "file.load",
        ]
    );
    let uploads = registry.actions_for_node_type(NodeType::FileUpload);
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].id, "file.load");

    // registering twice collides
    let mut again = ActionRegistry::builder();
    register_all(&mut again).unwrap();
    assert!(register_all(&mut again).is_err());
}

#[tokio::test]
async fn test_echo_returns_params() {
    let out = EchoAction
        .call(
            &node("debug.echo"),
            ctx(
                "debug.echo",
                &[
                    ("actionId", Value::from("debug.echo")),
                    ("text", Value::from("hello")),
                    ("params", Value::object([("n", Value::from(2))])),
                ],
            ),
        )
        .await
        .unwrap();

    assert_eq!(out.outputs["text"], Value::from("hello"));
    assert_eq!(out.outputs["n"], Value::from(2));
    assert!(!out.outputs.contains_key("actionId"));
    assert!(!out.outputs.contains_key("params"));
}

#[tokio::test]
async fn test_log_outputs_message() {
    let out = LogAction
        .call(&node("debug.log"), ctx("debug.log", &[("message", Value::from("checkpoint"))]))
        .await
        .unwrap();
    assert_eq!(out.outputs["message"], Value::from("checkpoint"));

    let out = LogAction
        .call(&node("debug.log"), ctx("debug.log", &[]))
        .await
        .unwrap();
    assert_eq!(out.outputs["message"], Value::from("(no message)"));
}

#[tokio::test]
async fn test_json_parse() {
    let out = JsonParseAction
        .call(
            &node("transform.json_parse"),
            ctx("transform.json_parse", &[("json", Value::from(r#"{"a": [1, 2]}"#))]),
        )
        .await
        .unwrap();
    assert_eq!(
        out.outputs["parsed"].get_path(&["a", "1"]),
        Some(&Value::from(2))
    );

    let err = JsonParseAction
        .call(
            &node("transform.json_parse"),
            ctx("transform.json_parse", &[("json", Value::from("{nope"))]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::ExecutionFailed(ref m) if m.starts_with("JSON parse error")));

    let err = JsonParseAction
        .call(&node("transform.json_parse"), ctx("transform.json_parse", &[("json", Value::from(3))]))
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::InvalidInputType { ref field, .. } if field == "json"));
}

#[tokio::test]
async fn test_json_stringify() {
    let out = JsonStringifyAction
        .call(
            &node("transform.json_stringify"),
            ctx(
                "transform.json_stringify",
                &[
                    ("value", Value::object([("k", Value::from(1))])),
                    ("pretty", Value::Bool(false)),
                ],
            ),
        )
        .await
        .unwrap();
    assert_eq!(out.outputs["json"], Value::from(r#"{"k":1}"#));

    let err = JsonStringifyAction
        .call(&node("transform.json_stringify"), ctx("transform.json_stringify", &[]))
        .await
        .unwrap_err();
    assert_eq!(err, NodeError::MissingInput("value".into()));
}

#[tokio::test]
async fn test_delay_passes_value_through() {
    let out = DelayAction
        .call(
            &node("time.delay"),
            ctx("time.delay", &[("delay_ms", Value::from(5)), ("value", Value::from("x"))]),
        )
        .await
        .unwrap();
    assert_eq!(out.outputs["value"], Value::from("x"));
    assert_eq!(out.outputs["delayed_ms"], Value::from(5));

    let bad = DelayAction.validate_params(&params(&[("delay_ms", Value::from("soon"))]));
    assert!(matches!(bad, Err(NodeError::InvalidInputType { .. })));
}

#[tokio::test]
async fn test_delay_observes_cancellation() {
    let context = ctx("time.delay", &[("delay_ms", Value::from(10_000))]);
    let token = context.cancellation.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let err = tokio::time::timeout(Duration::from_secs(5), DelayAction.call(&node("time.delay"), context))
        .await
        .expect("delay should stop when cancelled")
        .unwrap_err();
    assert_eq!(err, NodeError::Cancelled);
}

#[tokio::test]
async fn test_http_rejects_bad_input() {
    let http = HttpRequestAction::new();

    let err = http
        .call(&node("http.request"), ctx("http.request", &[]))
        .await
        .unwrap_err();
    assert_eq!(err, NodeError::MissingInput("url".into()));

    let err = http
        .call(
            &node("http.request"),
            ctx(
                "http.request",
                &[("url", Value::from("http://localhost/")), ("method", Value::from("TRACE"))],
            ),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::Configuration(ref m) if m.contains("TRACE")));
}

#[tokio::test]
async fn test_file_load_reads_content() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("goldens.json");
    std::fs::write(&path, r#"[{"q": "why?"}]"#).unwrap();
    let path_str = path.to_string_lossy().into_owned();

    let out = FileLoadAction
        .call(&node("file.load"), ctx("file.load", &[("path", Value::from(path_str.as_str()))]))
        .await
        .unwrap();

    assert_eq!(out.outputs["file_name"], Value::from("goldens.json"));
    assert_eq!(out.outputs["size_bytes"], Value::from(15));
    assert_eq!(out.metadata["lossy_utf8"], Value::Bool(false));
    assert_eq!(
        out.outputs["json"].get_path(&["0", "q"]),
        Some(&Value::from("why?"))
    );

    let missing = dir.path().join("absent.csv").to_string_lossy().into_owned();
    let err = FileLoadAction
        .call(&node("file.load"), ctx("file.load", &[("path", Value::from(missing.as_str()))]))
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::ExecutionFailed(_)));
}

#[tokio::test]
async fn test_standard_actions_in_a_flow() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("questions.txt");
    std::fs::write(&path, "what is rust").unwrap();

    let flow = FlowRequest::new(
        vec![
            FlowNode::new("start", NodeType::Start),
            FlowNode::new("upload", NodeType::FileUpload)
                .with_data("actionId", "file.load")
                .with_data("path", "${file}"),
            FlowNode::action("log", "debug.log").with_data("message", "loaded ${upload.file_name}"),
            FlowNode::action("wrap", "transform.json_stringify")
                .with_data("value", "${upload.content}")
                .with_data("pretty", false),
        ],
        vec![
            FlowEdge::new("start", "upload"),
            FlowEdge::new("upload", "log"),
            FlowEdge::new("upload", "wrap"),
        ],
    )
    .with_param("file", path.to_string_lossy().into_owned());

    let result = standard_runtime().execute_flow(flow).await.unwrap();

    assert_eq!(result.status, FlowStatus::Completed);
    assert_eq!(
        result.output_of("log").unwrap()["message"],
        Value::from("loaded questions.txt")
    );
    assert_eq!(
        result.output_of("wrap").unwrap()["json"],
        Value::from("\"what is rust\"")
    );
    // handler metadata rides on the node result, not in its outputs
    assert_eq!(result.results["upload"].metadata["lossy_utf8"], Value::Bool(false));
    assert!(!result.output_of("upload").unwrap().contains_key("lossy_utf8"));
}
