use chrono::Utc;
use evalcore::template::{self, Reference, Segment};
use evalcore::{ExecutionContext, Map, NodeError, NodeExecutionResult, SkipReason, Value};

fn output(entries: &[(&str, Value)]) -> Map {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn context_with_a() -> ExecutionContext {
    let mut params = Map::new();
    params.insert("dataset_id".into(), Value::from("ds-1"));
    let mut ctx = ExecutionContext::new(params);
    ctx.record(NodeExecutionResult::success(
        "A",
        output(&[
            ("output", Value::from("X")),
            ("score", Value::from(0.75)),
            (
                "items",
                Value::Array(vec![Value::from("first"), Value::object([("q", Value::from("why?"))])]),
            ),
        ]),
        Utc::now(),
    ));
    ctx
}

#[test]
fn test_whole_marker_preserves_type() {
    let ctx = context_with_a();

    assert_eq!(ctx.resolve_references(&Value::from("${A.output}")), Value::from("X"));
    assert_eq!(ctx.resolve_references(&Value::from("${A.score}")), Value::Number(0.75));
    assert!(matches!(
        ctx.resolve_references(&Value::from("${A.items}")),
        Value::Array(ref items) if items.len() == 2
    ));
}

#[test]
fn test_embedded_markers_render_as_text() {
    let ctx = context_with_a();
    let resolved = ctx.resolve_references(&Value::from("Answer: ${A.output} (${A.score})"));
    assert_eq!(resolved, Value::from("Answer: X (0.75)"));
}

#[test]
fn test_nested_paths_walk_objects_and_arrays() {
    let ctx = context_with_a();
    assert_eq!(ctx.resolve_references(&Value::from("${A.items.1.q}")), Value::from("why?"));
    assert_eq!(ctx.resolve_references(&Value::from("${A.items.0}")), Value::from("first"));
}

#[test]
fn test_recursive_scan_of_maps_and_sequences() {
    let ctx = context_with_a();
    let params = Value::object([
        ("text", Value::from("${A.output}")),
        (
            "nested",
            Value::object([("list", Value::Array(vec![Value::from("${dataset_id}"), Value::from(3i64)]))]),
        ),
    ]);

    let resolved = ctx.resolve_references(&params);
    assert_eq!(resolved.get_path(&["text"]), Some(&Value::from("X")));
    assert_eq!(resolved.get_path(&["nested", "list", "0"]), Some(&Value::from("ds-1")));
    assert_eq!(resolved.get_path(&["nested", "list", "1"]), Some(&Value::Number(3.0)));
}

#[test]
fn test_missing_reference_yields_empty_value() {
    let ctx = context_with_a();
    assert_eq!(ctx.resolve_references(&Value::from("${ghost.output}")), Value::Null);
    assert_eq!(ctx.resolve_references(&Value::from("${A.nope}")), Value::Null);
    assert_eq!(
        ctx.resolve_references(&Value::from("before ${ghost.output} after")),
        Value::from("before  after")
    );
}

#[test]
fn test_resolution_does_not_mutate_results() {
    let ctx = context_with_a();
    let before = ctx.clone();
    let _ = ctx.resolve_references(&Value::from("${A.output} ${A.items}"));
    assert_eq!(ctx, before);
}

#[test]
fn test_escape_and_malformed_markers_are_literal() {
    let ctx = context_with_a();
    assert_eq!(ctx.resolve_references(&Value::from("$${A.output}")), Value::from("${A.output}"));
    assert_eq!(ctx.resolve_references(&Value::from("cost: $5")), Value::from("cost: $5"));
    assert_eq!(ctx.resolve_references(&Value::from("${A.output")), Value::from("${A.output"));
    assert_eq!(ctx.resolve_references(&Value::from("${}")), Value::from("${}"));
}

#[test]
fn test_parse_segments() {
    let segments = template::parse("hi ${node.a.b}!");
    assert_eq!(
        segments,
        vec![
            Segment::Literal("hi ".into()),
            Segment::Reference(Reference {
                root: "node".into(),
                path: vec!["a".into(), "b".into()],
            }),
            Segment::Literal("!".into()),
        ]
    );
}

#[test]
fn test_references_collects_nested_markers() {
    let value = Value::object([
        ("a", Value::from("${x.y}")),
        ("b", Value::Array(vec![Value::from("${z}")])),
    ]);
    let mut roots: Vec<String> = template::references(&value).into_iter().map(|r| r.root).collect();
    roots.sort();
    assert_eq!(roots, vec!["x", "z"]);
}

#[test]
fn test_variables_and_defaults() {
    let mut ctx = ExecutionContext::default();
    ctx.set_variable("threshold", 0.5);
    assert_eq!(ctx.get_variable("threshold", Value::Null), Value::Number(0.5));
    assert_eq!(ctx.get_variable("missing", Value::from("d")), Value::from("d"));
    assert_eq!(ctx.resolve_references(&Value::from("${threshold}")), Value::Number(0.5));
}

#[test]
fn test_only_successful_outputs_are_referenceable() {
    let mut ctx = ExecutionContext::default();
    ctx.record(NodeExecutionResult::error("bad", &NodeError::Cancelled, Utc::now()));
    ctx.record(NodeExecutionResult::skipped("later", &SkipReason::BranchNotTaken));

    assert!(ctx.output("bad").is_none());
    assert!(ctx.output("later").is_none());
    assert_eq!(ctx.history().len(), 2);
}

#[test]
fn test_fork_isolated_from_parent() {
    let ctx = context_with_a();
    let mut fork = ctx.fork_for_iteration();
    fork.set_output("loop", output(&[("item", Value::from(1i64))]));

    assert!(fork.history().is_empty());
    assert!(ctx.output("loop").is_none());
    assert_eq!(fork.resolve_references(&Value::from("${A.output}")), Value::from("X"));
}
