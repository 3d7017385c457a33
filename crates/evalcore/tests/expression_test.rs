use chrono::Utc;
use evalcore::expr::evaluate;
use evalcore::{ExecutionContext, Map, NodeError, NodeExecutionResult, Value};

fn context() -> ExecutionContext {
    let mut params = Map::new();
    params.insert("threshold".into(), Value::from(0.5));
    params.insert("mode".into(), Value::from("strict"));
    let mut ctx = ExecutionContext::new(params);

    let mut output = Map::new();
    output.insert("score".into(), Value::from(0.8));
    output.insert("label".into(), Value::from("pass"));
    output.insert("count".into(), Value::from("3"));
    output.insert("approved".into(), Value::Bool(true));
    ctx.record(NodeExecutionResult::success("eval", output, Utc::now()));
    ctx
}

#[test]
fn test_numeric_comparisons() {
    let ctx = context();
    assert!(evaluate("${eval.score} >= 0.5", &ctx).unwrap());
    assert!(evaluate("${eval.score} > ${threshold}", &ctx).unwrap());
    assert!(!evaluate("${eval.score} < 0.5", &ctx).unwrap());
    assert!(evaluate("eval.score <= 0.8", &ctx).unwrap());
    assert!(evaluate("-1 < 0", &ctx).unwrap());
}

#[test]
fn test_string_and_loose_equality() {
    let ctx = context();
    assert!(evaluate("${eval.label} == 'pass'", &ctx).unwrap());
    assert!(evaluate("mode != \"lenient\"", &ctx).unwrap());
    assert!(evaluate("${eval.count} == 3", &ctx).unwrap());
}

#[test]
fn test_boolean_operators_and_grouping() {
    let ctx = context();
    assert!(evaluate("${eval.approved} && (${eval.score} > 0.9 || mode == 'strict')", &ctx).unwrap());
    assert!(!evaluate("!${eval.approved}", &ctx).unwrap());
    assert!(evaluate("true && !false", &ctx).unwrap());
}

#[test]
fn test_bare_values_use_truthiness() {
    let ctx = context();
    assert!(evaluate("${eval.label}", &ctx).unwrap());
    assert!(!evaluate("${eval.missing}", &ctx).unwrap());
    assert!(!evaluate("null", &ctx).unwrap());
}

#[test]
fn test_missing_reference_compares_as_null() {
    let ctx = context();
    assert!(evaluate("${ghost.value} == null", &ctx).unwrap());
}

#[test]
fn test_malformed_expressions_are_errors() {
    let ctx = context();
    for expr in ["", "1 >", "(true", "'open", "a = b", "true false"] {
        assert!(
            matches!(evaluate(expr, &ctx), Err(NodeError::Expression(_))),
            "expected expression error for {expr:?}"
        );
    }
}

#[test]
fn test_incomparable_types_are_errors() {
    let ctx = context();
    assert!(matches!(
        evaluate("${eval.approved} > 1", &ctx),
        Err(NodeError::Expression(_))
    ));
}

#[test]
fn test_deep_nesting_is_rejected() {
    let ctx = context();
    let negations = format!("{}true", "!".repeat(20_000));
    let parens = format!("{}true{}", "(".repeat(20_000), ")".repeat(20_000));

    for expr in [negations, parens] {
        assert_eq!(
            evaluate(&expr, &ctx),
            Err(NodeError::Expression("expression nested too deeply".into()))
        );
    }

    // shallow nesting still evaluates
    let shallow = format!("{}true{}", "(".repeat(10), ")".repeat(10));
    assert!(evaluate(&format!("!!{shallow}"), &ctx).unwrap());
}
