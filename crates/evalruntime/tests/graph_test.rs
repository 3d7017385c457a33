use evalcore::{FlowEdge, FlowError, FlowNode, NodeType, ValidationError, Value};
use evalruntime::graph::{topological_order, validate};

fn start() -> FlowNode {
    FlowNode::new("start", NodeType::Start)
}

fn action(id: &str) -> FlowNode {
    FlowNode::action(id, "debug.echo")
}

fn edge(source: &str, target: &str) -> FlowEdge {
    FlowEdge::new(source, target)
}

fn body(ids: &[&str]) -> Value {
    Value::Array(ids.iter().map(|id| Value::from(*id)).collect())
}

#[test]
fn test_order_respects_every_edge() {
    let nodes = vec![
        start(),
        action("d"),
        action("c"),
        action("b"),
        action("a"),
        FlowNode::new("end", NodeType::End),
    ];
    let edges = vec![
        edge("start", "a"),
        edge("a", "b"),
        edge("a", "c"),
        edge("b", "d"),
        edge("c", "d"),
        edge("d", "end"),
    ];

    let order = topological_order(&nodes, &edges).unwrap();
    assert_eq!(order.len(), nodes.len());
    for e in &edges {
        let s = order.iter().position(|id| *id == e.source).unwrap();
        let t = order.iter().position(|id| *id == e.target).unwrap();
        assert!(s < t, "{} must come before {}", e.source, e.target);
    }
}

#[test]
fn test_ties_break_by_array_position() {
    let nodes = vec![start(), action("z"), action("y"), action("x")];
    let edges = vec![edge("start", "x"), edge("start", "y"), edge("start", "z")];

    let order = topological_order(&nodes, &edges).unwrap();
    assert_eq!(order, vec!["start", "z", "y", "x"]);

    // unconnected nodes keep array order too
    let loose = vec![action("b"), action("a"), action("c")];
    assert_eq!(topological_order(&loose, &[]).unwrap(), vec!["b", "a", "c"]);
}

#[test]
fn test_cycle_names_participants() {
    let nodes = vec![start(), action("a"), action("b")];
    let edges = vec![edge("start", "a"), edge("a", "b"), edge("b", "a")];

    match topological_order(&nodes, &edges) {
        Err(FlowError::CycleDetected { nodes }) => assert_eq!(nodes, vec!["a", "b"]),
        other => panic!("expected cycle, got {other:?}"),
    }
    assert!(matches!(
        validate(&nodes, &edges),
        Err(FlowError::CycleDetected { .. })
    ));
}

#[test]
fn test_self_loop_is_a_cycle() {
    let nodes = vec![start(), action("a")];
    let edges = vec![edge("start", "a"), edge("a", "a")];

    match validate(&nodes, &edges) {
        Err(FlowError::CycleDetected { nodes }) => assert_eq!(nodes, vec!["a"]),
        other => panic!("expected cycle, got {other:?}"),
    }
}

#[test]
fn test_dangling_edge_rejected() {
    let nodes = vec![start(), action("a")];
    let edges = vec![edge("start", "a"), edge("a", "ghost")];

    match validate(&nodes, &edges) {
        Err(FlowError::Validation(ValidationError::DanglingEdge { node_id, edge_id })) => {
            assert_eq!(node_id, "ghost");
            assert_eq!(edge_id, "a->ghost");
        }
        other => panic!("expected dangling edge, got {other:?}"),
    }
}

#[test]
fn test_duplicate_node_rejected() {
    let nodes = vec![start(), action("a"), action("a")];

    assert!(matches!(
        validate(&nodes, &[]),
        Err(FlowError::Validation(ValidationError::DuplicateNode(id))) if id == "a"
    ));
}

#[test]
fn test_start_node_rules() {
    assert!(matches!(
        validate(&[action("a")], &[]),
        Err(FlowError::Validation(ValidationError::MissingStart))
    ));

    let two = vec![start(), FlowNode::new("start2", NodeType::Start)];
    match validate(&two, &[]) {
        Err(FlowError::Validation(ValidationError::MultipleStart(ids))) => {
            assert_eq!(ids, vec!["start", "start2"]);
        }
        other => panic!("expected multiple start, got {other:?}"),
    }

    let empty = validate(&[], &[]).unwrap();
    assert!(empty.is_empty());
}

#[test]
fn test_unreachable_nodes_are_still_ordered() {
    let nodes = vec![start(), action("a"), action("island")];
    let edges = vec![edge("start", "a")];

    let graph = validate(&nodes, &edges).unwrap();
    assert_eq!(graph.order(), ["start", "a", "island"]);
    assert!(graph.has_path("start", "a"));
    assert!(!graph.has_path("start", "island"));
}

#[test]
fn test_adjacency_queries() {
    let nodes = vec![start(), action("a"), action("b"), FlowNode::new("m", NodeType::Merge)];
    let edges = vec![
        edge("start", "b"),
        edge("start", "a"),
        edge("b", "m"),
        edge("a", "m"),
    ];

    let graph = validate(&nodes, &edges).unwrap();
    assert_eq!(graph.successors("start"), vec!["a", "b"]);
    assert_eq!(graph.predecessors("m"), vec!["a", "b"]);
    assert_eq!(graph.incoming("m").len(), 2);
    assert_eq!(graph.outgoing("start").len(), 2);
    assert_eq!(graph.position("m"), Some(3));
}

#[test]
fn test_loop_body_is_registered() {
    let nodes = vec![
        start(),
        FlowNode::new("loop", NodeType::Loop)
            .with_data("items", "${start.items}")
            .with_data("body", body(&["gen", "score"])),
        action("gen"),
        action("score"),
    ];
    let edges = vec![edge("start", "loop"), edge("loop", "gen"), edge("gen", "score")];

    let graph = validate(&nodes, &edges).unwrap();
    assert_eq!(graph.loop_body("loop"), ["gen", "score"]);
    assert_eq!(graph.loop_owner("score"), Some("loop"));
    assert_eq!(graph.loop_owner("loop"), None);
}

#[test]
fn test_invalid_loop_declarations() {
    let looped = |data: &[(&str, Value)]| {
        let mut node = FlowNode::new("loop", NodeType::Loop);
        for (k, v) in data {
            node = node.with_data(*k, v.clone());
        }
        node
    };
    let cases = vec![
        looped(&[("body", body(&["a"]))]),
        looped(&[("items", Value::Array(vec![]))]),
        looped(&[("items", Value::Array(vec![])), ("body", body(&[]))]),
        looped(&[("items", Value::Array(vec![])), ("body", body(&["missing"]))]),
        looped(&[("items", Value::Array(vec![])), ("body", body(&["a", "a"]))]),
        looped(&[("items", Value::Array(vec![])), ("body", body(&["end"]))]),
    ];

    for loop_node in cases {
        let nodes = vec![start(), loop_node, action("a"), FlowNode::new("end", NodeType::End)];
        let edges = vec![edge("start", "loop"), edge("loop", "a")];
        assert!(
            matches!(
                validate(&nodes, &edges),
                Err(FlowError::Validation(ValidationError::InvalidLoop { .. }))
            ),
            "expected invalid loop for {:?}",
            nodes[1].data
        );
    }
}

#[test]
fn test_loop_body_cannot_depend_on_later_nodes() {
    let nodes = vec![
        start(),
        FlowNode::new("loop", NodeType::Loop)
            .with_data("items", Value::Array(vec![]))
            .with_data("body", body(&["a"])),
        action("side"),
        action("a"),
    ];
    let edges = vec![edge("start", "loop"), edge("start", "side"), edge("side", "a")];

    assert!(matches!(
        validate(&nodes, &edges),
        Err(FlowError::Validation(ValidationError::InvalidLoop { node_id, .. })) if node_id == "loop"
    ));
}

#[test]
fn test_loop_body_cannot_lead_back_into_the_loop() {
    let looped = || {
        FlowNode::new("lp", NodeType::Loop)
            .with_data("items", Value::Array(vec![]))
            .with_data("body", body(&["b"]))
    };

    // straight back into the loop
    let nodes = vec![start(), action("b"), looped(), action("after")];
    let edges = vec![edge("start", "b"), edge("b", "lp"), edge("lp", "after")];
    assert!(matches!(
        validate(&nodes, &edges),
        Err(FlowError::Validation(ValidationError::InvalidLoop { node_id, .. })) if node_id == "lp"
    ));

    // through one of the loop's ancestors
    let nodes = vec![start(), action("prep"), looped(), action("b")];
    let edges = vec![edge("start", "prep"), edge("prep", "lp"), edge("b", "prep")];
    assert!(matches!(
        validate(&nodes, &edges),
        Err(FlowError::Validation(ValidationError::InvalidLoop { node_id, .. })) if node_id == "lp"
    ));
}

#[test]
fn test_loop_body_follows_sibling_edges() {
    let nodes = vec![
        start(),
        FlowNode::new("loop", NodeType::Loop)
            .with_data("items", Value::Array(vec![]))
            .with_data("body", body(&["report", "score", "gen"])),
        action("gen"),
        action("score"),
        action("report"),
    ];
    let edges = vec![
        edge("start", "loop"),
        edge("loop", "gen"),
        edge("gen", "score"),
        edge("score", "report"),
    ];

    let graph = validate(&nodes, &edges).unwrap();
    assert_eq!(graph.loop_body("loop"), ["gen", "score", "report"]);
}
