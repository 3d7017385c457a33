use evalcore::{handler_fn, NodeError, NodeOutput, NodeType, RegistryError};
use evalruntime::{ActionDefinition, ActionParam, ActionParamType, ActionRegistry};
use std::sync::Arc;

fn noop() -> Arc<dyn evalcore::ActionHandler> {
    handler_fn(|_node, _ctx| async { Ok::<_, NodeError>(NodeOutput::new()) })
}

fn registry() -> ActionRegistry {
    let mut builder = ActionRegistry::builder();
    builder
        .register(
            ActionDefinition::new("generate_goldens", "Generate goldens", NodeType::Action)
                .with_param(ActionParam::new("dataset_id", "Dataset", ActionParamType::String))
                .with_param(
                    ActionParam::new("model", "Model", ActionParamType::Select)
                        .with_options(["small", "large"])
                        .optional(Some("small".into())),
                ),
            noop(),
        )
        .unwrap()
        .register(
            ActionDefinition::new("upload_dataset", "Upload dataset", NodeType::FileUpload),
            noop(),
        )
        .unwrap()
        .register(
            ActionDefinition::new("score_answers", "Score answers", NodeType::Action),
            noop(),
        )
        .unwrap();
    builder.build()
}

#[test]
fn test_duplicate_registration_rejected() {
    let mut builder = ActionRegistry::builder();
    builder
        .register(ActionDefinition::new("x", "X", NodeType::Action), noop())
        .unwrap();

    let err = builder
        .register(ActionDefinition::new("x", "Other X", NodeType::Action), noop())
        .err()
        .unwrap();
    assert_eq!(err, RegistryError::DuplicateAction("x".into()));
    assert!(builder.contains("x"));
    assert_eq!(builder.build().len(), 1);
}

#[test]
fn test_actions_for_node_type_keeps_registration_order() {
    let registry = registry();

    let ids: Vec<&str> = registry
        .actions_for_node_type(NodeType::Action)
        .iter()
        .map(|d| d.id.as_str())
        .collect();
    assert_eq!(ids, vec!["generate_goldens", "score_answers"]);

    let uploads = registry.actions_for_node_type(NodeType::FileUpload);
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].id, "upload_dataset");

    assert!(registry.actions_for_node_type(NodeType::Merge).is_empty());
}

#[test]
fn test_handler_lookup() {
    let registry = registry();

    assert!(registry.handler_for("score_answers").is_ok());
    assert!(matches!(
        registry.handler_for("nope"),
        Err(RegistryError::ActionNotFound(id)) if id == "nope"
    ));
    assert_eq!(
        NodeError::from(RegistryError::ActionNotFound("nope".into())),
        NodeError::ActionNotFound("nope".into())
    );
}

#[test]
fn test_definition_schema_is_preserved() {
    let registry = registry();
    let def = registry.definition("generate_goldens").unwrap();

    assert_eq!(def.params.len(), 2);
    assert!(def.params[0].required);
    assert!(!def.params[1].required);
    assert_eq!(
        def.params[1].options.as_deref(),
        Some(&["small".to_string(), "large".to_string()][..])
    );

    let json = serde_json::to_value(def).unwrap();
    assert_eq!(json["params"][1]["type"], "select");
    assert_eq!(json["node_type"], "ACTION");
    assert_eq!(registry.list_actions().len(), 3);
}

#[test]
fn test_empty_registry() {
    let registry = ActionRegistry::default();
    assert!(registry.is_empty());
    assert!(registry.list_actions().is_empty());
}
