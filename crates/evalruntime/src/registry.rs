use evalcore::{ActionHandler, NodeType, RegistryError, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Kind of input an action parameter expects, as shown in the editor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionParamType {
    String,
    Number,
    Boolean,
    Select,
    File,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionParam {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub param_type: ActionParamType,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

fn default_required() -> bool {
    true
}

impl ActionParam {
    pub fn new(name: impl Into<String>, label: impl Into<String>, param_type: ActionParamType) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            param_type,
            required: true,
            options: None,
            default: None,
        }
    }

    pub fn optional(mut self, default: Option<Value>) -> Self {
        self.required = false;
        self.default = default;
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = Some(options.into_iter().map(Into::into).collect());
        self
    }
}

/// Catalog entry for a registered action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub params: Vec<ActionParam>,
    pub node_type: NodeType,
}

impl ActionDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            params: Vec::new(),
            node_type,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_param(mut self, param: ActionParam) -> Self {
        self.params.push(param);
        self
    }
}

struct Entry {
    definition: ActionDefinition,
    handler: Arc<dyn ActionHandler>,
}

/// Mutable registry used during startup. Freeze it with [`build`](Self::build).
#[derive(Default)]
pub struct ActionRegistryBuilder {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl ActionRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action; ids must be unique
    pub fn register(
        &mut self,
        definition: ActionDefinition,
        handler: Arc<dyn ActionHandler>,
    ) -> Result<&mut Self, RegistryError> {
        if self.index.contains_key(&definition.id) {
            return Err(RegistryError::DuplicateAction(definition.id));
        }
        tracing::debug!(
            action_id = %definition.id,
            node_type = %definition.node_type,
            params = definition.params.len(),
            "Registering action"
        );
        self.index.insert(definition.id.clone(), self.entries.len());
        self.entries.push(Entry { definition, handler });
        Ok(self)
    }

    pub fn contains(&self, action_id: &str) -> bool {
        self.index.contains_key(action_id)
    }

    pub fn build(self) -> ActionRegistry {
        tracing::info!("Action registry frozen with {} actions", self.entries.len());
        ActionRegistry {
            entries: self.entries,
            index: self.index,
        }
    }
}

/// Immutable action catalog shared by every run
pub struct ActionRegistry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl ActionRegistry {
    pub fn builder() -> ActionRegistryBuilder {
        ActionRegistryBuilder::new()
    }

    pub fn empty() -> Self {
        ActionRegistryBuilder::new().build()
    }

    /// Definitions applicable to `node_type`, in registration order
    pub fn actions_for_node_type(&self, node_type: NodeType) -> Vec<&ActionDefinition> {
        let actions: Vec<&ActionDefinition> = self
            .entries
            .iter()
            .map(|e| &e.definition)
            .filter(|d| d.node_type == node_type)
            .collect();
        tracing::debug!("Resolved {} actions for node type {}", actions.len(), node_type);
        actions
    }

    pub fn handler_for(&self, action_id: &str) -> Result<Arc<dyn ActionHandler>, RegistryError> {
        self.index
            .get(action_id)
            .map(|&i| Arc::clone(&self.entries[i].handler))
            .ok_or_else(|| RegistryError::ActionNotFound(action_id.to_string()))
    }

    pub fn definition(&self, action_id: &str) -> Option<&ActionDefinition> {
        self.index.get(action_id).map(|&i| &self.entries[i].definition)
    }

    /// Every definition, in registration order
    pub fn list_actions(&self) -> Vec<&ActionDefinition> {
        self.entries.iter().map(|e| &e.definition).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::empty()
    }
}
