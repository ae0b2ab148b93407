//! Folder nodes.

use serde::{Deserialize, Serialize};

/// A named group of nodes. Folders have no transform of their own; their
/// children are the nodes whose `parent_id` points here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneItemFolder {
    id: String,
    #[serde(default)]
    parent_id: Option<String>,
    name: String,
}

impl SceneItemFolder {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), parent_id: None, name: name.into() }
    }

    /// Builder: place the folder inside another folder.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub(crate) fn set_parent_id(&mut self, parent_id: Option<String>) {
        self.parent_id = parent_id;
    }
}
