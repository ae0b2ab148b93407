//! Scene nodes: the tagged union of items and folders.

use super::{SceneItem, SceneItemFolder};
use serde::{Deserialize, Serialize};

/// Discriminant of a [`Node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Item,
    Folder,
}

/// An entry in a scene's flat node sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scene_node_type", rename_all = "snake_case")]
pub enum Node {
    Item(SceneItem),
    Folder(SceneItemFolder),
}

impl Node {
    pub fn id(&self) -> &str {
        match self {
            Node::Item(item) => item.id(),
            Node::Folder(folder) => folder.id(),
        }
    }

    pub fn parent_id(&self) -> Option<&str> {
        match self {
            Node::Item(item) => item.parent_id(),
            Node::Folder(folder) => folder.parent_id(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Item(_) => NodeKind::Item,
            Node::Folder(_) => NodeKind::Folder,
        }
    }

    pub fn is_item(&self) -> bool {
        matches!(self, Node::Item(_))
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Node::Folder(_))
    }

    pub fn as_item(&self) -> Option<&SceneItem> {
        match self {
            Node::Item(item) => Some(item),
            Node::Folder(_) => None,
        }
    }

    pub fn as_folder(&self) -> Option<&SceneItemFolder> {
        match self {
            Node::Folder(folder) => Some(folder),
            Node::Item(_) => None,
        }
    }

    pub(crate) fn as_item_mut(&mut self) -> Option<&mut SceneItem> {
        match self {
            Node::Item(item) => Some(item),
            Node::Folder(_) => None,
        }
    }

    pub(crate) fn as_folder_mut(&mut self) -> Option<&mut SceneItemFolder> {
        match self {
            Node::Folder(folder) => Some(folder),
            Node::Item(_) => None,
        }
    }

    pub(crate) fn set_parent_id(&mut self, parent_id: Option<String>) {
        match self {
            Node::Item(item) => item.set_parent_id(parent_id),
            Node::Folder(folder) => folder.set_parent_id(parent_id),
        }
    }
}

impl From<SceneItem> for Node {
    fn from(item: SceneItem) -> Self {
        Node::Item(item)
    }
}

impl From<SceneItemFolder> for Node {
    fn from(folder: SceneItemFolder) -> Self {
        Node::Folder(folder)
    }
}
