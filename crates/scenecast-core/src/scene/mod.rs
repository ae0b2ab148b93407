//! Scene graph: an ordered tree of items and folders kept as a flat list.
//!
//! Nesting is encoded by `parent_id` alone and depth-first order by position
//! in the list. A folder's subtree always sits in a contiguous block right
//! after the folder, so moving a node moves its whole block.

mod folder;
mod item;
mod node;

pub use folder::SceneItemFolder;
pub use item::{SceneItem, Transform, TransformPatch};
pub use node::{Node, NodeKind};

use crate::geometry::{GeometryError, Rect};
use crate::port::{PortError, SourceControlPort};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Scene graph errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SceneError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),
    #[error("Node {0} is not a folder")]
    NotAFolder(String),
    #[error("Node {0} is not an item")]
    NotAnItem(String),
    #[error("Cannot move {node_id} under {parent_id}: {parent_id} is {node_id} or nested inside it")]
    GraphCycle { node_id: String, parent_id: String },
    #[error("Scene {0} would end up containing itself")]
    RecursiveScene(String),
    #[error("Source {0} is not a scene")]
    NotASceneSource(String),
    #[error("Scene invariant violated: {0}")]
    InvariantViolated(String),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Port(#[from] PortError),
}

impl SceneError {
    /// Whether the error comes from an id that no longer resolves.
    pub fn is_stale_reference(&self) -> bool {
        matches!(self, SceneError::NodeNotFound(_))
    }
}

/// Nested presentation of a scene, for tree views.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HierarchyNode {
    pub id: String,
    pub kind: NodeKind,
    pub children: Vec<HierarchyNode>,
}

/// A scene: a named, ordered collection of nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    id: String,
    name: String,
    #[serde(default)]
    nodes: Vec<Node>,
}

impl Scene {
    /// Create an empty scene.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into(), nodes: Vec::new() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// All nodes in depth-first order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node_index(id).is_some()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id() == id)
    }

    pub fn item(&self, id: &str) -> Option<&SceneItem> {
        self.node(id).and_then(Node::as_item)
    }

    pub fn folder(&self, id: &str) -> Option<&SceneItemFolder> {
        self.node(id).and_then(Node::as_folder)
    }

    /// Items in depth-first order.
    pub fn items(&self) -> impl Iterator<Item = &SceneItem> {
        self.nodes.iter().filter_map(Node::as_item)
    }

    pub fn folders(&self) -> impl Iterator<Item = &SceneItemFolder> {
        self.nodes.iter().filter_map(Node::as_folder)
    }

    /// Position of a node in the flat sequence.
    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|node| node.id() == id)
    }

    fn require_node(&self, id: &str) -> Result<&Node, SceneError> {
        self.node(id).ok_or_else(|| SceneError::NodeNotFound(id.to_string()))
    }

    pub fn item_mut(&mut self, id: &str) -> Result<&mut SceneItem, SceneError> {
        let node = self
            .nodes
            .iter_mut()
            .find(|node| node.id() == id)
            .ok_or_else(|| SceneError::NodeNotFound(id.to_string()))?;
        node.as_item_mut().ok_or_else(|| SceneError::NotAnItem(id.to_string()))
    }

    pub fn folder_mut(&mut self, id: &str) -> Result<&mut SceneItemFolder, SceneError> {
        let node = self
            .nodes
            .iter_mut()
            .find(|node| node.id() == id)
            .ok_or_else(|| SceneError::NodeNotFound(id.to_string()))?;
        node.as_folder_mut().ok_or_else(|| SceneError::NotAFolder(id.to_string()))
    }

    pub(crate) fn items_mut(&mut self) -> impl Iterator<Item = &mut SceneItem> {
        self.nodes.iter_mut().filter_map(Node::as_item_mut)
    }

    // --- Structure queries ---

    /// Direct children of a folder, in order. Derived from `parent_id`.
    pub fn children_ids(&self, folder_id: &str) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|node| node.parent_id() == Some(folder_id))
            .map(|node| node.id().to_string())
            .collect()
    }

    /// Every node below `id`, depth first.
    pub fn nested_node_ids(&self, id: &str) -> Vec<String> {
        let mut nested = Vec::new();
        let mut seen = HashSet::from([id.to_string()]);
        self.collect_nested(id, &mut nested, &mut seen);
        nested
    }

    fn collect_nested(&self, id: &str, nested: &mut Vec<String>, seen: &mut HashSet<String>) {
        for child in self.nodes.iter().filter(|node| node.parent_id() == Some(id)) {
            if seen.insert(child.id().to_string()) {
                nested.push(child.id().to_string());
                self.collect_nested(child.id(), nested, seen);
            }
        }
    }

    /// Every item below a folder, depth first.
    pub fn nested_items(&self, folder_id: &str) -> Vec<&SceneItem> {
        self.nested_node_ids(folder_id)
            .iter()
            .filter_map(|id| self.item(id))
            .collect()
    }

    /// Slot of a node among the items.
    ///
    /// Only items take slots. A folder shares the slot of the node right
    /// before it, or 0 when it comes first.
    pub fn item_index(&self, id: &str) -> Option<usize> {
        let index = self.node_index(id)?;
        match &self.nodes[index] {
            Node::Item(_) => Some(self.nodes[..index].iter().filter(|node| node.is_item()).count()),
            Node::Folder(_) if index == 0 => Some(0),
            Node::Folder(_) => self.item_index(self.nodes[index - 1].id()),
        }
    }

    /// Closest item before `id`, skipping folders.
    pub fn prev_item(&self, id: &str) -> Option<&SceneItem> {
        let index = self.node_index(id)?;
        self.nodes[..index].iter().rev().find_map(Node::as_item)
    }

    /// Closest item after `id`, skipping folders.
    pub fn next_item(&self, id: &str) -> Option<&SceneItem> {
        let index = self.node_index(id)?;
        self.nodes[index + 1..].iter().find_map(Node::as_item)
    }

    /// Ancestor folder ids of a node, root first.
    pub fn path(&self, id: &str) -> Vec<String> {
        let mut path = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self.node(id).and_then(Node::parent_id);
        while let Some(parent_id) = current {
            if !seen.insert(parent_id) {
                break;
            }
            path.push(parent_id.to_string());
            current = self.node(parent_id).and_then(Node::parent_id);
        }
        path.reverse();
        path
    }

    /// The scene as a nested tree.
    pub fn hierarchy(&self) -> Vec<HierarchyNode> {
        self.hierarchy_under(None)
    }

    fn hierarchy_under(&self, parent_id: Option<&str>) -> Vec<HierarchyNode> {
        self.nodes
            .iter()
            .filter(|node| node.parent_id() == parent_id)
            .map(|node| HierarchyNode {
                id: node.id().to_string(),
                kind: node.kind(),
                children: if node.is_folder() {
                    self.hierarchy_under(Some(node.id()))
                } else {
                    Vec::new()
                },
            })
            .collect()
    }

    /// Union of the visual bounds of all items.
    pub fn items_bounding_rect(&self) -> Option<Rect> {
        self.items()
            .map(SceneItem::bounding_rect)
            .reduce(|acc, rect| acc.union(rect))
    }

    /// Index just past the block formed by `id` and its descendants.
    fn block_end(&self, id: &str) -> Option<usize> {
        let start = self.node_index(id)?;
        let nested: HashSet<String> = self.nested_node_ids(id).into_iter().collect();
        let len = self.nodes[start + 1..]
            .iter()
            .take_while(|node| nested.contains(node.id()))
            .count();
        Some(start + 1 + len)
    }

    /// Remove `id` and its descendants, keeping their relative order.
    fn take_block(&mut self, id: &str) -> Vec<Node> {
        let mut members: HashSet<String> = self.nested_node_ids(id).into_iter().collect();
        members.insert(id.to_string());
        let (block, rest): (Vec<Node>, Vec<Node>) = std::mem::take(&mut self.nodes)
            .into_iter()
            .partition(|node| members.contains(node.id()));
        self.nodes = rest;
        block
    }

    fn reparent_in_block(block: &mut [Node], id: &str, parent_id: Option<&str>) {
        if let Some(node) = block.iter_mut().find(|node| node.id() == id) {
            node.set_parent_id(parent_id.map(str::to_string));
        }
    }

    // --- Structure edits ---

    fn check_insertable(&self, id: &str, parent_id: Option<&str>) -> Result<(), SceneError> {
        if self.contains(id) {
            return Err(SceneError::DuplicateNode(id.to_string()));
        }
        if let Some(parent_id) = parent_id {
            if !self.require_node(parent_id)?.is_folder() {
                return Err(SceneError::NotAFolder(parent_id.to_string()));
            }
        }
        Ok(())
    }

    /// Put a new node at the end of its parent's block, or at the end of the
    /// scene for root nodes.
    fn insert_in_parent(&mut self, node: Node) {
        let index = node
            .parent_id()
            .and_then(|parent_id| self.block_end(parent_id))
            .unwrap_or(self.nodes.len());
        self.nodes.insert(index, node);
    }

    /// Add an item, creating its engine layer first.
    pub fn add_item(
        &mut self,
        mut item: SceneItem,
        port: &mut dyn SourceControlPort,
    ) -> Result<(), SceneError> {
        self.check_insertable(item.id(), item.parent_id())?;
        item.attach_layer(port)?;
        self.insert_in_parent(Node::Item(item));
        Ok(())
    }

    pub fn add_folder(&mut self, folder: SceneItemFolder) -> Result<(), SceneError> {
        self.check_insertable(folder.id(), folder.parent_id())?;
        self.insert_in_parent(Node::Folder(folder));
        Ok(())
    }

    /// Remove a node.
    ///
    /// Items release their engine layer first. A folder's children are moved
    /// up to the folder's parent rather than removed with it.
    pub fn remove_node(
        &mut self,
        id: &str,
        port: &mut dyn SourceControlPort,
    ) -> Result<Node, SceneError> {
        let index = self
            .node_index(id)
            .ok_or_else(|| SceneError::NodeNotFound(id.to_string()))?;
        if self.nodes[index].is_folder() {
            let (folder, _) = self.dissolve_folder(index);
            return Ok(folder);
        }
        if let Some(item) = self.nodes[index].as_item_mut() {
            item.detach_layer(port)?;
        }
        Ok(self.nodes.remove(index))
    }

    /// Move a node (with its subtree) into a folder, or to the root.
    ///
    /// The node lands after the folder, behind the children it already has,
    /// so it becomes the last child and nodes moved in one after another keep
    /// that order. Moving a node to the root places it right after the
    /// top-level block it used to be part of.
    pub fn set_parent(&mut self, node_id: &str, parent_id: Option<&str>) -> Result<(), SceneError> {
        self.require_node(node_id)?;
        let old_root = self.path(node_id).into_iter().next();
        if let Some(parent_id) = parent_id {
            self.check_move_target(node_id, parent_id)?;
            if !self.require_node(parent_id)?.is_folder() {
                return Err(SceneError::NotAFolder(parent_id.to_string()));
            }
        }

        let start = self.node_index(node_id).unwrap_or(self.nodes.len());
        let mut block = self.take_block(node_id);
        Self::reparent_in_block(&mut block, node_id, parent_id);
        let index = match (parent_id, old_root.as_deref()) {
            (Some(anchor), _) | (None, Some(anchor)) => {
                self.block_end(anchor).unwrap_or(self.nodes.len())
            }
            (None, None) => start.min(self.nodes.len()),
        };
        self.nodes.splice(index..index, block);
        Ok(())
    }

    /// Refuse moves that would place a node relative to itself or inside
    /// its own subtree.
    fn check_move_target(&self, node_id: &str, target_id: &str) -> Result<(), SceneError> {
        if target_id == node_id || self.nested_node_ids(node_id).iter().any(|id| id == target_id) {
            log::warn!("Refusing to move {} relative to {}: would create a cycle", node_id, target_id);
            return Err(SceneError::GraphCycle {
                node_id: node_id.to_string(),
                parent_id: target_id.to_string(),
            });
        }
        self.require_node(target_id)?;
        Ok(())
    }

    /// Move a node's block right after `target`'s block, as `target`'s
    /// sibling. `None` moves it to the top of the scene.
    pub fn place_after(&mut self, node_id: &str, target: Option<&str>) -> Result<(), SceneError> {
        self.require_node(node_id)?;
        let Some(target) = target else {
            let mut block = self.take_block(node_id);
            Self::reparent_in_block(&mut block, node_id, None);
            self.nodes.splice(0..0, block);
            return Ok(());
        };
        self.check_move_target(node_id, target)?;

        let parent_id = self.require_node(target)?.parent_id().map(str::to_string);
        let mut block = self.take_block(node_id);
        Self::reparent_in_block(&mut block, node_id, parent_id.as_deref());
        let index = self.block_end(target).unwrap_or(self.nodes.len());
        self.nodes.splice(index..index, block);
        Ok(())
    }

    /// Move a node's block right before `target`, as `target`'s sibling.
    pub fn place_before(&mut self, node_id: &str, target: &str) -> Result<(), SceneError> {
        self.require_node(node_id)?;
        self.check_move_target(node_id, target)?;

        let parent_id = self.require_node(target)?.parent_id().map(str::to_string);
        let mut block = self.take_block(node_id);
        Self::reparent_in_block(&mut block, node_id, parent_id.as_deref());
        let index = self.node_index(target).unwrap_or(self.nodes.len());
        self.nodes.splice(index..index, block);
        Ok(())
    }

    /// Dissolve a folder, handing its children to the folder's parent.
    ///
    /// Returns the former children in order.
    pub fn ungroup(&mut self, folder_id: &str) -> Result<Vec<String>, SceneError> {
        let index = self
            .node_index(folder_id)
            .ok_or_else(|| SceneError::NodeNotFound(folder_id.to_string()))?;
        if !self.nodes[index].is_folder() {
            return Err(SceneError::NotAFolder(folder_id.to_string()));
        }
        let (_, children) = self.dissolve_folder(index);
        Ok(children)
    }

    /// Children stay where they are in the sequence, so the enclosing
    /// block stays contiguous.
    fn dissolve_folder(&mut self, index: usize) -> (Node, Vec<String>) {
        let folder = self.nodes.remove(index);
        let parent_id = folder.parent_id().map(str::to_string);
        let mut children = Vec::new();
        for node in self.nodes.iter_mut().filter(|node| node.parent_id() == Some(folder.id())) {
            node.set_parent_id(parent_id.clone());
            children.push(node.id().to_string());
        }
        (folder, children)
    }

    /// Create engine layers for every item that lacks one. Items the
    /// engine refuses are skipped and returned with the reason.
    pub(crate) fn attach_layers(&mut self, port: &mut dyn SourceControlPort) -> Vec<(String, PortError)> {
        let mut refused = Vec::new();
        for item in self.items_mut() {
            if let Err(err) = item.attach_layer(port) {
                refused.push((item.id().to_string(), err));
            }
        }
        refused
    }

    /// Release every item's engine layer.
    pub(crate) fn detach_layers(&mut self, port: &mut dyn SourceControlPort) -> Result<(), PortError> {
        self.items_mut().try_for_each(|item| item.detach_layer(port))
    }

    // --- Invariants ---

    /// Check every structural invariant: unique ids, parents that exist and
    /// are folders, no cycles, contiguous folder blocks.
    pub fn validate(&self) -> Result<(), SceneError> {
        let violated = |message: String| Err(SceneError::InvariantViolated(message));

        let mut ids = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id()) {
                return violated(format!("duplicate node id {}", node.id()));
            }
        }

        for node in &self.nodes {
            if let Some(parent_id) = node.parent_id() {
                match self.node(parent_id) {
                    None => return violated(format!("{} points at missing parent {}", node.id(), parent_id)),
                    Some(parent) if !parent.is_folder() => {
                        return violated(format!("{} points at non-folder parent {}", node.id(), parent_id));
                    }
                    Some(_) => {}
                }
            }
        }

        for node in &self.nodes {
            let mut current = node.parent_id();
            let mut depth = 0;
            while let Some(parent_id) = current {
                if parent_id == node.id() || depth > self.nodes.len() {
                    return violated(format!("{} is its own ancestor", node.id()));
                }
                depth += 1;
                current = self.node(parent_id).and_then(Node::parent_id);
            }
        }

        for (index, node) in self.nodes.iter().enumerate() {
            if !node.is_folder() {
                continue;
            }
            let nested: HashSet<String> = self.nested_node_ids(node.id()).into_iter().collect();
            let following = &self.nodes[index + 1..];
            let contiguous = following.len() >= nested.len()
                && following[..nested.len()].iter().all(|child| nested.contains(child.id()));
            if !contiguous {
                return violated(format!("subtree of folder {} is not contiguous", node.id()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Crop, Size, Vec2};
    use crate::port::{MemoryPort, PortCall};
    use proptest::prelude::*;

    fn item(id: &str) -> SceneItem {
        SceneItem::new(id, "cam1", Size::new(100.0, 100.0))
    }

    fn ids(scene: &Scene) -> Vec<&str> {
        scene.nodes().iter().map(Node::id).collect()
    }

    /// Scene laid out as `[a, f1, b (in f1), c (in f1), d]`.
    fn sample_scene(port: &mut MemoryPort) -> Scene {
        let mut scene = Scene::new("s1", "Main");
        scene.add_item(item("a"), port).unwrap();
        scene.add_folder(SceneItemFolder::new("f1", "Group")).unwrap();
        scene.add_item(item("b").with_parent("f1"), port).unwrap();
        scene.add_item(item("c").with_parent("f1"), port).unwrap();
        scene.add_item(item("d"), port).unwrap();
        scene
    }

    #[test]
    fn test_add_into_folder_keeps_block() {
        let mut port = MemoryPort::new();
        let scene = sample_scene(&mut port);
        assert_eq!(ids(&scene), vec!["a", "f1", "b", "c", "d"]);
        assert_eq!(scene.children_ids("f1"), vec!["b", "c"]);
        assert!(scene.validate().is_ok());
    }

    #[test]
    fn test_add_rejects_duplicates_and_bad_parents() {
        let mut port = MemoryPort::new();
        let mut scene = sample_scene(&mut port);
        assert_eq!(
            scene.add_item(item("a"), &mut port),
            Err(SceneError::DuplicateNode("a".to_string()))
        );
        assert_eq!(
            scene.add_item(item("e").with_parent("a"), &mut port),
            Err(SceneError::NotAFolder("a".to_string()))
        );
        assert_eq!(
            scene.add_folder(SceneItemFolder::new("f2", "x").with_parent("nope")),
            Err(SceneError::NodeNotFound("nope".to_string()))
        );
    }

    #[test]
    fn test_folder_children_follow_set_parent() {
        let mut port = MemoryPort::new();
        let mut scene = Scene::new("s1", "Main");
        scene.add_item(item("i1"), &mut port).unwrap();
        scene.add_item(item("i2"), &mut port).unwrap();
        scene.add_folder(SceneItemFolder::new("f1", "Group")).unwrap();

        scene.set_parent("i1", Some("f1")).unwrap();
        scene.set_parent("i2", Some("f1")).unwrap();
        assert_eq!(scene.children_ids("f1"), vec!["i1", "i2"]);
        assert_eq!(ids(&scene), vec!["f1", "i1", "i2"]);
        assert!(scene.validate().is_ok());

        let before = scene.clone();
        assert_eq!(
            scene.set_parent("f1", Some("i1")),
            Err(SceneError::GraphCycle { node_id: "f1".to_string(), parent_id: "i1".to_string() })
        );
        assert!(matches!(scene.set_parent("f1", Some("f1")), Err(SceneError::GraphCycle { .. })));
        assert_eq!(scene, before);
    }

    #[test]
    fn test_set_parent_rejects_nested_folder() {
        let mut port = MemoryPort::new();
        let mut scene = sample_scene(&mut port);
        scene.add_folder(SceneItemFolder::new("f2", "Inner").with_parent("f1")).unwrap();

        assert!(matches!(scene.set_parent("f1", Some("f2")), Err(SceneError::GraphCycle { .. })));
        assert_eq!(
            scene.set_parent("a", Some("d")),
            Err(SceneError::NotAFolder("d".to_string()))
        );
        assert!(scene.validate().is_ok());
    }

    #[test]
    fn test_set_parent_to_root_leaves_folder_block_intact() {
        let mut port = MemoryPort::new();
        let mut scene = sample_scene(&mut port);
        scene.set_parent("b", None).unwrap();
        assert_eq!(ids(&scene), vec!["a", "f1", "c", "b", "d"]);
        assert_eq!(scene.node("b").unwrap().parent_id(), None);
        assert!(scene.validate().is_ok());

        scene.add_folder(SceneItemFolder::new("f2", "Inner").with_parent("f1")).unwrap();
        scene.set_parent("c", Some("f2")).unwrap();
        scene.add_item(item("e").with_parent("f1"), &mut port).unwrap();
        assert_eq!(ids(&scene), vec!["a", "f1", "f2", "c", "e", "b", "d"]);

        scene.set_parent("c", None).unwrap();
        assert_eq!(ids(&scene), vec!["a", "f1", "f2", "e", "c", "b", "d"]);
        assert!(scene.validate().is_ok());
    }

    #[test]
    fn test_moving_folder_moves_subtree() {
        let mut port = MemoryPort::new();
        let mut scene = sample_scene(&mut port);

        scene.place_after("f1", Some("d")).unwrap();
        assert_eq!(ids(&scene), vec!["a", "d", "f1", "b", "c"]);

        scene.place_before("f1", "a").unwrap();
        assert_eq!(ids(&scene), vec!["f1", "b", "c", "a", "d"]);

        scene.place_after("d", None).unwrap();
        assert_eq!(ids(&scene), vec!["d", "f1", "b", "c", "a"]);
        assert!(scene.validate().is_ok());
    }

    #[test]
    fn test_place_next_to_nested_node_adopts_its_parent() {
        let mut port = MemoryPort::new();
        let mut scene = sample_scene(&mut port);

        scene.place_after("a", Some("b")).unwrap();
        assert_eq!(ids(&scene), vec!["f1", "b", "a", "c", "d"]);
        assert_eq!(scene.children_ids("f1"), vec!["b", "a", "c"]);

        assert!(matches!(scene.place_before("f1", "c"), Err(SceneError::GraphCycle { .. })));
        assert!(scene.validate().is_ok());
    }

    #[test]
    fn test_ungroup_preserves_order() {
        let mut port = MemoryPort::new();
        let mut scene = Scene::new("s1", "Main");
        scene.add_folder(SceneItemFolder::new("outer", "Outer")).unwrap();
        scene.add_folder(SceneItemFolder::new("inner", "Inner").with_parent("outer")).unwrap();
        scene.add_item(item("x").with_parent("inner"), &mut port).unwrap();
        scene.add_item(item("y").with_parent("inner"), &mut port).unwrap();

        let children = scene.ungroup("inner").unwrap();
        assert_eq!(children, vec!["x", "y"]);
        assert_eq!(ids(&scene), vec!["outer", "x", "y"]);
        assert_eq!(scene.children_ids("outer"), vec!["x", "y"]);
        assert!(scene.validate().is_ok());

        assert_eq!(scene.ungroup("x"), Err(SceneError::NotAFolder("x".to_string())));
    }

    #[test]
    fn test_remove_folder_detaches_children() {
        let mut port = MemoryPort::new();
        let mut scene = sample_scene(&mut port);
        let removed = scene.remove_node("f1", &mut port).unwrap();
        assert!(removed.is_folder());
        assert_eq!(ids(&scene), vec!["a", "b", "c", "d"]);
        assert!(scene.nodes().iter().all(|node| node.parent_id().is_none()));
    }

    #[test]
    fn test_remove_item_destroys_layer() {
        let mut port = MemoryPort::new();
        let mut scene = sample_scene(&mut port);
        let layer = scene.item("a").unwrap().layer().unwrap();
        port.take_calls();

        scene.remove_node("a", &mut port).unwrap();
        assert_eq!(port.calls(), &[PortCall::DestroyLayer(layer)]);
        assert!(!scene.contains("a"));
        assert_eq!(
            scene.remove_node("a", &mut port).map(|_| ()),
            Err(SceneError::NodeNotFound("a".to_string()))
        );
    }

    #[test]
    fn test_item_index_and_neighbours() {
        let mut port = MemoryPort::new();
        let scene = sample_scene(&mut port);

        assert_eq!(scene.item_index("a"), Some(0));
        assert_eq!(scene.item_index("f1"), Some(0));
        assert_eq!(scene.item_index("b"), Some(1));
        assert_eq!(scene.item_index("d"), Some(3));

        assert!(scene.prev_item("a").is_none());
        assert_eq!(scene.next_item("a").map(SceneItem::id), Some("b"));
        assert_eq!(scene.prev_item("d").map(SceneItem::id), Some("c"));
        assert!(scene.next_item("d").is_none());
    }

    #[test]
    fn test_path_and_hierarchy() {
        let mut port = MemoryPort::new();
        let mut scene = sample_scene(&mut port);
        scene.add_folder(SceneItemFolder::new("f2", "Inner").with_parent("f1")).unwrap();
        scene.set_parent("c", Some("f2")).unwrap();

        assert_eq!(scene.path("c"), vec!["f1", "f2"]);
        assert!(scene.path("a").is_empty());
        assert_eq!(scene.nested_node_ids("f1"), vec!["b", "f2", "c"]);
        assert_eq!(scene.nested_items("f1").len(), 2);

        let tree = scene.hierarchy();
        assert_eq!(tree.len(), 3);
        assert_eq!(tree[1].id, "f1");
        assert_eq!(tree[1].children[1].id, "f2");
        assert_eq!(tree[1].children[1].children[0].id, "c");
    }

    #[test]
    fn test_validate_rejects_broken_state() {
        let json = serde_json::json!({
            "id": "s1",
            "name": "Broken",
            "nodes": [
                { "scene_node_type": "item", "id": "a", "parent_id": "ghost", "source_id": "cam1",
                  "width": 10.0, "height": 10.0 }
            ]
        });
        let scene: Scene = serde_json::from_value(json).unwrap();
        assert!(matches!(scene.validate(), Err(SceneError::InvariantViolated(_))));

        let json = serde_json::json!({
            "id": "s1",
            "name": "Scattered",
            "nodes": [
                { "scene_node_type": "folder", "id": "f1", "name": "Group" },
                { "scene_node_type": "item", "id": "a", "source_id": "cam1", "width": 10.0, "height": 10.0 },
                { "scene_node_type": "item", "id": "b", "parent_id": "f1", "source_id": "cam1",
                  "width": 10.0, "height": 10.0 }
            ]
        });
        let scene: Scene = serde_json::from_value(json).unwrap();
        assert!(matches!(scene.validate(), Err(SceneError::InvariantViolated(_))));
    }

    #[test]
    fn test_content_crop() {
        let mut port = MemoryPort::new();
        let mut nested = Scene::new("nested", "Nested");
        let webcam = SceneItem::new("cam", "cam1", Size::new(400.0, 200.0)).with_transform(Transform {
            position: Vec2::new(100.0, 100.0),
            ..Transform::default()
        });
        nested.add_item(webcam, &mut port).unwrap();

        let mut outer = SceneItem::new("outer", "nested", Size::new(1920.0, 1080.0));
        assert!(outer.set_content_crop(&nested, &mut port).unwrap());
        assert_eq!(outer.transform().crop, Crop::new(100.0, 1420.0, 780.0, 100.0));
        assert_eq!(outer.transform().position, Vec2::new(100.0, 100.0));

        let mut other = SceneItem::new("other", "cam1", Size::new(1920.0, 1080.0));
        assert_eq!(
            other.set_content_crop(&nested, &mut port),
            Err(SceneError::NotASceneSource("cam1".to_string()))
        );
    }

    #[derive(Debug, Clone)]
    enum Op {
        SetParent(usize, Option<usize>),
        PlaceAfter(usize, Option<usize>),
        PlaceBefore(usize, usize),
        Ungroup(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..8usize, proptest::option::of(0..8usize)).prop_map(|(a, b)| Op::SetParent(a, b)),
            (0..8usize, proptest::option::of(0..8usize)).prop_map(|(a, b)| Op::PlaceAfter(a, b)),
            (0..8usize, 0..8usize).prop_map(|(a, b)| Op::PlaceBefore(a, b)),
            (0..8usize).prop_map(Op::Ungroup),
        ]
    }

    proptest! {
        #[test]
        fn prop_structure_edits_keep_invariants(ops in proptest::collection::vec(op_strategy(), 1..40)) {
            let mut port = MemoryPort::new();
            let mut scene = Scene::new("s1", "Main");
            for index in 0..8 {
                let id = format!("n{index}");
                if index % 2 == 0 {
                    scene.add_folder(SceneItemFolder::new(id, "Folder")).unwrap();
                } else {
                    scene.add_item(item(&id), &mut port).unwrap();
                }
            }
            let id = |index: usize| format!("n{index}");

            for op in ops {
                let before = scene.clone();
                let result = match op {
                    Op::SetParent(a, b) => scene.set_parent(&id(a), b.map(id).as_deref()),
                    Op::PlaceAfter(a, b) => scene.place_after(&id(a), b.map(id).as_deref()),
                    Op::PlaceBefore(a, b) => scene.place_before(&id(a), &id(b)),
                    Op::Ungroup(a) => scene.ungroup(&id(a)).map(|_| ()),
                };
                if result.is_err() {
                    prop_assert_eq!(&scene, &before);
                }
                prop_assert!(scene.validate().is_ok(), "{:?}", scene.validate());
                for folder in scene.folders() {
                    for child in scene.children_ids(folder.id()) {
                        prop_assert_eq!(scene.node(&child).and_then(Node::parent_id), Some(folder.id()));
                    }
                }
            }
        }
    }
}
