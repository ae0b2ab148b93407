//! Node selection within one scene.
//!
//! A selection is view state: it is never persisted or replicated, and
//! changing it never touches the scene graph.

use crate::geometry::Rect;
use crate::scene::{Scene, SceneItem};
use std::collections::HashSet;

/// Ordered set of selected node ids in one scene.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    scene_id: String,
    ids: Vec<String>,
}

impl Selection {
    /// Create an empty selection for a scene.
    pub fn new(scene_id: impl Into<String>) -> Self {
        Self { scene_id: scene_id.into(), ids: Vec::new() }
    }

    pub fn scene_id(&self) -> &str {
        &self.scene_id
    }

    /// Replace the selection.
    pub fn select<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids.clear();
        self.add(ids);
    }

    /// Add ids, ignoring ones already selected.
    pub fn add<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for id in ids {
            let id = id.into();
            if !self.is_selected(&id) {
                self.ids.push(id);
            }
        }
    }

    pub fn deselect(&mut self, id: &str) {
        self.ids.retain(|selected| selected != id);
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.ids.iter().any(|selected| selected == id)
    }

    /// Select every node of the scene.
    pub fn select_all(&mut self, scene: &Scene) {
        self.select(scene.nodes().iter().map(|node| node.id().to_string()));
    }

    pub fn reset(&mut self) {
        self.ids.clear();
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Drop ids that no longer exist in `scene`.
    pub fn retain_existing(&mut self, scene: &Scene) {
        self.ids.retain(|id| scene.contains(id));
    }

    /// Selected items, including items nested in selected folders.
    /// Each item appears once, in scene order.
    pub fn items<'a>(&self, scene: &'a Scene) -> Vec<&'a SceneItem> {
        let mut wanted: HashSet<String> = HashSet::new();
        for id in &self.ids {
            wanted.insert(id.clone());
            if scene.folder(id).is_some() {
                wanted.extend(scene.nested_node_ids(id));
            }
        }
        scene.items().filter(|item| wanted.contains(item.id())).collect()
    }

    /// Union of the visual bounds of the selected items.
    pub fn bounding_rect(&self, scene: &Scene) -> Option<Rect> {
        self.items(scene)
            .into_iter()
            .map(SceneItem::bounding_rect)
            .reduce(|acc, rect| acc.union(rect))
    }
}
