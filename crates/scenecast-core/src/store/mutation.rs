//! Mutations: the only way replicated state changes.
//!
//! Every mutation is plain data, so the same value can be applied in the
//! window that committed it and in every other replica.

use super::{PerformanceStats, Store, StoreError, WindowOptions};
use crate::geometry::Size;
use crate::scene::{Scene, SceneError, SceneItem, SceneItemFolder, TransformPatch};
use crate::sources::{Source, SourceProperty};
use serde::{Deserialize, Serialize};

/// A state change, serialized as `{ "type": "ADD_SCENE", "payload": { … } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mutation {
    AddScene {
        id: String,
        name: String,
    },
    RemoveScene {
        id: String,
    },
    RenameScene {
        id: String,
        name: String,
    },
    MakeSceneActive {
        id: String,
    },
    AddSource {
        source: Source,
    },
    RemoveSource {
        id: String,
    },
    SetSourceSize {
        id: String,
        size: Size,
    },
    SetSourceProperties {
        id: String,
        properties: Vec<SourceProperty>,
    },
    AddSourceToScene {
        scene_id: String,
        item_id: String,
        source_id: String,
        #[serde(default)]
        parent_id: Option<String>,
    },
    CreateFolder {
        scene_id: String,
        folder_id: String,
        name: String,
        #[serde(default)]
        parent_id: Option<String>,
    },
    RenameFolder {
        scene_id: String,
        folder_id: String,
        name: String,
    },
    RemoveNode {
        scene_id: String,
        node_id: String,
    },
    SetNodeParent {
        scene_id: String,
        node_id: String,
        #[serde(default)]
        parent_id: Option<String>,
    },
    PlaceNodeAfter {
        scene_id: String,
        node_id: String,
        #[serde(default)]
        target_id: Option<String>,
    },
    PlaceNodeBefore {
        scene_id: String,
        node_id: String,
        target_id: String,
    },
    Ungroup {
        scene_id: String,
        folder_id: String,
    },
    SetItemTransform {
        scene_id: String,
        item_id: String,
        patch: TransformPatch,
    },
    SetItemVisibility {
        scene_id: String,
        item_id: String,
        visible: bool,
    },
    SetItemLocked {
        scene_id: String,
        item_id: String,
        locked: bool,
    },
    SetCanvasSize {
        size: Size,
    },
    SetPerformanceStats {
        stats: PerformanceStats,
    },
    /// Window-local: applied in the committing window only.
    SetWindowOptions {
        options: WindowOptions,
    },
}

impl Mutation {
    /// Wire name of the mutation.
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::AddScene { .. } => "ADD_SCENE",
            Mutation::RemoveScene { .. } => "REMOVE_SCENE",
            Mutation::RenameScene { .. } => "RENAME_SCENE",
            Mutation::MakeSceneActive { .. } => "MAKE_SCENE_ACTIVE",
            Mutation::AddSource { .. } => "ADD_SOURCE",
            Mutation::RemoveSource { .. } => "REMOVE_SOURCE",
            Mutation::SetSourceSize { .. } => "SET_SOURCE_SIZE",
            Mutation::SetSourceProperties { .. } => "SET_SOURCE_PROPERTIES",
            Mutation::AddSourceToScene { .. } => "ADD_SOURCE_TO_SCENE",
            Mutation::CreateFolder { .. } => "CREATE_FOLDER",
            Mutation::RenameFolder { .. } => "RENAME_FOLDER",
            Mutation::RemoveNode { .. } => "REMOVE_NODE",
            Mutation::SetNodeParent { .. } => "SET_NODE_PARENT",
            Mutation::PlaceNodeAfter { .. } => "PLACE_NODE_AFTER",
            Mutation::PlaceNodeBefore { .. } => "PLACE_NODE_BEFORE",
            Mutation::Ungroup { .. } => "UNGROUP",
            Mutation::SetItemTransform { .. } => "SET_ITEM_TRANSFORM",
            Mutation::SetItemVisibility { .. } => "SET_ITEM_VISIBILITY",
            Mutation::SetItemLocked { .. } => "SET_ITEM_LOCKED",
            Mutation::SetCanvasSize { .. } => "SET_CANVAS_SIZE",
            Mutation::SetPerformanceStats { .. } => "SET_PERFORMANCE_STATS",
            Mutation::SetWindowOptions { .. } => "SET_WINDOW_OPTIONS",
        }
    }

    /// Window-local mutations are never broadcast.
    pub fn is_window_local(&self) -> bool {
        matches!(self, Mutation::SetWindowOptions { .. })
    }

    /// Whether applying this may remove items from several scenes.
    pub fn touches_many_scenes(&self) -> bool {
        matches!(self, Mutation::RemoveScene { .. } | Mutation::RemoveSource { .. })
    }

    /// The scene whose node graph this mutation edits, if any.
    pub fn scene_id(&self) -> Option<&str> {
        match self {
            Mutation::AddSourceToScene { scene_id, .. }
            | Mutation::CreateFolder { scene_id, .. }
            | Mutation::RenameFolder { scene_id, .. }
            | Mutation::RemoveNode { scene_id, .. }
            | Mutation::SetNodeParent { scene_id, .. }
            | Mutation::PlaceNodeAfter { scene_id, .. }
            | Mutation::PlaceNodeBefore { scene_id, .. }
            | Mutation::Ungroup { scene_id, .. }
            | Mutation::SetItemTransform { scene_id, .. }
            | Mutation::SetItemVisibility { scene_id, .. }
            | Mutation::SetItemLocked { scene_id, .. } => Some(scene_id.as_str()),
            _ => None,
        }
    }
}

impl Store {
    /// Apply a mutation to this replica.
    ///
    /// Engine calls happen before local state changes; on error the state
    /// is left as it was.
    pub(super) fn apply(&mut self, mutation: &Mutation) -> Result<(), StoreError> {
        match mutation {
            Mutation::AddScene { id, name } => {
                if self.state.scene(id).is_some() {
                    return Err(StoreError::DuplicateScene(id.clone()));
                }
                if self.state.source(id).is_some() {
                    return Err(StoreError::DuplicateSource(id.clone()));
                }
                let canvas = self.state.canvas;
                self.state.sources.push(Source::scene(id.clone(), name.clone(), canvas));
                self.state.scenes.push(Scene::new(id.clone(), name.clone()));
                if self.state.active_scene_id.is_none() {
                    self.state.active_scene_id = Some(id.clone());
                }
            }
            Mutation::RemoveScene { id } => {
                if self.state.scene(id).is_none() {
                    return Err(StoreError::SceneNotFound(id.clone()));
                }
                self.remove_items_with_source(id)?;
                let port = self.port.as_mut();
                self.state.scene_mut(id)?.detach_layers(port)?;
                self.state.scenes.retain(|scene| scene.id() != id);
                self.state.sources.retain(|source| source.id() != id);
                if self.state.active_scene_id.as_deref() == Some(id.as_str()) {
                    self.state.active_scene_id =
                        self.state.scenes.first().map(|scene| scene.id().to_string());
                }
            }
            Mutation::RenameScene { id, name } => {
                self.state.scene_mut(id)?.rename(name.clone());
                if let Ok(source) = self.state.source_mut(id) {
                    source.rename(name.clone());
                }
            }
            Mutation::MakeSceneActive { id } => {
                if self.state.scene(id).is_none() {
                    return Err(StoreError::SceneNotFound(id.clone()));
                }
                self.state.active_scene_id = Some(id.clone());
            }
            Mutation::AddSource { source } => {
                if source.is_scene() {
                    return Err(StoreError::InvalidMutation(format!(
                        "scene source {} must be added with ADD_SCENE",
                        source.id()
                    )));
                }
                if self.state.source(source.id()).is_some() {
                    return Err(StoreError::DuplicateSource(source.id().to_string()));
                }
                let mut checked = source.clone();
                checked.set_properties(source.properties().to_vec())?;
                self.state.sources.push(checked);
            }
            Mutation::RemoveSource { id } => {
                let source = self
                    .state
                    .source(id)
                    .ok_or_else(|| StoreError::SourceNotFound(id.clone()))?;
                if source.is_scene() {
                    return Err(StoreError::InvalidMutation(format!(
                        "scene source {id} must be removed with REMOVE_SCENE"
                    )));
                }
                self.remove_items_with_source(id)?;
                self.state.sources.retain(|source| source.id() != id);
            }
            Mutation::SetSourceSize { id, size } => {
                self.state.source_mut(id)?.set_size(*size);
                self.resize_items_with_source(id, *size);
            }
            Mutation::SetSourceProperties { id, properties } => {
                self.state.source_mut(id)?.set_properties(properties.clone())?;
            }
            Mutation::AddSourceToScene { scene_id, item_id, source_id, parent_id } => {
                let source = self
                    .state
                    .source(source_id)
                    .ok_or_else(|| StoreError::SourceNotFound(source_id.clone()))?;
                if self.state.scene(scene_id).is_none() {
                    return Err(StoreError::SceneNotFound(scene_id.clone()));
                }
                if source.is_scene() && self.state.scene_contains_scene(source_id, scene_id) {
                    log::warn!("Refusing to add scene {} to scene {}: recursive nesting", source_id, scene_id);
                    return Err(SceneError::RecursiveScene(scene_id.clone()).into());
                }
                let mut item = SceneItem::new(item_id.clone(), source_id.clone(), source.size());
                if let Some(parent_id) = parent_id {
                    item = item.with_parent(parent_id.clone());
                }
                let port = self.port.as_mut();
                self.state.scene_mut(scene_id)?.add_item(item, port)?;
            }
            Mutation::CreateFolder { scene_id, folder_id, name, parent_id } => {
                let mut folder = SceneItemFolder::new(folder_id.clone(), name.clone());
                if let Some(parent_id) = parent_id {
                    folder = folder.with_parent(parent_id.clone());
                }
                self.state.scene_mut(scene_id)?.add_folder(folder)?;
            }
            Mutation::RenameFolder { scene_id, folder_id, name } => {
                self.state.scene_mut(scene_id)?.folder_mut(folder_id)?.rename(name.clone());
            }
            Mutation::RemoveNode { scene_id, node_id } => {
                let port = self.port.as_mut();
                self.state.scene_mut(scene_id)?.remove_node(node_id, port)?;
            }
            Mutation::SetNodeParent { scene_id, node_id, parent_id } => {
                self.state.scene_mut(scene_id)?.set_parent(node_id, parent_id.as_deref())?;
            }
            Mutation::PlaceNodeAfter { scene_id, node_id, target_id } => {
                self.state.scene_mut(scene_id)?.place_after(node_id, target_id.as_deref())?;
            }
            Mutation::PlaceNodeBefore { scene_id, node_id, target_id } => {
                self.state.scene_mut(scene_id)?.place_before(node_id, target_id)?;
            }
            Mutation::Ungroup { scene_id, folder_id } => {
                self.state.scene_mut(scene_id)?.ungroup(folder_id)?;
            }
            Mutation::SetItemTransform { scene_id, item_id, patch } => {
                let port = self.port.as_mut();
                self.state
                    .scene_mut(scene_id)?
                    .item_mut(item_id)?
                    .set_transform(patch, port)?;
            }
            Mutation::SetItemVisibility { scene_id, item_id, visible } => {
                let port = self.port.as_mut();
                self.state
                    .scene_mut(scene_id)?
                    .item_mut(item_id)?
                    .set_visibility(*visible, port)?;
            }
            Mutation::SetItemLocked { scene_id, item_id, locked } => {
                self.state.scene_mut(scene_id)?.item_mut(item_id)?.set_locked(*locked);
            }
            Mutation::SetCanvasSize { size } => {
                self.state.canvas = *size;
                let scene_ids: Vec<String> =
                    self.state.scenes.iter().map(|scene| scene.id().to_string()).collect();
                for id in &scene_ids {
                    if let Ok(source) = self.state.source_mut(id) {
                        source.set_size(*size);
                    }
                    self.resize_items_with_source(id, *size);
                }
            }
            Mutation::SetPerformanceStats { stats } => {
                self.state.performance = *stats;
            }
            Mutation::SetWindowOptions { options } => {
                self.local.options = options.clone();
            }
        }
        Ok(())
    }

    /// Remove every item showing `source_id`, in every scene.
    fn remove_items_with_source(&mut self, source_id: &str) -> Result<(), StoreError> {
        let port = self.port.as_mut();
        for scene in &mut self.state.scenes {
            let item_ids: Vec<String> = scene
                .items()
                .filter(|item| item.source_id() == source_id)
                .map(|item| item.id().to_string())
                .collect();
            for item_id in item_ids {
                scene.remove_node(&item_id, port)?;
            }
        }
        Ok(())
    }

    fn resize_items_with_source(&mut self, source_id: &str, size: Size) {
        for scene in &mut self.state.scenes {
            for item in scene.items_mut().filter(|item| item.source_id() == source_id) {
                item.set_size(size);
            }
        }
    }
}
