//! Replicated state and window-local state.

use super::StoreError;
use crate::geometry::Size;
use crate::scene::Scene;
use crate::sources::Source;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Engine performance counters. Informational only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub cpu_percent: f64,
    pub fps: f64,
    pub dropped_frames: u64,
    pub bandwidth_kbps: f64,
}

/// Per-window presentation options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowOptions {
    /// Name of the component the window displays.
    pub component: String,
    pub title: String,
    pub always_on_top: bool,
}

/// State that belongs to one window and is never replicated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowLocalState {
    pub options: WindowOptions,
}

/// State that every window holds a replica of.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedState {
    #[serde(default)]
    pub(super) scenes: Vec<Scene>,
    #[serde(default)]
    pub(super) active_scene_id: Option<String>,
    #[serde(default)]
    pub(super) sources: Vec<Source>,
    pub(super) canvas: Size,
    #[serde(default)]
    pub(super) performance: PerformanceStats,
}

impl SharedState {
    /// Empty state for a canvas size.
    pub fn new(canvas: Size) -> Self {
        Self {
            scenes: Vec::new(),
            active_scene_id: None,
            sources: Vec::new(),
            canvas,
            performance: PerformanceStats::default(),
        }
    }

    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    pub fn scene(&self, id: &str) -> Option<&Scene> {
        self.scenes.iter().find(|scene| scene.id() == id)
    }

    pub fn active_scene_id(&self) -> Option<&str> {
        self.active_scene_id.as_deref()
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn source(&self, id: &str) -> Option<&Source> {
        self.sources.iter().find(|source| source.id() == id)
    }

    pub fn canvas(&self) -> Size {
        self.canvas
    }

    pub fn performance(&self) -> &PerformanceStats {
        &self.performance
    }

    /// Serialize the whole replica to a JSON string.
    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse and validate a replica from JSON.
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let state: SharedState = serde_json::from_str(json)?;
        state.validate()?;
        Ok(state)
    }

    /// Check cross-references: unique ids, a valid active scene, a scene
    /// source for every scene, sources for every item, and each scene's
    /// own graph invariants.
    pub fn validate(&self) -> Result<(), StoreError> {
        let invalid = |message: String| Err(StoreError::InvalidSnapshot(message));

        let mut scene_ids = HashSet::new();
        for scene in &self.scenes {
            if !scene_ids.insert(scene.id()) {
                return invalid(format!("duplicate scene {}", scene.id()));
            }
            scene.validate()?;
        }

        let mut source_ids = HashSet::new();
        for source in &self.sources {
            if !source_ids.insert(source.id()) {
                return invalid(format!("duplicate source {}", source.id()));
            }
        }

        match &self.active_scene_id {
            None if !self.scenes.is_empty() => return invalid("no active scene".to_string()),
            Some(id) if !scene_ids.contains(id.as_str()) => {
                return invalid(format!("active scene {id} does not exist"));
            }
            _ => {}
        }

        for scene in &self.scenes {
            if !self.source(scene.id()).is_some_and(Source::is_scene) {
                return invalid(format!("scene {} has no scene source", scene.id()));
            }
            if let Some(item) = scene.items().find(|item| !source_ids.contains(item.source_id())) {
                return invalid(format!("item {} references missing source {}", item.id(), item.source_id()));
            }
        }

        Ok(())
    }

    pub(super) fn scene_mut(&mut self, id: &str) -> Result<&mut Scene, StoreError> {
        self.scenes
            .iter_mut()
            .find(|scene| scene.id() == id)
            .ok_or_else(|| StoreError::SceneNotFound(id.to_string()))
    }

    pub(super) fn source_mut(&mut self, id: &str) -> Result<&mut Source, StoreError> {
        self.sources
            .iter_mut()
            .find(|source| source.id() == id)
            .ok_or_else(|| StoreError::SourceNotFound(id.to_string()))
    }

    /// Whether `outer` shows `inner`, directly or through nested scenes.
    pub(super) fn scene_contains_scene(&self, outer: &str, inner: &str) -> bool {
        let mut pending = vec![outer];
        let mut visited = HashSet::new();
        while let Some(scene_id) = pending.pop() {
            if scene_id == inner {
                return true;
            }
            if !visited.insert(scene_id) {
                continue;
            }
            if let Some(scene) = self.scene(scene_id) {
                pending.extend(
                    scene
                        .items()
                        .map(|item| item.source_id())
                        .filter(|source_id| self.scene(source_id).is_some()),
                );
            }
        }
        false
    }
}
