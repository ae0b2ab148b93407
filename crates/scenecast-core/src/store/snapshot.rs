//! Whole-state snapshots for bootstrapping and resyncing replicas.
//!
//! Snapshots carry [`SharedState`] only. Window-local state and engine layer
//! handles stay behind.

use super::{SharedState, Store, StoreError, StoreEvent, StorePhase};
use crate::port::PortError;

/// An item loaded from a snapshot that has no engine layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerFailure {
    pub scene_id: String,
    pub item_id: String,
    pub error: PortError,
}

impl Store {
    /// Serialize the replicated state.
    pub fn snapshot(&self) -> Result<serde_json::Value, StoreError> {
        Ok(serde_json::to_value(&self.state)?)
    }

    /// Replace the replicated state with a snapshot and go live.
    ///
    /// The snapshot is validated before anything is replaced. When an engine
    /// is attached, layers of the old state are released and the new items
    /// get fresh ones. Items the engine refuses are still loaded; they are
    /// listed by [`Store::layer_failures`] and announced with
    /// [`StoreEvent::LayersMissing`].
    pub fn load_snapshot(&mut self, snapshot: serde_json::Value) -> Result<(), StoreError> {
        let mut state: SharedState = serde_json::from_value(snapshot)?;
        state.validate()?;

        let port = self.port.as_mut();
        for scene in &mut self.state.scenes {
            if let Err(err) = scene.detach_layers(port) {
                log::warn!("Failed to release layers of scene {}: {}", scene.id(), err);
            }
        }
        let mut failures = Vec::new();
        for scene in &mut state.scenes {
            for (item_id, error) in scene.attach_layers(port) {
                log::warn!("No layer for item {} in scene {}: {}", item_id, scene.id(), error);
                failures.push(LayerFailure { scene_id: scene.id().to_string(), item_id, error });
            }
        }

        log::info!(
            "Loaded snapshot with {} scenes and {} sources",
            state.scenes.len(),
            state.sources.len()
        );
        self.state = state;
        self.layer_failures = failures;
        self.set_phase(StorePhase::Live);
        self.emit(StoreEvent::SnapshotLoaded);
        if !self.layer_failures.is_empty() {
            self.emit(StoreEvent::LayersMissing(self.layer_failures.len()));
        }
        Ok(())
    }

    /// Items of the last loaded snapshot the engine could not create layers
    /// for.
    pub fn layer_failures(&self) -> &[LayerFailure] {
        &self.layer_failures
    }

    /// Whether some items of the last loaded snapshot have no layer.
    pub fn is_degraded(&self) -> bool {
        !self.layer_failures.is_empty()
    }

    /// Serialize the replicated state to a JSON string.
    pub fn to_json(&self) -> Result<String, StoreError> {
        self.state.to_json()
    }

    /// Load replicated state from a JSON string.
    pub fn load_json(&mut self, json: &str) -> Result<(), StoreError> {
        self.load_snapshot(serde_json::from_str(json)?)
    }
}
