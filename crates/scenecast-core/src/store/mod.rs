//! Replicated application store.
//!
//! Every window owns a [`Store`] holding a full replica of the shared state.
//! Local changes go through [`Store::commit`], which applies the mutation and
//! queues it for broadcast. Changes from other windows arrive through
//! [`Store::apply_remote`], which applies them the same way but never queues
//! them again, so a mutation is never echoed back.

mod mutation;
mod snapshot;
mod state;

pub use mutation::Mutation;
pub use snapshot::LayerFailure;
pub use state::{PerformanceStats, SharedState, WindowLocalState, WindowOptions};

use crate::config::StoreConfig;
use crate::geometry::{Axis, Size};
use crate::port::{DetachedPort, LayerHandle, PortError, SourceControlPort};
use crate::scene::{Scene, SceneError, SceneItem, TransformPatch};
use crate::sources::{MergedView, Source, SourceError};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use thiserror::Error;
use uuid::Uuid;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Scene not found: {0}")]
    SceneNotFound(String),
    #[error("Source not found: {0}")]
    SourceNotFound(String),
    #[error("Duplicate scene id: {0}")]
    DuplicateScene(String),
    #[error("Duplicate source id: {0}")]
    DuplicateSource(String),
    #[error("Store is not live (phase {0:?})")]
    NotLive(StorePhase),
    #[error("Invalid mutation: {0}")]
    InvalidMutation(String),
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),
    #[error(transparent)]
    Scene(#[from] SceneError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Port(#[from] PortError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the error comes from an id this replica does not know.
    ///
    /// Usually means the replica fell behind; a fresh snapshot fixes it.
    pub fn is_stale_reference(&self) -> bool {
        match self {
            StoreError::SceneNotFound(_) | StoreError::SourceNotFound(_) => true,
            StoreError::Scene(err) => err.is_stale_reference(),
            _ => false,
        }
    }
}

/// Which kind of window a replica lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowRole {
    /// Owns the engine and answers snapshot requests.
    Main,
    /// Gets its initial state from the main window.
    Child,
}

/// Lifecycle of a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorePhase {
    Uninitialized,
    /// Waiting for a snapshot; remote mutations are refused.
    Syncing,
    Live,
}

/// Where a mutation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOrigin {
    Local,
    Remote,
}

/// An applied mutation, as kept in the store's log.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord {
    pub seq: u64,
    pub origin: MutationOrigin,
    pub mutation: Mutation,
}

/// Notifications delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    StateChanged { kind: &'static str, origin: MutationOrigin },
    PhaseChanged(StorePhase),
    SnapshotLoaded,
    /// The last snapshot left this many items without an engine layer.
    LayersMissing(usize),
}

/// Handle returned by [`Store::subscribe`].
pub type SubscriptionId = u64;

type Subscriber = Box<dyn FnMut(&StoreEvent)>;

/// One window's replica of the application state.
pub struct Store {
    role: WindowRole,
    phase: StorePhase,
    config: StoreConfig,
    state: SharedState,
    local: WindowLocalState,
    log: VecDeque<MutationRecord>,
    next_seq: u64,
    /// Local mutations waiting to be broadcast.
    outbox: Vec<Mutation>,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: SubscriptionId,
    port: Box<dyn SourceControlPort>,
    layer_failures: Vec<LayerFailure>,
}

impl Store {
    /// Store for the main window. Starts live with empty state.
    pub fn main(port: Box<dyn SourceControlPort>, config: StoreConfig) -> Self {
        Self::with_role(WindowRole::Main, StorePhase::Live, port, config)
    }

    /// Store for a child window. Unusable until a snapshot is loaded.
    pub fn child(config: StoreConfig) -> Self {
        Self::with_role(WindowRole::Child, StorePhase::Uninitialized, Box::new(DetachedPort), config)
    }

    fn with_role(
        role: WindowRole,
        phase: StorePhase,
        port: Box<dyn SourceControlPort>,
        config: StoreConfig,
    ) -> Self {
        Self {
            role,
            phase,
            state: SharedState::new(config.canvas),
            config,
            local: WindowLocalState::default(),
            log: VecDeque::new(),
            next_seq: 0,
            outbox: Vec::new(),
            subscribers: Vec::new(),
            next_subscription: 0,
            port,
            layer_failures: Vec::new(),
        }
    }

    // --- Queries ---

    pub fn role(&self) -> WindowRole {
        self.role
    }

    pub fn phase(&self) -> StorePhase {
        self.phase
    }

    pub fn is_live(&self) -> bool {
        self.phase == StorePhase::Live
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn scenes(&self) -> &[Scene] {
        self.state.scenes()
    }

    pub fn scene(&self, id: &str) -> Option<&Scene> {
        self.state.scene(id)
    }

    pub fn active_scene_id(&self) -> Option<&str> {
        self.state.active_scene_id()
    }

    pub fn active_scene(&self) -> Option<&Scene> {
        self.active_scene_id().and_then(|id| self.scene(id))
    }

    pub fn sources(&self) -> &[Source] {
        self.state.sources()
    }

    pub fn source(&self, id: &str) -> Option<&Source> {
        self.state.source(id)
    }

    pub fn canvas(&self) -> Size {
        self.state.canvas()
    }

    pub fn performance(&self) -> &PerformanceStats {
        self.state.performance()
    }

    pub fn window_options(&self) -> &WindowOptions {
        &self.local.options
    }

    /// Recently applied mutations, oldest first.
    pub fn log(&self) -> impl Iterator<Item = &MutationRecord> {
        self.log.iter()
    }

    pub fn port(&self) -> &dyn SourceControlPort {
        self.port.as_ref()
    }

    /// A fresh id for scenes, nodes and sources created in the main window.
    /// Child windows allocate ids through the hub instead.
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// An item joined with its source's static fields.
    pub fn merged_view(&self, scene_id: &str, item_id: &str) -> Result<MergedView, StoreError> {
        let item = self.require_item(scene_id, item_id)?;
        let source = self
            .source(item.source_id())
            .ok_or_else(|| StoreError::SourceNotFound(item.source_id().to_string()))?;
        Ok(MergedView::new(scene_id, item, source))
    }

    fn require_item(&self, scene_id: &str, item_id: &str) -> Result<&SceneItem, StoreError> {
        let scene = self
            .scene(scene_id)
            .ok_or_else(|| StoreError::SceneNotFound(scene_id.to_string()))?;
        match scene.node(item_id) {
            Some(node) => node
                .as_item()
                .ok_or_else(|| SceneError::NotAnItem(item_id.to_string()).into()),
            None => Err(SceneError::NodeNotFound(item_id.to_string()).into()),
        }
    }

    // --- Lifecycle ---

    /// Enter the syncing phase while a snapshot is requested.
    pub fn begin_sync(&mut self) {
        if self.role == WindowRole::Main {
            log::warn!("Main window store does not sync from a snapshot");
            return;
        }
        self.set_phase(StorePhase::Syncing);
    }

    fn set_phase(&mut self, phase: StorePhase) {
        if self.phase != phase {
            log::debug!("Store phase {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
            self.emit(StoreEvent::PhaseChanged(phase));
        }
    }

    // --- Subscriptions ---

    /// Register a callback for store events.
    pub fn subscribe(&mut self, subscriber: impl FnMut(&StoreEvent) + 'static) -> SubscriptionId {
        self.next_subscription += 1;
        self.subscribers.push((self.next_subscription, Box::new(subscriber)));
        self.next_subscription
    }

    /// Returns false if the id was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(subscription, _)| *subscription != id);
        self.subscribers.len() != before
    }

    fn emit(&mut self, event: StoreEvent) {
        for (_, subscriber) in &mut self.subscribers {
            subscriber(&event);
        }
    }

    // --- Mutations ---

    /// Apply a mutation made in this window and queue it for broadcast.
    ///
    /// Window-local mutations are applied in any phase and never queued.
    pub fn commit(&mut self, mutation: Mutation) -> Result<(), StoreError> {
        if !mutation.is_window_local() && !self.is_live() {
            return Err(StoreError::NotLive(self.phase));
        }
        self.apply_whole(&mutation)?;
        self.record(mutation, MutationOrigin::Local);
        Ok(())
    }

    /// Apply a mutation received from another window. Never queued for
    /// broadcast.
    ///
    /// The touched scene is re-validated afterwards and restored if the
    /// mutation left it inconsistent.
    pub fn apply_remote(&mut self, mutation: Mutation) -> Result<(), StoreError> {
        if mutation.is_window_local() {
            log::debug!("Ignoring window-local {} from another window", mutation.name());
            return Ok(());
        }
        if !self.is_live() {
            return Err(StoreError::NotLive(self.phase));
        }

        let backup = mutation.scene_id().and_then(|id| self.scene(id).cloned());
        self.apply_whole(&mutation)?;
        if let Some(backup) = backup {
            if let Ok(scene) = self.state.scene_mut(backup.id()) {
                if let Err(err) = scene.validate() {
                    log::error!(
                        "Remote {} left scene {} inconsistent, restoring it: {}",
                        mutation.name(),
                        backup.id(),
                        err
                    );
                    *scene = backup;
                    return Err(err.into());
                }
            }
        }

        self.record(mutation, MutationOrigin::Remote);
        Ok(())
    }

    /// Apply a mutation all or nothing. Mutations spanning several scenes
    /// can fail after some of them changed, so the shared state is restored
    /// from a copy in that case.
    fn apply_whole(&mut self, mutation: &Mutation) -> Result<(), StoreError> {
        if !mutation.touches_many_scenes() {
            return self.apply(mutation);
        }
        let backup = self.state.clone();
        let result = self.apply(mutation);
        if let Err(err) = &result {
            log::warn!("{} failed part way, restoring state: {}", mutation.name(), err);
            self.restore_state(backup);
        }
        result
    }

    /// Put `backup` back, recreating engine layers destroyed since it was
    /// taken.
    fn restore_state(&mut self, backup: SharedState) {
        let alive: HashSet<LayerHandle> = self
            .state
            .scenes
            .iter()
            .flat_map(|scene| scene.items())
            .filter_map(|item| item.layer())
            .collect();
        self.state = backup;

        let port = self.port.as_mut();
        for scene in &mut self.state.scenes {
            for item in scene.items_mut() {
                if item.layer().is_some_and(|layer| !alive.contains(&layer)) {
                    item.forget_layer();
                    if let Err(err) = item.attach_layer(port) {
                        log::error!("Could not recreate layer of item {}: {}", item.id(), err);
                    }
                }
            }
        }
    }

    fn record(&mut self, mutation: Mutation, origin: MutationOrigin) {
        let kind = mutation.name();
        if origin == MutationOrigin::Local && !mutation.is_window_local() {
            self.outbox.push(mutation.clone());
        }

        self.next_seq += 1;
        if self.config.max_log_len > 0 {
            self.log.push_back(MutationRecord { seq: self.next_seq, origin, mutation });
            while self.log.len() > self.config.max_log_len {
                self.log.pop_front();
            }
        }

        self.emit(StoreEvent::StateChanged { kind, origin });
    }

    /// Drain the mutations waiting for broadcast, in commit order.
    pub fn take_outbox(&mut self) -> Vec<Mutation> {
        std::mem::take(&mut self.outbox)
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outbox.is_empty()
    }

    // --- Item actions ---
    //
    // Each action computes the resulting transform on a detached copy and
    // commits it as a plain SET_ITEM_TRANSFORM, so every replica ends up
    // with identical numbers.

    fn commit_item_change(
        &mut self,
        scene_id: &str,
        item_id: &str,
        change: impl FnOnce(&mut SceneItem, &mut DetachedPort) -> Result<bool, SceneError>,
    ) -> Result<bool, StoreError> {
        let mut preview = self.require_item(scene_id, item_id)?.without_layer();
        if !change(&mut preview, &mut DetachedPort)? {
            return Ok(false);
        }
        self.commit(Mutation::SetItemTransform {
            scene_id: scene_id.to_string(),
            item_id: item_id.to_string(),
            patch: TransformPatch::from_transform(*preview.transform()),
        })?;
        Ok(true)
    }

    /// Mirror an item in place along `axis`.
    pub fn flip_item(&mut self, scene_id: &str, item_id: &str, axis: Axis) -> Result<bool, StoreError> {
        self.commit_item_change(scene_id, item_id, |item, port| match axis {
            Axis::Horizontal => item.flip_x(port),
            Axis::Vertical => item.flip_y(port),
        })
    }

    /// Rotate an item by a multiple of 90° clockwise.
    pub fn rotate_item(&mut self, scene_id: &str, item_id: &str, degrees: f64) -> Result<bool, StoreError> {
        self.commit_item_change(scene_id, item_id, |item, port| item.rotate(degrees, port))
    }

    pub fn reset_item_transform(&mut self, scene_id: &str, item_id: &str) -> Result<bool, StoreError> {
        self.commit_item_change(scene_id, item_id, |item, port| Ok(item.reset_transform(port)?))
    }

    pub fn stretch_item_to_screen(&mut self, scene_id: &str, item_id: &str) -> Result<bool, StoreError> {
        let canvas = self.canvas();
        self.commit_item_change(scene_id, item_id, |item, port| item.stretch_to_screen(canvas, port))
    }

    pub fn fit_item_to_screen(&mut self, scene_id: &str, item_id: &str) -> Result<bool, StoreError> {
        let canvas = self.canvas();
        self.commit_item_change(scene_id, item_id, |item, port| item.fit_to_screen(canvas, port))
    }

    pub fn center_item_on_screen(
        &mut self,
        scene_id: &str,
        item_id: &str,
        axis: Option<Axis>,
    ) -> Result<bool, StoreError> {
        let canvas = self.canvas();
        self.commit_item_change(scene_id, item_id, |item, port| {
            item.center_on_screen(canvas, axis, port)
        })
    }

    /// Crop a nested-scene item to the content of its scene.
    pub fn set_item_content_crop(&mut self, scene_id: &str, item_id: &str) -> Result<bool, StoreError> {
        let source_id = self.require_item(scene_id, item_id)?.source_id().to_string();
        let nested = self
            .scene(&source_id)
            .cloned()
            .ok_or_else(|| SceneError::NotASceneSource(source_id.clone()))?;
        self.commit_item_change(scene_id, item_id, |item, port| item.set_content_crop(&nested, port))
    }

    /// Pick up a new native size for a source from the engine.
    pub fn refresh_source_size(&mut self, source_id: &str) -> Result<bool, StoreError> {
        let source = self
            .source(source_id)
            .ok_or_else(|| StoreError::SourceNotFound(source_id.to_string()))?;
        let current = source.size();
        let Some(layer) = self
            .scenes()
            .iter()
            .flat_map(Scene::items)
            .find(|item| item.source_id() == source_id)
            .and_then(SceneItem::layer)
        else {
            return Ok(false);
        };

        let size = self.port.layer_native_size(layer)?;
        if size == current {
            return Ok(false);
        }
        self.commit(Mutation::SetSourceSize { id: source_id.to_string(), size })?;
        Ok(true)
    }
}
