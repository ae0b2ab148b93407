//! Source control port: the boundary to the native media engine.
//!
//! The engine owns the actual renderable layers. Scene items only keep an
//! opaque [`LayerHandle`] and push transform changes through this trait.

use crate::geometry::{Crop, Size, Vec2};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use thiserror::Error;

/// Opaque handle to a layer owned by the native engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerHandle(pub u64);

/// Errors reported by the native engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PortError {
    #[error("Layer creation failed for source {source_id}: {reason}")]
    LayerCreationFailed { source_id: String, reason: String },
    #[error("Unknown layer: {0:?}")]
    UnknownLayer(LayerHandle),
    #[error("Engine error: {0}")]
    Engine(String),
}

/// Result type for port calls.
pub type PortResult<T> = Result<T, PortError>;

/// Capabilities of the native engine consumed by the scene graph.
pub trait SourceControlPort {
    /// Whether a native engine backs this port. Detached ports never get
    /// layer requests.
    fn is_attached(&self) -> bool {
        true
    }

    /// Create a renderable layer for a source.
    fn create_layer(&mut self, source_id: &str) -> PortResult<LayerHandle>;

    /// Destroy a layer.
    fn destroy_layer(&mut self, handle: LayerHandle) -> PortResult<()>;

    fn set_layer_position(&mut self, handle: LayerHandle, position: Vec2) -> PortResult<()>;

    fn set_layer_scale(&mut self, handle: LayerHandle, scale: Vec2) -> PortResult<()>;

    fn set_layer_crop(&mut self, handle: LayerHandle, crop: Crop) -> PortResult<()>;

    fn set_layer_rotation(&mut self, handle: LayerHandle, degrees: f64) -> PortResult<()>;

    fn set_layer_visible(&mut self, handle: LayerHandle, visible: bool) -> PortResult<()>;

    /// Current native size of the layer's source.
    fn layer_native_size(&self, handle: LayerHandle) -> PortResult<Size>;
}

/// A port shared with other owners on the same thread, e.g. a UI that
/// inspects the engine while a store drives it.
impl<P: SourceControlPort> SourceControlPort for Rc<RefCell<P>> {
    fn is_attached(&self) -> bool {
        self.borrow().is_attached()
    }

    fn create_layer(&mut self, source_id: &str) -> PortResult<LayerHandle> {
        self.borrow_mut().create_layer(source_id)
    }

    fn destroy_layer(&mut self, handle: LayerHandle) -> PortResult<()> {
        self.borrow_mut().destroy_layer(handle)
    }

    fn set_layer_position(&mut self, handle: LayerHandle, position: Vec2) -> PortResult<()> {
        self.borrow_mut().set_layer_position(handle, position)
    }

    fn set_layer_scale(&mut self, handle: LayerHandle, scale: Vec2) -> PortResult<()> {
        self.borrow_mut().set_layer_scale(handle, scale)
    }

    fn set_layer_crop(&mut self, handle: LayerHandle, crop: Crop) -> PortResult<()> {
        self.borrow_mut().set_layer_crop(handle, crop)
    }

    fn set_layer_rotation(&mut self, handle: LayerHandle, degrees: f64) -> PortResult<()> {
        self.borrow_mut().set_layer_rotation(handle, degrees)
    }

    fn set_layer_visible(&mut self, handle: LayerHandle, visible: bool) -> PortResult<()> {
        self.borrow_mut().set_layer_visible(handle, visible)
    }

    fn layer_native_size(&self, handle: LayerHandle) -> PortResult<Size> {
        self.borrow().layer_native_size(handle)
    }
}

/// Port for replicas without a native engine (child windows).
///
/// Layers are never created, so scene items in such a replica carry no
/// handle and transform updates stay local.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedPort;

impl SourceControlPort for DetachedPort {
    fn is_attached(&self) -> bool {
        false
    }

    fn create_layer(&mut self, source_id: &str) -> PortResult<LayerHandle> {
        Err(PortError::LayerCreationFailed {
            source_id: source_id.to_string(),
            reason: "no native engine attached".to_string(),
        })
    }

    fn destroy_layer(&mut self, handle: LayerHandle) -> PortResult<()> {
        Err(PortError::UnknownLayer(handle))
    }

    fn set_layer_position(&mut self, handle: LayerHandle, _position: Vec2) -> PortResult<()> {
        Err(PortError::UnknownLayer(handle))
    }

    fn set_layer_scale(&mut self, handle: LayerHandle, _scale: Vec2) -> PortResult<()> {
        Err(PortError::UnknownLayer(handle))
    }

    fn set_layer_crop(&mut self, handle: LayerHandle, _crop: Crop) -> PortResult<()> {
        Err(PortError::UnknownLayer(handle))
    }

    fn set_layer_rotation(&mut self, handle: LayerHandle, _degrees: f64) -> PortResult<()> {
        Err(PortError::UnknownLayer(handle))
    }

    fn set_layer_visible(&mut self, handle: LayerHandle, _visible: bool) -> PortResult<()> {
        Err(PortError::UnknownLayer(handle))
    }

    fn layer_native_size(&self, handle: LayerHandle) -> PortResult<Size> {
        Err(PortError::UnknownLayer(handle))
    }
}

/// A call recorded by [`MemoryPort`].
#[derive(Debug, Clone, PartialEq)]
pub enum PortCall {
    CreateLayer { source_id: String, handle: LayerHandle },
    DestroyLayer(LayerHandle),
    SetPosition(LayerHandle, Vec2),
    SetScale(LayerHandle, Vec2),
    SetCrop(LayerHandle, Crop),
    SetRotation(LayerHandle, f64),
    SetVisible(LayerHandle, bool),
}

/// State of one layer in a [`MemoryPort`].
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryLayer {
    pub source_id: String,
    pub position: Vec2,
    pub scale: Vec2,
    pub crop: Crop,
    pub rotation: f64,
    pub visible: bool,
    pub native_size: Size,
}

/// In-memory engine for tests and headless use.
///
/// Records every call and can be told to fail specific operations.
#[derive(Debug, Default)]
pub struct MemoryPort {
    layers: HashMap<LayerHandle, MemoryLayer>,
    next_handle: u64,
    calls: Vec<PortCall>,
    native_sizes: HashMap<String, Size>,
    fail_create: bool,
    fail_crop: bool,
    /// Successful destroys left before they start failing.
    destroys_left: Option<usize>,
}

impl MemoryPort {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Native size reported for layers created from `source_id`.
    pub fn set_native_size(&mut self, source_id: &str, size: Size) {
        self.native_sizes.insert(source_id.to_string(), size);
        for layer in self.layers.values_mut().filter(|l| l.source_id == source_id) {
            layer.native_size = size;
        }
    }

    /// Make subsequent `create_layer` calls fail.
    pub fn fail_layer_creation(&mut self, fail: bool) {
        self.fail_create = fail;
    }

    /// Let `successes` more `destroy_layer` calls through, then fail every
    /// one after. `None` stops failing.
    pub fn fail_layer_destruction_after(&mut self, successes: Option<usize>) {
        self.destroys_left = successes;
    }

    /// Make subsequent `set_layer_crop` calls fail.
    pub fn fail_crop_updates(&mut self, fail: bool) {
        self.fail_crop = fail;
    }

    pub fn layer(&self, handle: LayerHandle) -> Option<&MemoryLayer> {
        self.layers.get(&handle)
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// All calls made so far, oldest first.
    pub fn calls(&self) -> &[PortCall] {
        &self.calls
    }

    /// Drain the call log.
    pub fn take_calls(&mut self) -> Vec<PortCall> {
        std::mem::take(&mut self.calls)
    }

    fn layer_mut(&mut self, handle: LayerHandle) -> PortResult<&mut MemoryLayer> {
        self.layers.get_mut(&handle).ok_or(PortError::UnknownLayer(handle))
    }
}

impl SourceControlPort for MemoryPort {
    fn create_layer(&mut self, source_id: &str) -> PortResult<LayerHandle> {
        if self.fail_create {
            return Err(PortError::LayerCreationFailed {
                source_id: source_id.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.next_handle += 1;
        let handle = LayerHandle(self.next_handle);
        let native_size = self.native_sizes.get(source_id).copied().unwrap_or(Size::ZERO);
        self.layers.insert(
            handle,
            MemoryLayer {
                source_id: source_id.to_string(),
                position: Vec2::ZERO,
                scale: Vec2::new(1.0, 1.0),
                crop: Crop::ZERO,
                rotation: 0.0,
                visible: true,
                native_size,
            },
        );
        self.calls.push(PortCall::CreateLayer { source_id: source_id.to_string(), handle });
        Ok(handle)
    }

    fn destroy_layer(&mut self, handle: LayerHandle) -> PortResult<()> {
        match self.destroys_left.as_mut() {
            Some(0) => return Err(PortError::Engine("injected destroy failure".to_string())),
            Some(left) => *left -= 1,
            None => {}
        }
        self.layers.remove(&handle).ok_or(PortError::UnknownLayer(handle))?;
        self.calls.push(PortCall::DestroyLayer(handle));
        Ok(())
    }

    fn set_layer_position(&mut self, handle: LayerHandle, position: Vec2) -> PortResult<()> {
        self.layer_mut(handle)?.position = position;
        self.calls.push(PortCall::SetPosition(handle, position));
        Ok(())
    }

    fn set_layer_scale(&mut self, handle: LayerHandle, scale: Vec2) -> PortResult<()> {
        self.layer_mut(handle)?.scale = scale;
        self.calls.push(PortCall::SetScale(handle, scale));
        Ok(())
    }

    fn set_layer_crop(&mut self, handle: LayerHandle, crop: Crop) -> PortResult<()> {
        if self.fail_crop {
            return Err(PortError::Engine("injected crop failure".to_string()));
        }
        self.layer_mut(handle)?.crop = crop;
        self.calls.push(PortCall::SetCrop(handle, crop));
        Ok(())
    }

    fn set_layer_rotation(&mut self, handle: LayerHandle, degrees: f64) -> PortResult<()> {
        self.layer_mut(handle)?.rotation = degrees;
        self.calls.push(PortCall::SetRotation(handle, degrees));
        Ok(())
    }

    fn set_layer_visible(&mut self, handle: LayerHandle, visible: bool) -> PortResult<()> {
        self.layer_mut(handle)?.visible = visible;
        self.calls.push(PortCall::SetVisible(handle, visible));
        Ok(())
    }

    fn layer_native_size(&self, handle: LayerHandle) -> PortResult<Size> {
        self.layers
            .get(&handle)
            .map(|layer| layer.native_size)
            .ok_or(PortError::UnknownLayer(handle))
    }
}
