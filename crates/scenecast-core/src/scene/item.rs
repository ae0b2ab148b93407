//! Scene items: a source placed on the canvas.

use super::{Scene, SceneError};
use crate::geometry::{Axis, Crop, Rect, ScalableRectangle, Size, Vec2, normalize_degrees};
use crate::port::{LayerHandle, PortError, PortResult, SourceControlPort};
use serde::{Deserialize, Serialize};

/// Placement of an item on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Canvas position of the item's top-left corner before rotation.
    pub position: Vec2,
    /// Non-uniform scale. Negative components mean the item is flipped.
    pub scale: Vec2,
    /// Clockwise rotation in degrees, kept in `[0, 360)`.
    pub rotation: f64,
    /// Crop in unscaled source pixels.
    pub crop: Crop,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            scale: Vec2::new(1.0, 1.0),
            rotation: 0.0,
            crop: Crop::ZERO,
        }
    }
}

impl Transform {
    /// The transform after applying `patch`.
    pub fn patched(&self, patch: &TransformPatch) -> Transform {
        Transform {
            position: patch.position.unwrap_or(self.position),
            scale: patch.scale.unwrap_or(self.scale),
            rotation: patch.rotation.map(normalize_degrees).unwrap_or(self.rotation),
            crop: patch.crop.unwrap_or(self.crop),
        }
    }
}

/// Partial transform update. Unset fields are left alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Vec2>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<Vec2>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop: Option<Crop>,
}

impl TransformPatch {
    /// A patch that sets every field to `transform`'s values.
    pub fn from_transform(transform: Transform) -> Self {
        Self {
            position: Some(transform.position),
            scale: Some(transform.scale),
            rotation: Some(transform.rotation),
            crop: Some(transform.crop),
        }
    }

    pub fn position(mut self, position: Vec2) -> Self {
        self.position = Some(position);
        self
    }

    pub fn scale(mut self, scale: Vec2) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn rotation(mut self, degrees: f64) -> Self {
        self.rotation = Some(degrees);
        self
    }

    pub fn crop(mut self, crop: Crop) -> Self {
        self.crop = Some(crop);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.position.is_none() && self.scale.is_none() && self.rotation.is_none() && self.crop.is_none()
    }
}

/// Transform fields the engine is told about one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransformField {
    Position,
    Scale,
    Rotation,
    Crop,
}

impl TransformField {
    const ALL: [TransformField; 4] = [
        TransformField::Position,
        TransformField::Scale,
        TransformField::Rotation,
        TransformField::Crop,
    ];

    fn differs(self, a: &Transform, b: &Transform) -> bool {
        match self {
            TransformField::Position => a.position != b.position,
            TransformField::Scale => a.scale != b.scale,
            TransformField::Rotation => a.rotation != b.rotation,
            TransformField::Crop => a.crop != b.crop,
        }
    }

    fn push(
        self,
        port: &mut dyn SourceControlPort,
        layer: LayerHandle,
        transform: &Transform,
    ) -> PortResult<()> {
        match self {
            TransformField::Position => port.set_layer_position(layer, transform.position),
            TransformField::Scale => port.set_layer_scale(layer, transform.scale),
            TransformField::Rotation => port.set_layer_rotation(layer, transform.rotation),
            TransformField::Crop => port.set_layer_crop(layer, transform.crop),
        }
    }
}

fn default_visible() -> bool {
    true
}

/// The full canvas as a rectangle.
fn screen_rect(canvas: Size) -> ScalableRectangle {
    ScalableRectangle::new(0.0, 0.0, canvas.width, canvas.height)
}

/// A source placed in a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneItem {
    id: String,
    #[serde(default)]
    parent_id: Option<String>,
    source_id: String,
    #[serde(default)]
    transform: Transform,
    #[serde(default = "default_visible")]
    visible: bool,
    #[serde(default)]
    locked: bool,
    /// Unscaled source width.
    width: f64,
    /// Unscaled source height.
    height: f64,
    /// Engine layer, only present in the replica that owns the engine.
    #[serde(skip)]
    layer: Option<LayerHandle>,
}

impl SceneItem {
    /// Create a visible, untransformed item for `source_id`.
    pub fn new(id: impl Into<String>, source_id: impl Into<String>, size: Size) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            source_id: source_id.into(),
            transform: Transform::default(),
            visible: true,
            locked: false,
            width: size.width,
            height: size.height,
            layer: None,
        }
    }

    /// Builder: place the item inside a folder.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Builder: start from a given transform.
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Transform {
            rotation: normalize_degrees(transform.rotation),
            ..transform
        };
        self
    }

    // --- Accessors ---

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn locked(&self) -> bool {
        self.locked
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Width after scaling, negative when flipped.
    pub fn scaled_width(&self) -> f64 {
        self.width * self.transform.scale.x
    }

    /// Height after scaling, negative when flipped.
    pub fn scaled_height(&self) -> f64 {
        self.height * self.transform.scale.y
    }

    pub fn layer(&self) -> Option<LayerHandle> {
        self.layer
    }

    /// Geometry view of this item.
    pub fn rectangle(&self) -> ScalableRectangle {
        ScalableRectangle::new(
            self.transform.position.x,
            self.transform.position.y,
            self.width,
            self.height,
        )
        .with_scale(self.transform.scale.x, self.transform.scale.y)
        .with_crop(self.transform.crop)
        .with_rotation(self.transform.rotation)
    }

    /// Visual bounds on the canvas.
    pub fn bounding_rect(&self) -> Rect {
        self.rectangle().bounding_rect()
    }

    pub(crate) fn set_parent_id(&mut self, parent_id: Option<String>) {
        self.parent_id = parent_id;
    }

    /// Copy without the engine layer, for computing changes off to the side.
    pub(crate) fn without_layer(&self) -> SceneItem {
        SceneItem { layer: None, ..self.clone() }
    }

    // --- Engine layer ---

    /// Ask the engine for a layer and push the current state to it.
    ///
    /// Does nothing on a detached port or when a layer already exists.
    pub(crate) fn attach_layer(&mut self, port: &mut dyn SourceControlPort) -> PortResult<()> {
        if self.layer.is_some() || !port.is_attached() {
            return Ok(());
        }
        let layer = port.create_layer(&self.source_id)?;
        let pushed = TransformField::ALL
            .into_iter()
            .try_for_each(|field| field.push(port, layer, &self.transform))
            .and_then(|()| port.set_layer_visible(layer, self.visible));
        if let Err(err) = pushed {
            if let Err(destroy_err) = port.destroy_layer(layer) {
                log::warn!("Failed to destroy half-initialized layer {:?}: {}", layer, destroy_err);
            }
            return Err(err);
        }
        log::debug!("Item {} attached to layer {:?}", self.id, layer);
        self.layer = Some(layer);
        Ok(())
    }

    /// Release the engine layer, if any.
    /// Drop the handle without telling the engine, for a layer that no
    /// longer exists there.
    pub(crate) fn forget_layer(&mut self) {
        self.layer = None;
    }

    pub(crate) fn detach_layer(&mut self, port: &mut dyn SourceControlPort) -> PortResult<()> {
        if let Some(layer) = self.layer {
            port.destroy_layer(layer)?;
            self.layer = None;
        }
        Ok(())
    }

    // --- Transform ---

    /// Apply a partial transform.
    ///
    /// Only fields that actually change are pushed to the engine. If any push
    /// fails, already pushed fields are reverted and the item is left as it
    /// was. Returns whether anything changed.
    pub fn set_transform(
        &mut self,
        patch: &TransformPatch,
        port: &mut dyn SourceControlPort,
    ) -> Result<bool, PortError> {
        let next = self.transform.patched(patch);
        let changed: Vec<TransformField> = TransformField::ALL
            .into_iter()
            .filter(|field| field.differs(&self.transform, &next))
            .collect();
        if changed.is_empty() {
            return Ok(false);
        }

        if let Some(layer) = self.layer {
            for (index, field) in changed.iter().enumerate() {
                if let Err(err) = field.push(port, layer, &next) {
                    for pushed in &changed[..index] {
                        if let Err(revert_err) = pushed.push(port, layer, &self.transform) {
                            log::warn!("Failed to revert {:?} on layer {:?}: {}", pushed, layer, revert_err);
                        }
                    }
                    return Err(err);
                }
            }
        }

        self.transform = next;
        Ok(true)
    }

    /// Take position, scale, crop and rotation from a rectangle.
    pub fn set_rectangle(
        &mut self,
        rect: &ScalableRectangle,
        port: &mut dyn SourceControlPort,
    ) -> Result<bool, PortError> {
        let mut rect = *rect;
        rect.set_origin(Vec2::ZERO);
        let patch = TransformPatch::default()
            .position(Vec2::new(rect.x, rect.y))
            .scale(Vec2::new(rect.scale_x, rect.scale_y))
            .crop(rect.crop)
            .rotation(rect.rotation);
        self.set_transform(&patch, port)
    }

    /// Run a rectangle operation, then move the item back so the top-left
    /// corner of its visual bounds is where it was before.
    fn preserve_position(
        &mut self,
        port: &mut dyn SourceControlPort,
        op: impl FnOnce(&mut ScalableRectangle),
    ) -> Result<bool, SceneError> {
        let mut rect = self.rectangle();
        let anchor = rect.normalized_copy()?;
        op(&mut rect);
        rect.normalized(|normalized| {
            normalized.x = anchor.x;
            normalized.y = anchor.y;
        })?;
        Ok(self.set_rectangle(&rect, port)?)
    }

    /// Mirror horizontally in place.
    pub fn flip_x(&mut self, port: &mut dyn SourceControlPort) -> Result<bool, SceneError> {
        self.preserve_position(port, |rect| rect.flip_x())
    }

    /// Mirror vertically in place.
    pub fn flip_y(&mut self, port: &mut dyn SourceControlPort) -> Result<bool, SceneError> {
        self.preserve_position(port, |rect| rect.flip_y())
    }

    /// Rotate clockwise by `degrees`, keeping the visual top-left corner.
    pub fn rotate(&mut self, degrees: f64, port: &mut dyn SourceControlPort) -> Result<bool, SceneError> {
        self.preserve_position(port, |rect| {
            rect.rotation = normalize_degrees(rect.rotation + degrees);
        })
    }

    /// Back to the origin, unscaled, unrotated and uncropped.
    pub fn reset_transform(&mut self, port: &mut dyn SourceControlPort) -> Result<bool, PortError> {
        self.set_transform(&TransformPatch::from_transform(Transform::default()), port)
    }

    /// Cover the whole canvas, ignoring the aspect ratio.
    pub fn stretch_to_screen(
        &mut self,
        canvas: Size,
        port: &mut dyn SourceControlPort,
    ) -> Result<bool, SceneError> {
        let mut rect = self.rectangle();
        rect.stretch_across(&screen_rect(canvas))?;
        Ok(self.set_rectangle(&rect, port)?)
    }

    /// Scale uniformly to fit the canvas and center on it.
    pub fn fit_to_screen(
        &mut self,
        canvas: Size,
        port: &mut dyn SourceControlPort,
    ) -> Result<bool, SceneError> {
        let mut rect = self.rectangle();
        rect.fit_to(&screen_rect(canvas))?;
        Ok(self.set_rectangle(&rect, port)?)
    }

    /// Center on the canvas, along one axis or both.
    pub fn center_on_screen(
        &mut self,
        canvas: Size,
        axis: Option<Axis>,
        port: &mut dyn SourceControlPort,
    ) -> Result<bool, SceneError> {
        let mut rect = self.rectangle();
        rect.center_on(&screen_rect(canvas), axis)?;
        Ok(self.set_rectangle(&rect, port)?)
    }

    /// Crop a nested-scene item down to the area its scene's items cover.
    ///
    /// `nested` must be the scene this item's source refers to. Visible
    /// content stays where it is on the canvas; for an unscaled item at the
    /// canvas origin the item ends up at the content's top-left corner.
    pub fn set_content_crop(
        &mut self,
        nested: &Scene,
        port: &mut dyn SourceControlPort,
    ) -> Result<bool, SceneError> {
        if nested.id() != self.source_id {
            return Err(SceneError::NotASceneSource(self.source_id.clone()));
        }
        let Some(content) = nested.items_bounding_rect() else {
            return Ok(false);
        };
        let content = content.intersect(Rect::new(0.0, 0.0, self.width, self.height));
        if content.width() <= 0.0 || content.height() <= 0.0 {
            return Ok(false);
        }

        let crop = Crop::new(
            content.y0,
            self.width - content.x1,
            self.height - content.y1,
            content.x0,
        );
        let mut rect = self.rectangle();
        rect.recrop(crop);
        Ok(self.set_rectangle(&rect, port)?)
    }

    // --- Other state ---

    pub fn set_visibility(
        &mut self,
        visible: bool,
        port: &mut dyn SourceControlPort,
    ) -> Result<bool, PortError> {
        if self.visible == visible {
            return Ok(false);
        }
        if let Some(layer) = self.layer {
            port.set_layer_visible(layer, visible)?;
        }
        self.visible = visible;
        Ok(true)
    }

    /// Locked items ignore canvas interaction; the flag is purely local state.
    pub fn set_locked(&mut self, locked: bool) -> bool {
        let changed = self.locked != locked;
        self.locked = locked;
        changed
    }

    /// Update the unscaled source size.
    pub fn set_size(&mut self, size: Size) -> bool {
        let changed = self.width != size.width || self.height != size.height;
        self.width = size.width;
        self.height = size.height;
        changed
    }

    /// Re-read the source size from the engine.
    pub fn refresh_size(&mut self, port: &dyn SourceControlPort) -> Result<bool, PortError> {
        match self.layer {
            Some(layer) => Ok(self.set_size(port.layer_native_size(layer)?)),
            None => Ok(false),
        }
    }
}
