//! Scalable, croppable, rotatable rectangle.
//!
//! The rectangle describes how an unscaled source of `width × height` pixels
//! is placed on the canvas: cropped first, then scaled (negative scale means
//! flipped), then rotated clockwise around the position point. The position
//! `(x, y)` is the canvas location of the rectangle's origin, a point given in
//! unit coordinates of the rectangle's own frame (top-left by default).

use super::{AnchorPoint, Crop, GeometryError, QuarterTurn, Rect, Vec2};

/// Axis selector for centering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Horizontal,
    Vertical,
}

/// A rectangle with scale, crop and rotation.
///
/// Equality compares the geometry only.
#[derive(Debug, Clone, Copy)]
pub struct ScalableRectangle {
    pub x: f64,
    pub y: f64,
    /// Unscaled source width.
    pub width: f64,
    /// Unscaled source height.
    pub height: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    pub crop: Crop,
    /// Clockwise rotation in degrees.
    pub rotation: f64,
    origin: Vec2,
    /// Last flip along each axis, horizontal first.
    flip_memos: [Option<FlipMemo>; 2],
}

/// Position before a flip and the geometry that flip produced.
#[derive(Debug, Clone, Copy)]
struct FlipMemo {
    before: Vec2,
    after: [f64; 13],
}

impl PartialEq for ScalableRectangle {
    fn eq(&self, other: &Self) -> bool {
        self.fields() == other.fields()
    }
}

impl ScalableRectangle {
    /// Create an unscaled, uncropped, unrotated rectangle.
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
            scale_x: 1.0,
            scale_y: 1.0,
            crop: Crop::ZERO,
            rotation: 0.0,
            origin: Vec2::ZERO,
            flip_memos: [None; 2],
        }
    }

    /// Rectangle covering a plain axis-aligned rect.
    pub fn from_rect(rect: Rect) -> Self {
        Self::new(rect.x0, rect.y0, rect.width(), rect.height())
    }

    pub fn with_scale(mut self, scale_x: f64, scale_y: f64) -> Self {
        self.scale_x = scale_x;
        self.scale_y = scale_y;
        self
    }

    pub fn with_crop(mut self, crop: Crop) -> Self {
        self.crop = crop;
        self
    }

    pub fn with_rotation(mut self, rotation: f64) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn cropped_width(&self) -> f64 {
        self.width - self.crop.left - self.crop.right
    }

    pub fn cropped_height(&self) -> f64 {
        self.height - self.crop.top - self.crop.bottom
    }

    /// Cropped width times horizontal scale. Negative when flipped.
    pub fn scaled_width(&self) -> f64 {
        self.scale_x * self.cropped_width()
    }

    /// Cropped height times vertical scale. Negative when flipped.
    pub fn scaled_height(&self) -> f64 {
        self.scale_y * self.cropped_height()
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.scaled_width() / self.scaled_height()
    }

    /// Current origin in unit coordinates.
    pub fn origin(&self) -> Vec2 {
        self.origin
    }

    pub fn is_flipped_x(&self) -> bool {
        self.scale_x < 0.0
    }

    pub fn is_flipped_y(&self) -> bool {
        self.scale_y < 0.0
    }

    /// Map a vector from the rectangle's local frame onto the canvas.
    fn rotate_local(&self, local: Vec2) -> Vec2 {
        match QuarterTurn::from_degrees(self.rotation) {
            Ok(QuarterTurn::R0) => local,
            Ok(QuarterTurn::R90) => Vec2::new(-local.y, local.x),
            Ok(QuarterTurn::R180) => -local,
            Ok(QuarterTurn::R270) => Vec2::new(local.y, -local.x),
            Err(_) => {
                let (sin, cos) = self.rotation.to_radians().sin_cos();
                Vec2::new(local.x * cos - local.y * sin, local.x * sin + local.y * cos)
            }
        }
    }

    /// Move the position so it refers to `origin` while the rectangle stays put.
    pub fn set_origin(&mut self, origin: Vec2) {
        let local = Vec2::new(
            (origin.x - self.origin.x) * self.scaled_width(),
            (origin.y - self.origin.y) * self.scaled_height(),
        );
        let delta = self.rotate_local(local);
        self.x += delta.x;
        self.y += delta.y;
        self.origin = origin;
    }

    pub fn set_anchor(&mut self, anchor: AnchorPoint) {
        self.set_origin(anchor.position());
    }

    /// Run `f` with a temporary origin, restoring the previous one afterwards.
    pub fn with_origin<R>(&mut self, origin: Vec2, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = self.origin;
        self.set_origin(origin);
        let result = f(self);
        self.set_origin(previous);
        result
    }

    pub fn with_anchor<R>(&mut self, anchor: AnchorPoint, f: impl FnOnce(&mut Self) -> R) -> R {
        self.with_origin(anchor.position(), f)
    }

    /// Mirror horizontally in place, keeping the visual bounds.
    pub fn flip_x(&mut self) {
        self.flip(Axis::Horizontal);
    }

    /// Mirror vertically in place, keeping the visual bounds.
    pub fn flip_y(&mut self) {
        self.flip(Axis::Vertical);
    }

    /// Flipping back from exactly the geometry an earlier flip along the
    /// same axis produced returns to that flip's starting position rather
    /// than subtracting the shift again.
    fn flip(&mut self, axis: Axis) {
        let slot = match axis {
            Axis::Horizontal => 0,
            Axis::Vertical => 1,
        };
        let before = Vec2::new(self.x, self.y);
        let undone = self.flip_memos[slot]
            .take()
            .filter(|memo| memo.after == self.fields())
            .map(|memo| memo.before);

        let position = match undone {
            Some(position) => position,
            None => {
                let local = match axis {
                    Axis::Horizontal => Vec2::new((1.0 - 2.0 * self.origin.x) * self.scaled_width(), 0.0),
                    Axis::Vertical => Vec2::new(0.0, (1.0 - 2.0 * self.origin.y) * self.scaled_height()),
                };
                before + self.rotate_local(local)
            }
        };
        self.x = position.x;
        self.y = position.y;
        match axis {
            Axis::Horizontal => {
                self.scale_x = -self.scale_x;
                self.crop = self.crop.swapped_horizontal();
            }
            Axis::Vertical => {
                self.scale_y = -self.scale_y;
                self.crop = self.crop.swapped_vertical();
            }
        }

        if undone.is_none() {
            self.flip_memos[slot] = Some(FlipMemo { before, after: self.fields() });
        }
    }

    fn fields(&self) -> [f64; 13] {
        [
            self.x,
            self.y,
            self.width,
            self.height,
            self.scale_x,
            self.scale_y,
            self.crop.top,
            self.crop.right,
            self.crop.bottom,
            self.crop.left,
            self.rotation,
            self.origin.x,
            self.origin.y,
        ]
    }

    /// Turn this rectangle into an axis-aligned, positive-scale rectangle with
    /// the same visual bounds and a top-left origin.
    ///
    /// The returned token maps the (possibly modified) normalized rectangle
    /// back into the original rotation, flip and origin. Undoing an unmodified
    /// rectangle restores every field exactly.
    pub fn normalize(&mut self) -> Result<NormalizeUndo, GeometryError> {
        let turn = QuarterTurn::from_degrees(self.rotation)?;
        let original = *self;

        self.set_origin(Vec2::ZERO);
        let flipped_x = self.is_flipped_x();
        let flipped_y = self.is_flipped_y();
        if flipped_x {
            self.flip_x();
        }
        if flipped_y {
            self.flip_y();
        }
        self.derotate(turn);

        Ok(NormalizeUndo {
            original,
            normalized: *self,
            turn,
            flipped_x,
            flipped_y,
        })
    }

    /// Run `f` on the normalized rectangle and map the result back.
    pub fn normalized<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> Result<R, GeometryError> {
        let undo = self.normalize()?;
        let result = f(self);
        undo.undo(self);
        Ok(result)
    }

    /// A normalized copy, leaving `self` untouched.
    pub fn normalized_copy(&self) -> Result<Self, GeometryError> {
        let mut copy = *self;
        let _ = copy.normalize()?;
        Ok(copy)
    }

    fn derotate(&mut self, turn: QuarterTurn) {
        let scaled_width = self.scaled_width();
        let scaled_height = self.scaled_height();
        let c = self.crop;
        match turn {
            QuarterTurn::R0 => {}
            QuarterTurn::R90 => {
                self.x -= scaled_height;
                self.swap_axes();
                self.crop = Crop::new(c.left, c.top, c.right, c.bottom);
            }
            QuarterTurn::R180 => {
                self.x -= scaled_width;
                self.y -= scaled_height;
                self.crop = Crop::new(c.bottom, c.left, c.top, c.right);
            }
            QuarterTurn::R270 => {
                self.y -= scaled_width;
                self.swap_axes();
                self.crop = Crop::new(c.right, c.bottom, c.left, c.top);
            }
        }
        self.rotation = 0.0;
    }

    fn rerotate(&mut self, turn: QuarterTurn, rotation: f64) {
        let scaled_width = self.scaled_width();
        let scaled_height = self.scaled_height();
        let c = self.crop;
        match turn {
            QuarterTurn::R0 => {}
            QuarterTurn::R90 => {
                self.x += scaled_width;
                self.swap_axes();
                self.crop = Crop::new(c.right, c.bottom, c.left, c.top);
            }
            QuarterTurn::R180 => {
                self.x += scaled_width;
                self.y += scaled_height;
                self.crop = Crop::new(c.bottom, c.left, c.top, c.right);
            }
            QuarterTurn::R270 => {
                self.y += scaled_height;
                self.swap_axes();
                self.crop = Crop::new(c.left, c.top, c.right, c.bottom);
            }
        }
        self.rotation = rotation;
    }

    fn swap_axes(&mut self) {
        std::mem::swap(&mut self.width, &mut self.height);
        std::mem::swap(&mut self.scale_x, &mut self.scale_y);
    }

    /// Change the crop while keeping the remaining source pixels where they
    /// are on the canvas.
    pub fn recrop(&mut self, crop: Crop) {
        let cropped_width = self.width - crop.left - crop.right;
        let cropped_height = self.height - crop.top - crop.bottom;
        let local = Vec2::new(
            self.scale_x
                * ((crop.left - self.crop.left) + self.origin.x * (cropped_width - self.cropped_width())),
            self.scale_y
                * ((crop.top - self.crop.top) + self.origin.y * (cropped_height - self.cropped_height())),
        );
        let delta = self.rotate_local(local);
        self.x += delta.x;
        self.y += delta.y;
        self.crop = crop;
    }

    /// Scale and move so the visual bounds match `target`'s.
    pub fn stretch_across(&mut self, target: &ScalableRectangle) -> Result<(), GeometryError> {
        let target = target.normalized_copy()?;
        self.normalized(|rect| {
            rect.x = target.x;
            rect.y = target.y;
            if rect.cropped_width() != 0.0 {
                rect.scale_x = target.scaled_width() / rect.cropped_width();
            }
            if rect.cropped_height() != 0.0 {
                rect.scale_y = target.scaled_height() / rect.cropped_height();
            }
        })
    }

    /// Scale uniformly to fit inside `target`, then center on it.
    pub fn fit_to(&mut self, target: &ScalableRectangle) -> Result<(), GeometryError> {
        let target = target.normalized_copy()?;
        self.normalized(|rect| {
            if rect.scaled_width() == 0.0 || rect.scaled_height() == 0.0 {
                return;
            }
            let factor = if rect.aspect_ratio() >= target.aspect_ratio() {
                target.scaled_width() / rect.scaled_width()
            } else {
                target.scaled_height() / rect.scaled_height()
            };
            rect.scale_x *= factor;
            rect.scale_y *= factor;
            rect.center_within(&target, None);
        })
    }

    /// Center on `target`, along one axis or both.
    pub fn center_on(&mut self, target: &ScalableRectangle, axis: Option<Axis>) -> Result<(), GeometryError> {
        let target = target.normalized_copy()?;
        self.normalized(|rect| rect.center_within(&target, axis))
    }

    /// Centering on an already normalized target; `self` must be normalized too.
    fn center_within(&mut self, target: &ScalableRectangle, axis: Option<Axis>) {
        if axis != Some(Axis::Vertical) {
            self.x = target.x + (target.scaled_width() - self.scaled_width()) / 2.0;
        }
        if axis != Some(Axis::Horizontal) {
            self.y = target.y + (target.scaled_height() - self.scaled_height()) / 2.0;
        }
    }

    /// Axis-aligned visual bounds on the canvas.
    ///
    /// Works for any rotation, not just quarter turns.
    pub fn bounding_rect(&self) -> Rect {
        let width = self.scaled_width();
        let height = self.scaled_height();
        let corners = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)].map(|(u, v)| {
            let local = Vec2::new((u - self.origin.x) * width, (v - self.origin.y) * height);
            self.rotate_local(local) + Vec2::new(self.x, self.y)
        });

        let min_x = corners.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
        let max_x = corners.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
        let min_y = corners.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
        let max_y = corners.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);

        Rect::new(min_x, min_y, max_x, max_y)
    }
}

/// Token returned by [`ScalableRectangle::normalize`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[must_use = "the rectangle stays normalized until the token is undone"]
pub struct NormalizeUndo {
    original: ScalableRectangle,
    normalized: ScalableRectangle,
    turn: QuarterTurn,
    flipped_x: bool,
    flipped_y: bool,
}

impl NormalizeUndo {
    /// Restore rotation, flips and origin on `rect`.
    pub fn undo(self, rect: &mut ScalableRectangle) {
        if *rect == self.normalized {
            *rect = self.original;
            return;
        }

        rect.set_origin(Vec2::ZERO);
        rect.rerotate(self.turn, self.original.rotation);
        if self.flipped_y {
            rect.flip_y();
        }
        if self.flipped_x {
            rect.flip_x();
        }
        rect.set_origin(self.original.origin);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn camera() -> ScalableRectangle {
        ScalableRectangle::new(0.0, 0.0, 1920.0, 1080.0)
    }

    fn assert_rect_eq(a: Rect, b: Rect) {
        let eps = 1e-6;
        assert!(
            (a.x0 - b.x0).abs() < eps
                && (a.y0 - b.y0).abs() < eps
                && (a.x1 - b.x1).abs() < eps
                && (a.y1 - b.y1).abs() < eps,
            "{a:?} != {b:?}"
        );
    }

    #[test]
    fn test_scaled_size() {
        let rect = camera();
        assert_eq!(rect.scaled_width(), 1920.0);
        assert_eq!(rect.scaled_height(), 1080.0);

        let rect = camera().with_scale(0.5, 2.0).with_crop(Crop::new(40.0, 20.0, 40.0, 100.0));
        assert_eq!(rect.cropped_width(), 1800.0);
        assert_eq!(rect.scaled_width(), 900.0);
        assert_eq!(rect.scaled_height(), 2000.0);
    }

    #[test]
    fn test_set_origin_keeps_rect_in_place() {
        let mut rect = ScalableRectangle::new(100.0, 100.0, 200.0, 100.0);
        rect.set_anchor(AnchorPoint::Center);
        assert_eq!((rect.x, rect.y), (200.0, 150.0));
        assert_rect_eq(rect.bounding_rect(), Rect::new(100.0, 100.0, 300.0, 200.0));

        rect.set_anchor(AnchorPoint::NorthWest);
        assert_eq!((rect.x, rect.y), (100.0, 100.0));
    }

    #[test]
    fn test_with_anchor_scales_around_anchor() {
        let mut rect = ScalableRectangle::new(0.0, 0.0, 100.0, 100.0);
        rect.with_anchor(AnchorPoint::SouthEast, |r| {
            r.scale_x = 2.0;
            r.scale_y = 2.0;
        });
        assert_rect_eq(rect.bounding_rect(), Rect::new(-100.0, -100.0, 100.0, 100.0));
    }

    #[test]
    fn test_rotated_item_normalizes_to_swapped_axes() {
        let mut rect = camera().with_crop(Crop::new(0.0, 0.0, 80.0, 120.0)).with_rotation(90.0);
        let before = rect;

        let undo = rect.normalize().unwrap();
        assert_eq!(rect.cropped_width(), before.cropped_height());
        assert_eq!(rect.cropped_height(), before.cropped_width());
        assert_eq!(rect.scale_x, before.scale_y);
        assert_eq!(rect.scale_y, before.scale_x);
        assert_eq!(rect.rotation, 0.0);
        assert_rect_eq(
            Rect::new(rect.x, rect.y, rect.x + rect.scaled_width(), rect.y + rect.scaled_height()),
            before.bounding_rect(),
        );

        undo.undo(&mut rect);
        assert_eq!(rect, before);
    }

    #[test]
    fn test_normalize_rejects_arbitrary_rotation() {
        let mut rect = camera().with_rotation(45.0);
        let before = rect;
        assert_eq!(rect.normalize(), Err(GeometryError::UnsupportedRotation(45.0)));
        assert_eq!(rect, before);
    }

    #[test]
    fn test_flip_x_keeps_bounds_and_swaps_crop() {
        let mut rect = ScalableRectangle::new(10.0, 20.0, 100.0, 50.0)
            .with_crop(Crop::new(0.0, 5.0, 0.0, 15.0));
        let bounds = rect.bounding_rect();

        rect.flip_x();
        assert_eq!(rect.scale_x, -1.0);
        assert_eq!(rect.x, 90.0);
        assert_eq!(rect.crop.left, 5.0);
        assert_eq!(rect.crop.right, 15.0);
        assert_rect_eq(rect.bounding_rect(), bounds);
    }

    #[test]
    fn test_flip_pairs_are_identity() {
        let mut rect = ScalableRectangle::new(32.0, 64.0, 640.0, 360.0)
            .with_scale(2.0, 0.5)
            .with_crop(Crop::new(8.0, 16.0, 4.0, 2.0))
            .with_rotation(270.0);
        let before = rect;

        rect.flip_x();
        rect.flip_x();
        assert_eq!((rect.x, rect.scale_x, rect.crop.left, rect.crop.right),
            (before.x, before.scale_x, before.crop.left, before.crop.right));

        rect.flip_y();
        rect.flip_y();
        assert_eq!(rect, before);
    }

    #[test]
    fn test_flip_on_rotated_rect_keeps_bounds() {
        let mut rect = ScalableRectangle::new(500.0, 100.0, 200.0, 100.0).with_rotation(90.0);
        let bounds = rect.bounding_rect();
        rect.flip_x();
        assert_rect_eq(rect.bounding_rect(), bounds);
        rect.flip_y();
        assert_rect_eq(rect.bounding_rect(), bounds);
    }

    #[test]
    fn test_modified_normalized_rect_maps_back() {
        let mut rect = ScalableRectangle::new(400.0, 0.0, 200.0, 100.0).with_rotation(90.0);
        // Visually occupies x in [300, 400], y in [0, 200].
        assert_rect_eq(rect.bounding_rect(), Rect::new(300.0, 0.0, 400.0, 200.0));

        rect.normalized(|r| {
            r.x += 10.0;
            r.scale_x = 2.0;
        })
        .unwrap();

        assert_eq!(rect.rotation, 90.0);
        assert_rect_eq(rect.bounding_rect(), Rect::new(310.0, 0.0, 510.0, 200.0));
    }

    #[test]
    fn test_recrop_keeps_content_in_place() {
        let mut rect = ScalableRectangle::new(100.0, 100.0, 400.0, 200.0).with_scale(2.0, 2.0);
        rect.recrop(Crop::new(50.0, 100.0, 0.0, 100.0));
        assert_eq!((rect.x, rect.y), (300.0, 200.0));
        assert_rect_eq(rect.bounding_rect(), Rect::new(300.0, 200.0, 700.0, 500.0));

        let mut rotated = ScalableRectangle::new(100.0, 100.0, 400.0, 200.0).with_rotation(90.0);
        rotated.recrop(Crop::new(0.0, 0.0, 0.0, 100.0));
        // Source x maps onto canvas y for a quarter turn.
        assert_eq!((rotated.x, rotated.y), (100.0, 200.0));
    }

    #[test]
    fn test_stretch_across() {
        let mut rect = ScalableRectangle::new(50.0, 50.0, 640.0, 480.0).with_scale(-1.0, 1.0);
        rect.stretch_across(&camera()).unwrap();
        assert!(rect.is_flipped_x());
        assert_rect_eq(rect.bounding_rect(), Rect::new(0.0, 0.0, 1920.0, 1080.0));
    }

    #[test]
    fn test_fit_to_keeps_aspect_and_centers() {
        let mut rect = ScalableRectangle::new(0.0, 0.0, 400.0, 400.0);
        rect.fit_to(&camera()).unwrap();
        assert_eq!(rect.scale_x, rect.scale_y);
        assert_rect_eq(rect.bounding_rect(), Rect::new(420.0, 0.0, 1500.0, 1080.0));
    }

    #[test]
    fn test_fit_to_rotated() {
        let mut rect = ScalableRectangle::new(0.0, 0.0, 1920.0, 1080.0).with_rotation(90.0);
        rect.fit_to(&camera()).unwrap();
        assert_eq!(rect.rotation, 90.0);
        let bounds = rect.bounding_rect();
        assert!((bounds.height() - 1080.0).abs() < 1e-6);
        assert!((bounds.center().x - 960.0).abs() < 1e-6);
    }

    #[test]
    fn test_center_on_single_axis() {
        let mut rect = ScalableRectangle::new(10.0, 10.0, 100.0, 100.0);
        rect.center_on(&camera(), Some(Axis::Horizontal)).unwrap();
        assert_eq!((rect.x, rect.y), (910.0, 10.0));
        rect.center_on(&camera(), Some(Axis::Vertical)).unwrap();
        assert_eq!((rect.x, rect.y), (910.0, 490.0));
    }

    #[test]
    fn test_flip_pair_restores_inexact_position() {
        let mut rect = ScalableRectangle::new(0.1, 0.0, 0.7, 1.0);
        rect.flip_x();
        rect.flip_x();
        assert_eq!(rect.x, 0.1);

        // A move in between starts a fresh flip
        rect.flip_x();
        rect.x += 1.0;
        let moved = rect.x;
        rect.flip_x();
        assert!((rect.x - (moved - 0.7)).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn prop_flip_pair_identity(
            x in -1.0e6f64..1.0e6,
            y in -1.0e6f64..1.0e6,
            width in 1.0e-3f64..1.0e5,
            height in 1.0e-3f64..1.0e5,
            scale_x in prop_oneof![-16.0f64..-1.0e-3, 1.0e-3f64..16.0],
            scale_y in prop_oneof![-16.0f64..-1.0e-3, 1.0e-3f64..16.0],
            turn in 0u8..4,
            anchor in 0usize..9,
        ) {
            let mut rect = ScalableRectangle::new(x, y, width, height)
                .with_scale(scale_x, scale_y)
                .with_crop(Crop::new(height * 0.1, width * 0.2, 0.0, width * 0.05))
                .with_rotation(f64::from(turn) * 90.0);
            rect.set_anchor(AnchorPoint::ALL[anchor]);
            let before = rect;

            rect.flip_x();
            rect.flip_x();
            prop_assert_eq!(rect, before);

            rect.flip_y();
            rect.flip_y();
            prop_assert_eq!(rect, before);

            rect.flip_x();
            rect.flip_y();
            rect.flip_y();
            rect.flip_x();
            prop_assert_eq!(rect, before);
        }

        #[test]
        fn prop_normalize_round_trip(
            x in -2000.0f64..2000.0,
            y in -2000.0f64..2000.0,
            width in 1.0f64..4000.0,
            height in 1.0f64..4000.0,
            scale_x in prop_oneof![-4.0f64..-0.01, 0.01f64..4.0],
            scale_y in prop_oneof![-4.0f64..-0.01, 0.01f64..4.0],
            crop in (0.0f64..0.4, 0.0f64..0.4, 0.0f64..0.4, 0.0f64..0.4),
            turn in 0u8..4,
            anchor in 0usize..9,
        ) {
            let crop = Crop::new(crop.0 * height, crop.1 * width, crop.2 * height, crop.3 * width);
            let mut rect = ScalableRectangle::new(x, y, width, height)
                .with_scale(scale_x, scale_y)
                .with_crop(crop)
                .with_rotation(f64::from(turn) * 90.0);
            rect.set_anchor(AnchorPoint::ALL[anchor]);
            let before = rect;

            let undo = rect.normalize().unwrap();
            prop_assert!(rect.scale_x > 0.0 && rect.scale_y > 0.0);
            prop_assert_eq!(rect.rotation, 0.0);
            undo.undo(&mut rect);
            prop_assert_eq!(rect, before);
        }

        #[test]
        fn prop_normalize_preserves_bounds(
            x in -2000.0f64..2000.0,
            y in -2000.0f64..2000.0,
            scale_x in prop_oneof![-4.0f64..-0.01, 0.01f64..4.0],
            scale_y in prop_oneof![-4.0f64..-0.01, 0.01f64..4.0],
            turn in 0u8..4,
        ) {
            let mut rect = ScalableRectangle::new(x, y, 1280.0, 720.0)
                .with_scale(scale_x, scale_y)
                .with_rotation(f64::from(turn) * 90.0);
            let bounds = rect.bounding_rect();
            let _undo = rect.normalize().unwrap();
            let normalized = Rect::new(rect.x, rect.y, rect.x + rect.scaled_width(), rect.y + rect.scaled_height());
            prop_assert!((normalized.x0 - bounds.x0).abs() < 1e-6);
            prop_assert!((normalized.y0 - bounds.y0).abs() < 1e-6);
            prop_assert!((normalized.x1 - bounds.x1).abs() < 1e-6);
            prop_assert!((normalized.y1 - bounds.y1).abs() < 1e-6);
        }
    }
}
