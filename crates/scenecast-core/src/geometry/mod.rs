//! Geometry primitives for placing scene items on the canvas.
//!
//! Vectors, points and axis-aligned rectangles come from `kurbo`. This module
//! adds anchor/origin helpers, crop amounts, the [`ScalableRectangle`] used to
//! reason about flipped and rotated items, and line intersection math.

mod line;
mod scalable;

pub use kurbo::{Point, Rect, Size, Vec2};
pub use line::{Line, LineSegment};
pub use scalable::{Axis, NormalizeUndo, ScalableRectangle};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tolerance used when snapping a rotation to a quarter turn.
const ROTATION_EPSILON: f64 = 1e-9;

/// Geometry errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("Unsupported rotation {0}°: only multiples of 90° can be normalized")]
    UnsupportedRotation(f64),
}

/// Crop amounts in unscaled source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Crop {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl Crop {
    /// No cropping on any side.
    pub const ZERO: Crop = Crop { top: 0.0, right: 0.0, bottom: 0.0, left: 0.0 };

    pub fn new(top: f64, right: f64, bottom: f64, left: f64) -> Self {
        Self { top, right, bottom, left }
    }

    /// Crop with left and right exchanged.
    pub fn swapped_horizontal(self) -> Self {
        Self { left: self.right, right: self.left, ..self }
    }

    /// Crop with top and bottom exchanged.
    pub fn swapped_vertical(self) -> Self {
        Self { top: self.bottom, bottom: self.top, ..self }
    }
}

/// Named anchor points on a rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnchorPoint {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
    Center,
}

impl AnchorPoint {
    /// All anchors, clockwise from north, then the center.
    pub const ALL: [AnchorPoint; 9] = [
        AnchorPoint::North,
        AnchorPoint::NorthEast,
        AnchorPoint::East,
        AnchorPoint::SouthEast,
        AnchorPoint::South,
        AnchorPoint::SouthWest,
        AnchorPoint::West,
        AnchorPoint::NorthWest,
        AnchorPoint::Center,
    ];

    /// Position of the anchor in unit-rectangle coordinates.
    pub fn position(self) -> Vec2 {
        match self {
            AnchorPoint::North => Vec2::new(0.5, 0.0),
            AnchorPoint::NorthEast => Vec2::new(1.0, 0.0),
            AnchorPoint::East => Vec2::new(1.0, 0.5),
            AnchorPoint::SouthEast => Vec2::new(1.0, 1.0),
            AnchorPoint::South => Vec2::new(0.5, 1.0),
            AnchorPoint::SouthWest => Vec2::new(0.0, 1.0),
            AnchorPoint::West => Vec2::new(0.0, 0.5),
            AnchorPoint::NorthWest => Vec2::new(0.0, 0.0),
            AnchorPoint::Center => Vec2::new(0.5, 0.5),
        }
    }
}

/// Conversions between absolute offsets and unit-rectangle origins.
pub trait RectExt {
    /// Normalized `[0, 1]²` coordinate of `offset` relative to this rect.
    fn origin_from_offset(&self, offset: Point) -> Vec2;

    /// Absolute point for a normalized origin. Inverse of [`RectExt::origin_from_offset`].
    fn offset_from_origin(&self, origin: Vec2) -> Point;
}

impl RectExt for Rect {
    fn origin_from_offset(&self, offset: Point) -> Vec2 {
        // Degenerate axes map everything onto the leading edge.
        let ratio = |delta: f64, extent: f64| if extent == 0.0 { 0.0 } else { delta / extent };
        Vec2::new(
            ratio(offset.x - self.x0, self.width()),
            ratio(offset.y - self.y0, self.height()),
        )
    }

    fn offset_from_origin(&self, origin: Vec2) -> Point {
        Point::new(
            self.x0 + origin.x * self.width(),
            self.y0 + origin.y * self.height(),
        )
    }
}

/// Rotation restricted to quarter turns (clockwise, y axis pointing down).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QuarterTurn {
    R0,
    R90,
    R180,
    R270,
}

impl QuarterTurn {
    pub(crate) fn from_degrees(degrees: f64) -> Result<Self, GeometryError> {
        let normalized = normalize_degrees(degrees);
        let near = |target: f64| (normalized - target).abs() < ROTATION_EPSILON;
        if near(0.0) || near(360.0) {
            Ok(QuarterTurn::R0)
        } else if near(90.0) {
            Ok(QuarterTurn::R90)
        } else if near(180.0) {
            Ok(QuarterTurn::R180)
        } else if near(270.0) {
            Ok(QuarterTurn::R270)
        } else {
            Err(GeometryError::UnsupportedRotation(degrees))
        }
    }
}

/// Wrap an angle in degrees into `[0, 360)`.
pub fn normalize_degrees(degrees: f64) -> f64 {
    degrees.rem_euclid(360.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_from_offset() {
        let rect = Rect::new(100.0, 50.0, 300.0, 150.0);
        let origin = rect.origin_from_offset(Point::new(150.0, 150.0));
        assert_eq!(origin, Vec2::new(0.25, 1.0));
    }

    #[test]
    fn test_offset_from_origin_inverts() {
        let rect = Rect::new(-40.0, 10.0, 60.0, 210.0);
        let point = Point::new(35.0, 60.0);
        let origin = rect.origin_from_offset(point);
        assert_eq!(rect.offset_from_origin(origin), point);
    }

    #[test]
    fn test_origin_from_offset_degenerate_rect() {
        let rect = Rect::new(10.0, 10.0, 10.0, 30.0);
        let origin = rect.origin_from_offset(Point::new(25.0, 20.0));
        assert_eq!(origin, Vec2::new(0.0, 0.5));
    }

    #[test]
    fn test_anchor_positions() {
        assert_eq!(AnchorPoint::NorthWest.position(), Vec2::ZERO);
        assert_eq!(AnchorPoint::SouthEast.position(), Vec2::new(1.0, 1.0));
        assert_eq!(AnchorPoint::Center.position(), Vec2::new(0.5, 0.5));
        assert_eq!(AnchorPoint::ALL.len(), 9);
    }

    #[test]
    fn test_crop_swaps() {
        let crop = Crop::new(1.0, 2.0, 3.0, 4.0);
        assert_eq!(crop.swapped_horizontal(), Crop::new(1.0, 4.0, 3.0, 2.0));
        assert_eq!(crop.swapped_vertical(), Crop::new(3.0, 2.0, 1.0, 4.0));
    }

    #[test]
    fn test_quarter_turns() {
        assert_eq!(QuarterTurn::from_degrees(0.0), Ok(QuarterTurn::R0));
        assert_eq!(QuarterTurn::from_degrees(450.0), Ok(QuarterTurn::R90));
        assert_eq!(QuarterTurn::from_degrees(-90.0), Ok(QuarterTurn::R270));
        assert_eq!(QuarterTurn::from_degrees(180.0), Ok(QuarterTurn::R180));
        assert_eq!(
            QuarterTurn::from_degrees(45.0),
            Err(GeometryError::UnsupportedRotation(45.0))
        );
    }
}
