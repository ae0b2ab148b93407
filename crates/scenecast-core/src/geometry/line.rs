//! Lines and line segments with intersection tests.
//!
//! Intersections use Paul Bourke's parametric formulation: for lines through
//! `p1 → p2` and `p3 → p4`,
//!
//! ```text
//! ua = ((x4 - x3)(y1 - y3) - (y4 - y3)(x1 - x3)) / d
//! ub = ((x2 - x1)(y1 - y3) - (y2 - y1)(x1 - x3)) / d
//! d  = (y4 - y3)(x2 - x1) - (x4 - x3)(y2 - y1)
//! ```
//!
//! and the intersection is `p1 + ua (p2 - p1)`.

use super::{Point, Vec2};
use serde::{Deserialize, Serialize};

/// Parametric intersection of the lines through `a` and `b`, as `(ua, ub)`.
/// `None` when the lines are parallel or coincident.
fn intersection_params(a: (Point, Point), b: (Point, Point)) -> Option<(f64, f64)> {
    let (p1, p2) = a;
    let (p3, p4) = b;
    let denominator = (p4.y - p3.y) * (p2.x - p1.x) - (p4.x - p3.x) * (p2.y - p1.y);
    if denominator == 0.0 {
        return None;
    }
    let ua = ((p4.x - p3.x) * (p1.y - p3.y) - (p4.y - p3.y) * (p1.x - p3.x)) / denominator;
    let ub = ((p2.x - p1.x) * (p1.y - p3.y) - (p2.y - p1.y) * (p1.x - p3.x)) / denominator;
    Some((ua, ub))
}

/// An infinite line through two points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub start: Point,
    pub end: Point,
}

impl Line {
    pub fn new(start: Point, end: Point) -> Self {
        Self { start, end }
    }

    /// Direction vector from `start` to `end`.
    pub fn direction(&self) -> Vec2 {
        self.end - self.start
    }

    /// Point where the two lines cross, if they are not parallel.
    pub fn intersection(&self, other: &Line) -> Option<Point> {
        let (ua, _) = intersection_params((self.start, self.end), (other.start, other.end))?;
        Some(self.start + self.direction() * ua)
    }
}

/// A finite segment between two points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineSegment {
    pub start: Point,
    pub end: Point,
}

impl LineSegment {
    pub fn new(start: Point, end: Point) -> Self {
        Self { start, end }
    }

    pub fn length(&self) -> f64 {
        (self.end - self.start).hypot()
    }

    /// The infinite line this segment lies on.
    pub fn to_line(&self) -> Line {
        Line::new(self.start, self.end)
    }

    /// Point where both segments meet, if they do.
    pub fn intersection(&self, other: &LineSegment) -> Option<Point> {
        let (ua, ub) = intersection_params((self.start, self.end), (other.start, other.end))?;
        let within = |t: f64| (0.0..=1.0).contains(&t);
        if within(ua) && within(ub) {
            Some(self.start + (self.end - self.start) * ua)
        } else {
            None
        }
    }
}
