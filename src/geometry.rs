//! Plain geometry values shared by the solver and the warp controller
//!
//! Quads are always stored in the winding established by [`Quad::from_size`]:
//! top-left, top-right, bottom-right, bottom-left. Every operation that
//! reorders corners returns a new `Quad` instead of mutating one in place.

use serde::{Deserialize, Serialize};

/// A 2D point in pixel coordinates
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Manhattan (L1) distance to another point
    #[inline]
    pub fn manhattan_distance(&self, other: Point) -> f64 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// Width and height of a rectangle anchored at the origin
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// True unless both dimensions are strictly positive
    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

/// Corner names in canonical quad order
pub const CORNER_LABELS: [&str; 4] = ["top-left", "top-right", "bottom-right", "bottom-left"];

/// An ordered set of exactly four corners
///
/// Index `i` of a content quad corresponds to index `i` of the view quad it
/// is fitted against, so reordering one quad without the other changes the warp.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Quad(pub [Point; 4]);

impl Quad {
    pub fn new(points: [Point; 4]) -> Self {
        Self(points)
    }

    /// Corners of the `size` rectangle anchored at the origin
    pub fn from_size(size: Size) -> Self {
        Self([
            Point::new(0.0, 0.0),                // Top-left
            Point::new(size.width, 0.0),         // Top-right
            Point::new(size.width, size.height), // Bottom-right
            Point::new(0.0, size.height),        // Bottom-left
        ])
    }

    pub fn points(&self) -> &[Point; 4] {
        &self.0
    }

    #[inline]
    pub fn corner(&self, index: usize) -> Point {
        self.0[index]
    }

    /// Copy of this quad with corner `index` replaced
    pub fn with_corner(&self, index: usize, point: Point) -> Self {
        let mut points = self.0;
        points[index] = point;
        Self(points)
    }

    /// Index of the corner closest to `point` by Manhattan distance.
    /// Ties resolve to the lowest index.
    pub fn nearest_corner_index(&self, point: Point) -> usize {
        let mut best = 0;
        let mut best_distance = self.0[0].manhattan_distance(point);
        for (i, corner) in self.0.iter().enumerate().skip(1) {
            let distance = corner.manhattan_distance(point);
            if distance < best_distance {
                best = i;
                best_distance = distance;
            }
        }
        best
    }

    /// Cyclic shift by `shift` positions, taken modulo 4.
    ///
    /// Corner `i` of the result is corner `i - shift` of `self`, so a shift of
    /// one moves every corner one index later and the last corner to the front.
    pub fn rotated(&self, shift: i32) -> Self {
        let mut points = self.0;
        points.rotate_right(shift.rem_euclid(4) as usize);
        Self(points)
    }

    /// Mirror across the vertical axis: swaps 0<->1 and 2<->3
    pub fn flipped_horizontal(&self) -> Self {
        let [tl, tr, br, bl] = self.0;
        Self([tr, tl, bl, br])
    }

    /// Mirror across the horizontal axis: swaps 0<->3 and 1<->2
    pub fn flipped_vertical(&self) -> Self {
        let [tl, tr, br, bl] = self.0;
        Self([bl, br, tr, tl])
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(Point::is_finite)
    }

    /// Flattened `[x0, y0, x1, y1, ...]` coordinates
    pub fn to_flat(&self) -> [f64; 8] {
        let mut flat = [0.0; 8];
        for (i, p) in self.0.iter().enumerate() {
            flat[i * 2] = p.x;
            flat[i * 2 + 1] = p.y;
        }
        flat
    }

    pub fn from_flat(flat: &[f64]) -> Option<Self> {
        if flat.len() != 8 {
            return None;
        }
        let mut points = [Point::ORIGIN; 4];
        for (i, point) in points.iter_mut().enumerate() {
            *point = Point::new(flat[i * 2], flat[i * 2 + 1]);
        }
        Some(Self(points))
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Point,
    pub max: Point,
}

impl BoundingBox {
    /// Bounding box of all points, or `None` when there are none
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = *iter.next()?;
        let mut bbox = Self { min: first, max: first };
        for p in iter {
            bbox.min.x = bbox.min.x.min(p.x);
            bbox.min.y = bbox.min.y.min(p.y);
            bbox.max.x = bbox.max.x.max(p.x);
            bbox.max.y = bbox.max.y.max(p.y);
        }
        Some(bbox)
    }

    pub fn size(&self) -> Size {
        Size::new(self.max.x - self.min.x, self.max.y - self.min.y)
    }
}
