//! Content sources that can be warped onto the stage
//!
//! A source only has to report its natural (unwarped) size. Video frames are
//! produced elsewhere; this crate just learns their resolution. Vector content
//! is a set of closed polygons whose bounding box defines the natural size.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::geometry::{BoundingBox, Point, Size};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// Live camera feed rendered by the browser
    #[default]
    Video,
    /// Closed polygons loaded from a file
    Vector,
}

pub trait ContentSource: Send + Sync {
    fn kind(&self) -> ContentKind;
    fn natural_size(&self) -> Size;

    /// Polygon outline, for sources that have one
    fn outline(&self) -> Option<&VectorContent> {
        None
    }
}

/// Video source with a known frame size.
/// The real size usually arrives later from the frame producer.
#[derive(Debug, Clone)]
pub struct VideoContent {
    size: Size,
}

impl VideoContent {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: Size::new(width as f64, height as f64),
        }
    }
}

impl ContentSource for VideoContent {
    fn kind(&self) -> ContentKind {
        ContentKind::Video
    }

    fn natural_size(&self) -> Size {
        self.size
    }
}

/// Closed polygons plus their bounding box
#[derive(Debug, Clone, Serialize)]
pub struct VectorContent {
    polygons: Vec<Vec<Point>>,
    /// Top-left of the bounding box in polygon coordinates
    origin: Point,
    size: Size,
}

impl VectorContent {
    /// Build from raw polygons, closing any that are open.
    /// Polygons with fewer than three vertices are dropped.
    pub fn new(polygons: Vec<Vec<Point>>) -> Result<Self> {
        let polygons: Vec<Vec<Point>> = polygons
            .into_iter()
            .filter(|p| p.len() >= 3)
            .map(close_polygon)
            .collect();

        let Some(bbox) = BoundingBox::from_points(polygons.iter().flatten()) else {
            bail!("vector content has no polygons");
        };
        if bbox.size().is_empty() {
            bail!(
                "vector content bounding box is empty ({}x{})",
                bbox.size().width,
                bbox.size().height
            );
        }

        Ok(Self {
            polygons,
            origin: bbox.min,
            size: bbox.size(),
        })
    }

    /// Load polygons from a JSON file of `[[[x, y], ...], ...]`
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read polygons from {:?}", path))?;
        let raw: Vec<Vec<[f64; 2]>> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse polygons from {:?}", path))?;
        let polygons = raw
            .into_iter()
            .map(|poly| poly.into_iter().map(|[x, y]| Point::new(x, y)).collect())
            .collect();
        let content = Self::new(polygons)?;
        tracing::info!(
            "Loaded {} polygons ({}x{}) from {:?}",
            content.polygons.len(),
            content.size.width,
            content.size.height,
            path
        );
        Ok(content)
    }
}

impl ContentSource for VectorContent {
    fn kind(&self) -> ContentKind {
        ContentKind::Vector
    }

    fn natural_size(&self) -> Size {
        self.size
    }

    fn outline(&self) -> Option<&VectorContent> {
        Some(self)
    }
}

fn close_polygon(mut polygon: Vec<Point>) -> Vec<Point> {
    if let (Some(first), Some(last)) = (polygon.first().copied(), polygon.last()) {
        if first != *last {
            polygon.push(first);
        }
    }
    polygon
}
