//! Saved warp layouts
//!
//! On disk a layout is a JSON array of 16 numbers: the four content corners
//! followed by the four view corners, each as an `x, y` pair.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::geometry::Quad;

const LAYOUT_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("failed to access layout file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid layout JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("layout must contain 16 numbers, found {0}")]
    Length(usize),
}

/// Content and view quads of one warp, in correspondence order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "Vec<f64>", try_from = "Vec<f64>")]
pub struct WarpLayout {
    pub content: Quad,
    pub view: Quad,
}

impl WarpLayout {
    pub fn to_flat(&self) -> [f64; LAYOUT_LEN] {
        let mut flat = [0.0; LAYOUT_LEN];
        flat[..8].copy_from_slice(&self.content.to_flat());
        flat[8..].copy_from_slice(&self.view.to_flat());
        flat
    }

    pub fn from_flat(flat: &[f64]) -> Result<Self, LayoutError> {
        if flat.len() != LAYOUT_LEN {
            return Err(LayoutError::Length(flat.len()));
        }
        let content = Quad::from_flat(&flat[..8]).ok_or(LayoutError::Length(flat.len()))?;
        let view = Quad::from_flat(&flat[8..]).ok_or(LayoutError::Length(flat.len()))?;
        Ok(Self { content, view })
    }

    pub fn load(path: &Path) -> Result<Self, LayoutError> {
        let content = std::fs::read_to_string(path).map_err(|source| LayoutError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let layout = serde_json::from_str(&content)?;
        tracing::info!("Loaded warp layout from {:?}", path);
        Ok(layout)
    }

    pub fn save(&self, path: &Path) -> Result<(), LayoutError> {
        let content = serde_json::to_string_pretty(self)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| LayoutError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        std::fs::write(path, content).map_err(|source| LayoutError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::info!("Saved warp layout to {:?}", path);
        Ok(())
    }
}

impl From<WarpLayout> for Vec<f64> {
    fn from(layout: WarpLayout) -> Self {
        layout.to_flat().to_vec()
    }
}

impl TryFrom<Vec<f64>> for WarpLayout {
    type Error = LayoutError;

    fn try_from(flat: Vec<f64>) -> Result<Self, Self::Error> {
        WarpLayout::from_flat(&flat)
    }
}
