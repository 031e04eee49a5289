//! Configuration management for warpstage

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::content::{ContentKind, ContentSource, VectorContent, VideoContent};
use crate::geometry::Size;

/// Initial stage (container) size, until the browser reports its own
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            width: 420,
            height: 280,
        }
    }
}

impl StageConfig {
    pub fn size(&self) -> Size {
        Size::new(self.width as f64, self.height as f64)
    }
}

/// What gets warped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    #[serde(default)]
    pub kind: ContentKind,
    /// Expected video frame size
    pub width: u32,
    pub height: u32,
    /// JSON polygon file for vector content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polygons: Option<PathBuf>,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            kind: ContentKind::Video,
            width: 640,
            height: 480,
            polygons: None,
        }
    }
}

impl ContentConfig {
    /// Build the configured content source
    pub fn open(&self) -> Result<Box<dyn ContentSource>> {
        match self.kind {
            ContentKind::Video => Ok(Box::new(VideoContent::new(self.width, self.height))),
            ContentKind::Vector => {
                let path = self
                    .polygons
                    .as_deref()
                    .context("Vector content requires `content.polygons` to be set")?;
                Ok(Box::new(VectorContent::load(path)?))
            }
        }
    }
}

/// Where warp layouts are saved
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    pub path: PathBuf,
    /// Apply the saved layout at startup if it exists
    #[serde(default)]
    pub restore_on_start: bool,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("warp-layout.json"),
            restore_on_start: false,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8092,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub stage: StageConfig,

    #[serde(default)]
    pub content: ContentConfig,

    #[serde(default)]
    pub layout: LayoutConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from a file, or create default if it doesn't exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            tracing::info!("Created default configuration at {:?}", path);
            Ok(config)
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }
}
