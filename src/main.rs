//! Warpstage - interactive perspective warping of video or vector content
//!
//! A browser page shows the content on a stage; dragging any of the four
//! corners re-solves the homography that maps the content onto the stage.
//! All warp state lives on a single stage thread, and the web server relays
//! browser events to it and publishes the resulting CSS `matrix3d` transform.

mod config;
mod content;
mod geometry;
mod homography;
mod layout;
mod server;
mod stage;
mod warp;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Warpstage - perspective warp editor for projected content
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Web server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Web server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Polygon file; switches content to vector mode
    #[arg(long)]
    polygons: Option<PathBuf>,

    /// Apply the saved warp layout at startup
    #[arg(long)]
    restore: bool,

    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!("Warpstage v{}", env!("CARGO_PKG_VERSION"));

    // Load or create configuration, with CLI args as overrides
    let mut config = config::Config::load_or_create(&args.config)?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(polygons) = args.polygons {
        config.content.kind = content::ContentKind::Vector;
        config.content.polygons = Some(polygons);
    }
    if args.restore {
        config.layout.restore_on_start = true;
    }

    let content: Arc<dyn content::ContentSource> = Arc::from(config.content.open()?);
    let content_size = content.natural_size();
    let stage_size = config.stage.size();

    info!("Content: {:?} {}x{}", content.kind(), content_size.width, content_size.height);
    info!("Stage: {}x{}", stage_size.width, stage_size.height);
    info!("Layout file: {:?}", config.layout.path);

    let stage = stage::Stage::new(
        content_size,
        stage_size,
        config.layout.path.clone(),
        config.layout.restore_on_start,
    );
    let (stage_handle, stage_join) = stage::spawn(stage);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let config = Arc::new(parking_lot::RwLock::new(config));
    let state = Arc::new(server::AppState::new(config, stage_handle, content));

    // Start the web server
    info!("Starting web server at http://{}", addr);
    let server_handle = tokio::spawn(async move { server::run_server(&addr, state).await });

    // Wait for either to finish (or error)
    tokio::select! {
        result = stage_join => {
            match result {
                Ok(Ok(())) => info!("Stage thread exited normally"),
                Ok(Err(e)) => tracing::error!("Stage thread error: {}", e),
                Err(e) => tracing::error!("Stage thread panicked: {}", e),
            }
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => tracing::error!("Server error: {}", e),
                Err(e) => tracing::error!("Server task panicked: {}", e),
            }
        }
    }

    Ok(())
}
