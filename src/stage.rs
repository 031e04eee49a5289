//! The stage thread: sole owner of the warp controller
//!
//! Every mutation reaches the controller as a [`StageRequest`] over a single
//! consumer channel, so producers on other threads (HTTP handlers, the frame
//! producer reporting a new resolution) never touch warp state directly.
//!
//! The loop blocks for one request, then drains whatever else is already
//! queued; that batch is one tick. Container resizes within a tick collapse
//! into a single refit.

use anyhow::Result;
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::geometry::{Point, Quad, Size};
use crate::homography::{DegenerateQuadError, RenderTransform};
use crate::layout::{LayoutError, WarpLayout};
use crate::warp::{ButtonMask, MoveOutcome, RenderTarget, WarpController, WarpError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerKind {
    Enter,
    Exit,
    Press,
    Release,
    Move,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub kind: PointerKind,
    pub point: Point,
    pub buttons: ButtonMask,
}

/// Everything the stage thread can be asked to do
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StageEvent {
    ContainerResized(Size),
    ContentSizeChanged(Size),
    Pointer(PointerEvent),
    Rotate(i32),
    FlipHorizontal,
    FlipVertical,
    Refit,
    SaveLayout,
    LoadLayout,
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Warp(#[from] WarpError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error("stage thread is not running")]
    Stopped,
}

impl From<DegenerateQuadError> for StageError {
    fn from(e: DegenerateQuadError) -> Self {
        StageError::Warp(e.into())
    }
}

pub type StageReply = Result<Arc<WarpSnapshot>, StageError>;

pub struct StageRequest {
    pub event: StageEvent,
    pub reply: oneshot::Sender<StageReply>,
}

/// Published view of the warp state
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WarpSnapshot {
    pub generation: u64,
    pub stage: Size,
    pub content: Size,
    pub content_corners: Quad,
    pub view_corners: Quad,
    /// Column-major 4x4, ready for CSS `matrix3d`
    pub transform: [f64; 16],
    pub dragging: Option<usize>,
    pub in_bounds: bool,
}

/// The render target the browser mirrors
#[derive(Debug, Clone, Default)]
pub struct StageSurface {
    size: Size,
    transform: RenderTransform,
}

impl RenderTarget for StageSurface {
    fn allocated_size(&self) -> Size {
        self.size
    }

    fn transform(&self) -> RenderTransform {
        self.transform
    }

    fn set_transform(&mut self, transform: RenderTransform) {
        self.transform = transform;
    }
}

/// Pending-resize guard: at most one resize is scheduled per tick, and it
/// always carries the latest requested size
#[derive(Default)]
struct ResizeCoalescer {
    pending: Option<Size>,
    waiters: Vec<oneshot::Sender<StageReply>>,
}

impl ResizeCoalescer {
    /// Returns true if this request scheduled a new resize rather than
    /// joining one already pending
    fn schedule(&mut self, size: Size, reply: oneshot::Sender<StageReply>) -> bool {
        let fresh = self.pending.is_none();
        self.pending = Some(size);
        self.waiters.push(reply);
        fresh
    }

    fn take(&mut self) -> Option<(Size, Vec<oneshot::Sender<StageReply>>)> {
        let size = self.pending.take()?;
        Some((size, std::mem::take(&mut self.waiters)))
    }
}

pub struct Stage {
    controller: WarpController,
    surface: StageSurface,
    layout_path: PathBuf,
    resize: ResizeCoalescer,
    generation: u64,
    snapshot: Arc<ArcSwap<WarpSnapshot>>,
}

impl Stage {
    /// Fit `content_size` content to a `stage_size` container.
    /// With `restore_layout` set, a saved layout is applied on top if one exists.
    pub fn new(content_size: Size, stage_size: Size, layout_path: PathBuf, restore_layout: bool) -> Self {
        let mut controller = WarpController::new(content_size, stage_size);
        let mut surface = StageSurface {
            size: stage_size,
            transform: RenderTransform::default(),
        };

        if let Err(e) = controller.refit(&mut surface) {
            warn!("Initial fit failed: {}", e);
        }

        if restore_layout && layout_path.exists() {
            match WarpLayout::load(&layout_path) {
                Ok(layout) => {
                    if let Err(e) = controller.apply_layout(&mut surface, &layout) {
                        warn!("Saved layout is degenerate, ignoring it: {}", e);
                    }
                }
                Err(e) => warn!("Could not restore warp layout: {}", e),
            }
        }

        let snapshot = Arc::new(ArcSwap::from_pointee(build_snapshot(0, &controller, &surface)));

        Self {
            controller,
            surface,
            layout_path,
            resize: ResizeCoalescer::default(),
            generation: 0,
            snapshot,
        }
    }

    pub fn snapshot_cell(&self) -> Arc<ArcSwap<WarpSnapshot>> {
        self.snapshot.clone()
    }

    /// Process requests until every sender is dropped
    pub fn run(mut self, mut rx: mpsc::UnboundedReceiver<StageRequest>) -> Result<()> {
        info!(
            "Stage loop started: {}x{} content on {}x{} stage",
            self.controller.content_size().width,
            self.controller.content_size().height,
            self.controller.container_size().width,
            self.controller.container_size().height
        );

        while let Some(request) = rx.blocking_recv() {
            self.handle(request);
            while let Ok(request) = rx.try_recv() {
                self.handle(request);
            }
            self.flush_resize();
        }

        info!("Stage loop stopped");
        Ok(())
    }

    fn handle(&mut self, request: StageRequest) {
        let StageRequest { event, reply } = request;

        if let StageEvent::ContainerResized(size) = event {
            if !self.resize.schedule(size, reply) {
                debug!("Coalescing resize to {}x{}", size.width, size.height);
            }
            return;
        }

        // Anything else sees the container at its latest size
        self.flush_resize();

        let result = self.process(event);
        if let Err(e) = &result {
            warn!("{:?} failed: {}", event, e);
        }
        let snapshot = self.publish();
        let _ = reply.send(result.map(|()| snapshot));
    }

    fn process(&mut self, event: StageEvent) -> Result<(), StageError> {
        let controller = &mut self.controller;
        let surface = &mut self.surface;

        match event {
            StageEvent::ContainerResized(size) => {
                surface.size = size;
                controller.on_container_resized(surface, size)?;
            }
            StageEvent::ContentSizeChanged(size) => {
                controller.on_content_size_changed(surface, size)?;
            }
            StageEvent::Pointer(PointerEvent { kind, point, buttons }) => match kind {
                PointerKind::Enter => controller.on_pointer_enter(point),
                PointerKind::Exit => controller.on_pointer_exit(point),
                PointerKind::Press => {
                    controller
                        .on_pointer_press(&*surface, point)
                        .map_err(WarpError::from)?;
                }
                PointerKind::Release => {
                    controller.on_pointer_release(point);
                }
                PointerKind::Move => {
                    if controller.on_pointer_move(surface, point, buttons)? == MoveOutcome::ImplicitRelease {
                        info!("Drag ended without a release event");
                    }
                }
            },
            StageEvent::Rotate(shift) => {
                controller.rotate_quad(surface, shift)?;
            }
            StageEvent::FlipHorizontal => {
                controller.flip_horizontal(surface)?;
            }
            StageEvent::FlipVertical => {
                controller.flip_vertical(surface)?;
            }
            StageEvent::Refit => {
                info!("Refitting content to stage");
                controller.refit(surface)?;
            }
            StageEvent::SaveLayout => {
                controller.layout().save(&self.layout_path)?;
            }
            StageEvent::LoadLayout => {
                let layout = WarpLayout::load(&self.layout_path)?;
                controller.apply_layout(surface, &layout)?;
            }
        }

        Ok(())
    }

    /// Run the scheduled resize, if any, and answer everyone who asked for it
    fn flush_resize(&mut self) {
        let Some((size, waiters)) = self.resize.take() else {
            return;
        };

        debug!(
            "Applying resize to {}x{} ({} request(s))",
            size.width,
            size.height,
            waiters.len()
        );
        let result = match self.process(StageEvent::ContainerResized(size)) {
            Ok(()) => Ok(()),
            Err(StageError::Warp(e)) => Err(e),
            Err(other) => {
                // Resizing never touches layout files
                warn!("Unexpected resize failure: {}", other);
                Ok(())
            }
        };
        if let Err(e) = &result {
            warn!("Resize to {}x{} failed: {}", size.width, size.height, e);
        }

        let snapshot = self.publish();
        for waiter in waiters {
            let reply = match result {
                Ok(()) => Ok(snapshot.clone()),
                Err(e) => Err(StageError::Warp(e)),
            };
            let _ = waiter.send(reply);
        }
    }

    fn publish(&mut self) -> Arc<WarpSnapshot> {
        self.generation += 1;
        let snapshot = Arc::new(build_snapshot(self.generation, &self.controller, &self.surface));
        self.snapshot.store(snapshot.clone());
        snapshot
    }
}

fn build_snapshot(generation: u64, controller: &WarpController, surface: &StageSurface) -> WarpSnapshot {
    WarpSnapshot {
        generation,
        stage: surface.allocated_size(),
        content: controller.content_size(),
        content_corners: controller.content_corners(),
        view_corners: controller.view_corners(),
        transform: surface.transform().to_column_major(),
        dragging: controller.drag_state().corner(),
        in_bounds: controller.in_bounds(),
    }
}

/// Cloneable sending side of the stage thread
#[derive(Clone)]
pub struct StageHandle {
    tx: mpsc::UnboundedSender<StageRequest>,
    snapshot: Arc<ArcSwap<WarpSnapshot>>,
}

impl StageHandle {
    /// Queue an event and wait for the stage thread to process it
    pub async fn send(&self, event: StageEvent) -> StageReply {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StageRequest { event, reply })
            .map_err(|_| StageError::Stopped)?;
        rx.await.map_err(|_| StageError::Stopped)?
    }

    /// Latest published state, without a round trip to the stage thread
    pub fn snapshot(&self) -> Arc<WarpSnapshot> {
        self.snapshot.load_full()
    }
}

/// Start the stage loop on a blocking thread
pub fn spawn(stage: Stage) -> (StageHandle, tokio::task::JoinHandle<Result<()>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = StageHandle {
        tx,
        snapshot: stage.snapshot_cell(),
    };
    let join = tokio::task::spawn_blocking(move || stage.run(rx));
    (handle, join)
}
