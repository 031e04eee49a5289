//! Interactive corner-drag warp controller
//!
//! The controller owns the content quad (corners in the content's own
//! coordinates), the view quad (where those corners sit on the stage) and the
//! drag state. Whenever either quad changes it refits the homography between
//! them and pushes the lifted transform into a borrowed [`RenderTarget`].

use thiserror::Error;
use tracing::{debug, info};

use crate::geometry::{Point, Quad, Size, CORNER_LABELS};
use crate::homography::{DegenerateQuadError, Homography, PointTransformError, RenderTransform};
use crate::layout::WarpLayout;

/// Surface the warped content is drawn into
pub trait RenderTarget {
    fn allocated_size(&self) -> Size;
    fn transform(&self) -> RenderTransform;
    fn set_transform(&mut self, transform: RenderTransform);
}

/// Pointer buttons held during an event, using the DOM `buttons` bit layout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ButtonMask(u32);

impl ButtonMask {
    pub const PRIMARY: ButtonMask = ButtonMask(1);

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn contains(&self, other: ButtonMask) -> bool {
        self.0 & other.0 == other.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DragState {
    #[default]
    Idle,
    Dragging { corner: usize },
}

impl DragState {
    pub fn corner(&self) -> Option<usize> {
        match self {
            DragState::Idle => None,
            DragState::Dragging { corner } => Some(*corner),
        }
    }
}

/// What a pointer move did to the warp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// No drag in progress
    Ignored,
    /// The drag button was no longer held, so the drag ended
    ImplicitRelease,
    /// The dragged corner moved and the warp was reapplied
    Warped,
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum WarpError {
    #[error(transparent)]
    Degenerate(#[from] DegenerateQuadError),
    #[error(transparent)]
    PointTransform(#[from] PointTransformError),
}

/// Corner-drag state machine for one warped content instance
#[derive(Debug, Clone)]
pub struct WarpController {
    content_corners: Quad,
    view_corners: Quad,
    content_size: Size,
    container_size: Size,
    drag: DragState,
    in_bounds: bool,
    last_exit: Option<Point>,
    last_pointer: Option<Point>,
}

impl WarpController {
    pub fn new(content_size: Size, container_size: Size) -> Self {
        Self {
            content_corners: Quad::from_size(content_size),
            view_corners: Quad::from_size(container_size),
            content_size,
            container_size,
            drag: DragState::Idle,
            in_bounds: false,
            last_exit: None,
            last_pointer: None,
        }
    }

    pub fn content_corners(&self) -> Quad {
        self.content_corners
    }

    pub fn view_corners(&self) -> Quad {
        self.view_corners
    }

    pub fn content_size(&self) -> Size {
        self.content_size
    }

    pub fn container_size(&self) -> Size {
        self.container_size
    }

    pub fn drag_state(&self) -> DragState {
        self.drag
    }

    pub fn in_bounds(&self) -> bool {
        self.in_bounds
    }

    pub fn on_container_resized<T: RenderTarget + ?Sized>(
        &mut self,
        target: &mut T,
        size: Size,
    ) -> Result<RenderTransform, DegenerateQuadError> {
        if size == self.container_size {
            debug!("Container still {}x{}, keeping warp", size.width, size.height);
            return Ok(target.transform());
        }
        debug!("Container resized to {}x{}", size.width, size.height);
        self.container_size = size;
        self.refit(target)
    }

    pub fn on_content_size_changed<T: RenderTarget + ?Sized>(
        &mut self,
        target: &mut T,
        size: Size,
    ) -> Result<RenderTransform, DegenerateQuadError> {
        if size == self.content_size {
            debug!("Content still {}x{}, keeping warp", size.width, size.height);
            return Ok(target.transform());
        }
        debug!("Content size changed to {}x{}", size.width, size.height);
        self.content_size = size;
        self.refit(target)
    }

    /// Discard any user warp: stretch the whole content over the whole container
    pub fn refit<T: RenderTarget + ?Sized>(
        &mut self,
        target: &mut T,
    ) -> Result<RenderTransform, DegenerateQuadError> {
        self.view_corners = Quad::from_size(self.container_size);
        self.content_corners = Quad::from_size(self.content_size);
        debug!(
            "Refit {}x{} content to {}x{} container",
            self.content_size.width,
            self.content_size.height,
            self.container_size.width,
            self.container_size.height
        );
        self.apply_warp(target)
    }

    /// Solve the current correspondence and install it on `target`.
    /// On failure the target keeps its previous transform.
    pub fn apply_warp<T: RenderTarget + ?Sized>(
        &self,
        target: &mut T,
    ) -> Result<RenderTransform, DegenerateQuadError> {
        let homography = Homography::solve(&self.content_corners, &self.view_corners)?;
        let transform = RenderTransform::lift(&homography);
        target.set_transform(transform);
        Ok(transform)
    }

    pub fn on_pointer_enter(&mut self, point: Point) {
        self.in_bounds = true;
        self.last_pointer = Some(point);
    }

    pub fn on_pointer_exit(&mut self, point: Point) {
        self.in_bounds = false;
        self.last_exit = Some(point);
    }

    /// Start dragging the view corner nearest to `point`.
    ///
    /// The chosen corner pair is snapped to the press location so the drag
    /// continues from exactly where the pointer went down.
    pub fn on_pointer_press<T: RenderTarget + ?Sized>(
        &mut self,
        target: &T,
        point: Point,
    ) -> Result<usize, PointTransformError> {
        let index = self.view_corners.nearest_corner_index(point);
        let content_point = target.transform().unproject_point(point)?;

        self.content_corners = self.content_corners.with_corner(index, content_point);
        self.view_corners = self.view_corners.with_corner(index, point);
        self.drag = DragState::Dragging { corner: index };
        self.last_pointer = Some(point);

        debug!(
            "Dragging {} corner from ({:.1}, {:.1}), content ({:.1}, {:.1})",
            CORNER_LABELS[index], point.x, point.y, content_point.x, content_point.y
        );
        Ok(index)
    }

    pub fn on_pointer_move<T: RenderTarget + ?Sized>(
        &mut self,
        target: &mut T,
        point: Point,
        buttons: ButtonMask,
    ) -> Result<MoveOutcome, DegenerateQuadError> {
        let Some(index) = self.drag.corner() else {
            self.last_pointer = Some(point);
            return Ok(MoveOutcome::Ignored);
        };

        if !buttons.contains(ButtonMask::PRIMARY) {
            // Button went up somewhere we never saw the release
            let at = self.last_exit.or(self.last_pointer).unwrap_or(point);
            debug!("Drag button no longer held, releasing at ({:.1}, {:.1})", at.x, at.y);
            self.on_pointer_release(at);
            return Ok(MoveOutcome::ImplicitRelease);
        }

        self.last_pointer = Some(point);
        self.view_corners = self.view_corners.with_corner(index, point);
        self.apply_warp(target)?;
        Ok(MoveOutcome::Warped)
    }

    /// End the drag, if any. Returns the corner that was being dragged.
    pub fn on_pointer_release(&mut self, point: Point) -> Option<usize> {
        let released = self.drag.corner();
        if let Some(index) = released {
            debug!(
                "Released {} corner at ({:.1}, {:.1})",
                CORNER_LABELS[index], point.x, point.y
            );
        }
        self.drag = DragState::Idle;
        released
    }

    /// Rotate the content 90 degrees `shift` times; negative is counter-clockwise
    pub fn rotate_quad<T: RenderTarget + ?Sized>(
        &mut self,
        target: &mut T,
        shift: i32,
    ) -> Result<RenderTransform, DegenerateQuadError> {
        info!("Rotating content by {} quarter turn(s)", shift);
        self.content_corners = self.content_corners.rotated(shift);
        self.apply_warp(target)
    }

    pub fn flip_horizontal<T: RenderTarget + ?Sized>(
        &mut self,
        target: &mut T,
    ) -> Result<RenderTransform, DegenerateQuadError> {
        info!("Flipping content horizontally");
        self.content_corners = self.content_corners.flipped_horizontal();
        self.apply_warp(target)
    }

    pub fn flip_vertical<T: RenderTarget + ?Sized>(
        &mut self,
        target: &mut T,
    ) -> Result<RenderTransform, DegenerateQuadError> {
        info!("Flipping content vertically");
        self.content_corners = self.content_corners.flipped_vertical();
        self.apply_warp(target)
    }

    pub fn layout(&self) -> WarpLayout {
        WarpLayout {
            content: self.content_corners,
            view: self.view_corners,
        }
    }

    /// Install a saved layout. A degenerate layout is rejected and the
    /// previous quads stay in place.
    pub fn apply_layout<T: RenderTarget + ?Sized>(
        &mut self,
        target: &mut T,
        layout: &WarpLayout,
    ) -> Result<RenderTransform, DegenerateQuadError> {
        let previous = self.layout();
        self.content_corners = layout.content;
        self.view_corners = layout.view;
        match self.apply_warp(target) {
            Ok(transform) => {
                self.drag = DragState::Idle;
                Ok(transform)
            }
            Err(e) => {
                self.content_corners = previous.content;
                self.view_corners = previous.view;
                Err(e)
            }
        }
    }
}
