//! Two-point counting-line editor.
//!
//! Pointer events arrive in display space; the line is stored in intrinsic
//! space so it survives any rescaling of the overlay. Every change is
//! published on a `watch` channel which the renderer subscribes to.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, trace};

use super::geometry::{CoordinateMapper, Point, VideoFrameGeometry};
use crate::error::{CountError, Result};

/// Counting line in intrinsic space. Default is the degenerate `(0,0)-(0,0)`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CountingLine {
    pub p1: Point,
    pub p2: Point,
}

impl CountingLine {
    #[must_use]
    pub const fn new(p1: Point, p2: Point) -> Self {
        Self { p1, p2 }
    }

    /// Both endpoints coincide.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        self.p1 == self.p2
    }

    #[must_use]
    pub fn length(&self) -> f64 {
        self.p1.distance(self.p2)
    }

    /// Endpoints rounded to whole pixels, in the `[[x, y], [x, y]]` wire shape.
    ///
    /// Halves round up, so `-2.5` becomes `-2`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_pixel_pairs(&self) -> [[i64; 2]; 2] {
        let px = |v: f64| (v + 0.5).floor() as i64;
        [
            [px(self.p1.x), px(self.p1.y)],
            [px(self.p2.x), px(self.p2.y)],
        ]
    }
}

/// Pointer gesture in progress.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DragState {
    pub active: bool,
    pub anchor: Option<Point>,
    /// Last intrinsic pointer position seen during the drag.
    pub current: Option<Point>,
}

/// What the renderer needs to draw one frame of the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OverlayFrame {
    pub line: CountingLine,
    pub geometry: Option<VideoFrameGeometry>,
    /// A pointer-down has placed the line since the last reset.
    pub placed: bool,
}

/// Stateful line editor; owns the authoritative [`CountingLine`].
pub struct LineAnnotator {
    line: CountingLine,
    drag: DragState,
    geometry: Option<VideoFrameGeometry>,
    placed: bool,
    frames: watch::Sender<OverlayFrame>,
}

impl Default for LineAnnotator {
    fn default() -> Self {
        Self::new()
    }
}

impl LineAnnotator {
    #[must_use]
    pub fn new() -> Self {
        let (frames, _) = watch::channel(OverlayFrame::default());
        Self {
            line: CountingLine::default(),
            drag: DragState::default(),
            geometry: None,
            placed: false,
            frames,
        }
    }

    /// Receive a notification for every visible change of line or geometry.
    pub fn subscribe(&self) -> watch::Receiver<OverlayFrame> {
        self.frames.subscribe()
    }

    /// Install the geometry reported by the video loader.
    ///
    /// Unready geometry leaves the overlay inert until the next call.
    pub fn calibrate(&mut self, geometry: VideoFrameGeometry) -> Result<()> {
        if !geometry.is_ready() {
            debug!(?geometry, "calibration ignored, dimensions not known yet");
            self.geometry = None;
            self.drag = DragState::default();
            self.publish();
            return Err(CountError::GeometryNotReady);
        }
        debug!(
            intrinsic = %format!("{}x{}", geometry.intrinsic_width, geometry.intrinsic_height),
            display = %format!("{}x{}", geometry.display.width, geometry.display.height),
            "overlay calibrated"
        );
        self.geometry = Some(geometry);
        self.publish();
        Ok(())
    }

    /// Forget the current geometry; the overlay goes inert.
    pub fn clear_geometry(&mut self) {
        self.geometry = None;
        self.drag = DragState::default();
        self.publish();
    }

    /// Pointer down. No-op while geometry is unknown.
    pub fn begin_drag(&mut self, display_point: Point) {
        let Some(point) = self.map(display_point) else {
            return;
        };
        self.drag = DragState {
            active: true,
            anchor: Some(point),
            current: Some(point),
        };
        self.line = CountingLine::new(point, point);
        self.placed = true;
        trace!(?point, "drag started");
        self.publish();
    }

    /// Pointer move. Ignored outside a drag.
    pub fn update_drag(&mut self, display_point: Point) {
        let Some(anchor) = self.drag.anchor.filter(|_| self.drag.active) else {
            return;
        };
        let Some(point) = self.map(display_point) else {
            return;
        };
        self.drag.current = Some(point);
        self.line = CountingLine::new(anchor, point);
        self.publish();
    }

    /// Pointer up or pointer leave: keep the line at the last position.
    pub fn end_drag(&mut self) {
        if !self.drag.active {
            return;
        }
        if let (Some(anchor), Some(current)) = (self.drag.anchor, self.drag.current) {
            self.line = CountingLine::new(anchor, current);
        }
        self.drag = DragState::default();
        debug!(line = ?self.line.to_pixel_pairs(), "line finalized");
        self.publish();
    }

    /// Back to the degenerate line.
    pub fn reset(&mut self) {
        self.line = CountingLine::default();
        self.drag = DragState::default();
        self.placed = false;
        self.publish();
    }

    /// New video: degenerate line and unknown geometry.
    pub fn reload(&mut self) {
        self.line = CountingLine::default();
        self.drag = DragState::default();
        self.placed = false;
        self.geometry = None;
        self.publish();
    }

    #[must_use]
    pub fn current_line(&self) -> CountingLine {
        self.line
    }

    #[must_use]
    pub fn geometry(&self) -> Option<VideoFrameGeometry> {
        self.geometry
    }

    #[must_use]
    pub fn is_dragging(&self) -> bool {
        self.drag.active
    }

    #[must_use]
    pub fn drag_state(&self) -> DragState {
        self.drag
    }

    /// Snapshot of what the renderer would currently draw.
    #[must_use]
    pub fn frame(&self) -> OverlayFrame {
        OverlayFrame {
            line: self.line,
            geometry: self.geometry,
            placed: self.placed,
        }
    }

    fn map(&self, display_point: Point) -> Option<Point> {
        let geometry = self.geometry.as_ref()?;
        CoordinateMapper::to_intrinsic(display_point, geometry).ok()
    }

    fn publish(&self) {
        let next = self.frame();
        self.frames.send_if_modified(|frame| {
            if *frame == next {
                false
            } else {
                *frame = next;
                true
            }
        });
    }
}
