//! Counting-line overlay: coordinate mapping, line editing, rendering.
//!
//! # Example
//!
//! ```rust
//! use linecount::overlay::{
//!     CanvasRenderer, DisplayRect, DrawList, LineAnnotator, Point, VideoFrameGeometry,
//! };
//!
//! let mut annotator = LineAnnotator::new();
//! annotator
//!     .calibrate(VideoFrameGeometry::new(1280.0, 720.0, DisplayRect::sized(640.0, 360.0)))
//!     .unwrap();
//! annotator.begin_drag(Point::new(10.0, 10.0));
//! annotator.update_drag(Point::new(50.0, 30.0));
//! annotator.end_drag();
//! assert_eq!(annotator.current_line().to_pixel_pairs(), [[20, 20], [100, 60]]);
//!
//! let mut surface = DrawList::new();
//! CanvasRenderer::default().render_frame(&mut surface, &annotator.frame());
//! assert_eq!(surface.commands().len(), 3);
//! ```

pub mod annotator;
pub mod geometry;
pub mod renderer;

pub use annotator::{CountingLine, DragState, LineAnnotator, OverlayFrame};
pub use geometry::{CoordinateMapper, DisplayRect, Point, VideoFrameGeometry};
pub use renderer::{
    CanvasRenderer, DrawCommand, DrawList, OverlayStyle, OverlaySurface, PixmapSurface, Rgba,
};
