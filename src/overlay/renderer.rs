//! Overlay rendering of the counting line.
//!
//! The renderer is a pure function of `(line, geometry)`: it clears the
//! surface, maps both endpoints back to display space and draws the segment
//! with a marker on each end. Two surfaces are provided: a `tiny-skia`
//! pixmap (exportable as PNG) and a recorded [`DrawList`].

use std::path::Path;

use tiny_skia::{FillRule, LineCap, Paint, PathBuilder, Pixmap, Stroke, Transform};
use tokio::sync::watch;
use tracing::trace;

use super::annotator::{CountingLine, OverlayFrame};
use super::geometry::{CoordinateMapper, Point, VideoFrameGeometry};
use crate::error::{CountError, Result};

/// Straight RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba(pub [u8; 4]);

impl Rgba {
    pub const YELLOW: Self = Self([255, 255, 0, 255]);
    pub const RED: Self = Self([255, 0, 0, 255]);

    fn paint(self) -> Paint<'static> {
        let [r, g, b, a] = self.0;
        let mut paint = Paint::default();
        paint.set_color_rgba8(r, g, b, a);
        paint.anti_alias = true;
        paint
    }
}

/// Line and marker styling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    pub line_color: Rgba,
    pub line_width: f32,
    pub marker_color: Rgba,
    pub marker_radius: f32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            line_color: Rgba::YELLOW,
            line_width: 2.0,
            marker_color: Rgba::RED,
            marker_radius: 5.0,
        }
    }
}

/// Something the overlay can be drawn on.
///
/// Coordinates are local to the surface: `(0, 0)` is the top-left corner of
/// the display box.
pub trait OverlaySurface {
    fn clear(&mut self);
    fn stroke_segment(&mut self, from: Point, to: Point, color: Rgba, width: f32);
    fn fill_marker(&mut self, center: Point, radius: f32, color: Rgba);
}

/// Recorded draw command.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Segment {
        from: Point,
        to: Point,
        color: Rgba,
        width: f32,
    },
    Marker {
        center: Point,
        radius: f32,
        color: Rgba,
    },
}

/// Surface that keeps the commands currently visible on it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrawList {
    commands: Vec<DrawCommand>,
}

impl DrawList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl OverlaySurface for DrawList {
    fn clear(&mut self) {
        self.commands.clear();
    }

    fn stroke_segment(&mut self, from: Point, to: Point, color: Rgba, width: f32) {
        self.commands.push(DrawCommand::Segment {
            from,
            to,
            color,
            width,
        });
    }

    fn fill_marker(&mut self, center: Point, radius: f32, color: Rgba) {
        self.commands.push(DrawCommand::Marker {
            center,
            radius,
            color,
        });
    }
}

/// Transparent RGBA raster the size of the display box.
pub struct PixmapSurface {
    pixmap: Pixmap,
}

impl PixmapSurface {
    /// Allocate a surface; fails on a zero-sized box.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn for_display(geometry: &VideoFrameGeometry) -> Result<Self> {
        if !geometry.is_ready() {
            return Err(CountError::GeometryNotReady);
        }
        let width = geometry.display.width.ceil() as u32;
        let height = geometry.display.height.ceil() as u32;
        Self::new(width, height)
    }

    pub fn new(width: u32, height: u32) -> Result<Self> {
        let pixmap = Pixmap::new(width, height).ok_or(CountError::GeometryNotReady)?;
        Ok(Self { pixmap })
    }

    #[must_use]
    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    /// Alpha of the pixel at `(x, y)`, `None` outside the surface.
    #[must_use]
    pub fn alpha_at(&self, x: u32, y: u32) -> Option<u8> {
        self.pixmap.pixel(x, y).map(|p| p.alpha())
    }

    pub fn save_png(&self, path: &Path) -> Result<()> {
        self.pixmap
            .save_png(path)
            .map_err(|e| CountError::Io(std::io::Error::other(e.to_string())))
    }
}

impl OverlaySurface for PixmapSurface {
    fn clear(&mut self) {
        self.pixmap.fill(tiny_skia::Color::TRANSPARENT);
    }

    #[allow(clippy::cast_possible_truncation)]
    fn stroke_segment(&mut self, from: Point, to: Point, color: Rgba, width: f32) {
        let mut pb = PathBuilder::new();
        pb.move_to(from.x as f32, from.y as f32);
        pb.line_to(to.x as f32, to.y as f32);
        let Some(path) = pb.finish() else {
            return;
        };
        let stroke = Stroke {
            width,
            line_cap: LineCap::Round,
            ..Default::default()
        };
        self.pixmap
            .stroke_path(&path, &color.paint(), &stroke, Transform::identity(), None);
    }

    #[allow(clippy::cast_possible_truncation)]
    fn fill_marker(&mut self, center: Point, radius: f32, color: Rgba) {
        let Some(path) = PathBuilder::from_circle(center.x as f32, center.y as f32, radius) else {
            return;
        };
        self.pixmap.fill_path(
            &path,
            &color.paint(),
            FillRule::Winding,
            Transform::identity(),
            None,
        );
    }
}

/// Draws the counting line onto an [`OverlaySurface`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CanvasRenderer {
    style: OverlayStyle,
}

impl CanvasRenderer {
    #[must_use]
    pub fn new(style: OverlayStyle) -> Self {
        Self { style }
    }

    /// Redraw the surface for `line`. Returns `true` if anything was drawn.
    ///
    /// Unready geometry leaves the surface cleared. A degenerate line is
    /// drawn as its two coincident markers.
    pub fn render<S: OverlaySurface + ?Sized>(
        &self,
        surface: &mut S,
        line: &CountingLine,
        geometry: Option<&VideoFrameGeometry>,
    ) -> bool {
        surface.clear();
        let Some(geometry) = geometry.filter(|g| g.is_ready()) else {
            return false;
        };
        let (Ok(a), Ok(b)) = (
            CoordinateMapper::to_display(line.p1, geometry),
            CoordinateMapper::to_display(line.p2, geometry),
        ) else {
            return false;
        };
        let origin = Point::new(geometry.display.left, geometry.display.top);
        let a = Point::new(a.x - origin.x, a.y - origin.y);
        let b = Point::new(b.x - origin.x, b.y - origin.y);

        surface.stroke_segment(a, b, self.style.line_color, self.style.line_width);
        surface.fill_marker(a, self.style.marker_radius, self.style.marker_color);
        surface.fill_marker(b, self.style.marker_radius, self.style.marker_color);
        trace!(?a, ?b, "overlay drawn");
        true
    }

    /// Render a published frame. Until a line has been placed the surface
    /// is only cleared.
    pub fn render_frame<S: OverlaySurface + ?Sized>(&self, surface: &mut S, frame: &OverlayFrame) -> bool {
        if !frame.placed {
            surface.clear();
            return false;
        }
        self.render(surface, &frame.line, frame.geometry.as_ref())
    }

    /// Redraw if the annotator published a new frame since the last call.
    ///
    /// Returns `true` when a redraw happened.
    pub fn redraw_on_change<S: OverlaySurface + ?Sized>(
        &self,
        frames: &mut watch::Receiver<OverlayFrame>,
        surface: &mut S,
    ) -> bool {
        if !frames.has_changed().unwrap_or(false) {
            return false;
        }
        let frame = *frames.borrow_and_update();
        self.render_frame(surface, &frame);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::annotator::LineAnnotator;
    use crate::overlay::geometry::DisplayRect;

    fn geometry() -> VideoFrameGeometry {
        VideoFrameGeometry::new(1280.0, 720.0, DisplayRect::sized(640.0, 360.0))
    }

    fn line() -> CountingLine {
        CountingLine::new(Point::new(20.0, 20.0), Point::new(100.0, 60.0))
    }

    #[test]
    fn draws_segment_and_two_markers_in_display_space() {
        let mut list = DrawList::new();
        assert!(CanvasRenderer::default().render(&mut list, &line(), Some(&geometry())));
        assert_eq!(
            list.commands(),
            &[
                DrawCommand::Segment {
                    from: Point::new(10.0, 10.0),
                    to: Point::new(50.0, 30.0),
                    color: Rgba::YELLOW,
                    width: 2.0,
                },
                DrawCommand::Marker {
                    center: Point::new(10.0, 10.0),
                    radius: 5.0,
                    color: Rgba::RED,
                },
                DrawCommand::Marker {
                    center: Point::new(50.0, 30.0),
                    radius: 5.0,
                    color: Rgba::RED,
                },
            ]
        );
    }

    #[test]
    fn render_is_idempotent() {
        let renderer = CanvasRenderer::default();
        let mut list = DrawList::new();
        renderer.render(&mut list, &line(), Some(&geometry()));
        let first = list.clone();
        renderer.render(&mut list, &line(), Some(&geometry()));
        assert_eq!(first, list);
    }

    #[test]
    fn unready_geometry_renders_nothing() {
        let renderer = CanvasRenderer::default();
        let mut list = DrawList::new();
        renderer.render(&mut list, &line(), Some(&geometry()));
        assert!(!list.is_empty());

        assert!(!renderer.render(&mut list, &line(), None));
        assert!(list.is_empty());

        let zero = VideoFrameGeometry::new(0.0, 720.0, DisplayRect::sized(640.0, 360.0));
        assert!(!renderer.render(&mut list, &line(), Some(&zero)));
        assert!(list.is_empty());
    }

    #[test]
    fn surface_coordinates_are_local_to_display_box() {
        let g = VideoFrameGeometry::new(
            1280.0,
            720.0,
            DisplayRect {
                left: 300.0,
                top: 100.0,
                width: 640.0,
                height: 360.0,
            },
        );
        let mut list = DrawList::new();
        CanvasRenderer::default().render(&mut list, &line(), Some(&g));
        assert!(matches!(
            list.commands()[0],
            DrawCommand::Segment { from, .. } if from == Point::new(10.0, 10.0)
        ));
    }

    #[test]
    fn redraws_only_on_published_change() {
        let mut annotator = LineAnnotator::new();
        let mut frames = annotator.subscribe();
        let renderer = CanvasRenderer::default();
        let mut list = DrawList::new();

        assert!(!renderer.redraw_on_change(&mut frames, &mut list));

        annotator.calibrate(geometry()).unwrap();
        annotator.begin_drag(Point::new(10.0, 10.0));
        annotator.update_drag(Point::new(50.0, 30.0));
        assert!(renderer.redraw_on_change(&mut frames, &mut list));
        assert_eq!(list.commands().len(), 3);
        assert!(!renderer.redraw_on_change(&mut frames, &mut list));
    }

    #[test]
    fn click_at_origin_is_drawn_but_untouched_overlay_is_not() {
        let renderer = CanvasRenderer::default();
        let mut annotator = LineAnnotator::new();
        annotator.calibrate(geometry()).unwrap();
        let mut list = DrawList::new();

        assert!(!renderer.render_frame(&mut list, &annotator.frame()));
        assert!(list.is_empty());

        annotator.begin_drag(Point::new(0.0, 0.0));
        annotator.end_drag();
        assert_eq!(annotator.current_line(), CountingLine::default());
        assert!(renderer.render_frame(&mut list, &annotator.frame()));
        assert_eq!(list.commands().len(), 3);

        annotator.reset();
        assert!(!renderer.render_frame(&mut list, &annotator.frame()));
        assert!(list.is_empty());
    }

    #[test]
    fn pixmap_surface_paints_line_pixels() {
        let g = geometry();
        let mut surface = PixmapSurface::for_display(&g).unwrap();
        CanvasRenderer::default().render(&mut surface, &line(), Some(&g));
        // Marker centre and a point midway along the segment are opaque.
        assert_eq!(surface.alpha_at(10, 10), Some(255));
        assert!(surface.alpha_at(30, 20).unwrap() > 0);
        // Far corner untouched.
        assert_eq!(surface.alpha_at(600, 300), Some(0));
    }

    #[test]
    fn pixmap_surface_rejects_unready_geometry() {
        assert!(PixmapSurface::for_display(&VideoFrameGeometry::default()).is_err());
    }
}
