//! Display ↔ intrinsic coordinate mapping.
//!
//! Display space is the overlay surface as laid out on screen; intrinsic
//! space is the pixel grid of the video itself. Points carry no tag, so the
//! only sanctioned way across is [`CoordinateMapper`].

use serde::{Deserialize, Serialize};

use crate::error::{CountError, Result};

/// A point in either display or intrinsic space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    #[must_use]
    pub fn distance(&self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// On-screen box of the overlay surface (post-layout, not its pixel buffer).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DisplayRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl DisplayRect {
    /// Box of the given size anchored at the origin.
    #[must_use]
    pub const fn sized(width: f64, height: f64) -> Self {
        Self {
            left: 0.0,
            top: 0.0,
            width,
            height,
        }
    }

    /// `true` if `p` lies inside the box (edges inclusive).
    #[must_use]
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.left
            && p.x <= self.left + self.width
            && p.y >= self.top
            && p.y <= self.top + self.height
    }
}

/// Intrinsic video size plus the display box it is shown in.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VideoFrameGeometry {
    pub intrinsic_width: f64,
    pub intrinsic_height: f64,
    pub display: DisplayRect,
}

impl VideoFrameGeometry {
    #[must_use]
    pub const fn new(intrinsic_width: f64, intrinsic_height: f64, display: DisplayRect) -> Self {
        Self {
            intrinsic_width,
            intrinsic_height,
            display,
        }
    }

    /// Geometry whose display box matches the intrinsic size (scale 1).
    #[must_use]
    pub const fn unscaled(width: f64, height: f64) -> Self {
        Self::new(width, height, DisplayRect::sized(width, height))
    }

    /// All four dimensions finite and strictly positive.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        [
            self.intrinsic_width,
            self.intrinsic_height,
            self.display.width,
            self.display.height,
        ]
        .iter()
        .all(|d| d.is_finite() && *d > 0.0)
    }

    /// `(sx, sy)` display → intrinsic scale factors.
    pub fn scale(&self) -> Result<(f64, f64)> {
        if !self.is_ready() {
            return Err(CountError::GeometryNotReady);
        }
        Ok((
            self.intrinsic_width / self.display.width,
            self.intrinsic_height / self.display.height,
        ))
    }
}

/// Converts points between display and intrinsic space.
pub struct CoordinateMapper;

impl CoordinateMapper {
    /// Map a raw pointer position into intrinsic video pixels.
    pub fn to_intrinsic(display_point: Point, geometry: &VideoFrameGeometry) -> Result<Point> {
        let (sx, sy) = geometry.scale()?;
        Ok(Point {
            x: (display_point.x - geometry.display.left) * sx,
            y: (display_point.y - geometry.display.top) * sy,
        })
    }

    /// Exact inverse of [`Self::to_intrinsic`].
    pub fn to_display(intrinsic_point: Point, geometry: &VideoFrameGeometry) -> Result<Point> {
        let (sx, sy) = geometry.scale()?;
        Ok(Point {
            x: intrinsic_point.x / sx + geometry.display.left,
            y: intrinsic_point.y / sy + geometry.display.top,
        })
    }
}
