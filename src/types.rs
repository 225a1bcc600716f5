//! Core value types shared by the readers, the spatial index and the renderer.

use crate::error::{Result, ShapeError};
use geo::Rect;
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding rectangle.
///
/// The empty envelope (`Envelope::EMPTY`) has inverted infinite bounds so that
/// [`Envelope::expand_to_include`] can accumulate from it directly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    pub const EMPTY: Envelope = Envelope {
        min_x: f64::INFINITY,
        min_y: f64::INFINITY,
        max_x: f64::NEG_INFINITY,
        max_y: f64::NEG_INFINITY,
    };

    /// Create an envelope, normalising swapped corners.
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            min_x: x1.min(x2),
            min_y: y1.min(y2),
            max_x: x1.max(x2),
            max_y: y1.max(y2),
        }
    }

    /// Degenerate envelope covering a single point.
    pub fn point(x: f64, y: f64) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        }
    }

    /// Envelope of an interleaved `x, y` coordinate buffer.
    pub fn from_coords(coords: &[f64]) -> Self {
        let mut env = Self::EMPTY;
        for pair in coords.chunks_exact(2) {
            env.expand_to_include(pair[0], pair[1]);
        }
        env
    }

    pub fn is_empty(&self) -> bool {
        !(self.min_x <= self.max_x && self.min_y <= self.max_y)
    }

    /// True when all four bounds are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.min_x.is_finite()
            && self.min_y.is_finite()
            && self.max_x.is_finite()
            && self.max_y.is_finite()
    }

    pub fn width(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.max_x - self.min_x
        }
    }

    pub fn height(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.max_y - self.min_y
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    pub fn expand_to_include(&mut self, x: f64, y: f64) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    pub fn expand_to_include_envelope(&mut self, other: &Envelope) {
        if other.is_empty() {
            return;
        }
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
    }

    /// Closed-interval intersection test; touching edges intersect.
    pub fn intersects(&self, other: &Envelope) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        !(self.max_x < other.min_x
            || self.min_x > other.max_x
            || self.max_y < other.min_y
            || self.min_y > other.max_y)
    }

    pub fn contains(&self, other: &Envelope) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        other.min_x >= self.min_x
            && other.max_x <= self.max_x
            && other.min_y >= self.min_y
            && other.max_y <= self.max_y
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    pub fn intersection(&self, other: &Envelope) -> Option<Envelope> {
        if !self.intersects(other) {
            return None;
        }
        Some(Envelope {
            min_x: self.min_x.max(other.min_x),
            min_y: self.min_y.max(other.min_y),
            max_x: self.max_x.min(other.max_x),
            max_y: self.max_y.min(other.max_y),
        })
    }

    /// Split into the four quadrants `[SW, SE, NW, NE]`.
    pub fn quadrants(&self) -> [Envelope; 4] {
        let (cx, cy) = self.center();
        [
            Envelope::new(self.min_x, self.min_y, cx, cy),
            Envelope::new(cx, self.min_y, self.max_x, cy),
            Envelope::new(self.min_x, cy, cx, self.max_y),
            Envelope::new(cx, cy, self.max_x, self.max_y),
        ]
    }

    /// Reject envelopes containing NaN or infinite bounds.
    pub fn validate(&self) -> Result<()> {
        if !self.is_finite() {
            return Err(ShapeError::InvalidInput(format!(
                "envelope has non-finite bounds: {self:?}"
            )));
        }
        Ok(())
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl From<Rect<f64>> for Envelope {
    fn from(rect: Rect<f64>) -> Self {
        Envelope::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }
}

impl From<Envelope> for Rect<f64> {
    fn from(env: Envelope) -> Self {
        Rect::new(
            geo::coord! { x: env.min_x, y: env.min_y },
            geo::coord! { x: env.max_x, y: env.max_y },
        )
    }
}

/// Device-space rectangle in whole pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl DeviceRect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle anchored at the origin.
    pub fn sized(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// ESRI shape type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShapeType {
    Null,
    Point,
    PolyLine,
    Polygon,
    MultiPoint,
    PointZ,
    PolyLineZ,
    PolygonZ,
    MultiPointZ,
    PointM,
    PolyLineM,
    PolygonM,
    MultiPointM,
    MultiPatch,
}

impl ShapeType {
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => ShapeType::Null,
            1 => ShapeType::Point,
            3 => ShapeType::PolyLine,
            5 => ShapeType::Polygon,
            8 => ShapeType::MultiPoint,
            11 => ShapeType::PointZ,
            13 => ShapeType::PolyLineZ,
            15 => ShapeType::PolygonZ,
            18 => ShapeType::MultiPointZ,
            21 => ShapeType::PointM,
            23 => ShapeType::PolyLineM,
            25 => ShapeType::PolygonM,
            28 => ShapeType::MultiPointM,
            31 => ShapeType::MultiPatch,
            _ => return None,
        })
    }

    pub fn code(self) -> i32 {
        match self {
            ShapeType::Null => 0,
            ShapeType::Point => 1,
            ShapeType::PolyLine => 3,
            ShapeType::Polygon => 5,
            ShapeType::MultiPoint => 8,
            ShapeType::PointZ => 11,
            ShapeType::PolyLineZ => 13,
            ShapeType::PolygonZ => 15,
            ShapeType::MultiPointZ => 18,
            ShapeType::PointM => 21,
            ShapeType::PolyLineM => 23,
            ShapeType::PolygonM => 25,
            ShapeType::MultiPointM => 28,
            ShapeType::MultiPatch => 31,
        }
    }

    pub fn kind(self) -> ShapeKind {
        match self {
            ShapeType::Null => ShapeKind::Null,
            ShapeType::Point | ShapeType::PointZ | ShapeType::PointM => ShapeKind::Point,
            ShapeType::MultiPoint | ShapeType::MultiPointZ | ShapeType::MultiPointM => {
                ShapeKind::MultiPoint
            }
            ShapeType::PolyLine | ShapeType::PolyLineZ | ShapeType::PolyLineM => ShapeKind::Arc,
            ShapeType::Polygon
            | ShapeType::PolygonZ
            | ShapeType::PolygonM
            | ShapeType::MultiPatch => ShapeKind::Polygon,
        }
    }

    pub fn has_z(self) -> bool {
        matches!(
            self,
            ShapeType::PointZ
                | ShapeType::PolyLineZ
                | ShapeType::PolygonZ
                | ShapeType::MultiPointZ
                | ShapeType::MultiPatch
        )
    }

    /// True for the dedicated measure variants. Z variants may carry an optional M block too.
    pub fn has_m(self) -> bool {
        matches!(
            self,
            ShapeType::PointM | ShapeType::PolyLineM | ShapeType::PolygonM | ShapeType::MultiPointM
        )
    }

    /// Point-like types are the ones the screen map elides per pixel.
    pub fn is_point_like(self) -> bool {
        matches!(self.kind(), ShapeKind::Point | ShapeKind::MultiPoint)
    }
}

/// Geometric family of a [`ShapeType`], used for transform and paint dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    Null,
    Point,
    MultiPoint,
    Arc,
    Polygon,
}
