//! Coordinate transforms and the per-vertex failure policy applied while rendering.
//!
//! A single vertex that a projection cannot handle (a pole, a point outside the
//! projection's domain) should not drop the whole feature. [`transform`] substitutes
//! failed vertices instead:
//!
//! - point and multipoint shapes replace a failed pair with the first pair that did
//!   transform, and fail only when every pair fails;
//! - arcs and polygons replace a failed vertex with its nearest transformed
//!   predecessor, and fail when the very first vertex fails.

use crate::error::{Result, ShapeError, TransformError};
use crate::types::{DeviceRect, Envelope, ShapeKind};

/// A 2D coordinate mapping.
pub trait CoordinateTransform {
    fn transform_point(&self, x: f64, y: f64) -> std::result::Result<(f64, f64), TransformError>;
}

impl<F> CoordinateTransform for F
where
    F: Fn(f64, f64) -> std::result::Result<(f64, f64), TransformError>,
{
    fn transform_point(&self, x: f64, y: f64) -> std::result::Result<(f64, f64), TransformError> {
        self(x, y)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentityTransform;

impl CoordinateTransform for IdentityTransform {
    fn transform_point(&self, x: f64, y: f64) -> std::result::Result<(f64, f64), TransformError> {
        Ok((x, y))
    }
}

/// `x' = m00 x + m01 y + m02`, `y' = m10 x + m11 y + m12`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub m00: f64,
    pub m01: f64,
    pub m02: f64,
    pub m10: f64,
    pub m11: f64,
    pub m12: f64,
}

impl AffineTransform {
    pub const IDENTITY: AffineTransform = AffineTransform {
        m00: 1.0,
        m01: 0.0,
        m02: 0.0,
        m10: 0.0,
        m11: 1.0,
        m12: 0.0,
    };

    pub fn scale_translate(sx: f64, sy: f64, tx: f64, ty: f64) -> Self {
        Self {
            m00: sx,
            m01: 0.0,
            m02: tx,
            m10: 0.0,
            m11: sy,
            m12: ty,
        }
    }

    /// Map `world` onto `device`, flipping the y axis so north is up.
    pub fn world_to_screen(world: &Envelope, device: &DeviceRect) -> Result<Self> {
        if world.is_empty() || !world.is_finite() || world.width() <= 0.0 || world.height() <= 0.0
        {
            return Err(ShapeError::InvalidInput(format!(
                "cannot map degenerate envelope {world:?} to the screen"
            )));
        }
        if device.is_empty() {
            return Err(ShapeError::InvalidInput("device rectangle is empty".into()));
        }
        let sx = f64::from(device.width) / world.width();
        let sy = f64::from(device.height) / world.height();
        Ok(Self::scale_translate(
            sx,
            -sy,
            f64::from(device.x) - world.min_x * sx,
            f64::from(device.y) + world.max_y * sy,
        ))
    }

    pub fn determinant(&self) -> f64 {
        self.m00 * self.m11 - self.m01 * self.m10
    }

    pub fn inverse(&self) -> Option<Self> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        Some(Self {
            m00: self.m11 / det,
            m01: -self.m01 / det,
            m02: (self.m01 * self.m12 - self.m11 * self.m02) / det,
            m10: -self.m10 / det,
            m11: self.m00 / det,
            m12: (self.m10 * self.m02 - self.m00 * self.m12) / det,
        })
    }

    /// Transform an envelope by its four corners.
    pub fn transform_envelope(&self, envelope: &Envelope) -> Envelope {
        if envelope.is_empty() {
            return Envelope::EMPTY;
        }
        let mut out = Envelope::EMPTY;
        for (x, y) in [
            (envelope.min_x, envelope.min_y),
            (envelope.max_x, envelope.min_y),
            (envelope.min_x, envelope.max_y),
            (envelope.max_x, envelope.max_y),
        ] {
            out.expand_to_include(
                self.m00 * x + self.m01 * y + self.m02,
                self.m10 * x + self.m11 * y + self.m12,
            );
        }
        out
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl CoordinateTransform for AffineTransform {
    fn transform_point(&self, x: f64, y: f64) -> std::result::Result<(f64, f64), TransformError> {
        let tx = self.m00 * x + self.m01 * y + self.m02;
        let ty = self.m10 * x + self.m11 * y + self.m12;
        if tx.is_finite() && ty.is_finite() {
            Ok((tx, ty))
        } else {
            Err(TransformError::new(x, y, "non-finite result"))
        }
    }
}

/// Apply `first`, then `second`.
#[derive(Debug, Clone, Copy)]
pub struct ChainedTransform<A, B> {
    pub first: A,
    pub second: B,
}

impl<A, B> ChainedTransform<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A, B> CoordinateTransform for ChainedTransform<A, B>
where
    A: CoordinateTransform,
    B: CoordinateTransform,
{
    fn transform_point(&self, x: f64, y: f64) -> std::result::Result<(f64, f64), TransformError> {
        let (ix, iy) = self.first.transform_point(x, y)?;
        self.second.transform_point(ix, iy)
    }
}

/// Transform interleaved `src` coordinates into `dest`, substituting failed vertices.
///
/// Returns the number of substituted vertices. `dest` must be at least as long as
/// `src`; on error it is left partially written.
pub fn transform<T>(kind: ShapeKind, transform: &T, src: &[f64], dest: &mut [f64]) -> Result<usize>
where
    T: CoordinateTransform + ?Sized,
{
    if src.len() % 2 != 0 {
        return Err(ShapeError::InvalidInput(format!(
            "coordinate buffer has odd length {}",
            src.len()
        )));
    }
    if dest.len() < src.len() {
        return Err(ShapeError::InvalidInput(format!(
            "destination holds {} values, source has {}",
            dest.len(),
            src.len()
        )));
    }

    match kind {
        ShapeKind::Null => Ok(0),
        ShapeKind::Point | ShapeKind::MultiPoint => transform_points(transform, src, dest),
        ShapeKind::Arc | ShapeKind::Polygon => transform_path(transform, src, dest),
    }
}

fn transform_points<T>(transform: &T, src: &[f64], dest: &mut [f64]) -> Result<usize>
where
    T: CoordinateTransform + ?Sized,
{
    let mut failed: Vec<usize> = Vec::new();
    let mut first_ok: Option<(f64, f64)> = None;
    let mut first_err: Option<TransformError> = None;

    for (i, pair) in src.chunks_exact(2).enumerate() {
        match transform.transform_point(pair[0], pair[1]) {
            Ok((x, y)) => {
                dest[i * 2] = x;
                dest[i * 2 + 1] = y;
                first_ok.get_or_insert((x, y));
            }
            Err(e) => {
                failed.push(i);
                first_err.get_or_insert(e);
            }
        }
    }

    if failed.is_empty() {
        return Ok(0);
    }
    let Some((x, y)) = first_ok else {
        return Err(first_err
            .unwrap_or_else(|| TransformError::new(f64::NAN, f64::NAN, "no coordinates"))
            .into());
    };
    for &i in &failed {
        dest[i * 2] = x;
        dest[i * 2 + 1] = y;
    }
    log::trace!("substituted {} of {} points", failed.len(), src.len() / 2);
    Ok(failed.len())
}

fn transform_path<T>(transform: &T, src: &[f64], dest: &mut [f64]) -> Result<usize>
where
    T: CoordinateTransform + ?Sized,
{
    let mut substituted = 0;
    for (i, pair) in src.chunks_exact(2).enumerate() {
        match transform.transform_point(pair[0], pair[1]) {
            Ok((x, y)) => {
                dest[i * 2] = x;
                dest[i * 2 + 1] = y;
            }
            Err(e) if i == 0 => return Err(e.into()),
            Err(_) => {
                dest[i * 2] = dest[i * 2 - 2];
                dest[i * 2 + 1] = dest[i * 2 - 1];
                substituted += 1;
            }
        }
    }
    Ok(substituted)
}

/// Drop vertices closer than one span to the previously kept vertex.
///
/// Works per part: the first and last vertex of every part are kept, so closed rings
/// stay closed and no part shrinks below two vertices (unless it had fewer).
/// `parts` is rewritten in place; returns the number of vertices removed.
pub fn decimate(coords: &mut Vec<f64>, parts: &mut [u32], span_x: f64, span_y: f64) -> usize {
    let num_points = coords.len() / 2;
    if num_points == 0 || !(span_x > 0.0 && span_y > 0.0) {
        return 0;
    }

    let starts: Vec<usize> = parts.iter().map(|&p| p as usize).collect();
    let mut write = 0usize;
    for (part, &start) in starts.iter().enumerate() {
        let end = starts
            .get(part + 1)
            .copied()
            .unwrap_or(num_points)
            .min(num_points);
        parts[part] = write as u32;
        if start >= end {
            continue;
        }

        let mut kept = (coords[start * 2], coords[start * 2 + 1]);
        coords[write * 2] = kept.0;
        coords[write * 2 + 1] = kept.1;
        write += 1;

        for i in start + 1..end {
            let (x, y) = (coords[i * 2], coords[i * 2 + 1]);
            let is_last = i + 1 == end;
            if !is_last && (x - kept.0).abs() < span_x && (y - kept.1).abs() < span_y {
                continue;
            }
            coords[write * 2] = x;
            coords[write * 2 + 1] = y;
            write += 1;
            kept = (x, y);
        }
    }

    let removed = num_points - write;
    coords.truncate(write * 2);
    removed
}
