//! Little-endian record body codec for every ESRI shape type.
//!
//! Record bodies start with the shape type code. Bounds-carrying types follow with
//! `xmin, ymin, xmax, ymax`, which is all [`decode_envelope`] reads.

use crate::error::{Result, ShapeError};
use crate::shape::{MultiPointShape, PartShape, Parts, PatchShape, PointShape, Shape};
use crate::types::{Envelope, ShapeKind, ShapeType};
use bytes::{Buf, BufMut, BytesMut};

/// Measures below this value mean "no data".
pub const NO_DATA: f64 = -1.0e38;
const NO_DATA_WRITTEN: f64 = -1.0e39;

struct Cursor<'a> {
    buf: &'a [u8],
    ordinal: usize,
}

impl<'a> Cursor<'a> {
    fn need(&self, bytes: usize) -> Result<()> {
        if self.buf.remaining() < bytes {
            return Err(ShapeError::decode(
                self.ordinal,
                format!(
                    "record truncated: need {bytes} bytes, {} left",
                    self.buf.remaining()
                ),
            ));
        }
        Ok(())
    }

    fn i32(&mut self) -> Result<i32> {
        self.need(4)?;
        Ok(self.buf.get_i32_le())
    }

    fn f64(&mut self) -> Result<f64> {
        self.need(8)?;
        Ok(self.buf.get_f64_le())
    }

    fn count(&mut self, what: &str) -> Result<usize> {
        let n = self.i32()?;
        usize::try_from(n)
            .map_err(|_| ShapeError::decode(self.ordinal, format!("negative {what} count {n}")))
    }

    fn envelope(&mut self) -> Result<Envelope> {
        self.need(32)?;
        Ok(Envelope {
            min_x: self.buf.get_f64_le(),
            min_y: self.buf.get_f64_le(),
            max_x: self.buf.get_f64_le(),
            max_y: self.buf.get_f64_le(),
        })
    }

    fn doubles(&mut self, n: usize) -> Result<Vec<f64>> {
        let bytes = n
            .checked_mul(8)
            .ok_or_else(|| ShapeError::decode(self.ordinal, "coordinate count overflow"))?;
        self.need(bytes)?;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.buf.get_f64_le());
        }
        Ok(out)
    }

    /// Range followed by `n` values.
    fn measures(&mut self, n: usize) -> Result<Vec<f64>> {
        self.need(16)?;
        self.buf.advance(16);
        self.doubles(n)
    }

    /// Optional trailing measure block, present only if enough bytes remain.
    fn optional_measures(&mut self, n: usize) -> Result<Option<Vec<f64>>> {
        if self.buf.remaining() >= 16 + n * 8 {
            self.measures(n).map(Some)
        } else {
            Ok(None)
        }
    }

    fn parts(&mut self, num_parts: usize, num_points: usize) -> Result<Parts> {
        self.need(num_parts.saturating_mul(4))?;
        let mut parts = Parts::with_capacity(num_parts);
        let mut previous = 0u32;
        for i in 0..num_parts {
            let start = self.buf.get_i32_le();
            let valid = start >= 0
                && (start as usize) <= num_points
                && (i > 0 || start == 0)
                && start as u32 >= previous;
            if !valid {
                return Err(ShapeError::decode(
                    self.ordinal,
                    format!("part {i} starts at invalid index {start}"),
                ));
            }
            previous = start as u32;
            parts.push(start as u32);
        }
        Ok(parts)
    }
}

fn shape_type_of(buf: &[u8], ordinal: usize) -> Result<ShapeType> {
    let mut cursor = Cursor { buf, ordinal };
    let code = cursor.i32()?;
    ShapeType::from_code(code)
        .ok_or_else(|| ShapeError::decode(ordinal, format!("unknown shape type {code}")))
}

/// Read only the shape type and bounds of a record body.
pub fn decode_envelope(content: &[u8], ordinal: usize) -> Result<(ShapeType, Envelope)> {
    let shape_type = shape_type_of(content, ordinal)?;
    let mut cursor = Cursor {
        buf: &content[4..],
        ordinal,
    };
    let envelope = match shape_type.kind() {
        ShapeKind::Null => Envelope::EMPTY,
        ShapeKind::Point => {
            let x = cursor.f64()?;
            let y = cursor.f64()?;
            Envelope::point(x, y)
        }
        _ => cursor.envelope()?,
    };
    Ok((shape_type, envelope))
}

/// Decode a full record body.
pub fn decode_shape(content: &[u8], ordinal: usize) -> Result<Shape> {
    let shape_type = shape_type_of(content, ordinal)?;
    let mut c = Cursor {
        buf: &content[4..],
        ordinal,
    };

    let shape = match shape_type {
        ShapeType::Null => Shape::Null,
        ShapeType::Point | ShapeType::PointM | ShapeType::PointZ => {
            let x = c.f64()?;
            let y = c.f64()?;
            let z = if shape_type == ShapeType::PointZ {
                Some(c.f64()?)
            } else {
                None
            };
            let m = match shape_type {
                ShapeType::PointM => Some(c.f64()?),
                ShapeType::PointZ if c.buf.remaining() >= 8 => Some(c.f64()?),
                _ => None,
            }
            .filter(|m| *m > NO_DATA);
            Shape::Point(PointShape {
                shape_type,
                x,
                y,
                z,
                m,
            })
        }
        ShapeType::MultiPoint | ShapeType::MultiPointZ | ShapeType::MultiPointM => {
            let bbox = c.envelope()?;
            let n = c.count("point")?;
            let coords = c.doubles(n.saturating_mul(2))?;
            let z = if shape_type.has_z() {
                Some(c.measures(n)?)
            } else {
                None
            };
            let m = if shape_type.has_m() {
                Some(c.measures(n)?)
            } else if shape_type.has_z() {
                c.optional_measures(n)?
            } else {
                None
            };
            Shape::MultiPoint(MultiPointShape {
                shape_type,
                bbox,
                coords,
                z,
                m,
            })
        }
        ShapeType::PolyLine
        | ShapeType::PolyLineZ
        | ShapeType::PolyLineM
        | ShapeType::Polygon
        | ShapeType::PolygonZ
        | ShapeType::PolygonM => {
            let bbox = c.envelope()?;
            let num_parts = c.count("part")?;
            let num_points = c.count("point")?;
            let parts = c.parts(num_parts, num_points)?;
            let coords = c.doubles(num_points.saturating_mul(2))?;
            let z = if shape_type.has_z() {
                Some(c.measures(num_points)?)
            } else {
                None
            };
            let m = if shape_type.has_m() {
                Some(c.measures(num_points)?)
            } else if shape_type.has_z() {
                c.optional_measures(num_points)?
            } else {
                None
            };
            let part_shape = PartShape {
                shape_type,
                bbox,
                parts,
                coords,
                z,
                m,
            };
            if shape_type.kind() == ShapeKind::Arc {
                Shape::PolyLine(part_shape)
            } else {
                Shape::Polygon(part_shape)
            }
        }
        ShapeType::MultiPatch => {
            let bbox = c.envelope()?;
            let num_parts = c.count("part")?;
            let num_points = c.count("point")?;
            let parts = c.parts(num_parts, num_points)?;
            c.need(num_parts.saturating_mul(4))?;
            let part_types = (0..num_parts).map(|_| c.buf.get_i32_le()).collect();
            let coords = c.doubles(num_points.saturating_mul(2))?;
            let z = c.measures(num_points)?;
            let m = c.optional_measures(num_points)?;
            Shape::MultiPatch(PatchShape {
                bbox,
                parts,
                part_types,
                coords,
                z,
                m,
            })
        }
    };
    Ok(shape)
}

/// Length in bytes of the encoded record body.
pub fn encoded_len(shape: &Shape) -> usize {
    let shape_type = shape.shape_type();
    let n = shape.num_points();
    let measure_block = |present: bool| if present { 16 + n * 8 } else { 0 };
    4 + match shape {
        Shape::Null => 0,
        Shape::Point(p) => match p.shape_type {
            ShapeType::PointZ => 32,
            ShapeType::PointM => 24,
            _ => 16,
        },
        Shape::MultiPoint(p) => {
            36 + n * 16
                + measure_block(shape_type.has_z())
                + measure_block(shape_type.has_m() || p.m.is_some())
        }
        Shape::PolyLine(p) | Shape::Polygon(p) => {
            40 + p.parts.len() * 4
                + n * 16
                + measure_block(shape_type.has_z())
                + measure_block(shape_type.has_m() || p.m.is_some())
        }
        Shape::MultiPatch(p) => {
            40 + p.parts.len() * 8 + n * 16 + measure_block(true) + measure_block(p.m.is_some())
        }
    }
}

fn put_envelope(out: &mut BytesMut, env: &Envelope) {
    out.put_f64_le(env.min_x);
    out.put_f64_le(env.min_y);
    out.put_f64_le(env.max_x);
    out.put_f64_le(env.max_y);
}

fn put_measures(out: &mut BytesMut, values: &[f64], n: usize) {
    let (lo, hi) = range(values);
    out.put_f64_le(lo);
    out.put_f64_le(hi);
    for i in 0..n {
        out.put_f64_le(values.get(i).copied().unwrap_or(NO_DATA_WRITTEN));
    }
}

fn range(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        })
}

fn put_parts(out: &mut BytesMut, parts: &[u32]) {
    for start in parts {
        out.put_i32_le(*start as i32);
    }
}

fn put_coords(out: &mut BytesMut, coords: &[f64]) {
    for v in coords {
        out.put_f64_le(*v);
    }
}

/// Append the encoded record body of `shape` to `out`.
pub fn encode_shape(shape: &Shape, out: &mut BytesMut) {
    out.reserve(encoded_len(shape));
    let shape_type = shape.shape_type();
    out.put_i32_le(shape_type.code());
    let n = shape.num_points();

    match shape {
        Shape::Null => {}
        Shape::Point(p) => {
            out.put_f64_le(p.x);
            out.put_f64_le(p.y);
            match p.shape_type {
                ShapeType::PointZ => {
                    out.put_f64_le(p.z.unwrap_or(0.0));
                    out.put_f64_le(p.m.unwrap_or(NO_DATA_WRITTEN));
                }
                ShapeType::PointM => out.put_f64_le(p.m.unwrap_or(NO_DATA_WRITTEN)),
                _ => {}
            }
        }
        Shape::MultiPoint(p) => {
            put_envelope(out, &p.bbox);
            out.put_i32_le(n as i32);
            put_coords(out, &p.coords);
            if shape_type.has_z() {
                put_measures(out, p.z.as_deref().unwrap_or_default(), n);
            }
            if shape_type.has_m() || p.m.is_some() {
                put_measures(out, p.m.as_deref().unwrap_or_default(), n);
            }
        }
        Shape::PolyLine(p) | Shape::Polygon(p) => {
            put_envelope(out, &p.bbox);
            out.put_i32_le(p.parts.len() as i32);
            out.put_i32_le(n as i32);
            put_parts(out, &p.parts);
            put_coords(out, &p.coords);
            if shape_type.has_z() {
                put_measures(out, p.z.as_deref().unwrap_or_default(), n);
            }
            if shape_type.has_m() || p.m.is_some() {
                put_measures(out, p.m.as_deref().unwrap_or_default(), n);
            }
        }
        Shape::MultiPatch(p) => {
            put_envelope(out, &p.bbox);
            out.put_i32_le(p.parts.len() as i32);
            out.put_i32_le(n as i32);
            put_parts(out, &p.parts);
            for part_type in &p.part_types {
                out.put_i32_le(*part_type);
            }
            put_coords(out, &p.coords);
            put_measures(out, &p.z, n);
            if let Some(m) = &p.m {
                put_measures(out, m, n);
            }
        }
    }
}
