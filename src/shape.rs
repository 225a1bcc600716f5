//! Decoded shapefile geometries.
//!
//! A [`Shape`] is a tagged union over the shape families. Each variant carries only the
//! coordinate arrays its family needs: points carry scalars, part-based shapes carry a
//! flat interleaved `x, y` buffer plus part start indices (in points, not in doubles).

use crate::types::{Envelope, ShapeKind, ShapeType};
use geo::Winding;
use smallvec::SmallVec;

/// Part start offsets, in points.
pub type Parts = SmallVec<[u32; 4]>;

#[derive(Debug, Clone, PartialEq)]
pub struct PointShape {
    pub shape_type: ShapeType,
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
    pub m: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiPointShape {
    pub shape_type: ShapeType,
    pub bbox: Envelope,
    pub coords: Vec<f64>,
    pub z: Option<Vec<f64>>,
    pub m: Option<Vec<f64>>,
}

/// Polyline or polygon payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PartShape {
    pub shape_type: ShapeType,
    pub bbox: Envelope,
    pub parts: Parts,
    pub coords: Vec<f64>,
    pub z: Option<Vec<f64>>,
    pub m: Option<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatchShape {
    pub bbox: Envelope,
    pub parts: Parts,
    pub part_types: Vec<i32>,
    pub coords: Vec<f64>,
    pub z: Vec<f64>,
    pub m: Option<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Null,
    Point(PointShape),
    MultiPoint(MultiPointShape),
    PolyLine(PartShape),
    Polygon(PartShape),
    MultiPatch(PatchShape),
}

impl Shape {
    pub fn point(x: f64, y: f64) -> Self {
        Shape::Point(PointShape {
            shape_type: ShapeType::Point,
            x,
            y,
            z: None,
            m: None,
        })
    }

    pub fn multipoint(coords: Vec<f64>) -> Self {
        Shape::MultiPoint(MultiPointShape {
            shape_type: ShapeType::MultiPoint,
            bbox: Envelope::from_coords(&coords),
            coords,
            z: None,
            m: None,
        })
    }

    /// Polyline from a list of parts, each an interleaved `x, y` buffer.
    pub fn polyline(parts: &[&[f64]]) -> Self {
        Shape::PolyLine(PartShape::from_parts(ShapeType::PolyLine, parts))
    }

    /// Polygon from a list of rings, each an interleaved `x, y` buffer.
    /// Rings are stored as given; shells are expected clockwise.
    pub fn polygon(rings: &[&[f64]]) -> Self {
        Shape::Polygon(PartShape::from_parts(ShapeType::Polygon, rings))
    }

    pub fn shape_type(&self) -> ShapeType {
        match self {
            Shape::Null => ShapeType::Null,
            Shape::Point(p) => p.shape_type,
            Shape::MultiPoint(p) => p.shape_type,
            Shape::PolyLine(p) | Shape::Polygon(p) => p.shape_type,
            Shape::MultiPatch(_) => ShapeType::MultiPatch,
        }
    }

    pub fn kind(&self) -> ShapeKind {
        self.shape_type().kind()
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Shape::Null)
    }

    pub fn num_points(&self) -> usize {
        match self {
            Shape::Null => 0,
            Shape::Point(_) => 1,
            _ => self.coords().len() / 2,
        }
    }

    /// Interleaved `x, y` coordinates. Point shapes return an empty slice; use
    /// [`Shape::xy_buffer`].
    pub fn coords(&self) -> &[f64] {
        match self {
            Shape::Null | Shape::Point(_) => &[],
            Shape::MultiPoint(p) => &p.coords,
            Shape::PolyLine(p) | Shape::Polygon(p) => &p.coords,
            Shape::MultiPatch(p) => &p.coords,
        }
    }

    /// Copy the `x, y` coordinates into `out`, replacing its contents.
    pub fn xy_buffer(&self, out: &mut Vec<f64>) {
        out.clear();
        match self {
            Shape::Point(p) => out.extend_from_slice(&[p.x, p.y]),
            other => out.extend_from_slice(other.coords()),
        }
    }

    /// Part start indices in points. Point and multipoint shapes are a single part.
    pub fn parts(&self) -> &[u32] {
        const SINGLE: [u32; 1] = [0];
        match self {
            Shape::Null => &[],
            Shape::Point(_) | Shape::MultiPoint(_) => &SINGLE,
            Shape::PolyLine(p) | Shape::Polygon(p) => &p.parts,
            Shape::MultiPatch(p) => &p.parts,
        }
    }

    pub fn envelope(&self) -> Envelope {
        match self {
            Shape::Null => Envelope::EMPTY,
            Shape::Point(p) => Envelope::point(p.x, p.y),
            Shape::MultiPoint(p) => p.bbox,
            Shape::PolyLine(p) | Shape::Polygon(p) => p.bbox,
            Shape::MultiPatch(p) => p.bbox,
        }
    }

    /// Convert into a `geo` geometry. Null shapes and empty coordinate sets yield `None`.
    ///
    /// Polygon rings follow the shapefile convention: clockwise rings are shells,
    /// counter-clockwise rings are holes of the preceding shell.
    pub fn to_geometry(&self) -> Option<geo::Geometry<f64>> {
        match self {
            Shape::Null => None,
            Shape::Point(p) => Some(geo::Geometry::Point(geo::Point::new(p.x, p.y))),
            Shape::MultiPoint(p) => {
                let points: Vec<geo::Point<f64>> = p
                    .coords
                    .chunks_exact(2)
                    .map(|c| geo::Point::new(c[0], c[1]))
                    .collect();
                if points.is_empty() {
                    return None;
                }
                Some(geo::Geometry::MultiPoint(geo::MultiPoint::new(points)))
            }
            Shape::PolyLine(p) => {
                let lines: Vec<geo::LineString<f64>> = part_ranges(&p.parts, p.coords.len() / 2)
                    .map(|(start, end)| line_string(&p.coords[start * 2..end * 2]))
                    .collect();
                if lines.is_empty() {
                    return None;
                }
                Some(geo::Geometry::MultiLineString(geo::MultiLineString::new(
                    lines,
                )))
            }
            Shape::Polygon(p) => rings_to_multipolygon(&p.parts, &p.coords),
            Shape::MultiPatch(p) => rings_to_multipolygon(&p.parts, &p.coords),
        }
    }
}

impl PartShape {
    pub fn from_parts(shape_type: ShapeType, parts: &[&[f64]]) -> Self {
        let mut offsets = Parts::new();
        let mut coords = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
        for part in parts {
            offsets.push((coords.len() / 2) as u32);
            coords.extend_from_slice(part);
        }
        Self {
            shape_type,
            bbox: Envelope::from_coords(&coords),
            parts: offsets,
            coords,
            z: None,
            m: None,
        }
    }
}

/// Iterate `(start, end)` point ranges of each part.
pub fn part_ranges(parts: &[u32], num_points: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
    parts.iter().enumerate().map(move |(i, &start)| {
        let end = parts
            .get(i + 1)
            .map(|&next| next as usize)
            .unwrap_or(num_points);
        (start as usize, end)
    })
}

fn line_string(coords: &[f64]) -> geo::LineString<f64> {
    coords
        .chunks_exact(2)
        .map(|c| geo::coord! { x: c[0], y: c[1] })
        .collect::<Vec<_>>()
        .into()
}

fn rings_to_multipolygon(parts: &[u32], coords: &[f64]) -> Option<geo::Geometry<f64>> {
    let mut polygons: Vec<(geo::LineString<f64>, Vec<geo::LineString<f64>>)> = Vec::new();
    for (start, end) in part_ranges(parts, coords.len() / 2) {
        let ring = line_string(&coords[start * 2..end * 2]);
        if ring.0.is_empty() {
            continue;
        }
        if ring.is_ccw()
            && let Some((_, holes)) = polygons.last_mut()
        {
            holes.push(ring);
        } else {
            polygons.push((ring, Vec::new()));
        }
    }
    if polygons.is_empty() {
        return None;
    }
    Some(geo::Geometry::MultiPolygon(geo::MultiPolygon::new(
        polygons
            .into_iter()
            .map(|(shell, holes)| geo::Polygon::new(shell, holes))
            .collect(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polygon_envelope_and_parts() {
        let shell = [0.0, 0.0, 0.0, 10.0, 10.0, 10.0, 10.0, 0.0, 0.0, 0.0];
        let hole = [2.0, 2.0, 4.0, 2.0, 4.0, 4.0, 2.0, 4.0, 2.0, 2.0];
        let shape = Shape::polygon(&[&shell, &hole]);

        assert_eq!(shape.shape_type(), ShapeType::Polygon);
        assert_eq!(shape.parts(), &[0, 5]);
        assert_eq!(shape.num_points(), 10);
        assert_eq!(shape.envelope(), Envelope::new(0.0, 0.0, 10.0, 10.0));
    }

    #[test]
    fn test_polygon_hole_assignment() {
        // Clockwise shell followed by a counter-clockwise hole.
        let shell = [0.0, 0.0, 0.0, 10.0, 10.0, 10.0, 10.0, 0.0, 0.0, 0.0];
        let hole = [2.0, 2.0, 4.0, 2.0, 4.0, 4.0, 2.0, 4.0, 2.0, 2.0];
        let shape = Shape::polygon(&[&shell, &hole]);

        match shape.to_geometry() {
            Some(geo::Geometry::MultiPolygon(mp)) => {
                assert_eq!(mp.0.len(), 1);
                assert_eq!(mp.0[0].interiors().len(), 1);
            }
            other => panic!("unexpected geometry {other:?}"),
        }
    }

    #[test]
    fn test_two_shells_make_two_polygons() {
        let a = [0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0];
        let b = [5.0, 5.0, 5.0, 6.0, 6.0, 6.0, 6.0, 5.0, 5.0, 5.0];
        let shape = Shape::polygon(&[&a, &b]);
        match shape.to_geometry() {
            Some(geo::Geometry::MultiPolygon(mp)) => assert_eq!(mp.0.len(), 2),
            other => panic!("unexpected geometry {other:?}"),
        }
    }

    #[test]
    fn test_point_xy_buffer() {
        let shape = Shape::point(3.0, 4.0);
        let mut buf = vec![9.0; 6];
        shape.xy_buffer(&mut buf);
        assert_eq!(buf, vec![3.0, 4.0]);
        assert!(shape.coords().is_empty());
        assert_eq!(shape.parts(), &[0]);
    }

    #[test]
    fn test_part_ranges() {
        let ranges: Vec<_> = part_ranges(&[0, 3, 7], 10).collect();
        assert_eq!(ranges, vec![(0, 3), (3, 7), (7, 10)]);
    }

    #[test]
    fn test_null_shape() {
        assert!(Shape::Null.to_geometry().is_none());
        assert!(Shape::Null.envelope().is_empty());
        assert_eq!(Shape::Null.num_points(), 0);
    }
}
