//! Paint surfaces.

use crate::shape::part_ranges;
use crate::types::DeviceRect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgba(0, 0, 0, 255);
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

/// How a feature is drawn.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Style {
    pub stroke: Color,
    pub fill: Option<Color>,
    /// Point marker side length in pixels.
    pub point_size: f64,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            stroke: Color::BLACK,
            fill: None,
            point_size: 1.0,
        }
    }
}

impl Style {
    pub fn stroke(color: Color) -> Self {
        Self {
            stroke: color,
            ..Self::default()
        }
    }

    pub fn with_fill(mut self, color: Color) -> Self {
        self.fill = Some(color);
        self
    }
}

/// A surface features are painted on. All coordinates are in device pixels.
pub trait GraphicsSink {
    fn draw_point(&mut self, x: f64, y: f64, style: &Style);

    /// One connected line through interleaved `coords`.
    fn draw_line(&mut self, coords: &[f64], style: &Style);

    /// Fill the rings described by `coords` and `parts` with the even-odd rule.
    fn fill_polygon(&mut self, coords: &[f64], parts: &[u32], style: &Style);
}

/// Coverage raster: counts how many paint operations touched each pixel.
#[derive(Debug, Clone)]
pub struct RasterSink {
    rect: DeviceRect,
    coverage: Vec<u32>,
    points: usize,
    lines: usize,
    polygons: usize,
}

impl RasterSink {
    pub fn new(rect: DeviceRect) -> Self {
        Self {
            rect,
            coverage: vec![0; rect.width as usize * rect.height as usize],
            points: 0,
            lines: 0,
            polygons: 0,
        }
    }

    pub fn rect(&self) -> DeviceRect {
        self.rect
    }

    pub fn hits(&self, x: i32, y: i32) -> u32 {
        self.index(i64::from(x), i64::from(y))
            .map_or(0, |i| self.coverage[i])
    }

    /// Pixels touched at least once.
    pub fn painted_pixels(&self) -> usize {
        self.coverage.iter().filter(|&&c| c > 0).count()
    }

    /// Number of `(points, lines, polygons)` drawn.
    pub fn draw_calls(&self) -> (usize, usize, usize) {
        (self.points, self.lines, self.polygons)
    }

    pub fn clear(&mut self) {
        self.coverage.fill(0);
        self.points = 0;
        self.lines = 0;
        self.polygons = 0;
    }

    fn index(&self, x: i64, y: i64) -> Option<usize> {
        let dx = x - i64::from(self.rect.x);
        let dy = y - i64::from(self.rect.y);
        if dx < 0 || dy < 0 || dx >= i64::from(self.rect.width) || dy >= i64::from(self.rect.height)
        {
            return None;
        }
        Some(dy as usize * self.rect.width as usize + dx as usize)
    }

    fn plot(&mut self, x: i64, y: i64) {
        if let Some(i) = self.index(x, y) {
            self.coverage[i] = self.coverage[i].saturating_add(1);
        }
    }

    /// Device rectangle grown by one pixel on every side, as `(min, max)` corners.
    fn clip_box(&self) -> ((f64, f64), (f64, f64)) {
        let (x, y) = (f64::from(self.rect.x), f64::from(self.rect.y));
        (
            (x - 1.0, y - 1.0),
            (
                x + f64::from(self.rect.width) + 1.0,
                y + f64::from(self.rect.height) + 1.0,
            ),
        )
    }

    /// Bresenham between two pixel centres.
    fn plot_segment(&mut self, x0: i64, y0: i64, x1: i64, y1: i64) {
        let (mut x, mut y) = (x0, y0);
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        loop {
            self.plot(x, y);
            if x == x1 && y == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }
}

/// Liang-Barsky clip of the segment `a`-`b` to the box `(min, max)`.
///
/// Endpoints inside the box are returned unchanged; `None` when the segment misses it.
fn clip_segment(
    a: (f64, f64),
    b: (f64, f64),
    min: (f64, f64),
    max: (f64, f64),
) -> Option<((f64, f64), (f64, f64))> {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let (mut t0, mut t1) = (0.0_f64, 1.0_f64);
    for (p, q) in [
        (-dx, a.0 - min.0),
        (dx, max.0 - a.0),
        (-dy, a.1 - min.1),
        (dy, max.1 - a.1),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else {
            let r = q / p;
            if p < 0.0 {
                if r > t1 {
                    return None;
                }
                t0 = t0.max(r);
            } else {
                if r < t0 {
                    return None;
                }
                t1 = t1.min(r);
            }
        }
    }
    let at = |t: f64| (a.0 + t * dx, a.1 + t * dy);
    let start = if t0 > 0.0 { at(t0) } else { a };
    let end = if t1 < 1.0 { at(t1) } else { b };
    Some((start, end))
}

/// Pixel containing a device coordinate, clamped so huge values cannot overflow.
pub(super) fn pixel(v: f64) -> i32 {
    v.floor().clamp(f64::from(i32::MIN / 2), f64::from(i32::MAX / 2)) as i32
}

impl GraphicsSink for RasterSink {
    fn draw_point(&mut self, x: f64, y: f64, style: &Style) {
        self.points += 1;
        let size = style.point_size.max(1.0).round() as i64;
        let offset = (size - 1) as f64 / 2.0;
        let (px, py) = (i64::from(pixel(x - offset)), i64::from(pixel(y - offset)));
        for dy in 0..size {
            for dx in 0..size {
                self.plot(px + dx, py + dy);
            }
        }
    }

    fn draw_line(&mut self, coords: &[f64], _style: &Style) {
        self.lines += 1;
        let mut pairs = coords.chunks_exact(2);
        let Some(first) = pairs.next() else {
            return;
        };
        self.plot(i64::from(pixel(first[0])), i64::from(pixel(first[1])));
        let (min, max) = self.clip_box();
        let mut previous = (first[0], first[1]);
        for pair in pairs {
            let next = (pair[0], pair[1]);
            if let Some((a, b)) = clip_segment(previous, next, min, max) {
                let (x0, y0) = (i64::from(pixel(a.0)), i64::from(pixel(a.1)));
                let (x1, y1) = (i64::from(pixel(b.0)), i64::from(pixel(b.1)));
                self.plot_segment(x0, y0, x1, y1);
            }
            previous = next;
        }
    }

    fn fill_polygon(&mut self, coords: &[f64], parts: &[u32], _style: &Style) {
        self.polygons += 1;
        let num_points = coords.len() / 2;
        let edges: Vec<(f64, f64, f64, f64)> = part_ranges(parts, num_points)
            .flat_map(|(start, end)| {
                let ring = &coords[start * 2..end * 2];
                ring.chunks_exact(2)
                    .zip(ring.chunks_exact(2).cycle().skip(1))
                    .map(|(a, b)| (a[0], a[1], b[0], b[1]))
                    .collect::<Vec<_>>()
            })
            .collect();

        let top = i64::from(self.rect.y);
        let bottom = top + i64::from(self.rect.height);
        let left = i64::from(self.rect.x);
        let right = left + i64::from(self.rect.width);
        let mut crossings: Vec<f64> = Vec::new();
        for row in top..bottom {
            // Sample at the pixel centre.
            let sy = row as f64 + 0.5;
            crossings.clear();
            for &(x0, y0, x1, y1) in &edges {
                if (y0 <= sy && y1 > sy) || (y1 <= sy && y0 > sy) {
                    crossings.push(x0 + (sy - y0) / (y1 - y0) * (x1 - x0));
                }
            }
            crossings.sort_by(f64::total_cmp);
            for span in crossings.chunks_exact(2) {
                let start = i64::from(pixel(span[0] + 0.5)).max(left);
                let end = i64::from(pixel(span[1] + 0.5)).min(right);
                for col in start..end {
                    self.plot(col, row);
                }
            }
        }
    }
}
