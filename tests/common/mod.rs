#![allow(dead_code)]

use parking_lot::Mutex;
use shapeview::prelude::*;
use shapeview::{Feature, IndexFile, RenderState, ShapefileWriter};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// `n` points on a 10-column grid with unit spacing.
pub fn grid_points(dir: &TempDir, name: &str, n: usize) -> PathBuf {
    init_logging();
    let path = dir.path().join(format!("{name}.shp"));
    let mut writer = ShapefileWriter::create(&path, ShapeType::Point).unwrap();
    for i in 0..n {
        writer
            .write_shape(&Shape::point((i % 10) as f64, (i / 10) as f64))
            .unwrap();
    }
    writer.finish().unwrap();
    path
}

/// `n` short diagonal lines, line `i` running from `(i, i)` to `(i + 0.5, i + 0.5)`.
pub fn diagonals(dir: &TempDir, name: &str, n: usize) -> PathBuf {
    init_logging();
    let path = dir.path().join(format!("{name}.shp"));
    let mut writer = ShapefileWriter::create(&path, ShapeType::PolyLine).unwrap();
    for i in 0..n {
        let o = i as f64;
        writer
            .write_shape(&Shape::polyline(&[&[o, o, o + 0.25, o + 0.5, o + 0.5, o + 0.5]]))
            .unwrap();
    }
    writer.finish().unwrap();
    path
}

/// `n` unit squares along the diagonal, square `i` with its lower-left corner at `(i, i)`.
pub fn squares(dir: &TempDir, name: &str, n: usize) -> PathBuf {
    init_logging();
    let path = dir.path().join(format!("{name}.shp"));
    let mut writer = ShapefileWriter::create(&path, ShapeType::Polygon).unwrap();
    for i in 0..n {
        let o = i as f64;
        writer
            .write_shape(&Shape::polygon(&[&[
                o, o, o, o + 1.0, o + 1.0, o + 1.0, o + 1.0, o, o, o,
            ]]))
            .unwrap();
    }
    writer.finish().unwrap();
    path
}

/// Break the first part index of a polyline record so decoding fails while its
/// bounds stay readable.
pub fn corrupt_part_index(shp: &Path, ordinal: usize) {
    let shx = IndexFile::open(shp.with_extension("shx")).unwrap();
    let entry = shx.entry(ordinal).unwrap();
    // Record header, then type (4), bbox (32), part count (4), point count (4).
    let position = entry.byte_offset() + 8 + 44;
    let mut file = std::fs::OpenOptions::new().write(true).open(shp).unwrap();
    file.seek(SeekFrom::Start(position)).unwrap();
    file.write_all(&5i32.to_le_bytes()).unwrap();
}

/// Deterministic pseudo-random boxes inside `[0, extent)^2`.
pub fn query_boxes(count: usize, extent: f64) -> Vec<Envelope> {
    let mut state = 0x2545_f491_4f6c_dd1du64;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state >> 11) as f64 / (1u64 << 53) as f64
    };
    (0..count)
        .map(|_| {
            let (x, y) = (next() * extent, next() * extent);
            let (w, h) = (next() * extent / 4.0, next() * extent / 4.0);
            Envelope::new(x, y, x + w, y + h)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Rendered(usize),
    Error(String),
    State(RenderState, RenderState),
}

#[derive(Default)]
pub struct Recorder {
    pub events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn rendered(&self) -> Vec<usize> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Rendered(ordinal) => Some(*ordinal),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, Event::Error(_)))
            .count()
    }
}

impl RenderListener for Recorder {
    fn feature_rendered(&self, feature: &Feature<'_>) {
        self.events.lock().push(Event::Rendered(feature.ordinal));
    }

    fn error_occurred(&self, error: &ShapeError) {
        self.events.lock().push(Event::Error(error.to_string()));
    }

    fn state_changed(&self, from: RenderState, to: RenderState) {
        self.events.lock().push(Event::State(from, to));
    }
}
