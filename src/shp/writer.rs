//! Sequential `.shp` + `.shx` writer.

use super::codec;
use super::header::{HEADER_LEN, ShapefileHeader};
use crate::error::{Result, ShapeError};
use crate::shape::Shape;
use crate::shx::{IndexEntry, write_index};
use crate::types::{Envelope, ShapeKind, ShapeType};
use bytes::{BufMut, BytesMut};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Writes shapes of a single type, then the companion `.shx` on [`ShapefileWriter::finish`].
pub struct ShapefileWriter {
    shp_path: PathBuf,
    shx_path: PathBuf,
    writer: BufWriter<File>,
    header: ShapefileHeader,
    entries: Vec<IndexEntry>,
    z_range: Envelope,
    m_range: Envelope,
    offset: u64,
    scratch: BytesMut,
}

impl ShapefileWriter {
    /// Create `path` and its `.shx` sibling, truncating existing files.
    pub fn create<P: AsRef<Path>>(path: P, shape_type: ShapeType) -> Result<Self> {
        let shp_path = path.as_ref().to_path_buf();
        let shx_path = shp_path.with_extension("shx");
        Self::create_with_index_path(shp_path, shx_path, shape_type)
    }

    pub fn create_with_index_path(
        shp_path: PathBuf,
        shx_path: PathBuf,
        shape_type: ShapeType,
    ) -> Result<Self> {
        if shape_type == ShapeType::Null {
            return Err(ShapeError::InvalidInput(
                "a shapefile cannot be declared with the null shape type".into(),
            ));
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&shp_path)
            .map_err(|e| ShapeError::fatal_io(&shp_path, e))?;
        let mut writer = BufWriter::new(file);

        // Placeholder, rewritten on finish.
        writer.write_all(&[0u8; HEADER_LEN])?;

        Ok(Self {
            shp_path,
            shx_path,
            writer,
            header: ShapefileHeader::new(shape_type),
            entries: Vec::new(),
            z_range: Envelope::EMPTY,
            m_range: Envelope::EMPTY,
            offset: HEADER_LEN as u64,
            scratch: BytesMut::with_capacity(1024),
        })
    }

    pub fn shape_type(&self) -> ShapeType {
        self.header.shape_type
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a shape and return its ordinal. Null shapes are accepted in any file.
    pub fn write_shape(&mut self, shape: &Shape) -> Result<usize> {
        if !shape.is_null() && shape.shape_type() != self.header.shape_type {
            return Err(ShapeError::InvalidInput(format!(
                "cannot write {:?} into a {:?} file",
                shape.shape_type(),
                self.header.shape_type
            )));
        }
        if shape.kind() == ShapeKind::Polygon || shape.kind() == ShapeKind::Arc {
            let min_points = shape.parts().len();
            if shape.num_points() < min_points {
                return Err(ShapeError::InvalidInput(
                    "shape has fewer points than parts".into(),
                ));
            }
        }

        let ordinal = self.entries.len();
        let content_len = codec::encoded_len(shape);

        self.scratch.clear();
        self.scratch.put_i32(ordinal as i32 + 1);
        self.scratch.put_i32((content_len / 2) as i32);
        codec::encode_shape(shape, &mut self.scratch);
        self.writer.write_all(&self.scratch)?;

        self.entries.push(IndexEntry {
            offset_words: (self.offset / 2) as u32,
            length_words: (content_len / 2) as u32,
        });
        self.offset += self.scratch.len() as u64;
        self.track_bounds(shape);
        Ok(ordinal)
    }

    fn track_bounds(&mut self, shape: &Shape) {
        self.header
            .bbox
            .expand_to_include_envelope(&shape.envelope());
        let (z, m) = match shape {
            Shape::Point(p) => (p.z.map(|z| vec![z]), p.m.map(|m| vec![m])),
            Shape::MultiPoint(p) => (p.z.clone(), p.m.clone()),
            Shape::PolyLine(p) | Shape::Polygon(p) => (p.z.clone(), p.m.clone()),
            Shape::MultiPatch(p) => (Some(p.z.clone()), p.m.clone()),
            Shape::Null => (None, None),
        };
        for value in z.iter().flatten() {
            self.z_range.expand_to_include(*value, 0.0);
        }
        for value in m.iter().flatten() {
            self.m_range.expand_to_include(*value, 0.0);
        }
    }

    /// Patch the `.shp` header, flush, and write the `.shx`.
    pub fn finish(mut self) -> Result<ShapefileHeader> {
        self.header.file_length = (self.offset / 2) as u32;
        if !self.z_range.is_empty() {
            self.header.z_range = (self.z_range.min_x, self.z_range.max_x);
        }
        if !self.m_range.is_empty() {
            self.header.m_range = (self.m_range.min_x, self.m_range.max_x);
        }

        let mut buf = BytesMut::with_capacity(HEADER_LEN);
        self.header.encode(&mut buf);
        self.writer.seek(SeekFrom::Start(0))?;
        self.writer.write_all(&buf)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        write_index(&self.shx_path, &self.header, &self.entries)?;
        log::debug!(
            "wrote {} records to {}",
            self.entries.len(),
            self.shp_path.display()
        );
        Ok(self.header)
    }
}
