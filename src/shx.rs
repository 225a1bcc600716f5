//! `.shx` record offset index.
//!
//! The file repeats the 100-byte `.shp` header and then stores one big-endian
//! `(offset, content length)` pair per record, both in 16-bit words. Offsets point at
//! the record header in the geometry file.

use crate::error::{Result, ShapeError};
use crate::shp::header::{HEADER_LEN, ShapefileHeader};
use crate::shp::reader::ShapefileReader;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const ENTRY_LEN: usize = 8;

/// One `.shx` entry in raw 16-bit word units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub offset_words: u32,
    pub length_words: u32,
}

impl IndexEntry {
    pub fn byte_offset(&self) -> u64 {
        u64::from(self.offset_words) * 2
    }

    pub fn byte_length(&self) -> u32 {
        self.length_words * 2
    }
}

/// Read-only view over a `.shx` file.
///
/// The entry table is small (8 bytes per record) and is loaded whole on open.
#[derive(Debug, Clone)]
pub struct IndexFile {
    path: PathBuf,
    header: ShapefileHeader,
    entries: Bytes,
}

impl IndexFile {
    /// Open and validate a `.shx` file.
    ///
    /// A missing file is reported as [`ShapeError::FatalIo`] with `NotFound`; any header or
    /// length inconsistency is [`ShapeError::CorruptIndex`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).map_err(|e| ShapeError::fatal_io(&path, e))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| ShapeError::fatal_io(&path, e))?;
        Self::from_bytes(path, Bytes::from(data))
    }

    fn from_bytes(path: PathBuf, data: Bytes) -> Result<Self> {
        let header = ShapefileHeader::decode(&data)
            .map_err(|e| ShapeError::corrupt(&path, format!("bad header: {e}")))?;

        let size = data.len() as u64;
        if header.file_length_bytes() != size {
            return Err(ShapeError::corrupt(
                &path,
                format!(
                    "header declares {} bytes, file has {size}",
                    header.file_length_bytes()
                ),
            ));
        }
        if (data.len() - HEADER_LEN) % ENTRY_LEN != 0 {
            return Err(ShapeError::corrupt(
                &path,
                format!(
                    "entry table of {} bytes is not a whole number of entries",
                    data.len() - HEADER_LEN
                ),
            ));
        }

        Ok(Self {
            path,
            header,
            entries: data.slice(HEADER_LEN..),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &ShapefileHeader {
        &self.header
    }

    pub fn record_count(&self) -> usize {
        self.entries.len() / ENTRY_LEN
    }

    pub fn entry(&self, ordinal: usize) -> Result<IndexEntry> {
        let count = self.record_count();
        if ordinal >= count {
            return Err(ShapeError::IndexOutOfRange { ordinal, count });
        }
        let mut buf = &self.entries[ordinal * ENTRY_LEN..(ordinal + 1) * ENTRY_LEN];
        let offset = buf.get_i32();
        let length = buf.get_i32();
        if offset < 0 || length < 0 {
            return Err(ShapeError::corrupt(
                &self.path,
                format!("negative entry ({offset}, {length}) for ordinal {ordinal}"),
            ));
        }
        Ok(IndexEntry {
            offset_words: offset as u32,
            length_words: length as u32,
        })
    }

    /// Byte offset of the record header in the geometry file.
    pub fn offset_of(&self, ordinal: usize) -> Result<u64> {
        self.entry(ordinal).map(|e| e.byte_offset())
    }

    /// Record content length in bytes.
    pub fn length_of(&self, ordinal: usize) -> Result<u32> {
        self.entry(ordinal).map(|e| e.byte_length())
    }

    /// Cheap staleness check: the last entry must end exactly where the geometry
    /// file's record area ends.
    pub fn check_consistent(&self, reader: &ShapefileReader) -> Result<()> {
        let expected_end = match self.record_count() {
            0 => HEADER_LEN as u64,
            n => {
                let last = self.entry(n - 1)?;
                last.byte_offset() + 8 + u64::from(last.byte_length())
            }
        };
        if expected_end != reader.data_end() {
            return Err(ShapeError::corrupt(
                &self.path,
                format!(
                    "stale index: entries end at byte {expected_end}, geometry file ends at {}",
                    reader.data_end()
                ),
            ));
        }
        if self.header.shape_type != reader.shape_type() {
            return Err(ShapeError::corrupt(
                &self.path,
                format!(
                    "index declares {:?}, geometry file is {:?}",
                    self.header.shape_type,
                    reader.shape_type()
                ),
            ));
        }
        Ok(())
    }

    /// Fail with [`ShapeError::CorruptIndex`] if this index was not built from `reader`'s file.
    ///
    /// Scans the whole geometry file; see [`IndexFile::check_consistent`] for the
    /// constant-time variant.
    pub fn verify_against(&self, reader: &mut ShapefileReader) -> Result<()> {
        let scanned = reader.count_records()?;
        if scanned != self.record_count() {
            return Err(ShapeError::corrupt(
                &self.path,
                format!(
                    "stale index: {} entries, geometry file has {scanned} records",
                    self.record_count()
                ),
            ));
        }
        Ok(())
    }

    /// Build a `.shx` for `shp_path` by scanning it sequentially.
    pub fn generate<P: AsRef<Path>, Q: AsRef<Path>>(shp_path: P, shx_path: Q) -> Result<Self> {
        let mut reader = ShapefileReader::open(shp_path)?;
        let mut entries = Vec::new();
        for record in reader.records() {
            let record = record?;
            entries.push(IndexEntry {
                offset_words: (record.offset / 2) as u32,
                length_words: record.content_length_words(),
            });
        }
        log::debug!(
            "generated {} index entries for {}",
            entries.len(),
            reader.path().display()
        );
        let header = reader.header().clone();
        write_index(shx_path.as_ref(), &header, &entries)?;
        Self::open(shx_path)
    }
}

/// Write a `.shx` file through a temporary sibling and a rename. The file length in the
/// header is recomputed from `entries`.
pub fn write_index(path: &Path, header: &ShapefileHeader, entries: &[IndexEntry]) -> Result<()> {
    let mut header = header.clone();
    header.file_length = ((HEADER_LEN + entries.len() * ENTRY_LEN) / 2) as u32;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + entries.len() * ENTRY_LEN);
    header.encode(&mut buf);
    for entry in entries {
        buf.put_i32(entry.offset_words as i32);
        buf.put_i32(entry.length_words as i32);
    }

    let tmp_path = path.with_extension("shx.tmp");
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&buf)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
