//! Stable feature ids (`.fix` files).
//!
//! A feature id has the form `typename.N`. The `.fix` file maps each `N` to the
//! current 1-based record number in the geometry file. Deleting a feature sets a
//! tombstone bit on its entry instead of rewriting the file; [`compact`] later drops
//! tombstoned entries and renumbers the survivors.
//!
//! ```text
//! header (24 bytes, little-endian)
//!   magic "SFIX" | version u8 | reserved [u8; 3] | entry count u64 | removes u32 | reserved u32
//! entries (16 bytes each)
//!   fid number u64 | record number u32 | flags u32 (bit 0 = removed)
//! ```

use crate::error::{Result, ShapeError};
use crate::shp::reader::ShapefileReader;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 4] = b"SFIX";
const VERSION: u8 = 1;
const HEADER_LEN: u64 = 24;
const ENTRY_LEN: u64 = 16;
const REMOVES_OFFSET: u64 = 16;
const FLAGS_OFFSET: u64 = 12;
const FLAG_REMOVED: u32 = 1;

/// One `.fix` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FidEntry {
    pub fid: u64,
    /// 1-based record number in the geometry file.
    pub record_number: u32,
    pub removed: bool,
}

impl FidEntry {
    /// Zero-based ordinal of the record this entry points at.
    pub fn ordinal(&self) -> usize {
        self.record_number.saturating_sub(1) as usize
    }

    pub fn fid_string(&self, typename: &str) -> String {
        format!("{typename}.{}", self.fid)
    }

    fn decode(mut buf: &[u8]) -> Self {
        let fid = buf.get_u64_le();
        let record_number = buf.get_u32_le();
        let flags = buf.get_u32_le();
        Self {
            fid,
            record_number,
            removed: flags & FLAG_REMOVED != 0,
        }
    }

    fn encode(&self, out: &mut BytesMut) {
        out.put_u64_le(self.fid);
        out.put_u32_le(self.record_number);
        out.put_u32_le(if self.removed { FLAG_REMOVED } else { 0 });
    }
}

/// Parse the numeric part of `typename.N`.
pub fn parse_fid(typename: &str, fid: &str) -> Result<u64> {
    fid.strip_prefix(typename)
        .and_then(|rest| rest.strip_prefix('.'))
        .and_then(|n| n.parse::<u64>().ok())
        .ok_or_else(|| ShapeError::InvalidInput(format!("{fid:?} is not a {typename} feature id")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FidHeader {
    count: u64,
    removes: u32,
}

impl FidHeader {
    fn decode(path: &Path, file_len: u64, mut buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN as usize || &buf[..4] != MAGIC {
            return Err(ShapeError::corrupt(path, "bad fid index magic"));
        }
        buf.advance(4);
        let version = buf.get_u8();
        if version != VERSION {
            return Err(ShapeError::corrupt(
                path,
                format!("unsupported fid index version {version}"),
            ));
        }
        buf.advance(3);
        let count = buf.get_u64_le();
        let removes = buf.get_u32_le();

        let expected = count
            .checked_mul(ENTRY_LEN)
            .and_then(|n| n.checked_add(HEADER_LEN));
        if expected != Some(file_len) {
            return Err(ShapeError::corrupt(
                path,
                format!("header declares {count} entries, file has {file_len} bytes"),
            ));
        }
        Ok(Self { count, removes })
    }

    fn encode(&self, out: &mut BytesMut) {
        out.put_slice(MAGIC);
        out.put_u8(VERSION);
        out.put_bytes(0, 3);
        out.put_u64_le(self.count);
        out.put_u32_le(self.removes);
        out.put_u32_le(0);
    }
}

/// Write a fresh `.fix` file atomically.
fn write_file(path: &Path, entries: &[FidEntry], removes: u32) -> Result<()> {
    let header = FidHeader {
        count: entries.len() as u64,
        removes,
    };
    let mut buf = BytesMut::with_capacity(HEADER_LEN as usize + entries.len() * ENTRY_LEN as usize);
    header.encode(&mut buf);
    for entry in entries {
        entry.encode(&mut buf);
    }

    let tmp_path = path.with_extension("fix.tmp");
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

/// Create the initial `.fix` for a geometry file: `fid N` maps to record `N`.
pub fn generate<P: AsRef<Path>>(reader: &mut ShapefileReader, path: P) -> Result<usize> {
    let count = reader.count_records()?;
    let entries: Vec<FidEntry> = (1..=count as u64)
        .map(|n| FidEntry {
            fid: n,
            record_number: n as u32,
            removed: false,
        })
        .collect();
    write_file(path.as_ref(), &entries, 0)?;
    log::debug!(
        "generated fid index {} with {count} entries",
        path.as_ref().display()
    );
    Ok(count)
}

/// Rewrite `path` keeping only live entries, renumbered `1..=live`.
///
/// Fid numbers are preserved and the remove counter carries over. Returns the
/// number of live entries.
pub fn compact<P: AsRef<Path>>(path: P) -> Result<usize> {
    let path = path.as_ref();
    let reader = FidReader::open(path)?;
    let removes = reader.removes();
    let live: Vec<FidEntry> = reader
        .entries()
        .filter(|entry| !entry.removed)
        .enumerate()
        .map(|(i, entry)| FidEntry {
            record_number: i as u32 + 1,
            ..entry
        })
        .collect();
    drop(reader);

    write_file(path, &live, removes)?;
    log::debug!(
        "compacted fid index {} to {} live entries",
        path.display(),
        live.len()
    );
    Ok(live.len())
}

/// Sequential and random-access reader over a `.fix` file.
#[derive(Debug, Clone)]
pub struct FidReader {
    path: PathBuf,
    header: FidHeader,
    entries: Bytes,
    position: usize,
}

impl FidReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).map_err(|e| ShapeError::fatal_io(&path, e))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| ShapeError::fatal_io(&path, e))?;
        let header = FidHeader::decode(&path, data.len() as u64, &data)?;
        let data = Bytes::from(data);
        Ok(Self {
            path,
            header,
            entries: data.slice(HEADER_LEN as usize..),
            position: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total entries including tombstones.
    pub fn len(&self) -> usize {
        self.header.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.header.count == 0
    }

    /// Cumulative number of removals recorded in the header.
    pub fn removes(&self) -> u32 {
        self.header.removes
    }

    pub fn live_count(&self) -> usize {
        self.entries().filter(|e| !e.removed).count()
    }

    fn entry_at(&self, index: usize) -> FidEntry {
        let start = index * ENTRY_LEN as usize;
        FidEntry::decode(&self.entries[start..start + ENTRY_LEN as usize])
    }

    /// All entries, tombstones included, independent of the reader position.
    pub fn entries(&self) -> impl Iterator<Item = FidEntry> + '_ {
        (0..self.len()).map(|i| self.entry_at(i))
    }

    /// Next live entry, skipping tombstones.
    pub fn next_live(&mut self) -> Option<FidEntry> {
        while self.position < self.len() {
            let entry = self.entry_at(self.position);
            self.position += 1;
            if !entry.removed {
                return Some(entry);
            }
        }
        None
    }

    /// Restart sequential reading from the first entry.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Binary search by fid number. Tombstoned entries are reported as not found.
    pub fn find(&self, fid: u64) -> Option<FidEntry> {
        let (mut lo, mut hi) = (0usize, self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let entry = self.entry_at(mid);
            match entry.fid.cmp(&fid) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return (!entry.removed).then_some(entry),
            }
        }
        None
    }

    /// Look up `typename.N`.
    pub fn find_id(&self, typename: &str, fid: &str) -> Result<Option<FidEntry>> {
        Ok(self.find(parse_fid(typename, fid)?))
    }
}

impl Iterator for FidReader {
    type Item = FidEntry;

    fn next(&mut self) -> Option<FidEntry> {
        self.next_live()
    }
}

/// In-place writer that marks entries as removed.
///
/// Usage is sequential: [`FidWriter::next`] to the entry, [`FidWriter::remove`] it, then
/// [`FidWriter::write`] (or the next `next`) persists the tombstone.
#[derive(Debug)]
pub struct FidWriter {
    path: PathBuf,
    file: File,
    header: FidHeader,
    position: u64,
    current: Option<(u64, FidEntry)>,
    pending_remove: bool,
}

impl FidWriter {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| ShapeError::fatal_io(&path, e))?;
        let file_len = file.metadata()?.len();
        let mut buf = [0u8; HEADER_LEN as usize];
        if file_len < HEADER_LEN {
            return Err(ShapeError::corrupt(&path, "fid index header truncated"));
        }
        file.read_exact(&mut buf)?;
        let header = FidHeader::decode(&path, file_len, &buf)?;
        Ok(Self {
            path,
            file,
            header,
            position: 0,
            current: None,
            pending_remove: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn removes(&self) -> u32 {
        self.header.removes
    }

    /// Advance to the next live entry. Any pending removal is written first.
    pub fn next(&mut self) -> Result<Option<FidEntry>> {
        self.write()?;
        while self.position < self.header.count {
            let index = self.position;
            self.position += 1;

            let mut buf = [0u8; ENTRY_LEN as usize];
            self.file
                .seek(SeekFrom::Start(HEADER_LEN + index * ENTRY_LEN))?;
            self.file.read_exact(&mut buf)?;
            let entry = FidEntry::decode(&buf);
            if !entry.removed {
                self.current = Some((index, entry));
                return Ok(Some(entry));
            }
        }
        self.current = None;
        Ok(None)
    }

    /// Mark the entry last returned by [`FidWriter::next`] for removal.
    ///
    /// Removing an entry that is already tombstoned is a no-op.
    pub fn remove(&mut self) -> Result<()> {
        let Some((_, entry)) = self.current.as_ref() else {
            return Err(ShapeError::InvalidInput(
                "remove() called without a current entry".into(),
            ));
        };
        if !entry.removed {
            self.pending_remove = true;
        }
        Ok(())
    }

    /// Persist the pending state of the current entry.
    pub fn write(&mut self) -> Result<()> {
        if !self.pending_remove {
            return Ok(());
        }
        let Some((index, entry)) = self.current.as_mut() else {
            self.pending_remove = false;
            return Ok(());
        };

        self.pending_remove = false;
        if entry.removed {
            return Ok(());
        }
        entry.removed = true;
        self.header.removes = self.header.removes.saturating_add(1);

        let entry_offset = HEADER_LEN + *index * ENTRY_LEN;
        self.file
            .seek(SeekFrom::Start(entry_offset + FLAGS_OFFSET))?;
        self.file.write_all(&FLAG_REMOVED.to_le_bytes())?;
        self.file.seek(SeekFrom::Start(REMOVES_OFFSET))?;
        self.file.write_all(&self.header.removes.to_le_bytes())?;
        self.file.sync_data()?;

        log::trace!("removed fid {} from {}", entry.fid, self.path.display());
        Ok(())
    }

    /// Write any pending removal and release the file.
    pub fn close(mut self) -> Result<()> {
        self.write()
    }
}

impl Drop for FidWriter {
    fn drop(&mut self) {
        // Best effort; `close` reports errors.
        if let Err(e) = self.write() {
            log::warn!("failed to persist pending fid removal: {e}");
        }
    }
}
