//! Reader and writer for the node file shared by the quad-tree and R-tree.

use super::node::{
    BuildNode, DiskNode, HEADER_LEN, IndexHeader, NODE_FIXED_LEN, decode_body, decode_fixed,
    write_post_order,
};
use super::{IndexStats, SpatialIndexStore};
use crate::config::IndexKind;
use crate::error::{Result, ShapeError};
use crate::types::Envelope;
use bytes::BytesMut;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Serialise `root` to `path` via a temporary file and an atomic rename.
pub(crate) fn write_tree(
    path: &Path,
    kind: IndexKind,
    root: &BuildNode,
    record_count: usize,
    max_depth: usize,
) -> Result<IndexHeader> {
    let record_count = u32::try_from(record_count)
        .map_err(|_| ShapeError::InvalidInput(format!("{record_count} records exceed u32")))?;

    let mut out = BytesMut::with_capacity(HEADER_LEN as usize + root.node_count() * 64);
    out.resize(HEADER_LEN as usize, 0);
    let root_offset = write_post_order(root, &mut out);
    let header = IndexHeader {
        kind,
        node_count: root.node_count() as u32,
        record_count,
        max_depth: max_depth as u32,
        root_offset,
    };
    header.encode(&mut out[..HEADER_LEN as usize]);

    let tmp_path = path.with_extension("idx.tmp");
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&out)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;

    log::debug!(
        "wrote {:?} index {} ({} nodes, {} records, {} bytes)",
        kind,
        path.display(),
        header.node_count,
        header.record_count,
        out.len()
    );
    Ok(header)
}

/// A quad-tree or R-tree index file opened for querying.
///
/// Nodes are read on demand. Each query keeps its own traversal stack, so several
/// queries may be interleaved; the file handle itself is shared behind a mutex.
pub struct DiskIndex {
    path: PathBuf,
    header: IndexHeader,
    file_len: u64,
    file: Mutex<Option<BufReader<File>>>,
}

impl DiskIndex {
    /// Open and validate an index file.
    ///
    /// A missing file is [`ShapeError::FatalIo`]; anything structurally wrong is
    /// [`ShapeError::CorruptIndex`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| ShapeError::fatal_io(&path, e))?;
        let file_len = file
            .metadata()
            .map_err(|e| ShapeError::fatal_io(&path, e))?
            .len();
        let mut reader = BufReader::new(file);

        let mut buf = [0u8; HEADER_LEN as usize];
        if file_len < HEADER_LEN {
            return Err(ShapeError::corrupt(&path, "index header truncated"));
        }
        reader.read_exact(&mut buf)?;
        let header = IndexHeader::decode(&path, &buf)?;

        if header.node_count == 0 {
            return Err(ShapeError::corrupt(&path, "index has no root node"));
        }
        if header.root_offset < HEADER_LEN || header.root_offset + NODE_FIXED_LEN > file_len {
            return Err(ShapeError::corrupt(
                &path,
                format!(
                    "root offset {} outside file of {file_len} bytes",
                    header.root_offset
                ),
            ));
        }

        let index = Self {
            path,
            header,
            file_len,
            file: Mutex::new(Some(reader)),
        };
        // Reading the root catches truncated files before the first query.
        index.read_node(header.root_offset, u64::MAX)?;
        Ok(index)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &IndexHeader {
        &self.header
    }

    /// Read the node at `offset`. Children precede their parent, so `offset` must lie
    /// below `parent_offset`.
    fn read_node(&self, offset: u64, parent_offset: u64) -> Result<DiskNode> {
        if offset < HEADER_LEN || offset >= parent_offset || offset + NODE_FIXED_LEN > self.file_len
        {
            return Err(ShapeError::corrupt(
                &self.path,
                format!("node offset {offset} is invalid"),
            ));
        }

        let mut guard = self.file.lock();
        let reader = guard
            .as_mut()
            .ok_or_else(|| ShapeError::InvalidInput("index has been closed".into()))?;

        let mut fixed = [0u8; NODE_FIXED_LEN as usize];
        reader.seek(SeekFrom::Start(offset))?;
        reader.read_exact(&mut fixed)?;
        let (envelope, records, children) = decode_fixed(&fixed);

        let body_len = u64::from(records) * 4 + u64::from(children) * 8;
        if offset + NODE_FIXED_LEN + body_len > self.file_len {
            return Err(ShapeError::corrupt(
                &self.path,
                format!("node at {offset} runs past end of file"),
            ));
        }
        if envelope.min_x.is_nan()
            || envelope.min_y.is_nan()
            || envelope.max_x.is_nan()
            || envelope.max_y.is_nan()
        {
            return Err(ShapeError::corrupt(
                &self.path,
                format!("node at {offset} has a NaN envelope"),
            ));
        }

        let mut body = vec![0u8; body_len as usize];
        reader.read_exact(&mut body)?;
        drop(guard);

        let (records, children) = decode_body(&body, records, children);
        if let Some(bad) = records
            .iter()
            .find(|&&ordinal| ordinal >= self.header.record_count)
        {
            return Err(ShapeError::corrupt(
                &self.path,
                format!(
                    "ordinal {bad} in node at {offset} exceeds record count {}",
                    self.header.record_count
                ),
            ));
        }
        Ok(DiskNode {
            envelope,
            records,
            children,
        })
    }
}

impl std::fmt::Debug for DiskIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskIndex")
            .field("path", &self.path)
            .field("header", &self.header)
            .finish()
    }
}

impl SpatialIndexStore for DiskIndex {
    fn kind(&self) -> IndexKind {
        self.header.kind
    }

    fn record_count(&self) -> usize {
        self.header.record_count as usize
    }

    fn query<'a>(
        &'a self,
        envelope: &Envelope,
    ) -> Result<Box<dyn Iterator<Item = Result<u32>> + 'a>> {
        if self.file.lock().is_none() {
            return Err(ShapeError::InvalidInput("index has been closed".into()));
        }
        Ok(Box::new(DiskQuery {
            index: self,
            query: *envelope,
            stack: vec![(self.header.root_offset, u64::MAX)],
            pending: Vec::new().into_iter(),
            visited: 0,
            done: envelope.is_empty(),
        }))
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            kind: self.header.kind,
            record_count: self.header.record_count as usize,
            node_count: self.header.node_count as usize,
            max_depth: self.header.max_depth as usize,
            size_bytes: self.file_len,
        }
    }

    fn close(&mut self) -> Result<()> {
        self.file.lock().take();
        Ok(())
    }
}

/// Depth-first traversal over the node file.
struct DiskQuery<'a> {
    index: &'a DiskIndex,
    query: Envelope,
    /// `(node offset, parent offset)` pairs still to visit.
    stack: Vec<(u64, u64)>,
    pending: std::vec::IntoIter<u32>,
    visited: usize,
    done: bool,
}

impl Iterator for DiskQuery<'_> {
    type Item = Result<u32>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(ordinal) = self.pending.next() {
                return Some(Ok(ordinal));
            }
            if self.done {
                return None;
            }
            let Some((offset, parent)) = self.stack.pop() else {
                self.done = true;
                return None;
            };

            self.visited += 1;
            if self.visited > self.index.header.node_count as usize {
                self.done = true;
                return Some(Err(ShapeError::corrupt(
                    &self.index.path,
                    "traversal visited more nodes than the header declares",
                )));
            }

            let node = match self.index.read_node(offset, parent) {
                Ok(node) => node,
                Err(e) => {
                    self.done = true;
                    return Some(Err(as_corrupt(&self.index.path, e)));
                }
            };
            if !node.envelope.intersects(&self.query) {
                continue;
            }
            self.pending = node.records.into_iter();
            self.stack
                .extend(node.children.into_iter().rev().map(|child| (child, offset)));
        }
    }
}

/// Short reads in the middle of a query mean the file changed or was damaged.
fn as_corrupt(path: &Path, err: ShapeError) -> ShapeError {
    match err {
        ShapeError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            ShapeError::corrupt(path, format!("short read: {e}"))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn leaf(envelope: Envelope, records: Vec<u32>) -> BuildNode {
        BuildNode {
            envelope,
            records,
            children: Vec::new(),
        }
    }

    fn sample_tree() -> BuildNode {
        BuildNode {
            envelope: Envelope::new(0.0, 0.0, 10.0, 10.0),
            records: vec![0],
            children: vec![
                leaf(Envelope::new(0.0, 0.0, 4.0, 4.0), vec![1, 2]),
                leaf(Envelope::new(6.0, 6.0, 10.0, 10.0), vec![3]),
            ],
        }
    }

    fn query_sorted(index: &DiskIndex, envelope: Envelope) -> Vec<u32> {
        let mut hits: Vec<u32> = index
            .query(&envelope)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        hits.sort_unstable();
        hits
    }

    #[test]
    fn test_write_then_query() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tree.qix");
        write_tree(&path, IndexKind::Quad, &sample_tree(), 4, 1).unwrap();
        assert!(!path.with_extension("idx.tmp").exists());

        let index = DiskIndex::open(&path).unwrap();
        assert_eq!(index.record_count(), 4);
        assert_eq!(index.stats().node_count, 3);

        assert_eq!(query_sorted(&index, Envelope::new(1.0, 1.0, 2.0, 2.0)), vec![0, 1, 2]);
        assert_eq!(query_sorted(&index, Envelope::new(7.0, 7.0, 8.0, 8.0)), vec![0, 3]);
        assert_eq!(query_sorted(&index, Envelope::new(0.0, 0.0, 10.0, 10.0)), vec![0, 1, 2, 3]);
        assert!(query_sorted(&index, Envelope::new(20.0, 20.0, 30.0, 30.0)).is_empty());
    }

    #[test]
    fn test_interleaved_queries_are_independent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tree.sidx");
        write_tree(&path, IndexKind::RTree, &sample_tree(), 4, 2).unwrap();
        let index = DiskIndex::open(&path).unwrap();

        let mut a = index.query(&Envelope::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        let mut b = index.query(&Envelope::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        let first_a = a.next().unwrap().unwrap();
        let all_b: Vec<u32> = b.by_ref().collect::<Result<_>>().unwrap();
        let mut rest_a: Vec<u32> = a.collect::<Result<_>>().unwrap();
        rest_a.push(first_a);
        rest_a.sort_unstable();
        let mut all_b_sorted = all_b.clone();
        all_b_sorted.sort_unstable();
        assert_eq!(rest_a, all_b_sorted);
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tree.qix");
        write_tree(&path, IndexKind::Quad, &sample_tree(), 4, 1).unwrap();
        let data = std::fs::read(&path).unwrap();
        std::fs::write(&path, &data[..data.len() - 10]).unwrap();

        let err = DiskIndex::open(&path).unwrap_err();
        assert!(err.is_corrupt_index(), "{err}");
    }

    #[test]
    fn test_ordinal_beyond_record_count_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tree.qix");
        write_tree(&path, IndexKind::Quad, &sample_tree(), 2, 1).unwrap();

        // The root passes (ordinal 0), the leaves reference ordinals 2 and 3.
        let index = DiskIndex::open(&path).unwrap();
        let results: Vec<_> = index
            .query(&Envelope::new(0.0, 0.0, 10.0, 10.0))
            .unwrap()
            .collect();
        assert!(results.iter().any(|r| matches!(r, Err(e) if e.is_corrupt_index())));
    }

    #[test]
    fn test_missing_file_is_fatal_io() {
        let dir = TempDir::new().unwrap();
        let err = DiskIndex::open(dir.path().join("absent.qix")).unwrap_err();
        assert!(matches!(err, ShapeError::FatalIo { .. }));
    }

    #[test]
    fn test_closed_index_refuses_queries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tree.qix");
        write_tree(&path, IndexKind::Quad, &sample_tree(), 4, 1).unwrap();
        let mut index = DiskIndex::open(&path).unwrap();
        index.close().unwrap();
        assert!(index.query(&Envelope::new(0.0, 0.0, 1.0, 1.0)).is_err());
    }
}
