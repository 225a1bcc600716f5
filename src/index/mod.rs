//! Spatial indexes mapping a query envelope to candidate record ordinals.
//!
//! Two file-backed trees share one node format ([`node`]): a quad-tree with
//! lowest-common-ancestor placement ([`quadtree`]) and an STR-packed R-tree
//! ([`rtree`]). [`MemoryIndex`] keeps an rstar tree in memory instead.
//!
//! Queries return supersets: every record whose envelope intersects the query
//! envelope is yielded, possibly along with some that do not.

mod disk;
pub mod memory;
pub mod node;
pub mod quadtree;
pub mod rtree;

pub use disk::DiskIndex;
pub use memory::MemoryIndex;

use crate::config::{IndexConfig, IndexKind};
use crate::error::{Result, ShapeError};
use crate::types::Envelope;
use std::path::Path;

/// Diagnostics for an open index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct IndexStats {
    pub kind: IndexKind,
    pub record_count: usize,
    pub node_count: usize,
    pub max_depth: usize,
    /// On-disk size; zero for the in-memory backend.
    pub size_bytes: u64,
}

/// Read side shared by every index backend.
pub trait SpatialIndexStore: Send + Sync {
    fn kind(&self) -> IndexKind;

    /// Number of records in the geometry file the index was built from.
    fn record_count(&self) -> usize;

    /// Lazily yield candidate ordinals for `envelope`.
    ///
    /// Each call has its own traversal state. A damaged file surfaces as a
    /// [`ShapeError::CorruptIndex`] item, after which the iterator ends.
    fn query<'a>(&'a self, envelope: &Envelope)
    -> Result<Box<dyn Iterator<Item = Result<u32>> + 'a>>;

    fn stats(&self) -> IndexStats;

    /// Release file handles. Later queries fail.
    fn close(&mut self) -> Result<()>;
}

/// Build an index over `(ordinal, envelope)` pairs in one pass.
///
/// `bounds` is the layer extent from the geometry file header; it seeds the quad-tree
/// root. File-backed kinds are written to `path` and reopened; [`IndexKind::Memory`]
/// ignores it.
pub fn build<I>(
    records: I,
    bounds: Envelope,
    config: &IndexConfig,
    path: Option<&Path>,
) -> Result<Box<dyn SpatialIndexStore>>
where
    I: IntoIterator<Item = Result<(usize, Envelope)>>,
{
    config.validate().map_err(ShapeError::Config)?;

    let mut entries: Vec<(u32, Envelope)> = Vec::new();
    let mut record_count = 0usize;
    for item in records {
        let (ordinal, envelope) = item?;
        record_count = record_count.max(ordinal + 1);
        if envelope.is_empty() {
            continue;
        }
        let ordinal = u32::try_from(ordinal)
            .map_err(|_| ShapeError::InvalidInput(format!("ordinal {ordinal} exceeds u32")))?;
        entries.push((ordinal, envelope));
    }

    let (tree, depth) = match config.kind {
        IndexKind::Memory => {
            log::debug!("built in-memory index over {} records", entries.len());
            return Ok(Box::new(MemoryIndex::build(&entries, record_count)));
        }
        IndexKind::Quad => (quadtree::build(&entries, bounds, config), config.max_depth),
        IndexKind::RTree => {
            let tree = rtree::build(&entries, config.node_capacity);
            let depth = tree.depth();
            (tree, depth)
        }
    };

    let path = path.ok_or_else(|| {
        ShapeError::InvalidInput(format!("{:?} index requires an output path", config.kind))
    })?;
    disk::write_tree(path, config.kind, &tree, record_count, depth)?;
    Ok(Box::new(DiskIndex::open(path)?))
}

/// Open an index file, checking it against the geometry file's record count.
pub fn open<P: AsRef<Path>>(path: P, expected_records: Option<usize>) -> Result<DiskIndex> {
    let index = DiskIndex::open(path)?;
    if let Some(expected) = expected_records
        && index.record_count() != expected
    {
        return Err(ShapeError::corrupt(
            index.path(),
            format!(
                "stale index: built over {} records, geometry file has {expected}",
                index.record_count()
            ),
        ));
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(n: usize) -> Vec<(usize, Envelope)> {
        (0..n)
            .map(|i| {
                let x = (i * 37 % 101) as f64;
                let y = (i * 53 % 97) as f64;
                let size = (i % 7) as f64;
                (i, Envelope::new(x, y, x + size, y + size))
            })
            .collect()
    }

    fn brute_force(records: &[(usize, Envelope)], query: &Envelope) -> Vec<u32> {
        records
            .iter()
            .filter(|(_, env)| env.intersects(query))
            .map(|(i, _)| *i as u32)
            .collect()
    }

    fn assert_sound(index: &dyn SpatialIndexStore, records: &[(usize, Envelope)]) {
        for query in [
            Envelope::new(0.0, 0.0, 10.0, 10.0),
            Envelope::new(50.0, 50.0, 50.0, 50.0),
            Envelope::new(-5.0, 20.0, 120.0, 30.0),
            Envelope::new(90.0, 0.0, 110.0, 110.0),
        ] {
            let hits: Vec<u32> = index.query(&query).unwrap().collect::<Result<_>>().unwrap();
            for expected in brute_force(records, &query) {
                assert!(
                    hits.contains(&expected),
                    "{:?} missed {expected} for {query:?}",
                    index.kind()
                );
            }
        }
    }

    #[test]
    fn test_all_kinds_are_sound() {
        let dir = TempDir::new().unwrap();
        let records = sample(500);
        let bounds = Envelope::new(0.0, 0.0, 107.0, 103.0);
        for (config, file) in [
            (IndexConfig::quad().with_node_capacity(4), "data.qix"),
            (IndexConfig::rtree().with_node_capacity(6), "data.sidx"),
            (IndexConfig::default().with_kind(IndexKind::Memory), "unused"),
        ] {
            let path = dir.path().join(file);
            let index =
                build(records.iter().copied().map(Ok), bounds, &config, Some(&path)).unwrap();
            assert_eq!(index.record_count(), 500);
            assert_eq!(index.kind(), config.kind);
            assert_sound(index.as_ref(), &records);
        }
    }

    #[test]
    fn test_stale_index_rejected_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.qix");
        build(
            sample(10).into_iter().map(Ok),
            Envelope::EMPTY,
            &IndexConfig::quad(),
            Some(&path),
        )
        .unwrap();

        assert!(open(&path, Some(10)).is_ok());
        assert!(open(&path, Some(11)).unwrap_err().is_corrupt_index());
    }

    #[test]
    fn test_disk_kind_requires_path() {
        let err = build(
            sample(3).into_iter().map(Ok),
            Envelope::EMPTY,
            &IndexConfig::rtree(),
            None,
        );
        assert!(matches!(err, Err(ShapeError::InvalidInput(_))));
    }

    #[test]
    fn test_source_error_aborts_build() {
        let records = vec![Ok((0, Envelope::point(0.0, 0.0))), Err(ShapeError::UnexpectedEof)];
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.qix");
        assert!(build(records, Envelope::EMPTY, &IndexConfig::quad(), Some(&path)).is_err());
        assert!(!path.exists());
    }
}
