//! In-memory R*-tree backed by `rstar`.
//!
//! Built in one pass like the file-backed variants but never written out. Useful for
//! read-only media and for datasets that are rendered many times per process.

use super::{IndexStats, SpatialIndexStore};
use crate::config::IndexKind;
use crate::error::Result;
use crate::types::Envelope;
use rstar::{AABB, RTree, RTreeObject};

#[derive(Debug, Clone, Copy, PartialEq)]
struct IndexedEnvelope {
    ordinal: u32,
    envelope: Envelope,
}

impl RTreeObject for IndexedEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.envelope.min_x, self.envelope.min_y],
            [self.envelope.max_x, self.envelope.max_y],
        )
    }
}

#[derive(Debug)]
pub struct MemoryIndex {
    tree: RTree<IndexedEnvelope>,
    record_count: usize,
}

impl MemoryIndex {
    /// Bulk-load `records`; empty envelopes are not indexed but still counted.
    pub fn build(records: &[(u32, Envelope)], record_count: usize) -> Self {
        let objects: Vec<IndexedEnvelope> = records
            .iter()
            .filter(|(_, envelope)| !envelope.is_empty())
            .map(|&(ordinal, envelope)| IndexedEnvelope { ordinal, envelope })
            .collect();
        Self {
            tree: RTree::bulk_load(objects),
            record_count,
        }
    }
}

impl SpatialIndexStore for MemoryIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Memory
    }

    fn record_count(&self) -> usize {
        self.record_count
    }

    fn query<'a>(
        &'a self,
        envelope: &Envelope,
    ) -> Result<Box<dyn Iterator<Item = Result<u32>> + 'a>> {
        if envelope.is_empty() {
            return Ok(Box::new(std::iter::empty()));
        }
        let aabb = AABB::from_corners(
            [envelope.min_x, envelope.min_y],
            [envelope.max_x, envelope.max_y],
        );
        Ok(Box::new(
            self.tree
                .locate_in_envelope_intersecting(&aabb)
                .map(|item| Ok(item.ordinal)),
        ))
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            kind: IndexKind::Memory,
            record_count: self.record_count,
            node_count: 0,
            max_depth: 0,
            size_bytes: 0,
        }
    }

    fn close(&mut self) -> Result<()> {
        self.tree = RTree::new();
        Ok(())
    }
}
