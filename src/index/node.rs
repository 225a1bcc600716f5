//! On-disk layout shared by the quad-tree and R-tree index files.
//!
//! ```text
//! header (32 bytes, little-endian)
//!   magic "SHPSIDX1" | kind u8 | version u8 | reserved u16
//!   node count u32 | record count u32 | max depth u32 | root offset u64
//! nodes, post-order (children always precede their parent)
//!   envelope 4 x f64 | record count u32 | child count u32
//!   ordinals u32 x record count | child offsets u64 x child count
//! ```

use crate::config::IndexKind;
use crate::error::{Result, ShapeError};
use crate::types::Envelope;
use bytes::{Buf, BufMut, BytesMut};
use std::path::Path;

pub const MAGIC: &[u8; 8] = b"SHPSIDX1";
pub const VERSION: u8 = 1;
pub const HEADER_LEN: u64 = 32;
/// Envelope plus the two counts.
pub const NODE_FIXED_LEN: u64 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    pub kind: IndexKind,
    pub node_count: u32,
    pub record_count: u32,
    pub max_depth: u32,
    pub root_offset: u64,
}

fn kind_code(kind: IndexKind) -> u8 {
    match kind {
        IndexKind::Quad => 1,
        IndexKind::RTree => 2,
        IndexKind::Memory => 0,
    }
}

impl IndexHeader {
    pub fn encode(&self, out: &mut [u8]) {
        let mut buf = BytesMut::with_capacity(HEADER_LEN as usize);
        buf.put_slice(MAGIC);
        buf.put_u8(kind_code(self.kind));
        buf.put_u8(VERSION);
        buf.put_u16_le(0);
        buf.put_u32_le(self.node_count);
        buf.put_u32_le(self.record_count);
        buf.put_u32_le(self.max_depth);
        buf.put_u64_le(self.root_offset);
        out[..HEADER_LEN as usize].copy_from_slice(&buf);
    }

    pub fn decode(path: &Path, mut buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN as usize {
            return Err(ShapeError::corrupt(path, "index header truncated"));
        }
        if &buf[..8] != MAGIC {
            return Err(ShapeError::corrupt(path, "bad index magic"));
        }
        buf.advance(8);
        let kind = match buf.get_u8() {
            1 => IndexKind::Quad,
            2 => IndexKind::RTree,
            other => {
                return Err(ShapeError::corrupt(
                    path,
                    format!("unknown index kind {other}"),
                ));
            }
        };
        let version = buf.get_u8();
        if version != VERSION {
            return Err(ShapeError::corrupt(
                path,
                format!("unsupported index version {version}"),
            ));
        }
        buf.advance(2);
        Ok(Self {
            kind,
            node_count: buf.get_u32_le(),
            record_count: buf.get_u32_le(),
            max_depth: buf.get_u32_le(),
            root_offset: buf.get_u64_le(),
        })
    }
}

/// A tree node as built in memory, before serialisation.
#[derive(Debug, Clone, Default)]
pub struct BuildNode {
    pub envelope: Envelope,
    pub records: Vec<u32>,
    pub children: Vec<BuildNode>,
}

impl BuildNode {
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(BuildNode::node_count).sum::<usize>()
    }

    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(BuildNode::depth).max().unwrap_or(0)
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
            + self
                .children
                .iter()
                .map(BuildNode::record_count)
                .sum::<usize>()
    }
}

/// Append `node` and its subtree in post-order; returns the node's offset.
pub fn write_post_order(node: &BuildNode, out: &mut BytesMut) -> u64 {
    let child_offsets: Vec<u64> = node
        .children
        .iter()
        .map(|child| write_post_order(child, out))
        .collect();

    let offset = out.len() as u64;
    out.put_f64_le(node.envelope.min_x);
    out.put_f64_le(node.envelope.min_y);
    out.put_f64_le(node.envelope.max_x);
    out.put_f64_le(node.envelope.max_y);
    out.put_u32_le(node.records.len() as u32);
    out.put_u32_le(child_offsets.len() as u32);
    for ordinal in &node.records {
        out.put_u32_le(*ordinal);
    }
    for child in child_offsets {
        out.put_u64_le(child);
    }
    offset
}

/// A node read back from disk.
#[derive(Debug, Clone)]
pub struct DiskNode {
    pub envelope: Envelope,
    pub records: Vec<u32>,
    pub children: Vec<u64>,
}

/// Split the fixed part of a node into `(envelope, record count, child count)`.
pub fn decode_fixed(mut buf: &[u8]) -> (Envelope, u32, u32) {
    let envelope = Envelope {
        min_x: buf.get_f64_le(),
        min_y: buf.get_f64_le(),
        max_x: buf.get_f64_le(),
        max_y: buf.get_f64_le(),
    };
    (envelope, buf.get_u32_le(), buf.get_u32_le())
}

pub fn decode_body(mut buf: &[u8], records: u32, children: u32) -> (Vec<u32>, Vec<u64>) {
    let ordinals = (0..records).map(|_| buf.get_u32_le()).collect();
    let offsets = (0..children).map(|_| buf.get_u64_le()).collect();
    (ordinals, offsets)
}
