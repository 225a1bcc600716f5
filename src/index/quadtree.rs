//! Depth-bounded quad-tree with lowest-common-ancestor placement.
//!
//! Each record lives in the deepest node whose quadrant fully contains its envelope.
//! A leaf splits into four quadrants once it holds more than `node_capacity` records,
//! unless it is already at `max_depth`. Records straddling a split line stay in the
//! parent.

use super::node::BuildNode;
use crate::config::IndexConfig;
use crate::types::Envelope;

#[derive(Debug)]
struct QuadNode {
    bounds: Envelope,
    records: Vec<(u32, Envelope)>,
    children: Option<Box<[QuadNode; 4]>>,
}

impl QuadNode {
    fn new(bounds: Envelope) -> Self {
        Self {
            bounds,
            records: Vec::new(),
            children: None,
        }
    }

    fn insert(&mut self, ordinal: u32, envelope: Envelope, depth: usize, config: &IndexConfig) {
        if let Some(children) = self.children.as_mut() {
            if let Some(child) = children.iter_mut().find(|c| c.bounds.contains(&envelope)) {
                child.insert(ordinal, envelope, depth + 1, config);
            } else {
                self.records.push((ordinal, envelope));
            }
            return;
        }

        self.records.push((ordinal, envelope));
        if self.records.len() > config.node_capacity && depth < config.max_depth {
            self.split(depth, config);
        }
    }

    fn split(&mut self, depth: usize, config: &IndexConfig) {
        let [sw, se, nw, ne] = self.bounds.quadrants();
        self.children = Some(Box::new([
            QuadNode::new(sw),
            QuadNode::new(se),
            QuadNode::new(nw),
            QuadNode::new(ne),
        ]));
        for (ordinal, envelope) in std::mem::take(&mut self.records) {
            self.insert(ordinal, envelope, depth, config);
        }
    }

    /// Convert to the serialisable form. Node envelopes are tightened to the union of
    /// what the subtree actually holds and empty subtrees are dropped.
    fn into_build_node(self) -> Option<BuildNode> {
        let mut envelope = Envelope::EMPTY;
        let mut records: Vec<u32> = Vec::with_capacity(self.records.len());
        for (ordinal, record_env) in &self.records {
            envelope.expand_to_include_envelope(record_env);
            records.push(*ordinal);
        }
        records.sort_unstable();

        let children: Vec<BuildNode> = self
            .children
            .map(|children| {
                let children: [QuadNode; 4] = *children;
                children
                    .into_iter()
                    .filter_map(QuadNode::into_build_node)
                    .collect()
            })
            .unwrap_or_default();
        for child in &children {
            envelope.expand_to_include_envelope(&child.envelope);
        }

        if records.is_empty() && children.is_empty() {
            return None;
        }
        Some(BuildNode {
            envelope,
            records,
            children,
        })
    }
}

/// Build a quad-tree over `records`.
///
/// `bounds` seeds the root quadrant; it is widened to cover every record so that
/// LCA placement never has to keep an out-of-bounds record at the root.
pub fn build(records: &[(u32, Envelope)], bounds: Envelope, config: &IndexConfig) -> BuildNode {
    let mut root_bounds = if bounds.is_finite() && !bounds.is_empty() {
        bounds
    } else {
        Envelope::EMPTY
    };
    for (_, envelope) in records {
        root_bounds.expand_to_include_envelope(envelope);
    }

    let mut root = QuadNode::new(root_bounds);
    for (ordinal, envelope) in records {
        root.insert(*ordinal, *envelope, 0, config);
    }
    root.into_build_node().unwrap_or_default()
}
