//! Sort-tile-recursive bulk loading.
//!
//! Leaves are packed from records sorted into vertical slices by centre x and then
//! by centre y within each slice; upper levels repeat the procedure over node
//! envelopes until a single root remains.

use super::node::BuildNode;
use crate::types::Envelope;

fn center_x(envelope: &Envelope) -> f64 {
    (envelope.min_x + envelope.max_x) / 2.0
}

fn center_y(envelope: &Envelope) -> f64 {
    (envelope.min_y + envelope.max_y) / 2.0
}

/// Partition `items` into groups of at most `capacity` using one STR pass.
fn tile<T>(
    mut items: Vec<T>,
    capacity: usize,
    envelope_of: impl Fn(&T) -> Envelope,
) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }
    let group_count = items.len().div_ceil(capacity);
    let slice_count = (group_count as f64).sqrt().ceil() as usize;
    let slice_len = slice_count * capacity;

    items.sort_by(|a, b| center_x(&envelope_of(a)).total_cmp(&center_x(&envelope_of(b))));

    let mut groups = Vec::with_capacity(group_count);
    let mut rest = items;
    while !rest.is_empty() {
        let tail = rest.split_off(slice_len.min(rest.len()));
        let mut slice = rest;
        rest = tail;

        slice.sort_by(|a, b| center_y(&envelope_of(a)).total_cmp(&center_y(&envelope_of(b))));
        while !slice.is_empty() {
            let tail = slice.split_off(capacity.min(slice.len()));
            groups.push(slice);
            slice = tail;
        }
    }
    groups
}

/// Pack `records` into an R-tree with at most `capacity` entries per node.
pub fn build(records: &[(u32, Envelope)], capacity: usize) -> BuildNode {
    let capacity = capacity.max(2);
    let live: Vec<(u32, Envelope)> = records
        .iter()
        .copied()
        .filter(|(_, envelope)| !envelope.is_empty())
        .collect();

    let mut level: Vec<BuildNode> = tile(live, capacity, |(_, envelope)| *envelope)
        .into_iter()
        .map(|group| {
            let mut envelope = Envelope::EMPTY;
            let mut ordinals: Vec<u32> = Vec::with_capacity(group.len());
            for (ordinal, record_env) in group {
                envelope.expand_to_include_envelope(&record_env);
                ordinals.push(ordinal);
            }
            ordinals.sort_unstable();
            BuildNode {
                envelope,
                records: ordinals,
                children: Vec::new(),
            }
        })
        .collect();

    while level.len() > 1 {
        level = tile(level, capacity, |node| node.envelope)
            .into_iter()
            .map(|children| {
                let mut envelope = Envelope::EMPTY;
                for child in &children {
                    envelope.expand_to_include_envelope(&child.envelope);
                }
                BuildNode {
                    envelope,
                    records: Vec::new(),
                    children,
                }
            })
            .collect();
    }
    level.pop().unwrap_or_default()
}
