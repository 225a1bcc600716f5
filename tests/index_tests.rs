mod common;

use common::{diagonals, grid_points, query_boxes, squares};
use shapeview::prelude::*;
use shapeview::{IndexLocks, SpatialIndexStore};
use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

fn brute_force(dataset: &ShapefileDataset, query: &Envelope) -> BTreeSet<u32> {
    let mut session = dataset.open_session().unwrap();
    session
        .reader()
        .envelopes()
        .map(Result::unwrap)
        .filter(|(_, envelope)| envelope.intersects(query))
        .map(|(ordinal, _)| ordinal as u32)
        .collect()
}

#[test]
fn test_every_index_kind_is_sound() {
    for kind in [IndexKind::Quad, IndexKind::RTree, IndexKind::Memory] {
        let dir = TempDir::new().unwrap();
        let dataset = DatasetBuilder::new(grid_points(&dir, "grid", 400))
            .index_config(IndexConfig::default().with_kind(kind).with_node_capacity(4))
            .build()
            .unwrap();
        let report = dataset.index_all().unwrap();
        assert_eq!(report.records, 400);
        assert_eq!(report.spatial.kind, kind);

        let session = dataset.open_session().unwrap();
        for query in query_boxes(50, 40.0) {
            let candidates: BTreeSet<u32> =
                session.candidates(&query).unwrap().into_iter().collect();
            let expected = brute_force(&dataset, &query);
            assert!(
                expected.is_subset(&candidates),
                "{kind:?} missed {:?} for {query:?}",
                expected.difference(&candidates).collect::<Vec<_>>()
            );
        }
    }
}

#[test]
fn test_quad_tree_places_spanning_lines_high() {
    let dir = TempDir::new().unwrap();
    let dataset = DatasetBuilder::new(diagonals(&dir, "lines", 64))
        .index_config(IndexConfig::quad().with_node_capacity(2).with_max_depth(6))
        .build()
        .unwrap();
    let stats = dataset.build_spatial_index().unwrap();
    assert_eq!(stats.record_count, 64);
    assert!(stats.node_count > 1);
    assert!(stats.max_depth <= 6);

    let session = dataset.open_session().unwrap();
    let hits = session.candidates(&Envelope::new(10.1, 10.1, 10.2, 10.2)).unwrap();
    assert!(hits.contains(&10));
}

#[test]
fn test_full_bounds_query_returns_each_polygon_once() {
    let dir = TempDir::new().unwrap();
    let dataset = DatasetBuilder::new(squares(&dir, "squares", 50))
        .index_config(IndexConfig::quad().with_node_capacity(4))
        .build()
        .unwrap();
    dataset.index_all().unwrap();

    let session = dataset.open_session().unwrap();
    let mut hits = session
        .candidates(&Envelope::new(0.0, 0.0, 51.0, 51.0))
        .unwrap();
    hits.sort_unstable();
    assert_eq!(hits, (0..50).collect::<Vec<u32>>());
}

#[test]
fn test_index_file_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let shp = grid_points(&dir, "grid", 100);
    let dataset = DatasetBuilder::new(&shp)
        .index_config(IndexConfig::rtree())
        .build()
        .unwrap();
    dataset.build_spatial_index().unwrap();
    drop(dataset);

    let reopened = DatasetBuilder::new(&shp)
        .index_config(IndexConfig::rtree())
        .build()
        .unwrap();
    let session = reopened.open_session().unwrap();
    let index = session.spatial_index().unwrap();
    assert_eq!(index.kind(), IndexKind::RTree);
    assert_eq!(index.record_count(), 100);
    let hits = session.candidates(&Envelope::point(3.0, 4.0)).unwrap();
    assert!(hits.contains(&43));
    assert!(hits.len() < 100);
}

#[test]
fn test_truncated_index_falls_back_to_scan() {
    let dir = TempDir::new().unwrap();
    let dataset = ShapefileDataset::open(grid_points(&dir, "grid", 100)).unwrap();
    dataset.index_all().unwrap();

    let qix = dataset.paths().spatial_index.clone().unwrap();
    let len = std::fs::metadata(&qix).unwrap().len();
    let file = std::fs::OpenOptions::new().write(true).open(&qix).unwrap();
    file.set_len(len / 2).unwrap();

    let session = dataset.open_session().unwrap();
    assert!(session.spatial_index().is_none());
    assert!(session.candidates(&Envelope::point(1.0, 1.0)).is_none());
}

#[test]
fn test_closed_index_rejects_queries() {
    let dir = TempDir::new().unwrap();
    let shp = grid_points(&dir, "grid", 20);
    let dataset = ShapefileDataset::open(&shp).unwrap();
    dataset.build_spatial_index().unwrap();

    let path = dataset.paths().spatial_index.clone().unwrap();
    let mut index = shapeview::index::open(&path, Some(20)).unwrap();
    assert!(index.query(&Envelope::point(1.0, 0.0)).is_ok());
    index.close().unwrap();
    assert!(index.query(&Envelope::point(1.0, 0.0)).is_err());
}

#[test]
fn test_concurrent_sessions_share_one_index() {
    let dir = TempDir::new().unwrap();
    let locks = IndexLocks::new();
    let dataset = Arc::new(
        DatasetBuilder::new(grid_points(&dir, "grid", 200))
            .locks(locks.clone())
            .build()
            .unwrap(),
    );
    dataset.index_all().unwrap();

    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let dataset = Arc::clone(&dataset);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let session = dataset.open_session().unwrap();
                barrier.wait();
                let y = t as f64;
                session
                    .candidates(&Envelope::new(0.0, y, 9.0, y))
                    .unwrap()
                    .len()
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap() >= 10);
    }

    // Readers are gone, so the indexer can take the write side again.
    assert!(locks.try_write(&dataset.paths().shp).is_some());
}

#[test]
fn test_open_session_blocks_rebuild() {
    let dir = TempDir::new().unwrap();
    let locks = IndexLocks::new();
    let dataset = DatasetBuilder::new(grid_points(&dir, "grid", 10))
        .locks(locks.clone())
        .build()
        .unwrap();

    let session = dataset.open_session().unwrap();
    assert!(locks.try_write(&dataset.paths().shp).is_none());
    drop(session);
    assert!(locks.try_write(&dataset.paths().shp).is_some());
}
