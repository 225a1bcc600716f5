mod common;

use common::{Event, Recorder, corrupt_part_index, diagonals, grid_points, squares};
use shapeview::prelude::*;
use shapeview::{RenderState, TransformError};
use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn paint(renderer: &ShapefileRenderer, envelope: Envelope) -> (RenderSummary, RasterSink) {
    let device = DeviceRect::sized(256, 256);
    let mut sink = RasterSink::new(device);
    let summary = renderer.paint(&mut sink, device, envelope).unwrap();
    (summary, sink)
}

#[test]
fn test_indexed_and_scanned_paints_agree() {
    let dir = TempDir::new().unwrap();
    let shp = diagonals(&dir, "lines", 40);
    let render = RenderConfig::default().with_screen_map(false);
    let dataset = Arc::new(
        DatasetBuilder::new(&shp)
            .render_config(render.clone())
            .build()
            .unwrap(),
    );
    dataset.index_all().unwrap();
    let query = Envelope::new(5.0, 5.0, 20.0, 20.0);

    let (indexed, indexed_sink) = paint(&ShapefileRenderer::new(Arc::clone(&dataset)), query);
    assert!(indexed.index_used);

    let scan_dataset = Arc::new(
        DatasetBuilder::new(&shp)
            .render_config(render.with_index(false))
            .build()
            .unwrap(),
    );
    let (scanned, scanned_sink) = paint(&ShapefileRenderer::new(scan_dataset), query);
    assert!(!scanned.index_used);

    assert_eq!(indexed.rendered, scanned.rendered);
    assert_eq!(scanned.rendered, 16);
    assert_eq!(indexed_sink.painted_pixels(), scanned_sink.painted_pixels());
}

#[test]
fn test_elided_points_land_on_pixels_painted_earlier() {
    let dir = TempDir::new().unwrap();
    let dataset = Arc::new(ShapefileDataset::open(grid_points(&dir, "stops", 100)).unwrap());
    let renderer = ShapefileRenderer::new(dataset);
    let recorder = Arc::new(Recorder::default());
    renderer.add_render_listener(recorder.clone());

    let device = DeviceRect::sized(4, 4);
    let envelope = Envelope::new(-1.0, -1.0, 10.0, 10.0);
    let mut sink = RasterSink::new(device);
    let summary = renderer.paint(&mut sink, device, envelope).unwrap();
    assert_eq!(summary.rendered + summary.elided, 100);
    assert!(summary.elided > 0);

    let affine = AffineTransform::world_to_screen(&envelope, &device).unwrap();
    let pixel_of = |ordinal: usize| {
        let (x, y) = affine
            .transform_point((ordinal % 10) as f64, (ordinal / 10) as f64)
            .unwrap();
        (x.floor() as i32, y.floor() as i32)
    };

    let rendered = recorder.rendered();
    assert_eq!(rendered.len(), summary.rendered);
    for ordinal in 0..100 {
        if rendered.contains(&ordinal) {
            continue;
        }
        let (x, y) = pixel_of(ordinal);
        assert!(sink.hits(x, y) > 0, "elided {ordinal} at unpainted ({x}, {y})");
        assert!(
            rendered.iter().any(|&r| r < ordinal && pixel_of(r) == (x, y)),
            "elided {ordinal} before any feature painted ({x}, {y})"
        );
    }
}

#[test]
fn test_zooming_out_never_renders_more() {
    let dir = TempDir::new().unwrap();
    let dataset = Arc::new(ShapefileDataset::open(squares(&dir, "squares", 20)).unwrap());
    dataset.index_all().unwrap();
    let renderer = ShapefileRenderer::new(dataset);

    let (zoomed_in, _) = paint(&renderer, Envelope::new(0.0, 0.0, 21.0, 21.0));
    let (zoomed_out, _) = paint(&renderer, Envelope::new(-2000.0, -2000.0, 2000.0, 2000.0));
    assert_eq!(zoomed_in.rendered, 20);
    assert!(zoomed_out.rendered <= zoomed_in.rendered);
    assert!(zoomed_out.rendered < 20);
    assert_eq!(zoomed_out.rendered + zoomed_out.elided, 20);
}

#[test]
fn test_missing_shx_falls_back_to_scan() {
    let dir = TempDir::new().unwrap();
    let shp = grid_points(&dir, "stops", 50);
    let dataset = Arc::new(ShapefileDataset::open(&shp).unwrap());
    dataset.index_all().unwrap();
    std::fs::remove_file(shp.with_extension("shx")).unwrap();

    let (summary, _) = paint(
        &ShapefileRenderer::new(dataset),
        Envelope::new(0.0, 0.0, 9.0, 4.0),
    );
    assert!(!summary.index_used);
    assert_eq!(summary.candidates, 50);
    assert_eq!(summary.rendered + summary.elided, 50);
}

#[test]
fn test_corrupt_shx_falls_back_to_scan() {
    let dir = TempDir::new().unwrap();
    let shp = grid_points(&dir, "stops", 10);
    let dataset = Arc::new(ShapefileDataset::open(&shp).unwrap());
    dataset.index_all().unwrap();
    std::fs::write(shp.with_extension("shx"), b"not an index").unwrap();

    let (summary, _) = paint(
        &ShapefileRenderer::new(dataset),
        Envelope::new(-1.0, -1.0, 10.0, 1.0),
    );
    assert!(!summary.index_used);
    assert_eq!(summary.rendered, 10);
}

#[test]
fn test_corrupt_shx_entry_is_reported_and_skipped() {
    let dir = TempDir::new().unwrap();
    let shp = diagonals(&dir, "lines", 10);
    let dataset = Arc::new(ShapefileDataset::open(&shp).unwrap());
    dataset.index_all().unwrap();

    // Entry 3's offset word, past the 100-byte header.
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .open(shp.with_extension("shx"))
        .unwrap();
    file.seek(SeekFrom::Start(100 + 3 * 8)).unwrap();
    file.write_all(&(-1i32).to_be_bytes()).unwrap();
    drop(file);

    let renderer = ShapefileRenderer::new(dataset);
    let recorder = Arc::new(Recorder::default());
    renderer.add_render_listener(recorder.clone());

    let (summary, _) = paint(&renderer, Envelope::new(0.0, 0.0, 10.0, 10.0));
    assert!(summary.index_used);
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.rendered, 9);
    assert_eq!(recorder.errors(), 1);
    assert!(!recorder.rendered().contains(&3));
}

#[test]
fn test_decode_error_is_reported_and_skipped() {
    let dir = TempDir::new().unwrap();
    let shp = diagonals(&dir, "lines", 10);
    corrupt_part_index(&shp, 4);

    let dataset = Arc::new(ShapefileDataset::open(&shp).unwrap());
    let renderer = ShapefileRenderer::new(dataset);
    let recorder = Arc::new(Recorder::default());
    renderer.add_render_listener(recorder.clone());

    let (summary, _) = paint(&renderer, Envelope::new(0.0, 0.0, 10.0, 10.0));
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.rendered, 9);
    assert_eq!(recorder.errors(), 1);
    assert!(!recorder.rendered().contains(&4));
    assert!(recorder.rendered().contains(&5));
}

#[test]
fn test_state_sequence_for_one_feature() {
    let dir = TempDir::new().unwrap();
    let dataset = Arc::new(ShapefileDataset::open(grid_points(&dir, "stops", 1)).unwrap());
    let renderer = ShapefileRenderer::new(dataset);
    let recorder = Arc::new(Recorder::default());
    renderer.add_render_listener(recorder.clone());

    paint(&renderer, Envelope::new(-1.0, -1.0, 1.0, 1.0));

    use RenderState::*;
    assert_eq!(
        *recorder.events.lock(),
        vec![
            Event::State(Idle, Querying),
            Event::State(Querying, Fetching),
            Event::State(Fetching, Decoding),
            Event::State(Decoding, Painting),
            Event::Rendered(0),
            Event::State(Painting, Idle),
        ]
    );
}

#[test]
fn test_cancel_before_paint_emits_no_features() {
    let dir = TempDir::new().unwrap();
    let dataset = Arc::new(ShapefileDataset::open(grid_points(&dir, "stops", 100)).unwrap());
    let renderer = ShapefileRenderer::new(dataset);
    let recorder = Arc::new(Recorder::default());
    renderer.add_render_listener(recorder.clone());

    let cancel = CancelHandle::new();
    cancel.cancel();
    let device = DeviceRect::sized(64, 64);
    let mut sink = RasterSink::new(device);
    let summary = renderer
        .paint_with_cancel(&mut sink, device, Envelope::new(0.0, 0.0, 9.0, 9.0), &cancel)
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.rendered, 0);
    use RenderState::*;
    assert_eq!(
        *recorder.events.lock(),
        vec![
            Event::State(Idle, Querying),
            Event::State(Querying, Cancelled),
            Event::State(Cancelled, Idle),
        ]
    );
    assert_eq!(sink.painted_pixels(), 0);
}

#[test]
fn test_cancel_from_another_thread() {
    struct CancelAfter {
        cancel: CancelHandle,
        after: usize,
        seen: parking_lot::Mutex<usize>,
    }

    impl RenderListener for CancelAfter {
        fn feature_rendered(&self, _feature: &shapeview::Feature<'_>) {
            let mut seen = self.seen.lock();
            *seen += 1;
            if *seen % self.after == 0 {
                let cancel = self.cancel.clone();
                thread::spawn(move || cancel.cancel()).join().unwrap();
            }
        }
    }

    let dir = TempDir::new().unwrap();
    let dataset = Arc::new(
        DatasetBuilder::new(grid_points(&dir, "stops", 100))
            .render_config(RenderConfig::default().with_screen_map(false))
            .build()
            .unwrap(),
    );
    let renderer = ShapefileRenderer::new(dataset);
    let cancel = CancelHandle::new();
    renderer.add_render_listener(Arc::new(CancelAfter {
        cancel: cancel.clone(),
        after: 7,
        seen: parking_lot::Mutex::new(0),
    }));

    let device = DeviceRect::sized(64, 64);
    let mut sink = RasterSink::new(device);
    let summary = renderer
        .paint_with_cancel(&mut sink, device, Envelope::new(0.0, 0.0, 9.0, 9.0), &cancel)
        .unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.rendered, 7);

    cancel.reset();
    let summary = renderer
        .paint_with_cancel(&mut sink, device, Envelope::new(0.0, 0.0, 9.0, 9.0), &cancel)
        .unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.rendered, 7);
}

#[test]
fn test_failed_vertices_are_substituted() {
    let dir = TempDir::new().unwrap();
    let dataset = Arc::new(ShapefileDataset::open(diagonals(&dir, "lines", 4)).unwrap());
    // Middle vertices sit at x = i + 0.25; fail exactly those.
    let renderer = ShapefileRenderer::new(dataset).with_projection(|x: f64, y: f64| {
        if x.fract() == 0.25 {
            Err(TransformError::new(x, y, "outside projection domain"))
        } else {
            Ok((x, y))
        }
    });

    let (summary, _) = paint(&renderer, Envelope::new(0.0, 0.0, 4.0, 4.0));
    assert_eq!(summary.rendered, 4);
    assert_eq!(summary.substituted, 4);
    assert_eq!(summary.errors, 0);
}

#[test]
fn test_failed_first_vertex_skips_feature() {
    let dir = TempDir::new().unwrap();
    let dataset = Arc::new(ShapefileDataset::open(diagonals(&dir, "lines", 4)).unwrap());
    let renderer = ShapefileRenderer::new(dataset).with_projection(|x: f64, y: f64| {
        if x == 2.0 && y == 2.0 {
            Err(TransformError::new(x, y, "singular point"))
        } else {
            Ok((x, y))
        }
    });
    let recorder = Arc::new(Recorder::default());
    renderer.add_render_listener(recorder.clone());

    let (summary, _) = paint(&renderer, Envelope::new(0.0, 0.0, 4.0, 4.0));
    assert_eq!(summary.rendered, 3);
    assert_eq!(summary.errors, 1);
    assert!(!recorder.rendered().contains(&2));
}

#[test]
fn test_degenerate_paint_envelope_is_rejected() {
    let dir = TempDir::new().unwrap();
    let dataset = Arc::new(ShapefileDataset::open(grid_points(&dir, "stops", 3)).unwrap());
    let renderer = ShapefileRenderer::new(dataset);
    let device = DeviceRect::sized(10, 10);
    let mut sink = RasterSink::new(device);
    assert!(matches!(
        renderer.paint(&mut sink, device, Envelope::point(1.0, 1.0)),
        Err(ShapeError::InvalidInput(_))
    ));
    assert!(matches!(
        renderer.paint(&mut sink, DeviceRect::sized(0, 10), Envelope::new(0.0, 0.0, 1.0, 1.0)),
        Err(ShapeError::InvalidInput(_))
    ));
}

#[test]
fn test_paint_outside_layer_renders_nothing() {
    let dir = TempDir::new().unwrap();
    let dataset = Arc::new(ShapefileDataset::open(grid_points(&dir, "stops", 30)).unwrap());
    let recorder = Arc::new(Recorder::default());
    let renderer = ShapefileRenderer::new(dataset);
    renderer.add_render_listener(recorder.clone());

    let (summary, sink) = paint(&renderer, Envelope::new(100.0, 100.0, 200.0, 200.0));
    assert_eq!(summary.candidates, 0);
    assert_eq!(sink.painted_pixels(), 0);
    assert_eq!(
        *recorder.events.lock(),
        vec![
            Event::State(RenderState::Idle, RenderState::Querying),
            Event::State(RenderState::Querying, RenderState::Idle),
        ]
    );
}
