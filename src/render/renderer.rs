use super::listener::{FeatureFilter, RenderListener, StyleProvider};
use super::sink::{GraphicsSink, Style, pixel};
use super::{CancelHandle, Feature, ListenerId, RenderState, RenderSummary};
use crate::config::RenderConfig;
use crate::dataset::{DatasetSession, FidTable, ShapefileDataset};
use crate::error::{Result, ShapeError, TransformError};
use crate::screen_map::ScreenMap;
use crate::shape::part_ranges;
use crate::shp::RawRecord;
use crate::transform::{self, AffineTransform, CoordinateTransform};
use crate::types::{DeviceRect, Envelope, ShapeKind};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

type Projection = dyn CoordinateTransform + Send + Sync;

/// Paints one shapefile layer onto a [`GraphicsSink`].
///
/// The renderer is shareable across threads; every [`ShapefileRenderer::paint`] call
/// opens its own [`DatasetSession`] and owns its screen map and scratch buffers.
pub struct ShapefileRenderer {
    dataset: Arc<ShapefileDataset>,
    projection: Option<Arc<Projection>>,
    filter: Option<Arc<dyn FeatureFilter>>,
    style: Arc<dyn StyleProvider>,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn RenderListener>)>>,
    next_listener: AtomicU64,
}

impl ShapefileRenderer {
    pub fn new(dataset: Arc<ShapefileDataset>) -> Self {
        Self {
            dataset,
            projection: None,
            filter: None,
            style: Arc::new(Style::default()),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Transform from the layer CRS to the map CRS, applied before the screen mapping.
    pub fn with_projection<T>(mut self, projection: T) -> Self
    where
        T: CoordinateTransform + Send + Sync + 'static,
    {
        self.projection = Some(Arc::new(projection));
        self
    }

    pub fn with_filter<F: FeatureFilter + 'static>(mut self, filter: F) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn with_style<S: StyleProvider + 'static>(mut self, style: S) -> Self {
        self.style = Arc::new(style);
        self
    }

    pub fn dataset(&self) -> &Arc<ShapefileDataset> {
        &self.dataset
    }

    pub fn add_render_listener(&self, listener: Arc<dyn RenderListener>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Returns `false` if `id` was not registered.
    pub fn remove_render_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Paint the part of the layer inside `envelope` (layer coordinates) onto `device`.
    pub fn paint(
        &self,
        sink: &mut dyn GraphicsSink,
        device: DeviceRect,
        envelope: Envelope,
    ) -> Result<RenderSummary> {
        self.paint_with_cancel(sink, device, envelope, &CancelHandle::new())
    }

    /// Like [`ShapefileRenderer::paint`], stopping at the next record boundary once
    /// `cancel` is set. A cancelled paint returns `Ok` with `cancelled` set.
    pub fn paint_with_cancel(
        &self,
        sink: &mut dyn GraphicsSink,
        device: DeviceRect,
        envelope: Envelope,
        cancel: &CancelHandle,
    ) -> Result<RenderSummary> {
        envelope.validate()?;
        let config = &self.dataset.config().render;
        let affine = AffineTransform::world_to_screen(&self.map_envelope(&envelope)?, &device)?;

        let listeners: Vec<Arc<dyn RenderListener>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        let mut session = self.dataset.open_session()?;
        let mut paint = PaintContext {
            renderer: self,
            config,
            listeners,
            cancel,
            screen: ScreenTransform {
                projection: self.projection.as_deref(),
                affine,
            },
            screen_map: ScreenMap::for_device(&device),
            query: envelope,
            summary: RenderSummary::default(),
            state: RenderState::Idle,
            src: Vec::new(),
            dest: Vec::new(),
            parts: Vec::new(),
        };

        paint.transition(RenderState::Querying);
        let bounds = session.reader.bounds();
        if bounds.is_finite() && !bounds.is_empty() {
            match envelope.intersection(&bounds) {
                Some(query) => paint.query = query,
                None => {
                    log::debug!("paint envelope {envelope:?} misses layer bounds {bounds:?}");
                    return Ok(paint.finish());
                }
            }
        }
        if paint.cancelled() {
            return Ok(paint.finish_cancelled());
        }

        let candidates = if config.use_index {
            session.candidates(&paint.query)
        } else {
            None
        };
        match candidates {
            Some(ordinals) => {
                paint.summary.index_used = true;
                paint.run_indexed(&mut session, &ordinals, sink)
            }
            None => paint.run_scan(&mut session, sink),
        }
    }

    /// Paint envelope in the map CRS: the projected corners' bounds.
    fn map_envelope(&self, envelope: &Envelope) -> Result<Envelope> {
        let Some(projection) = &self.projection else {
            return Ok(*envelope);
        };
        let mut out = Envelope::EMPTY;
        for (x, y) in [
            (envelope.min_x, envelope.min_y),
            (envelope.max_x, envelope.min_y),
            (envelope.min_x, envelope.max_y),
            (envelope.max_x, envelope.max_y),
        ] {
            let (px, py) = projection.transform_point(x, y)?;
            out.expand_to_include(px, py);
        }
        Ok(out)
    }
}

impl std::fmt::Debug for ShapefileRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShapefileRenderer")
            .field("dataset", &self.dataset.paths().shp)
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

/// Optional projection followed by the world-to-screen affine.
struct ScreenTransform<'a> {
    projection: Option<&'a Projection>,
    affine: AffineTransform,
}

impl CoordinateTransform for ScreenTransform<'_> {
    fn transform_point(&self, x: f64, y: f64) -> std::result::Result<(f64, f64), TransformError> {
        let (x, y) = match self.projection {
            Some(projection) => projection.transform_point(x, y)?,
            None => (x, y),
        };
        self.affine.transform_point(x, y)
    }
}

/// State owned by a single paint call.
struct PaintContext<'a> {
    renderer: &'a ShapefileRenderer,
    config: &'a RenderConfig,
    listeners: Vec<Arc<dyn RenderListener>>,
    cancel: &'a CancelHandle,
    screen: ScreenTransform<'a>,
    screen_map: ScreenMap,
    /// Paint envelope clipped to the layer bounds, in layer coordinates.
    query: Envelope,
    summary: RenderSummary,
    state: RenderState,
    src: Vec<f64>,
    dest: Vec<f64>,
    parts: Vec<u32>,
}

impl PaintContext<'_> {
    fn transition(&mut self, next: RenderState) {
        if self.state == next {
            return;
        }
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid render transition {:?} -> {next:?}",
            self.state
        );
        let previous = std::mem::replace(&mut self.state, next);
        log::trace!("render state {previous:?} -> {next:?}");
        for listener in &self.listeners {
            listener.state_changed(previous, next);
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Only the `Cancelled` and `Idle` state changes are reported after cancellation;
    /// no feature or error callbacks follow.
    fn finish_cancelled(mut self) -> RenderSummary {
        log::debug!(
            "paint cancelled in {:?} after {} candidates",
            self.state,
            self.summary.candidates
        );
        self.transition(RenderState::Cancelled);
        self.transition(RenderState::Idle);
        self.summary.cancelled = true;
        self.summary
    }

    fn finish(mut self) -> RenderSummary {
        self.transition(RenderState::Idle);
        log::debug!(
            "painted {} of {} candidates ({} elided, {} filtered, {} errors, index {})",
            self.summary.rendered,
            self.summary.candidates,
            self.summary.elided,
            self.summary.filtered,
            self.summary.errors,
            if self.summary.index_used { "used" } else { "not used" }
        );
        self.summary
    }

    fn report(&mut self, error: ShapeError) {
        self.summary.errors += 1;
        log::debug!("record skipped: {error}");
        for listener in &self.listeners {
            listener.error_occurred(&error);
        }
    }

    fn run_indexed(
        mut self,
        session: &mut DatasetSession,
        ordinals: &[u32],
        sink: &mut dyn GraphicsSink,
    ) -> Result<RenderSummary> {
        let DatasetSession {
            reader, shx, fids, ..
        } = session;
        let Some(shx) = shx.as_ref() else {
            return Ok(self.finish());
        };

        for &ordinal in ordinals {
            if self.cancelled() {
                return Ok(self.finish_cancelled());
            }
            self.transition(RenderState::Fetching);
            self.summary.candidates += 1;

            let ordinal = ordinal as usize;
            let entry = match shx.entry(ordinal) {
                Ok(entry) => entry,
                Err(e) if e.is_corrupt_index() => {
                    self.report(e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let record =
                match reader.read_indexed(ordinal, entry.byte_offset(), entry.byte_length()) {
                    Ok(record) => record,
                    Err(e) => {
                        self.report(e);
                        continue;
                    }
                };
            self.process(&record, fids.as_ref(), sink);
        }
        Ok(self.finish())
    }

    fn run_scan(
        mut self,
        session: &mut DatasetSession,
        sink: &mut dyn GraphicsSink,
    ) -> Result<RenderSummary> {
        log::debug!(
            "scanning {} sequentially",
            session.reader.path().display()
        );
        let DatasetSession { reader, fids, .. } = session;

        for record in reader.records() {
            if self.cancelled() {
                return Ok(self.finish_cancelled());
            }
            self.transition(RenderState::Fetching);
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    // The scan cannot locate records past a broken header.
                    self.report(e);
                    break;
                }
            };
            match record.envelope() {
                Ok(envelope) if !envelope.intersects(&self.query) => continue,
                Ok(_) => {}
                Err(e) => {
                    self.summary.candidates += 1;
                    self.report(e);
                    continue;
                }
            }
            self.summary.candidates += 1;
            self.process(&record, fids.as_ref(), sink);
        }
        Ok(self.finish())
    }

    fn process(
        &mut self,
        record: &RawRecord,
        fids: Option<&FidTable>,
        sink: &mut dyn GraphicsSink,
    ) {
        self.transition(RenderState::Decoding);

        let record_number = record.ordinal as u32 + 1;
        if fids.is_some_and(|f| f.is_removed(record_number)) {
            self.summary.filtered += 1;
            return;
        }
        let shape = match record.shape() {
            Ok(shape) => shape,
            Err(e) => {
                self.report(e);
                return;
            }
        };
        if shape.is_null() || !shape.envelope().intersects(&self.query) {
            return;
        }

        shape.xy_buffer(&mut self.src);
        self.dest.clear();
        self.dest.resize(self.src.len(), 0.0);
        match transform::transform(shape.kind(), &self.screen, &self.src, &mut self.dest) {
            Ok(substituted) => self.summary.substituted += substituted,
            Err(e) => {
                self.report(e);
                return;
            }
        }

        let feature = Feature {
            ordinal: record.ordinal,
            fid: fids.and_then(|f| f.fid(record_number)),
            shape: &shape,
            screen_envelope: Envelope::from_coords(&self.dest),
        };
        if let Some(filter) = &self.renderer.filter
            && !filter.accept(&feature)
        {
            self.summary.filtered += 1;
            return;
        }
        let Some(style) = self.renderer.style.style(&feature) else {
            self.summary.filtered += 1;
            return;
        };

        self.transition(RenderState::Painting);
        self.parts.clear();
        self.parts.extend_from_slice(shape.parts());
        if self.paint_feature(shape.kind(), &feature.screen_envelope, &style, sink) {
            self.summary.rendered += 1;
            for listener in &self.listeners {
                listener.feature_rendered(&feature);
            }
        } else {
            self.summary.elided += 1;
        }
    }

    /// Draw the transformed coordinates in `self.dest`. Returns `false` when the
    /// screen map elided the feature.
    fn paint_feature(
        &mut self,
        kind: ShapeKind,
        screen_envelope: &Envelope,
        style: &Style,
        sink: &mut dyn GraphicsSink,
    ) -> bool {
        let use_map = self.config.use_screen_map;
        match kind {
            ShapeKind::Null => false,
            ShapeKind::Point | ShapeKind::MultiPoint => {
                let mut drawn = 0;
                for pair in self.dest.chunks_exact(2) {
                    if use_map && !self.screen_map.check_and_set(pixel(pair[0]), pixel(pair[1])) {
                        continue;
                    }
                    sink.draw_point(pair[0], pair[1], style);
                    drawn += 1;
                }
                drawn > 0
            }
            ShapeKind::Arc | ShapeKind::Polygon => {
                if use_map && self.screen_map.can_simplify(screen_envelope, 1.0, 1.0) {
                    let (cx, cy) = screen_envelope.center();
                    if !self.screen_map.check_and_set(pixel(cx), pixel(cy)) {
                        return false;
                    }
                    sink.draw_point(cx, cy, style);
                    return true;
                }

                if self.config.decimate {
                    let span = self.config.generalization_distance;
                    transform::decimate(&mut self.dest, &mut self.parts, span, span);
                }
                let num_points = self.dest.len() / 2;
                if kind == ShapeKind::Polygon && style.fill.is_some() {
                    sink.fill_polygon(&self.dest, &self.parts, style);
                }
                for (start, end) in part_ranges(&self.parts, num_points) {
                    sink.draw_line(&self.dest[start * 2..end * 2], style);
                }
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, RenderConfig};
    use crate::render::{Color, RasterSink};
    use crate::shape::Shape;
    use crate::shp::ShapefileWriter;
    use crate::types::ShapeType;
    use crate::DatasetBuilder;
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn points(dir: &TempDir, n: usize) -> PathBuf {
        let path = dir.path().join("stops.shp");
        let mut writer = ShapefileWriter::create(&path, ShapeType::Point).unwrap();
        for i in 0..n {
            writer
                .write_shape(&Shape::point(i as f64, (i * 2) as f64))
                .unwrap();
        }
        writer.finish().unwrap();
        path
    }

    fn renderer(shp: PathBuf, render: RenderConfig) -> ShapefileRenderer {
        let dataset = DatasetBuilder::new(shp)
            .config(Config::default().with_render(render))
            .build()
            .unwrap();
        ShapefileRenderer::new(Arc::new(dataset))
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        cancel_on_render: Option<CancelHandle>,
    }

    impl RenderListener for Recorder {
        fn feature_rendered(&self, feature: &Feature<'_>) {
            self.events.lock().push(format!("rendered {}", feature.ordinal));
            if let Some(cancel) = &self.cancel_on_render {
                cancel.cancel();
            }
        }

        fn error_occurred(&self, error: &ShapeError) {
            self.events.lock().push(format!("error {error}"));
        }

        fn state_changed(&self, from: RenderState, to: RenderState) {
            self.events.lock().push(format!("{from:?}->{to:?}"));
        }
    }

    #[test]
    fn test_screen_map_elides_shared_pixels() {
        let dir = TempDir::new().unwrap();
        let shp = points(&dir, 50);
        let device = DeviceRect::sized(10, 10);
        let envelope = Envelope::new(0.0, 0.0, 49.0, 98.0);

        let mut sink = RasterSink::new(device);
        let summary = renderer(shp.clone(), RenderConfig::default())
            .paint(&mut sink, device, envelope)
            .unwrap();
        assert_eq!(summary.candidates, 50);
        assert_eq!(summary.rendered + summary.elided, 50);
        assert!(summary.elided > 0);
        assert!(!summary.index_used);

        let mut sink = RasterSink::new(device);
        let summary = renderer(shp, RenderConfig::default().with_screen_map(false))
            .paint(&mut sink, device, envelope)
            .unwrap();
        assert_eq!(summary.rendered, 50);
        assert_eq!(summary.elided, 0);
        assert_eq!(sink.draw_calls().0, 50);
    }

    #[test]
    fn test_cancel_stops_at_record_boundary() {
        let dir = TempDir::new().unwrap();
        let renderer = renderer(
            points(&dir, 20),
            RenderConfig::default().with_screen_map(false),
        );
        let cancel = CancelHandle::new();
        let recorder = Arc::new(Recorder {
            cancel_on_render: Some(cancel.clone()),
            ..Recorder::default()
        });
        renderer.add_render_listener(recorder.clone());

        let device = DeviceRect::sized(100, 100);
        let mut sink = RasterSink::new(device);
        let summary = renderer
            .paint_with_cancel(&mut sink, device, Envelope::new(0.0, 0.0, 19.0, 38.0), &cancel)
            .unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.rendered, 1);

        let events = recorder.events.lock();
        assert_eq!(events.first().map(String::as_str), Some("Idle->Querying"));
        assert_eq!(
            events[events.len() - 3..],
            ["rendered 0", "Painting->Cancelled", "Cancelled->Idle"]
        );
    }

    #[test]
    fn test_listener_removal() {
        let dir = TempDir::new().unwrap();
        let renderer = renderer(points(&dir, 5), RenderConfig::default());
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let first_id = renderer.add_render_listener(first.clone());
        renderer.add_render_listener(second.clone());

        assert!(renderer.remove_render_listener(first_id));
        assert!(!renderer.remove_render_listener(first_id));

        let device = DeviceRect::sized(50, 50);
        let mut sink = RasterSink::new(device);
        renderer
            .paint(&mut sink, device, Envelope::new(0.0, 0.0, 4.0, 8.0))
            .unwrap();
        assert!(first.events.lock().is_empty());
        let events = second.events.lock();
        assert_eq!(events.iter().filter(|e| e.starts_with("rendered")).count(), 5);
        assert_eq!(events.last().map(String::as_str), Some("Painting->Idle"));
    }

    #[test]
    fn test_filter_and_style_count_as_filtered() {
        let dir = TempDir::new().unwrap();
        let renderer = renderer(
            points(&dir, 10),
            RenderConfig::default().with_screen_map(false),
        )
        .with_filter(|f: &Feature<'_>| f.ordinal % 2 == 0)
        .with_style(|f: &Feature<'_>| (f.ordinal != 4).then(Style::default));

        let device = DeviceRect::sized(100, 100);
        let mut sink = RasterSink::new(device);
        let summary = renderer
            .paint(&mut sink, device, Envelope::new(0.0, 0.0, 9.0, 18.0))
            .unwrap();
        assert_eq!(summary.candidates, 10);
        assert_eq!(summary.filtered, 6);
        assert_eq!(summary.rendered, 4);
    }

    #[test]
    fn test_polygon_fill_and_outline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("parcels.shp");
        let mut writer = ShapefileWriter::create(&path, ShapeType::Polygon).unwrap();
        writer
            .write_shape(&Shape::polygon(&[&[
                0.0, 0.0, 0.0, 10.0, 10.0, 10.0, 10.0, 0.0, 0.0, 0.0,
            ]]))
            .unwrap();
        writer.finish().unwrap();

        let renderer = renderer(path, RenderConfig::default())
            .with_style(Style::stroke(Color::BLACK).with_fill(Color::rgba(0, 128, 0, 255)));
        let device = DeviceRect::sized(20, 20);
        let mut sink = RasterSink::new(device);
        let summary = renderer
            .paint(&mut sink, device, Envelope::new(-5.0, -5.0, 15.0, 15.0))
            .unwrap();
        assert_eq!(summary.rendered, 1);
        assert_eq!(sink.draw_calls(), (0, 1, 1));
        // Interior pixels are filled once, the outline adds a second hit.
        assert_eq!(sink.hits(10, 10), 1);
        assert!(sink.hits(5, 5) >= 2);
    }

    #[test]
    fn test_projection_runs_before_screen_mapping() {
        let dir = TempDir::new().unwrap();
        let renderer = renderer(
            points(&dir, 3),
            RenderConfig::default().with_screen_map(false),
        )
        .with_projection(AffineTransform::scale_translate(10.0, 10.0, 0.0, 0.0));

        let device = DeviceRect::sized(40, 40);
        let mut sink = RasterSink::new(device);
        let summary = renderer
            .paint(&mut sink, device, Envelope::new(0.0, 0.0, 4.0, 4.0))
            .unwrap();
        assert_eq!(summary.rendered, 3);
        // (1, 2) projects to (10, 20), which the flipped y axis leaves at row 20.
        assert_eq!(sink.hits(10, 20), 1);
    }
}
