//! A shapefile on disk together with its companion index files.
//!
//! [`ShapefileDataset`] only holds paths and configuration. File handles live in a
//! [`DatasetSession`], opened per paint or query and released when it is dropped.

use crate::config::{Config, IndexKind};
use crate::error::{Result, ShapeError};
use crate::fid::{self, FidReader, FidWriter};
use crate::index::{self, IndexStats, MemoryIndex, SpatialIndexStore};
use crate::lock::{IndexLocks, ReadGuard};
use crate::shp::{ShapefileReader, ShapefileWriter};
use crate::shx::IndexFile;
use crate::types::Envelope;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Locations of the geometry file and its companions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetPaths {
    pub shp: PathBuf,
    pub shx: PathBuf,
    /// Spatial index file; `None` for the in-memory index.
    pub spatial_index: Option<PathBuf>,
    pub fid_index: PathBuf,
}

impl DatasetPaths {
    /// Conventional sibling paths: `.shx`, `.qix`/`.sidx` and `.fix`.
    pub fn siblings(shp: &Path, kind: IndexKind) -> Self {
        Self {
            shp: shp.to_path_buf(),
            shx: shp.with_extension("shx"),
            spatial_index: match kind {
                IndexKind::Memory => None,
                other => Some(shp.with_extension(other.extension())),
            },
            fid_index: shp.with_extension("fix"),
        }
    }
}

/// What an [`ShapefileDataset::index_all`] run produced.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct IndexReport {
    pub records: usize,
    pub spatial: IndexStats,
    pub fids: usize,
}

#[derive(Debug)]
pub struct ShapefileDataset {
    typename: String,
    paths: DatasetPaths,
    config: Config,
    locks: IndexLocks,
    memory_index: RwLock<Option<Arc<MemoryIndex>>>,
}

impl ShapefileDataset {
    /// Open with conventional sibling paths and the default configuration.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        crate::DatasetBuilder::new(path.as_ref()).build()
    }

    pub(crate) fn from_parts(
        typename: String,
        paths: DatasetPaths,
        config: Config,
        locks: IndexLocks,
    ) -> Self {
        Self {
            typename,
            paths,
            config,
            locks,
            memory_index: RwLock::new(None),
        }
    }

    pub fn typename(&self) -> &str {
        &self.typename
    }

    pub fn paths(&self) -> &DatasetPaths {
        &self.paths
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn locks(&self) -> &IndexLocks {
        &self.locks
    }

    /// Regenerate the `.shx` by scanning the geometry file.
    pub fn generate_shx(&self) -> Result<usize> {
        let _guard = self.locks.write(&self.paths.shp);
        self.generate_shx_locked()
    }

    fn generate_shx_locked(&self) -> Result<usize> {
        let shx = IndexFile::generate(&self.paths.shp, &self.paths.shx)?;
        log::info!(
            "indexed {} records into {}",
            shx.record_count(),
            self.paths.shx.display()
        );
        Ok(shx.record_count())
    }

    /// Build the configured spatial index in one pass over record bounds.
    pub fn build_spatial_index(&self) -> Result<IndexStats> {
        let _guard = self.locks.write(&self.paths.shp);
        self.build_spatial_index_locked()
    }

    fn build_spatial_index_locked(&self) -> Result<IndexStats> {
        let index = self.build_index_from_scan()?;
        let stats = index.stats();
        log::info!(
            "built {:?} index over {} records ({} nodes)",
            stats.kind,
            stats.record_count,
            stats.node_count
        );
        Ok(stats)
    }

    fn build_index_from_scan(&self) -> Result<Arc<dyn SpatialIndexStore>> {
        let mut reader = ShapefileReader::open(&self.paths.shp)?;
        let bounds = reader.bounds();
        let index_config = &self.config.index;

        let records = reader.records().map(|record| {
            record.map(|r| {
                // An unreadable body is left out of the index; rendering reports it.
                let envelope = r.envelope().unwrap_or_else(|e| {
                    log::warn!("indexing record {} without bounds: {e}", r.ordinal);
                    Envelope::EMPTY
                });
                (r.ordinal, envelope)
            })
        });

        if index_config.kind == IndexKind::Memory {
            let mut entries = Vec::new();
            let mut count = 0usize;
            for item in records {
                let (ordinal, envelope) = item?;
                count += 1;
                if !envelope.is_empty() {
                    entries.push((ordinal as u32, envelope));
                }
            }
            let memory = Arc::new(MemoryIndex::build(&entries, count));
            *self.memory_index.write() = Some(Arc::clone(&memory));
            return Ok(memory);
        }

        let built = index::build(
            records,
            bounds,
            index_config,
            self.paths.spatial_index.as_deref(),
        )?;
        Ok(Arc::from(built))
    }

    /// Create the `.fix` with `fid N` mapped to record `N`.
    pub fn generate_fid_index(&self) -> Result<usize> {
        let _guard = self.locks.write(&self.paths.shp);
        self.generate_fid_index_locked()
    }

    fn generate_fid_index_locked(&self) -> Result<usize> {
        let mut reader = ShapefileReader::open(&self.paths.shp)?;
        fid::generate(&mut reader, &self.paths.fid_index)
    }

    /// Build `.shx`, the spatial index and `.fix` under one write lock.
    pub fn index_all(&self) -> Result<IndexReport> {
        let _guard = self.locks.write(&self.paths.shp);
        let records = self.generate_shx_locked()?;
        let spatial = self.build_spatial_index_locked()?;
        let fids = self.generate_fid_index_locked()?;
        Ok(IndexReport {
            records,
            spatial,
            fids,
        })
    }

    /// Tombstone the feature `typename.N`. Returns `false` if it was not live.
    pub fn remove_feature(&self, id: &str) -> Result<bool> {
        let target = fid::parse_fid(&self.typename, id)?;
        let _guard = self.locks.write(&self.paths.shp);
        let mut writer = FidWriter::open(&self.paths.fid_index)?;
        while let Some(entry) = writer.next()? {
            if entry.fid == target {
                writer.remove()?;
                writer.close()?;
                return Ok(true);
            }
            if entry.fid > target {
                break;
            }
        }
        Ok(false)
    }

    /// Drop tombstoned `.fix` entries. Returns the live entry count.
    ///
    /// Record numbers are renumbered, so this only matches a geometry file that no
    /// longer contains the removed records. [`ShapefileDataset::purge_removed`] does both.
    pub fn compact_fid_index(&self) -> Result<usize> {
        let _guard = self.locks.write(&self.paths.shp);
        fid::compact(&self.paths.fid_index)
    }

    /// Rewrite the geometry file without tombstoned records, then compact `.fix` and
    /// rebuild the spatial index. Returns the number of records kept.
    pub fn purge_removed(&self) -> Result<usize> {
        let _guard = self.locks.write(&self.paths.shp);
        let fids = FidTable::from_reader(FidReader::open(&self.paths.fid_index)?);

        let mut reader = ShapefileReader::open(&self.paths.shp)?;
        let shp_tmp = self.paths.shp.with_extension("shp.tmp");
        let shx_tmp = self.paths.shx.with_extension("shx.tmp");
        let mut writer = ShapefileWriter::create_with_index_path(
            shp_tmp.clone(),
            shx_tmp.clone(),
            reader.shape_type(),
        )?;
        let mut dropped = 0usize;
        for record in reader.records() {
            let record = record?;
            if fids.is_removed(record.ordinal as u32 + 1) {
                dropped += 1;
                continue;
            }
            writer.write_shape(&record.shape()?)?;
        }
        let kept = writer.len();
        writer.finish()?;
        drop(reader);

        std::fs::rename(&shp_tmp, &self.paths.shp)?;
        std::fs::rename(&shx_tmp, &self.paths.shx)?;
        fid::compact(&self.paths.fid_index)?;
        *self.memory_index.write() = None;
        if self.paths.spatial_index.is_some() {
            self.build_spatial_index_locked()?;
        }
        log::info!(
            "purged {dropped} removed records from {}, {kept} kept",
            self.paths.shp.display()
        );
        Ok(kept)
    }

    /// Open file handles for one paint or query.
    ///
    /// The geometry file must open; companion files that are missing or damaged are
    /// skipped with a warning and the session falls back to sequential scans.
    pub fn open_session(&self) -> Result<DatasetSession> {
        let guard = self.locks.read(&self.paths.shp);
        let reader = ShapefileReader::open(&self.paths.shp)?;
        let render = &self.config.render;

        let shx = optional(IndexFile::open(&self.paths.shx))?.and_then(|shx| {
            if !render.check_index_staleness {
                return Some(shx);
            }
            match shx.check_consistent(&reader) {
                Ok(()) => Some(shx),
                Err(e) => {
                    log::warn!("ignoring record index: {e}");
                    None
                }
            }
        });

        let index: Option<Arc<dyn SpatialIndexStore>> = match (&shx, render.use_index) {
            (Some(shx), true) => self.open_spatial_index(shx)?,
            _ => None,
        };

        let fids = optional(FidReader::open(&self.paths.fid_index))?.map(FidTable::from_reader);

        Ok(DatasetSession {
            reader,
            shx,
            index,
            fids,
            _guard: guard,
        })
    }

    fn open_spatial_index(&self, shx: &IndexFile) -> Result<Option<Arc<dyn SpatialIndexStore>>> {
        let expected = self
            .config
            .render
            .check_index_staleness
            .then(|| shx.record_count());

        let Some(path) = &self.paths.spatial_index else {
            return Ok(Some(self.memory_index_for(shx.record_count())?));
        };
        let opened = optional(index::open(path, expected))?;
        Ok(opened.map(|disk| Arc::new(disk) as Arc<dyn SpatialIndexStore>))
    }

    /// The cached in-memory index, built on first use.
    fn memory_index_for(&self, expected: usize) -> Result<Arc<dyn SpatialIndexStore>> {
        if let Some(cached) = self.memory_index.read().as_ref()
            && cached.record_count() == expected
        {
            return Ok(Arc::clone(cached) as Arc<dyn SpatialIndexStore>);
        }
        log::debug!("building in-memory index for {}", self.paths.shp.display());
        self.build_index_from_scan()
    }
}

/// Turn "missing" and "corrupt" into `None`; other failures stay errors.
fn optional<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ShapeError::FatalIo { path, source })
            if source.kind() == std::io::ErrorKind::NotFound =>
        {
            log::debug!("{} not present", path.display());
            Ok(None)
        }
        Err(e) if e.is_corrupt_index() => {
            log::warn!("falling back to a full scan: {e}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Record number to feature id, loaded from `.fix`.
#[derive(Debug, Clone, Default)]
pub struct FidTable {
    by_record: FxHashMap<u32, (u64, bool)>,
}

impl FidTable {
    fn from_reader(reader: FidReader) -> Self {
        let by_record = reader
            .entries()
            .map(|e| (e.record_number, (e.fid, e.removed)))
            .collect();
        Self { by_record }
    }

    pub fn fid(&self, record_number: u32) -> Option<u64> {
        self.by_record.get(&record_number).map(|(fid, _)| *fid)
    }

    pub fn is_removed(&self, record_number: u32) -> bool {
        self.by_record
            .get(&record_number)
            .is_some_and(|(_, removed)| *removed)
    }
}

/// Open handles for one paint or query. Dropping it releases files and the read lock.
pub struct DatasetSession {
    pub(crate) reader: ShapefileReader,
    pub(crate) shx: Option<IndexFile>,
    pub(crate) index: Option<Arc<dyn SpatialIndexStore>>,
    pub(crate) fids: Option<FidTable>,
    _guard: ReadGuard,
}

impl DatasetSession {
    pub fn reader(&mut self) -> &mut ShapefileReader {
        &mut self.reader
    }

    pub fn record_index(&self) -> Option<&IndexFile> {
        self.shx.as_ref()
    }

    pub fn spatial_index(&self) -> Option<&dyn SpatialIndexStore> {
        self.index.as_deref()
    }

    pub fn fids(&self) -> Option<&FidTable> {
        self.fids.as_ref()
    }

    /// Sorted, de-duplicated candidate ordinals from the spatial index.
    ///
    /// `None` means the index is unavailable or turned out to be damaged, and the
    /// caller has to scan.
    pub fn candidates(&self, envelope: &Envelope) -> Option<Vec<u32>> {
        let index = self.index.as_ref()?;
        let hits = match index.query(envelope) {
            Ok(iter) => iter.collect::<Result<Vec<u32>>>(),
            Err(e) => Err(e),
        };
        match hits {
            Ok(mut ordinals) => {
                ordinals.sort_unstable();
                ordinals.dedup();
                Some(ordinals)
            }
            Err(e) => {
                log::warn!("spatial index query failed, scanning instead: {e}");
                None
            }
        }
    }
}

impl std::fmt::Debug for DatasetSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetSession")
            .field("shp", &self.reader.path())
            .field("shx", &self.shx.as_ref().map(IndexFile::path))
            .field("index", &self.index.as_ref().map(|i| i.kind()))
            .finish()
    }
}
