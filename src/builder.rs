//! Dataset builder for custom companion paths and configuration.

use crate::config::{Config, IndexConfig, RenderConfig};
use crate::dataset::{DatasetPaths, ShapefileDataset};
use crate::error::{Result, ShapeError};
use crate::lock::IndexLocks;
use crate::shp::ShapefileReader;
use std::path::PathBuf;

/// Builder for a [`ShapefileDataset`].
///
/// Companion paths default to the siblings of the `.shp`: `.shx`, `.qix` or `.sidx`
/// depending on the index kind, and `.fix`.
#[derive(Debug)]
pub struct DatasetBuilder {
    shp_path: PathBuf,
    shx_path: Option<PathBuf>,
    spatial_index_path: Option<PathBuf>,
    fid_path: Option<PathBuf>,
    typename: Option<String>,
    config: Config,
    locks: Option<IndexLocks>,
}

impl DatasetBuilder {
    pub fn new<P: Into<PathBuf>>(shp_path: P) -> Self {
        Self {
            shp_path: shp_path.into(),
            shx_path: None,
            spatial_index_path: None,
            fid_path: None,
            typename: None,
            config: Config::default(),
            locks: None,
        }
    }

    pub fn shx_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.shx_path = Some(path.into());
        self
    }

    /// Ignored when the index kind is [`crate::IndexKind::Memory`].
    pub fn spatial_index_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.spatial_index_path = Some(path.into());
        self
    }

    pub fn fid_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.fid_path = Some(path.into());
        self
    }

    /// Feature type name used in ids like `roads.12`. Defaults to the file stem.
    pub fn typename(mut self, typename: impl Into<String>) -> Self {
        self.typename = Some(typename.into());
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn index_config(mut self, index: IndexConfig) -> Self {
        self.config.index = index;
        self
    }

    pub fn render_config(mut self, render: RenderConfig) -> Self {
        self.config.render = render;
        self
    }

    /// Share a lock table with other datasets over the same files.
    pub fn locks(mut self, locks: IndexLocks) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Validate the configuration and check that the geometry file opens.
    pub fn build(self) -> Result<ShapefileDataset> {
        self.config.validate().map_err(ShapeError::Config)?;

        // Fails fast with FatalIo or InvalidFormat; the reader itself is not kept.
        let reader = ShapefileReader::open(&self.shp_path)?;
        log::debug!(
            "opened {} ({:?}, bounds {:?})",
            self.shp_path.display(),
            reader.shape_type(),
            reader.bounds()
        );
        drop(reader);

        let typename = match self.typename {
            Some(name) if name.is_empty() || name.contains('.') => {
                return Err(ShapeError::InvalidInput(format!(
                    "typename {name:?} must be non-empty and contain no '.'"
                )));
            }
            Some(name) => name,
            None => self
                .shp_path
                .file_stem()
                .map(|s| s.to_string_lossy().replace('.', "_"))
                .unwrap_or_else(|| "feature".to_string()),
        };

        let kind = self.config.index.kind;
        let mut paths = DatasetPaths::siblings(&self.shp_path, kind);
        if let Some(shx) = self.shx_path {
            paths.shx = shx;
        }
        if let Some(spatial) = self.spatial_index_path
            && paths.spatial_index.is_some()
        {
            paths.spatial_index = Some(spatial);
        }
        if let Some(fid) = self.fid_path {
            paths.fid_index = fid;
        }

        Ok(ShapefileDataset::from_parts(
            typename,
            paths,
            self.config,
            self.locks.unwrap_or_default(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexKind;
    use crate::shape::Shape;
    use crate::shp::ShapefileWriter;
    use crate::types::ShapeType;
    use tempfile::TempDir;

    fn roads(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("roads.shp");
        let mut writer = ShapefileWriter::create(&path, ShapeType::PolyLine).unwrap();
        writer
            .write_shape(&Shape::polyline(&[&[0.0, 0.0, 5.0, 5.0]]))
            .unwrap();
        writer.finish().unwrap();
        path
    }

    #[test]
    fn test_builder_defaults() {
        let dir = TempDir::new().unwrap();
        let shp = roads(&dir);
        let dataset = DatasetBuilder::new(&shp).build().unwrap();

        assert_eq!(dataset.typename(), "roads");
        assert_eq!(dataset.paths().shx, shp.with_extension("shx"));
        assert_eq!(
            dataset.paths().spatial_index,
            Some(shp.with_extension("qix"))
        );
        assert_eq!(dataset.paths().fid_index, shp.with_extension("fix"));
    }

    #[test]
    fn test_builder_custom_paths() {
        let dir = TempDir::new().unwrap();
        let shp = roads(&dir);
        let sidx = dir.path().join("cache").join("roads.sidx");
        let dataset = DatasetBuilder::new(&shp)
            .index_config(IndexConfig::rtree())
            .spatial_index_path(&sidx)
            .typename("highways")
            .build()
            .unwrap();

        assert_eq!(dataset.typename(), "highways");
        assert_eq!(dataset.paths().spatial_index, Some(sidx));
    }

    #[test]
    fn test_builder_memory_index_has_no_path() {
        let dir = TempDir::new().unwrap();
        let dataset = DatasetBuilder::new(roads(&dir))
            .index_config(IndexConfig::default().with_kind(IndexKind::Memory))
            .spatial_index_path(dir.path().join("unused.sidx"))
            .build()
            .unwrap();
        assert!(dataset.paths().spatial_index.is_none());
    }

    #[test]
    fn test_builder_rejects_bad_input() {
        let dir = TempDir::new().unwrap();
        let shp = roads(&dir);

        let mut config = Config::default();
        config.index.node_capacity = 0;
        assert!(matches!(
            DatasetBuilder::new(&shp).config(config).build(),
            Err(ShapeError::Config(_))
        ));

        assert!(matches!(
            DatasetBuilder::new(&shp).typename("a.b").build(),
            Err(ShapeError::InvalidInput(_))
        ));

        assert!(matches!(
            DatasetBuilder::new(dir.path().join("missing.shp")).build(),
            Err(ShapeError::FatalIo { .. })
        ));
    }
}
