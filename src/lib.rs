//! Indexed shapefile access and incremental rendering.
//!
//! ```rust,no_run
//! use shapeview::prelude::*;
//! use std::sync::Arc;
//!
//! let dataset = Arc::new(ShapefileDataset::open("roads.shp")?);
//! dataset.index_all()?;
//!
//! let renderer = ShapefileRenderer::new(Arc::clone(&dataset));
//! let device = DeviceRect::sized(800, 600);
//! let mut sink = RasterSink::new(device);
//! let summary = renderer.paint(&mut sink, device, Envelope::new(0.0, 0.0, 100.0, 75.0))?;
//! println!("{} features painted", summary.rendered);
//! # Ok::<(), shapeview::ShapeError>(())
//! ```

pub mod builder;
pub mod config;
pub mod dataset;
pub mod error;
pub mod fid;
pub mod index;
pub mod lock;
pub mod render;
pub mod screen_map;
pub mod shape;
pub mod shp;
pub mod shx;
pub mod transform;
pub mod types;

pub use builder::DatasetBuilder;
pub use config::{Config, IndexConfig, IndexKind, RenderConfig};
pub use dataset::{DatasetPaths, DatasetSession, FidTable, IndexReport, ShapefileDataset};
pub use error::{Result, ShapeError, TransformError};

pub use fid::{FidEntry, FidReader, FidWriter};
pub use index::{DiskIndex, IndexStats, MemoryIndex, SpatialIndexStore};
pub use lock::IndexLocks;

pub use render::{
    CancelHandle, Color, Feature, FeatureFilter, GraphicsSink, ListenerId, RasterSink,
    RenderListener, RenderState, RenderSummary, ShapefileRenderer, Style, StyleProvider,
};
pub use screen_map::ScreenMap;

pub use shape::{Parts, Shape};
pub use shp::{ShapefileHeader, ShapefileReader, ShapefileWriter};
pub use shx::{IndexEntry, IndexFile};
pub use transform::{
    AffineTransform, ChainedTransform, CoordinateTransform, IdentityTransform, decimate,
};
pub use types::{DeviceRect, Envelope, ShapeKind, ShapeType};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{DatasetBuilder, Result, ShapeError, ShapefileDataset};

    pub use crate::{Config, IndexConfig, IndexKind, RenderConfig};

    pub use crate::{DeviceRect, Envelope, Shape, ShapeType};

    pub use crate::{
        CancelHandle, GraphicsSink, RasterSink, RenderListener, RenderSummary, ShapefileRenderer,
        Style,
    };

    pub use crate::{AffineTransform, CoordinateTransform};
}
