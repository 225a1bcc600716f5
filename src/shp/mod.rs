//! ESRI `.shp` geometry files: header, record codec, reader and writer.
//!
//! The header and record headers are big-endian; record bodies are little-endian.
//! Offsets and lengths stored on disk are in 16-bit words.

pub mod codec;
pub mod header;
pub mod reader;
pub mod writer;

pub use header::ShapefileHeader;
pub use reader::{RawRecord, Records, ShapefileReader};
pub use writer::ShapefileWriter;
