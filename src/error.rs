//! Error types for shapeview.
//!
//! Errors fall into two groups: the ones a render session recovers from locally
//! ([`ShapeError::CorruptIndex`], [`ShapeError::Transform`], [`ShapeError::RecordDecode`])
//! and the ones that propagate to the caller ([`ShapeError::FatalIo`],
//! [`ShapeError::IndexOutOfRange`], argument and configuration errors).

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ShapeError>;

/// A single coordinate could not be transformed.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot transform ({x}, {y}): {reason}")]
pub struct TransformError {
    pub x: f64,
    pub y: f64,
    pub reason: String,
}

impl TransformError {
    pub fn new(x: f64, y: f64, reason: impl Into<String>) -> Self {
        Self {
            x,
            y,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ShapeError {
    /// Index file is structurally inconsistent or stale. Recovered by a full scan.
    #[error("corrupt index {path}: {reason}")]
    CorruptIndex { path: PathBuf, reason: String },

    #[error("ordinal {ordinal} out of range (record count {count})")]
    IndexOutOfRange { ordinal: usize, count: usize },

    #[error(transparent)]
    Transform(#[from] TransformError),

    /// Malformed record body.
    #[error("cannot decode record {ordinal}: {reason}")]
    RecordDecode { ordinal: usize, reason: String },

    /// Geometry or index file cannot be opened at session start.
    #[error("cannot open {path}: {source}")]
    FatalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unexpected end of data")]
    UnexpectedEof,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ShapeError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ShapeError::CorruptIndex {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn decode(ordinal: usize, reason: impl Into<String>) -> Self {
        ShapeError::RecordDecode {
            ordinal,
            reason: reason.into(),
        }
    }

    pub(crate) fn fatal_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ShapeError::FatalIo {
            path: path.into(),
            source,
        }
    }

    /// True for errors a render session recovers from by falling back to a full scan.
    pub fn is_corrupt_index(&self) -> bool {
        matches!(self, ShapeError::CorruptIndex { .. })
    }

    /// True for errors the renderer reports per record and then continues.
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            ShapeError::RecordDecode { .. } | ShapeError::Transform(_) | ShapeError::UnexpectedEof
        )
    }
}
