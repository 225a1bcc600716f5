//! Incremental feature rendering.
//!
//! A paint request moves through
//! `Idle -> Querying -> Fetching -> Decoding -> Painting -> Idle`, with the middle
//! states repeating per record. Cancellation is checked at every record boundary.

mod listener;
mod renderer;
pub mod sink;

pub use listener::{FeatureFilter, RenderListener, StyleProvider};
pub use renderer::ShapefileRenderer;
pub use sink::{Color, GraphicsSink, RasterSink, Style};

use crate::shape::Shape;
use crate::types::Envelope;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum RenderState {
    Idle,
    Querying,
    Fetching,
    Decoding,
    Painting,
    Cancelled,
}

impl RenderState {
    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: RenderState) -> bool {
        use RenderState::*;
        matches!(
            (self, next),
            (Idle, Querying)
                | (Querying, Fetching)
                | (Querying, Idle)
                | (Fetching, Decoding)
                | (Fetching, Fetching)
                | (Fetching, Idle)
                | (Decoding, Painting)
                | (Decoding, Fetching)
                | (Decoding, Idle)
                | (Painting, Fetching)
                | (Painting, Idle)
                | (Querying | Fetching | Decoding | Painting, Cancelled)
                | (Cancelled, Idle)
        )
    }
}

/// A decoded feature as seen by filters, styles and listeners.
#[derive(Debug, Clone, Copy)]
pub struct Feature<'a> {
    pub ordinal: usize,
    /// Stable id number from the `.fix` file, when one is present.
    pub fid: Option<u64>,
    pub shape: &'a Shape,
    /// Bounds in device pixels after transformation.
    pub screen_envelope: Envelope,
}

impl Feature<'_> {
    pub fn record_number(&self) -> usize {
        self.ordinal + 1
    }
}

/// Counters for a finished (or cancelled) paint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RenderSummary {
    /// Records considered after the spatial query.
    pub candidates: usize,
    pub rendered: usize,
    /// Skipped because their pixel was already painted.
    pub elided: usize,
    /// Rejected by the filter, unstyled, or deleted through the fid index.
    pub filtered: usize,
    pub errors: usize,
    /// Vertices replaced after a failed transform.
    pub substituted: usize,
    pub index_used: bool,
    pub cancelled: bool,
}

/// Shared flag to stop a paint from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Returned by [`ShapefileRenderer::add_render_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);
