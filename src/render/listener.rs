//! Paint-time collaborators: listeners, filters and style providers.

use super::{Feature, RenderState};
use super::sink::Style;
use crate::error::ShapeError;

/// Notified as a paint progresses, in record-processing order.
///
/// Callbacks run on the painting thread; keep them short.
pub trait RenderListener: Send + Sync {
    /// Called once for every feature that was painted.
    fn feature_rendered(&self, _feature: &Feature<'_>) {}

    /// Called for every record that could not be decoded or transformed.
    fn error_occurred(&self, _error: &ShapeError) {}

    fn state_changed(&self, _from: RenderState, _to: RenderState) {}
}

/// Decides whether a decoded feature takes part in the paint.
pub trait FeatureFilter: Send + Sync {
    fn accept(&self, feature: &Feature<'_>) -> bool;
}

impl<F> FeatureFilter for F
where
    F: Fn(&Feature<'_>) -> bool + Send + Sync,
{
    fn accept(&self, feature: &Feature<'_>) -> bool {
        self(feature)
    }
}

/// Chooses a style per feature. `None` leaves the feature undrawn.
pub trait StyleProvider: Send + Sync {
    fn style(&self, feature: &Feature<'_>) -> Option<Style>;
}

impl StyleProvider for Style {
    fn style(&self, _feature: &Feature<'_>) -> Option<Style> {
        Some(*self)
    }
}

impl<F> StyleProvider for F
where
    F: Fn(&Feature<'_>) -> Option<Style> + Send + Sync,
{
    fn style(&self, feature: &Feature<'_>) -> Option<Style> {
        self(feature)
    }
}
