mod reconciler;
mod smoothing;

pub use reconciler::Reconciler;
pub use smoothing::{SMOOTHING_WINDOW, SNAP_EPSILON, TransformSmoother};
