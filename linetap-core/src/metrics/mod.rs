mod registry;
mod render;


pub use registry::{Metrics, MetricsState, SourceMode};

/// Prefix applied to every exported metric family.
pub const METRIC_PREFIX: &str = "linetap";
