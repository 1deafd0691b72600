//! Logging facilities for Horizon Rowset.
//!
//! Horizon Rowset uses the `tracing` crate for instrumentation. To see logs,
//! install a tracing subscriber in your application:
//!
//! ```ignore
//! fn main() {
//!     tracing_subscriber::fmt::init();
//! }
//! ```
//!
//! Every subsystem logs under its own target so it can be filtered
//! independently, e.g. `RUST_LOG=horizon_rowset::sort=trace`.

/// Target names for log filtering.
pub mod targets {
    /// Core framework target.
    pub const CORE: &str = "horizon_rowset_core";
    /// Signal/slot system target.
    pub const SIGNAL: &str = "horizon_rowset_core::signal";
    /// Dataset (nav) lifecycle target.
    pub const NAV: &str = "horizon_rowset::nav";
    /// Schema registry target.
    pub const SCHEMA: &str = "horizon_rowset::schema";
    /// Index engine target.
    pub const INDEX: &str = "horizon_rowset::index";
    /// Sort engine target.
    pub const SORT: &str = "horizon_rowset::sort";
    /// Tree/hierarchy target.
    pub const TREE: &str = "horizon_rowset::tree";
    /// Filter engine target.
    pub const FILTER: &str = "horizon_rowset::filter";
    /// Validation pipeline target.
    pub const VALIDATE: &str = "horizon_rowset::validate";
    /// Change tracking and persistence target.
    pub const PERSIST: &str = "horizon_rowset::persist";
    /// Focus/selection target.
    pub const FOCUS: &str = "horizon_rowset::focus";
    /// Master-detail binding target.
    pub const PARAMS: &str = "horizon_rowset::params";
    /// Transport target.
    pub const TRANSPORT: &str = "horizon_rowset::transport";
    /// Performance spans target.
    pub const PERF: &str = "horizon_rowset::perf";
}

/// RAII guard around an expensive operation (index rebuild, sort, ...).
///
/// The span is entered on creation and exited when the guard is dropped.
pub struct PerfSpan {
    #[allow(dead_code)]
    span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Create a new performance span.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!(target: "horizon_rowset::perf", "perf", operation = name);
        Self {
            span: span.entered(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perf_span_under_subscriber() {
        let subscriber = tracing_subscriber::fmt().with_test_writer().finish();
        tracing::subscriber::with_default(subscriber, || {
            let _span = PerfSpan::new("sort");
            tracing::debug!(target: targets::SORT, rows = 3, "sorted");
        });
    }
}
