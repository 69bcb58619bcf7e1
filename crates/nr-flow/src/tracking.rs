//! Experiment-tracking collaborator interface.
//!
//! Purely observational: the model announces its scalar summary metrics at
//! the start of a run so the tracking backend can keep minimum-so-far
//! summaries. No control flow depends on the tracker.

/// How a scalar metric is summarized across a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Summary {
    /// Keep the minimum value seen so far.
    Min,
}

/// A run-level metrics registry.
pub trait SummaryTracker {
    /// Register one scalar metric with its summary mode.
    fn define_metric(&self, name: &str, summary: Summary);
}

/// Tracker that records metric definitions to the `tracing` subscriber.
#[derive(Debug, Default)]
pub struct TracingTracker;

impl SummaryTracker for TracingTracker {
    fn define_metric(&self, name: &str, summary: Summary) {
        tracing::info!(metric = name, summary = ?summary, "registered summary metric");
    }
}

/// Tracker that ignores every notification.
#[derive(Debug, Default)]
pub struct NullTracker;

impl SummaryTracker for NullTracker {
    fn define_metric(&self, _name: &str, _summary: Summary) {}
}
