//! Progress reporting for single jobs and batches.
//!
//! A running job samples its progress on the environment's scheduler and
//! hands each sample to a [`ProgressSink`]. Standalone jobs draw their own
//! terminal bar; batch jobs publish `(seq, fraction)` samples on a
//! [`ProgressChannel`] that the submitting process aggregates into one bar.

pub mod aggregator;
pub mod display;
pub mod reporter;

pub use aggregator::ProgressAggregator;
pub use display::ProgressBar;
pub use reporter::{ChannelSink, ProgressReporter, TerminalSink};

use serde::{Deserialize, Serialize};

/// One job's completion fraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressSample {
    pub seq: u64,
    pub fraction: f64,
}

impl ProgressSample {
    pub fn new(seq: u64, fraction: f64) -> Self {
        Self { seq, fraction }
    }
}

/// Destination for progress fractions in `[0, 1]`.
pub trait ProgressSink {
    fn emit(&mut self, fraction: f64);

    /// The tracked work completed.
    fn finish(&mut self);

    /// Stop tracking without claiming completion.
    fn close(&mut self) {}
}

/// Shared transport for batch progress samples.
///
/// Returns `false` once the receiving side is gone.
pub trait ProgressChannel: Send + Sync {
    fn publish(&self, sample: ProgressSample) -> bool;
}

impl ProgressChannel for std::sync::mpsc::Sender<ProgressSample> {
    fn publish(&self, sample: ProgressSample) -> bool {
        self.send(sample).is_ok()
    }
}

impl ProgressChannel for tokio::sync::mpsc::UnboundedSender<ProgressSample> {
    fn publish(&self, sample: ProgressSample) -> bool {
        self.send(sample).is_ok()
    }
}
