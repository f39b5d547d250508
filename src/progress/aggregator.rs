//! Batch-wide progress aggregation in the submitting process.

use std::collections::BTreeMap;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::progress::{ProgressSample, ProgressSink};

/// Tracks the last reported fraction of every job in a batch.
///
/// Every job starts at 0, so a job that never reports holds the total below
/// 1.0 for the whole run.
#[derive(Debug, Clone)]
pub struct ProgressAggregator {
    progress: BTreeMap<u64, f64>,
}

impl ProgressAggregator {
    pub fn new(seqs: impl IntoIterator<Item = u64>) -> Self {
        Self {
            progress: seqs.into_iter().map(|seq| (seq, 0.0)).collect(),
        }
    }

    /// Record a sample and return the new total. Samples for jobs outside
    /// the batch are ignored.
    pub fn update(&mut self, sample: ProgressSample) -> f64 {
        match self.progress.get_mut(&sample.seq) {
            Some(fraction) => *fraction = sample.fraction.clamp(0.0, 1.0),
            None => tracing::debug!(seq = sample.seq, "Progress for unknown job ignored"),
        }
        self.total()
    }

    /// Mean completion over all jobs; 1.0 for an empty batch.
    pub fn total(&self) -> f64 {
        if self.progress.is_empty() {
            return 1.0;
        }
        self.progress.values().sum::<f64>() / self.progress.len() as f64
    }

    pub fn get(&self, seq: u64) -> Option<f64> {
        self.progress.get(&seq).copied()
    }

    /// Consume samples until the batch completes, the channel closes or the
    /// user interrupts, drawing the total on `sink`. Completion and Ctrl-C
    /// finish the display; a closed channel only closes it. Returns the last
    /// known total.
    pub async fn run(
        mut self,
        mut rx: UnboundedReceiver<ProgressSample>,
        mut sink: Box<dyn ProgressSink + Send>,
    ) -> f64 {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        sink.emit(self.total());
        let finished = loop {
            if self.total() >= 1.0 {
                break true;
            }
            tokio::select! {
                biased;
                _ = &mut ctrl_c => {
                    tracing::info!("Ctrl+C received, stopping progress display");
                    break true;
                }
                sample = rx.recv() => match sample {
                    Some(sample) => {
                        let total = self.update(sample);
                        sink.emit(total);
                    }
                    None => {
                        tracing::debug!(total = self.total(), "Progress channel closed");
                        break false;
                    }
                },
            }
        };

        // A closed channel leaves the display at the last known total.
        if finished {
            sink.finish();
        } else {
            sink.close();
        }
        self.total()
    }
}
