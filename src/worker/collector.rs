//! Gathers batch results and restores submission order.

use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::{JobError, PoolError, Result};
use crate::job::SimResult;

/// Waits for a fixed number of results.
#[derive(Debug, Clone, Copy)]
pub struct ResultCollector {
    expected: usize,
}

impl ResultCollector {
    pub fn new(expected: usize) -> Self {
        Self { expected }
    }

    /// Receive exactly `expected` results and return them ordered by
    /// `sim.seq`. Fails with [`PoolError::WorkerLost`] if every sender is
    /// dropped first.
    pub async fn collect(&self, rx: &mut UnboundedReceiver<SimResult>) -> Result<Vec<SimResult>> {
        let mut results = Vec::with_capacity(self.expected);
        while results.len() < self.expected {
            match rx.recv().await {
                Some(result) => {
                    tracing::debug!(
                        seq = ?result.seq(),
                        received = results.len() + 1,
                        expected = self.expected,
                        "Result received"
                    );
                    results.push(result);
                }
                None => {
                    return Err(PoolError::WorkerLost {
                        expected: self.expected,
                        received: results.len(),
                    }
                    .into());
                }
            }
        }
        Ok(order_by_seq(results)?)
    }
}

/// Sort results ascending by the `sim.seq` of their config.
pub fn order_by_seq(results: Vec<SimResult>) -> std::result::Result<Vec<SimResult>, JobError> {
    let mut keyed = results
        .into_iter()
        .map(|r| r.seq().map(|seq| (seq, r)).ok_or(JobError::MissingSeq))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    keyed.sort_by_key(|(seq, _)| *seq);
    Ok(keyed.into_iter().map(|(_, r)| r).collect())
}
