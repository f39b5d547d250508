//! Per-job progress sampling.

use std::cell::RefCell;
use std::io::Stderr;
use std::rc::Rc;
use std::sync::Arc;

use crate::env::Environment;
use crate::error::ConfigError;
use crate::job::SimConfig;
use crate::progress::{ProgressBar, ProgressChannel, ProgressSample, ProgressSink};

/// Number of samples taken over a full run.
const SAMPLES_PER_RUN: f64 = 100.0;

/// Draws progress on the local terminal.
pub struct TerminalSink {
    bar: ProgressBar<Stderr>,
}

impl TerminalSink {
    pub fn new(max_width: Option<u16>) -> Self {
        Self {
            bar: ProgressBar::stderr(max_width),
        }
    }
}

impl ProgressSink for TerminalSink {
    fn emit(&mut self, fraction: f64) {
        if let Err(e) = self.bar.render(fraction) {
            tracing::debug!(error = %e, "Progress render failed");
        }
    }

    fn finish(&mut self) {
        if let Err(e) = self.bar.finish() {
            tracing::debug!(error = %e, "Progress render failed");
        }
    }

    fn close(&mut self) {
        if let Err(e) = self.bar.close() {
            tracing::debug!(error = %e, "Progress render failed");
        }
    }
}

/// Publishes a batch job's progress to the submitting process.
pub struct ChannelSink {
    seq: u64,
    channel: Arc<dyn ProgressChannel>,
    connected: bool,
}

impl ChannelSink {
    pub fn new(seq: u64, channel: Arc<dyn ProgressChannel>) -> Self {
        Self {
            seq,
            channel,
            connected: true,
        }
    }

    fn publish(&mut self, fraction: f64) {
        if !self.connected {
            return;
        }
        if !self.channel.publish(ProgressSample::new(self.seq, fraction)) {
            tracing::debug!(seq = self.seq, "Progress channel closed");
            self.connected = false;
        }
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&mut self, fraction: f64) {
        self.publish(fraction);
    }

    fn finish(&mut self) {
        self.publish(1.0);
    }
}

/// Periodic progress sampler hung on a job's environment.
pub struct ProgressReporter {
    sink: Rc<RefCell<Box<dyn ProgressSink>>>,
}

impl ProgressReporter {
    /// Choose the sink for a job: shared when the job belongs to a batch and
    /// a channel is available, a terminal bar otherwise.
    pub fn sink_for(
        config: &mut SimConfig,
        channel: Option<Arc<dyn ProgressChannel>>,
    ) -> Result<Box<dyn ProgressSink>, ConfigError> {
        match (config.seq(), channel) {
            (Some(seq), Some(channel)) => Ok(Box::new(ChannelSink::new(seq, channel))),
            _ => Ok(Box::new(TerminalSink::new(config.progress_max_width()?))),
        }
    }

    /// Sample `now / duration` every `duration / 100` time units. Nothing is
    /// scheduled for a zero or negative duration.
    pub fn attach<E: Environment>(env: &mut E, sink: Box<dyn ProgressSink>) -> Self {
        let sink = Rc::new(RefCell::new(sink));
        let duration = env.duration();
        if duration > 0.0 {
            let ticker = Rc::clone(&sink);
            env.every(
                duration / SAMPLES_PER_RUN,
                Box::new(move |now| ticker.borrow_mut().emit((now / duration).min(1.0))),
            );
        }
        Self { sink }
    }

    pub fn finish(self) {
        self.sink.borrow_mut().finish();
    }
}
