//! Worker process entry point.
//!
//! A pool re-executes a binary with [`WORKER_ENV`] set. Such a binary must
//! call [`serve`] before doing anything else; the worker then reads
//! [`WorkItem`]s from stdin and answers with [`WorkerEvent`]s on stdout
//! until it receives `Stop` or its input closes.

use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::job::{SimResult, simulate};
use crate::model::Model;
use crate::progress::{ProgressChannel, ProgressSample};
use crate::worker::protocol::{WorkItem, WorkerEvent, decode, encode_line};

/// Set in the environment of every pool worker.
pub const WORKER_ENV: &str = "SIMPOOL_WORKER";

/// Whether this process was launched as a pool worker.
pub fn is_worker_process() -> bool {
    std::env::var_os(WORKER_ENV).is_some()
}

/// Serialized writer for worker events. Progress samples and results may be
/// written from different call sites, but lines never interleave.
pub struct EventWriter<W> {
    out: Mutex<W>,
}

impl<W: Write> EventWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn write_event(&self, event: &WorkerEvent) -> io::Result<()> {
        let line = encode_line(event).map_err(io::Error::other)?;
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        out.write_all(line.as_bytes())?;
        out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<W: Write + Send> ProgressChannel for EventWriter<W> {
    fn publish(&self, sample: ProgressSample) -> bool {
        self.write_event(&WorkerEvent::Progress(sample)).is_ok()
    }
}

/// Run the worker loop on this process's stdin and stdout.
pub fn serve<M: Model>() -> ExitCode {
    let events = Arc::new(EventWriter::new(io::stdout()));
    match run_worker::<M, _, _>(io::stdin().lock(), events) {
        Ok(completed) => {
            tracing::debug!(completed, pid = std::process::id(), "Worker finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, pid = std::process::id(), "Worker failed");
            ExitCode::FAILURE
        }
    }
}

/// Process work items from `input` until `Stop` or end of input, reporting
/// on `events`. Returns the number of jobs completed.
///
/// Every job yields exactly one result event: errors `simulate` returns
/// instead of recording are converted into failed results here.
pub fn run_worker<M, R, W>(input: R, events: Arc<EventWriter<W>>) -> io::Result<usize>
where
    M: Model,
    R: BufRead,
    W: Write + Send + 'static,
{
    let channel: Arc<dyn ProgressChannel> = events.clone();
    let mut completed = 0;

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let item: WorkItem =
            decode(&line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let config = match item {
            WorkItem::Stop => {
                tracing::debug!(completed, "Worker received stop");
                return Ok(completed);
            }
            WorkItem::Job { config } => config,
        };

        let seq = config.seq();
        let started = Instant::now();
        let fallback = config.clone();
        let result = match simulate::<M>(config, false, Some(Arc::clone(&channel))) {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(?seq, error = %e, "Job could not be run");
                SimResult::failure(fallback, e.to_string(), started.elapsed().as_secs_f64())
            }
        };
        events.write_event(&WorkerEvent::Result { result })?;
        completed += 1;
    }

    tracing::debug!(completed, "Worker input closed");
    Ok(completed)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use tempfile::TempDir;

    use super::*;
    use crate::demo::QueueModel;
    use crate::job::SimConfig;
    use crate::job::config::keys;
    use crate::workspace::cwd_lock;

    fn job_line(config: SimConfig) -> String {
        encode_line(&WorkItem::Job { config }).unwrap()
    }

    fn events_from(output: Vec<u8>) -> Vec<WorkerEvent> {
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| decode(l).unwrap())
            .collect()
    }

    fn results(events: &[WorkerEvent]) -> Vec<&SimResult> {
        events
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::Result { result } => Some(result),
                WorkerEvent::Progress(_) => None,
            })
            .collect()
    }

    #[test]
    fn runs_jobs_until_stop() {
        let _lock = cwd_lock();
        let mut input = String::new();
        for seq in 0..2 {
            input.push_str(&job_line(
                SimConfig::new()
                    .with(keys::SEQ, seq)
                    .with(keys::DURATION, 20)
                    .with(keys::SEED, seq),
            ));
        }
        input.push_str(&encode_line(&WorkItem::Stop).unwrap());
        input.push_str(&job_line(SimConfig::new().with(keys::SEQ, 9)));

        let events = Arc::new(EventWriter::new(Vec::new()));
        let completed =
            run_worker::<QueueModel, _, _>(Cursor::new(input), Arc::clone(&events)).unwrap();
        assert_eq!(completed, 2);

        let output = Arc::try_unwrap(events).ok().unwrap().into_inner();
        let events = events_from(output);
        let results = results(&events);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].seq(), Some(0));
        assert_eq!(results[1].seq(), Some(1));
        assert!(results.iter().all(|r| !r.is_failure()));
    }

    #[test]
    fn workspace_failure_becomes_failed_result() {
        let _lock = cwd_lock();
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let input = job_line(
            SimConfig::new()
                .with(keys::SEQ, 5)
                .with(keys::WORKSPACE, blocker.to_string_lossy().to_string()),
        );

        let events = Arc::new(EventWriter::new(Vec::new()));
        let completed =
            run_worker::<QueueModel, _, _>(Cursor::new(input), Arc::clone(&events)).unwrap();
        assert_eq!(completed, 1);

        let output = Arc::try_unwrap(events).ok().unwrap().into_inner();
        let events = events_from(output);
        let results = results(&events);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].seq(), Some(5));
        assert!(results[0].exception().unwrap().contains("workspace"));
    }

    #[test]
    fn progress_is_forwarded_before_result() {
        let _lock = cwd_lock();
        let input = job_line(
            SimConfig::new()
                .with(keys::SEQ, 0)
                .with(keys::DURATION, 10)
                .with(keys::PROGRESS_ENABLE, true),
        );
        let events = Arc::new(EventWriter::new(Vec::new()));
        run_worker::<QueueModel, _, _>(Cursor::new(input), Arc::clone(&events)).unwrap();

        let output = Arc::try_unwrap(events).ok().unwrap().into_inner();
        let events = events_from(output);
        assert!(matches!(events.last(), Some(WorkerEvent::Result { .. })));
        let last_progress = events.iter().rev().find_map(|e| match e {
            WorkerEvent::Progress(sample) => Some(*sample),
            WorkerEvent::Result { .. } => None,
        });
        assert_eq!(last_progress, Some(ProgressSample::new(0, 1.0)));
    }

    #[test]
    fn malformed_item_is_an_error() {
        let events = Arc::new(EventWriter::new(Vec::new()));
        let err = run_worker::<QueueModel, _, _>(Cursor::new("not json\n"), events).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
