//! Pool of worker processes fed from a shared FIFO queue.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::BatchOptions;
use crate::error::PoolError;
use crate::job::{SimConfig, SimResult};
use crate::progress::ProgressSample;
use crate::worker::process::WORKER_ENV;
use crate::worker::protocol::{WorkItem, WorkerEvent, decode, encode_line};

/// Environment variable carrying the batch id into workers, for log
/// correlation.
pub const BATCH_ENV: &str = "SIMPOOL_BATCH";

type WorkQueue = Arc<Mutex<UnboundedReceiver<WorkItem>>>;

/// Number of CPUs usable by this process.
pub fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Workers for a batch: never more than jobs, CPUs or the cap, never fewer
/// than one.
pub fn pool_size(num_jobs: usize, cpus: usize, cap: Option<usize>) -> usize {
    let size = num_jobs.min(cpus);
    cap.map_or(size, |cap| size.min(cap)).max(1)
}

/// Worker processes for one batch.
#[derive(Debug)]
pub struct WorkerPool {
    size: usize,
    program: PathBuf,
    args: Vec<String>,
    batch_id: Uuid,
}

impl WorkerPool {
    pub fn new(num_jobs: usize, options: &BatchOptions, batch_id: Uuid) -> Result<Self, PoolError> {
        Ok(Self {
            size: pool_size(num_jobs, available_parallelism(), options.max_workers),
            program: options.resolve_worker_program()?,
            args: options.worker_args.clone(),
            batch_id,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue every job followed by one stop per worker, launch the workers
    /// and start one feeder task per worker.
    ///
    /// Each feeder hands its worker the next item only once the previous job
    /// has reported its result. Results go to `results`; progress samples to
    /// `progress` when given. Every feeder owns a clone of both senders, so
    /// the channels close once all feeders are done.
    pub fn start(
        &self,
        configs: Vec<SimConfig>,
        results: UnboundedSender<SimResult>,
        progress: Option<UnboundedSender<ProgressSample>>,
    ) -> Result<Vec<JoinHandle<Result<usize, PoolError>>>, PoolError> {
        let (work_tx, work_rx) = mpsc::unbounded_channel();
        for config in configs {
            // The receiver is alive until the queue is dropped below.
            let _ = work_tx.send(WorkItem::Job { config });
        }
        for _ in 0..self.size {
            let _ = work_tx.send(WorkItem::Stop);
        }
        drop(work_tx);
        let queue: WorkQueue = Arc::new(Mutex::new(work_rx));

        let children = (0..self.size)
            .map(|worker| self.spawn(worker))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(children
            .into_iter()
            .enumerate()
            .map(|(worker, child)| {
                tokio::spawn(drive_worker(
                    worker,
                    child,
                    Arc::clone(&queue),
                    results.clone(),
                    progress.clone(),
                ))
            })
            .collect())
    }

    fn spawn(&self, worker: usize) -> Result<Child, PoolError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env(WORKER_ENV, worker.to_string())
            .env(BATCH_ENV, self.batch_id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        // Keep workers out of the terminal's foreground group: Ctrl-C reaches
        // only the submitting process.
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|source| PoolError::SpawnFailed {
            worker,
            program: self.program.clone(),
            source,
        })?;
        tracing::debug!(worker, pid = ?child.id(), batch_id = %self.batch_id, "Worker spawned");
        Ok(child)
    }
}

/// Feed one worker from the shared queue until it is sent `Stop` or dies.
/// Returns the number of results it delivered.
async fn drive_worker(
    worker: usize,
    mut child: Child,
    queue: WorkQueue,
    results: UnboundedSender<SimResult>,
    progress: Option<UnboundedSender<ProgressSample>>,
) -> Result<usize, PoolError> {
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| PoolError::Protocol(format!("worker {worker} has no stdin")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| PoolError::Protocol(format!("worker {worker} has no stdout")))?;
    let mut lines = BufReader::new(stdout).lines();
    let mut delivered = 0;

    loop {
        // Hold the queue only for a single dequeue.
        let item = { queue.lock().await.recv().await };
        let Some(item) = item else { break };

        let line = encode_line(&item)?;
        let sent = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;

        let config = match item {
            WorkItem::Stop => {
                if let Err(e) = sent {
                    tracing::debug!(worker, error = %e, "Worker gone before stop");
                }
                break;
            }
            WorkItem::Job { config } => config,
        };
        let seq = config.seq();
        if let Err(e) = sent {
            tracing::error!(worker, ?seq, error = %e, "Failed to hand job to worker");
            return Err(PoolError::WorkerExited { worker, seq });
        }

        let result = loop {
            match lines.next_line().await {
                Ok(Some(line)) => match decode::<WorkerEvent>(&line) {
                    Ok(WorkerEvent::Progress(sample)) => {
                        if let Some(progress) = &progress {
                            let _ = progress.send(sample);
                        }
                    }
                    Ok(WorkerEvent::Result { result }) => break Some(result),
                    Err(e) => tracing::warn!(
                        worker,
                        ?seq,
                        error = %e,
                        "Ignoring unreadable worker output"
                    ),
                },
                Ok(None) => break None,
                Err(e) => {
                    tracing::warn!(worker, ?seq, error = %e, "Failed to read worker output");
                    break None;
                }
            }
        };

        let Some(result) = result else {
            tracing::error!(worker, ?seq, "Worker exited mid-job");
            return Err(PoolError::WorkerExited { worker, seq });
        };
        tracing::debug!(worker, ?seq, failed = result.is_failure(), "Job completed");
        delivered += 1;
        if results.send(result).is_err() {
            tracing::warn!(worker, "Result collector gone, stopping worker");
            break;
        }
    }

    drop(stdin);
    match child.wait().await {
        Ok(status) if !status.success() => {
            tracing::warn!(worker, %status, "Worker exited with failure status")
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(worker, error = %e, "Failed to wait for worker"),
    }
    Ok(delivered)
}
