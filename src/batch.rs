//! Batch submission.

use futures::future::join_all;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::BatchOptions;
use crate::error::{Result, WorkspaceError};
use crate::job::config::keys;
use crate::job::{SimConfig, SimResult};
use crate::model::Model;
use crate::progress::{ProgressAggregator, ProgressSink, TerminalSink};
use crate::worker::{ResultCollector, WorkerPool};
use crate::workspace::is_current_dir;

/// Run every config as a job of `M` on a pool of worker processes.
///
/// Each config is stamped with its index as `sim.seq`, and progress is
/// enabled for all jobs when any job enables it. Returns one result per
/// config, ordered by `sim.seq`. Failed jobs are reported through their
/// results' `sim.exception`, not as errors.
///
/// The worker program (by default the current executable) must dispatch to
/// [`crate::worker::serve::<M>`] when [`crate::worker::is_worker_process`].
pub async fn simulate_many<M: Model>(
    mut configs: Vec<SimConfig>,
    options: &BatchOptions,
) -> Result<Vec<SimResult>> {
    if configs.is_empty() {
        return Ok(Vec::new());
    }
    let batch_id = Uuid::new_v4();
    let jobs = configs.len();

    let mut progress = false;
    for (seq, config) in configs.iter_mut().enumerate() {
        config.insert(keys::SEQ, seq as u64);
        progress |= config.progress_enabled()?;
    }
    for config in &mut configs {
        config.insert(keys::PROGRESS_ENABLE, progress);
    }
    let max_width = match options.progress_max_width {
        Some(width) => Some(width),
        None => configs[0].progress_max_width()?,
    };

    let pool = WorkerPool::new(jobs, options, batch_id)?;
    tracing::info!(%batch_id, jobs, workers = pool.size(), progress, "Starting batch");

    let (results_tx, mut results_rx) = mpsc::unbounded_channel();
    let (progress_tx, aggregator) = if progress {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink: Box<dyn ProgressSink + Send> = Box::new(TerminalSink::new(max_width));
        let aggregator = ProgressAggregator::new(0..jobs as u64);
        (Some(tx), Some(tokio::spawn(aggregator.run(rx, sink))))
    } else {
        (None, None)
    };

    let workers = pool.start(configs, results_tx, progress_tx)?;
    let collected = ResultCollector::new(jobs).collect(&mut results_rx).await;

    for (worker, outcome) in join_all(workers).await.into_iter().enumerate() {
        match outcome {
            Ok(Ok(delivered)) => tracing::debug!(%batch_id, worker, delivered, "Worker done"),
            Ok(Err(e)) => tracing::warn!(%batch_id, worker, error = %e, "Worker ended abnormally"),
            Err(e) => tracing::error!(%batch_id, worker, error = %e, "Worker task failed"),
        }
    }
    if let Some(aggregator) = aggregator {
        match aggregator.await {
            Ok(total) => tracing::debug!(%batch_id, total, "Progress display closed"),
            Err(e) => tracing::warn!(%batch_id, error = %e, "Progress aggregator failed"),
        }
    }

    let results = collected?;
    let failed = results.iter().filter(|r| r.is_failure()).count();
    tracing::info!(%batch_id, jobs, failed, "Batch finished");
    Ok(results)
}

/// Run a batch where every job gets its own workspace under the base
/// config's `sim.workspace`.
///
/// Each job starts from `base` with the entries of its own config applied on
/// top, and runs in `<base workspace>/<seq>`. With `sim.workspace.overwrite`
/// the base workspace is cleared first, unless it is the current directory.
pub async fn simulate_in_workspace<M: Model>(
    mut base: SimConfig,
    configs: Vec<SimConfig>,
    options: &BatchOptions,
) -> Result<Vec<SimResult>> {
    let workspace = base.workspace()?;
    let overwrite = base.workspace_overwrite()?;

    if overwrite && !is_current_dir(&workspace) && workspace.is_dir() {
        tracing::info!(workspace = %workspace.display(), "Clearing batch workspace");
        std::fs::remove_dir_all(&workspace).map_err(|source| WorkspaceError::Remove {
            path: workspace.clone(),
            source,
        })?;
    }

    let configs = configs
        .into_iter()
        .enumerate()
        .map(|(seq, overrides)| {
            let mut config = base.clone();
            for (key, value) in overrides.into_map() {
                config.insert(key, value);
            }
            let job_workspace = workspace.join(seq.to_string());
            config.insert(keys::WORKSPACE, job_workspace.to_string_lossy().into_owned());
            config
        })
        .collect();

    simulate_many::<M>(configs, options).await
}
