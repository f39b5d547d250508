//! Single-job execution.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::env::Environment;
use crate::error::{JobError, Result};
use crate::job::phase::{JobPhase, PhaseFailure};
use crate::job::result::keys;
use crate::job::{SimConfig, SimResult};
use crate::model::Model;
use crate::progress::{ProgressChannel, ProgressReporter};
use crate::workspace::WorkspaceScope;

/// Per-job objects that outlive a failed phase.
struct JobState<E> {
    env: Option<E>,
    reporter: Option<ProgressReporter>,
}

/// Run one job of model `M` described by `config`.
///
/// Failures and panics raised by the environment or the model are recorded
/// in the result's `sim.exception`; with `reraise` they are also returned as
/// [`JobError::Failed`] once the result file has been written. An unusable
/// `sim.result.file` is recorded the same way. Workspace errors are always
/// returned.
///
/// `progress` is the batch channel used when the job carries a `sim.seq`;
/// without it an enabled reporter draws a terminal bar.
pub fn simulate<M: Model>(
    mut config: SimConfig,
    reraise: bool,
    progress: Option<Arc<dyn ProgressChannel>>,
) -> Result<SimResult> {
    let started = Instant::now();
    let seq = config.seq();
    let workspace = config.workspace()?;
    let overwrite = config.workspace_overwrite()?;
    let scope = WorkspaceScope::enter(&workspace, overwrite)?;

    tracing::debug!(?seq, workspace = %workspace.display(), "Job started");

    let mut result = SimResult::new();
    let mut state = JobState::<M::Env> {
        env: None,
        reporter: None,
    };
    let mut outcome = run_phases::<M>(&mut config, &mut state, &mut result, progress);
    if let Some(reporter) = state.reporter.take() {
        reporter.finish();
    }

    let result_file = match config.result_file() {
        Ok(path) => path,
        Err(e) => {
            keep_first(&mut outcome, PhaseFailure::new(JobPhase::ResultFile, e.to_string()));
            None
        }
    };
    let exception = match &outcome {
        Ok(()) => Value::Null,
        Err(failure) => {
            tracing::warn!(?seq, phase = %failure.phase, error = %failure.message, "Job failed");
            Value::from(failure.to_string())
        }
    };
    result.insert(keys::EXCEPTION, exception);
    result.set_config(config);
    if let Some(env) = &state.env {
        result.insert(keys::NOW, env.now());
        result.insert(keys::TIME, env.time());
    }
    let runtime = started.elapsed().as_secs_f64();
    result.insert(keys::RUNTIME, runtime);

    if let Some(path) = result_file {
        if let Err(e) = result.dump(&path) {
            tracing::warn!(?seq, path = %path.display(), error = %e, "Failed to write result file");
            if reraise {
                scope.exit()?;
                return Err(e.into());
            }
            if outcome.is_ok() {
                let failure = PhaseFailure::new(JobPhase::ResultFile, e.to_string());
                result.insert(keys::EXCEPTION, failure.to_string());
                outcome = Err(failure);
            }
        }
    }
    scope.exit()?;

    tracing::info!(?seq, runtime, failed = outcome.is_err(), "Job finished");

    match outcome {
        Err(failure) if reraise => Err(JobError::Failed {
            seq,
            reason: failure.to_string(),
        }
        .into()),
        _ => Ok(result),
    }
}

/// Record `failure` unless an earlier phase already failed.
fn keep_first(outcome: &mut std::result::Result<(), PhaseFailure>, failure: PhaseFailure) {
    if let Err(first) = outcome {
        tracing::warn!(
            phase = %failure.phase,
            error = %failure.message,
            first = %first,
            "Later failure not recorded"
        );
        return;
    }
    *outcome = Err(failure);
}

fn run_phases<M: Model>(
    config: &mut SimConfig,
    state: &mut JobState<M::Env>,
    result: &mut SimResult,
    progress: Option<Arc<dyn ProgressChannel>>,
) -> std::result::Result<(), PhaseFailure> {
    let env = state
        .env
        .insert(guarded(JobPhase::Environment, || M::Env::from_config(config))?);
    guarded(JobPhase::PreInit, || M::pre_init(env))?;

    state.reporter = guarded(JobPhase::Progress, || {
        if !config.progress_enabled()? {
            return Ok(None);
        }
        let sink = ProgressReporter::sink_for(config, progress)?;
        Ok(Some(ProgressReporter::attach(env, sink)))
    })?;

    let mut model = guarded(JobPhase::Elaborate, || {
        let mut model = M::new(env)?;
        model.elaborate(env)?;
        Ok(model)
    })?;
    guarded(JobPhase::Run, || {
        let until = env.until();
        env.run(until)
    })?;
    guarded(JobPhase::PostSimulate, || model.post_simulate(env))?;
    guarded(JobPhase::Result, || model.get_result(env, result))
}

/// Run `f`, turning both errors and panics into a failure of `phase`.
fn guarded<T>(
    phase: JobPhase,
    f: impl FnOnce() -> anyhow::Result<T>,
) -> std::result::Result<T, PhaseFailure> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(PhaseFailure::new(phase, format!("{e:#}"))),
        Err(payload) => Err(PhaseFailure::new(
            phase,
            format!("panicked: {}", panic_message(payload.as_ref())),
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use anyhow::bail;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::env::SimEnvironment;
    use crate::error::Error;
    use crate::job::config::keys as config_keys;
    use crate::progress::ProgressSample;
    use crate::workspace::cwd_lock;

    /// Counts its own ticks; `test.fail` picks a phase to break.
    struct Counter {
        ticks: Arc<std::sync::atomic::AtomicU64>,
    }

    fn fail_at(env: &SimEnvironment) -> Option<String> {
        env.config()
            .get("test.fail")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    impl Model for Counter {
        type Env = SimEnvironment;

        fn pre_init(env: &mut SimEnvironment) -> anyhow::Result<()> {
            if fail_at(env).as_deref() == Some("pre_init") {
                bail!("refusing to start");
            }
            Ok(())
        }

        fn new(_env: &mut SimEnvironment) -> anyhow::Result<Self> {
            Ok(Self {
                ticks: Arc::default(),
            })
        }

        fn elaborate(&mut self, env: &mut SimEnvironment) -> anyhow::Result<()> {
            let ticks = Arc::clone(&self.ticks);
            let panics = fail_at(env).as_deref() == Some("run");
            env.process(move |env| {
                if panics && env.now() >= 3.0 {
                    panic!("boom at {}", env.now());
                }
                ticks.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                Some(1.0)
            });
            Ok(())
        }

        fn get_result(&self, env: &SimEnvironment, result: &mut SimResult) -> anyhow::Result<()> {
            if fail_at(env).as_deref() == Some("result") {
                bail!("no result for you");
            }
            result.insert(
                "counter.ticks",
                self.ticks.load(std::sync::atomic::Ordering::Relaxed),
            );
            Ok(())
        }
    }

    fn config() -> SimConfig {
        SimConfig::new().with(config_keys::DURATION, 10).with(config_keys::SEED, 1)
    }

    #[test]
    fn successful_job_populates_result() {
        let _lock = cwd_lock();
        let result = simulate::<Counter>(config(), true, None).unwrap();
        assert_eq!(result.get(keys::EXCEPTION), Some(&Value::Null));
        assert_eq!(result.get("counter.ticks"), Some(&json!(10)));
        assert_eq!(result.now(), Some(10.0));
        assert_eq!(result.time(), Some(10.0));
        assert!(result.runtime().unwrap() >= 0.0);

        let recorded = result.config().unwrap();
        assert_eq!(recorded.get(config_keys::TIMESCALE), Some(&json!("1 s")));
        assert_eq!(recorded.get(config_keys::WORKSPACE), Some(&json!(".")));
    }

    #[test]
    fn failure_without_reraise_is_recorded() {
        let _lock = cwd_lock();
        let result =
            simulate::<Counter>(config().with("test.fail", "result"), false, None).unwrap();
        assert_eq!(result.exception(), Some("result: no result for you"));
        assert_eq!(result.now(), Some(10.0));
        assert!(result.contains_key(keys::RUNTIME));
        assert!(!result.contains_key("counter.ticks"));
    }

    #[test]
    fn failure_with_reraise_is_returned() {
        let _lock = cwd_lock();
        let err = simulate::<Counter>(
            config().with("test.fail", "pre_init").with(config_keys::SEQ, 4),
            true,
            None,
        )
        .unwrap_err();
        match err {
            Error::Job(JobError::Failed { seq, reason }) => {
                assert_eq!(seq, Some(4));
                assert_eq!(reason, "pre_init: refusing to start");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn panics_are_captured_with_partial_time() {
        let _lock = cwd_lock();
        let result = simulate::<Counter>(config().with("test.fail", "run"), false, None).unwrap();
        let exception = result.exception().unwrap();
        assert!(exception.starts_with("run: panicked: boom at 3"), "{exception}");
        assert_eq!(result.now(), Some(3.0));
    }

    #[test]
    fn bad_environment_config_fails_without_times() {
        let _lock = cwd_lock();
        let result = simulate::<Counter>(
            config().with(config_keys::TIMESCALE, "3 parsecs"),
            false,
            None,
        )
        .unwrap();
        assert!(result.exception().unwrap().starts_with("environment: "));
        assert!(!result.contains_key(keys::NOW));
        assert!(result.contains_key(keys::CONFIG));
    }

    #[test]
    fn result_file_is_written_even_on_failure() {
        let _lock = cwd_lock();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("result.yaml");
        let config = config()
            .with("test.fail", "result")
            .with(config_keys::RESULT_FILE, path.to_string_lossy().to_string());

        let err = simulate::<Counter>(config, true, None).unwrap_err();
        assert!(matches!(err, Error::Job(JobError::Failed { .. })));

        let written: serde_yaml::Value =
            serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            written["sim.exception"].as_str(),
            Some("result: no result for you")
        );
        assert_eq!(written["config"]["sim.duration"].as_u64(), Some(10));
    }

    #[test]
    fn unwritable_result_file_is_recorded_without_reraise() {
        let _lock = cwd_lock();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("result.yaml");
        let config = config().with(config_keys::RESULT_FILE, path.to_string_lossy().to_string());

        let result = simulate::<Counter>(config, false, None).unwrap();
        let exception = result.exception().unwrap();
        assert!(exception.starts_with("result_file: "), "{exception}");
        assert_eq!(result.get("counter.ticks"), Some(&json!(10)));
        assert!(!path.exists());
    }

    #[test]
    fn unwritable_result_file_is_returned_with_reraise() {
        let _lock = cwd_lock();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("result.yaml");
        let config = config().with(config_keys::RESULT_FILE, path.to_string_lossy().to_string());

        let err = simulate::<Counter>(config, true, None).unwrap_err();
        assert!(matches!(err, Error::ResultFile(_)), "{err}");
    }

    #[test]
    fn invalid_result_file_value_is_recorded() {
        let _lock = cwd_lock();
        let result =
            simulate::<Counter>(config().with(config_keys::RESULT_FILE, 5), false, None).unwrap();
        let exception = result.exception().unwrap();
        assert!(exception.starts_with("result_file: "), "{exception}");
        assert_eq!(result.config().unwrap().get(config_keys::RESULT_FILE), Some(&json!(5)));

        let err = simulate::<Counter>(config().with(config_keys::RESULT_FILE, 5), true, None)
            .unwrap_err();
        assert!(matches!(err, Error::Job(JobError::Failed { .. })), "{err}");
    }

    #[test]
    fn result_file_error_does_not_hide_earlier_failure() {
        let _lock = cwd_lock();
        let config = config()
            .with("test.fail", "pre_init")
            .with(config_keys::RESULT_FILE, 5);
        let result = simulate::<Counter>(config, false, None).unwrap();
        assert_eq!(result.exception(), Some("pre_init: refusing to start"));
    }

    #[test]
    fn batch_progress_ends_with_full_sample() {
        let _lock = cwd_lock();
        let (tx, rx) = mpsc::channel::<ProgressSample>();
        let channel: Arc<dyn ProgressChannel> = Arc::new(tx);
        let config = config()
            .with(config_keys::SEQ, 2)
            .with(config_keys::PROGRESS_ENABLE, true);

        simulate::<Counter>(config, true, Some(channel)).unwrap();

        let samples: Vec<ProgressSample> = rx.try_iter().collect();
        assert!(samples.len() > 1);
        assert!(samples.iter().all(|s| s.seq == 2));
        assert!(samples.windows(2).all(|w| w[0].fraction <= w[1].fraction));
        assert_eq!(samples.last().map(|s| s.fraction), Some(1.0));
    }

    #[test]
    fn failed_batch_job_still_completes_progress() {
        let _lock = cwd_lock();
        let (tx, rx) = mpsc::channel::<ProgressSample>();
        let config = config()
            .with(config_keys::SEQ, 0)
            .with(config_keys::PROGRESS_ENABLE, true)
            .with("test.fail", "run");

        let result = simulate::<Counter>(config, false, Some(Arc::new(tx))).unwrap();
        assert!(result.is_failure());
        let last = rx.try_iter().last().unwrap();
        assert_eq!(last, ProgressSample::new(0, 1.0));
    }

    #[test]
    fn job_runs_inside_its_workspace() {
        let _lock = cwd_lock();
        let dir = TempDir::new().unwrap();
        let workspace = dir.path().join("job");
        let before = std::env::current_dir().unwrap();
        let config = config()
            .with(config_keys::WORKSPACE, workspace.to_string_lossy().to_string())
            .with(config_keys::RESULT_FILE, "result.yaml");

        simulate::<Counter>(config, true, None).unwrap();

        assert_eq!(std::env::current_dir().unwrap(), before);
        assert!(workspace.join("result.yaml").is_file());
    }

    #[test]
    fn workspace_errors_propagate_without_reraise() {
        let _lock = cwd_lock();
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let config =
            config().with(config_keys::WORKSPACE, blocker.to_string_lossy().to_string());

        let err = simulate::<Counter>(config, false, None).unwrap_err();
        assert!(matches!(err, Error::Workspace(_)));
    }

    #[test]
    fn panic_payloads_are_described() {
        assert_eq!(panic_message(&"static str"), "static str");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42_u8), "unknown panic");
    }
}
