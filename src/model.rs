//! The model lifecycle driven by the job runner.

use crate::env::Environment;
use crate::job::SimResult;

/// A simulation model.
///
/// The job runner calls the hooks in order: [`Model::pre_init`],
/// [`Model::new`], [`Model::elaborate`], the environment run,
/// [`Model::post_simulate`] and finally [`Model::get_result`]. Any hook may
/// fail or panic; the failure is recorded in the job's result.
pub trait Model: Sized {
    /// Environment the model is bound to. Its `from_config` acts as the
    /// environment constructor for every job of this model.
    type Env: Environment;

    /// Runs once the environment exists, before the model is built.
    fn pre_init(_env: &mut Self::Env) -> anyhow::Result<()> {
        Ok(())
    }

    /// Construct the top-level model bound to `env`.
    fn new(env: &mut Self::Env) -> anyhow::Result<Self>;

    /// Wire up components and schedule initial processes.
    fn elaborate(&mut self, env: &mut Self::Env) -> anyhow::Result<()>;

    fn post_simulate(&mut self, _env: &mut Self::Env) -> anyhow::Result<()> {
        Ok(())
    }

    /// Add model-specific entries to the job result.
    fn get_result(&self, env: &Self::Env, result: &mut SimResult) -> anyhow::Result<()>;
}
