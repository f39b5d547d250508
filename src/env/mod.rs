//! Simulation environments.
//!
//! The orchestration core only needs to construct an environment from a job
//! config, run it to its stop condition, ask it for the current time and hang
//! a periodic background activity on its scheduler. [`SimEnvironment`] is a
//! small cooperative implementation of that contract.

pub mod sim;
pub mod timescale;

pub use sim::SimEnvironment;
pub use timescale::{TimeUnit, TimeValue, parse_time, scale_time};

use crate::job::SimConfig;

/// Periodic activity callback; receives the simulation time of the tick.
pub type Tick = Box<dyn FnMut(f64)>;

/// What the job runner needs from a simulation engine.
pub trait Environment: Sized {
    /// Build an environment for a job, recording defaults for the config keys
    /// it consumes.
    fn from_config(config: &mut SimConfig) -> anyhow::Result<Self>;

    /// Current simulation time in timescale units.
    fn now(&self) -> f64;

    /// Current simulation time in seconds.
    fn time(&self) -> f64;

    /// Intended run length in timescale units.
    fn duration(&self) -> f64;

    /// Stop condition for [`Environment::run`]; the duration unless overridden.
    fn until(&self) -> f64 {
        self.duration()
    }

    /// Drive the simulation until `until` (or an earlier stop).
    fn run(&mut self, until: f64) -> anyhow::Result<()>;

    /// Invoke `tick` now and then every `interval` time units for as long as
    /// the run lasts. Non-positive intervals schedule nothing.
    fn every(&mut self, interval: f64, tick: Tick);
}
