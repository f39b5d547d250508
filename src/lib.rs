//! simpool: run batches of simulation jobs on a pool of worker processes.

pub mod batch;
pub mod config;
pub mod demo;
pub mod env;
pub mod error;
pub mod job;
pub mod model;
pub mod progress;
pub mod worker;
pub mod workspace;

pub use batch::{simulate_in_workspace, simulate_many};
pub use config::BatchOptions;
pub use env::{Environment, SimEnvironment};
pub use error::{Error, Result};
pub use job::{SimConfig, SimResult, simulate};
pub use model::Model;
