//! Jobs: configuration in, result out.

pub mod config;
pub mod phase;
pub mod result;
pub mod runner;

pub use config::SimConfig;
pub use phase::{JobPhase, PhaseFailure};
pub use result::SimResult;
pub use runner::simulate;
