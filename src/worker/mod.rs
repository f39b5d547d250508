//! Worker processes: spawning, feeding and collecting.
//!
//! - `protocol`: JSON-lines messages between the pool and a worker
//! - `process`: the worker side (`serve`, `run_worker`)
//! - `pool`: spawns workers and feeds them from a FIFO queue
//! - `collector`: waits for every result and restores `sim.seq` order

pub mod collector;
pub mod pool;
pub mod process;
pub mod protocol;

pub use collector::ResultCollector;
pub use pool::{WorkerPool, available_parallelism, pool_size};
pub use process::{EventWriter, WORKER_ENV, is_worker_process, run_worker, serve};
pub use protocol::{WorkItem, WorkerEvent};
