//! Single-server queue model used by the `simpool` binary.
//!
//! Customers arrive with exponential inter-arrival times
//! (`queue.arrival_rate`, default 1.0 per time unit) and are served one at a
//! time with exponential service times (`queue.service_rate`, default 1.5).
//! `demo.fault` makes a job fail on purpose at `pre_init`, `elaborate`,
//! `run`, `result`, or kills the whole process mid-run with `crash`.
//! Results from a pool worker carry the worker's index as `demo.worker`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use anyhow::{Context, bail};
use rand::Rng;
use serde_json::Value;

use crate::env::{Environment, SimEnvironment};
use crate::job::SimResult;
use crate::model::Model;
use crate::worker::WORKER_ENV;

pub const ARRIVAL_RATE: &str = "queue.arrival_rate";
pub const SERVICE_RATE: &str = "queue.service_rate";
pub const FAULT: &str = "demo.fault";
pub const WORKER: &str = "demo.worker";

/// Exit status used by the `crash` fault.
pub const CRASH_EXIT_CODE: i32 = 70;

#[derive(Debug, Default)]
struct QueueState {
    waiting: VecDeque<f64>,
    busy: bool,
    arrived: u64,
    served: u64,
    total_wait: f64,
}

/// M/M/1 queue.
pub struct QueueModel {
    arrival_rate: f64,
    service_rate: f64,
    state: Rc<RefCell<QueueState>>,
}

fn fault(env: &SimEnvironment) -> Option<&str> {
    env.config().get(FAULT).and_then(Value::as_str)
}

fn rate(env: &SimEnvironment, key: &str, default: f64) -> anyhow::Result<f64> {
    let rate = match env.config().get(key) {
        None | Some(Value::Null) => default,
        Some(value) => value
            .as_f64()
            .with_context(|| format!("{key} must be a number, got {value}"))?,
    };
    if !(rate.is_finite() && rate > 0.0) {
        bail!("{key} must be positive, got {rate}");
    }
    Ok(rate)
}

fn exponential(env: &mut SimEnvironment, rate: f64) -> f64 {
    let u: f64 = env.rng().r#gen();
    -(1.0 - u).ln() / rate
}

/// Begin serving the next waiting customer, if the server is free.
fn start_service(env: &mut SimEnvironment, state: &Rc<RefCell<QueueState>>, service_rate: f64) {
    {
        let mut s = state.borrow_mut();
        if s.busy {
            return;
        }
        let Some(arrived_at) = s.waiting.pop_front() else {
            return;
        };
        s.busy = true;
        s.total_wait += env.now() - arrived_at;
    }
    let delay = exponential(env, service_rate);
    let state = Rc::clone(state);
    env.schedule(delay, move |env| {
        {
            let mut s = state.borrow_mut();
            s.busy = false;
            s.served += 1;
        }
        start_service(env, &state, service_rate);
    });
}

impl Model for QueueModel {
    type Env = SimEnvironment;

    fn pre_init(env: &mut SimEnvironment) -> anyhow::Result<()> {
        if fault(env) == Some("pre_init") {
            bail!("injected pre_init fault");
        }
        Ok(())
    }

    fn new(env: &mut SimEnvironment) -> anyhow::Result<Self> {
        Ok(Self {
            arrival_rate: rate(env, ARRIVAL_RATE, 1.0)?,
            service_rate: rate(env, SERVICE_RATE, 1.5)?,
            state: Rc::default(),
        })
    }

    fn elaborate(&mut self, env: &mut SimEnvironment) -> anyhow::Result<()> {
        match fault(env) {
            Some("elaborate") => bail!("injected elaborate fault"),
            Some("run") => {
                let at = env.duration() / 2.0;
                env.schedule(at, |env| panic!("injected run fault at {}", env.now()));
            }
            Some("crash") => {
                let at = env.duration() / 2.0;
                env.schedule(at, |_| std::process::exit(CRASH_EXIT_CODE));
            }
            _ => {}
        }

        let state = Rc::clone(&self.state);
        let arrival_rate = self.arrival_rate;
        let service_rate = self.service_rate;
        env.process(move |env| {
            let now = env.now();
            {
                let mut s = state.borrow_mut();
                s.arrived += 1;
                s.waiting.push_back(now);
            }
            start_service(env, &state, service_rate);
            Some(exponential(env, arrival_rate))
        });
        Ok(())
    }

    fn get_result(&self, env: &SimEnvironment, result: &mut SimResult) -> anyhow::Result<()> {
        if fault(env) == Some("result") {
            bail!("injected result fault");
        }
        let s = self.state.borrow();
        let started = s.served + u64::from(s.busy);
        let mean_wait = if started > 0 {
            s.total_wait / started as f64
        } else {
            0.0
        };
        result.insert("queue.arrived", s.arrived);
        result.insert("queue.served", s.served);
        result.insert("queue.mean_wait", mean_wait);
        let worker = std::env::var(WORKER_ENV).ok().and_then(|w| w.parse::<u64>().ok());
        if let Some(worker) = worker {
            result.insert(WORKER, worker);
        }
        Ok(())
    }
}
