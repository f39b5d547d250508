//! Minimal cooperative discrete-event environment.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::Value;

use crate::env::timescale::{TimeUnit, TimeValue, parse_time, scale_time};
use crate::env::{Environment, Tick};
use crate::error::ConfigError;
use crate::job::SimConfig;
use crate::job::config::{invalid, keys};

type Action = Box<dyn FnOnce(&mut SimEnvironment)>;
type Step = Box<dyn FnMut(&mut SimEnvironment) -> Option<f64>>;

struct Scheduled {
    at: f64,
    id: u64,
    action: Action,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed so the max-heap pops the earliest event, FIFO among equal times.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .total_cmp(&self.at)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Event-queue simulation environment with a per-job seeded RNG.
pub struct SimEnvironment {
    config: SimConfig,
    rng: StdRng,
    timescale: TimeValue,
    duration: f64,
    until: f64,
    now: f64,
    next_id: u64,
    queue: BinaryHeap<Scheduled>,
    stopped: bool,
}

impl SimEnvironment {
    /// Build from a job config. Records defaults for `sim.seed`,
    /// `sim.timescale` and `sim.duration`.
    pub fn new(config: &mut SimConfig) -> Result<Self, ConfigError> {
        let rng = match config.setdefault(keys::SEED, Value::Null) {
            Value::Null => StdRng::from_entropy(),
            Value::Number(n) => match n.as_u64() {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => {
                    return Err(invalid(
                        keys::SEED,
                        "an unsigned integer",
                        &Value::Number(n.clone()),
                    ));
                }
            },
            other => return Err(invalid(keys::SEED, "an unsigned integer", other)),
        };

        let timescale = match config.setdefault(keys::TIMESCALE, "1 s") {
            Value::String(s) => parse_time(s)?,
            other => return Err(invalid(keys::TIMESCALE, "a time string", other)),
        };
        if timescale.magnitude <= 0.0 {
            return Err(invalid(
                keys::TIMESCALE,
                "a positive time",
                &Value::from(timescale.to_string()),
            ));
        }

        let duration = match config.setdefault(keys::DURATION, "0 s") {
            Value::String(s) => scale_time(parse_time(s)?, timescale),
            Value::Number(n) => n
                .as_f64()
                .filter(|d| d.is_finite() && *d >= 0.0)
                .ok_or_else(|| {
                    invalid(
                        keys::DURATION,
                        "a non-negative number",
                        &Value::Number(n.clone()),
                    )
                })?,
            other => return Err(invalid(keys::DURATION, "a time string or number", other)),
        };

        Ok(Self {
            config: config.clone(),
            rng,
            timescale,
            duration,
            until: duration,
            now: 0.0,
            next_id: 0,
            queue: BinaryHeap::new(),
            stopped: false,
        })
    }

    /// The job config, with defaults applied.
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// The job's private random number generator.
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub fn timescale(&self) -> TimeValue {
        self.timescale
    }

    /// Override the stop condition used by the job runner.
    pub fn set_until(&mut self, until: f64) {
        self.until = until;
    }

    /// Simulation time `t` (default: now) expressed in `unit`.
    pub fn time_in(&self, t: Option<f64>, unit: TimeUnit) -> f64 {
        let t = t.unwrap_or(self.now);
        let scaled = TimeValue::new(t * self.timescale.magnitude, self.timescale.unit);
        scale_time(scaled, TimeValue::new(1.0, unit))
    }

    /// Run `action` after `delay` time units. Negative delays run immediately.
    pub fn schedule(&mut self, delay: f64, action: impl FnOnce(&mut SimEnvironment) + 'static) {
        let id = self.next_id;
        self.next_id += 1;
        self.queue.push(Scheduled {
            at: self.now + delay.max(0.0),
            id,
            action: Box::new(action),
        });
    }

    /// Start a process. `step` runs immediately and again after each delay it
    /// returns; returning `None` ends the process.
    pub fn process(&mut self, step: impl FnMut(&mut SimEnvironment) -> Option<f64> + 'static) {
        let step: Step = Box::new(step);
        self.schedule(0.0, move |env| env.resume(step));
    }

    fn resume(&mut self, mut step: Step) {
        if let Some(delay) = step(self) {
            self.schedule(delay, move |env| env.resume(step));
        }
    }

    /// End the current run after the event being processed.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Number of events still queued.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Process events scheduled strictly before `until`, then advance the
    /// clock to `until` unless the run was stopped early.
    pub fn run_until(&mut self, until: f64) {
        self.stopped = false;
        while let Some(next) = self.queue.peek() {
            if next.at >= until {
                break;
            }
            let Some(event) = self.queue.pop() else { break };
            self.now = event.at;
            (event.action)(self);
            if self.stopped {
                tracing::debug!(now = self.now, "Simulation stopped early");
                return;
            }
        }
        if until.is_finite() && until > self.now {
            self.now = until;
        }
    }
}

impl Environment for SimEnvironment {
    fn from_config(config: &mut SimConfig) -> anyhow::Result<Self> {
        Ok(Self::new(config)?)
    }

    fn now(&self) -> f64 {
        self.now
    }

    fn time(&self) -> f64 {
        self.time_in(None, TimeUnit::S)
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn until(&self) -> f64 {
        self.until
    }

    fn run(&mut self, until: f64) -> anyhow::Result<()> {
        self.run_until(until);
        Ok(())
    }

    fn every(&mut self, interval: f64, mut tick: Tick) {
        if !(interval.is_finite() && interval > 0.0) {
            return;
        }
        // Tick times are derived from the start so rounding does not accumulate.
        let start = self.now;
        let mut ticks: u32 = 0;
        self.process(move |env| {
            tick(env.now);
            ticks += 1;
            let next = start + f64::from(ticks) * interval;
            (next < env.until).then(|| next - env.now)
        });
    }
}
