//! A minimal run driver.
//!
//! [`Runner`] ties a [`ModelGraph`] to an [`EventQueue`] under a set of
//! [`RunSettings`]. Each trial calls `pre_run` on every evaluable model,
//! drains the queue in `(time, priority)` order up to the trial duration,
//! then calls `post_run`. How far the clock jumps between drains is chosen
//! by the [`Increment`]:
//!
//! - **Fixed** -- the horizon advances in steps of `step` seconds and every
//!   event due by the horizon is delivered, as fast as possible.
//! - **RealTime** -- each event is delivered no earlier than its timestamp,
//!   measured in wall-clock seconds from the start of the trial.
//!
//! Events left over at the end of a trial are cleared before the next one.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{ConfigError, Increment, RunSettings};
use crate::graph::ModelGraph;
use crate::model::{EventContext, Model, ModelError, ModelHandle};
use crate::queue::EventQueue;
use crate::time::{self, SimTime, secs, to_secs};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Outcome of one trial.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrialReport {
    /// Events popped from the queue, delivered or not.
    pub events_dispatched: u64,
    /// Timestamp of the last event popped, if any.
    pub last_time: Option<SimTime>,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunReport {
    pub trials: u32,
    pub events_dispatched: u64,
    pub last_time: Option<SimTime>,
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Runner {
    graph: Arc<ModelGraph>,
    queue: Arc<EventQueue>,
    settings: RunSettings,
    now: SimTime,
}

impl Runner {
    pub fn new(
        graph: Arc<ModelGraph>,
        queue: Arc<EventQueue>,
        settings: RunSettings,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            graph,
            queue,
            settings,
            now: time::ZERO,
        })
    }

    pub fn graph(&self) -> &Arc<ModelGraph> {
        &self.graph
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Current simulation time of the trial in progress, or of the last one.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Run every trial. Between trials, leftover events are cleared and all
    /// models are marked dirty.
    pub fn run(&mut self) -> RunReport {
        let mut report = RunReport::default();
        info!(trials = self.settings.trials, duration = self.settings.duration, "run started");
        for trial in 0..self.settings.trials {
            if trial > 0 {
                let removed = self.queue.clear();
                debug!(trial, removed, "queue reset between trials");
                self.graph.mark_all_models_dirty();
            }
            let started = Instant::now();
            let trial_report = self.run_trial();
            if self.settings.profiling {
                info!(trial, elapsed_ms = started.elapsed().as_millis() as u64, "trial timing");
            }
            report.trials += 1;
            report.events_dispatched += trial_report.events_dispatched;
            if trial_report.last_time.is_some() {
                report.last_time = trial_report.last_time;
            }
        }
        info!(
            trials = report.trials,
            events = report.events_dispatched,
            "run finished"
        );
        report
    }

    /// Run one trial: `pre_run`, drain up to the duration, `post_run`.
    pub fn run_trial(&mut self) -> TrialReport {
        self.now = time::ZERO;
        self.call_each("pre_run", |model, ctx| model.pre_run(ctx));

        let end = self.settings.duration_time();
        let report = match self.settings.increment {
            Increment::Fixed { step } => self.drain_fixed(end, secs(step)),
            Increment::RealTime => self.drain_real_time(end),
        };

        self.call_each("post_run", |model, ctx| model.post_run(ctx));
        report
    }

    fn drain_fixed(&mut self, end: SimTime, step: SimTime) -> TrialReport {
        let mut report = TrialReport::default();
        let mut horizon = time::ZERO;
        loop {
            self.drain_due(horizon, &mut report);
            if horizon >= end {
                break;
            }
            horizon = time::advance(horizon, step).min(end);
            self.now = horizon;
        }
        report
    }

    fn drain_real_time(&mut self, end: SimTime) -> TrialReport {
        let mut report = TrialReport::default();
        let start = Instant::now();
        while let Some(next) = self.queue.peek_time() {
            if next > end {
                break;
            }
            let target = Duration::from_secs_f64(to_secs(next).max(0.0));
            if let Some(wait) = target.checked_sub(start.elapsed()) {
                std::thread::sleep(wait);
            }
            self.drain_due(next, &mut report);
        }
        self.now = end;
        report
    }

    /// Deliver every queued event with `time <= until`, including events
    /// emitted while draining.
    fn drain_due(&mut self, until: SimTime, report: &mut TrialReport) {
        while let Some(event) = self.queue.pop_due(until) {
            self.now = self.now.max(event.time);
            report.last_time = Some(event.time);
            report.events_dispatched += 1;
            self.graph.dispatch(event, &self.queue);
        }
    }

    /// Call `hook` on every evaluable model. Success marks the model clean,
    /// failure moves it to the Error state.
    fn call_each<F>(&self, hook: &'static str, mut f: F)
    where
        F: FnMut(&mut Box<dyn Model>, &mut EventContext<'_>) -> Result<(), ModelError>,
    {
        let models: Vec<(String, ModelHandle)> = self.graph.evaluable_models();
        for (name, handle) in models {
            let mut ctx = EventContext::new(self.now, &name, &self.queue);
            let result = {
                let mut model = handle.lock();
                f(&mut model, &mut ctx)
            };
            let recorded = match result {
                Ok(()) => self.graph.mark_model_clean(&name),
                Err(err) => {
                    warn!(model = %name, hook, %err, "lifecycle hook failed");
                    self.graph.mark_model_error(&name)
                }
            };
            if let Err(err) = recorded {
                // Removed or marked fatal by another thread meanwhile.
                debug!(model = %name, %err, "status not recorded");
            }
        }
    }
}
