//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::event::Event;
use crate::graph::{CAR_MODEL_TAG, ModelGraph};
use crate::id::EventKind;
use crate::model::{EventContext, Model, ModelCore, ModelError, ModelHandle};
use crate::params::{
    ParamDescriptor, ParamKind, ParamMap, ParamMapExt, ParamSchema, format_yes_no,
};
use crate::registry::ModelRegistry;
use crate::time::{SimTime, secs};

pub use crate::params::param_map;

// ===========================================================================
// Type names
// ===========================================================================

pub const NULL_MODEL: &str = "NullModel";
pub const PROBE_MODEL: &str = "ProbeModel";
pub const TEST_CAR: &str = "TestCar";
pub const FAILING_MODEL: &str = "FailingModel";

/// Kind used by probes when `reply = yes`.
pub const REPLY_KIND: EventKind = EventKind(900);

// ===========================================================================
// Event helpers
// ===========================================================================

/// A broadcast event of kind 0 at `t` seconds.
pub fn event_at(t: f64) -> Event {
    Event::new(secs(t), EventKind(0))
}

/// An event of kind 0 at `t` seconds addressed to `destination`.
pub fn event_to(t: f64, destination: &str) -> Event {
    event_at(t).with_destination(destination)
}

// ===========================================================================
// NullModel
// ===========================================================================

/// Accepts any parameters, ignores every event.
#[derive(Debug)]
pub struct NullModel {
    core: ModelCore,
}

impl NullModel {
    pub fn new(name: &str) -> Self {
        Self {
            core: ModelCore::new(name),
        }
    }
}

impl Model for NullModel {
    fn core(&self) -> &ModelCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }
    fn type_name(&self) -> &str {
        NULL_MODEL
    }
    fn init(&mut self, _params: &ParamMap) -> Result<(), ModelError> {
        Ok(())
    }
    fn save(&self) -> ParamMap {
        ParamMap::new()
    }
    fn handle_event(&mut self, _: &mut Event, _: &mut EventContext<'_>) -> Result<(), ModelError> {
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ===========================================================================
// ProbeModel
// ===========================================================================

/// One recorded call on a [`ProbeModel`].
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeCall {
    Init,
    PreRun,
    PostRun,
    Cleanup,
    SettingsChanged,
    Event {
        time: SimTime,
        kind: EventKind,
        origin: String,
    },
}

/// Records every call it receives.
///
/// Parameters: `speed` (float 0..100), `reply` (yes/no: answer each event
/// with a [`REPLY_KIND`] event to its origin), `fail` (yes/no: the event
/// handler errors), `ip` (optional address, kept verbatim).
#[derive(Debug)]
pub struct ProbeModel {
    core: ModelCore,
    type_name: &'static str,
    tags: &'static [&'static str],
    params: ParamMap,
    reply: bool,
    fail: bool,
    calls: Arc<Mutex<Vec<ProbeCall>>>,
}

impl ProbeModel {
    pub fn new(name: &str) -> Self {
        Self {
            core: ModelCore::new(name),
            type_name: PROBE_MODEL,
            tags: &[],
            params: ParamMap::new(),
            reply: false,
            fail: false,
            calls: Arc::default(),
        }
    }

    /// A probe registered as a vehicle type.
    pub fn car(name: &str) -> Self {
        Self {
            type_name: TEST_CAR,
            tags: &[CAR_MODEL_TAG],
            ..Self::new(name)
        }
    }

    pub fn calls(&self) -> Vec<ProbeCall> {
        self.calls.lock().clone()
    }

    /// Timestamps of received events, in delivery order.
    pub fn event_times(&self) -> Vec<SimTime> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ProbeCall::Event { time, .. } => Some(*time),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ProbeCall) {
        self.calls.lock().push(call);
    }
}

impl Model for ProbeModel {
    fn core(&self) -> &ModelCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }
    fn type_name(&self) -> &str {
        self.type_name
    }
    fn type_tags(&self) -> &'static [&'static str] {
        self.tags
    }
    fn params(&self) -> ParamSchema {
        ParamSchema::new()
            .with(
                "speed",
                ParamDescriptor::new(ParamKind::Float, "0")
                    .randomizable()
                    .range(0.0, 100.0),
            )
            .with("reply", ParamDescriptor::new(ParamKind::YesNo, "no"))
            .with("fail", ParamDescriptor::new(ParamKind::YesNo, "no"))
    }
    fn init(&mut self, params: &ParamMap) -> Result<(), ModelError> {
        self.record(ProbeCall::Init);
        let params = self.resolve_params(params)?;
        if let Some(ip) = params.get("ip") {
            params.get_ip("ip").map_err(|_| ModelError::Rejected(format!("bad address '{ip}'")))?;
        }
        self.reply = params.get_yes_no("reply")?;
        self.fail = params.get_yes_no("fail")?;
        self.params = params;
        Ok(())
    }
    fn save(&self) -> ParamMap {
        let mut out = self.params.clone();
        out.insert("reply".into(), format_yes_no(self.reply));
        out.insert("fail".into(), format_yes_no(self.fail));
        out
    }
    fn pre_run(&mut self, _: &mut EventContext<'_>) -> Result<(), ModelError> {
        self.record(ProbeCall::PreRun);
        Ok(())
    }
    fn post_run(&mut self, _: &mut EventContext<'_>) -> Result<(), ModelError> {
        self.record(ProbeCall::PostRun);
        Ok(())
    }
    fn cleanup(&mut self) {
        self.record(ProbeCall::Cleanup);
    }
    fn settings_changed(&mut self) {
        self.record(ProbeCall::SettingsChanged);
    }
    fn handle_event(
        &mut self,
        event: &mut Event,
        ctx: &mut EventContext<'_>,
    ) -> Result<(), ModelError> {
        self.record(ProbeCall::Event {
            time: event.time,
            kind: event.kind,
            origin: event.origin.clone(),
        });
        if self.fail {
            return Err(ModelError::Hook {
                hook: "handle_event",
                reason: "probe configured to fail".into(),
            });
        }
        if self.reply && !event.origin.is_empty() {
            ctx.emit(Event::new(ctx.now(), REPLY_KIND).with_destination(event.origin.clone()));
        }
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Calls recorded by the probe behind `handle`.
///
/// # Panics
///
/// Panics if the handle does not hold a [`ProbeModel`].
pub fn probe_calls(handle: &ModelHandle) -> Vec<ProbeCall> {
    handle
        .lock()
        .as_any()
        .downcast_ref::<ProbeModel>()
        .map(ProbeModel::calls)
        .unwrap_or_else(|| panic!("not a ProbeModel"))
}

/// Event timestamps recorded by the probe named `name` in `graph`.
pub fn probe_event_times(graph: &ModelGraph, name: &str) -> Vec<SimTime> {
    let handle = graph
        .get_model(name)
        .unwrap_or_else(|e| panic!("probe lookup failed: {e}"));
    let guard = handle.lock();
    guard
        .as_any()
        .downcast_ref::<ProbeModel>()
        .map(ProbeModel::event_times)
        .unwrap_or_default()
}

// ===========================================================================
// FailingModel
// ===========================================================================

/// `init` fails unless `valid = yes`.
#[derive(Debug)]
pub struct FailingModel {
    core: ModelCore,
    valid: bool,
}

impl FailingModel {
    pub fn new(name: &str) -> Self {
        Self {
            core: ModelCore::new(name),
            valid: false,
        }
    }
}

impl Model for FailingModel {
    fn core(&self) -> &ModelCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }
    fn type_name(&self) -> &str {
        FAILING_MODEL
    }
    fn params(&self) -> ParamSchema {
        ParamSchema::new().with("valid", ParamDescriptor::new(ParamKind::YesNo, "no"))
    }
    fn init(&mut self, params: &ParamMap) -> Result<(), ModelError> {
        let params = self.resolve_params(params)?;
        self.valid = params.get_yes_no("valid")?;
        if !self.valid {
            return Err(ModelError::Rejected("valid = no".into()));
        }
        Ok(())
    }
    fn save(&self) -> ParamMap {
        param_map([("valid", format_yes_no(self.valid))])
    }
    fn handle_event(&mut self, _: &mut Event, _: &mut EventContext<'_>) -> Result<(), ModelError> {
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ===========================================================================
// Registry and graph builders
// ===========================================================================

/// A registry holding every test model type.
pub fn registry_with_test_models() -> ModelRegistry {
    let mut registry = ModelRegistry::new();
    let types: [(&str, fn(&str) -> Box<dyn Model>); 4] = [
        (NULL_MODEL, |n| Box::new(NullModel::new(n))),
        (PROBE_MODEL, |n| Box::new(ProbeModel::new(n))),
        (TEST_CAR, |n| Box::new(ProbeModel::car(n))),
        (FAILING_MODEL, |n| Box::new(FailingModel::new(n))),
    ];
    for (type_name, factory) in types {
        registry
            .register_model(type_name, factory)
            .unwrap_or_else(|e| panic!("test registry: {e}"));
    }
    registry
}

/// An empty graph over [`registry_with_test_models`].
pub fn test_graph() -> ModelGraph {
    ModelGraph::new(registry_with_test_models())
}

/// Add a parameterless model, panicking on failure.
pub fn add(graph: &ModelGraph, name: &str, type_name: &str, depends: &str) {
    graph
        .add_model(name, type_name, depends, &ParamMap::new())
        .unwrap_or_else(|e| panic!("add_model({name}) failed: {e}"));
}
