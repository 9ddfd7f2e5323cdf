//! The pluggable model contract.
//!
//! A [`Model`] is a unit of simulated behavior (a car, a road map, a radio
//! channel, ...). Each model has a unique name, a parameter schema, lifecycle
//! hooks around a run, and an event handler. Models never hold references to
//! each other: relationships are named dependency edges in the
//! [`ModelGraph`](crate::graph::ModelGraph).
//!
//! # Type capabilities
//!
//! A model reports its concrete type name plus a list of capability tags it
//! satisfies (`"CarModel"`, `"MapModel"`, ...). [`Model::is_a`] matches on
//! either, so a registry query for `"CarModel"` finds every vehicle type
//! without knowing their concrete names.
//!
//! # Locking
//!
//! Live models are shared as [`ModelHandle`]s. The handle's mutex is the
//! model's own update lock; graph and queue locks are never held while a
//! model method runs.

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::event::Event;
use crate::params::{ParamError, ParamMap, ParamSchema};
use crate::queue::EventQueue;
use crate::time::SimTime;

// ---------------------------------------------------------------------------
// Shared aliases
// ---------------------------------------------------------------------------

/// A live model behind its own update lock.
pub type ModelHandle = Arc<Mutex<Box<dyn Model>>>;

/// Constructs a model of one type from an instance name.
pub type ModelFactory = Arc<dyn Fn(&str) -> Box<dyn Model> + Send + Sync>;

/// Wrap a boxed model in a fresh [`ModelHandle`].
pub fn into_handle(model: Box<dyn Model>) -> ModelHandle {
    Arc::new(Mutex::new(model))
}

// ---------------------------------------------------------------------------
// ModelError
// ---------------------------------------------------------------------------

/// Errors a model reports from its lifecycle hooks or event handler.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error(transparent)]
    Params(#[from] ParamError),
    /// The model rejected its configuration for a model-specific reason.
    #[error("rejected: {0}")]
    Rejected(String),
    /// A lifecycle hook or the event handler failed.
    #[error("{hook} failed: {reason}")]
    Hook { hook: &'static str, reason: String },
}

// ---------------------------------------------------------------------------
// ModelCore
// ---------------------------------------------------------------------------

/// State every model carries: its instance name and the timestamp of the
/// last event it processed.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelCore {
    pub name: String,
    pub last_event_time: Option<SimTime>,
}

impl ModelCore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_event_time: None,
        }
    }
}

// ---------------------------------------------------------------------------
// EventContext
// ---------------------------------------------------------------------------

/// Passed to a model while it handles an event or a run hook.
///
/// Lets the model read the current time and enqueue follow-up events.
pub struct EventContext<'a> {
    now: SimTime,
    model: &'a str,
    queue: &'a EventQueue,
    emitted: usize,
}

impl<'a> EventContext<'a> {
    pub fn new(now: SimTime, model: &'a str, queue: &'a EventQueue) -> Self {
        Self {
            now,
            model,
            queue,
            emitted: 0,
        }
    }

    /// Current simulation time.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Name of the model being called.
    pub fn model_name(&self) -> &str {
        self.model
    }

    /// Enqueue an event. An empty origin is filled with this model's name.
    pub fn emit(&mut self, mut event: Event) {
        if event.origin.is_empty() {
            event.origin = self.model.to_string();
        }
        self.queue.add_event(event);
        self.emitted += 1;
    }

    /// Number of events emitted through this context.
    pub fn emitted(&self) -> usize {
        self.emitted
    }
}

// ---------------------------------------------------------------------------
// Model trait
// ---------------------------------------------------------------------------

/// A pluggable unit of simulated behavior.
///
/// Only `core`, `type_name`, `init`, `save`, `handle_event` and the `Any`
/// accessors are required; every other hook defaults to a no-op.
pub trait Model: Send + std::fmt::Debug {
    fn core(&self) -> &ModelCore;

    fn core_mut(&mut self) -> &mut ModelCore;

    /// Unique instance name.
    fn name(&self) -> &str {
        &self.core().name
    }

    /// Timestamp of the last processed event, if any.
    fn last_event_time(&self) -> Option<SimTime> {
        self.core().last_event_time
    }

    /// Concrete type name, as registered.
    fn type_name(&self) -> &str;

    /// Capability tags this type satisfies besides its own name.
    fn type_tags(&self) -> &'static [&'static str] {
        &[]
    }

    /// Whether this model satisfies `tag`: its own type name or a declared
    /// capability tag.
    fn is_a(&self, tag: &str) -> bool {
        self.type_name() == tag || self.type_tags().iter().any(|t| *t == tag)
    }

    /// Parameter schema for this model's type.
    fn params(&self) -> ParamSchema {
        ParamSchema::new()
    }

    /// `params` overlaid on the schema defaults and validated.
    fn resolve_params(&self, params: &ParamMap) -> Result<ParamMap, ParamError> {
        let schema = self.params();
        let merged = schema.with_defaults(params);
        schema.validate(&merged)?;
        Ok(merged)
    }

    /// Configure from a parameter map.
    fn init(&mut self, params: &ParamMap) -> Result<(), ModelError>;

    /// Current parameters. A map produced here is a valid `init` input for
    /// a fresh model of the same type.
    fn save(&self) -> ParamMap;

    /// Called on every evaluable model before a run starts.
    fn pre_run(&mut self, ctx: &mut EventContext<'_>) -> Result<(), ModelError> {
        let _ = ctx;
        Ok(())
    }

    /// Called on every evaluable model after a run ends.
    fn post_run(&mut self, ctx: &mut EventContext<'_>) -> Result<(), ModelError> {
        let _ = ctx;
        Ok(())
    }

    /// Release run-scoped resources.
    fn cleanup(&mut self) {}

    /// External configuration was edited.
    fn settings_changed(&mut self) {}

    /// Handle one event. The event is dropped after this returns, so the
    /// payload cleanup runs unless the handler took the payload.
    fn handle_event(
        &mut self,
        event: &mut Event,
        ctx: &mut EventContext<'_>,
    ) -> Result<(), ModelError>;

    /// Record the event time, then dispatch to [`handle_event`](Self::handle_event).
    fn process_event(
        &mut self,
        event: &mut Event,
        ctx: &mut EventContext<'_>,
    ) -> Result<(), ModelError> {
        self.core_mut().last_event_time = Some(event.time);
        self.handle_event(event, ctx)
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::EventKind;
    use crate::params::{ParamDescriptor, ParamKind, ParamMapExt, param_map};
    use crate::time::secs;

    /// Counts events and echoes each one back to its origin.
    #[derive(Debug)]
    struct EchoModel {
        core: ModelCore,
        delay: f64,
        seen: u32,
    }

    impl EchoModel {
        fn new(name: &str) -> Self {
            Self {
                core: ModelCore::new(name),
                delay: 0.0,
                seen: 0,
            }
        }
    }

    impl Model for EchoModel {
        fn core(&self) -> &ModelCore {
            &self.core
        }
        fn core_mut(&mut self) -> &mut ModelCore {
            &mut self.core
        }
        fn type_name(&self) -> &str {
            "EchoModel"
        }
        fn type_tags(&self) -> &'static [&'static str] {
            &["Responder"]
        }
        fn params(&self) -> ParamSchema {
            ParamSchema::new().with(
                "delay",
                ParamDescriptor::new(ParamKind::Float, "0.5").range(0.0, 10.0),
            )
        }
        fn init(&mut self, params: &ParamMap) -> Result<(), ModelError> {
            let params = self.resolve_params(params)?;
            self.delay = params.get_f64("delay")?;
            Ok(())
        }
        fn save(&self) -> ParamMap {
            param_map([("delay", self.delay.to_string())])
        }
        fn handle_event(
            &mut self,
            event: &mut Event,
            ctx: &mut EventContext<'_>,
        ) -> Result<(), ModelError> {
            self.seen += 1;
            let reply = Event::new(ctx.now() + secs(self.delay), event.kind)
                .with_destination(event.origin.clone());
            ctx.emit(reply);
            Ok(())
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn is_a_matches_type_and_tags() {
        let m = EchoModel::new("e");
        assert!(m.is_a("EchoModel"));
        assert!(m.is_a("Responder"));
        assert!(!m.is_a("CarModel"));
    }

    #[test]
    fn init_applies_defaults() {
        let mut m = EchoModel::new("e");
        m.init(&ParamMap::new()).unwrap();
        assert_eq!(m.delay, 0.5);
    }

    #[test]
    fn init_rejects_out_of_range() {
        let mut m = EchoModel::new("e");
        let err = m.init(&param_map([("delay", "50")])).unwrap_err();
        assert!(matches!(err, ModelError::Params(ParamError::OutOfRange { .. })));
    }

    #[test]
    fn save_round_trips_through_init() {
        let mut a = EchoModel::new("a");
        a.init(&param_map([("delay", "2.25")])).unwrap();
        let mut b = EchoModel::new("b");
        b.init(&a.save()).unwrap();
        assert_eq!(a.save(), b.save());
    }

    #[test]
    fn process_event_records_time_and_emits() {
        let queue = EventQueue::new();
        let mut m = EchoModel::new("echo");
        m.init(&ParamMap::new()).unwrap();
        assert_eq!(m.last_event_time(), None);

        let name = m.name().to_string();
        let mut event = Event::new(secs(3.0), EventKind(1)).with_origin("car");
        let mut ctx = EventContext::new(event.time, &name, &queue);
        m.process_event(&mut event, &mut ctx).unwrap();
        assert_eq!(ctx.emitted(), 1);

        assert_eq!(m.last_event_time(), Some(secs(3.0)));
        assert_eq!(m.seen, 1);
        let reply = queue.pop_event();
        assert_eq!(reply.destination, "car");
        assert_eq!(reply.origin, "echo");
        assert_eq!(reply.time, secs(3.5));
    }

    #[test]
    fn handle_downcasts_to_concrete_type() {
        let handle = into_handle(Box::new(EchoModel::new("e")));
        let guard = handle.lock();
        assert!(guard.as_any().downcast_ref::<EchoModel>().is_some());
    }
}
