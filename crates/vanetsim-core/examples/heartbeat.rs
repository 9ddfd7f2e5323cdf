//! Heartbeat example: a self-scheduling model and a listener.
//!
//! Registers a model type that re-arms a timer event every `period` seconds
//! and broadcasts a pulse each time it fires, loads a two-model scenario from
//! TOML text, and runs it with the fixed-step runner.
//!
//! Run with: `cargo run -p vanetsim-core --example heartbeat`

use std::any::Any;
use std::sync::Arc;

use vanetsim_core::config::ScenarioSpec;
use vanetsim_core::event::Event;
use vanetsim_core::graph::ModelGraph;
use vanetsim_core::id::EventKind;
use vanetsim_core::model::{EventContext, Model, ModelCore, ModelError};
use vanetsim_core::params::{
    ParamDescriptor, ParamKind, ParamMap, ParamMapExt, ParamSchema, param_map,
};
use vanetsim_core::queue::EventQueue;
use vanetsim_core::registry::ModelRegistry;
use vanetsim_core::runner::Runner;
use vanetsim_core::time::{secs, to_secs};

const TIMER: EventKind = EventKind(10);
const PULSE: EventKind = EventKind(11);

#[derive(Debug)]
struct Heartbeat {
    core: ModelCore,
    period: f64,
    beats: u32,
}

impl Model for Heartbeat {
    fn core(&self) -> &ModelCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }
    fn type_name(&self) -> &str {
        "Heartbeat"
    }
    fn params(&self) -> ParamSchema {
        ParamSchema::new().with(
            "period",
            ParamDescriptor::new(ParamKind::Float, "1.0").range(0.1, 60.0),
        )
    }
    fn init(&mut self, params: &ParamMap) -> Result<(), ModelError> {
        let params = self.resolve_params(params)?;
        self.period = params.get_f64("period")?;
        Ok(())
    }
    fn save(&self) -> ParamMap {
        param_map([("period", self.period.to_string())])
    }
    fn pre_run(&mut self, ctx: &mut EventContext<'_>) -> Result<(), ModelError> {
        self.beats = 0;
        let me = ctx.model_name().to_string();
        ctx.emit(Event::new(ctx.now() + secs(self.period), TIMER).with_destination(me));
        Ok(())
    }
    fn handle_event(
        &mut self,
        event: &mut Event,
        ctx: &mut EventContext<'_>,
    ) -> Result<(), ModelError> {
        if event.kind == TIMER {
            self.beats += 1;
            ctx.emit(Event::new(ctx.now(), PULSE));
            let me = ctx.model_name().to_string();
            ctx.emit(Event::new(ctx.now() + secs(self.period), TIMER).with_destination(me));
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

#[derive(Debug)]
struct Listener {
    core: ModelCore,
    pulses: Vec<f64>,
}

impl Model for Listener {
    fn core(&self) -> &ModelCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }
    fn type_name(&self) -> &str {
        "Listener"
    }
    fn init(&mut self, _params: &ParamMap) -> Result<(), ModelError> {
        Ok(())
    }
    fn save(&self) -> ParamMap {
        ParamMap::new()
    }
    fn handle_event(
        &mut self,
        event: &mut Event,
        _ctx: &mut EventContext<'_>,
    ) -> Result<(), ModelError> {
        if event.kind == PULSE {
            self.pulses.push(to_secs(event.time));
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

const SCENARIO: &str = r#"
    [run]
    duration = 5.0
    increment = { mode = "fixed", step = 0.5 }

    [[models]]
    name = "heart"
    type = "Heartbeat"
    params = { period = "1.5" }

    [[models]]
    name = "ear"
    type = "Listener"
    depends = "heart"
"#;

fn main() {
    let mut registry = ModelRegistry::new();
    registry
        .register_model("Heartbeat", |name| {
            Box::new(Heartbeat {
                core: ModelCore::new(name),
                period: 1.0,
                beats: 0,
            })
        })
        .unwrap();
    registry
        .register_model("Listener", |name| {
            Box::new(Listener {
                core: ModelCore::new(name),
                pulses: Vec::new(),
            })
        })
        .unwrap();

    let scenario = ScenarioSpec::from_toml_str(SCENARIO).unwrap();
    let graph = Arc::new(ModelGraph::new(registry));
    graph.load_scenario(&scenario).unwrap();
    println!("Evaluation order: {:?}", graph.evaluation_order());

    let queue = Arc::new(EventQueue::new());
    let mut runner = Runner::new(Arc::clone(&graph), Arc::clone(&queue), scenario.run).unwrap();
    let report = runner.run();
    println!(
        "Dispatched {} events, last at {:?}",
        report.events_dispatched,
        report.last_time.map(to_secs)
    );

    let ear = graph.get_model("ear").unwrap();
    if let Some(listener) = ear.lock().as_any().downcast_ref::<Listener>() {
        println!("Pulses heard at: {:?}", listener.pulses);
    }
    // The next timer is past the run's end and is still queued.
    println!("Still queued: {}", queue.count());
}
