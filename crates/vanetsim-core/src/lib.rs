//! Vanetsim Core -- the scheduling substrate for vehicular-network simulation.
//!
//! This crate provides the pluggable model contract, the model registry, the
//! dependency-ordered model graph with per-node status, and the thread-safe
//! event queue that carries timestamped events between models.
//!
//! # Data Flow
//!
//! 1. **Register** -- model types are registered with a
//!    [`registry::ModelRegistry`] under a type name and a factory.
//! 2. **Build** -- a [`graph::ModelGraph`] instantiates models by type name,
//!    initializes them from string parameter maps, and keeps a topological
//!    evaluation order over their declared dependencies.
//! 3. **Run** -- a [`runner::Runner`] calls each evaluable model's `pre_run`
//!    in evaluation order, drains the [`queue::EventQueue`] in
//!    `(time, priority)` order, routing each event through
//!    [`graph::ModelGraph::dispatch`], then calls `post_run`.
//!
//! Producers on other threads (network ingestion, UI) may add events and
//! models at any time. Graph and queue locks are never held while a model
//! runs.
//!
//! ```rust,ignore
//! let graph = ModelGraph::new(registry);
//! graph.add_model("map", "RoadMap", "", &ParamMap::new())?;
//! graph.add_model("car1", "FixedCar", "map", &params)?;
//! let mut runner = Runner::new(Arc::new(graph), Arc::new(EventQueue::new()), settings)?;
//! let report = runner.run();
//! ```
//!
//! # Key Types
//!
//! - [`model::Model`] -- The model contract: parameters, lifecycle hooks,
//!   event handling and capability tags.
//! - [`registry::ModelRegistry`] -- Type name to factory map, owned by a graph.
//! - [`graph::ModelGraph`] -- Live models, dependency DAG, evaluation order.
//! - [`status::NodeStatus`] -- Clean / Dirty / Error / Fatal node state.
//! - [`event::Event`] -- Timestamped, prioritized message with a move-only
//!   [`event::Payload`] whose cleanup runs exactly once.
//! - [`queue::EventQueue`] -- Thread-safe min-heap of events.
//! - [`time::SimTime`] -- Q32.32 fixed-point simulation time.
//! - [`config::ScenarioSpec`] -- Run settings and model list, parsed from TOML.

pub mod config;
pub mod event;
pub mod graph;
pub mod id;
pub mod model;
pub mod params;
pub mod queue;
pub mod registry;
pub mod runner;
pub mod status;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod time;
