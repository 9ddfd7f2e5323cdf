//! The model dependency graph.
//!
//! [`ModelGraph`] owns every live model instance, the dependency edges
//! between them, the [`ModelRegistry`] used to construct them, and a cached
//! evaluation order: a topological order over all non-fatal nodes in which
//! every model comes after the models it depends on. Nodes with no relative
//! dependency keep insertion order.
//!
//! # Consistency
//!
//! Every structural mutation is validated before it is committed. An unknown
//! type, unknown dependency or dependency cycle rejects the mutation and
//! leaves nodes, edges and order exactly as they were.
//!
//! # Locking
//!
//! One mutex guards nodes, edges, registry and the cached order. It is never
//! held while a model method runs: `add_model` initializes the new model
//! between two short critical sections, `register_model` builds the type's
//! prototype before locking, and lifecycle broadcasts collect handles first
//! and call models after releasing the lock. Registry queries read data
//! recorded at registration and call no model code. Readers receive the order
//! as an immutable `Arc<[ModelEntry]>` that later mutations never touch.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap};
use tracing::{debug, warn};

use crate::config::{ModelSpec, RunSettings, ScenarioSpec};
use crate::event::Event;
use crate::id::ModelId;
use crate::model::{EventContext, Model, ModelError, ModelHandle, into_handle};
use crate::params::{ParamMap, split_model_refs};
use crate::queue::EventQueue;
use crate::registry::{ModelRegistry, ModelType, RegistryError};
use crate::status::{NodeStatus, StatusError};

/// Capability tag every vehicle model type reports.
pub const CAR_MODEL_TAG: &str = "CarModel";

/// Parameter key that receives a network car's address.
pub const IP_PARAM: &str = "ip";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during graph operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("a model named '{0}' already exists")]
    DuplicateName(String),
    #[error("unknown model type: {0}")]
    UnknownType(String),
    #[error("no model named '{0}'")]
    UnknownName(String),
    #[error("model '{model}' depends on unknown model '{dependency}'")]
    UnknownDependency { model: String, dependency: String },
    #[error("dependency cycle among {0:?}")]
    CycleDetected(Vec<String>),
    #[error("model '{name}' failed to initialize: {source}")]
    ModelInitFailed {
        name: String,
        #[source]
        source: ModelError,
    },
    #[error("model type '{type_name}' of '{name}' is not a vehicle")]
    NotAVehicle { name: String, type_name: String },
    #[error("model '{0}' is fatal")]
    FatalModel(String),
    #[error("model '{name}': {source}")]
    Status {
        name: String,
        #[source]
        source: StatusError,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

// ---------------------------------------------------------------------------
// Public data
// ---------------------------------------------------------------------------

/// A vehicle joining over the network, keyed by its address in
/// [`ModelGraph::add_network_cars`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkCar {
    pub name: String,
    pub type_name: String,
    #[serde(default)]
    pub depends: String,
    #[serde(default)]
    pub params: ParamMap,
}

impl NetworkCar {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            depends: String::new(),
            params: ParamMap::new(),
        }
    }
}

/// One node as seen by a reader of [`ModelGraph::get_all_models`].
#[derive(Debug, Clone)]
pub struct ModelEntry {
    pub id: ModelId,
    pub name: String,
    pub type_name: String,
    /// Names of the models this one depends on, in declaration order.
    pub depends_on: Vec<String>,
    pub status: NodeStatus,
    pub handle: ModelHandle,
}

// ---------------------------------------------------------------------------
// Internal storage
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Node {
    name: String,
    type_name: String,
    handle: ModelHandle,
    /// Nodes this node depends on. They are evaluated first.
    depends: Vec<ModelId>,
    /// Insertion sequence; breaks ties in the evaluation order.
    seq: u64,
    status: NodeStatus,
}

#[derive(Debug, Default)]
struct GraphInner {
    registry: ModelRegistry,
    nodes: SlotMap<ModelId, Node>,
    names: BTreeMap<String, ModelId>,
    /// Evaluation order over non-fatal nodes.
    order: Vec<ModelId>,
    /// Cached reader view of `order`. Dropped on every change.
    snapshot: Option<Arc<[ModelEntry]>>,
    next_seq: u64,
}

/// Kahn's algorithm over the dependency edges. The ready set is a min-heap
/// on insertion sequence so independent nodes keep insertion order.
///
/// With `include_fatal == false`, fatal nodes are left out and edges to them
/// count as satisfied.
fn topological_order(
    nodes: &SlotMap<ModelId, Node>,
    include_fatal: bool,
) -> Result<Vec<ModelId>, GraphError> {
    let live = |id: ModelId| {
        nodes
            .get(id)
            .is_some_and(|n| include_fatal || n.status.is_in_tree())
    };

    let mut in_degree: SecondaryMap<ModelId, usize> = SecondaryMap::new();
    let mut dependents: SecondaryMap<ModelId, Vec<ModelId>> = SecondaryMap::new();
    for (id, _) in nodes.iter().filter(|(id, _)| live(*id)) {
        in_degree.insert(id, 0);
        dependents.insert(id, Vec::new());
    }
    for (id, node) in nodes.iter().filter(|(id, _)| live(*id)) {
        for &dep in node.depends.iter().filter(|d| live(**d)) {
            in_degree[id] += 1;
            dependents[dep].push(id);
        }
    }

    let mut ready: BinaryHeap<Reverse<(u64, ModelId)>> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| Reverse((nodes[id].seq, id)))
        .collect();

    let mut order = Vec::with_capacity(in_degree.len());
    while let Some(Reverse((_, id))) = ready.pop() {
        order.push(id);
        for &next in &dependents[id] {
            let deg = &mut in_degree[next];
            *deg -= 1;
            if *deg == 0 {
                ready.push(Reverse((nodes[next].seq, next)));
            }
        }
    }

    if order.len() != in_degree.len() {
        let mut stuck: Vec<&Node> = in_degree
            .iter()
            .filter(|(_, deg)| **deg > 0)
            .map(|(id, _)| &nodes[id])
            .collect();
        stuck.sort_by_key(|n| n.seq);
        return Err(GraphError::CycleDetected(
            stuck.into_iter().map(|n| n.name.clone()).collect(),
        ));
    }
    Ok(order)
}

impl GraphInner {
    fn id_of(&self, name: &str) -> Result<ModelId, GraphError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnknownName(name.to_string()))
    }

    fn node(&self, name: &str) -> Result<&Node, GraphError> {
        let id = self.id_of(name)?;
        Ok(&self.nodes[id])
    }

    fn node_mut(&mut self, name: &str) -> Result<&mut Node, GraphError> {
        let id = self.id_of(name)?;
        Ok(&mut self.nodes[id])
    }

    /// Resolve dependency names to ids, rejecting unknown names and
    /// dropping repeats.
    fn resolve_depends(&self, model: &str, names: &[String]) -> Result<Vec<ModelId>, GraphError> {
        let mut ids = Vec::with_capacity(names.len());
        for dep in names {
            let id = self
                .names
                .get(dep)
                .copied()
                .ok_or_else(|| GraphError::UnknownDependency {
                    model: model.to_string(),
                    dependency: dep.clone(),
                })?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Recompute the evaluation order. Fails without touching the cached
    /// order if the full edge set has a cycle.
    fn rebuild(&mut self) -> Result<(), GraphError> {
        topological_order(&self.nodes, true)?;
        self.order = topological_order(&self.nodes, false)?;
        self.snapshot = None;
        debug!(nodes = self.nodes.len(), evaluable = self.order.len(), "model tree rebuilt");
        Ok(())
    }

    fn entry(&self, id: ModelId) -> ModelEntry {
        let node = &self.nodes[id];
        ModelEntry {
            id,
            name: node.name.clone(),
            type_name: node.type_name.clone(),
            depends_on: node
                .depends
                .iter()
                .filter_map(|d| self.nodes.get(*d).map(|n| n.name.clone()))
                .collect(),
            status: node.status,
            handle: Arc::clone(&node.handle),
        }
    }

    fn snapshot(&mut self) -> Arc<[ModelEntry]> {
        if let Some(snapshot) = &self.snapshot {
            return Arc::clone(snapshot);
        }
        let snapshot: Arc<[ModelEntry]> = self.order.iter().map(|&id| self.entry(id)).collect();
        self.snapshot = Some(Arc::clone(&snapshot));
        snapshot
    }

    /// `(name, handle)` of every evaluable node in evaluation order.
    fn evaluable(&self) -> Vec<(String, ModelHandle)> {
        self.order
            .iter()
            .map(|&id| &self.nodes[id])
            .filter(|n| n.status.is_evaluable())
            .map(|n| (n.name.clone(), Arc::clone(&n.handle)))
            .collect()
    }

    /// Every node reachable through dependent edges from `root`, excluding
    /// `root`.
    fn dependents_of(&self, root: ModelId) -> Vec<ModelId> {
        let mut reached: SecondaryMap<ModelId, ()> = SecondaryMap::new();
        let mut stack = vec![root];
        while let Some(current) = stack.pop() {
            for (id, node) in &self.nodes {
                if node.depends.contains(&current) && !reached.contains_key(id) && id != root {
                    reached.insert(id, ());
                    stack.push(id);
                }
            }
        }
        let mut found: Vec<ModelId> = reached.keys().collect();
        found.sort_by_key(|id| self.nodes[*id].seq);
        found
    }

    fn mark_dirty(&mut self, ids: impl IntoIterator<Item = ModelId>) {
        for id in ids {
            if let Some(node) = self.nodes.get_mut(id) {
                // Fatal nodes reject the transition; nothing to do for them.
                let _ = node.status.mark_dirty();
            }
        }
        self.snapshot = None;
    }

    /// Replace `id`'s dependencies, rolling back on a cycle.
    fn replace_depends(&mut self, id: ModelId, depends: Vec<ModelId>) -> Result<(), GraphError> {
        let previous = std::mem::replace(&mut self.nodes[id].depends, depends);
        if let Err(err) = self.rebuild() {
            self.nodes[id].depends = previous;
            warn!(model = %self.nodes[id].name, %err, "dependency change rejected");
            return Err(err);
        }
        let mut touched = self.dependents_of(id);
        touched.push(id);
        self.mark_dirty(touched);
        Ok(())
    }

    fn detach(&mut self, id: ModelId) -> Option<Node> {
        let node = self.nodes.remove(id)?;
        // Dependents lose the edge silently.
        for (_, other) in self.nodes.iter_mut() {
            other.depends.retain(|d| *d != id);
        }
        self.names.remove(&node.name);
        self.order.retain(|o| *o != id);
        self.snapshot = None;
        Some(node)
    }

    fn status_error(name: &str, source: StatusError) -> GraphError {
        match source {
            StatusError::Fatal => GraphError::FatalModel(name.to_string()),
            source => GraphError::Status {
                name: name.to_string(),
                source,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// ModelGraph
// ---------------------------------------------------------------------------

/// Owns live models, their dependency DAG and the evaluation order.
///
/// Every method takes `&self`; share the graph between threads with
/// `Arc<ModelGraph>`.
#[derive(Debug, Default)]
pub struct ModelGraph {
    inner: Mutex<GraphInner>,
}

impl ModelGraph {
    /// An empty graph constructing models from `registry`.
    pub fn new(registry: ModelRegistry) -> Self {
        Self {
            inner: Mutex::new(GraphInner {
                registry,
                ..GraphInner::default()
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Registry passthroughs
    // -----------------------------------------------------------------------

    /// Register a model type with the owned registry.
    ///
    /// The prototype is built before the graph is locked, so the factory may
    /// query this graph.
    pub fn register_model<F>(&self, type_name: &str, factory: F) -> Result<(), GraphError>
    where
        F: Fn(&str) -> Box<dyn Model> + Send + Sync + 'static,
    {
        let described = ModelType::describe(type_name, Arc::new(factory))?;
        self.inner.lock().registry.insert_type(type_name, described)?;
        Ok(())
    }

    /// Run `f` against the owned registry.
    ///
    /// The graph lock is held while `f` runs; `f` must not call back into
    /// this graph.
    pub fn with_registry<R>(&self, f: impl FnOnce(&ModelRegistry) -> R) -> R {
        f(&self.inner.lock().registry)
    }

    // -----------------------------------------------------------------------
    // Adding models
    // -----------------------------------------------------------------------

    /// Create, initialize and insert a model.
    ///
    /// `depends` lists already existing model names separated by whitespace
    /// or commas. A model whose `init` fails is still inserted, in the Error
    /// state, so it stays visible and can be fixed with
    /// [`reinit_model`](Self::reinit_model).
    ///
    /// # Examples
    ///
    /// ```
    /// use vanetsim_core::graph::ModelGraph;
    /// use vanetsim_core::params::ParamMap;
    /// use vanetsim_core::test_utils::{registry_with_test_models, NULL_MODEL};
    ///
    /// let graph = ModelGraph::new(registry_with_test_models());
    /// graph.add_model("m1", NULL_MODEL, "", &ParamMap::new()).unwrap();
    /// graph.add_model("m2", NULL_MODEL, "m1", &ParamMap::new()).unwrap();
    /// assert_eq!(graph.evaluation_order(), ["m1", "m2"]);
    /// ```
    pub fn add_model(
        &self,
        name: &str,
        type_name: &str,
        depends: &str,
        params: &ParamMap,
    ) -> Result<ModelId, GraphError> {
        let dep_names = split_model_refs(depends);

        let factory = {
            let inner = self.inner.lock();
            if inner.names.contains_key(name) {
                return Err(GraphError::DuplicateName(name.to_string()));
            }
            let factory = inner
                .registry
                .get_model_creator(type_name)
                .map_err(|_| GraphError::UnknownType(type_name.to_string()))?;
            inner.resolve_depends(name, &dep_names)?;
            factory
        };

        let mut model = factory(name);
        let init = model.init(params);

        let mut inner = self.inner.lock();
        // Another thread may have changed the graph while `init` ran.
        let checked = if inner.names.contains_key(name) {
            Err(GraphError::DuplicateName(name.to_string()))
        } else {
            inner.resolve_depends(name, &dep_names)
        };
        let depends = match checked {
            Ok(depends) => depends,
            Err(err) => {
                drop(inner);
                model.cleanup();
                return Err(err);
            }
        };

        let mut status = NodeStatus::new();
        if let Err(err) = &init {
            warn!(model = name, type_name, %err, "model init failed; inserted in error state");
            // A fresh status is never fatal.
            let _ = status.mark_error();
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let id = inner.nodes.insert(Node {
            name: name.to_string(),
            type_name: type_name.to_string(),
            handle: into_handle(model),
            depends,
            seq,
            status,
        });
        inner.names.insert(name.to_string(), id);
        if let Err(err) = inner.rebuild() {
            inner.detach(id);
            return Err(err);
        }
        debug!(model = name, type_name, depends = ?dep_names, "model added");
        Ok(id)
    }

    /// Add one vehicle model per address, injecting the address as the
    /// `ip` parameter.
    ///
    /// Every entry's type is checked before anything is inserted. Insertion
    /// then follows [`add_model`](Self::add_model) in address order and
    /// stops at the first failure; cars added before it stay.
    pub fn add_network_cars(
        &self,
        cars: &BTreeMap<IpAddr, NetworkCar>,
    ) -> Result<Vec<ModelId>, GraphError> {
        {
            let inner = self.inner.lock();
            for car in cars.values() {
                if !inner.registry.is_registered_model(&car.type_name) {
                    return Err(GraphError::UnknownType(car.type_name.clone()));
                }
                if !inner.registry.is_model_type_of(&car.type_name, CAR_MODEL_TAG) {
                    return Err(GraphError::NotAVehicle {
                        name: car.name.clone(),
                        type_name: car.type_name.clone(),
                    });
                }
            }
        }

        let mut ids = Vec::with_capacity(cars.len());
        for (addr, car) in cars {
            let mut params = car.params.clone();
            params.insert(IP_PARAM.to_string(), addr.to_string());
            ids.push(self.add_model(&car.name, &car.type_name, &car.depends, &params)?);
        }
        debug!(count = ids.len(), "network cars added");
        Ok(ids)
    }

    /// Add every model of `scenario` in order.
    pub fn load_scenario(&self, scenario: &ScenarioSpec) -> Result<Vec<ModelId>, GraphError> {
        scenario
            .models
            .iter()
            .map(|spec| self.add_model(&spec.name, &spec.type_name, &spec.depends, &spec.params))
            .collect()
    }

    /// Describe every model, fatal ones included, in an order that
    /// [`load_scenario`](Self::load_scenario) accepts.
    pub fn save_scenario(&self, run: RunSettings) -> Result<ScenarioSpec, GraphError> {
        let rows: Vec<(String, String, String, ModelHandle)> = {
            let inner = self.inner.lock();
            topological_order(&inner.nodes, true)?
                .into_iter()
                .map(|id| {
                    let node = &inner.nodes[id];
                    let depends = node
                        .depends
                        .iter()
                        .map(|d| inner.nodes[*d].name.as_str())
                        .collect::<Vec<_>>()
                        .join(",");
                    (
                        node.name.clone(),
                        node.type_name.clone(),
                        depends,
                        Arc::clone(&node.handle),
                    )
                })
                .collect()
        };

        let models = rows
            .into_iter()
            .map(|(name, type_name, depends, handle)| ModelSpec {
                name,
                type_name,
                depends,
                params: handle.lock().save(),
            })
            .collect();
        Ok(ScenarioSpec { run, models })
    }

    // -----------------------------------------------------------------------
    // Dependencies
    // -----------------------------------------------------------------------

    /// Recompute the evaluation order from the current edges.
    pub fn build_model_tree(&self) -> Result<(), GraphError> {
        self.inner.lock().rebuild()
    }

    /// Every `(model, depends_on)` edge, by model insertion order.
    pub fn dependency_pairs(&self) -> Vec<(String, String)> {
        let inner = self.inner.lock();
        let all = &inner.nodes;
        let mut nodes: Vec<&Node> = all.values().collect();
        nodes.sort_by_key(|n| n.seq);
        nodes
            .into_iter()
            .flat_map(|n| {
                n.depends
                    .iter()
                    .map(move |d| (n.name.clone(), all[*d].name.clone()))
            })
            .collect()
    }

    /// Replace `name`'s dependencies with those listed in `depends`.
    ///
    /// On success the model and everything depending on it are marked
    /// dirty. A cycle leaves the graph unchanged.
    pub fn set_dependencies(&self, name: &str, depends: &str) -> Result<(), GraphError> {
        let mut inner = self.inner.lock();
        let id = inner.id_of(name)?;
        let depends = inner.resolve_depends(name, &split_model_refs(depends))?;
        inner.replace_depends(id, depends)
    }

    /// Make `name` depend on `on` as well.
    pub fn add_dependency(&self, name: &str, on: &str) -> Result<(), GraphError> {
        let mut inner = self.inner.lock();
        let id = inner.id_of(name)?;
        let dep = inner
            .names
            .get(on)
            .copied()
            .ok_or_else(|| GraphError::UnknownDependency {
                model: name.to_string(),
                dependency: on.to_string(),
            })?;
        let mut depends = inner.nodes[id].depends.clone();
        if depends.contains(&dep) {
            return Ok(());
        }
        depends.push(dep);
        inner.replace_depends(id, depends)
    }

    /// Names of every model that depends on `name`, directly or through
    /// other models, by insertion order.
    pub fn dependents_of(&self, name: &str) -> Result<Vec<String>, GraphError> {
        let inner = self.inner.lock();
        let id = inner.id_of(name)?;
        Ok(inner
            .dependents_of(id)
            .into_iter()
            .map(|d| inner.nodes[d].name.clone())
            .collect())
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    /// Detach `name` and hand its model back. Dependents silently lose the
    /// edge to it.
    pub fn remove_model(&self, name: &str) -> Result<ModelHandle, GraphError> {
        let mut inner = self.inner.lock();
        let id = inner.id_of(name)?;
        let dependents = inner.dependents_of(id);
        let node = inner
            .detach(id)
            .ok_or_else(|| GraphError::UnknownName(name.to_string()))?;
        inner.mark_dirty(dependents);
        debug!(model = name, "model removed");
        Ok(node.handle)
    }

    /// Detach `name` and run its cleanup.
    pub fn destroy_model(&self, name: &str) -> Result<(), GraphError> {
        let handle = self.remove_model(name)?;
        handle.lock().cleanup();
        Ok(())
    }

    /// Detach every model and hand them back, evaluation order first, then
    /// fatal models by insertion order.
    pub fn release_all_models(&self) -> Vec<(String, ModelHandle)> {
        let mut inner = self.inner.lock();
        let mut ids = inner.order.clone();
        let mut fatal: Vec<(u64, ModelId)> = inner
            .nodes
            .iter()
            .filter(|(_, n)| n.status.is_fatal())
            .map(|(id, n)| (n.seq, id))
            .collect();
        fatal.sort();
        ids.extend(fatal.into_iter().map(|(_, id)| id));

        let released = ids
            .into_iter()
            .filter_map(|id| inner.nodes.remove(id))
            .map(|n| (n.name, n.handle))
            .collect::<Vec<_>>();
        inner.nodes.clear();
        inner.names.clear();
        inner.order.clear();
        inner.snapshot = None;
        debug!(count = released.len(), "all models released");
        released
    }

    /// Detach every model and run each cleanup.
    pub fn destroy_all_models(&self) {
        for (_, handle) in self.release_all_models() {
            handle.lock().cleanup();
        }
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    pub fn get_model(&self, name: &str) -> Result<ModelHandle, GraphError> {
        Ok(Arc::clone(&self.inner.lock().node(name)?.handle))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().names.contains_key(name)
    }

    /// Number of models, fatal ones included.
    pub fn len(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().nodes.is_empty()
    }

    /// Immutable snapshot of every non-fatal node in evaluation order.
    pub fn get_all_models(&self) -> Arc<[ModelEntry]> {
        self.inner.lock().snapshot()
    }

    /// Names of the models a run calls, in evaluation order. Error and
    /// fatal models are left out.
    pub fn evaluation_order(&self) -> Vec<String> {
        self.inner
            .lock()
            .evaluable()
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }

    /// `(name, handle)` of every model a run calls, in evaluation order.
    pub fn evaluable_models(&self) -> Vec<(String, ModelHandle)> {
        self.inner.lock().evaluable()
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    pub fn status_of(&self, name: &str) -> Result<NodeStatus, GraphError> {
        Ok(self.inner.lock().node(name)?.status)
    }

    /// Mark every non-fatal model dirty.
    pub fn mark_all_models_dirty(&self) {
        let mut inner = self.inner.lock();
        let ids: Vec<ModelId> = inner.nodes.keys().collect();
        inner.mark_dirty(ids);
        debug!("all models marked dirty");
    }

    /// Move every Error model back to Dirty. Fatal models are untouched.
    pub fn clear_all_models_error(&self) {
        let mut inner = self.inner.lock();
        for node in inner.nodes.values_mut() {
            let _ = node.status.clear_error();
        }
        inner.snapshot = None;
    }

    /// Record a successful re-evaluation of `name`.
    pub fn mark_model_clean(&self, name: &str) -> Result<(), GraphError> {
        let mut inner = self.inner.lock();
        inner
            .node_mut(name)?
            .status
            .mark_clean()
            .map_err(|e| GraphInner::status_error(name, e))?;
        inner.snapshot = None;
        Ok(())
    }

    /// Record a failure of `name`. The model leaves the run until its error
    /// is cleared.
    pub fn mark_model_error(&self, name: &str) -> Result<(), GraphError> {
        let mut inner = self.inner.lock();
        inner
            .node_mut(name)?
            .status
            .mark_error()
            .map_err(|e| GraphInner::status_error(name, e))?;
        inner.snapshot = None;
        Ok(())
    }

    /// Permanently exclude `name` from evaluation. Only destroying the model
    /// undoes this.
    pub fn mark_fatal(&self, name: &str) -> Result<(), GraphError> {
        let mut inner = self.inner.lock();
        inner.node_mut(name)?.status.mark_fatal();
        inner.rebuild()?;
        warn!(model = name, "model marked fatal");
        Ok(())
    }

    /// Ask for `name` to be revisited after the current pass.
    pub fn request_post_iteration(&self, name: &str) -> Result<(), GraphError> {
        let mut inner = self.inner.lock();
        let node = inner.node_mut(name)?;
        if node.status.is_fatal() {
            return Err(GraphError::FatalModel(name.to_string()));
        }
        node.status.request_post_iteration();
        inner.snapshot = None;
        Ok(())
    }

    /// Clear every post-iteration request and return the requesting models
    /// in evaluation order.
    pub fn take_post_iterations(&self) -> Vec<String> {
        let mut inner = self.inner.lock();
        let order = inner.order.clone();
        let taken: Vec<String> = order
            .into_iter()
            .filter_map(|id| {
                let node = &mut inner.nodes[id];
                node.status.take_post_iteration().then(|| node.name.clone())
            })
            .collect();
        if !taken.is_empty() {
            inner.snapshot = None;
        }
        taken
    }

    /// Re-run `init` on an existing model.
    ///
    /// On success the model's error is cleared and it and its dependents are
    /// marked dirty. On failure the model is left in the Error state.
    pub fn reinit_model(&self, name: &str, params: &ParamMap) -> Result<(), GraphError> {
        let handle = {
            let inner = self.inner.lock();
            let node = inner.node(name)?;
            if node.status.is_fatal() {
                return Err(GraphError::FatalModel(name.to_string()));
            }
            Arc::clone(&node.handle)
        };

        let result = handle.lock().init(params);

        let mut inner = self.inner.lock();
        let id = inner.id_of(name)?;
        let node = &mut inner.nodes[id];
        match result {
            Ok(()) => {
                node.status
                    .clear_error()
                    .map_err(|e| GraphInner::status_error(name, e))?;
                let mut touched = inner.dependents_of(id);
                touched.push(id);
                inner.mark_dirty(touched);
                debug!(model = name, "model re-initialized");
                Ok(())
            }
            Err(source) => {
                node.status
                    .mark_error()
                    .map_err(|e| GraphInner::status_error(name, e))?;
                inner.snapshot = None;
                warn!(model = name, err = %source, "model re-init failed");
                Err(GraphError::ModelInitFailed {
                    name: name.to_string(),
                    source,
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Calling models
    // -----------------------------------------------------------------------

    /// Notify every non-fatal model of an external settings edit, then mark
    /// them all dirty.
    pub fn settings_changed(&self) {
        let handles: Vec<ModelHandle> = {
            let inner = self.inner.lock();
            inner
                .order
                .iter()
                .map(|&id| Arc::clone(&inner.nodes[id].handle))
                .collect()
        };
        for handle in &handles {
            handle.lock().settings_changed();
        }
        self.mark_all_models_dirty();
    }

    /// Deliver `event` and return how many models handled it.
    ///
    /// A named destination receives it if that model is evaluable. A
    /// broadcast goes to every evaluable model except its origin, in
    /// evaluation order; the first handler to take the payload keeps it.
    /// A handler error moves that model to the Error state. The event is
    /// dropped afterwards, running any payload cleanup still armed.
    pub fn dispatch(&self, mut event: Event, queue: &EventQueue) -> usize {
        let targets: Vec<(String, ModelHandle)> = {
            let inner = self.inner.lock();
            if event.is_broadcast() {
                inner
                    .evaluable()
                    .into_iter()
                    .filter(|(name, _)| *name != event.origin)
                    .collect()
            } else {
                match inner.node(&event.destination) {
                    Ok(node) if node.status.is_evaluable() => {
                        vec![(node.name.clone(), Arc::clone(&node.handle))]
                    }
                    Ok(node) => {
                        debug!(model = %node.name, state = ?node.status.state(), "event skipped");
                        Vec::new()
                    }
                    Err(_) => {
                        debug!(
                            destination = %event.destination,
                            kind = %event.kind,
                            "event for unknown model dropped"
                        );
                        Vec::new()
                    }
                }
            }
        };

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (name, handle) in targets {
            let mut ctx = EventContext::new(event.time, &name, queue);
            let result = handle.lock().process_event(&mut event, &mut ctx);
            match result {
                Ok(()) => delivered += 1,
                Err(err) => {
                    warn!(model = %name, kind = %event.kind, %err, "event handler failed");
                    failed.push(name);
                }
            }
        }

        if !failed.is_empty() {
            let mut inner = self.inner.lock();
            for name in &failed {
                // The model may have been removed or marked fatal meanwhile.
                if let Ok(node) = inner.node_mut(name) {
                    let _ = node.status.mark_error();
                }
            }
            inner.snapshot = None;
        }
        delivered
    }
}

// ===========================================================================
// Tests
// ===========================================================================
