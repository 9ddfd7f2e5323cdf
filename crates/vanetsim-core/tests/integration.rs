//! Integration tests for the vanetsim core.
//!
//! These tests exercise end-to-end behavior across registry, graph, queue and
//! runner: scenario loading, event routing, payload ownership, concurrent
//! producers and status handling.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use vanetsim_core::config::{Increment, ModelSpec, RunSettings, ScenarioSpec};
use vanetsim_core::event::{Event, Payload};
use vanetsim_core::graph::{GraphError, ModelGraph};
use vanetsim_core::id::EventKind;
use vanetsim_core::params::ParamMap;
use vanetsim_core::queue::EventQueue;
use vanetsim_core::runner::Runner;
use vanetsim_core::test_utils::*;
use vanetsim_core::time::secs;

fn fixed_run(duration: f64) -> RunSettings {
    RunSettings {
        duration,
        increment: Increment::Fixed { step: 0.5 },
        ..RunSettings::default()
    }
}

// ===========================================================================
// Test 1: Graph scenario from the model contract
// ===========================================================================

#[test]
fn null_model_chain_and_removal() {
    let mut registry = vanetsim_core::registry::ModelRegistry::new();
    registry
        .register_model(NULL_MODEL, |name| Box::new(NullModel::new(name)))
        .unwrap();
    let graph = ModelGraph::new(registry);

    graph.add_model("m1", NULL_MODEL, "", &ParamMap::new()).unwrap();
    graph.add_model("m2", NULL_MODEL, "m1", &ParamMap::new()).unwrap();
    let names: Vec<String> = graph.get_all_models().iter().map(|e| e.name.clone()).collect();
    assert_eq!(names, ["m1", "m2"]);

    let m1 = graph.remove_model("m1").unwrap();
    assert_eq!(m1.lock().name(), "m1");
    let models = graph.get_all_models();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].name, "m2");
    assert!(models[0].depends_on.is_empty());
}

// ===========================================================================
// Test 2: Scenario text drives a full run
// ===========================================================================

#[test]
fn scenario_text_to_run() {
    let text = r#"
        [run]
        trials = 2
        duration = 4.0
        increment = { mode = "fixed", step = 1.0 }

        [[models]]
        name = "base"
        type = "NullModel"

        [[models]]
        name = "echo"
        type = "ProbeModel"
        depends = "base"
        params = { reply = "yes" }

        [[models]]
        name = "listener"
        type = "ProbeModel"
        depends = "echo"
    "#;
    let scenario = ScenarioSpec::from_toml_str(text).unwrap();
    let graph = test_graph();
    graph.load_scenario(&scenario).unwrap();
    assert_eq!(graph.evaluation_order(), ["base", "echo", "listener"]);

    let queue = Arc::new(EventQueue::new());
    let graph = Arc::new(graph);
    let mut runner = Runner::new(Arc::clone(&graph), Arc::clone(&queue), scenario.run).unwrap();

    queue.add_event(event_to(1.5, "echo").with_origin("listener"));
    let report = runner.run();
    assert_eq!(report.trials, 2);
    // The request plus the echo's reply, in the first trial only.
    assert_eq!(report.events_dispatched, 2);
    assert_eq!(probe_event_times(&graph, "listener"), [secs(1.5)]);
}

// ===========================================================================
// Test 3: Save then load reproduces the graph
// ===========================================================================

#[test]
fn save_load_round_trip_through_text() {
    let graph = test_graph();
    graph
        .load_scenario(&ScenarioSpec {
            run: fixed_run(10.0),
            models: vec![
                ModelSpec::new("a", NULL_MODEL),
                ModelSpec::new("b", PROBE_MODEL)
                    .depends_on("a")
                    .param("speed", "42"),
                ModelSpec::new("c", TEST_CAR).depends_on("a b"),
            ],
        })
        .unwrap();

    let saved = graph.save_scenario(fixed_run(10.0)).unwrap();
    let text = saved.to_toml_string().unwrap();
    let reparsed = ScenarioSpec::from_toml_str(&text).unwrap();
    assert_eq!(reparsed, saved);

    let copy = test_graph();
    copy.load_scenario(&reparsed).unwrap();
    assert_eq!(copy.dependency_pairs(), graph.dependency_pairs());
    assert_eq!(copy.evaluation_order(), graph.evaluation_order());
}

// ===========================================================================
// Test 4: Payload ownership through dispatch
// ===========================================================================

#[test]
fn payload_cleanup_runs_once_whether_delivered_or_cleared() {
    let graph = Arc::new(test_graph());
    add(&graph, "p", PROBE_MODEL, "");
    let queue = Arc::new(EventQueue::new());
    let cleaned = Arc::new(AtomicUsize::new(0));

    for t in [1.0, 2.0, 8.0, 9.0] {
        let c = Arc::clone(&cleaned);
        queue.add_event(event_to(t, "p").with_payload(Payload::with_cleanup(
            format!("packet@{t}"),
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            },
        )));
    }

    let mut runner = Runner::new(Arc::clone(&graph), Arc::clone(&queue), fixed_run(5.0)).unwrap();
    let report = runner.run_trial();
    assert_eq!(report.events_dispatched, 2);
    assert_eq!(cleaned.load(Ordering::SeqCst), 2);

    assert_eq!(queue.clear_until(secs(8.5)), 1);
    assert_eq!(cleaned.load(Ordering::SeqCst), 3);
    assert_eq!(queue.clear(), 1);
    assert_eq!(cleaned.load(Ordering::SeqCst), 4);
}

#[test]
fn taken_payload_skips_cleanup() {
    let cleaned = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&cleaned);
    let mut event = Event::new(secs(1.0), EventKind(3)).with_payload(Payload::with_cleanup(
        vec![1u8, 2, 3],
        move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        },
    ));
    let bytes: Vec<u8> = event.payload.take().unwrap();
    drop(event);
    assert_eq!(bytes, [1, 2, 3]);
    assert_eq!(cleaned.load(Ordering::SeqCst), 0);
}

// ===========================================================================
// Test 5: Concurrent producers while the simulation thread drains
// ===========================================================================

#[test]
fn producers_and_consumer_share_the_queue() {
    let queue = Arc::new(EventQueue::new());
    let producers: Vec<_> = (0..4)
        .map(|p| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..200 {
                    queue.add_event(Event::new(secs(f64::from(i)), EventKind(p)));
                }
            })
        })
        .collect();

    let mut popped = Vec::new();
    while popped.len() < 800 {
        match queue.try_pop() {
            Some(event) => popped.push(event),
            None => thread::yield_now(),
        }
    }
    for p in producers {
        p.join().unwrap();
    }
    assert!(queue.is_empty());
    assert_eq!(popped.len(), 800);
}

#[test]
fn models_added_from_another_thread() {
    let graph = Arc::new(test_graph());
    add(&graph, "root", NULL_MODEL, "");

    let workers: Vec<_> = (0..4)
        .map(|w| {
            let graph = Arc::clone(&graph);
            thread::spawn(move || {
                for i in 0..25 {
                    graph
                        .add_model(&format!("w{w}-{i}"), NULL_MODEL, "root", &ParamMap::new())
                        .unwrap();
                }
            })
        })
        .collect();

    // Readers keep their snapshot while writers append.
    let early = graph.get_all_models();
    for w in workers {
        w.join().unwrap();
    }
    assert!(early.len() <= 101);
    assert_eq!(early[0].name, "root");

    let all = graph.get_all_models();
    assert_eq!(all.len(), 101);
    assert_eq!(all[0].name, "root");
}

#[test]
fn duplicate_names_race_to_one_winner() {
    let graph = Arc::new(test_graph());
    let results: Vec<Result<_, GraphError>> = (0..8)
        .map(|_| {
            let graph = Arc::clone(&graph);
            thread::spawn(move || graph.add_model("solo", PROBE_MODEL, "", &ParamMap::new()))
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, GraphError::DuplicateName(_)))
    );
    assert_eq!(graph.len(), 1);
}

// ===========================================================================
// Test 6: Error and fatal models during a run
// ===========================================================================

#[test]
fn fixed_model_rejoins_the_run() {
    let graph = Arc::new(test_graph());
    add(&graph, "flaky", FAILING_MODEL, "");
    add(&graph, "p", PROBE_MODEL, "flaky");
    let queue = Arc::new(EventQueue::new());
    let mut runner = Runner::new(Arc::clone(&graph), Arc::clone(&queue), fixed_run(2.0)).unwrap();

    runner.run_trial();
    assert_eq!(graph.evaluation_order(), ["p"]);

    graph
        .reinit_model("flaky", &vanetsim_core::params::param_map([("valid", "yes")]))
        .unwrap();
    assert_eq!(graph.evaluation_order(), ["flaky", "p"]);

    graph.mark_fatal("flaky").unwrap();
    runner.run_trial();
    assert_eq!(graph.evaluation_order(), ["p"]);
    assert!(graph.status_of("flaky").unwrap().is_fatal());
}
