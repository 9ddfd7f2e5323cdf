//! Stress and endurance tests for the vanetsim core.
//!
//! These are marked `#[ignore]` for nightly CI runs. Run with:
//!   cargo test --package vanetsim-core -- --ignored

use std::sync::Arc;
use std::thread;

use vanetsim_core::event::Event;
use vanetsim_core::id::EventKind;
use vanetsim_core::queue::EventQueue;
use vanetsim_core::test_utils::*;
use vanetsim_core::time::secs;

/// Half a million events through the queue stay ordered.
#[test]
#[ignore]
fn test_500k_events_ordered() {
    let q = EventQueue::new();
    for i in 0..500_000u32 {
        let t = f64::from((i * 7919) % 100_000) / 10.0;
        q.add_event(Event::new(secs(t), EventKind(0)).with_priority((i % 5) as i32));
    }
    let mut last = q.pop_event().sort_key();
    while let Some(e) = q.try_pop() {
        assert!(last <= e.sort_key());
        last = e.sort_key();
    }
}

/// A 5000-model chain builds and orders in dependency order.
#[test]
#[ignore]
fn test_5k_model_chain() {
    let graph = test_graph();
    add(&graph, "n0", NULL_MODEL, "");
    for i in 1..5_000 {
        add(&graph, &format!("n{i}"), NULL_MODEL, &format!("n{}", i - 1));
    }
    let order = graph.evaluation_order();
    assert_eq!(order.len(), 5_000);
    assert_eq!(order[4_999], "n4999");
}

/// Eight producers and one consumer move two million events.
#[test]
#[ignore]
fn test_concurrent_queue_endurance() {
    let q = Arc::new(EventQueue::new());
    let producers: Vec<_> = (0..8)
        .map(|p| {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                for i in 0..250_000u32 {
                    q.add_event(Event::new(secs(f64::from(i)), EventKind(p)));
                }
            })
        })
        .collect();

    let mut popped = 0usize;
    while popped < 2_000_000 {
        if q.try_pop().is_some() {
            popped += 1;
        } else {
            thread::yield_now();
        }
    }
    for p in producers {
        p.join().unwrap();
    }
    assert!(q.is_empty());
}
