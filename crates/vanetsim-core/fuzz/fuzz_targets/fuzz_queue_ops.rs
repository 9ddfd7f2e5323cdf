#![no_main]
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use vanetsim_core::event::{Event, Payload};
use vanetsim_core::id::EventKind;
use vanetsim_core::queue::EventQueue;
use vanetsim_core::time::SimTime;

/// A structured queue operation for fuzzing.
#[derive(Arbitrary, Debug)]
enum FuzzOp {
    Add { time: i32, priority: i8 },
    Pop,
    ClearUntil { time: i32 },
    Clear,
}

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    ops: Vec<FuzzOp>,
}

fuzz_target!(|input: FuzzInput| {
    let queue = EventQueue::new();
    let cleaned = Arc::new(AtomicUsize::new(0));
    let mut added = 0usize;
    let mut last_popped: Option<(SimTime, i32)> = None;

    for op in input.ops.iter().take(500) {
        match op {
            FuzzOp::Add { time, priority } => {
                let c = Arc::clone(&cleaned);
                queue.add_event(
                    Event::new(SimTime::from_bits(i64::from(*time) << 16), EventKind(0))
                        .with_priority(i32::from(*priority))
                        .with_payload(Payload::with_cleanup((), move |_| {
                            c.fetch_add(1, Ordering::SeqCst);
                        })),
                );
                added += 1;
                last_popped = None;
            }
            FuzzOp::Pop => {
                if let Some(event) = queue.try_pop() {
                    let key = event.sort_key();
                    if let Some(prev) = last_popped {
                        assert!(prev <= key);
                    }
                    last_popped = Some(key);
                }
            }
            FuzzOp::ClearUntil { time } => {
                let cutoff = SimTime::from_bits(i64::from(*time) << 16);
                queue.clear_until(cutoff);
                if let Some(t) = queue.peek_time() {
                    assert!(t >= cutoff);
                }
            }
            FuzzOp::Clear => {
                queue.clear();
                assert!(queue.is_empty());
            }
        }
        // Popped events are dropped at the end of their arm, so every event
        // added is either still queued or cleaned up.
        assert_eq!(added, cleaned.load(Ordering::SeqCst) + queue.count());
    }
});
