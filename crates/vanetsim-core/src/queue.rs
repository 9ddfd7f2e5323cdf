//! Thread-safe event queue ordered by time and priority.
//!
//! Events are injected by the simulation thread (models emitting follow-ups)
//! and by other threads (network ingestion, UI). They are drained by the
//! simulation thread in `(time, priority)` order. Among events with equal
//! time and priority, insertion order decides, so two runs that add the same
//! events in the same order pop them in the same order.
//!
//! All operations take one internal mutex for the duration of the heap
//! change only. Events removed by [`EventQueue::clear`] and
//! [`EventQueue::clear_until`] are dropped after the mutex is released, so a
//! payload cleanup closure may call back into the same queue.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::event::{Event, EventHeader};
use crate::time::SimTime;

// ---------------------------------------------------------------------------
// Heap entry
// ---------------------------------------------------------------------------

/// An event plus its insertion sequence number.
#[derive(Debug)]
struct Queued {
    event: Event,
    seq: u64,
}

impl Queued {
    fn key(&self) -> (SimTime, i32, u64) {
        (self.event.time, self.event.priority, self.seq)
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Queued {}

/// `BinaryHeap` is a max-heap, so the comparison is reversed to pop the
/// smallest `(time, priority, seq)` first.
impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    heap: BinaryHeap<Queued>,
    next_seq: u64,
}

// ---------------------------------------------------------------------------
// EventQueue
// ---------------------------------------------------------------------------

/// A thread-safe min-heap of [`Event`]s keyed by `(time, priority)`.
///
/// Share it between threads with `Arc<EventQueue>`; every method takes
/// `&self`.
#[derive(Debug, Default)]
pub struct EventQueue {
    inner: Mutex<QueueInner>,
}

impl EventQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an event. O(log n). The payload is not inspected.
    pub fn add_event(&self, event: Event) {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        trace!(
            time = %event.time,
            priority = event.priority,
            kind = %event.kind,
            seq,
            "event queued"
        );
        inner.heap.push(Queued { event, seq });
    }

    /// Header of the minimal event.
    ///
    /// # Panics
    ///
    /// Panics if the queue is empty. Check [`is_empty`](Self::is_empty) first,
    /// or use [`peek`](Self::peek).
    pub fn top_event(&self) -> EventHeader {
        match self.peek() {
            Some(header) => header,
            None => panic!("top_event called on an empty EventQueue"),
        }
    }

    /// Header of the minimal event, or `None` if empty.
    pub fn peek(&self) -> Option<EventHeader> {
        self.inner.lock().heap.peek().map(|q| q.event.header())
    }

    /// Timestamp of the minimal event, or `None` if empty.
    pub fn peek_time(&self) -> Option<SimTime> {
        self.inner.lock().heap.peek().map(|q| q.event.time)
    }

    /// Remove and return the minimal event.
    ///
    /// # Panics
    ///
    /// Panics if the queue is empty. Check [`is_empty`](Self::is_empty) first,
    /// or use [`try_pop`](Self::try_pop).
    pub fn pop_event(&self) -> Event {
        match self.try_pop() {
            Some(event) => event,
            None => panic!("pop_event called on an empty EventQueue"),
        }
    }

    /// Remove and return the minimal event, or `None` if empty.
    pub fn try_pop(&self) -> Option<Event> {
        self.inner.lock().heap.pop().map(|q| q.event)
    }

    /// Remove and return the minimal event if its time is `<= until`.
    ///
    /// The check and the removal happen under one lock, so a concurrent
    /// producer cannot slip an earlier event in between.
    pub fn pop_due(&self, until: SimTime) -> Option<Event> {
        let mut inner = self.inner.lock();
        if inner.heap.peek().is_some_and(|q| q.event.time <= until) {
            inner.heap.pop().map(|q| q.event)
        } else {
            None
        }
    }

    /// Number of queued events.
    pub fn count(&self) -> usize {
        self.inner.lock().heap.len()
    }

    /// Whether the queue holds no events.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().heap.is_empty()
    }

    /// Remove every event with `time < until`, running each payload cleanup
    /// once. Later events stay queued. Returns the number removed.
    ///
    /// Used to discard stale events after a discrete time jump.
    pub fn clear_until(&self, until: SimTime) -> usize {
        let stale: Vec<Queued> = {
            let mut inner = self.inner.lock();
            let (stale, keep): (Vec<Queued>, Vec<Queued>) = std::mem::take(&mut inner.heap)
                .into_vec()
                .into_iter()
                .partition(|q| q.event.time < until);
            inner.heap = BinaryHeap::from(keep);
            stale
        };
        let removed = stale.len();
        debug!(until = %until, removed, "cleared stale events");
        drop(stale);
        removed
    }

    /// Remove every event, running each payload cleanup once. Returns the
    /// number removed.
    pub fn clear(&self) -> usize {
        let all = std::mem::take(&mut self.inner.lock().heap);
        let removed = all.len();
        debug!(removed, "cleared event queue");
        drop(all);
        removed
    }

    /// Pop every event in order into a `Vec`.
    pub fn drain_ordered(&self) -> Vec<Event> {
        let heap = std::mem::take(&mut self.inner.lock().heap);
        heap.into_sorted_vec()
            .into_iter()
            .rev()
            .map(|q| q.event)
            .collect()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
