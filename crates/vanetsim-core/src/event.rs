//! Events routed between models.
//!
//! An [`Event`] carries a timestamp, a priority, origin and destination model
//! names, an [`EventKind`] tag and an opaque [`Payload`]. Events are ordered
//! by `(time, priority)` ascending: the earliest timestamp first, then the
//! lowest priority value.
//!
//! # Payload ownership
//!
//! A payload is a move-only, type-erased value with an optional cleanup
//! closure. The closure runs exactly once, when the payload is dropped while
//! still holding its value: the event was cleared from a queue, or a handler
//! consumed the event without retaining the payload. A handler that wants to
//! keep the value calls [`Payload::take`], which disarms the cleanup.

use std::any::Any;

use crate::id::{EventKind, Priority};
use crate::time::SimTime;

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Cleanup closure invoked with the payload value when it is discarded.
pub type Cleanup = Box<dyn FnOnce(Box<dyn Any + Send>) + Send>;

/// Opaque event payload with an optional cleanup closure.
#[derive(Default)]
pub struct Payload {
    value: Option<Box<dyn Any + Send>>,
    cleanup: Option<Cleanup>,
}

impl Payload {
    /// A payload with no value. Dropping it does nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Wrap a value with no cleanup; dropping it just drops the value.
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self {
            value: Some(Box::new(value)),
            cleanup: None,
        }
    }

    /// Wrap a value together with a cleanup closure that receives the value
    /// if the payload is discarded without being taken.
    pub fn with_cleanup<T, F>(value: T, cleanup: F) -> Self
    where
        T: Any + Send,
        F: FnOnce(T) + Send + 'static,
    {
        let cleanup: Cleanup = Box::new(move |boxed: Box<dyn Any + Send>| {
            if let Ok(v) = boxed.downcast::<T>() {
                cleanup(*v);
            }
        });
        Self {
            value: Some(Box::new(value)),
            cleanup: Some(cleanup),
        }
    }

    /// Whether this payload holds no value (empty, or already taken).
    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    /// Whether the held value is of type `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.value.as_ref().is_some_and(|v| (**v).is::<T>())
    }

    /// Borrow the held value as `T`.
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.value.as_ref().and_then(|v| (**v).downcast_ref::<T>())
    }

    /// Take ownership of the held value. On success the cleanup closure is
    /// dropped without running; the caller now owns the value. Returns `None`
    /// (and leaves the payload untouched) if empty or of a different type.
    pub fn take<T: Any + Send>(&mut self) -> Option<T> {
        let boxed = self.value.take()?;
        match boxed.downcast::<T>() {
            Ok(v) => {
                self.cleanup = None;
                Some(*v)
            }
            Err(boxed) => {
                self.value = Some(boxed);
                None
            }
        }
    }
}

impl Drop for Payload {
    fn drop(&mut self) {
        if let (Some(value), Some(cleanup)) = (self.value.take(), self.cleanup.take()) {
            cleanup(value);
        }
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Payload")
            .field("value", &if self.value.is_some() { "Some(<any>)" } else { "None" })
            .field("cleanup", &self.cleanup.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A timestamped, prioritized message routed between models.
#[derive(Debug)]
pub struct Event {
    /// Simulation time at which the event is delivered.
    pub time: SimTime,
    /// Lower values are delivered first among equal timestamps.
    pub priority: Priority,
    /// Name of the model that produced the event. Empty for external sources.
    pub origin: String,
    /// Name of the destination model. Empty means broadcast.
    pub destination: String,
    /// Application-defined kind tag.
    pub kind: EventKind,
    /// Opaque payload.
    pub payload: Payload,
}

impl Event {
    /// A broadcast event with priority 0 and an empty payload.
    pub fn new(time: SimTime, kind: EventKind) -> Self {
        Self {
            time,
            priority: 0,
            origin: String::new(),
            destination: String::new(),
            kind,
            payload: Payload::empty(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = destination.into();
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Whether the event has no explicit destination.
    pub fn is_broadcast(&self) -> bool {
        self.destination.is_empty()
    }

    /// The ordering key: `(time, priority)`.
    pub fn sort_key(&self) -> (SimTime, Priority) {
        (self.time, self.priority)
    }

    /// Clone the routing metadata without the payload.
    pub fn header(&self) -> EventHeader {
        EventHeader {
            time: self.time,
            priority: self.priority,
            origin: self.origin.clone(),
            destination: self.destination.clone(),
            kind: self.kind,
        }
    }
}

/// The routing metadata of an [`Event`], without its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHeader {
    pub time: SimTime,
    pub priority: Priority,
    pub origin: String,
    pub destination: String,
    pub kind: EventKind,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::secs;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_payload(counter: &Arc<AtomicUsize>) -> Payload {
        let c = Arc::clone(counter);
        Payload::with_cleanup(42u32, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn dropping_payload_runs_cleanup_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let payload = counting_payload(&counter);
        drop(payload);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn taken_payload_skips_cleanup() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut payload = counting_payload(&counter);
        assert_eq!(payload.take::<u32>(), Some(42));
        assert!(payload.is_empty());
        drop(payload);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn take_wrong_type_leaves_payload_armed() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut payload = counting_payload(&counter);
        assert_eq!(payload.take::<String>(), None);
        assert!(payload.is::<u32>());
        drop(payload);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cleanup_receives_value() {
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let s = Arc::clone(&seen);
        let payload = Payload::with_cleanup(String::from("frame"), move |v| {
            *s.lock() = Some(v);
        });
        drop(payload);
        assert_eq!(seen.lock().as_deref(), Some("frame"));
    }

    #[test]
    fn empty_payload_drop_is_noop() {
        let payload = Payload::empty();
        assert!(payload.is_empty());
        assert!(payload.get::<u32>().is_none());
    }

    #[test]
    fn event_drop_runs_payload_cleanup() {
        let counter = Arc::new(AtomicUsize::new(0));
        let event = Event::new(secs(1.0), EventKind(1)).with_payload(counting_payload(&counter));
        drop(event);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn builder_sets_fields() {
        let event = Event::new(secs(2.0), EventKind(9))
            .with_priority(3)
            .with_origin("car1")
            .with_destination("car2");
        assert_eq!(event.sort_key(), (secs(2.0), 3));
        assert_eq!(event.origin, "car1");
        assert_eq!(event.destination, "car2");
        assert!(!event.is_broadcast());
        assert!(Event::new(secs(0.0), EventKind(0)).is_broadcast());
    }

    #[test]
    fn header_copies_metadata() {
        let event = Event::new(secs(1.0), EventKind(2)).with_origin("a").with_destination("b");
        let header = event.header();
        assert_eq!(header.time, secs(1.0));
        assert_eq!(header.kind, EventKind(2));
        assert_eq!(header.origin, "a");
        assert_eq!(header.destination, "b");
    }
}
