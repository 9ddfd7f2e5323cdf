use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a live model node in a [`ModelGraph`](crate::graph::ModelGraph).
    ///
    /// Keys are generational: a key of a removed model never aliases a model
    /// added later under the same name.
    pub struct ModelId;
}

/// Identifies the kind of an event. Cheap to copy and compare.
///
/// Kinds are application-defined; the core only carries and compares them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventKind(pub u32);

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "kind#{}", self.0)
    }
}

/// Event priority. Lower values are delivered first among equal timestamps.
pub type Priority = i32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_equality() {
        assert_eq!(EventKind(3), EventKind(3));
        assert_ne!(EventKind(3), EventKind(4));
    }

    #[test]
    fn event_kind_display() {
        assert_eq!(EventKind(7).to_string(), "kind#7");
    }

    #[test]
    fn model_ids_are_hashable() {
        use slotmap::SlotMap;
        use std::collections::HashMap;
        let mut sm: SlotMap<ModelId, ()> = SlotMap::with_key();
        let a = sm.insert(());
        let b = sm.insert(());
        let mut map = HashMap::new();
        map.insert(a, "road");
        map.insert(b, "car");
        assert_eq!(map[&a], "road");
        assert_eq!(map[&b], "car");
    }
}
