use serde::{Deserialize, Serialize};

/// Lifecycle state of a model node.
///
/// Transitions:
/// - Clean -> Dirty when settings or topology change ([`NodeStatus::mark_dirty`]).
/// - Dirty -> Clean after a successful re-evaluation ([`NodeStatus::mark_clean`]).
/// - any non-fatal -> Error when `init` fails ([`NodeStatus::mark_error`]).
/// - Error -> Dirty when the error is cleared ([`NodeStatus::clear_error`]).
/// - any -> Fatal only by explicit administrative action ([`NodeStatus::mark_fatal`]).
///
/// Fatal is terminal until the node is destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NodeState {
    #[default]
    Clean,
    Dirty,
    Error,
    Fatal,
}

/// A node's state plus the post-iteration flag.
///
/// `post_iteration_pending` is orthogonal to the state: it marks a node
/// that asked to be revisited once the current evaluation pass finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeStatus {
    state: NodeState,
    post_iteration_pending: bool,
}

impl NodeStatus {
    /// A freshly created node. New nodes start Dirty: nothing has been
    /// derived from their parameters yet.
    pub fn new() -> Self {
        Self {
            state: NodeState::Dirty,
            post_iteration_pending: false,
        }
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Clean -> Dirty. An Error node stays Error since it already needs
    /// re-validation.
    pub fn mark_dirty(&mut self) -> Result<(), StatusError> {
        match self.state {
            NodeState::Fatal => Err(StatusError::Fatal),
            NodeState::Error => Ok(()),
            NodeState::Clean | NodeState::Dirty => {
                self.state = NodeState::Dirty;
                Ok(())
            }
        }
    }

    /// Dirty -> Clean. Clean stays Clean.
    pub fn mark_clean(&mut self) -> Result<(), StatusError> {
        match self.state {
            NodeState::Fatal => Err(StatusError::Fatal),
            NodeState::Error => Err(StatusError::Illegal {
                from: NodeState::Error,
                to: NodeState::Clean,
            }),
            NodeState::Clean | NodeState::Dirty => {
                self.state = NodeState::Clean;
                Ok(())
            }
        }
    }

    pub fn mark_error(&mut self) -> Result<(), StatusError> {
        if self.state == NodeState::Fatal {
            return Err(StatusError::Fatal);
        }
        self.state = NodeState::Error;
        Ok(())
    }

    /// Error -> Dirty. Other non-fatal states are left alone.
    pub fn clear_error(&mut self) -> Result<(), StatusError> {
        match self.state {
            NodeState::Fatal => Err(StatusError::Fatal),
            NodeState::Error => {
                self.state = NodeState::Dirty;
                Ok(())
            }
            NodeState::Clean | NodeState::Dirty => Ok(()),
        }
    }

    pub fn mark_fatal(&mut self) {
        self.state = NodeState::Fatal;
        self.post_iteration_pending = false;
    }

    pub fn request_post_iteration(&mut self) {
        if self.state != NodeState::Fatal {
            self.post_iteration_pending = true;
        }
    }

    /// Clear and return the post-iteration flag.
    pub fn take_post_iteration(&mut self) -> bool {
        std::mem::take(&mut self.post_iteration_pending)
    }

    pub fn is_post_iteration_pending(&self) -> bool {
        self.post_iteration_pending
    }

    /// Whether the node takes part in the evaluation order (non-fatal).
    pub fn is_in_tree(&self) -> bool {
        self.state != NodeState::Fatal
    }

    /// Whether the node's model is called during a run: Clean or Dirty.
    pub fn is_evaluable(&self) -> bool {
        matches!(self.state, NodeState::Clean | NodeState::Dirty)
    }

    pub fn is_dirty(&self) -> bool {
        self.state == NodeState::Dirty
    }

    pub fn is_error(&self) -> bool {
        self.state == NodeState::Error
    }

    pub fn is_fatal(&self) -> bool {
        self.state == NodeState::Fatal
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatusError {
    #[error("node is fatal; destroy it to recover")]
    Fatal,
    #[error("illegal transition {from:?} -> {to:?}")]
    Illegal { from: NodeState, to: NodeState },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_node_is_dirty_and_evaluable() {
        let s = NodeStatus::new();
        assert_eq!(s.state(), NodeState::Dirty);
        assert!(s.is_evaluable());
        assert!(s.is_in_tree());
    }

    #[test]
    fn dirty_clean_cycle() {
        let mut s = NodeStatus::new();
        s.mark_clean().unwrap();
        assert_eq!(s.state(), NodeState::Clean);
        s.mark_dirty().unwrap();
        assert!(s.is_dirty());
    }

    #[test]
    fn error_is_not_evaluable_but_in_tree() {
        let mut s = NodeStatus::new();
        s.mark_error().unwrap();
        assert!(!s.is_evaluable());
        assert!(s.is_in_tree());
    }

    #[test]
    fn mark_dirty_keeps_error() {
        let mut s = NodeStatus::new();
        s.mark_error().unwrap();
        s.mark_dirty().unwrap();
        assert!(s.is_error());
    }

    #[test]
    fn error_cannot_go_straight_to_clean() {
        let mut s = NodeStatus::new();
        s.mark_error().unwrap();
        assert_eq!(
            s.mark_clean(),
            Err(StatusError::Illegal {
                from: NodeState::Error,
                to: NodeState::Clean
            })
        );
    }

    #[test]
    fn clear_error_makes_dirty() {
        let mut s = NodeStatus::new();
        s.mark_error().unwrap();
        s.clear_error().unwrap();
        assert!(s.is_dirty());
    }

    #[test]
    fn fatal_is_terminal() {
        let mut s = NodeStatus::new();
        s.mark_fatal();
        assert!(!s.is_in_tree());
        assert!(!s.is_evaluable());
        assert_eq!(s.mark_dirty(), Err(StatusError::Fatal));
        assert_eq!(s.mark_clean(), Err(StatusError::Fatal));
        assert_eq!(s.mark_error(), Err(StatusError::Fatal));
        assert_eq!(s.clear_error(), Err(StatusError::Fatal));
        assert!(s.is_fatal());
    }

    #[test]
    fn post_iteration_flag_is_orthogonal() {
        let mut s = NodeStatus::new();
        s.request_post_iteration();
        s.mark_clean().unwrap();
        assert!(s.is_post_iteration_pending());
        assert!(s.take_post_iteration());
        assert!(!s.take_post_iteration());
    }

    #[test]
    fn fatal_drops_post_iteration() {
        let mut s = NodeStatus::new();
        s.request_post_iteration();
        s.mark_fatal();
        assert!(!s.is_post_iteration_pending());
        s.request_post_iteration();
        assert!(!s.is_post_iteration_pending());
    }
}
