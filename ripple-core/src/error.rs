//! Error types
//!
//! Every failure in this crate is a contract violation by the caller, not a
//! transient condition. Errors are surfaced immediately and never retried.

use thiserror::Error;

use crate::graph::NodeId;

/// Errors raised by the publisher, lists and change events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RippleError {
    /// Registering the edge would let `downstream` reach `upstream` again.
    #[error("edge {upstream:?} -> {downstream:?} would create a dependency cycle")]
    CycleDetected { upstream: NodeId, downstream: NodeId },

    /// A listener read past the end of its change event.
    #[error("change event cursor exhausted after {len} blocks")]
    ExhaustedCursor { len: usize },

    /// The node is not (or no longer) registered with the publisher.
    #[error("node {0:?} is not registered with this publisher")]
    UnknownNode(NodeId),

    /// A mutation addressed an index outside the list.
    #[error("index {index} out of bounds for list of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RippleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_readable_messages() {
        let err = RippleError::ExhaustedCursor { len: 3 };
        assert_eq!(err.to_string(), "change event cursor exhausted after 3 blocks");

        let err = RippleError::IndexOutOfBounds { index: 7, len: 2 };
        assert_eq!(err.to_string(), "index 7 out of bounds for list of length 2");
    }
}
