//! Publisher configuration.

use serde::{Deserialize, Serialize};

/// Tunables for a [`Publisher`](crate::graph::Publisher).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Merge adjacent blocks of the same kind as they are recorded, so a
    /// list that is appended to three times publishes one insert block.
    pub coalesce_blocks: bool,

    /// How many times one node may be processed within a single
    /// transaction. A listener that keeps mutating its own upstream would
    /// otherwise never reach a fixpoint; past this cap the node's further
    /// events are dropped and a warning is logged.
    pub max_rounds_per_node: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            coalesce_blocks: true,
            max_rounds_per_node: 64,
        }
    }
}
