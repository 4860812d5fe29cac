// Copyright @yucwang 2021

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a unique, monotonically increasing id. Also used as a version tag.
pub fn generate_node_id() -> u64 {
    NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed)
}

pub trait ComputationNode {
    /// Return the unique identifier for this computation node.
    fn id(&self) -> u64;

    // Output string for a single computation node, used in log messages.
    fn describe(&self) -> String;
}
