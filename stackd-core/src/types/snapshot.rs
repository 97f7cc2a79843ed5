//! Committed reconciler state for a stack.

use serde::{Deserialize, Serialize};

use crate::types::stack::StackSpec;

/// Monotonically increasing revision used for optimistic concurrency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub version: u64,
}

/// The last-known downstream identity of one reconciled resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotResource {
    pub id: String,
    pub name: String,
    pub meta: Meta,
}

/// The reconciler's committed view of a stack: what it last established
/// downstream, per kind, and the spec it was driving toward.
///
/// `current_spec` is the spec that was last successfully applied toward;
/// `previous_spec` is what it replaced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotStack {
    pub id: String,
    pub name: String,
    pub meta: Meta,
    pub current_spec: StackSpec,
    pub previous_spec: StackSpec,
    pub services: Vec<SnapshotResource>,
    pub networks: Vec<SnapshotResource>,
    pub secrets: Vec<SnapshotResource>,
    pub configs: Vec<SnapshotResource>,
}
