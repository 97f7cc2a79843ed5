//! Reconcile units of work and kind dispatch.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::snapshot::SnapshotResource;
use crate::types::stack::{ConfigSpec, NetworkSpec, SecretSpec, ServiceSpec};

/// The resource kinds the reconciler drives.
///
/// Declaration order is dispatch priority: dependencies point leftward, so
/// within one batch every request of an earlier kind is processed before any
/// request of a later one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileKind {
    Stack,
    Network,
    Secret,
    Config,
    Service,
}

impl ReconcileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileKind::Stack => "stack",
            ReconcileKind::Network => "network",
            ReconcileKind::Secret => "secret",
            ReconcileKind::Config => "config",
            ReconcileKind::Service => "service",
        }
    }
}

impl fmt::Display for ReconcileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of diffing one goal against the active downstream state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mark {
    #[default]
    None,
    Create,
    Update,
    Delete,
    Same,
}

/// Kind-specific declared configuration, carried as a closed variant so the
/// shared reconcile skeleton never needs downcasting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceSpec {
    Service(ServiceSpec),
    Network(NetworkSpec),
    Secret(SecretSpec),
    Config(ConfigSpec),
}

/// One unit of reconcile work: a request from the dispatcher, and later a
/// goal computed during a reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileResource {
    pub kind: ReconcileKind,
    pub resource: SnapshotResource,
    pub config: Option<ResourceSpec>,
    pub mark: Mark,
}

impl ReconcileResource {
    /// A bare dispatcher request for `(kind, id)`.
    pub fn request(kind: ReconcileKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            resource: SnapshotResource { id: id.into(), ..Default::default() },
            config: None,
            mark: Mark::None,
        }
    }
}

/// A kind-specific wrapper over what currently exists downstream.
///
/// `stack_id` is derived from the stack-namespace label and is empty for
/// resources the reconciler does not own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveResource {
    pub resource: SnapshotResource,
    pub stack_id: String,
    pub spec: ResourceSpec,
}
