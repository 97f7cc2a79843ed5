//! Domain types shared across the stackd crates.

pub mod reconcile;
pub mod snapshot;
pub mod stack;

pub use reconcile::{ActiveResource, Mark, ReconcileKind, ReconcileResource, ResourceSpec};
pub use snapshot::{Meta, SnapshotResource, SnapshotStack};
pub use stack::{
    ChangeConfig, ConfigObject, ConfigSpec, Driver, EndpointSpec, Labels, Network, NetworkSpec,
    PortConfig, PortProtocol, Secret, SecretSpec, Service, ServiceMode, ServiceSpec, Stack,
    StackCreateResponse, StackSpec, TaskTemplate,
};

/// Well-known label tying a downstream resource to the stack that owns it.
/// Its value equals the owning stack's ID for every reconciler-owned resource.
pub const STACK_NAMESPACE_LABEL: &str = "com.docker.stack.namespace";
