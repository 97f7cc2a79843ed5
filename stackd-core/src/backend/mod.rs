//! Backend capability traits.
//!
//! The reconciler is written against `BackendClient`, an opaque capability
//! set covering stack and snapshot storage, per-kind resource CRUD on the
//! downstream orchestrator, and the change-event stream. Implementations are
//! injected by constructor; nothing in the reconciler reaches for a global.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::events::{Event, EventFilter, EventSubscription};
use crate::types::{
    ConfigObject, ConfigSpec, Network, NetworkSpec, Secret, SecretSpec, Service, ServiceSpec,
    SnapshotStack, Stack, StackCreateResponse, StackSpec, STACK_NAMESPACE_LABEL,
};

pub mod local;
pub mod shim;

pub use local::LocalCluster;
pub use shim::BackendApiShim;

/// Label filter accepted by every list operation.
pub type LabelFilter = BTreeMap<String, String>;

/// Filter selecting resources owned by one stack.
pub fn stack_label_filter(stack_id: &str) -> LabelFilter {
    BTreeMap::from([(STACK_NAMESPACE_LABEL.to_string(), stack_id.to_string())])
}

/// Stack CRUD plus the reconciler's snapshot persistence.
#[async_trait]
pub trait StacksBackend: Send + Sync {
    async fn create_stack(&self, spec: StackSpec) -> Result<StackCreateResponse>;
    async fn get_stack(&self, id: &str) -> Result<Stack>;
    async fn list_stacks(&self) -> Result<Vec<Stack>>;
    async fn update_stack(&self, id: &str, spec: StackSpec, version: u64) -> Result<()>;
    async fn delete_stack(&self, id: &str) -> Result<()>;

    async fn get_snapshot_stack(&self, id: &str) -> Result<SnapshotStack>;
    async fn update_snapshot_stack(
        &self,
        id: &str,
        snapshot: SnapshotStack,
        version: u64,
    ) -> Result<SnapshotStack>;
    async fn delete_snapshot_stack(&self, id: &str) -> Result<()>;
}

/// Imperative CRUD for the individual resource kinds on the downstream
/// orchestrator. Networks have no update operation.
#[async_trait]
pub trait ResourceBackend: Send + Sync {
    async fn get_service(&self, id: &str) -> Result<Service>;
    async fn list_services(&self, filter: &LabelFilter) -> Result<Vec<Service>>;
    async fn create_service(&self, spec: ServiceSpec) -> Result<String>;
    async fn update_service(&self, id: &str, version: u64, spec: ServiceSpec) -> Result<()>;
    async fn remove_service(&self, id: &str) -> Result<()>;

    async fn get_network(&self, id: &str) -> Result<Network>;
    async fn list_networks(&self, filter: &LabelFilter) -> Result<Vec<Network>>;
    async fn create_network(&self, name: &str, spec: NetworkSpec) -> Result<String>;
    async fn remove_network(&self, id: &str) -> Result<()>;

    async fn get_secret(&self, id: &str) -> Result<Secret>;
    async fn list_secrets(&self, filter: &LabelFilter) -> Result<Vec<Secret>>;
    async fn create_secret(&self, spec: SecretSpec) -> Result<String>;
    async fn update_secret(&self, id: &str, version: u64, spec: SecretSpec) -> Result<()>;
    async fn remove_secret(&self, id: &str) -> Result<()>;

    async fn get_config(&self, id: &str) -> Result<ConfigObject>;
    async fn list_configs(&self, filter: &LabelFilter) -> Result<Vec<ConfigObject>>;
    async fn create_config(&self, spec: ConfigSpec) -> Result<String>;
    async fn update_config(&self, id: &str, version: u64, spec: ConfigSpec) -> Result<()>;
    async fn remove_config(&self, id: &str) -> Result<()>;
}

/// Subscription to the merged change-event stream. The subscription returns
/// any backlog alongside the live channel; both are processed equivalently.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn subscribe_to_events(
        &self,
        filter: EventFilter,
    ) -> Result<(Vec<Event>, EventSubscription)>;
    async fn unsubscribe_from_events(&self, subscription_id: u64);
}

/// The full capability set the reconciler depends on.
pub trait BackendClient: StacksBackend + ResourceBackend + EventSource {}

impl<T: StacksBackend + ResourceBackend + EventSource> BackendClient for T {}
