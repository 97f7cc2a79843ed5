//! Shared fixtures for the reconciler integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use stackd_core::backend::{
    BackendApiShim, BackendClient, EventSource, LabelFilter, LocalCluster, ResourceBackend,
    StacksBackend,
};
use stackd_core::error::{Result, StackdError};
use stackd_core::events::{Event, EventFilter, EventSubscription};
use stackd_core::store::StackStore;
use stackd_core::types::{
    ConfigObject, ConfigSpec, Network, NetworkSpec, Secret, SecretSpec, Service, ServiceSpec,
    SnapshotStack, Stack, StackCreateResponse, StackSpec, TaskTemplate,
};

/// A standalone backend plus direct handles on its parts.
pub struct Fixture {
    pub backend: Arc<BackendApiShim>,
    pub cluster: Arc<LocalCluster>,
    pub store: Arc<StackStore>,
}

pub fn fixture() -> Fixture {
    let cluster = Arc::new(LocalCluster::new());
    let store = Arc::new(StackStore::new());
    let backend = Arc::new(BackendApiShim::new(cluster.clone(), store.clone()));
    Fixture { backend, cluster, store }
}

/// A stack declaring one service `web` and one network `front`.
pub fn web_stack_spec() -> StackSpec {
    StackSpec {
        name: "app".to_string(),
        services: vec![service_spec("web", "nginx:latest")],
        networks: BTreeMap::from([(
            "front".to_string(),
            NetworkSpec { driver: "overlay".to_string(), ..Default::default() },
        )]),
        ..Default::default()
    }
}

pub fn service_spec(name: &str, image: &str) -> ServiceSpec {
    ServiceSpec {
        name: name.to_string(),
        task_template: TaskTemplate { image: image.to_string(), ..Default::default() },
        ..Default::default()
    }
}

/// Backend decorator that fails the first `failures` snapshot commits with a
/// version mismatch, recording every attempt. Everything else delegates.
pub struct FlakyCommits {
    inner: Arc<dyn BackendClient>,
    failures: AtomicU32,
    pub commit_attempts: AtomicU32,
}

impl FlakyCommits {
    pub fn new(inner: Arc<dyn BackendClient>, failures: u32) -> Self {
        Self { inner, failures: AtomicU32::new(failures), commit_attempts: AtomicU32::new(0) }
    }
}

#[async_trait]
impl StacksBackend for FlakyCommits {
    async fn create_stack(&self, spec: StackSpec) -> Result<StackCreateResponse> {
        self.inner.create_stack(spec).await
    }

    async fn get_stack(&self, id: &str) -> Result<Stack> {
        self.inner.get_stack(id).await
    }

    async fn list_stacks(&self) -> Result<Vec<Stack>> {
        self.inner.list_stacks().await
    }

    async fn update_stack(&self, id: &str, spec: StackSpec, version: u64) -> Result<()> {
        self.inner.update_stack(id, spec, version).await
    }

    async fn delete_stack(&self, id: &str) -> Result<()> {
        self.inner.delete_stack(id).await
    }

    async fn get_snapshot_stack(&self, id: &str) -> Result<SnapshotStack> {
        self.inner.get_snapshot_stack(id).await
    }

    async fn update_snapshot_stack(
        &self,
        id: &str,
        snapshot: SnapshotStack,
        version: u64,
    ) -> Result<SnapshotStack> {
        self.commit_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StackdError::VersionMismatch {
                id: id.to_string(),
                expected: version,
                stored: version + 1,
            });
        }
        self.inner.update_snapshot_stack(id, snapshot, version).await
    }

    async fn delete_snapshot_stack(&self, id: &str) -> Result<()> {
        self.inner.delete_snapshot_stack(id).await
    }
}

#[async_trait]
impl ResourceBackend for FlakyCommits {
    async fn get_service(&self, id: &str) -> Result<Service> {
        self.inner.get_service(id).await
    }

    async fn list_services(&self, filter: &LabelFilter) -> Result<Vec<Service>> {
        self.inner.list_services(filter).await
    }

    async fn create_service(&self, spec: ServiceSpec) -> Result<String> {
        self.inner.create_service(spec).await
    }

    async fn update_service(&self, id: &str, version: u64, spec: ServiceSpec) -> Result<()> {
        self.inner.update_service(id, version, spec).await
    }

    async fn remove_service(&self, id: &str) -> Result<()> {
        self.inner.remove_service(id).await
    }

    async fn get_network(&self, id: &str) -> Result<Network> {
        self.inner.get_network(id).await
    }

    async fn list_networks(&self, filter: &LabelFilter) -> Result<Vec<Network>> {
        self.inner.list_networks(filter).await
    }

    async fn create_network(&self, name: &str, spec: NetworkSpec) -> Result<String> {
        self.inner.create_network(name, spec).await
    }

    async fn remove_network(&self, id: &str) -> Result<()> {
        self.inner.remove_network(id).await
    }

    async fn get_secret(&self, id: &str) -> Result<Secret> {
        self.inner.get_secret(id).await
    }

    async fn list_secrets(&self, filter: &LabelFilter) -> Result<Vec<Secret>> {
        self.inner.list_secrets(filter).await
    }

    async fn create_secret(&self, spec: SecretSpec) -> Result<String> {
        self.inner.create_secret(spec).await
    }

    async fn update_secret(&self, id: &str, version: u64, spec: SecretSpec) -> Result<()> {
        self.inner.update_secret(id, version, spec).await
    }

    async fn remove_secret(&self, id: &str) -> Result<()> {
        self.inner.remove_secret(id).await
    }

    async fn get_config(&self, id: &str) -> Result<ConfigObject> {
        self.inner.get_config(id).await
    }

    async fn list_configs(&self, filter: &LabelFilter) -> Result<Vec<ConfigObject>> {
        self.inner.list_configs(filter).await
    }

    async fn create_config(&self, spec: ConfigSpec) -> Result<String> {
        self.inner.create_config(spec).await
    }

    async fn update_config(&self, id: &str, version: u64, spec: ConfigSpec) -> Result<()> {
        self.inner.update_config(id, version, spec).await
    }

    async fn remove_config(&self, id: &str) -> Result<()> {
        self.inner.remove_config(id).await
    }
}

#[async_trait]
impl EventSource for FlakyCommits {
    async fn subscribe_to_events(
        &self,
        filter: EventFilter,
    ) -> Result<(Vec<Event>, EventSubscription)> {
        self.inner.subscribe_to_events(filter).await
    }

    async fn unsubscribe_from_events(&self, subscription_id: u64) {
        self.inner.unsubscribe_from_events(subscription_id).await
    }
}
