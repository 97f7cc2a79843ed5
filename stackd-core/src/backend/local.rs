//! In-memory downstream cluster.
//!
//! `LocalCluster` stands in for the downstream orchestrator in the
//! standalone deployment and in the test-suites: services, networks,
//! secrets, and configs live in process-local maps, every mutation emits a
//! change event, and list operations honor label filters the way the real
//! API does. Resource names are unique per kind, version-guarded updates
//! bump the stored revision.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::backend::{LabelFilter, ResourceBackend};
use crate::error::{Result, StackdError};
use crate::events::{Event, EventAction};
use crate::types::{
    ConfigObject, ConfigSpec, Labels, Network, NetworkSpec, ReconcileKind, Secret, SecretSpec,
    Service, ServiceSpec,
};

/// Buffered change events per subscriber before lag kicks in.
const EVENT_BUFFER_SIZE: usize = 256;

/// In-memory downstream orchestrator state.
pub struct LocalCluster {
    inner: RwLock<ClusterState>,
    events: broadcast::Sender<Event>,
}

#[derive(Default)]
struct ClusterState {
    services: HashMap<String, Service>,
    networks: HashMap<String, Network>,
    secrets: HashMap<String, Secret>,
    configs: HashMap<String, ConfigObject>,
    next_id: u64,
}

impl LocalCluster {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self {
            inner: RwLock::new(ClusterState { next_id: 1, ..Default::default() }),
            events,
        }
    }

    /// Watch the cluster's change events. Every create/update/remove of any
    /// resource kind is reported on the returned receiver.
    pub fn watch(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    fn emit(&self, kind: ReconcileKind, action: EventAction, id: &str) {
        // Ignore send errors (no subscribers).
        let _ = self.events.send(Event::new(kind, action, id));
    }
}

impl Default for LocalCluster {
    fn default() -> Self {
        Self::new()
    }
}

/// True when every filter entry is present in `labels`.
fn labels_match(labels: &Labels, filter: &LabelFilter) -> bool {
    filter.iter().all(|(k, v)| labels.get(k) == Some(v))
}

fn require_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StackdError::invalid_argument(format!("{kind} spec has no name")));
    }
    Ok(())
}

#[async_trait]
impl ResourceBackend for LocalCluster {
    async fn get_service(&self, id: &str) -> Result<Service> {
        let inner = self.inner.read().await;
        inner.services.get(id).cloned().ok_or_else(|| StackdError::not_found("service", id))
    }

    async fn list_services(&self, filter: &LabelFilter) -> Result<Vec<Service>> {
        let inner = self.inner.read().await;
        Ok(inner
            .services
            .values()
            .filter(|s| labels_match(&s.spec.labels, filter))
            .cloned()
            .collect())
    }

    async fn create_service(&self, spec: ServiceSpec) -> Result<String> {
        require_name("service", &spec.name)?;
        let mut inner = self.inner.write().await;
        if inner.services.values().any(|s| s.spec.name == spec.name) {
            return Err(StackdError::invalid_argument(format!(
                "service name {:?} already in use",
                spec.name
            )));
        }
        let id = format!("svc-{}", inner.next_id);
        inner.next_id += 1;
        inner.services.insert(id.clone(), Service { id: id.clone(), version: 1, spec });
        drop(inner);

        debug!(service_id = %id, "created service");
        self.emit(ReconcileKind::Service, EventAction::Create, &id);
        Ok(id)
    }

    async fn update_service(&self, id: &str, version: u64, spec: ServiceSpec) -> Result<()> {
        let mut inner = self.inner.write().await;
        let service =
            inner.services.get_mut(id).ok_or_else(|| StackdError::not_found("service", id))?;
        if service.version != version {
            return Err(StackdError::VersionMismatch {
                id: id.to_string(),
                expected: version,
                stored: service.version,
            });
        }
        service.version += 1;
        service.spec = spec;
        drop(inner);

        self.emit(ReconcileKind::Service, EventAction::Update, id);
        Ok(())
    }

    async fn remove_service(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.services.remove(id).is_none() {
            return Err(StackdError::not_found("service", id));
        }
        drop(inner);

        self.emit(ReconcileKind::Service, EventAction::Delete, id);
        Ok(())
    }

    async fn get_network(&self, id: &str) -> Result<Network> {
        let inner = self.inner.read().await;
        inner.networks.get(id).cloned().ok_or_else(|| StackdError::not_found("network", id))
    }

    async fn list_networks(&self, filter: &LabelFilter) -> Result<Vec<Network>> {
        let inner = self.inner.read().await;
        Ok(inner
            .networks
            .values()
            .filter(|n| labels_match(&n.spec.labels, filter))
            .cloned()
            .collect())
    }

    async fn create_network(&self, name: &str, spec: NetworkSpec) -> Result<String> {
        require_name("network", name)?;
        let mut inner = self.inner.write().await;
        if inner.networks.values().any(|n| n.name == name) {
            return Err(StackdError::invalid_argument(format!(
                "network name {name:?} already in use"
            )));
        }
        let id = format!("net-{}", inner.next_id);
        inner.next_id += 1;
        inner.networks.insert(id.clone(), Network { id: id.clone(), name: name.to_string(), spec });
        drop(inner);

        debug!(network_id = %id, "created network");
        self.emit(ReconcileKind::Network, EventAction::Create, &id);
        Ok(id)
    }

    async fn remove_network(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.networks.remove(id).is_none() {
            return Err(StackdError::not_found("network", id));
        }
        drop(inner);

        self.emit(ReconcileKind::Network, EventAction::Delete, id);
        Ok(())
    }

    async fn get_secret(&self, id: &str) -> Result<Secret> {
        let inner = self.inner.read().await;
        inner.secrets.get(id).cloned().ok_or_else(|| StackdError::not_found("secret", id))
    }

    async fn list_secrets(&self, filter: &LabelFilter) -> Result<Vec<Secret>> {
        let inner = self.inner.read().await;
        Ok(inner
            .secrets
            .values()
            .filter(|s| labels_match(&s.spec.labels, filter))
            .cloned()
            .collect())
    }

    async fn create_secret(&self, spec: SecretSpec) -> Result<String> {
        require_name("secret", &spec.name)?;
        let mut inner = self.inner.write().await;
        if inner.secrets.values().any(|s| s.spec.name == spec.name) {
            return Err(StackdError::invalid_argument(format!(
                "secret name {:?} already in use",
                spec.name
            )));
        }
        let id = format!("sec-{}", inner.next_id);
        inner.next_id += 1;
        inner.secrets.insert(id.clone(), Secret { id: id.clone(), version: 1, spec });
        drop(inner);

        debug!(secret_id = %id, "created secret");
        self.emit(ReconcileKind::Secret, EventAction::Create, &id);
        Ok(id)
    }

    async fn update_secret(&self, id: &str, version: u64, spec: SecretSpec) -> Result<()> {
        let mut inner = self.inner.write().await;
        let secret =
            inner.secrets.get_mut(id).ok_or_else(|| StackdError::not_found("secret", id))?;
        if secret.version != version {
            return Err(StackdError::VersionMismatch {
                id: id.to_string(),
                expected: version,
                stored: secret.version,
            });
        }
        secret.version += 1;
        secret.spec = spec;
        drop(inner);

        self.emit(ReconcileKind::Secret, EventAction::Update, id);
        Ok(())
    }

    async fn remove_secret(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.secrets.remove(id).is_none() {
            return Err(StackdError::not_found("secret", id));
        }
        drop(inner);

        self.emit(ReconcileKind::Secret, EventAction::Delete, id);
        Ok(())
    }

    async fn get_config(&self, id: &str) -> Result<ConfigObject> {
        let inner = self.inner.read().await;
        inner.configs.get(id).cloned().ok_or_else(|| StackdError::not_found("config", id))
    }

    async fn list_configs(&self, filter: &LabelFilter) -> Result<Vec<ConfigObject>> {
        let inner = self.inner.read().await;
        Ok(inner
            .configs
            .values()
            .filter(|c| labels_match(&c.spec.labels, filter))
            .cloned()
            .collect())
    }

    async fn create_config(&self, spec: ConfigSpec) -> Result<String> {
        require_name("config", &spec.name)?;
        let mut inner = self.inner.write().await;
        if inner.configs.values().any(|c| c.spec.name == spec.name) {
            return Err(StackdError::invalid_argument(format!(
                "config name {:?} already in use",
                spec.name
            )));
        }
        let id = format!("cfg-{}", inner.next_id);
        inner.next_id += 1;
        inner.configs.insert(id.clone(), ConfigObject { id: id.clone(), version: 1, spec });
        drop(inner);

        debug!(config_id = %id, "created config");
        self.emit(ReconcileKind::Config, EventAction::Create, &id);
        Ok(id)
    }

    async fn update_config(&self, id: &str, version: u64, spec: ConfigSpec) -> Result<()> {
        let mut inner = self.inner.write().await;
        let config =
            inner.configs.get_mut(id).ok_or_else(|| StackdError::not_found("config", id))?;
        if config.version != version {
            return Err(StackdError::VersionMismatch {
                id: id.to_string(),
                expected: version,
                stored: config.version,
            });
        }
        config.version += 1;
        config.spec = spec;
        drop(inner);

        self.emit(ReconcileKind::Config, EventAction::Update, id);
        Ok(())
    }

    async fn remove_config(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.configs.remove(id).is_none() {
            return Err(StackdError::not_found("config", id));
        }
        drop(inner);

        self.emit(ReconcileKind::Config, EventAction::Delete, id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::stack_label_filter;
    use crate::types::STACK_NAMESPACE_LABEL;

    fn labeled_service(name: &str, stack_id: &str) -> ServiceSpec {
        ServiceSpec {
            name: name.to_string(),
            labels: Labels::from([(
                STACK_NAMESPACE_LABEL.to_string(),
                stack_id.to_string(),
            )]),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn service_crud_round_trip() {
        let cluster = LocalCluster::new();

        let id = cluster.create_service(labeled_service("web", "st-1")).await.unwrap();
        let service = cluster.get_service(&id).await.unwrap();
        assert_eq!(service.spec.name, "web");
        assert_eq!(service.version, 1);

        cluster.update_service(&id, 1, labeled_service("web", "st-1")).await.unwrap();
        assert_eq!(cluster.get_service(&id).await.unwrap().version, 2);

        cluster.remove_service(&id).await.unwrap();
        assert!(cluster.get_service(&id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn list_honors_label_filter() {
        let cluster = LocalCluster::new();
        cluster.create_service(labeled_service("web", "st-1")).await.unwrap();
        cluster.create_service(labeled_service("api", "st-2")).await.unwrap();
        cluster
            .create_service(ServiceSpec { name: "loose".to_string(), ..Default::default() })
            .await
            .unwrap();

        let owned = cluster.list_services(&stack_label_filter("st-1")).await.unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].spec.name, "web");

        let all = cluster.list_services(&LabelFilter::new()).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn duplicate_service_name_is_rejected() {
        let cluster = LocalCluster::new();
        cluster.create_service(labeled_service("web", "st-1")).await.unwrap();

        let err = cluster
            .create_service(ServiceSpec { name: "web".to_string(), ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, StackdError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn stale_update_fails_with_version_mismatch() {
        let cluster = LocalCluster::new();
        let id = cluster.create_service(labeled_service("web", "st-1")).await.unwrap();
        cluster.update_service(&id, 1, labeled_service("web", "st-1")).await.unwrap();

        let err =
            cluster.update_service(&id, 1, labeled_service("web", "st-1")).await.unwrap_err();
        assert!(err.is_version_mismatch());
    }

    #[tokio::test]
    async fn mutations_emit_events() {
        let cluster = LocalCluster::new();
        let mut events = cluster.watch();

        let id = cluster.create_service(labeled_service("web", "st-1")).await.unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, ReconcileKind::Service);
        assert_eq!(event.action, EventAction::Create);
        assert_eq!(event.actor_id, id);
    }
}
