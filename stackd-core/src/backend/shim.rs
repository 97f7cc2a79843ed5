//! Standalone backend shim.
//!
//! `BackendApiShim` is the `BackendClient` implementation used by the
//! standalone deployment: stack CRUD is served by the in-process
//! `StackStore`, resource CRUD is delegated to the wrapped `LocalCluster`,
//! and every stack mutation fans a synthetic `stack` event into the
//! subscriber channel so the reconciler observes its own CRUD results. Only
//! one event subscriber is expected at any time.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::backend::{EventSource, LabelFilter, LocalCluster, ResourceBackend, StacksBackend};
use crate::error::Result;
use crate::events::{Event, EventAction, EventFilter, EventSubscription};
use crate::store::StackStore;
use crate::types::{
    ConfigObject, ConfigSpec, Network, NetworkSpec, ReconcileKind, Secret, SecretSpec, Service,
    ServiceSpec, SnapshotStack, Stack, StackCreateResponse, StackSpec,
};

/// Buffered stack events before a slow subscriber lags.
const STACK_EVENT_BUFFER_SIZE: usize = 64;

/// `BackendClient` for the standalone deployment: local stack storage,
/// in-memory downstream, merged event stream.
pub struct BackendApiShim {
    cluster: Arc<LocalCluster>,
    store: Arc<StackStore>,
    stack_events: broadcast::Sender<Event>,
    subscribers: Mutex<HashMap<u64, JoinHandle<()>>>,
    next_subscription: AtomicU64,
}

impl BackendApiShim {
    pub fn new(cluster: Arc<LocalCluster>, store: Arc<StackStore>) -> Self {
        let (stack_events, _) = broadcast::channel(STACK_EVENT_BUFFER_SIZE);
        Self {
            cluster,
            store,
            stack_events,
            subscribers: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    fn emit_stack_event(&self, action: EventAction, id: &str) {
        // Ignore send errors (no subscribers).
        let _ = self.stack_events.send(Event::new(ReconcileKind::Stack, action, id));
    }
}

#[async_trait]
impl StacksBackend for BackendApiShim {
    async fn create_stack(&self, spec: StackSpec) -> Result<StackCreateResponse> {
        let response = self.store.create_stack(spec).await?;
        self.emit_stack_event(EventAction::Create, &response.id);
        Ok(response)
    }

    async fn get_stack(&self, id: &str) -> Result<Stack> {
        self.store.get_stack(id).await
    }

    async fn list_stacks(&self) -> Result<Vec<Stack>> {
        self.store.list_stacks().await
    }

    async fn update_stack(&self, id: &str, spec: StackSpec, version: u64) -> Result<()> {
        self.store.update_stack(id, spec, version).await?;
        self.emit_stack_event(EventAction::Update, id);
        Ok(())
    }

    async fn delete_stack(&self, id: &str) -> Result<()> {
        self.store.delete_stack(id).await?;
        self.emit_stack_event(EventAction::Delete, id);
        Ok(())
    }

    async fn get_snapshot_stack(&self, id: &str) -> Result<SnapshotStack> {
        self.store.get_snapshot_stack(id).await
    }

    async fn update_snapshot_stack(
        &self,
        id: &str,
        snapshot: SnapshotStack,
        version: u64,
    ) -> Result<SnapshotStack> {
        self.store.update_snapshot_stack(id, snapshot, version).await
    }

    async fn delete_snapshot_stack(&self, id: &str) -> Result<()> {
        self.store.delete_snapshot_stack(id).await
    }
}

#[async_trait]
impl ResourceBackend for BackendApiShim {
    async fn get_service(&self, id: &str) -> Result<Service> {
        self.cluster.get_service(id).await
    }

    async fn list_services(&self, filter: &LabelFilter) -> Result<Vec<Service>> {
        self.cluster.list_services(filter).await
    }

    async fn create_service(&self, spec: ServiceSpec) -> Result<String> {
        self.cluster.create_service(spec).await
    }

    async fn update_service(&self, id: &str, version: u64, spec: ServiceSpec) -> Result<()> {
        self.cluster.update_service(id, version, spec).await
    }

    async fn remove_service(&self, id: &str) -> Result<()> {
        self.cluster.remove_service(id).await
    }

    async fn get_network(&self, id: &str) -> Result<Network> {
        self.cluster.get_network(id).await
    }

    async fn list_networks(&self, filter: &LabelFilter) -> Result<Vec<Network>> {
        self.cluster.list_networks(filter).await
    }

    async fn create_network(&self, name: &str, spec: NetworkSpec) -> Result<String> {
        self.cluster.create_network(name, spec).await
    }

    async fn remove_network(&self, id: &str) -> Result<()> {
        self.cluster.remove_network(id).await
    }

    async fn get_secret(&self, id: &str) -> Result<Secret> {
        self.cluster.get_secret(id).await
    }

    async fn list_secrets(&self, filter: &LabelFilter) -> Result<Vec<Secret>> {
        self.cluster.list_secrets(filter).await
    }

    async fn create_secret(&self, spec: SecretSpec) -> Result<String> {
        self.cluster.create_secret(spec).await
    }

    async fn update_secret(&self, id: &str, version: u64, spec: SecretSpec) -> Result<()> {
        self.cluster.update_secret(id, version, spec).await
    }

    async fn remove_secret(&self, id: &str) -> Result<()> {
        self.cluster.remove_secret(id).await
    }

    async fn get_config(&self, id: &str) -> Result<ConfigObject> {
        self.cluster.get_config(id).await
    }

    async fn list_configs(&self, filter: &LabelFilter) -> Result<Vec<ConfigObject>> {
        self.cluster.list_configs(filter).await
    }

    async fn create_config(&self, spec: ConfigSpec) -> Result<String> {
        self.cluster.create_config(spec).await
    }

    async fn update_config(&self, id: &str, version: u64, spec: ConfigSpec) -> Result<()> {
        self.cluster.update_config(id, version, spec).await
    }

    async fn remove_config(&self, id: &str) -> Result<()> {
        self.cluster.remove_config(id).await
    }
}

#[async_trait]
impl EventSource for BackendApiShim {
    async fn subscribe_to_events(
        &self,
        filter: EventFilter,
    ) -> Result<(Vec<Event>, EventSubscription)> {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut stack_rx = self.stack_events.subscribe();
        let mut cluster_rx = self.cluster.watch();

        // Fan the local stack events and the downstream resource events into
        // one channel, filtered at the subscription boundary.
        let forwarder = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    event = stack_rx.recv() => match event {
                        Ok(event) => event,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(skipped = n, "stack event subscriber lagged");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    event = cluster_rx.recv() => match event {
                        Ok(event) => event,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(skipped = n, "cluster event subscriber lagged");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };
                if filter.matches(&event) && tx.send(event).is_err() {
                    break;
                }
            }
        });

        self.subscribers.lock().await.insert(id, forwarder);
        debug!(subscription_id = id, "subscribed to events");

        // Past events are delivered through the live channel; the backlog
        // slice stays empty.
        Ok((Vec::new(), EventSubscription { id, events: rx }))
    }

    async fn unsubscribe_from_events(&self, subscription_id: u64) {
        if let Some(forwarder) = self.subscribers.lock().await.remove(&subscription_id) {
            forwarder.abort();
            debug!(subscription_id, "unsubscribed from events");
        }
    }
}
