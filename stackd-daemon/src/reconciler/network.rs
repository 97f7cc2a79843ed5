//! Network plugin.
//!
//! Networks are immutable downstream: the API offers no update operation,
//! so configuration comparison always reports `Same` and a drifted declared
//! spec is surfaced as a warning instead of being silently dropped.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use stackd_core::backend::{stack_label_filter, BackendClient};
use stackd_core::error::{Result, StackdError};
use stackd_core::types::{
    ActiveResource, Network, NetworkSpec, ReconcileKind, ReconcileResource, ResourceSpec,
    SnapshotResource, SnapshotStack, StackSpec,
};

use super::plugin::{
    inject_namespace_label, label_stack_id, labels_equal_ignoring_namespace, AlgorithmPlugin,
};

pub(crate) struct NetworkPlugin {
    cli: Arc<dyn BackendClient>,
    stack_id: String,
    stack_spec: StackSpec,
}

impl NetworkPlugin {
    pub fn new(cli: Arc<dyn BackendClient>, snapshot: &SnapshotStack) -> Self {
        Self { cli, stack_id: snapshot.id.clone(), stack_spec: snapshot.current_spec.clone() }
    }

    fn lookup_network_spec(&self, name: &str) -> Option<&NetworkSpec> {
        self.stack_spec.networks.get(name)
    }
}

pub(crate) fn wrap_network(network: Network) -> ActiveResource {
    let Network { id, name, spec } = network;
    ActiveResource {
        resource: SnapshotResource { id, name, ..Default::default() },
        stack_id: label_stack_id(&spec.labels),
        spec: ResourceSpec::Network(spec),
    }
}

#[async_trait]
impl AlgorithmPlugin for NetworkPlugin {
    fn kind(&self) -> ReconcileKind {
        ReconcileKind::Network
    }

    fn stack_id(&self) -> &str {
        &self.stack_id
    }

    fn specified_resource_names(&self) -> Vec<String> {
        self.stack_spec.networks.keys().cloned().collect()
    }

    fn lookup_specified_resource(&self, name: &str) -> Option<ResourceSpec> {
        self.lookup_network_spec(name).map(|spec| ResourceSpec::Network(spec.clone()))
    }

    fn snapshot_resources<'a>(&self, snapshot: &'a SnapshotStack) -> &'a [SnapshotResource] {
        &snapshot.networks
    }

    fn replace_snapshot_resources(
        &self,
        snapshot: &mut SnapshotStack,
        resources: Vec<SnapshotResource>,
    ) {
        snapshot.networks = resources;
    }

    async fn get_active_resources(&self) -> Result<Vec<ActiveResource>> {
        let networks = self.cli.list_networks(&stack_label_filter(&self.stack_id)).await?;
        Ok(networks.into_iter().map(wrap_network).collect())
    }

    async fn get_active_resource(&self, resource: &ReconcileResource) -> Result<ActiveResource> {
        Ok(wrap_network(self.cli.get_network(&resource.resource.id).await?))
    }

    fn has_same_configuration(&self, goal: &ReconcileResource, active: &ActiveResource) -> bool {
        if let (Some(ResourceSpec::Network(declared)), ResourceSpec::Network(actual)) =
            (&goal.config, &active.spec)
        {
            let same = declared.driver == actual.driver
                && declared.options == actual.options
                && declared.attachable == actual.attachable
                && labels_equal_ignoring_namespace(&declared.labels, &actual.labels);
            if !same {
                warn!(
                    network = %goal.resource.name,
                    stack_id = %self.stack_id,
                    "declared network spec differs from the active network; networks cannot be updated in place"
                );
            }
        }
        true
    }

    async fn create_resource(&self, goal: &mut ReconcileResource) -> Result<()> {
        let Some(ResourceSpec::Network(spec)) = &goal.config else {
            return Err(StackdError::invalid_argument(format!(
                "network goal {:?} carries no network spec",
                goal.resource.name
            )));
        };
        let mut spec = spec.clone();
        inject_namespace_label(&mut spec.labels, &self.stack_id);
        goal.resource.id = self.cli.create_network(&goal.resource.name, spec).await?;
        Ok(())
    }

    async fn update_resource(&self, _goal: &mut ReconcileResource) -> Result<()> {
        // No network-update operation downstream.
        Ok(())
    }

    async fn delete_resource(&self, goal: &mut ReconcileResource) -> Result<()> {
        match self.cli.remove_network(&goal.resource.id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        goal.resource.id.clear();
        Ok(())
    }
}
