//! Config plugin.

use async_trait::async_trait;
use std::sync::Arc;

use stackd_core::backend::{stack_label_filter, BackendClient};
use stackd_core::error::{Result, StackdError};
use stackd_core::types::{
    ActiveResource, ConfigObject, ConfigSpec, Meta, ReconcileKind, ReconcileResource,
    ResourceSpec, SnapshotResource, SnapshotStack, StackSpec,
};

use super::plugin::{
    inject_namespace_label, label_stack_id, labels_equal_ignoring_namespace, AlgorithmPlugin,
};

pub(crate) struct ConfigPlugin {
    cli: Arc<dyn BackendClient>,
    stack_id: String,
    stack_spec: StackSpec,
}

impl ConfigPlugin {
    pub fn new(cli: Arc<dyn BackendClient>, snapshot: &SnapshotStack) -> Self {
        Self { cli, stack_id: snapshot.id.clone(), stack_spec: snapshot.current_spec.clone() }
    }

    fn lookup_config_spec(&self, name: &str) -> Option<&ConfigSpec> {
        self.stack_spec.configs.iter().find(|spec| spec.name == name)
    }

    fn owned_spec(&self, goal: &ReconcileResource) -> Result<ConfigSpec> {
        match &goal.config {
            Some(ResourceSpec::Config(spec)) => {
                let mut spec = spec.clone();
                inject_namespace_label(&mut spec.labels, &self.stack_id);
                Ok(spec)
            }
            _ => Err(StackdError::invalid_argument(format!(
                "config goal {:?} carries no config spec",
                goal.resource.name
            ))),
        }
    }
}

pub(crate) fn wrap_config(config: ConfigObject) -> ActiveResource {
    let ConfigObject { id, version, spec } = config;
    ActiveResource {
        resource: SnapshotResource { id, name: spec.name.clone(), meta: Meta { version } },
        stack_id: label_stack_id(&spec.labels),
        spec: ResourceSpec::Config(spec),
    }
}

#[async_trait]
impl AlgorithmPlugin for ConfigPlugin {
    fn kind(&self) -> ReconcileKind {
        ReconcileKind::Config
    }

    fn stack_id(&self) -> &str {
        &self.stack_id
    }

    fn specified_resource_names(&self) -> Vec<String> {
        self.stack_spec.configs.iter().map(|spec| spec.name.clone()).collect()
    }

    fn lookup_specified_resource(&self, name: &str) -> Option<ResourceSpec> {
        self.lookup_config_spec(name).map(|spec| ResourceSpec::Config(spec.clone()))
    }

    fn snapshot_resources<'a>(&self, snapshot: &'a SnapshotStack) -> &'a [SnapshotResource] {
        &snapshot.configs
    }

    fn replace_snapshot_resources(
        &self,
        snapshot: &mut SnapshotStack,
        resources: Vec<SnapshotResource>,
    ) {
        snapshot.configs = resources;
    }

    async fn get_active_resources(&self) -> Result<Vec<ActiveResource>> {
        let configs = self.cli.list_configs(&stack_label_filter(&self.stack_id)).await?;
        Ok(configs.into_iter().map(wrap_config).collect())
    }

    async fn get_active_resource(&self, resource: &ReconcileResource) -> Result<ActiveResource> {
        Ok(wrap_config(self.cli.get_config(&resource.resource.id).await?))
    }

    fn has_same_configuration(&self, goal: &ReconcileResource, active: &ActiveResource) -> bool {
        match (&goal.config, &active.spec) {
            (Some(ResourceSpec::Config(declared)), ResourceSpec::Config(actual)) => {
                declared.name == actual.name
                    && labels_equal_ignoring_namespace(&declared.labels, &actual.labels)
                    && declared.data == actual.data
                    && declared.templating == actual.templating
            }
            _ => false,
        }
    }

    async fn create_resource(&self, goal: &mut ReconcileResource) -> Result<()> {
        let spec = self.owned_spec(goal)?;
        goal.resource.id = self.cli.create_config(spec).await?;
        Ok(())
    }

    async fn update_resource(&self, goal: &mut ReconcileResource) -> Result<()> {
        let spec = self.owned_spec(goal)?;
        self.cli.update_config(&goal.resource.id, goal.resource.meta.version, spec).await?;
        goal.resource.meta.version += 1;
        Ok(())
    }

    async fn delete_resource(&self, goal: &mut ReconcileResource) -> Result<()> {
        match self.cli.remove_config(&goal.resource.id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        goal.resource.id.clear();
        Ok(())
    }
}
