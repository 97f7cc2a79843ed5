//! Secret plugin.

use async_trait::async_trait;
use std::sync::Arc;

use stackd_core::backend::{stack_label_filter, BackendClient};
use stackd_core::error::{Result, StackdError};
use stackd_core::types::{
    ActiveResource, Meta, ReconcileKind, ReconcileResource, ResourceSpec, Secret, SecretSpec,
    SnapshotResource, SnapshotStack, StackSpec,
};

use super::plugin::{
    inject_namespace_label, label_stack_id, labels_equal_ignoring_namespace, AlgorithmPlugin,
};

pub(crate) struct SecretPlugin {
    cli: Arc<dyn BackendClient>,
    stack_id: String,
    stack_spec: StackSpec,
}

impl SecretPlugin {
    pub fn new(cli: Arc<dyn BackendClient>, snapshot: &SnapshotStack) -> Self {
        Self { cli, stack_id: snapshot.id.clone(), stack_spec: snapshot.current_spec.clone() }
    }

    fn lookup_secret_spec(&self, name: &str) -> Option<&SecretSpec> {
        self.stack_spec.secrets.iter().find(|spec| spec.name == name)
    }

    fn owned_spec(&self, goal: &ReconcileResource) -> Result<SecretSpec> {
        match &goal.config {
            Some(ResourceSpec::Secret(spec)) => {
                let mut spec = spec.clone();
                inject_namespace_label(&mut spec.labels, &self.stack_id);
                Ok(spec)
            }
            _ => Err(StackdError::invalid_argument(format!(
                "secret goal {:?} carries no secret spec",
                goal.resource.name
            ))),
        }
    }
}

pub(crate) fn wrap_secret(secret: Secret) -> ActiveResource {
    let Secret { id, version, spec } = secret;
    ActiveResource {
        resource: SnapshotResource { id, name: spec.name.clone(), meta: Meta { version } },
        stack_id: label_stack_id(&spec.labels),
        spec: ResourceSpec::Secret(spec),
    }
}

#[async_trait]
impl AlgorithmPlugin for SecretPlugin {
    fn kind(&self) -> ReconcileKind {
        ReconcileKind::Secret
    }

    fn stack_id(&self) -> &str {
        &self.stack_id
    }

    fn specified_resource_names(&self) -> Vec<String> {
        self.stack_spec.secrets.iter().map(|spec| spec.name.clone()).collect()
    }

    fn lookup_specified_resource(&self, name: &str) -> Option<ResourceSpec> {
        self.lookup_secret_spec(name).map(|spec| ResourceSpec::Secret(spec.clone()))
    }

    fn snapshot_resources<'a>(&self, snapshot: &'a SnapshotStack) -> &'a [SnapshotResource] {
        &snapshot.secrets
    }

    fn replace_snapshot_resources(
        &self,
        snapshot: &mut SnapshotStack,
        resources: Vec<SnapshotResource>,
    ) {
        snapshot.secrets = resources;
    }

    async fn get_active_resources(&self) -> Result<Vec<ActiveResource>> {
        let secrets = self.cli.list_secrets(&stack_label_filter(&self.stack_id)).await?;
        Ok(secrets.into_iter().map(wrap_secret).collect())
    }

    async fn get_active_resource(&self, resource: &ReconcileResource) -> Result<ActiveResource> {
        Ok(wrap_secret(self.cli.get_secret(&resource.resource.id).await?))
    }

    fn has_same_configuration(&self, goal: &ReconcileResource, active: &ActiveResource) -> bool {
        match (&goal.config, &active.spec) {
            (Some(ResourceSpec::Secret(declared)), ResourceSpec::Secret(actual)) => {
                declared.name == actual.name
                    && labels_equal_ignoring_namespace(&declared.labels, &actual.labels)
                    && declared.data == actual.data
                    && declared.driver == actual.driver
                    && declared.templating == actual.templating
            }
            _ => false,
        }
    }

    async fn create_resource(&self, goal: &mut ReconcileResource) -> Result<()> {
        let spec = self.owned_spec(goal)?;
        goal.resource.id = self.cli.create_secret(spec).await?;
        Ok(())
    }

    async fn update_resource(&self, goal: &mut ReconcileResource) -> Result<()> {
        let spec = self.owned_spec(goal)?;
        self.cli.update_secret(&goal.resource.id, goal.resource.meta.version, spec).await?;
        goal.resource.meta.version += 1;
        Ok(())
    }

    async fn delete_resource(&self, goal: &mut ReconcileResource) -> Result<()> {
        match self.cli.remove_secret(&goal.resource.id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        goal.resource.id.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::dispatcher::Reconciler;
    use crate::reconciler::kernel::{ReconcileKernel, DEFAULT_COMMIT_RETRIES};
    use stackd_core::backend::{BackendApiShim, LocalCluster, ResourceBackend, StacksBackend};
    use stackd_core::store::StackStore;
    use stackd_core::types::{Driver, Mark, ReconcileResource, SnapshotResource};

    fn token_stack_spec() -> StackSpec {
        StackSpec {
            name: "app".to_string(),
            secrets: vec![SecretSpec {
                name: "token".to_string(),
                data: b"hunter2".to_vec(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    async fn fixture() -> (Arc<dyn BackendClient>, SnapshotStack) {
        let cli: Arc<dyn BackendClient> = Arc::new(BackendApiShim::new(
            Arc::new(LocalCluster::new()),
            Arc::new(StackStore::new()),
        ));
        let created = cli.create_stack(token_stack_spec()).await.unwrap();
        let snapshot = cli.get_snapshot_stack(&created.id).await.unwrap();
        (cli, snapshot)
    }

    fn create_goal(plugin: &SecretPlugin, name: &str) -> ReconcileResource {
        ReconcileResource {
            kind: ReconcileKind::Secret,
            resource: SnapshotResource { name: name.to_string(), ..Default::default() },
            config: plugin.lookup_specified_resource(name),
            mark: Mark::Create,
        }
    }

    #[tokio::test]
    async fn changed_data_is_not_same() {
        let (cli, snapshot) = fixture().await;
        let plugin = SecretPlugin::new(cli.clone(), &snapshot);

        let mut goal = create_goal(&plugin, "token");
        plugin.create_resource(&mut goal).await.unwrap();

        let active = plugin.get_active_resource(&goal).await.unwrap();
        assert!(plugin.has_same_configuration(&goal, &active));

        let mut drifted = cli.get_secret(&goal.resource.id).await.unwrap().spec;
        drifted.data = b"swordfish".to_vec();
        cli.update_secret(&goal.resource.id, 1, drifted).await.unwrap();

        let active = plugin.get_active_resource(&goal).await.unwrap();
        assert!(!plugin.has_same_configuration(&goal, &active));
    }

    #[tokio::test]
    async fn changed_driver_is_not_same() {
        let (cli, snapshot) = fixture().await;
        let plugin = SecretPlugin::new(cli.clone(), &snapshot);

        let mut goal = create_goal(&plugin, "token");
        plugin.create_resource(&mut goal).await.unwrap();

        let mut drifted = cli.get_secret(&goal.resource.id).await.unwrap().spec;
        drifted.driver = Some(Driver { name: "vault".to_string(), ..Default::default() });
        cli.update_secret(&goal.resource.id, 1, drifted).await.unwrap();

        let active = plugin.get_active_resource(&goal).await.unwrap();
        assert!(!plugin.has_same_configuration(&goal, &active));
    }

    #[tokio::test]
    async fn drifted_secret_is_updated_in_place() {
        let (cli, snapshot) = fixture().await;
        let kernel = ReconcileKernel::new(cli.clone(), DEFAULT_COMMIT_RETRIES);
        let request = ReconcileResource::request(ReconcileKind::Stack, &snapshot.id);
        kernel.reconcile(&request).await.unwrap();

        let secrets = cli.list_secrets(&stack_label_filter(&snapshot.id)).await.unwrap();
        let secret = &secrets[0];
        let mut drifted = secret.spec.clone();
        drifted.data = b"swordfish".to_vec();
        cli.update_secret(&secret.id, secret.version, drifted).await.unwrap();

        kernel.reconcile(&request).await.unwrap();

        // One update on top of the drift revision: same identity, declared
        // data restored, no delete/create churn.
        let updated = cli.get_secret(&secret.id).await.unwrap();
        assert_eq!(updated.version, 3);
        assert_eq!(updated.spec.data, b"hunter2".to_vec());
        assert_eq!(
            cli.list_secrets(&stack_label_filter(&snapshot.id)).await.unwrap().len(),
            1
        );
    }
}
