//! Service plugin.

use async_trait::async_trait;
use std::sync::Arc;

use stackd_core::backend::{stack_label_filter, BackendClient};
use stackd_core::error::{Result, StackdError};
use stackd_core::types::{
    ActiveResource, Meta, ReconcileKind, ReconcileResource, ResourceSpec, Service, ServiceSpec,
    SnapshotResource, SnapshotStack, StackSpec,
};

use super::plugin::{
    inject_namespace_label, label_stack_id, labels_equal_ignoring_namespace, AlgorithmPlugin,
};

pub(crate) struct ServicePlugin {
    cli: Arc<dyn BackendClient>,
    stack_id: String,
    stack_spec: StackSpec,
}

impl ServicePlugin {
    pub fn new(cli: Arc<dyn BackendClient>, snapshot: &SnapshotStack) -> Self {
        Self { cli, stack_id: snapshot.id.clone(), stack_spec: snapshot.current_spec.clone() }
    }

    fn lookup_service_spec(&self, name: &str) -> Option<&ServiceSpec> {
        self.stack_spec.services.iter().find(|spec| spec.name == name)
    }

    /// The declared spec of a goal, stamped with the stack-namespace label.
    fn owned_spec(&self, goal: &ReconcileResource) -> Result<ServiceSpec> {
        match &goal.config {
            Some(ResourceSpec::Service(spec)) => {
                let mut spec = spec.clone();
                inject_namespace_label(&mut spec.labels, &self.stack_id);
                Ok(spec)
            }
            _ => Err(StackdError::invalid_argument(format!(
                "service goal {:?} carries no service spec",
                goal.resource.name
            ))),
        }
    }
}

pub(crate) fn wrap_service(service: Service) -> ActiveResource {
    let Service { id, version, spec } = service;
    ActiveResource {
        resource: SnapshotResource { id, name: spec.name.clone(), meta: Meta { version } },
        stack_id: label_stack_id(&spec.labels),
        spec: ResourceSpec::Service(spec),
    }
}

#[async_trait]
impl AlgorithmPlugin for ServicePlugin {
    fn kind(&self) -> ReconcileKind {
        ReconcileKind::Service
    }

    fn stack_id(&self) -> &str {
        &self.stack_id
    }

    fn specified_resource_names(&self) -> Vec<String> {
        self.stack_spec.services.iter().map(|spec| spec.name.clone()).collect()
    }

    fn lookup_specified_resource(&self, name: &str) -> Option<ResourceSpec> {
        self.lookup_service_spec(name).map(|spec| ResourceSpec::Service(spec.clone()))
    }

    fn snapshot_resources<'a>(&self, snapshot: &'a SnapshotStack) -> &'a [SnapshotResource] {
        &snapshot.services
    }

    fn replace_snapshot_resources(
        &self,
        snapshot: &mut SnapshotStack,
        resources: Vec<SnapshotResource>,
    ) {
        snapshot.services = resources;
    }

    async fn get_active_resources(&self) -> Result<Vec<ActiveResource>> {
        let services = self.cli.list_services(&stack_label_filter(&self.stack_id)).await?;
        Ok(services.into_iter().map(wrap_service).collect())
    }

    async fn get_active_resource(&self, resource: &ReconcileResource) -> Result<ActiveResource> {
        Ok(wrap_service(self.cli.get_service(&resource.resource.id).await?))
    }

    fn has_same_configuration(&self, goal: &ReconcileResource, active: &ActiveResource) -> bool {
        match (&goal.config, &active.spec) {
            (Some(ResourceSpec::Service(declared)), ResourceSpec::Service(actual)) => {
                declared.name == actual.name
                    && labels_equal_ignoring_namespace(&declared.labels, &actual.labels)
                    && declared.task_template == actual.task_template
                    && declared.mode == actual.mode
                    && declared.update_config == actual.update_config
                    && declared.rollback_config == actual.rollback_config
                    && declared.networks == actual.networks
                    && declared.endpoint == actual.endpoint
            }
            _ => false,
        }
    }

    async fn create_resource(&self, goal: &mut ReconcileResource) -> Result<()> {
        let spec = self.owned_spec(goal)?;
        goal.resource.id = self.cli.create_service(spec).await?;
        Ok(())
    }

    async fn update_resource(&self, goal: &mut ReconcileResource) -> Result<()> {
        let spec = self.owned_spec(goal)?;
        self.cli.update_service(&goal.resource.id, goal.resource.meta.version, spec).await?;
        goal.resource.meta.version += 1;
        Ok(())
    }

    async fn delete_resource(&self, goal: &mut ReconcileResource) -> Result<()> {
        match self.cli.remove_service(&goal.resource.id).await {
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
    use stackd_core::backend::{BackendApiShim, LocalCluster, ResourceBackend, StacksBackend};
    use stackd_core::store::StackStore;
    use stackd_core::types::{Mark, TaskTemplate, STACK_NAMESPACE_LABEL};

    fn web_spec() -> StackSpec {
        StackSpec {
            name: "app".to_string(),
            services: vec![ServiceSpec {
                name: "web".to_string(),
                task_template: TaskTemplate {
                    image: "nginx:latest".to_string(),
                    ..Default::default()
                },
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
        let created = cli.create_stack(web_spec()).await.unwrap();
        let snapshot = cli.get_snapshot_stack(&created.id).await.unwrap();
        (cli, snapshot)
    }

    fn create_goal(plugin: &ServicePlugin, name: &str) -> ReconcileResource {
        ReconcileResource {
            kind: ReconcileKind::Service,
            resource: SnapshotResource { name: name.to_string(), ..Default::default() },
            config: plugin.lookup_specified_resource(name),
            mark: Mark::Create,
        }
    }

    #[tokio::test]
    async fn missing_spec_lookup_returns_none() {
        let (cli, snapshot) = fixture().await;
        let plugin = ServicePlugin::new(cli, &snapshot);
        assert!(plugin.lookup_specified_resource("missing").is_none());
    }

    #[tokio::test]
    async fn create_injects_the_namespace_label() {
        let (cli, snapshot) = fixture().await;
        let plugin = ServicePlugin::new(cli.clone(), &snapshot);

        let mut goal = create_goal(&plugin, "web");
        plugin.create_resource(&mut goal).await.unwrap();
        assert!(!goal.resource.id.is_empty());

        let service = cli.get_service(&goal.resource.id).await.unwrap();
        assert_eq!(service.spec.labels.get(STACK_NAMESPACE_LABEL), Some(&snapshot.id));
    }

    #[tokio::test]
    async fn unlabeled_resources_are_invisible() {
        let (cli, snapshot) = fixture().await;
        cli.create_service(ServiceSpec { name: "loose".to_string(), ..Default::default() })
            .await
            .unwrap();

        let plugin = ServicePlugin::new(cli, &snapshot);
        assert!(plugin.get_active_resources().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_treats_not_found_as_success() {
        let (cli, snapshot) = fixture().await;
        let plugin = ServicePlugin::new(cli, &snapshot);

        let mut goal = create_goal(&plugin, "web");
        goal.resource.id = "svc-999".to_string();
        goal.mark = Mark::Delete;

        plugin.delete_resource(&mut goal).await.unwrap();
        assert!(goal.resource.id.is_empty());
    }

    #[tokio::test]
    async fn comparison_ignores_the_namespace_label() {
        let (cli, snapshot) = fixture().await;
        let plugin = ServicePlugin::new(cli.clone(), &snapshot);

        let mut goal = create_goal(&plugin, "web");
        plugin.create_resource(&mut goal).await.unwrap();

        let active = plugin.get_active_resource(&goal).await.unwrap();
        assert!(plugin.has_same_configuration(&goal, &active));
    }

    #[tokio::test]
    async fn changed_task_template_is_not_same() {
        let (cli, snapshot) = fixture().await;
        let plugin = ServicePlugin::new(cli.clone(), &snapshot);

        let mut goal = create_goal(&plugin, "web");
        plugin.create_resource(&mut goal).await.unwrap();

        let mut drifted = match plugin.lookup_specified_resource("web") {
            Some(ResourceSpec::Service(spec)) => spec,
            _ => unreachable!("web is declared"),
        };
        drifted.task_template.image = "nginx:1.27".to_string();
        cli.update_service(&goal.resource.id, 1, drifted).await.unwrap();

        let active = plugin.get_active_resource(&goal).await.unwrap();
        assert!(!plugin.has_same_configuration(&goal, &active));
    }
}
