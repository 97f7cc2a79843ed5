//! Kind-pluggable algorithm layer.
//!
//! Each resource kind specializes the diff/apply contract behind
//! `AlgorithmPlugin`; the kernel owns the shared control-flow skeleton and
//! the in-progress goal set. Dispatch across kinds is a closed table keyed
//! by `ReconcileKind`, never downcasting.

use async_trait::async_trait;
use std::collections::btree_map::{Values, ValuesMut};
use std::collections::BTreeMap;
use std::sync::Arc;

use stackd_core::backend::BackendClient;
use stackd_core::error::{Result, StackdError};
use stackd_core::types::{
    ActiveResource, Labels, Mark, ReconcileKind, ReconcileResource, ResourceSpec,
    SnapshotResource, SnapshotStack, STACK_NAMESPACE_LABEL,
};

use super::config::{wrap_config, ConfigPlugin};
use super::network::{wrap_network, NetworkPlugin};
use super::secret::{wrap_secret, SecretPlugin};
use super::service::{wrap_service, ServicePlugin};

/// Kind-specific diff/apply for one stack, bound to a snapshot's declared
/// spec at construction time.
///
/// `create_resource` must inject the stack-namespace label; `delete_resource`
/// treats NotFound as success. A resource whose label does not match the
/// stack is invisible to the plugin and never mutated.
#[async_trait]
pub trait AlgorithmPlugin: Send + Sync {
    fn kind(&self) -> ReconcileKind;
    fn stack_id(&self) -> &str;

    /// Declared names for this kind in the stack spec.
    fn specified_resource_names(&self) -> Vec<String>;

    /// Declared spec for `name`, if the stack spec carries one.
    fn lookup_specified_resource(&self, name: &str) -> Option<ResourceSpec>;

    /// This kind's list in a snapshot.
    fn snapshot_resources<'a>(&self, snapshot: &'a SnapshotStack) -> &'a [SnapshotResource];

    /// Replace this kind's list in a snapshot, for committing goals.
    fn replace_snapshot_resources(
        &self,
        snapshot: &mut SnapshotStack,
        resources: Vec<SnapshotResource>,
    );

    /// Downstream resources labeled as owned by this stack.
    async fn get_active_resources(&self) -> Result<Vec<ActiveResource>>;

    /// One downstream resource by ID; fails NotFound when absent.
    async fn get_active_resource(&self, resource: &ReconcileResource) -> Result<ActiveResource>;

    /// Semantic equality between a goal's declared spec and the active
    /// downstream configuration, ignoring the stack-namespace label.
    fn has_same_configuration(&self, goal: &ReconcileResource, active: &ActiveResource) -> bool;

    async fn create_resource(&self, goal: &mut ReconcileResource) -> Result<()>;
    async fn update_resource(&self, goal: &mut ReconcileResource) -> Result<()>;
    async fn delete_resource(&self, goal: &mut ReconcileResource) -> Result<()>;
}

/// Table keyed by kind mapping to the plugin implementation.
pub fn plugin_for(
    kind: ReconcileKind,
    cli: Arc<dyn BackendClient>,
    snapshot: &SnapshotStack,
) -> Result<Box<dyn AlgorithmPlugin>> {
    match kind {
        ReconcileKind::Network => Ok(Box::new(NetworkPlugin::new(cli, snapshot))),
        ReconcileKind::Secret => Ok(Box::new(SecretPlugin::new(cli, snapshot))),
        ReconcileKind::Config => Ok(Box::new(ConfigPlugin::new(cli, snapshot))),
        ReconcileKind::Service => Ok(Box::new(ServicePlugin::new(cli, snapshot))),
        ReconcileKind::Stack => {
            Err(StackdError::invalid_argument("the stack kind has no algorithm plugin"))
        }
    }
}

/// Fetch and wrap one downstream resource without a snapshot in hand. Used
/// to resolve which stack owns the resource a sub-kind event refers to.
pub(crate) async fn active_resource_by_id(
    cli: &Arc<dyn BackendClient>,
    kind: ReconcileKind,
    id: &str,
) -> Result<ActiveResource> {
    match kind {
        ReconcileKind::Service => Ok(wrap_service(cli.get_service(id).await?)),
        ReconcileKind::Network => Ok(wrap_network(cli.get_network(id).await?)),
        ReconcileKind::Secret => Ok(wrap_secret(cli.get_secret(id).await?)),
        ReconcileKind::Config => Ok(wrap_config(cli.get_config(id).await?)),
        ReconcileKind::Stack => {
            Err(StackdError::invalid_argument("the stack kind has no active resource"))
        }
    }
}

/// The in-progress goal set of one reconcile pass, keyed by resource name.
/// Name keys keep iteration deterministic and enforce per-kind uniqueness.
pub(crate) struct GoalSet {
    goals: BTreeMap<String, ReconcileResource>,
}

impl GoalSet {
    /// Seed goals from the snapshot's committed list for the plugin's kind.
    pub fn from_snapshot(plugin: &dyn AlgorithmPlugin, snapshot: &SnapshotStack) -> Self {
        let mut goals = BTreeMap::new();
        for resource in plugin.snapshot_resources(snapshot) {
            goals.insert(
                resource.name.clone(),
                ReconcileResource {
                    kind: plugin.kind(),
                    resource: resource.clone(),
                    config: plugin.lookup_specified_resource(&resource.name),
                    mark: Mark::None,
                },
            );
        }
        Self { goals }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.goals.contains_key(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ReconcileResource> {
        self.goals.get_mut(name)
    }

    /// Register a create goal for a declared name.
    pub fn add_create_goal(&mut self, plugin: &dyn AlgorithmPlugin, name: &str) {
        self.goals.insert(
            name.to_string(),
            ReconcileResource {
                kind: plugin.kind(),
                resource: SnapshotResource { name: name.to_string(), ..Default::default() },
                config: plugin.lookup_specified_resource(name),
                mark: Mark::Create,
            },
        );
    }

    /// Register a delete goal for an active resource.
    pub fn add_remove_goal(&mut self, plugin: &dyn AlgorithmPlugin, active: &ActiveResource) {
        self.goals.insert(
            active.resource.name.clone(),
            ReconcileResource {
                kind: plugin.kind(),
                resource: active.resource.clone(),
                config: Some(active.spec.clone()),
                mark: Mark::Delete,
            },
        );
    }

    pub fn values(&self) -> Values<'_, String, ReconcileResource> {
        self.goals.values()
    }

    pub fn values_mut(&mut self) -> ValuesMut<'_, String, ReconcileResource> {
        self.goals.values_mut()
    }
}

/// Stack ID carried by a label map; empty when the resource is unowned.
pub(crate) fn label_stack_id(labels: &Labels) -> String {
    labels.get(STACK_NAMESPACE_LABEL).cloned().unwrap_or_default()
}

/// Stamp a spec's label map with the owning stack.
pub(crate) fn inject_namespace_label(labels: &mut Labels, stack_id: &str) {
    labels.insert(STACK_NAMESPACE_LABEL.to_string(), stack_id.to_string());
}

/// Label equality with the stack-namespace label masked out on both sides.
pub(crate) fn labels_equal_ignoring_namespace(a: &Labels, b: &Labels) -> bool {
    let strip = |labels: &Labels| {
        let mut labels = labels.clone();
        labels.remove(STACK_NAMESPACE_LABEL);
        labels
    };
    strip(a) == strip(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_label_is_masked_in_comparison() {
        let mut a = Labels::from([("tier".to_string(), "web".to_string())]);
        let b = a.clone();
        inject_namespace_label(&mut a, "st-1");

        assert!(labels_equal_ignoring_namespace(&a, &b));

        let c = Labels::from([("tier".to_string(), "db".to_string())]);
        assert!(!labels_equal_ignoring_namespace(&a, &c));
    }

    #[test]
    fn label_stack_id_defaults_to_empty() {
        let unowned = Labels::new();
        assert_eq!(label_stack_id(&unowned), "");

        let mut owned = Labels::new();
        inject_namespace_label(&mut owned, "st-7");
        assert_eq!(label_stack_id(&owned), "st-7");
    }
}
