//! In-memory stack and snapshot storage.
//!
//! The snapshot store is the reconciler's durable-enough memory between
//! passes. It is process-local: the reconciler recovers after a restart by
//! re-reading downstream state, so nothing here needs to outlive the
//! process. Snapshot updates are version-guarded; the guard is the only
//! concurrency-control primitive the reconciler relies on.

use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Result, StackdError};
use crate::types::{
    Meta, SnapshotStack, Stack, StackCreateResponse, StackSpec,
};

/// Keyed map of stacks and their goal snapshots with optimistic concurrency.
#[derive(Default)]
pub struct StackStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    stacks: HashMap<String, Stack>,
    snapshots: HashMap<String, SnapshotStack>,
    next_id: u64,
}

impl StackStore {
    pub fn new() -> Self {
        // Don't start IDs from 0, to catch uninitialized references.
        Self { inner: RwLock::new(Inner { next_id: 1, ..Default::default() }) }
    }

    /// Create a stack and seed its initial snapshot.
    pub async fn create_stack(&self, spec: StackSpec) -> Result<StackCreateResponse> {
        validate_spec(&spec)?;

        let mut inner = self.inner.write().await;
        let id = format!("st-{}", inner.next_id);
        inner.next_id += 1;

        let stack = Stack { id: id.clone(), name: spec.name.clone(), version: 1, spec };
        let snapshot = SnapshotStack {
            id: id.clone(),
            name: stack.name.clone(),
            meta: Meta { version: 1 },
            current_spec: stack.spec.clone(),
            previous_spec: StackSpec::default(),
            ..Default::default()
        };

        inner.snapshots.insert(id.clone(), snapshot);
        inner.stacks.insert(id.clone(), stack);

        debug!(stack_id = %id, "created stack");
        Ok(StackCreateResponse { id })
    }

    pub async fn get_stack(&self, id: &str) -> Result<Stack> {
        let inner = self.inner.read().await;
        inner.stacks.get(id).cloned().ok_or_else(|| StackdError::not_found("stack", id))
    }

    pub async fn list_stacks(&self) -> Result<Vec<Stack>> {
        let inner = self.inner.read().await;
        Ok(inner.stacks.values().cloned().collect())
    }

    /// Replace a stack's spec, guarded by the stored version. The snapshot's
    /// spec pair rotates so the reconciler observes the new goal on its next
    /// fresh read.
    pub async fn update_stack(&self, id: &str, spec: StackSpec, version: u64) -> Result<()> {
        validate_spec(&spec)?;

        let mut inner = self.inner.write().await;
        let stack =
            inner.stacks.get_mut(id).ok_or_else(|| StackdError::not_found("stack", id))?;
        if stack.version != version {
            return Err(StackdError::VersionMismatch {
                id: id.to_string(),
                expected: version,
                stored: stack.version,
            });
        }
        stack.version += 1;
        stack.name = spec.name.clone();
        stack.spec = spec.clone();

        if let Some(snapshot) = inner.snapshots.get_mut(id) {
            snapshot.previous_spec = std::mem::replace(&mut snapshot.current_spec, spec);
            snapshot.name = snapshot.current_spec.name.clone();
            snapshot.meta.version += 1;
        }
        Ok(())
    }

    /// Delete a stack. The snapshot stays behind: the reconciler tears down
    /// the owned resources against an empty declared set and removes the
    /// snapshot itself afterwards.
    pub async fn delete_stack(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.stacks.remove(id);
        Ok(())
    }

    pub async fn get_snapshot_stack(&self, id: &str) -> Result<SnapshotStack> {
        let inner = self.inner.read().await;
        inner.snapshots.get(id).cloned().ok_or_else(|| StackdError::not_found("snapshot", id))
    }

    /// Commit a snapshot if `version` matches the stored revision. On
    /// success the stored revision advances and the stored value is
    /// returned; on mismatch the caller refetches and retries.
    pub async fn update_snapshot_stack(
        &self,
        id: &str,
        mut snapshot: SnapshotStack,
        version: u64,
    ) -> Result<SnapshotStack> {
        let mut inner = self.inner.write().await;
        let stored =
            inner.snapshots.get_mut(id).ok_or_else(|| StackdError::not_found("snapshot", id))?;
        if stored.meta.version != version {
            metrics::counter!("stackd_snapshot_conflicts_total").increment(1);
            return Err(StackdError::VersionMismatch {
                id: id.to_string(),
                expected: version,
                stored: stored.meta.version,
            });
        }
        snapshot.meta.version = version + 1;
        *stored = snapshot;
        Ok(stored.clone())
    }

    pub async fn delete_snapshot_stack(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.snapshots.remove(id);
        Ok(())
    }
}

/// Reject specs with unnamed or colliding children. Every declared name must
/// be unique within its kind within the stack.
fn validate_spec(spec: &StackSpec) -> Result<()> {
    let mut check = |kind: &str, names: Vec<&str>| -> Result<()> {
        let mut seen = std::collections::BTreeSet::new();
        for name in names {
            if name.is_empty() {
                return Err(StackdError::invalid_argument(format!("{kind} with empty name")));
            }
            if !seen.insert(name) {
                return Err(StackdError::invalid_argument(format!(
                    "duplicate {kind} name {name:?}"
                )));
            }
        }
        Ok(())
    };

    check("service", spec.services.iter().map(|s| s.name.as_str()).collect())?;
    check("secret", spec.secrets.iter().map(|s| s.name.as_str()).collect())?;
    check("config", spec.configs.iter().map(|c| c.name.as_str()).collect())?;
    check("network", spec.networks.keys().map(String::as_str).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServiceSpec;

    fn spec_with_service(stack: &str, service: &str) -> StackSpec {
        StackSpec {
            name: stack.to_string(),
            services: vec![ServiceSpec { name: service.to_string(), ..Default::default() }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_seeds_snapshot() {
        let store = StackStore::new();
        let created = store.create_stack(spec_with_service("app", "web")).await.unwrap();

        let snapshot = store.get_snapshot_stack(&created.id).await.unwrap();
        assert_eq!(snapshot.id, created.id);
        assert_eq!(snapshot.name, "app");
        assert_eq!(snapshot.meta.version, 1);
        assert_eq!(snapshot.current_spec.services[0].name, "web");
        assert!(snapshot.services.is_empty());
    }

    #[tokio::test]
    async fn snapshot_update_is_version_guarded() {
        let store = StackStore::new();
        let created = store.create_stack(spec_with_service("app", "web")).await.unwrap();
        let snapshot = store.get_snapshot_stack(&created.id).await.unwrap();

        let stored = store
            .update_snapshot_stack(&created.id, snapshot.clone(), snapshot.meta.version)
            .await
            .unwrap();
        assert_eq!(stored.meta.version, 2);

        // A stale commit must fail with a version mismatch.
        let err = store
            .update_snapshot_stack(&created.id, snapshot.clone(), snapshot.meta.version)
            .await
            .unwrap_err();
        assert!(err.is_version_mismatch());
    }

    #[tokio::test]
    async fn update_stack_rotates_snapshot_specs() {
        let store = StackStore::new();
        let created = store.create_stack(spec_with_service("app", "web")).await.unwrap();

        store
            .update_stack(&created.id, spec_with_service("app", "api"), 1)
            .await
            .unwrap();

        let snapshot = store.get_snapshot_stack(&created.id).await.unwrap();
        assert_eq!(snapshot.current_spec.services[0].name, "api");
        assert_eq!(snapshot.previous_spec.services[0].name, "web");
        assert_eq!(snapshot.meta.version, 2);
    }

    #[tokio::test]
    async fn delete_stack_keeps_snapshot_for_teardown() {
        let store = StackStore::new();
        let created = store.create_stack(spec_with_service("app", "web")).await.unwrap();

        store.delete_stack(&created.id).await.unwrap();

        assert!(store.get_stack(&created.id).await.unwrap_err().is_not_found());
        assert!(store.get_snapshot_stack(&created.id).await.is_ok());
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let store = StackStore::new();
        let mut spec = spec_with_service("app", "web");
        spec.services.push(ServiceSpec { name: "web".to_string(), ..Default::default() });

        let err = store.create_stack(spec).await.unwrap_err();
        assert!(matches!(err, StackdError::InvalidArgument { .. }));
    }
}
