//! The reconcile kernel.
//!
//! Per request, diffs the declared spec against the active downstream state
//! through a kind plugin and issues the minimal create/update/delete set.
//! Every pass ends in a version-guarded snapshot commit; a conflict reloads
//! the snapshot and recomputes, bounded by the commit-retry limit. The
//! kernel runs serially under one dispatcher, which is what keeps per-stack
//! state consistent without plugin-level locking.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use stackd_core::backend::BackendClient;
use stackd_core::error::{Result, StackdError};
use stackd_core::types::{
    Mark, Meta, ReconcileKind, ReconcileResource, SnapshotResource, SnapshotStack,
};

use super::dispatcher::Reconciler;
use super::plugin::{active_resource_by_id, plugin_for, AlgorithmPlugin, GoalSet};

/// Canonical order the sub-kinds of a stack are reconciled in.
pub const SUB_KIND_ORDER: [ReconcileKind; 4] = [
    ReconcileKind::Network,
    ReconcileKind::Secret,
    ReconcileKind::Config,
    ReconcileKind::Service,
];

/// Default bound on attempts for a version-guarded snapshot commit.
pub const DEFAULT_COMMIT_RETRIES: u32 = 5;

/// Per-request diff loop over the kind plugins.
pub struct ReconcileKernel {
    cli: Arc<dyn BackendClient>,
    commit_retries: u32,
}

#[async_trait]
impl Reconciler for ReconcileKernel {
    async fn reconcile(&self, request: &ReconcileResource) -> Result<()> {
        debug!(kind = %request.kind, id = %request.resource.id, "reconciling");
        match request.kind {
            ReconcileKind::Stack => self.reconcile_stack(&request.resource.id).await,
            kind => self.reconcile_sub_kind(kind, request).await,
        }
    }
}

impl ReconcileKernel {
    pub fn new(cli: Arc<dyn BackendClient>, commit_retries: u32) -> Self {
        Self { cli, commit_retries: commit_retries.max(1) }
    }

    /// Reconcile all four sub-kinds of one stack in canonical order, each
    /// pass threading the freshly committed snapshot into the next.
    async fn reconcile_stack(&self, stack_id: &str) -> Result<()> {
        match self.cli.get_stack(stack_id).await {
            Ok(_) => {
                let mut snapshot = self.cli.get_snapshot_stack(stack_id).await?;
                for kind in SUB_KIND_ORDER {
                    snapshot = self.reconcile_kind(kind, snapshot).await?;
                }
                Ok(())
            }
            Err(e) if e.is_not_found() => self.teardown_stack(stack_id).await,
            Err(e) => Err(e),
        }
    }

    /// A deleted stack converges by reconciling every sub-kind against an
    /// empty declared set, then dropping the snapshot.
    async fn teardown_stack(&self, stack_id: &str) -> Result<()> {
        let mut snapshot = match self.cli.get_snapshot_stack(stack_id).await {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        info!(stack_id = %stack_id, "stack deleted, tearing down owned resources");

        // Commit the emptied goal first so a conflict-driven refetch cannot
        // resurrect the old spec mid-teardown.
        let mut attempt = 0;
        let mut snapshot = loop {
            let mut emptied = snapshot.clone();
            emptied.previous_spec = std::mem::take(&mut emptied.current_spec);
            emptied.current_spec.name = emptied.name.clone();
            let version = emptied.meta.version;
            match self.cli.update_snapshot_stack(stack_id, emptied, version).await {
                Ok(stored) => break stored,
                Err(e) if e.is_version_mismatch() && attempt + 1 < self.commit_retries => {
                    attempt += 1;
                    snapshot = self.cli.get_snapshot_stack(stack_id).await?;
                }
                Err(e) => return Err(e),
            }
        };

        // Dependents go first: the reverse of the creation order.
        for kind in SUB_KIND_ORDER.iter().rev() {
            snapshot = self.reconcile_kind(*kind, snapshot).await?;
        }
        self.cli.delete_snapshot_stack(stack_id).await
    }

    /// Reconcile one kind for the stack that owns the referenced resource.
    async fn reconcile_sub_kind(
        &self,
        kind: ReconcileKind,
        request: &ReconcileResource,
    ) -> Result<()> {
        let Some(stack_id) = self.resolve_owner(kind, &request.resource.id).await? else {
            debug!(kind = %kind, id = %request.resource.id, "no owning stack, nothing to reconcile");
            return Ok(());
        };
        let snapshot = match self.cli.get_snapshot_stack(&stack_id).await {
            Ok(snapshot) => snapshot,
            // Already removed, a future event covers whatever comes next.
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        self.reconcile_kind(kind, snapshot).await.map(|_| ())
    }

    /// The stack owning the referenced resource: from the active resource's
    /// namespace label while it exists, otherwise from the snapshot listing
    /// its ID. Resources without the label are never touched.
    async fn resolve_owner(&self, kind: ReconcileKind, id: &str) -> Result<Option<String>> {
        match active_resource_by_id(&self.cli, kind, id).await {
            Ok(active) if active.stack_id.is_empty() => {
                debug!(kind = %kind, id = %id, "resource carries no stack-namespace label, ignoring");
                Ok(None)
            }
            Ok(active) => Ok(Some(active.stack_id)),
            Err(e) if e.is_not_found() => {
                for stack in self.cli.list_stacks().await? {
                    let Ok(snapshot) = self.cli.get_snapshot_stack(&stack.id).await else {
                        continue;
                    };
                    let listed = match kind {
                        ReconcileKind::Network => &snapshot.networks,
                        ReconcileKind::Secret => &snapshot.secrets,
                        ReconcileKind::Config => &snapshot.configs,
                        ReconcileKind::Service => &snapshot.services,
                        ReconcileKind::Stack => continue,
                    };
                    if listed.iter().any(|resource| resource.id == id) {
                        return Ok(Some(stack.id));
                    }
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Run passes for one kind until a pass commits cleanly, reloading the
    /// snapshot after every version conflict, bounded by the retry limit.
    async fn reconcile_kind(
        &self,
        kind: ReconcileKind,
        snapshot: SnapshotStack,
    ) -> Result<SnapshotStack> {
        let stack_id = snapshot.id.clone();
        let mut snapshot = snapshot;
        let mut attempt = 0;
        loop {
            let plugin = plugin_for(kind, self.cli.clone(), &snapshot)?;
            match self.reconcile_pass(plugin.as_ref(), &snapshot).await {
                Ok(committed) => return Ok(committed),
                Err(e) if e.is_version_mismatch() && attempt + 1 < self.commit_retries => {
                    attempt += 1;
                    debug!(
                        stack_id = %stack_id,
                        kind = %kind,
                        attempt,
                        "snapshot commit conflict, retrying with a fresh read"
                    );
                    snapshot = self.cli.get_snapshot_stack(&stack_id).await?;
                }
                Err(e) => {
                    metrics::counter!("stackd_reconcile_errors_total", "kind" => kind.as_str())
                        .increment(1);
                    return Err(e);
                }
            }
        }
    }

    /// One diff/apply pass: compute goals, apply them Delete → Create →
    /// Update, commit the surviving identities into the snapshot.
    async fn reconcile_pass(
        &self,
        plugin: &dyn AlgorithmPlugin,
        snapshot: &SnapshotStack,
    ) -> Result<SnapshotStack> {
        let mut goals = GoalSet::from_snapshot(plugin, snapshot);

        // Every declared name needs a goal; names the snapshot has never
        // seen start out as creations.
        let declared: BTreeSet<String> =
            plugin.specified_resource_names().into_iter().collect();
        for name in &declared {
            if !goals.contains(name) {
                goals.add_create_goal(plugin, name);
            }
        }

        // Match the active downstream state: declared resources adopt the
        // active identity and diff their configuration, anything labeled but
        // undeclared becomes a delete goal.
        for active in plugin.get_active_resources().await? {
            if declared.contains(&active.resource.name) {
                if let Some(goal) = goals.get_mut(&active.resource.name) {
                    goal.resource = active.resource.clone();
                    goal.mark = if plugin.has_same_configuration(goal, &active) {
                        Mark::Same
                    } else {
                        Mark::Update
                    };
                }
            } else {
                goals.add_remove_goal(plugin, &active);
            }
        }

        // Goals never matched against an active resource: declared ones are
        // recreated under a fresh identity, stale snapshot entries drop out.
        for goal in goals.values_mut() {
            if goal.mark == Mark::None {
                if declared.contains(&goal.resource.name) {
                    goal.resource.id.clear();
                    goal.resource.meta = Meta::default();
                    goal.mark = Mark::Create;
                } else {
                    goal.mark = Mark::Delete;
                }
            }
        }

        // Deletes free names and ports first; creates establish identities
        // before dependents update to reference them.
        let mut first_error: Option<StackdError> = None;
        'apply: for mark in [Mark::Delete, Mark::Create, Mark::Update] {
            for goal in goals.values_mut() {
                if goal.mark != mark {
                    continue;
                }
                let outcome = match mark {
                    Mark::Delete => plugin.delete_resource(goal).await,
                    Mark::Create => plugin.create_resource(goal).await,
                    Mark::Update => plugin.update_resource(goal).await,
                    Mark::None | Mark::Same => Ok(()),
                };
                match outcome {
                    Ok(()) => {}
                    Err(StackdError::InvalidArgument { reason }) => {
                        // Malformed goal: skip it, a later reconcile retries.
                        warn!(
                            kind = %plugin.kind(),
                            name = %goal.resource.name,
                            %reason,
                            "skipping malformed goal"
                        );
                    }
                    Err(e) => {
                        first_error = Some(e);
                        break 'apply;
                    }
                }
            }
        }

        // Commit whatever progress was recorded, even after an error; the
        // pass reports the error and a future event resumes convergence.
        let kept: Vec<SnapshotResource> = goals
            .values()
            .filter(|goal| goal.mark != Mark::Delete)
            .map(|goal| goal.resource.clone())
            .collect();
        let dirty = goals.values().any(|goal| {
            matches!(goal.mark, Mark::Create | Mark::Update | Mark::Delete)
        }) || kept != plugin.snapshot_resources(snapshot);

        let committed = if dirty {
            let mut updated = snapshot.clone();
            plugin.replace_snapshot_resources(&mut updated, kept);
            let version = updated.meta.version;
            self.cli.update_snapshot_stack(plugin.stack_id(), updated, version).await
        } else {
            Ok(snapshot.clone())
        };

        match (first_error, committed) {
            (None, Ok(stored)) => Ok(stored),
            (None, Err(commit_error)) => Err(commit_error),
            (Some(apply_error), Ok(_)) => Err(apply_error),
            (Some(apply_error), Err(commit_error)) => {
                warn!(
                    stack_id = %plugin.stack_id(),
                    kind = %plugin.kind(),
                    error = %commit_error,
                    "snapshot commit failed after an apply error"
                );
                Err(apply_error)
            }
        }
    }
}
