//! Event dispatch: coalescing, kind ordering, serial kernel invocation.
//!
//! The dispatcher alternates between two states: idle, blocked on the next
//! event, and draining, where everything immediately available is taken as
//! one batch. Within a batch, duplicate `(kind, id)` pairs collapse to one
//! request and requests are issued in kind priority order; the action is not
//! part of the identity because the kernel always reads fresh state.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use stackd_core::error::Result;
use stackd_core::events::{Event, EventAction};
use stackd_core::types::{ReconcileKind, ReconcileResource};

use super::notifier::{ObjectChangeNotifier, Register};

/// Invoked exactly once per unique `(kind, id)` present in a batch.
#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(&self, request: &ReconcileResource) -> Result<()>;
}

#[async_trait]
impl<T: Reconciler + ?Sized> Reconciler for Arc<T> {
    async fn reconcile(&self, request: &ReconcileResource) -> Result<()> {
        (**self).reconcile(request).await
    }
}

/// Coalescing, kind-ordering driver of the reconcile kernel.
pub struct Dispatcher<R> {
    reconciler: R,
    notify_tx: mpsc::UnboundedSender<Event>,
}

impl<R: Reconciler + 'static> Dispatcher<R> {
    /// Create a dispatcher and register its change notifier with every
    /// provided registry.
    pub fn new(
        reconciler: R,
        notify_tx: mpsc::UnboundedSender<Event>,
        registries: &[Arc<dyn Register>],
    ) -> Arc<Self> {
        let dispatcher = Arc::new(Self { reconciler, notify_tx });
        for registry in registries {
            registry.register(dispatcher.clone());
        }
        dispatcher
    }

    /// Drain `events` until the channel closes; returns on closure.
    ///
    /// When `stop` fires the input channel is closed in place: buffered
    /// events still drain, an in-progress batch completes, and any synthetic
    /// request sent afterwards is dropped.
    ///
    /// A reconcile error is logged and the request dropped for this batch;
    /// the condition resurfaces as a future event or a notifier-driven
    /// requeue. The dispatcher itself never terminates on reconcile errors.
    pub async fn handle_events(
        &self,
        mut events: mpsc::UnboundedReceiver<Event>,
        mut stop: watch::Receiver<bool>,
    ) -> Result<()> {
        if *stop.borrow() {
            events.close();
        }
        loop {
            let first = tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        events.close();
                    }
                    continue;
                }
            };

            let mut batch = vec![first];
            while let Ok(event) = events.try_recv() {
                batch.push(event);
            }
            self.dispatch_batch(batch).await;
        }
        debug!("event channel closed, dispatcher stopping");
        Ok(())
    }

    async fn dispatch_batch(&self, batch: Vec<Event>) {
        metrics::counter!("stackd_dispatch_batches_total").increment(1);

        // Coalesce on (kind, id) keeping arrival order, then stable-sort so
        // earlier kinds drain first.
        let mut seen = HashSet::new();
        let mut requests: Vec<ReconcileResource> = Vec::new();
        for event in batch {
            if seen.insert((event.kind, event.actor_id.clone())) {
                requests.push(ReconcileResource::request(event.kind, event.actor_id));
            }
        }
        requests.sort_by_key(|request| request.kind);

        debug!(requests = requests.len(), "dispatching batch");
        for request in &requests {
            if let Err(error) = self.reconciler.reconcile(request).await {
                metrics::counter!("stackd_reconcile_dropped_total", "kind" => request.kind.as_str())
                    .increment(1);
                warn!(
                    kind = %request.kind,
                    id = %request.resource.id,
                    %error,
                    "reconcile failed, dropping request for this batch"
                );
            }
        }
    }
}

impl<R: Reconciler + 'static> ObjectChangeNotifier for Dispatcher<R> {
    fn notify(&self, kind: ReconcileKind, id: &str) {
        // Synthetic requests ride the same channel as observed events. After
        // shutdown the send fails and the request is dropped.
        let _ = self.notify_tx.send(Event::new(kind, EventAction::Update, id));
    }
}
