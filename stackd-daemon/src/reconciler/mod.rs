//! The stack reconciler.
//!
//! Continuously drives the downstream orchestrator's observed state toward
//! each stack's declared state. The manager subscribes to change events,
//! bootstraps one synthetic request per known stack, and pumps the merged
//! stream into the dispatcher, which coalesces and orders the work before
//! invoking the kernel serially.

pub mod dispatcher;
pub mod kernel;
pub mod notifier;
pub mod plugin;

mod config;
mod network;
mod secret;
mod service;

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use stackd_core::backend::BackendClient;
use stackd_core::error::{Result, StackdError};
use stackd_core::events::{Event, EventAction, EventFilter};
use stackd_core::types::ReconcileKind;

use self::dispatcher::Dispatcher;
use self::kernel::{ReconcileKernel, DEFAULT_COMMIT_RETRIES};
use self::notifier::Register;

/// Lifecycle owner of the reconciler: subscribe, bootstrap, dispatch, stop.
pub struct Manager {
    cli: Arc<dyn BackendClient>,
    commit_retries: u32,
    registries: Vec<Arc<dyn Register>>,
    stop: Arc<watch::Sender<bool>>,
    stopped: watch::Receiver<bool>,
}

impl Manager {
    pub fn new(cli: Arc<dyn BackendClient>) -> Self {
        let (stop, stopped) = watch::channel(false);
        Self {
            cli,
            commit_retries: DEFAULT_COMMIT_RETRIES,
            registries: Vec::new(),
            stop: Arc::new(stop),
            stopped,
        }
    }

    /// Override the bound on version-guarded snapshot commit attempts.
    pub fn with_commit_retries(mut self, retries: u32) -> Self {
        self.commit_retries = retries.max(1);
        self
    }

    /// Components registered here receive the dispatcher's change notifier
    /// once `run` starts and may then deliver synthetic reconcile requests.
    pub fn register(&mut self, registry: Arc<dyn Register>) {
        self.registries.push(registry);
    }

    /// Request shutdown. The in-progress reconcile completes, buffered
    /// events drain, pending undelivered synthetic requests are dropped.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    /// Run the reconciler until `stop` or the upstream event channel closes.
    ///
    /// A subscribe failure at startup is fatal and surfaces as the return
    /// error.
    pub async fn run(&self) -> Result<()> {
        info!("starting stack reconciler");

        let (backlog, mut subscription) = self
            .cli
            .subscribe_to_events(EventFilter::all())
            .await
            .map_err(|e| StackdError::Subscribe { reason: e.to_string() })?;

        let (tx, rx) = mpsc::unbounded_channel();

        // Bootstrap: one synthetic stack request per known stack, ahead of
        // the backlog and the live stream.
        for stack in self.cli.list_stacks().await? {
            debug!(stack_id = %stack.id, "bootstrapping stack");
            let _ = tx.send(Event::new(ReconcileKind::Stack, EventAction::Update, &stack.id));
        }
        for event in backlog {
            let _ = tx.send(event);
        }

        let kernel = ReconcileKernel::new(self.cli.clone(), self.commit_retries);
        let dispatcher = Dispatcher::new(kernel, tx.clone(), &self.registries);

        // Subscriber pump: forward live events into the dispatcher channel
        // until the upstream closes or stop is requested. An upstream close
        // is treated as a stop so the dispatcher drains and returns.
        let stop = self.stop.clone();
        let mut pump_stopped = self.stopped.clone();
        let subscription_id = subscription.id;
        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = subscription.events.recv() => match event {
                        Some(event) => {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        None => {
                            debug!("upstream event channel closed");
                            let _ = stop.send(true);
                            break;
                        }
                    },
                    changed = pump_stopped.changed() => {
                        if changed.is_err() || *pump_stopped.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        let result = dispatcher.handle_events(rx, self.stopped.clone()).await;

        self.cli.unsubscribe_from_events(subscription_id).await;
        pump.abort();
        info!("stack reconciler stopped");
        result
    }
}
