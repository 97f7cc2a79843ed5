//! Change events consumed by the reconciler.
//!
//! Events arrive from the downstream orchestrator and, in the standalone
//! deployment, from locally intercepted stack CRUD. Both carry only the
//! resource kind, the action, and the actor ID; the reconciler always reads
//! fresh state, so no payload travels with the event.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio::sync::mpsc;

use crate::types::ReconcileKind;

/// Action reported by a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    Create,
    Update,
    Delete,
}

/// A change event. Fields beyond the kind, action, and actor ID of the wire
/// format are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: ReconcileKind,
    pub action: EventAction,
    #[serde(rename = "id")]
    pub actor_id: String,
}

impl Event {
    pub fn new(kind: ReconcileKind, action: EventAction, actor_id: impl Into<String>) -> Self {
        Self { kind, action, actor_id: actor_id.into() }
    }
}

/// Kind filter applied at subscription time. An empty filter matches all.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub kinds: BTreeSet<ReconcileKind>,
}

impl EventFilter {
    /// Filter covering every kind the reconciler handles.
    pub fn all() -> Self {
        Self {
            kinds: BTreeSet::from([
                ReconcileKind::Stack,
                ReconcileKind::Network,
                ReconcileKind::Secret,
                ReconcileKind::Config,
                ReconcileKind::Service,
            ]),
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&event.kind)
    }
}

/// A live event subscription: an ID used to unsubscribe and the channel the
/// events arrive on.
#[derive(Debug)]
pub struct EventSubscription {
    pub id: u64,
    pub events: mpsc::UnboundedReceiver<Event>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_matches_by_kind() {
        let filter = EventFilter {
            kinds: BTreeSet::from([ReconcileKind::Service]),
        };

        let service = Event::new(ReconcileKind::Service, EventAction::Update, "svc-1");
        let network = Event::new(ReconcileKind::Network, EventAction::Create, "net-1");

        assert!(filter.matches(&service));
        assert!(!filter.matches(&network));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = EventFilter::default();
        let event = Event::new(ReconcileKind::Stack, EventAction::Delete, "st-1");
        assert!(filter.matches(&event));
    }

    #[test]
    fn event_wire_format() {
        let event = Event::new(ReconcileKind::Secret, EventAction::Create, "sec-7");
        let encoded = serde_json::to_string(&event).unwrap();
        assert_eq!(encoded, r#"{"type":"secret","action":"create","id":"sec-7"}"#);
    }
}
