//! Subscription store: the triple-keyed registry the subscription engine
//! (§4.E) registers accepted subscriptions into.

use super::EntityStore;
use super::watch::WatchReceiver;
use crate::error::Result;
use crate::model::{ActionId, NodeId, RejectCause, SubscriptionKey};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use std::sync::Arc;
use std::time::Duration;

/// One accepted (or partially rejected) subscription, as registered by the
/// engine after negotiation (§4.E step 4). The cancellation signal is the
/// handle the engine's `RICSubscriptionDelete` path fires to guarantee the
/// emitter exits within one tick (§5).
#[derive(Clone)]
pub struct SubscriptionRecord {
    pub key: SubscriptionKey,
    pub node_id: NodeId,
    pub accepted_actions: Vec<ActionId>,
    pub rejected_actions: Vec<(ActionId, RejectCause)>,
    pub report_period: Duration,
    pub cancel: Arc<Signal<CriticalSectionRawMutex, ()>>,
}

pub struct SubscriptionStore {
    inner: EntityStore<SubscriptionKey, SubscriptionRecord>,
}

impl SubscriptionStore {
    pub fn new() -> Self {
        SubscriptionStore { inner: EntityStore::new("subscription") }
    }

    pub fn get(&self, key: &SubscriptionKey) -> Result<SubscriptionRecord> {
        self.inner.get(key)
    }

    pub fn create(&self, record: SubscriptionRecord) -> Result<()> {
        self.inner.create(record.key, record)
    }

    pub fn delete(&self, key: &SubscriptionKey) -> Result<SubscriptionRecord> {
        self.inner.delete(key)
    }

    pub fn list(&self) -> Vec<SubscriptionRecord> {
        self.inner.list()
    }

    pub fn list_by_node(&self, node_id: &NodeId) -> Vec<SubscriptionRecord> {
        self.inner.list_filtered(|s| s.node_id == *node_id)
    }

    pub fn watch(&self) -> WatchReceiver<SubscriptionKey, SubscriptionRecord> {
        self.inner.watch()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SubscriptionStore {
    fn default() -> Self {
        Self::new()
    }
}
