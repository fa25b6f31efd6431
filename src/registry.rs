//! Per-node service-model registry (§4.D): a mapping from RAN-function ID
//! to the service-model client that handles subscriptions and control for
//! it. Dynamic dispatch on the client's concrete service model (the
//! original `GetManager()`-style global lookup) is replaced with a small
//! fixed capability enum (§9 design notes): every client implements the
//! same `ServiceModelClient` trait, and the registry just owns one boxed
//! client per RAN-function ID.

use crate::e2::{RicControlAcknowledge, RicControlFailure, RicControlRequest};
use crate::error::{Error, Result};
use crate::model::{ActionType, RanFunctionId, SubscriptionKey};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Which E2SM variant a service-model client implements. Used only for
/// logging/introspection — dispatch itself goes through the trait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceModelKind {
    Kpm,
    Mho,
    RcPre,
}

/// Capability set every service-model client exposes (§4.D, §9).
#[async_trait]
pub trait ServiceModelClient: Send + Sync {
    fn kind(&self) -> ServiceModelKind;

    /// OID the codec plugin uses to pick the right ASN.1 encoder (§6).
    fn oid(&self) -> &'static str;

    /// Classify one requested action: which of REPORT/INSERT/POLICY this
    /// service model admits (§4.E step 2).
    fn classify_action(&self, action_type: ActionType) -> std::result::Result<(), ()>;

    async fn handle_control(&self, request: RicControlRequest) -> Result<std::result::Result<RicControlAcknowledge, RicControlFailure>>;

    /// Per-client teardown hook for `RICSubscriptionDelete` (§4.D, §9 design
    /// notes, §10.6). The store-level delete and cancel signal are generic
    /// and already handled by `subscription::handle_subscription_delete`;
    /// this default is a no-op so the capability set matches §9's
    /// `{HandleSubscription, HandleSubscriptionDelete, HandleControl}` while
    /// leaving a seam for a future service model that needs to release a
    /// model-specific resource on delete.
    async fn handle_subscription_delete(&self, _key: SubscriptionKey) -> Result<()> {
        Ok(())
    }
}

/// KPM v2: accepts only REPORT actions; control is not supported (§4.D, §7).
pub struct KpmClient;

#[async_trait]
impl ServiceModelClient for KpmClient {
    fn kind(&self) -> ServiceModelKind {
        ServiceModelKind::Kpm
    }

    fn oid(&self) -> &'static str {
        "1.3.6.1.4.1.53148.1.1.2.2"
    }

    fn classify_action(&self, action_type: ActionType) -> std::result::Result<(), ()> {
        match action_type {
            ActionType::Report => Ok(()),
            ActionType::Insert | ActionType::Policy => Err(()),
        }
    }

    async fn handle_control(&self, request: RicControlRequest) -> Result<std::result::Result<RicControlAcknowledge, RicControlFailure>> {
        Err(Error::NotSupported(format!("KPM does not support RIC control (ran-function {})", request.ran_function_id)))
    }
}

/// MHO (mobility handover): accepts REPORT and the model's own trigger
/// actions, and supports control (§4.D).
pub struct MhoClient;

#[async_trait]
impl ServiceModelClient for MhoClient {
    fn kind(&self) -> ServiceModelKind {
        ServiceModelKind::Mho
    }

    fn oid(&self) -> &'static str {
        "1.3.6.1.4.1.53148.1.1.2.3"
    }

    fn classify_action(&self, _action_type: ActionType) -> std::result::Result<(), ()> {
        // §4.E: MHO accepts REPORT and the model-specific trigger actions;
        // the distilled spec names no further action types to reject, so
        // every action type this crate models is accepted.
        Ok(())
    }

    async fn handle_control(&self, request: RicControlRequest) -> Result<std::result::Result<RicControlAcknowledge, RicControlFailure>> {
        Ok(Ok(RicControlAcknowledge { ran_function_id: request.ran_function_id }))
    }
}

/// RC-PRE stub (§10.6 supplemental feature): exercises the registry's
/// dispatch with a third variant. Mirrors KPM's "control not supported"
/// behavior so MHO's acceptance has something to contrast against.
pub struct RcPreClient;

#[async_trait]
impl ServiceModelClient for RcPreClient {
    fn kind(&self) -> ServiceModelKind {
        ServiceModelKind::RcPre
    }

    fn oid(&self) -> &'static str {
        "1.3.6.1.4.1.53148.1.1.2.4"
    }

    fn classify_action(&self, action_type: ActionType) -> std::result::Result<(), ()> {
        match action_type {
            ActionType::Report => Ok(()),
            ActionType::Insert | ActionType::Policy => Err(()),
        }
    }

    async fn handle_control(&self, request: RicControlRequest) -> Result<std::result::Result<RicControlAcknowledge, RicControlFailure>> {
        Err(Error::NotSupported(format!("RC-PRE stub does not support RIC control (ran-function {})", request.ran_function_id)))
    }
}

/// Per-node table of installed service models, keyed by RAN-function ID
/// (§4.D).
#[derive(Default)]
pub struct ServiceModelRegistry {
    clients: HashMap<RanFunctionId, Arc<dyn ServiceModelClient>>,
}

impl ServiceModelRegistry {
    pub fn new() -> Self {
        ServiceModelRegistry { clients: HashMap::new() }
    }

    pub fn install(&mut self, ran_function_id: RanFunctionId, client: Arc<dyn ServiceModelClient>) {
        self.clients.insert(ran_function_id, client);
    }

    /// Returns an owned `Arc` rather than a borrow so callers can drop the
    /// registry's lock before calling into the client across an `.await`
    /// (§5: no blocking I/O while holding a store lock).
    pub fn get(&self, ran_function_id: &RanFunctionId) -> Result<Arc<dyn ServiceModelClient>> {
        self.clients
            .get(ran_function_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no service model installed for ran-function {ran_function_id}")))
    }

    pub fn installed_functions(&self) -> Vec<RanFunctionId> {
        self.clients.keys().copied().collect()
    }
}
