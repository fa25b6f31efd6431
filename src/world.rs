//! `World`: the dependency-injected bundle of stores, per-node service
//! model registries, and the mobility driver's RRC fan-out hub that every
//! task in this crate is constructed with (§9 design notes — explicit
//! dependency injection replacing the original `GetManager()` singleton).

use crate::config::SimulatorConfig;
use crate::error::Result;
use crate::mobility::RrcUpdateHub;
use crate::model::{NodeId, RanFunctionId};
use crate::registry::ServiceModelClient;
use crate::registry::ServiceModelRegistry;
use crate::store::cells::CellStore;
use crate::store::nodes::NodeStore;
use crate::store::subscriptions::SubscriptionStore;
use crate::store::ues::UeStore;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub struct World {
    pub nodes: NodeStore,
    /// `Arc`-wrapped so the mobility driver (which is constructed once and
    /// then run as its own task) can hold its own handles without borrowing
    /// from `World` (§9 design notes).
    pub cells: Arc<CellStore>,
    pub ues: Arc<UeStore>,
    pub subscriptions: SubscriptionStore,
    pub rrc_hub: Arc<RrcUpdateHub>,
    pub config: SimulatorConfig,
    registries: RwLock<HashMap<NodeId, ServiceModelRegistry>>,
}

impl World {
    pub fn new(config: SimulatorConfig) -> Self {
        World {
            nodes: NodeStore::new(),
            cells: Arc::new(CellStore::new()),
            ues: Arc::new(UeStore::new()),
            subscriptions: SubscriptionStore::new(),
            rrc_hub: Arc::new(RrcUpdateHub::new()),
            config,
            registries: RwLock::new(HashMap::new()),
        }
    }

    /// A `MobilityDriver` wired to this world's cell/UE/RRC handles.
    pub fn mobility_driver(&self) -> crate::mobility::MobilityDriver {
        crate::mobility::MobilityDriver::new(self.cells.clone(), self.ues.clone(), self.rrc_hub.clone(), self.config.clone())
    }

    pub fn install_service_model(&self, node_id: NodeId, ran_function_id: RanFunctionId, client: Arc<dyn ServiceModelClient>) {
        let mut registries = self.registries.write().unwrap();
        registries.entry(node_id).or_insert_with(ServiceModelRegistry::new).install(ran_function_id, client);
    }

    /// Looks up the installed client for `(node_id, ran_function_id)`. The
    /// registries lock is released before returning — the `Arc` clone is
    /// what callers hold across any subsequent `.await` (§5).
    pub fn service_model(&self, node_id: &NodeId, ran_function_id: &RanFunctionId) -> Result<Arc<dyn ServiceModelClient>> {
        let registries = self.registries.read().unwrap();
        let registry = registries
            .get(node_id)
            .ok_or_else(|| crate::error::Error::NotFound(format!("no service models installed for node {node_id}")))?;
        registry.get(ran_function_id)
    }
}
