//! Mobility & RRC driver (§4.C): a periodic tick loop that moves every UE,
//! recomputes signal strength against nearby cells, triggers handovers on
//! hysteresis + dwell, and flips RRC state with a configured probability.
//!
//! The route policy implemented here is straight-line-with-wrap (§4.C):
//! each UE holds a heading that free-runs with small per-tick jitter, and
//! is reflected back toward the topology center once the UE strays past
//! `mobility_search_radius_m` — the spec names "straight-line with wrap,
//! or waypoint list" as the two route-policy choices without picking one
//! (see `DESIGN.md`); a reflecting boundary is the natural reading of
//! "wrap" for a lat/lng area that has no edges to tile.

use crate::config::SimulatorConfig;
use crate::error::Result;
use crate::geometry::{bearing_deg, haversine_m, target_point};
use crate::model::{Ecgi, GeoPoint, Imsi, NeighborMeasurement, RrcState, ServingCell, Ue};
use crate::signal::strength_db;
use crate::store::cells::CellStore;
use crate::store::ues::UeStore;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use rand::Rng;
use std::sync::{Arc, RwLock};

pub const RRC_UPDATE_CHANNEL_CAPACITY: usize = 256;

type RrcChannel = Channel<CriticalSectionRawMutex, Ue, RRC_UPDATE_CHANNEL_CAPACITY>;
pub type RrcUpdateReceiver = Receiver<'static, CriticalSectionRawMutex, Ue, RRC_UPDATE_CHANNEL_CAPACITY>;
type RrcSender = Sender<'static, CriticalSectionRawMutex, Ue, RRC_UPDATE_CHANNEL_CAPACITY>;

/// Fan-out hub for RRC-flip snapshots, the `RrcUpdateChan` of §6: every MHO
/// subscription's emitter subscribes its own channel, the same leaked-channel
/// fan-out shape the store watcher registry uses (`store::watch`), minus the
/// replay burst — a flip is the only thing ever carried on it.
#[derive(Default)]
pub struct RrcUpdateHub {
    senders: RwLock<Vec<RrcSender>>,
}

impl RrcUpdateHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> RrcUpdateReceiver {
        let channel: &'static RrcChannel = Box::leak(Box::new(Channel::new()));
        let sender = channel.sender();
        self.senders.write().unwrap().push(sender);
        channel.receiver()
    }

    fn publish(&self, ue: Ue) {
        let senders = self.senders.read().unwrap();
        for sender in senders.iter() {
            if sender.try_send(ue.clone()).is_err() {
                log::warn!("RRC update channel full, dropping a flip event for UE {}", ue.imsi);
            }
        }
    }
}

/// Per-tick outcome for one UE, used by callers (and tests) that want to
/// know what the driver just did without re-diffing the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub handover_occurred: bool,
    pub rrc_flipped: bool,
}

pub struct MobilityDriver {
    cells: Arc<CellStore>,
    ues: Arc<UeStore>,
    rrc_hub: Arc<RrcUpdateHub>,
    config: SimulatorConfig,
}

impl MobilityDriver {
    pub fn new(cells: Arc<CellStore>, ues: Arc<UeStore>, rrc_hub: Arc<RrcUpdateHub>, config: SimulatorConfig) -> Self {
        MobilityDriver { cells, ues, rrc_hub, config }
    }

    /// Run one tick synchronously over every UE currently in the store
    /// (§4.C). Returns one outcome per UE that still exists when its turn
    /// came up (a UE deleted mid-tick by a concurrent caller is skipped).
    pub fn tick(&self, rng: &mut impl Rng) -> Vec<TickOutcome> {
        let ue_ids: Vec<Imsi> = self.ues.list().into_iter().map(|ue| ue.imsi).collect();
        let mut outcomes = Vec::with_capacity(ue_ids.len());

        for imsi in ue_ids {
            if let Some(outcome) = self.tick_one(&imsi, rng) {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    fn tick_one(&self, imsi: &Imsi, rng: &mut impl Rng) -> Option<TickOutcome> {
        let ue = self.ues.get(imsi).ok()?;
        let serving_cell = self.cells.get(&ue.serving.ecgi).ok()?;

        let speed_mps = rng.gen_range(self.config.ue_speed_min_mps..=self.config.ue_speed_max_mps);
        let distance_m = speed_mps * (self.config.driver_tick_ms as f64 / 1000.0);
        let jitter_deg = rng.gen_range(-10.0..=10.0);
        let mut heading = (ue.heading_deg + jitter_deg).rem_euclid(360.0);

        let mut new_position = target_point(ue.position, heading, distance_m);
        if haversine_m(self.config.center(), new_position) > self.config.mobility_search_radius_m {
            // Reflect back toward the center rather than wandering off forever.
            heading = (bearing_deg(new_position, self.config.center()) + jitter_deg).rem_euclid(360.0);
            new_position = target_point(ue.position, heading, distance_m);
        }

        let candidates: Vec<(Ecgi, f64)> = self
            .cells
            .list_filtered(|cell| haversine_m(cell.sector.center, new_position) <= self.config.mobility_search_radius_m)
            .into_iter()
            .map(|cell| (cell.ecgi, strength_db(cell.tx_power_db, &cell.sector, new_position)))
            .collect();

        let serving_strength = strength_db(serving_cell.tx_power_db, &serving_cell.sector, new_position);

        let mut neighbor_candidates: Vec<NeighborMeasurement> = candidates
            .iter()
            .filter(|(ecgi, _)| *ecgi != ue.serving.ecgi)
            .map(|(ecgi, strength)| NeighborMeasurement { ecgi: *ecgi, strength_db: *strength })
            .collect();
        neighbor_candidates.sort_by(|a, b| b.strength_db.partial_cmp(&a.strength_db).unwrap());
        neighbor_candidates.truncate(self.config.ue_neighbor_cap);

        let best_neighbor = neighbor_candidates.first().copied();

        let mut serving = ServingCell { ecgi: ue.serving.ecgi, strength_db: serving_strength };
        let mut dwell = ue.handover_dwell;
        let mut handover_occurred = false;

        if let Some(candidate) = best_neighbor {
            if candidate.strength_db > serving_strength + self.config.handover_hysteresis_db {
                dwell += 1;
            } else {
                dwell = 0;
            }
            if dwell >= self.config.handover_dwell_ticks {
                serving = ServingCell { ecgi: candidate.ecgi, strength_db: candidate.strength_db };
                dwell = 0;
                handover_occurred = true;
            }
        } else {
            dwell = 0;
        }

        // The new serving cell must never reappear in its own neighbor list (§3).
        neighbor_candidates.retain(|n| n.ecgi != serving.ecgi);

        let rrc_flip = rng.gen_bool(self.config.probability_of_rrc_state_change.clamp(0.0, 1.0));

        let updated = self
            .ues
            .update(imsi, |ue| {
                ue.position = new_position;
                ue.heading_deg = heading;
                ue.serving = serving;
                ue.neighbors = neighbor_candidates.clone();
                ue.handover_dwell = dwell;
                if rrc_flip {
                    ue.rrc_state = ue.rrc_state.toggled();
                }
            })
            .ok()?;

        if rrc_flip {
            self.rrc_hub.publish(updated);
        }

        Some(TickOutcome { handover_occurred, rrc_flipped: rrc_flip })
    }
}

impl SimulatorConfig {
    fn center(&self) -> GeoPoint {
        GeoPoint { lat: self.center_lat, lng: self.center_lng }
    }
}

/// Run the driver forever on an `embassy_time::Ticker`, selecting against a
/// cancellation signal so the caller can stop it within one tick (§5, §10.1).
pub async fn run(
    driver: MobilityDriver,
    mut rng: impl Rng,
    cancel: &embassy_sync::signal::Signal<CriticalSectionRawMutex, ()>,
) -> Result<()> {
    let mut ticker = embassy_time::Ticker::every(embassy_time::Duration::from_millis(driver.config.driver_tick_ms));
    loop {
        match embassy_futures::select::select(ticker.next(), cancel.wait()).await {
            embassy_futures::select::Either::First(()) => {
                driver.tick(&mut rng);
            }
            embassy_futures::select::Either::Second(()) => {
                log::info!("mobility driver cancelled");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Cell, NodeId, PlmnId, RrcState, SectorGeometry, Ue};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn cell(index: u16, center: GeoPoint, azimuth: f64, arc: f64) -> Cell {
        Cell {
            ecgi: Ecgi { plmn: PlmnId::new(1), enb_id: NodeId(1), cell_index: index },
            sector: SectorGeometry { center, azimuth, arc },
            tx_power_db: 40.0,
            max_ues: 100,
            neighbors: Vec::new(),
            color: "c".into(),
            node_id: NodeId(1),
        }
    }

    fn base_config() -> SimulatorConfig {
        let mut config = SimulatorConfig::default();
        config.center_lat = 52.52;
        config.center_lng = 13.41;
        config.mobility_search_radius_m = 5000.0;
        config.ue_neighbor_cap = 4;
        config.handover_hysteresis_db = 1.0;
        config.handover_dwell_ticks = 2;
        config
    }

    fn ue_at(position: GeoPoint, serving: Ecgi) -> Ue {
        Ue {
            imsi: Imsi(1_000_001),
            ue_type: "phone".into(),
            position,
            heading_deg: 0.0,
            crnti: 1,
            serving: ServingCell { ecgi: serving, strength_db: -70.0 },
            neighbors: Vec::new(),
            rrc_state: RrcState::Idle,
            admitted: true,
            handover_dwell: 0,
        }
    }

    #[test]
    fn neighbor_list_never_contains_serving_cell() {
        let center = GeoPoint { lat: 52.52, lng: 13.41 };
        let cells = Arc::new(CellStore::new());
        cells.put(cell(1, center, 0.0, 360.0));
        cells.put(cell(2, target_point(center, 90.0, 300.0), 0.0, 360.0));

        let ues = Arc::new(UeStore::new());
        let serving_ecgi = Ecgi { plmn: PlmnId::new(1), enb_id: NodeId(1), cell_index: 1 };
        ues.create_with_random_imsi(&mut StdRng::seed_from_u64(1), 5, |imsi| {
            let mut ue = ue_at(center, serving_ecgi);
            ue.imsi = imsi;
            ue
        })
        .unwrap();

        let hub = Arc::new(RrcUpdateHub::new());
        let driver = MobilityDriver::new(cells, ues.clone(), hub, base_config());
        let mut rng = StdRng::seed_from_u64(7);
        driver.tick(&mut rng);

        for ue in ues.list() {
            assert!(!ue.neighbors.iter().any(|n| n.ecgi == ue.serving.ecgi));
            assert!(ue.neighbors.windows(2).all(|w| w[0].strength_db >= w[1].strength_db));
        }
    }

    #[test]
    fn handover_requires_sustained_dwell() {
        let center = GeoPoint { lat: 52.52, lng: 13.41 };
        let weak_cell_pos = center;
        let strong_cell_pos = target_point(center, 0.0, 50.0);

        let cells = Arc::new(CellStore::new());
        let weak_ecgi = Ecgi { plmn: PlmnId::new(1), enb_id: NodeId(1), cell_index: 1 };
        let strong_ecgi = Ecgi { plmn: PlmnId::new(1), enb_id: NodeId(1), cell_index: 2 };
        cells.put(Cell { tx_power_db: 10.0, ..cell(1, weak_cell_pos, 0.0, 360.0) });
        cells.put(Cell { tx_power_db: 80.0, ..cell(2, strong_cell_pos, 0.0, 360.0) });

        let ues = Arc::new(UeStore::new());
        ues.create_with_random_imsi(&mut StdRng::seed_from_u64(2), 5, |imsi| {
            let mut ue = ue_at(target_point(center, 0.0, 60.0), weak_ecgi);
            ue.imsi = imsi;
            ue.heading_deg = 0.0;
            ue
        })
        .unwrap();

        let mut config = base_config();
        config.ue_speed_min_mps = 0.0;
        config.ue_speed_max_mps = 0.0;
        config.handover_hysteresis_db = 1.0;
        config.handover_dwell_ticks = 2;

        let hub = Arc::new(RrcUpdateHub::new());
        let driver = MobilityDriver::new(cells, ues.clone(), hub, config);
        let mut rng = StdRng::seed_from_u64(3);

        let outcome_1 = driver.tick(&mut rng);
        assert!(!outcome_1[0].handover_occurred);
        let outcome_2 = driver.tick(&mut rng);
        assert!(outcome_2[0].handover_occurred);

        let ue = ues.list().into_iter().next().unwrap();
        assert_eq!(ue.serving.ecgi, strong_ecgi);
    }

    #[test]
    fn rrc_flips_on_every_tick_with_probability_one() {
        let center = GeoPoint { lat: 52.52, lng: 13.41 };
        let cells = Arc::new(CellStore::new());
        let ecgi = Ecgi { plmn: PlmnId::new(1), enb_id: NodeId(1), cell_index: 1 };
        cells.put(cell(1, center, 0.0, 360.0));

        let ues = Arc::new(UeStore::new());
        ues.create_with_random_imsi(&mut StdRng::seed_from_u64(4), 5, |imsi| {
            let mut ue = ue_at(center, ecgi);
            ue.imsi = imsi;
            ue
        })
        .unwrap();

        let mut config = base_config();
        config.probability_of_rrc_state_change = 1.0;
        let hub = Arc::new(RrcUpdateHub::new());
        let rrc_rx = hub.subscribe();
        let driver = MobilityDriver::new(cells, ues.clone(), hub, config);
        let mut rng = StdRng::seed_from_u64(5);

        let before = ues.list().into_iter().next().unwrap().rrc_state;
        let outcomes = driver.tick(&mut rng);
        assert!(outcomes[0].rrc_flipped);
        let after = ues.list().into_iter().next().unwrap().rrc_state;
        assert_ne!(before, after);
        assert!(rrc_rx.try_receive().is_ok());
    }

}
