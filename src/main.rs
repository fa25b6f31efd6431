//! Demo binary (§10.7): generates a honeycomb topology, populates the
//! stores, installs KPM/MHO service models per node, starts the mobility
//! driver, and runs one subscription lifecycle end to end against a
//! logging stand-in for the codec plugin and E2 channel.
//!
//! Mirrors the teacher's dedicated-executor-thread layout, minus the
//! egui UI thread this crate has no use for.

use anyhow::Context;
use async_trait::async_trait;
use embassy_executor::{Executor, Spawner};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use env_logger::Builder;
use log::{LevelFilter, error, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use ran_simulator::config::SimulatorConfig;
use ran_simulator::e2::{CodecPlugin, E2Channel, IndicationHeader, IndicationMessage, RequestedAction, RicControlRequest, RicIndication, RicSubscriptionRequest};
use ran_simulator::error::{Error, Result};
use ran_simulator::mobility;
use ran_simulator::model::{ActionType, GeoPoint, PlmnId, RanFunctionId, RrcState, ServingCell, Ue};
use ran_simulator::registry::{KpmClient, MhoClient, RcPreClient, ServiceModelKind};
use ran_simulator::subscription::{self, SubscriptionOutcome};
use ran_simulator::topology::{self, TopologyParams};
use ran_simulator::world::World;
use std::sync::Arc;

const KPM_OID: &str = "1.3.6.1.4.1.53148.1.1.2.2";
const MHO_OID: &str = "1.3.6.1.4.1.53148.1.1.2.3";

/// Stands in for a real ASN.1 PER codec: logs what it would encode and
/// refuses to decode (this demo never receives wire bytes back).
struct LoggingCodec;

impl CodecPlugin for LoggingCodec {
    fn encode_indication(&self, oid: &str, _header: &IndicationHeader, _message: &IndicationMessage) -> Result<Vec<u8>> {
        info!("codec: encoding an indication for oid {oid}");
        Ok(Vec::new())
    }

    fn decode_indication(&self, oid: &str, _header_bytes: &[u8], _message_bytes: &[u8]) -> Result<(IndicationHeader, IndicationMessage)> {
        Err(Error::NotSupported(format!("demo codec cannot decode oid {oid}")))
    }
}

/// Stands in for a real E2AP transport association: logs delivered
/// indications and closes only when the process shuts down.
struct LoggingChannel {
    closed: Signal<CriticalSectionRawMutex, ()>,
}

impl LoggingChannel {
    fn new() -> Self {
        LoggingChannel { closed: Signal::new() }
    }
}

#[async_trait]
impl E2Channel for LoggingChannel {
    async fn ric_indication(&self, pdu: RicIndication) -> Result<()> {
        info!("channel: delivering indication for ran-function {} -> {:?}", pdu.ran_function_id, pdu.message);
        Ok(())
    }

    async fn closed(&self) {
        self.closed.wait().await;
    }
}

fn build_world(config: SimulatorConfig) -> Result<&'static World> {
    let world: &'static World = Box::leak(Box::new(World::new(config.clone())));

    let params = TopologyParams {
        center: GeoPoint { lat: config.center_lat, lng: config.center_lng },
        num_towers: config.num_towers,
        sectors_per_tower: config.sectors_per_tower,
        plmn_id: PlmnId::new(config.plmn_id),
        enb_start: config.enb_start,
        pitch: config.pitch_m,
        max_distance: config.max_distance_m,
        max_neighbors: config.max_neighbors,
        controllers: vec!["ric-1".to_string()],
        service_models: vec!["kpm".to_string(), "mho".to_string()],
        single_node: config.single_node,
    };
    let topo = topology::generate(&params)?;

    for node in topo.nodes {
        world.install_service_model(node.node_id, RanFunctionId(1), Arc::new(KpmClient));
        world.install_service_model(node.node_id, RanFunctionId(2), Arc::new(MhoClient));
        world.install_service_model(node.node_id, RanFunctionId(3), Arc::new(RcPreClient));
        world.nodes.put(node);
    }
    for cell in topo.cells {
        world.cells.put(cell);
    }

    let mut rng = StdRng::seed_from_u64(1);
    let first_cell = world.cells.list().first().cloned().ok_or_else(|| Error::Invalid("topology produced no cells".to_string()))?;
    world.ues.create_with_random_imsi(&mut rng, config.max_imsi_retry_attempts, |imsi| Ue {
        imsi,
        ue_type: "phone".to_string(),
        position: first_cell.sector.center,
        heading_deg: 0.0,
        crnti: 1,
        serving: ServingCell { ecgi: first_cell.ecgi, strength_db: -70.0 },
        neighbors: Vec::new(),
        rrc_state: RrcState::Idle,
        admitted: true,
        handover_dwell: 0,
    })?;

    Ok(world)
}

#[embassy_executor::task]
async fn run_mobility(world: &'static World, cancel: &'static Signal<CriticalSectionRawMutex, ()>) {
    let driver = world.mobility_driver();
    let rng = StdRng::seed_from_u64(2);
    if let Err(err) = mobility::run(driver, rng, cancel).await {
        error!("mobility driver stopped: {err}");
    }
}

#[embassy_executor::task]
async fn demo_subscription(spawner: Spawner, world: &'static World, codec: Arc<dyn CodecPlugin>, channel: Arc<dyn E2Channel>) {
    let node_id = match world.nodes.list().first() {
        Some(node) => node.node_id,
        None => {
            error!("no nodes in the topology, skipping the subscription demo");
            return;
        }
    };

    let request = RicSubscriptionRequest {
        ric_instance_id: 1,
        requester_id: 100,
        ran_function_id: RanFunctionId(1),
        actions: vec![RequestedAction { action_id: 1, action_type: ActionType::Report, action_definition: Vec::new() }],
        event_trigger_definition: 1_000u32.to_be_bytes().to_vec(),
    };

    let (response, record) = match subscription::prepare_subscription(world, node_id, &request) {
        SubscriptionOutcome::Accepted { response, record } => (response, record),
        SubscriptionOutcome::Rejected(failure) => {
            error!("subscription rejected: {:?}", failure.rejected_actions);
            return;
        }
    };
    info!("subscription accepted for node {node_id}: {} action(s)", response.accepted_actions.len());

    let key = record.key;
    if let Err(err) = subscription::register_and_spawn(spawner, world, codec, channel, record, ServiceModelKind::Kpm, KPM_OID) {
        error!("failed to spawn emitter: {err}");
        return;
    }

    let control_request = RicControlRequest { ran_function_id: RanFunctionId(2), node_id, payload: Vec::new() };
    match subscription::dispatch_control(world, node_id, control_request).await {
        Ok(Ok(ack)) => info!("control accepted for ran-function {}", ack.ran_function_id),
        Ok(Err(failure)) => error!("control rejected: {}", failure.cause),
        Err(err) => error!("control dispatch failed: {err}"),
    }

    embassy_time::Timer::after(embassy_time::Duration::from_millis(3_500)).await;

    match subscription::handle_subscription_delete(world, &key) {
        Ok(_) => info!("subscription deleted"),
        Err(failure) => error!("delete failed: {}", failure.cause),
    }
}

fn embassy_init(spawner: Spawner, world: &'static World) {
    let mobility_cancel: &'static Signal<CriticalSectionRawMutex, ()> = Box::leak(Box::new(Signal::new()));
    let codec: Arc<dyn CodecPlugin> = Arc::new(LoggingCodec);
    let channel: Arc<dyn E2Channel> = Arc::new(LoggingChannel::new());

    let _ = spawner.spawn(run_mobility(world, mobility_cancel));
    let _ = spawner.spawn(demo_subscription(spawner, world, codec, channel));

    // MHO demo: also exercise the handover-notification path on a second
    // RAN function of the same node once nodes exist.
    if let Some(node) = world.nodes.list().first() {
        let request = RicSubscriptionRequest {
            ric_instance_id: 1,
            requester_id: 101,
            ran_function_id: RanFunctionId(2),
            actions: vec![RequestedAction { action_id: 1, action_type: ActionType::Report, action_definition: Vec::new() }],
            event_trigger_definition: 1_000u32.to_be_bytes().to_vec(),
        };
        if let SubscriptionOutcome::Accepted { record, .. } = subscription::prepare_subscription(world, node.node_id, &request) {
            let codec: Arc<dyn CodecPlugin> = Arc::new(LoggingCodec);
            let channel: Arc<dyn E2Channel> = Arc::new(LoggingChannel::new());
            let _ = subscription::register_and_spawn(spawner, world, codec, channel, record, ServiceModelKind::Mho, MHO_OID);
        }
    }
}

fn main() -> anyhow::Result<()> {
    Builder::new().filter_level(LevelFilter::Info).filter(Some("ran_simulator"), LevelFilter::Debug).init();

    info!("starting ran-simulator demo");

    let config = SimulatorConfig::default();
    let world = build_world(config).context("failed to build the simulated topology")?;
    info!("generated {} nodes / {} cells / {} ues", world.nodes.len(), world.cells.len(), world.ues.len());

    // INTENTIONAL LEAK: Box::leak gives the executor 'static lifetime for
    // the remainder of the process, mirroring the teacher's executor-thread
    // setup.
    let executor: &'static mut Executor = Box::leak(Box::new(Executor::new()));
    executor.run(|spawner| embassy_init(spawner, world));
}
