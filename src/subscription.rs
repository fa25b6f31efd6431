//! Subscription engine (§4.E): negotiates `RICSubscription` requests,
//! registers accepted subscriptions, and spawns a cancellable periodic
//! emitter per subscription that builds and delivers indications until
//! deleted or the channel closes.

use crate::e2::{
    CodecPlugin, E2Channel, EventTrigger, IndicationHeader, IndicationMessage, RicControlAcknowledge, RicControlFailure, RicControlRequest, RicIndication,
    RicSubscriptionDeleteFailure, RicSubscriptionDeleteResponse, RicSubscriptionFailure, RicSubscriptionRequest, RicSubscriptionResponse,
};
use crate::indications::kpm::{self, KpmActionDefinition};
use crate::indications::mho;
use crate::model::{ActionId, Ecgi, Imsi, NodeId, RejectCause, RrcState, SubscriptionKey};
use crate::registry::{ServiceModelClient, ServiceModelKind};
use crate::store::subscriptions::SubscriptionRecord;
use crate::world::World;
use embassy_futures::select::{Either4, select4};
use embassy_sync::signal::Signal;
use embassy_time::Ticker;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Bound on concurrently active subscriptions, i.e. the emitter task pool
/// size (mirrors the teacher's `pool_size = MAX_NODE_COUNT` fixed-capacity
/// task pools — Embassy task pools are sized at compile time).
pub const MAX_CONCURRENT_SUBSCRIPTIONS: usize = 64;

fn unix_timestamp_secs() -> u32 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as u32).unwrap_or(0)
}

/// Decode the event-trigger definition to extract the report period
/// (§4.E step 3). Layout: 4-byte big-endian milliseconds. Absent or
/// too-short input is malformed.
fn decode_event_trigger(bytes: &[u8]) -> Option<EventTrigger> {
    if bytes.len() < 4 {
        return None;
    }
    let ms = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
    Some(EventTrigger { report_period: Duration::from_millis(ms as u64) })
}

pub fn encode_event_trigger(report_period: Duration) -> Vec<u8> {
    (report_period.as_millis() as u32).to_be_bytes().to_vec()
}

pub enum SubscriptionOutcome {
    Accepted { response: RicSubscriptionResponse, record: SubscriptionRecord },
    Rejected(RicSubscriptionFailure),
}

/// Validate and (on success) prepare a subscription for registration
/// (§4.E steps 1-4). Does not touch the store or spawn anything — callers
/// decide whether/how to register and spawn based on the outcome.
pub fn prepare_subscription(world: &World, node_id: NodeId, request: &RicSubscriptionRequest) -> SubscriptionOutcome {
    let key = SubscriptionKey { ric_instance_id: request.ric_instance_id, requester_id: request.requester_id, ran_function_id: request.ran_function_id };

    let client = match world.service_model(&node_id, &request.ran_function_id) {
        Ok(client) => client,
        Err(_) => {
            return SubscriptionOutcome::Rejected(RicSubscriptionFailure {
                ric_instance_id: key.ric_instance_id,
                requester_id: key.requester_id,
                ran_function_id: key.ran_function_id,
                rejected_actions: request.actions.iter().map(|a| (a.action_id, RejectCause::ActionNotSupported)).collect(),
            });
        }
    };

    let (accepted, rejected) = classify_actions(client.as_ref(), request);

    if accepted.is_empty() {
        return SubscriptionOutcome::Rejected(RicSubscriptionFailure {
            ric_instance_id: key.ric_instance_id,
            requester_id: key.requester_id,
            ran_function_id: key.ran_function_id,
            rejected_actions: rejected,
        });
    }

    let Some(event_trigger) = decode_event_trigger(&request.event_trigger_definition) else {
        let all_rejected = request.actions.iter().map(|a| (a.action_id, RejectCause::EventTriggerMalformed)).collect();
        return SubscriptionOutcome::Rejected(RicSubscriptionFailure {
            ric_instance_id: key.ric_instance_id,
            requester_id: key.requester_id,
            ran_function_id: key.ran_function_id,
            rejected_actions: all_rejected,
        });
    };

    let record = SubscriptionRecord {
        key,
        node_id,
        accepted_actions: accepted.clone(),
        rejected_actions: rejected,
        report_period: event_trigger.report_period,
        cancel: Arc::new(Signal::new()),
    };

    let response = RicSubscriptionResponse { ric_instance_id: key.ric_instance_id, requester_id: key.requester_id, ran_function_id: key.ran_function_id, accepted_actions: accepted };

    SubscriptionOutcome::Accepted { response, record }
}

fn classify_actions(client: &dyn ServiceModelClient, request: &RicSubscriptionRequest) -> (Vec<ActionId>, Vec<(ActionId, RejectCause)>) {
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();
    for action in &request.actions {
        match client.classify_action(action.action_type) {
            Ok(()) => accepted.push(action.action_id),
            Err(()) => rejected.push((action.action_id, RejectCause::ActionNotSupported)),
        }
    }
    (accepted, rejected)
}

/// `RICSubscriptionDelete` (§4.E step 6): cancel the emitter, remove the
/// subscription from the store, and respond. Unknown subscriptions get a
/// failure PDU rather than a panic.
pub fn handle_subscription_delete(world: &World, key: &SubscriptionKey) -> std::result::Result<RicSubscriptionDeleteResponse, RicSubscriptionDeleteFailure> {
    match world.subscriptions.delete(key) {
        Ok(record) => {
            if let Ok(client) = world.service_model(&record.node_id, &key.ran_function_id) {
                if let Err(err) = embassy_futures::block_on(client.handle_subscription_delete(*key)) {
                    log::warn!("service model teardown failed for subscription {key}: {err}");
                }
            }
            record.cancel.signal(());
            Ok(RicSubscriptionDeleteResponse { ric_instance_id: key.ric_instance_id, requester_id: key.requester_id, ran_function_id: key.ran_function_id })
        }
        Err(_) => Err(RicSubscriptionDeleteFailure {
            ric_instance_id: key.ric_instance_id,
            requester_id: key.requester_id,
            ran_function_id: key.ran_function_id,
            cause: "no such subscription".to_string(),
        }),
    }
}

/// `RICControl` (§4.D): look up the node's installed client for the
/// request's RAN-function ID and forward the control request to it. The
/// counterpart of `prepare_subscription`/`handle_subscription_delete` for
/// the third capability in §9's `{HandleSubscription,
/// HandleSubscriptionDelete, HandleControl}` set.
pub async fn dispatch_control(world: &World, node_id: NodeId, request: RicControlRequest) -> crate::error::Result<std::result::Result<RicControlAcknowledge, RicControlFailure>> {
    let client = world.service_model(&node_id, &request.ran_function_id)?;
    client.handle_control(request).await
}

/// The cancellable periodic emitter (§4.E step 5, §5). Runs until the
/// subscription's own cancel signal fires (delete) or the channel's
/// context completes (close) — whichever happens first, within one tick.
pub async fn run_emitter(world: &World, codec: &dyn CodecPlugin, channel: &dyn E2Channel, subscription: SubscriptionRecord, kind: ServiceModelKind, oid: &str) {
    let mut ticker = Ticker::every(embassy_time::Duration::from_millis(subscription.report_period.as_millis().max(1) as u64));
    let rrc_rx = world.rrc_hub.subscribe();

    loop {
        match select4(ticker.next(), rrc_rx.receive(), subscription.cancel.wait(), channel.closed()).await {
            Either4::First(()) => {
                emit_periodic(world, codec, channel, &subscription, kind, oid).await;
            }
            Either4::Second(ue) => {
                if kind == ServiceModelKind::Mho {
                    emit_rrc_flip(codec, channel, &subscription, oid, ue.imsi, ue.serving.ecgi, ue.rrc_state).await;
                }
            }
            Either4::Third(()) => {
                log::info!("subscription {} deleted, emitter exiting", subscription.key);
                return;
            }
            Either4::Fourth(()) => {
                log::info!("channel closed for subscription {}, emitter exiting", subscription.key);
                return;
            }
        }
    }
}

async fn emit_periodic(world: &World, codec: &dyn CodecPlugin, channel: &dyn E2Channel, subscription: &SubscriptionRecord, kind: ServiceModelKind, oid: &str) {
    let Ok(node) = world.nodes.get(&subscription.node_id) else {
        log::warn!("subscription {} targets a node that no longer exists", subscription.key);
        return;
    };
    let timestamp = unix_timestamp_secs();

    match kind {
        ServiceModelKind::Kpm => {
            let action = KpmActionDefinition::default();
            for cell in world.cells.list_by_node(&node.node_id) {
                let header = kpm::build_kpm_header(cell.ecgi.plmn, kpm::gnb_id_as_22_bit_string(node.node_id), "ran-simulator".to_string(), "ran-simulator".to_string(), timestamp);
                let ue_count = world.ues.list_by_serving_cell(&cell.ecgi).len();
                let message = kpm::build_kpm_message(cell.ecgi, &action, ue_count);
                let pdu = RicIndication {
                    ric_instance_id: subscription.key.ric_instance_id,
                    requester_id: subscription.key.requester_id,
                    ran_function_id: subscription.key.ran_function_id,
                    header: IndicationHeader::Kpm(header),
                    message: IndicationMessage::KpmFormat1(message),
                };
                deliver(codec, channel, oid, pdu).await;
            }
        }
        ServiceModelKind::Mho => {
            for cell in world.cells.list_by_node(&node.node_id) {
                for ue in world.ues.list_by_serving_cell(&cell.ecgi) {
                    if ue.rrc_state == RrcState::Idle {
                        continue;
                    }
                    let Some(message) = mho::build_mho_format1(ue.imsi, ue.serving, &ue.neighbors) else {
                        continue;
                    };
                    let header = mho::build_mho_header(cell.ecgi.plmn, cell.ecgi, timestamp);
                    let pdu = RicIndication {
                        ric_instance_id: subscription.key.ric_instance_id,
                        requester_id: subscription.key.requester_id,
                        ran_function_id: subscription.key.ran_function_id,
                        header: IndicationHeader::Mho(header),
                        message: IndicationMessage::MhoFormat1(message),
                    };
                    deliver(codec, channel, oid, pdu).await;
                }
            }
        }
        ServiceModelKind::RcPre => {
            // No periodic report is defined for the RC-PRE stub (§10.6).
        }
    }
}

async fn emit_rrc_flip(codec: &dyn CodecPlugin, channel: &dyn E2Channel, subscription: &SubscriptionRecord, oid: &str, imsi: Imsi, ecgi: Ecgi, rrc_state: RrcState) {
    let header = mho::build_mho_header(ecgi.plmn, ecgi, unix_timestamp_secs());
    let message = mho::build_mho_format2(imsi, rrc_state);
    let pdu = RicIndication {
        ric_instance_id: subscription.key.ric_instance_id,
        requester_id: subscription.key.requester_id,
        ran_function_id: subscription.key.ran_function_id,
        header: IndicationHeader::Mho(header),
        message: IndicationMessage::MhoFormat2(message),
    };
    deliver(codec, channel, oid, pdu).await;
}

/// Encode (to validate the PDU is codec-representable) then hand the
/// typed PDU to the channel. Codec failures are logged and the offending
/// indication is dropped; the emitter keeps running (§4.F, §7).
async fn deliver(codec: &dyn CodecPlugin, channel: &dyn E2Channel, oid: &str, pdu: RicIndication) {
    if let Err(err) = codec.encode_indication(oid, &pdu.header, &pdu.message) {
        log::error!("codec failed to encode indication for oid {oid}: {err}");
        return;
    }
    if let Err(err) = channel.ric_indication(pdu).await {
        log::error!("channel rejected indication: {err}");
    }
}

#[embassy_executor::task(pool_size = MAX_CONCURRENT_SUBSCRIPTIONS)]
async fn emitter_task(world: &'static World, codec: Arc<dyn CodecPlugin>, channel: Arc<dyn E2Channel>, subscription: SubscriptionRecord, kind: ServiceModelKind, oid: &'static str) {
    run_emitter(world, codec.as_ref(), channel.as_ref(), subscription, kind, oid).await;
}

/// Register the accepted subscription and spawn its emitter (§4.E step 4-5).
pub fn register_and_spawn(
    spawner: embassy_executor::Spawner,
    world: &'static World,
    codec: Arc<dyn CodecPlugin>,
    channel: Arc<dyn E2Channel>,
    record: SubscriptionRecord,
    kind: ServiceModelKind,
    oid: &'static str,
) -> crate::error::Result<()> {
    world.subscriptions.create(record.clone())?;
    spawner
        .spawn(emitter_task(world, codec, channel, record, kind, oid))
        .map_err(|_| crate::error::Error::Internal("emitter task pool exhausted".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::e2::RequestedAction;
    use crate::model::{ActionType, Cell, NeighborMeasurement, Node, NodeStatus, PlmnId, RanFunctionId, SectorGeometry, ServingCell, Ue};
    use crate::registry::{KpmClient, MhoClient};
    use std::sync::Arc as StdArc;
    use std::sync::Mutex;

    /// Records every indication handed to it instead of sending it anywhere.
    #[derive(Default)]
    struct RecordingChannel {
        delivered: Mutex<Vec<RicIndication>>,
    }

    #[async_trait::async_trait]
    impl E2Channel for RecordingChannel {
        async fn ric_indication(&self, pdu: RicIndication) -> crate::error::Result<()> {
            self.delivered.lock().unwrap().push(pdu);
            Ok(())
        }

        async fn closed(&self) {
            std::future::pending().await
        }
    }

    /// A channel whose context is already closed, for cancellation tests.
    struct ClosedChannel;

    #[async_trait::async_trait]
    impl E2Channel for ClosedChannel {
        async fn ric_indication(&self, _pdu: RicIndication) -> crate::error::Result<()> {
            Ok(())
        }

        async fn closed(&self) {}
    }

    struct NoopCodec;

    impl CodecPlugin for NoopCodec {
        fn encode_indication(&self, _oid: &str, _header: &IndicationHeader, _message: &IndicationMessage) -> crate::error::Result<Vec<u8>> {
            Ok(Vec::new())
        }

        fn decode_indication(&self, _oid: &str, _header_bytes: &[u8], _message_bytes: &[u8]) -> crate::error::Result<(IndicationHeader, IndicationMessage)> {
            unimplemented!("not exercised by these tests")
        }
    }

    fn populated_world(ue_count: usize) -> World {
        let world = World::new(crate::config::SimulatorConfig::default());
        let ecgi = Ecgi { plmn: PlmnId::new(1), enb_id: NodeId(1), cell_index: 1 };
        world.nodes.put(Node { node_id: NodeId(1), cells: vec![ecgi], controllers: Vec::new(), service_models: Vec::new(), status: NodeStatus::Running });
        world.cells.put(Cell {
            ecgi,
            sector: SectorGeometry { center: crate::model::GeoPoint { lat: 0.0, lng: 0.0 }, azimuth: 0.0, arc: 360.0 },
            tx_power_db: 40.0,
            max_ues: 100,
            neighbors: Vec::new(),
            color: "c".into(),
            node_id: NodeId(1),
        });
        for i in 0..ue_count {
            world.ues.put(Ue {
                imsi: Imsi(1_000_001 + i as u32),
                ue_type: "phone".into(),
                position: crate::model::GeoPoint { lat: 0.0, lng: 0.0 },
                heading_deg: 0.0,
                crnti: 1,
                serving: ServingCell { ecgi, strength_db: -70.0 },
                neighbors: Vec::new(),
                rrc_state: RrcState::Idle,
                admitted: true,
                handover_dwell: 0,
            });
        }
        world.install_service_model(NodeId(1), RanFunctionId(1), StdArc::new(KpmClient));
        world.install_service_model(NodeId(1), RanFunctionId(2), StdArc::new(MhoClient));
        world
    }

    fn subscription_record(kind_fn_id: RanFunctionId) -> SubscriptionRecord {
        SubscriptionRecord {
            key: SubscriptionKey { ric_instance_id: 1, requester_id: 2, ran_function_id: kind_fn_id },
            node_id: NodeId(1),
            accepted_actions: vec![1],
            rejected_actions: Vec::new(),
            report_period: Duration::from_millis(1000),
            cancel: Arc::new(Signal::new()),
        }
    }

    #[test]
    fn kpm_periodic_report_reflects_current_ue_count() {
        let world = populated_world(3);
        let record = subscription_record(RanFunctionId(1));
        let channel = RecordingChannel::default();
        let codec = NoopCodec;
        embassy_futures::block_on(emit_periodic(&world, &codec, &channel, &record, ServiceModelKind::Kpm, KPM_OID_FOR_TEST));

        let delivered = channel.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        match &delivered[0].message {
            IndicationMessage::KpmFormat1(message) => {
                assert_eq!(message.records.len(), 2);
                for record in &message.records {
                    assert_eq!(record.value, crate::e2::MeasurementValue::Integer(3));
                }
            }
            other => panic!("expected a KPM format-1 message, got {other:?}"),
        }
    }

    #[test]
    fn mho_periodic_suppresses_ue_with_no_neighbors() {
        let world = populated_world(1);
        world.ues.update(&Imsi(1_000_001), |ue| ue.rrc_state = RrcState::Connected).unwrap();
        let record = subscription_record(RanFunctionId(2));
        let channel = RecordingChannel::default();
        let codec = NoopCodec;
        embassy_futures::block_on(emit_periodic(&world, &codec, &channel, &record, ServiceModelKind::Mho, MHO_OID_FOR_TEST));
        assert!(channel.delivered.lock().unwrap().is_empty());

        world
            .ues
            .update(&Imsi(1_000_001), |ue| ue.neighbors = vec![NeighborMeasurement { ecgi: Ecgi { plmn: PlmnId::new(1), enb_id: NodeId(1), cell_index: 2 }, strength_db: -90.0 }])
            .unwrap();
        embassy_futures::block_on(emit_periodic(&world, &codec, &channel, &record, ServiceModelKind::Mho, MHO_OID_FOR_TEST));
        assert_eq!(channel.delivered.lock().unwrap().len(), 1);
    }

    #[test]
    fn rrc_flip_emits_exactly_one_format2_indication() {
        let channel = RecordingChannel::default();
        let codec = NoopCodec;
        let record = subscription_record(RanFunctionId(2));
        let ecgi = Ecgi { plmn: PlmnId::new(1), enb_id: NodeId(1), cell_index: 1 };
        embassy_futures::block_on(emit_rrc_flip(&codec, &channel, &record, MHO_OID_FOR_TEST, Imsi(1_000_001), ecgi, RrcState::Connected));

        let delivered = channel.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert!(matches!(delivered[0].message, IndicationMessage::MhoFormat2(_)));
    }

    #[test]
    fn emitter_exits_immediately_when_channel_is_already_closed() {
        let world = populated_world(1);
        let record = subscription_record(RanFunctionId(1));
        let channel = ClosedChannel;
        let codec = NoopCodec;
        // `run_emitter` must return on its very first `select4` poll rather
        // than waiting for a tick, since `closed()` resolves immediately.
        embassy_futures::block_on(run_emitter(&world, &codec, &channel, record, ServiceModelKind::Kpm, KPM_OID_FOR_TEST));
    }

    const KPM_OID_FOR_TEST: &str = "1.3.6.1.4.1.53148.1.1.2.2";
    const MHO_OID_FOR_TEST: &str = "1.3.6.1.4.1.53148.1.1.2.3";

    fn request(ran_function_id: RanFunctionId, actions: Vec<RequestedAction>, trigger_ms: Option<u32>) -> RicSubscriptionRequest {
        RicSubscriptionRequest {
            ric_instance_id: 1,
            requester_id: 2,
            ran_function_id,
            actions,
            event_trigger_definition: trigger_ms.map(|ms| ms.to_be_bytes().to_vec()).unwrap_or_default(),
        }
    }

    fn world_with_kpm() -> World {
        let world = World::new(crate::config::SimulatorConfig::default());
        world.install_service_model(NodeId(1), RanFunctionId(1), StdArc::new(KpmClient));
        world.install_service_model(NodeId(1), RanFunctionId(2), StdArc::new(MhoClient));
        world
    }

    #[test]
    fn zero_report_actions_is_rejected() {
        let world = world_with_kpm();
        let req = request(RanFunctionId(1), vec![RequestedAction { action_id: 1, action_type: ActionType::Insert, action_definition: Vec::new() }], Some(1000));
        match prepare_subscription(&world, NodeId(1), &req) {
            SubscriptionOutcome::Rejected(failure) => {
                assert_eq!(failure.rejected_actions.len(), 1);
                assert_eq!(failure.rejected_actions[0].1, RejectCause::ActionNotSupported);
            }
            SubscriptionOutcome::Accepted { .. } => panic!("expected rejection"),
        }
    }

    #[test]
    fn malformed_event_trigger_is_rejected() {
        let world = world_with_kpm();
        let req = request(RanFunctionId(1), vec![RequestedAction { action_id: 1, action_type: ActionType::Report, action_definition: Vec::new() }], None);
        match prepare_subscription(&world, NodeId(1), &req) {
            SubscriptionOutcome::Rejected(failure) => {
                assert_eq!(failure.rejected_actions[0].1, RejectCause::EventTriggerMalformed);
            }
            SubscriptionOutcome::Accepted { .. } => panic!("expected rejection"),
        }
    }

    #[test]
    fn report_action_is_accepted_and_produces_a_record() {
        let world = world_with_kpm();
        let req = request(RanFunctionId(1), vec![RequestedAction { action_id: 1, action_type: ActionType::Report, action_definition: Vec::new() }], Some(1000));
        match prepare_subscription(&world, NodeId(1), &req) {
            SubscriptionOutcome::Accepted { response, record } => {
                assert_eq!(response.accepted_actions, vec![1]);
                assert_eq!(record.report_period, Duration::from_millis(1000));
            }
            SubscriptionOutcome::Rejected(_) => panic!("expected acceptance"),
        }
    }

    #[test]
    fn delete_of_unknown_subscription_is_a_failure() {
        let world = world_with_kpm();
        let key = SubscriptionKey { ric_instance_id: 9, requester_id: 9, ran_function_id: RanFunctionId(1) };
        assert!(handle_subscription_delete(&world, &key).is_err());
    }

    #[test]
    fn dispatch_control_reaches_the_installed_client() {
        let world = world_with_kpm();
        let request = RicControlRequest { ran_function_id: RanFunctionId(2), node_id: NodeId(1), payload: Vec::new() };
        let result = embassy_futures::block_on(dispatch_control(&world, NodeId(1), request));
        assert!(matches!(result, Ok(Ok(_))));
    }

    #[test]
    fn dispatch_control_not_found_for_uninstalled_node() {
        let world = world_with_kpm();
        let request = RicControlRequest { ran_function_id: RanFunctionId(1), node_id: NodeId(99), payload: Vec::new() };
        let result = embassy_futures::block_on(dispatch_control(&world, NodeId(99), request));
        assert!(matches!(result, Err(crate::error::Error::NotFound(_))));
    }

    #[test]
    fn delete_signals_cancellation() {
        let world = world_with_kpm();
        let req = request(RanFunctionId(1), vec![RequestedAction { action_id: 1, action_type: ActionType::Report, action_definition: Vec::new() }], Some(1000));
        let record = match prepare_subscription(&world, NodeId(1), &req) {
            SubscriptionOutcome::Accepted { record, .. } => record,
            SubscriptionOutcome::Rejected(_) => panic!("expected acceptance"),
        };
        let cancel = record.cancel.clone();
        world.subscriptions.create(record).unwrap();
        let key = SubscriptionKey { ric_instance_id: 1, requester_id: 2, ran_function_id: RanFunctionId(1) };
        assert!(handle_subscription_delete(&world, &key).is_ok());
        assert!(cancel.signaled());
    }
}
