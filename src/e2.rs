//! E2AP wire interface surface (§6): the PDU kinds the subscription engine
//! exchanges with the RIC, and the two traits ("opaque collaborators" per
//! §1) an embedder must supply — a codec plugin that knows ASN.1 PER, and
//! an E2 channel that knows E2AP transport association. The core never
//! inspects bytes produced by either; it only calls through the traits.

use crate::model::{ActionId, ActionType, Ecgi, Imsi, NodeId, PlmnId, RanFunctionId, RejectCause, RrcState};
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RicSubscriptionRequest {
    pub ric_instance_id: i32,
    pub requester_id: i32,
    pub ran_function_id: RanFunctionId,
    pub actions: Vec<RequestedAction>,
    pub event_trigger_definition: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct RequestedAction {
    pub action_id: ActionId,
    pub action_type: ActionType,
    pub action_definition: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct RicSubscriptionResponse {
    pub ric_instance_id: i32,
    pub requester_id: i32,
    pub ran_function_id: RanFunctionId,
    pub accepted_actions: Vec<ActionId>,
}

#[derive(Debug, Clone)]
pub struct RicSubscriptionFailure {
    pub ric_instance_id: i32,
    pub requester_id: i32,
    pub ran_function_id: RanFunctionId,
    pub rejected_actions: Vec<(ActionId, RejectCause)>,
}

#[derive(Debug, Clone)]
pub struct RicSubscriptionDeleteRequest {
    pub ric_instance_id: i32,
    pub requester_id: i32,
    pub ran_function_id: RanFunctionId,
}

#[derive(Debug, Clone)]
pub struct RicSubscriptionDeleteResponse {
    pub ric_instance_id: i32,
    pub requester_id: i32,
    pub ran_function_id: RanFunctionId,
}

/// Not enumerated among the PDU kinds §6 lists by name, but required by
/// the delete path it describes in prose ("if the subscription is unknown,
/// respond with a failure PDU", §4.E step 6) — the natural E2AP
/// counterpart to `RicSubscriptionFailure` for the delete request.
#[derive(Debug, Clone)]
pub struct RicSubscriptionDeleteFailure {
    pub ric_instance_id: i32,
    pub requester_id: i32,
    pub ran_function_id: RanFunctionId,
    pub cause: String,
}

#[derive(Debug, Clone)]
pub struct RicControlRequest {
    pub ran_function_id: RanFunctionId,
    pub node_id: NodeId,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct RicControlAcknowledge {
    pub ran_function_id: RanFunctionId,
}

#[derive(Debug, Clone)]
pub struct RicControlFailure {
    pub ran_function_id: RanFunctionId,
    pub cause: String,
}

/// KPM v2, format 1 indication header (§4.F).
#[derive(Debug, Clone, PartialEq)]
pub struct KpmHeader {
    pub plmn: PlmnId,
    pub gnb_id_22_bits: String,
    pub sender: String,
    pub vendor: String,
    pub file_format_tag: String,
    pub timestamp_unix_secs: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MeasurementValue {
    Integer(i64),
    NoValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    pub measurement_type: String,
    pub value: MeasurementValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KpmMessage {
    pub cell_object_id: String,
    pub subscription_id: i64,
    pub granularity_period_ms: i64,
    pub incomplete_flag: bool,
    pub records: Vec<MeasurementRecord>,
}

/// MHO indication header (§4.F): PLMN + reporting cell's global identity.
#[derive(Debug, Clone, PartialEq)]
pub struct MhoHeader {
    pub plmn: PlmnId,
    pub ecgi: Ecgi,
    pub timestamp_unix_secs: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MhoMeasurementEntry {
    pub ecgi: Ecgi,
    pub rsrp_db: f64,
}

/// Format 1: measurement report, serving cell first then ranked neighbors.
#[derive(Debug, Clone, PartialEq)]
pub struct MhoFormat1Message {
    pub ue_id: Imsi,
    pub measurements: Vec<MhoMeasurementEntry>,
}

/// Format 2: RRC state change.
#[derive(Debug, Clone, PartialEq)]
pub struct MhoFormat2Message {
    pub ue_id: Imsi,
    pub rrc_state: RrcState,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndicationHeader {
    Kpm(KpmHeader),
    Mho(MhoHeader),
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndicationMessage {
    KpmFormat1(KpmMessage),
    MhoFormat1(MhoFormat1Message),
    MhoFormat2(MhoFormat2Message),
}

#[derive(Debug, Clone)]
pub struct RicIndication {
    pub ric_instance_id: i32,
    pub requester_id: i32,
    pub ran_function_id: RanFunctionId,
    pub header: IndicationHeader,
    pub message: IndicationMessage,
}

/// Extracted from the event-trigger definition (§4.E step 3).
#[derive(Debug, Clone, Copy)]
pub struct EventTrigger {
    pub report_period: Duration,
}

/// Codec plugin contract (§6): encodes/decodes service-model PDUs to/from
/// ASN.1 PER bytes, keyed by OID. The core never inspects the bytes.
#[async_trait]
pub trait CodecPlugin: Send + Sync {
    fn encode_indication(&self, oid: &str, header: &IndicationHeader, message: &IndicationMessage) -> crate::error::Result<Vec<u8>>;

    fn decode_indication(&self, oid: &str, header_bytes: &[u8], message_bytes: &[u8]) -> crate::error::Result<(IndicationHeader, IndicationMessage)>;
}

/// The E2 channel abstraction (§6): delivers indications to the RIC side
/// of an (opaque) E2AP transport association, and exposes the
/// cancellation signal the subscription engine must react to within one
/// tick when the association goes away.
#[async_trait]
pub trait E2Channel: Send + Sync {
    async fn ric_indication(&self, pdu: RicIndication) -> crate::error::Result<()>;

    /// Resolves once this channel's context is done (closed or errored).
    /// The emitter races this against its ticker so channel closure is
    /// noticed immediately rather than only on the next scheduled tick.
    async fn closed(&self);
}
