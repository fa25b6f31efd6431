//! KPM v2, format 1 report builder (§4.F).
//!
//! The action definition and event-trigger definition are, per §6, opaque
//! bytes the embedder's codec plugin alone understands the ASN.1 layout
//! of. This crate still has to read *some* fields out of them (the
//! declared measurement types, subscription ID, granularity, and report
//! period) to drive the builder logic in §4.E/§4.F, so it defines its own
//! tiny wire format for those bytes rather than reaching into ASN.1: a
//! tagged, length-prefixed byte layout documented on `decode` below. A
//! real deployment's codec plugin would decode the actual E2SM-KPM ASN.1
//! action definition into the same `KpmActionDefinition` shape; this
//! crate just owns that shape and a matching encode/decode pair so the
//! demo binary and tests can round-trip it (see `DESIGN.md`).

use crate::e2::{KpmHeader, KpmMessage, MeasurementRecord, MeasurementValue};
use crate::model::{Ecgi, NodeId, PlmnId};

/// The KPM header's `gNB-ID` field is carried as a 22-bit bitstring (§4.F).
pub fn gnb_id_as_22_bit_string(node_id: NodeId) -> String {
    format!("{:022b}", node_id.0 & 0x003F_FFFF)
}

pub const DEFAULT_SUBSCRIPTION_ID: i64 = 123_456;
pub const DEFAULT_GRANULARITY_PERIOD_MS: i64 = 21;

/// Measurement type names the store can actually answer (§4.F).
pub const MEASUREMENT_RRC_CONN_MAX: &str = "RRC.Conn.Max";
pub const MEASUREMENT_RRC_CONN_AVG: &str = "RRC.Conn.Avg";

#[derive(Debug, Clone, PartialEq)]
pub struct KpmActionDefinition {
    pub subscription_id: i64,
    pub granularity_period_ms: i64,
    pub measurement_types: Vec<String>,
}

impl Default for KpmActionDefinition {
    fn default() -> Self {
        KpmActionDefinition {
            subscription_id: DEFAULT_SUBSCRIPTION_ID,
            granularity_period_ms: DEFAULT_GRANULARITY_PERIOD_MS,
            measurement_types: vec![MEASUREMENT_RRC_CONN_MAX.to_string(), MEASUREMENT_RRC_CONN_AVG.to_string()],
        }
    }
}

impl KpmActionDefinition {
    /// Layout: `subscription_id: i64 BE | granularity_period_ms: i64 BE |
    /// comma-joined measurement type names (UTF-8, rest of buffer)`.
    /// Empty input decodes to the documented defaults (§4.F).
    pub fn decode(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return Self::default();
        }
        if bytes.len() < 16 {
            return Self::default();
        }
        let subscription_id = i64::from_be_bytes(bytes[0..8].try_into().unwrap());
        let granularity_period_ms = i64::from_be_bytes(bytes[8..16].try_into().unwrap());
        let types_raw = String::from_utf8_lossy(&bytes[16..]);
        let measurement_types: Vec<String> = types_raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect();
        if measurement_types.is_empty() {
            return Self::default();
        }
        KpmActionDefinition { subscription_id, granularity_period_ms, measurement_types }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.subscription_id.to_be_bytes());
        out.extend_from_slice(&self.granularity_period_ms.to_be_bytes());
        out.extend_from_slice(self.measurement_types.join(",").as_bytes());
        out
    }
}

/// Build the KPM indication header for a reporting cell (§4.F).
pub fn build_kpm_header(plmn: PlmnId, gnb_id_22_bits: String, sender: String, vendor: String, timestamp_unix_secs: u32) -> KpmHeader {
    KpmHeader {
        plmn,
        gnb_id_22_bits,
        sender,
        vendor,
        file_format_tag: "KPM-V2-F1".to_string(),
        timestamp_unix_secs,
    }
}

/// Build the KPM format-1 message for one cell from the current UE count
/// serving it (§4.F): one `MeasurementDataItem` with `IncompleteFlag =
/// true` and one record per declared measurement type.
pub fn build_kpm_message(ecgi: Ecgi, action: &KpmActionDefinition, ue_count_in_cell: usize) -> KpmMessage {
    let records = action
        .measurement_types
        .iter()
        .map(|measurement_type| {
            let value = match measurement_type.as_str() {
                MEASUREMENT_RRC_CONN_MAX | MEASUREMENT_RRC_CONN_AVG => MeasurementValue::Integer(ue_count_in_cell as i64),
                _ => MeasurementValue::NoValue,
            };
            MeasurementRecord { measurement_type: measurement_type.clone(), value }
        })
        .collect();

    KpmMessage {
        cell_object_id: ecgi.as_decimal().to_string(),
        subscription_id: action.subscription_id,
        granularity_period_ms: action.granularity_period_ms,
        incomplete_flag: true,
        records,
    }
}
