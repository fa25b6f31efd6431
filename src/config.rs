//! Simulation-wide configuration (§10.3).
//!
//! Everything here is a parameter the (out-of-scope) YAML model loader
//! would otherwise have to thread through by hand — topology generator
//! inputs, driver tick cadence, watcher channel sizing. Shaped after the
//! teacher's `control::config::ControlConfig`: a flat, `kebab-case` struct
//! loaded from TOML, with code-level defaults so a missing file never
//! blocks the demo binary from starting.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SimulatorConfig {
    pub center_lat: f64,
    pub center_lng: f64,
    pub num_towers: u32,
    pub sectors_per_tower: u8,
    pub plmn_id: u32,
    pub enb_start: u32,
    pub pitch_m: f64,
    pub max_distance_m: f64,
    pub max_neighbors: usize,
    pub single_node: bool,

    pub ue_count: usize,
    pub ue_neighbor_cap: usize,
    pub ue_speed_min_mps: f64,
    pub ue_speed_max_mps: f64,
    pub handover_hysteresis_db: f64,
    pub handover_dwell_ticks: u32,
    pub probability_of_rrc_state_change: f64,
    pub driver_tick_ms: u64,
    pub mobility_search_radius_m: f64,

    pub watcher_channel_capacity: usize,
    pub max_imsi_retry_attempts: u32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            center_lat: 52.52,
            center_lng: 13.41,
            num_towers: 7,
            sectors_per_tower: 3,
            plmn_id: 0x00F110,
            enb_start: 1,
            pitch_m: 500.0,
            max_distance_m: 400.0,
            max_neighbors: 6,
            single_node: false,

            ue_count: 10,
            ue_neighbor_cap: 4,
            ue_speed_min_mps: 1.0,
            ue_speed_max_mps: 14.0,
            handover_hysteresis_db: 3.0,
            handover_dwell_ticks: 2,
            probability_of_rrc_state_change: 0.05,
            driver_tick_ms: 1000,
            mobility_search_radius_m: 2000.0,

            watcher_channel_capacity: 64,
            max_imsi_retry_attempts: 5,
        }
    }
}

impl SimulatorConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// any key the file omits.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn driver_tick_interval(&self) -> Duration {
        Duration::from_millis(self.driver_tick_ms)
    }
}
