use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::config::constants;

/// Machine state reported in the `gcode_state` field.
///
/// Unknown strings are kept verbatim in [`GcodeState::Other`] so that new
/// firmware states never break deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GcodeState {
    Prepare,
    Running,
    Pause,
    Finish,
    Failed,
    Idle,
    Other(String),
}

impl GcodeState {
    pub fn as_str(&self) -> &str {
        match self {
            GcodeState::Prepare => "PREPARE",
            GcodeState::Running => "RUNNING",
            GcodeState::Pause => "PAUSE",
            GcodeState::Finish => "FINISH",
            GcodeState::Failed => "FAILED",
            GcodeState::Idle => "IDLE",
            GcodeState::Other(s) => s,
        }
    }

    /// Human readable label used by message templates.
    pub fn display_text(&self) -> &'static str {
        match self {
            GcodeState::Prepare => "Starting",
            GcodeState::Running => "Printing",
            GcodeState::Pause => "Paused",
            GcodeState::Finish => "Finished",
            GcodeState::Failed => "Failed",
            GcodeState::Idle => "Idle",
            GcodeState::Other(_) => "Printing",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, GcodeState::Other(_))
    }
}

impl From<String> for GcodeState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "PREPARE" => GcodeState::Prepare,
            "RUNNING" => GcodeState::Running,
            "PAUSE" => GcodeState::Pause,
            "FINISH" => GcodeState::Finish,
            "FAILED" => GcodeState::Failed,
            "IDLE" => GcodeState::Idle,
            _ => GcodeState::Other(value),
        }
    }
}

impl From<&str> for GcodeState {
    fn from(value: &str) -> Self {
        GcodeState::from(value.to_string())
    }
}

impl From<GcodeState> for String {
    fn from(value: GcodeState) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for GcodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One status report pushed by the printer.
///
/// Only the fields the notifier reasons about are typed. Everything else
/// (AMS, lights, camera metadata, ...) is kept in `extra` so the print log
/// can persist the full record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcode_state: Option<GcodeState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_num: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_layer_num: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mc_percent: Option<i64>,
    /// Remaining print time in minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mc_remaining_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mc_print_sub_stage: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcode_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StatusRecord {
    /// Machine state, treating a missing field as an empty unknown state.
    pub fn state(&self) -> GcodeState {
        self.gcode_state
            .clone()
            .unwrap_or_else(|| GcodeState::Other(String::new()))
    }

    pub fn layer(&self) -> i64 {
        self.layer_num.unwrap_or(0)
    }

    pub fn total_layers(&self) -> i64 {
        self.total_layer_num.unwrap_or(0)
    }
}

/// How the progress percentage is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PercentMode {
    /// Use the firmware reported (time based) `mc_percent`.
    Time,
    /// Recompute from `layer_num / total_layer_num`.
    Layer,
}

/// A status record with derived fields filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedStatus {
    pub record: StatusRecord,
    /// Progress in whole percent, always within 0..=100.
    pub percent: u8,
    pub stage_name: String,
}

impl NormalizedStatus {
    pub fn state(&self) -> GcodeState {
        self.record.state()
    }
}

/// Derives consistent progress and stage fields from raw records.
#[derive(Debug, Clone)]
pub struct StatusNormalizer {
    mode: PercentMode,
}

impl StatusNormalizer {
    pub fn new(mode: PercentMode) -> Self {
        Self { mode }
    }

    pub fn normalize(&self, mut record: StatusRecord) -> NormalizedStatus {
        let percent = match self.mode {
            PercentMode::Layer => layer_percent(record.layer(), record.total_layers()),
            PercentMode::Time => record.mc_percent.unwrap_or(0).clamp(0, 100) as u8,
        };
        record.mc_percent = Some(i64::from(percent));

        if let Some(state) = &record.gcode_state {
            if !state.is_known() {
                warn!("Unrecognized gcode_state '{}'", state);
            }
        }

        let stage_name = stage_name(record.mc_print_sub_stage);

        NormalizedStatus {
            record,
            percent,
            stage_name,
        }
    }
}

/// `floor(100 * layer / total)` clamped to 0..=100; a non-positive total is 0%.
pub fn layer_percent(layer: i64, total: i64) -> u8 {
    if total <= 0 {
        return 0;
    }
    (layer.saturating_mul(100) / total).clamp(0, 100) as u8
}

/// Resolve a print sub-stage code to its description.
pub fn stage_name(code: Option<i64>) -> String {
    match code {
        Some(code) => STAGE_NAMES
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, name)| (*name).to_string())
            .unwrap_or_else(|| format!("Unknown Stage ({})", code)),
        None => format!("Unknown Stage ({})", constants::MISSING_STAGE_TEXT),
    }
}

const STAGE_NAMES: &[(i64, &str)] = &[
    (-1, "Idle"),
    (0, "Printing"),
    (1, "Auto bed leveling"),
    (2, "Heatbed preheating"),
    (3, "Sweeping XY mech mode"),
    (4, "Changing filament"),
    (5, "M400 pause"),
    (6, "Paused due to filament runout"),
    (7, "Heating hotend"),
    (8, "Calibrating extrusion"),
    (9, "Scanning bed surface"),
    (10, "Inspecting first layer"),
    (11, "Identifying build plate type"),
    (12, "Calibrating Micro Lidar"),
    (13, "Homing toolhead"),
    (14, "Cleaning nozzle tip"),
    (15, "Checking extruder temperature"),
    (16, "Paused by the user"),
    (17, "Pause of front cover falling"),
    (18, "Calibrating the micro lidar"),
    (19, "Calibrating extrusion flow"),
    (20, "Paused due to nozzle temperature malfunction"),
    (21, "Paused due to heat bed temperature malfunction"),
    (22, "Filament unloading"),
    (23, "Skip step pause"),
    (24, "Filament loading"),
    (25, "Motor noise calibration"),
    (26, "Paused due to AMS lost"),
    (27, "Paused due to low speed of the heat break fan"),
    (28, "Paused due to chamber temperature control error"),
    (29, "Cooling chamber"),
    (30, "Paused by the Gcode inserted by user"),
    (31, "Motor noise showoff"),
    (32, "Nozzle filament covered detected pause"),
    (33, "Cutter error pause"),
    (34, "First layer error pause"),
    (35, "Nozzle clog pause"),
    (255, "Idle"),
];
