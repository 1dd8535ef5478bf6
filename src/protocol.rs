use std::time::Instant;

use serde_json::Value;
use tracing::warn;

use crate::types::{Capabilities, CodeTable, LiveState, Mode, TempRange, Zone};

pub const APP_VERSION: &str = "5.3.1330";
pub const API_VERSION: u32 = 3;

/// Fan stage tables keyed by the capability report's `fanstage` count.
/// Code 0 is reserved for the synthetic "auto" entry added when the
/// unit reports `hasautofan`.
const FAN_STAGES_1: &[(u8, &str)] = &[(5, "on")];
const FAN_STAGES_2: &[(u8, &str)] = &[(2, "low"), (5, "high")];
const FAN_STAGES_3: &[(u8, &str)] = &[(2, "low"), (3, "medium"), (5, "high")];
const FAN_STAGES_4: &[(u8, &str)] = &[(2, "low"), (3, "medium"), (5, "high"), (6, "Max")];
const FAN_STAGES_5: &[(u8, &str)] = &[
    (1, "low"),
    (2, "medium"),
    (3, "Medium High"),
    (5, "high"),
    (6, "Max"),
];

const VERTICAL_VANE: &[(u8, &str)] = &[
    (0, "Auto"),
    (1, "1"),
    (2, "2"),
    (3, "3"),
    (4, "4"),
    (5, "5"),
    (7, "Swing"),
];

const HORIZONTAL_VANE: &[(u8, &str)] = &[
    (0, "Auto"),
    (1, "1"),
    (2, "2"),
    (3, "3"),
    (4, "4"),
    (5, "5"),
    (8, "Split"),
    (12, "Swing"),
];

/// Lossnay/ERV presets ride on the `MD` opcode.
const LOSSNAY_PRESETS: &[(u8, &str)] = &[(1, "Lossnay"), (7, "Bypass"), (3, "Auto Lossnay")];

pub fn lossnay_preset_code(label: &str) -> Option<u8> {
    LOSSNAY_PRESETS
        .iter()
        .find(|(_, l)| *l == label)
        .map(|(c, _)| *c)
}

pub fn lossnay_preset_labels() -> impl Iterator<Item = &'static str> {
    LOSSNAY_PRESETS.iter().map(|(_, l)| *l)
}

// -- Command token encoders --

pub fn power_command(on: bool) -> String {
    format!("PW{}", on as u8)
}

pub fn mode_command(code: u8) -> String {
    format!("MD{code}")
}

pub fn fan_command(code: u8) -> String {
    format!("FS{:.2}", code as f64)
}

pub fn temperature_command(temp: f64) -> String {
    format!("TS{temp:.2}")
}

pub fn vertical_vane_command(code: u8) -> String {
    format!("AV{code}")
}

pub fn horizontal_vane_command(code: u8) -> String {
    format!("AH{:.2}", code as f64)
}

pub fn zone_command(zone_id: u32, on: bool) -> String {
    format!("Z{zone_id}{}", on as u8)
}

/// XML envelope accepted by the adapter's local `/smart` endpoint.
pub fn local_command_body(token: &str) -> String {
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?><ESV>{token}</ESV>")
}

// -- Capability / live-state decoding --

/// Build the fan table a capability report selects. Out-of-range stage
/// counts fall back to the 3-stage table.
pub fn build_fan_table(fan_stage: u8, has_auto_fan: bool) -> CodeTable {
    let stages = match fan_stage {
        1 => FAN_STAGES_1,
        2 => FAN_STAGES_2,
        3 => FAN_STAGES_3,
        4 => FAN_STAGES_4,
        5 => FAN_STAGES_5,
        other => {
            warn!(fan_stage = other, "unexpected fanstage, using 3-stage table");
            FAN_STAGES_3
        }
    };
    let mut entries = Vec::with_capacity(stages.len() + 1);
    if has_auto_fan {
        entries.push((0, "auto"));
    }
    entries.extend_from_slice(stages);
    CodeTable::new(entries)
}

/// Vertical vane table filtered to the codes the unit declares
/// supported; empty when the unit has no vertical vane at all.
pub fn build_vertical_vane_table(
    has_vane: bool,
    has_auto: bool,
    has_swing: bool,
) -> CodeTable {
    if !has_vane {
        return CodeTable::default();
    }
    CodeTable::new(filter_vane(VERTICAL_VANE, has_auto, has_swing))
}

pub fn build_horizontal_vane_table(
    has_vane: bool,
    has_auto: bool,
    has_swing: bool,
) -> CodeTable {
    if !has_vane {
        return CodeTable::default();
    }
    CodeTable::new(filter_vane(HORIZONTAL_VANE, has_auto, has_swing))
}

fn filter_vane(full: &[(u8, &'static str)], has_auto: bool, has_swing: bool) -> Vec<(u8, &'static str)> {
    full.iter()
        .filter(|(_, label)| match *label {
            "Auto" => has_auto,
            "Swing" => has_swing,
            _ => true,
        })
        .copied()
        .collect()
}

/// Decode a capability payload into a value object. Missing or
/// unexpected fields take documented defaults; only the `error` and
/// `fault` strings are worth a warning.
pub fn decode_capabilities(data: &Value) -> Capabilities {
    let fan_stage = json_u8(data.get("fanstage")).unwrap_or(3);
    let has_auto_fan = json_flag(data.get("hasautofan"));
    let has_vertical = json_flag(data.get("hasairdir"));
    let has_horizontal = json_flag(data.get("hasairdirh"));
    let has_swing = json_flag(data.get("hasswing"));
    let has_auto_vane = json_flag(data.get("hasairauto"));

    let mut temp_ranges = std::collections::BTreeMap::new();
    if let Some(max) = data.get("max") {
        for mode in Mode::ALL {
            let range = max.get(mode.code().to_string());
            if let (Some(min), Some(max)) = (
                range.and_then(|r| json_f64(r.get("min"))),
                range.and_then(|r| json_f64(r.get("max"))),
            ) {
                temp_ranges.insert(mode, TempRange { min, max });
            }
        }
        // Dry shares cool's range; the report never lists it separately.
        if let Some(cool) = temp_ranges.get(&Mode::Cool).copied() {
            temp_ranges.entry(Mode::Dry).or_insert(cool);
        }
    }

    if let Some(err) = data.get("error").and_then(|v| v.as_str())
        && err != "ok"
    {
        warn!(error = err, "unit capabilities error, continuing");
    }
    if let Some(fault) = data.get("fault").and_then(|v| v.as_str())
        && !fault.is_empty()
    {
        warn!(fault, "unit capabilities fault, continuing");
    }

    Capabilities {
        model: data.get("modelname").and_then(|v| v.as_str()).map(str::to_string),
        unit_type: data.get("unittype").and_then(|v| v.as_u64()),
        half_degree_steps: json_flag(data.get("halfdeg")),
        fan: build_fan_table(fan_stage, has_auto_fan),
        temp_ranges,
        has_vertical_vane: has_vertical,
        has_horizontal_vane: has_horizontal,
        has_swing,
        has_auto_vane,
        has_outdoor_temp: json_flag(data.get("hasoutdoortemp")),
        vertical_vane: build_vertical_vane_table(has_vertical, has_auto_vane, has_swing),
        horizontal_vane: build_horizontal_vane_table(has_horizontal, has_auto_vane, has_swing),
        local_ip: data
            .get("localip")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    }
}

/// Decode a live-state payload. Zones are replaced wholesale; fields
/// that fail to parse are left `None` for accessors to police.
pub fn decode_live_state(data: &Value) -> LiveState {
    let zones = match data.get("zones") {
        Some(Value::Array(entries)) => entries
            .iter()
            .filter_map(|z| {
                let id = json_u32(z.get("zoneid"))?;
                Some(Zone {
                    id,
                    name: z
                        .get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string(),
                    active: json_truthy(z.get("status")),
                })
            })
            .collect(),
        _ => Vec::new(),
    };

    LiveState {
        power: json_truthy(data.get("power")),
        standby: json_truthy(data.get("standby")),
        mode_code: json_u8(data.get("setmode")).unwrap_or(Mode::Auto.code()),
        set_temp: json_f64(data.get("settemp")),
        room_temp: json_f64(data.get("roomtemp")),
        outdoor_temp: json_f64(data.get("outdoortemp")),
        fan_code: json_u8(data.get("setfan")),
        vertical_vane_code: json_u8(data.get("airdir")),
        horizontal_vane_code: json_u8(data.get("airdirh")),
        zones,
        fault: data
            .get("fault")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        error: data
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("ok")
            .to_string(),
        fetched_at: Instant::now(),
    }
}

// The cloud is loose with types: numbers arrive as numbers or numeric
// strings, flags as 0/1, booleans, or strings.

pub(crate) fn json_f64(v: Option<&Value>) -> Option<f64> {
    match v {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn json_u8(v: Option<&Value>) -> Option<u8> {
    json_f64(v).and_then(|f| {
        if f.fract() == 0.0 && (0.0..=255.0).contains(&f) {
            Some(f as u8)
        } else {
            None
        }
    })
}

pub(crate) fn json_u32(v: Option<&Value>) -> Option<u32> {
    json_f64(v).and_then(|f| {
        if f.fract() == 0.0 && (0.0..=u32::MAX as f64).contains(&f) {
            Some(f as u32)
        } else {
            None
        }
    })
}

pub(crate) fn json_flag(v: Option<&Value>) -> bool {
    json_truthy(v)
}

pub(crate) fn json_truthy(v: Option<&Value>) -> bool {
    match v {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => matches!(s.trim(), "1" | "true" | "on"),
        _ => false,
    }
}
