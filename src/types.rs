use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

/// Operating mode of a unit. "Off" is not a mode in the MELView
/// protocol; it is a power toggle handled above this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mode {
    Auto,
    Heat,
    Cool,
    Dry,
    FanOnly,
}

impl Mode {
    pub const ALL: [Mode; 5] = [Mode::Auto, Mode::Heat, Mode::Cool, Mode::Dry, Mode::FanOnly];

    pub fn code(&self) -> u8 {
        match self {
            Mode::Auto => 8,
            Mode::Heat => 1,
            Mode::Cool => 3,
            Mode::Dry => 2,
            Mode::FanOnly => 7,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            8 => Some(Mode::Auto),
            1 => Some(Mode::Heat),
            3 => Some(Mode::Cool),
            2 => Some(Mode::Dry),
            7 => Some(Mode::FanOnly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Auto => "auto",
            Mode::Heat => "heat",
            Mode::Cool => "cool",
            Mode::Dry => "dry",
            Mode::FanOnly => "fan_only",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a unit as reported by the rooms listing. Immutable once
/// discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub unit_id: u32,
    pub building_id: u32,
    pub friendly_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempRange {
    pub min: f64,
    pub max: f64,
}

/// Single ordered code↔label table for one axis (fan stages or vane
/// positions). Forward and reverse lookups are derived from the same
/// entries, so a label that encodes always decodes back to itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeTable {
    entries: Vec<(u8, &'static str)>,
}

impl CodeTable {
    pub fn new(entries: Vec<(u8, &'static str)>) -> Self {
        Self { entries }
    }

    pub fn label(&self, code: u8) -> Option<&'static str> {
        self.entries.iter().find(|(c, _)| *c == code).map(|(_, l)| *l)
    }

    pub fn code(&self, label: &str) -> Option<u8> {
        self.entries.iter().find(|(_, l)| *l == label).map(|(c, _)| *c)
    }

    pub fn labels(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(_, l)| *l)
    }

    pub fn codes(&self) -> impl Iterator<Item = u8> + '_ {
        self.entries.iter().map(|(c, _)| *c)
    }

    pub fn contains_code(&self, code: u8) -> bool {
        self.entries.iter().any(|(c, _)| *c == code)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Static-per-session descriptor of what a unit supports. Fetched once
/// and only refreshed explicitly.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub model: Option<String>,
    pub unit_type: Option<u64>,
    pub half_degree_steps: bool,
    pub fan: CodeTable,
    pub temp_ranges: BTreeMap<Mode, TempRange>,
    pub has_vertical_vane: bool,
    pub has_horizontal_vane: bool,
    pub has_swing: bool,
    pub has_auto_vane: bool,
    pub has_outdoor_temp: bool,
    pub vertical_vane: CodeTable,
    pub horizontal_vane: CodeTable,
    pub local_ip: Option<String>,
}

impl Capabilities {
    pub fn temp_range(&self, mode: Mode) -> Option<TempRange> {
        self.temp_ranges.get(&mode).copied()
    }
}

/// Sub-area of a unit's conditioned space with independent on/off
/// status. Replaced wholesale on each live-state refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    pub id: u32,
    pub name: String,
    pub active: bool,
}

/// Frequently-changing operational snapshot of a unit, leased for
/// `Device::state_lease` from `fetched_at`.
#[derive(Debug, Clone)]
pub struct LiveState {
    pub power: bool,
    pub standby: bool,
    pub mode_code: u8,
    pub set_temp: Option<f64>,
    pub room_temp: Option<f64>,
    pub outdoor_temp: Option<f64>,
    pub fan_code: Option<u8>,
    pub vertical_vane_code: Option<u8>,
    pub horizontal_vane_code: Option<u8>,
    pub zones: Vec<Zone>,
    pub fault: String,
    pub error: String,
    pub fetched_at: Instant,
}

impl LiveState {
    /// Decoded operating mode; unrecognized codes fall back to auto.
    pub fn mode(&self) -> Mode {
        Mode::from_code(self.mode_code).unwrap_or(Mode::Auto)
    }
}
