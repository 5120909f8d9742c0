use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Format identifier used until the operator picks one.
pub const DEFAULT_FORMAT: &str = "ibm.1440";

/// Highest addressable track on the supported drives.
pub const MAX_TRACK: u32 = 83;

pub const DEFAULT_SECTORS_EXPECTED: u32 = 18;

/// Operating profile trading measurement latency for precision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubMode {
    Direct,
    FineTune,
    HighPrecision,
}

impl SubMode {
    pub const ALL: [SubMode; 3] = [SubMode::Direct, SubMode::FineTune, SubMode::HighPrecision];

    pub fn as_str(self) -> &'static str {
        match self {
            SubMode::Direct => "direct",
            SubMode::FineTune => "fine_tune",
            SubMode::HighPrecision => "high_precision",
        }
    }

    /// Direct mode reports one reading per measurement and bypasses the live history.
    pub fn is_low_latency(self) -> bool {
        matches!(self, SubMode::Direct)
    }

    /// Local copy of the backend's per-mode measurement table.
    pub fn default_config(self) -> SubModeConfig {
        let (reads, delay_ms, timeout) = match self {
            SubMode::Direct => (1, 50, 3),
            SubMode::FineTune => (3, 100, 10),
            SubMode::HighPrecision => (15, 100, 30),
        };
        let per_read = if reads == 1 { 600 } else { u64::from(reads) * 600 };
        SubModeConfig {
            reads,
            delay_ms,
            timeout,
            estimated_latency_ms: delay_ms + per_read,
        }
    }

    pub fn next(self) -> SubMode {
        match self {
            SubMode::Direct => SubMode::FineTune,
            SubMode::FineTune => SubMode::HighPrecision,
            SubMode::HighPrecision => SubMode::Direct,
        }
    }
}

impl fmt::Display for SubMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        SubMode::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| format!("unknown alignment mode '{value}'"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubModeConfig {
    pub reads: u32,
    pub delay_ms: u64,
    pub timeout: u64,
    pub estimated_latency_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Quality {
    Perfect,
    Good,
    Average,
    Poor,
}

impl Quality {
    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Perfect => "Perfect",
            Quality::Good => "Good",
            Quality::Average => "Average",
            Quality::Poor => "Poor",
        }
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        [Quality::Perfect, Quality::Good, Quality::Average, Quality::Poor]
            .into_iter()
            .find(|quality| quality.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| format!("unknown quality '{value}'"))
    }
}

impl<'de> Deserialize<'de> for Quality {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognised quality labels are treated as missing rather than failing the whole payload.
fn lenient_quality<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Quality>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| value.parse().ok()))
}

fn default_sectors_expected() -> u32 {
    DEFAULT_SECTORS_EXPECTED
}

/// One measurement result. Analysis fields are opaque to the client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(default)]
    pub track: u32,
    #[serde(default)]
    pub head: u8,
    #[serde(default)]
    pub percentage: f64,
    #[serde(default)]
    pub sectors_detected: u32,
    #[serde(default = "default_sectors_expected")]
    pub sectors_expected: u32,
    #[serde(default, deserialize_with = "lenient_quality")]
    pub quality: Option<Quality>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flux_transitions: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_per_rev: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculation_details: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indicator: Option<Map<String, Value>>,
}

impl Reading {
    pub fn at(position: Position) -> Self {
        Self {
            track: position.track,
            head: position.head,
            percentage: 0.0,
            sectors_detected: 0,
            sectors_expected: DEFAULT_SECTORS_EXPECTED,
            quality: None,
            flux_transitions: None,
            time_per_rev: None,
            calculation_details: None,
            indicator: None,
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.track, self.head)
    }
}

/// Timing attached to a reading when its measurement completes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadingTiming {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flux_transitions: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_per_rev_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_latency_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<f64>,
    /// Backend wall-clock time, ISO 8601.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl ReadingTiming {
    pub fn elapsed(elapsed_ms: f64) -> Self {
        Self {
            elapsed_ms: Some(elapsed_ms),
            ..Self::default()
        }
    }

    /// Overlays the fields `other` reports; fields it leaves out are kept.
    pub fn patch(&mut self, other: ReadingTiming) {
        fn overlay<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }
        overlay(&mut self.elapsed_ms, other.elapsed_ms);
        overlay(&mut self.flux_transitions, other.flux_transitions);
        overlay(&mut self.time_per_rev_ms, other.time_per_rev_ms);
        overlay(&mut self.command_duration_ms, other.command_duration_ms);
        overlay(&mut self.total_latency_ms, other.total_latency_ms);
        overlay(&mut self.delay_ms, other.delay_ms);
        overlay(&mut self.timestamp, other.timestamp);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub track: u32,
    pub head: u8,
}

impl Position {
    pub const HOME: Position = Position { track: 0, head: 0 };

    pub fn new(track: u32, head: u8) -> Self {
        Self { track, head }
    }

    /// Track moved by `delta`, clamped to the addressable range.
    pub fn offset(self, delta: i32) -> Position {
        let track = (i64::from(self.track) + i64::from(delta)).clamp(0, i64::from(MAX_TRACK));
        Position::new(track as u32, self.head)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{:02}.{}", self.track, self.head)
    }
}

/// The two externally visible operating modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Automatic,
    Manual,
}

impl Mode {
    pub fn other(self) -> Mode {
        match self {
            Mode::Automatic => Mode::Manual,
            Mode::Manual => Mode::Automatic,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Automatic => f.write_str("automatic"),
            Mode::Manual => f.write_str("manual"),
        }
    }
}

/// Configuration shared between the automatic and manual modes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedConfig {
    pub format: String,
    pub sub_mode: Option<SubMode>,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_FORMAT.to_string(),
            sub_mode: None,
        }
    }
}
