//! Push channel payloads.
//!
//! Every frame is a JSON object tagged by `type`. Manual-session updates arrive
//! wrapped as `{"type": "manual_alignment_update", "data": {"type": ..., ...}}`;
//! a global data reset arrives as `{"type": "alignment_reset"}`. Automatic-mode
//! traffic is decoded as [`PushEvent::Other`] and ignored by the session hub.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::SyncResult;
use crate::fragment::StateFragment;
use crate::model::{Position, Reading, ReadingTiming, DEFAULT_SECTORS_EXPECTED};

#[derive(Clone, Debug, PartialEq)]
pub enum PushEvent {
    Manual(ManualEvent),
    GlobalReset,
    Other { kind: String },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<Value>,
}

impl PushEvent {
    pub fn decode(raw: &str) -> SyncResult<Self> {
        let envelope: Envelope = serde_json::from_str(raw)?;
        match envelope.kind.as_str() {
            "manual_alignment_update" => {
                let data = envelope.data.unwrap_or(Value::Object(Map::new()));
                Ok(PushEvent::Manual(serde_json::from_value(data)?))
            }
            "alignment_reset" => Ok(PushEvent::GlobalReset),
            _ => Ok(PushEvent::Other {
                kind: envelope.kind,
            }),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            PushEvent::Manual(event) => event.kind.as_str(),
            PushEvent::GlobalReset => "alignment_reset",
            PushEvent::Other { kind } => kind,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualEventKind {
    Started,
    Stopped,
    Seek,
    Recalibrated,
    FormatChanged,
    ModeChanged,
    DataReset,
    Reading,
    ReadingComplete,
    ReadingError,
    DirectReadingComplete,
    AnalysisReading,
    AnalysisComplete,
    #[serde(other)]
    Unknown,
}

impl ManualEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ManualEventKind::Started => "started",
            ManualEventKind::Stopped => "stopped",
            ManualEventKind::Seek => "seek",
            ManualEventKind::Recalibrated => "recalibrated",
            ManualEventKind::FormatChanged => "format_changed",
            ManualEventKind::ModeChanged => "mode_changed",
            ManualEventKind::DataReset => "data_reset",
            ManualEventKind::Reading => "reading",
            ManualEventKind::ReadingComplete => "reading_complete",
            ManualEventKind::ReadingError => "reading_error",
            ManualEventKind::DirectReadingComplete => "direct_reading_complete",
            ManualEventKind::AnalysisReading => "analysis_reading",
            ManualEventKind::AnalysisComplete => "analysis_complete",
            ManualEventKind::Unknown => "unknown",
        }
    }
}

/// Raw sample parsed from instrument output while a measurement runs.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ParsedSample {
    pub track: Option<u32>,
    pub head: Option<u8>,
    pub percentage: Option<f64>,
    pub sectors_detected: Option<u32>,
    pub sectors_expected: Option<u32>,
    pub flux_transitions: Option<u64>,
    pub time_per_rev: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ManualEvent {
    #[serde(rename = "type")]
    pub kind: ManualEventKind,
    #[serde(default)]
    pub state: StateFragment,
    #[serde(default)]
    pub reading: Option<Reading>,
    #[serde(default)]
    pub parsed: Option<ParsedSample>,
    #[serde(default)]
    pub timing: Option<ReadingTiming>,
    #[serde(default)]
    pub format_type: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ManualEvent {
    pub fn new(kind: ManualEventKind) -> Self {
        Self {
            kind,
            state: StateFragment::default(),
            reading: None,
            parsed: None,
            timing: None,
            format_type: None,
            error: None,
        }
    }

    /// Sample for the live history, preferring the parsed output, then the
    /// reading, then the session position at `fallback`.
    pub fn live_sample(&self, fallback: Position) -> Reading {
        let parsed = self.parsed.clone().unwrap_or_default();
        let reading = self.reading.as_ref();

        let mut sample = Reading::at(fallback);
        sample.track = parsed
            .track
            .or(reading.map(|r| r.track))
            .unwrap_or(fallback.track);
        sample.head = parsed
            .head
            .or(reading.map(|r| r.head))
            .unwrap_or(fallback.head);
        sample.percentage = parsed
            .percentage
            .or(reading.map(|r| r.percentage))
            .unwrap_or(0.0);
        sample.sectors_detected = parsed
            .sectors_detected
            .or(reading.map(|r| r.sectors_detected))
            .unwrap_or(0);
        sample.sectors_expected = parsed
            .sectors_expected
            .or(reading.map(|r| r.sectors_expected))
            .unwrap_or(DEFAULT_SECTORS_EXPECTED);
        sample.flux_transitions = parsed
            .flux_transitions
            .or(reading.and_then(|r| r.flux_transitions));
        sample.time_per_rev = parsed.time_per_rev.or(reading.and_then(|r| r.time_per_rev));
        if let Some(reading) = reading {
            sample.quality = reading.quality;
            sample.calculation_details = reading.calculation_details.clone();
            sample.indicator = reading.indicator.clone();
        }
        sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::Patch;
    use serde_json::json;

    #[test]
    fn decodes_manual_envelope() {
        let raw = json!({
            "type": "manual_alignment_update",
            "data": {
                "type": "reading_complete",
                "reading": {"track": 12, "head": 1, "percentage": 98.1, "quality": "Good"},
                "timing": {"command_duration_ms": 812.4, "timestamp": "2025-01-04T10:00:00"},
                "state": {"current_track": 12, "is_running": true},
            }
        })
        .to_string();

        let PushEvent::Manual(event) = PushEvent::decode(&raw).expect("decode") else {
            panic!("expected manual event");
        };
        assert_eq!(event.kind, ManualEventKind::ReadingComplete);
        assert_eq!(event.state.current_track, Patch::Set(12));
        assert_eq!(
            event.timing.and_then(|timing| timing.command_duration_ms),
            Some(812.4)
        );
    }

    #[test]
    fn reset_and_foreign_messages() {
        assert_eq!(
            PushEvent::decode(r#"{"type":"alignment_reset"}"#).expect("decode"),
            PushEvent::GlobalReset
        );
        let other = PushEvent::decode(r#"{"type":"alignment_update","data":{"track":3}}"#)
            .expect("decode");
        assert_eq!(other.kind(), "alignment_update");

        let unknown = PushEvent::decode(
            r#"{"type":"manual_alignment_update","data":{"type":"direct_reading"}}"#,
        )
        .expect("decode");
        assert_eq!(unknown.kind(), "unknown");
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(PushEvent::decode("not json").is_err());
        assert!(PushEvent::decode(r#"{"data":{}}"#).is_err());
        assert!(PushEvent::decode(r#"{"type":"manual_alignment_update","data":{"state":{}}}"#).is_err());
    }

    #[test]
    fn live_sample_prefers_parsed_output() {
        let event: ManualEvent = serde_json::from_value(json!({
            "type": "reading",
            "parsed": {"track": 30, "percentage": 95.0, "sectors_detected": 17},
            "timing": {"elapsed_ms": 120.0},
        }))
        .expect("event");

        let sample = event.live_sample(Position::new(29, 1));
        assert_eq!(sample.position(), Position::new(30, 1));
        assert_eq!(sample.sectors_detected, 17);
        assert_eq!(sample.sectors_expected, DEFAULT_SECTORS_EXPECTED);
    }
}
