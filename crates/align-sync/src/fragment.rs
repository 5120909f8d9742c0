//! Session state and the partial fragments merged into it.
//!
//! The backend reports state in two shapes: full snapshots from
//! `GET /api/manual/state` and partial `state` objects inside push events.
//! Snapshots replace the local state; fragments are merged field by field.

use serde::{Deserialize, Deserializer, Serialize};

use crate::model::{Position, Reading, SubMode, SubModeConfig};

/// One field of a fragment. `Absent` keeps the current value, `Null` clears it.
#[derive(Clone, Debug, PartialEq)]
pub enum Patch<T> {
    Absent,
    Null,
    Set(T),
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Patch::Absent
    }
}

impl<T> Patch<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Patch::Absent)
    }

    pub fn as_set(&self) -> Option<&T> {
        match self {
            Patch::Set(value) => Some(value),
            _ => None,
        }
    }
}

impl<T: Clone> Patch<T> {
    pub fn apply_to(&self, slot: &mut Option<T>) {
        match self {
            Patch::Absent => {}
            Patch::Null => *slot = None,
            Patch::Set(value) => *slot = Some(value.clone()),
        }
    }
}

impl<T> From<Option<T>> for Patch<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Patch::Set(value),
            None => Patch::Null,
        }
    }
}

// A missing key never reaches this impl: `#[serde(default)]` yields `Absent`.
impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<T>::deserialize(deserializer).map(Patch::from)
    }
}

/// Local view of the backend's manual session. Every field starts unset.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub is_running: Option<bool>,
    pub current_track: Option<u32>,
    pub current_head: Option<u8>,
    #[serde(rename = "format_type")]
    pub format_identifier: Option<String>,
    #[serde(rename = "alignment_mode")]
    pub operating_sub_mode: Option<SubMode>,
    #[serde(rename = "alignment_mode_config")]
    pub sub_mode_config: Option<SubModeConfig>,
    pub last_reading: Option<Reading>,
    #[serde(rename = "total_readings")]
    pub total_reading_count: Option<u64>,
    pub auto_analyze: Option<bool>,
    pub num_reads: Option<u32>,
    pub diskdefs_path: Option<String>,
}

impl SessionState {
    pub fn running(&self) -> bool {
        self.is_running.unwrap_or(false)
    }

    pub fn has_coordinates(&self) -> bool {
        self.current_track.is_some() || self.current_head.is_some()
    }

    /// Session coordinates with each missing field taken from `fallback`.
    pub fn position_or(&self, fallback: Position) -> Position {
        Position::new(
            self.current_track.unwrap_or(fallback.track),
            self.current_head.unwrap_or(fallback.head),
        )
    }

    pub fn merged(&self, fragment: &StateFragment) -> SessionState {
        let mut next = self.clone();
        next.apply(fragment);
        next
    }

    pub fn apply(&mut self, fragment: &StateFragment) {
        fragment.is_running.apply_to(&mut self.is_running);
        fragment.current_track.apply_to(&mut self.current_track);
        fragment.current_head.apply_to(&mut self.current_head);
        fragment.format_identifier.apply_to(&mut self.format_identifier);
        fragment.operating_sub_mode.apply_to(&mut self.operating_sub_mode);
        fragment.sub_mode_config.apply_to(&mut self.sub_mode_config);
        fragment.last_reading.apply_to(&mut self.last_reading);
        fragment.total_reading_count.apply_to(&mut self.total_reading_count);
        fragment.auto_analyze.apply_to(&mut self.auto_analyze);
        fragment.num_reads.apply_to(&mut self.num_reads);
        fragment.diskdefs_path.apply_to(&mut self.diskdefs_path);
    }
}

/// Partial session state carried by push events.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StateFragment {
    pub is_running: Patch<bool>,
    pub current_track: Patch<u32>,
    pub current_head: Patch<u8>,
    #[serde(rename = "format_type")]
    pub format_identifier: Patch<String>,
    #[serde(rename = "alignment_mode")]
    pub operating_sub_mode: Patch<SubMode>,
    #[serde(rename = "alignment_mode_config")]
    pub sub_mode_config: Patch<SubModeConfig>,
    pub last_reading: Patch<Reading>,
    #[serde(rename = "total_readings")]
    pub total_reading_count: Patch<u64>,
    pub auto_analyze: Patch<bool>,
    pub num_reads: Patch<u32>,
    pub diskdefs_path: Patch<String>,
}

impl StateFragment {
    pub fn is_empty(&self) -> bool {
        self.is_running.is_absent()
            && self.current_track.is_absent()
            && self.current_head.is_absent()
            && self.format_identifier.is_absent()
            && self.operating_sub_mode.is_absent()
            && self.sub_mode_config.is_absent()
            && self.last_reading.is_absent()
            && self.total_reading_count.is_absent()
            && self.auto_analyze.is_absent()
            && self.num_reads.is_absent()
            && self.diskdefs_path.is_absent()
    }

    pub fn stopped() -> Self {
        Self {
            is_running: Patch::Set(false),
            ..Self::default()
        }
    }

    pub fn last_reading(reading: Reading) -> Self {
        Self {
            last_reading: Patch::Set(reading),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fragment(value: serde_json::Value) -> StateFragment {
        serde_json::from_value(value).expect("fragment")
    }

    #[test]
    fn merge_overwrites_only_present_fields() {
        let state = SessionState {
            is_running: Some(true),
            current_track: Some(5),
            current_head: Some(1),
            ..SessionState::default()
        };

        let merged = state.merged(&fragment(json!({"current_track": 12})));

        assert_eq!(merged.current_track, Some(12));
        assert_eq!(merged.current_head, Some(1));
        assert_eq!(merged.is_running, Some(true));
    }

    #[test]
    fn explicit_null_differs_from_absent() {
        let state = SessionState {
            current_track: Some(5),
            format_identifier: Some("ibm.1440".into()),
            ..SessionState::default()
        };

        let cleared = fragment(json!({"format_type": null}));
        assert_eq!(cleared.format_identifier, Patch::Null);
        assert!(cleared.current_track.is_absent());

        let merged = state.merged(&cleared);
        assert_eq!(merged.format_identifier, None);
        assert_eq!(merged.current_track, Some(5));
    }

    #[test]
    fn last_fragment_defining_a_field_wins() {
        let fragments = [
            json!({"current_track": 3, "is_running": true}),
            json!({"current_head": 1}),
            json!({"current_track": 9, "alignment_mode": "fine_tune"}),
            json!({"is_running": false}),
        ];

        let state = fragments
            .into_iter()
            .map(fragment)
            .fold(SessionState::default(), |state, next| state.merged(&next));

        assert_eq!(state.current_track, Some(9));
        assert_eq!(state.current_head, Some(1));
        assert_eq!(state.is_running, Some(false));
        assert_eq!(state.operating_sub_mode, Some(SubMode::FineTune));
        assert_eq!(state.total_reading_count, None);
    }

    #[test]
    fn empty_fragment_into_unset_state_stays_unset() {
        let empty = fragment(json!({}));
        assert!(empty.is_empty());
        assert_eq!(SessionState::default().merged(&empty), SessionState::default());
    }

    #[test]
    fn snapshot_uses_backend_field_names() {
        let state: SessionState = serde_json::from_value(json!({
            "is_running": true,
            "current_track": 20,
            "current_head": 0,
            "format_type": "ibm.720",
            "alignment_mode": "high_precision",
            "alignment_mode_config": {"reads": 15, "delay_ms": 100, "timeout": 30, "estimated_latency_ms": 9100},
            "last_reading": null,
            "total_readings": 4,
        }))
        .expect("snapshot");

        assert_eq!(state.format_identifier.as_deref(), Some("ibm.720"));
        assert_eq!(state.sub_mode_config, Some(SubMode::HighPrecision.default_config()));
        assert_eq!(state.total_reading_count, Some(4));
        assert_eq!(state.position_or(Position::HOME), Position::new(20, 0));
    }
}
