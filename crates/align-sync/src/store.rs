//! Local session state, merged from push fragments and replaced by polls.

use crate::event::{ManualEvent, ManualEventKind};
use crate::fragment::{SessionState, StateFragment};
use crate::model::{Mode, Position, SharedConfig, SubMode, SubModeConfig};
use crate::position::PositionCache;
use crate::readings::{LiveEntry, LiveReadings, LiveStats};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PositionSource {
    Session,
    Cache,
}

/// Everything a display needs, published after every change.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionView {
    pub revision: u64,
    pub mode: Option<Mode>,
    pub state: SessionState,
    pub position: Position,
    pub position_source: PositionSource,
    pub busy: bool,
    pub analyzing: bool,
    pub shared: SharedConfig,
    pub readings: Vec<LiveEntry>,
    pub stats: LiveStats,
}

impl SessionView {
    pub fn running(&self) -> bool {
        self.state.running()
    }

    pub fn sub_mode(&self) -> Option<SubMode> {
        self.state.operating_sub_mode.or(self.shared.sub_mode)
    }

    pub fn sub_mode_config(&self) -> Option<SubModeConfig> {
        self.state
            .sub_mode_config
            .or_else(|| self.sub_mode().map(SubMode::default_config))
    }

    pub fn format(&self) -> &str {
        &self.shared.format
    }
}

impl Default for SessionView {
    fn default() -> Self {
        Self {
            revision: 0,
            mode: None,
            state: SessionState::default(),
            position: Position::HOME,
            position_source: PositionSource::Cache,
            busy: false,
            analyzing: false,
            shared: SharedConfig::default(),
            readings: Vec::new(),
            stats: LiveStats::default(),
        }
    }
}

/// Side effects of an event that reach beyond the store.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventEffect {
    pub adopt_format: Option<String>,
    pub refresh: bool,
}

#[derive(Debug)]
pub struct SessionStore {
    state: SessionState,
    busy: bool,
    analyzing: bool,
    readings: LiveReadings,
    position: PositionCache,
}

impl SessionStore {
    pub fn new(position: PositionCache, readings: LiveReadings) -> Self {
        Self {
            state: SessionState::default(),
            busy: false,
            analyzing: false,
            readings,
            position,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn readings(&self) -> &LiveReadings {
        &self.readings
    }

    pub fn busy(&self) -> bool {
        self.busy
    }

    pub fn analyzing(&self) -> bool {
        self.analyzing
    }

    pub fn merge(&mut self, fragment: &StateFragment) {
        self.state.apply(fragment);
        self.position.observe(&self.state);
    }

    /// Full poll result. Replaces the state wholesale.
    pub fn replace(&mut self, state: SessionState) {
        self.state = state;
        self.position.observe(&self.state);
    }

    pub fn record_position(&mut self, position: Position) {
        self.position.set(position);
    }

    pub fn set_analyzing(&mut self, analyzing: bool) {
        self.analyzing = analyzing;
    }

    pub fn clear_activity(&mut self) {
        self.busy = false;
        self.analyzing = false;
    }

    pub fn effective_position(&self) -> Position {
        self.position.effective(&self.state)
    }

    pub fn position_source(&self) -> PositionSource {
        if self.state.has_coordinates() {
            PositionSource::Session
        } else {
            PositionSource::Cache
        }
    }

    /// Live history is kept only for a known sub-mode other than direct.
    fn tracks_live_history(&self) -> bool {
        self.state
            .operating_sub_mode
            .is_some_and(|mode| !mode.is_low_latency())
    }

    pub fn apply_event(&mut self, event: &ManualEvent) -> EventEffect {
        if !event.state.is_empty() {
            self.merge(&event.state);
        }

        let mut effect = EventEffect::default();
        match event.kind {
            ManualEventKind::Reading => {
                self.busy = true;
                if self.tracks_live_history() {
                    let sample = event.live_sample(self.effective_position());
                    self.readings.append_timed(sample, event.timing.clone());
                }
            }
            ManualEventKind::ReadingComplete => {
                self.busy = false;
                if self.tracks_live_history() {
                    self.complete_live_entry(event);
                }
            }
            ManualEventKind::ReadingError => {
                self.busy = false;
                if let Some(error) = &event.error {
                    tracing::debug!(target: "align_sync::store", %error, "measurement failed");
                }
            }
            ManualEventKind::DirectReadingComplete => {
                self.busy = false;
                if event.state.last_reading.is_absent() {
                    if let Some(reading) = &event.reading {
                        self.state.last_reading = Some(reading.clone());
                    }
                }
            }
            ManualEventKind::AnalysisReading => self.analyzing = true,
            ManualEventKind::AnalysisComplete => self.analyzing = false,
            ManualEventKind::ModeChanged => self.clear_activity(),
            ManualEventKind::Started => {
                self.readings.reset();
                self.busy = false;
            }
            ManualEventKind::Stopped => {
                self.merge(&StateFragment::stopped());
                self.clear_activity();
            }
            ManualEventKind::FormatChanged => {
                effect.adopt_format = event
                    .format_type
                    .clone()
                    .or_else(|| event.state.format_identifier.as_set().cloned());
            }
            ManualEventKind::Seek
            | ManualEventKind::Recalibrated
            | ManualEventKind::DataReset => {}
            ManualEventKind::Unknown => {
                tracing::debug!(target: "align_sync::store", "ignoring unknown manual event");
            }
        }
        effect
    }

    fn complete_live_entry(&mut self, event: &ManualEvent) {
        let timing = event.timing.clone();
        match self.readings.latest_pending() {
            Some(seq) => {
                self.readings.update(seq, timing, event.reading.clone());
            }
            None => {
                let sample = event.live_sample(self.effective_position());
                self.readings.append_completed(sample, timing);
            }
        }
    }

    /// Global data reset: drops readings and statistics. The caller refreshes afterwards.
    pub fn global_reset(&mut self) -> EventEffect {
        self.readings.reset();
        self.state.last_reading = None;
        self.busy = false;
        EventEffect {
            adopt_format: None,
            refresh: true,
        }
    }

    pub fn view(&self, revision: u64, mode: Option<Mode>, shared: &SharedConfig) -> SessionView {
        SessionView {
            revision,
            mode,
            state: self.state.clone(),
            position: self.effective_position(),
            position_source: self.position_source(),
            busy: self.busy,
            analyzing: self.analyzing,
            shared: shared.clone(),
            readings: self.readings.snapshot(),
            stats: self.readings.stats(),
        }
    }
}
