//! Operator commands issued against the manual session.
//!
//! Each command is sent once and awaited, then the session state is refreshed.
//! Without a running session, positioning commands fall back to a direct seek
//! since the drive can still be addressed statelessly.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::{Backend, SettingsUpdate};
use crate::error::SyncResult;
use crate::hub::{HubHandle, HubOp};
use crate::model::{Position, SubMode};

pub const JUMP_SLOTS: std::ops::RangeInclusive<u8> = 1..=8;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Move(i32),
    /// Slot `n` addresses track `n * 10`.
    Jump(u8),
    SetHead(u8),
    Recalibrate,
    Analyze,
    Seek(Position),
    SetFormat(String),
    SetSubMode(SubMode),
    ResetData,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Start => f.write_str("start"),
            Command::Stop => f.write_str("stop"),
            Command::Move(delta) => write!(f, "move {delta:+}"),
            Command::Jump(slot) => write!(f, "jump {slot}"),
            Command::SetHead(head) => write!(f, "head {head}"),
            Command::Recalibrate => f.write_str("recalibrate"),
            Command::Analyze => f.write_str("analyze"),
            Command::Seek(position) => write!(f, "seek {position}"),
            Command::SetFormat(format) => write!(f, "format {format}"),
            Command::SetSubMode(mode) => write!(f, "mode {mode}"),
            Command::ResetData => f.write_str("reset data"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatched {
    Sent,
    /// A guard rejected the command before anything was sent.
    Skipped,
}

#[derive(Clone)]
pub struct Dispatcher {
    backend: Arc<dyn Backend>,
    hub: HubHandle,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn Backend>, hub: HubHandle) -> Self {
        Self { backend, hub }
    }

    /// Runs `command` and refreshes the session. Backend rejections are returned
    /// for display; the local state is left to the refresh.
    pub async fn execute(&self, command: Command) -> SyncResult<Dispatched> {
        debug!(target: "align_sync::dispatch", %command, "dispatching");
        let result = self.send(&command).await;
        if let Ok(Dispatched::Skipped) = result {
            return result;
        }
        if let Err(err) = &result {
            warn!(target: "align_sync::dispatch", %command, error = %err, "command failed");
        }
        if let Err(err) = self.hub.refresh(self.backend.as_ref()).await {
            debug!(target: "align_sync::dispatch", error = %err, "post-command refresh failed");
        }
        result
    }

    async fn send(&self, command: &Command) -> SyncResult<Dispatched> {
        let view = self.hub.view();
        let running = view.running();
        let here = view.position;

        match command {
            // Sessions always begin at home; the cached position only seeds the view.
            Command::Start => {
                self.backend.start(Position::HOME).await?;
            }
            Command::Stop => {
                self.hub.apply(HubOp::ClearActivity).await?;
                self.backend.stop().await?;
            }
            Command::Move(delta) => {
                if running {
                    self.backend.move_by(*delta).await?;
                } else {
                    self.seek(here.offset(*delta)).await?;
                }
            }
            Command::Jump(slot) => {
                if !JUMP_SLOTS.contains(slot) {
                    return Ok(Dispatched::Skipped);
                }
                if running {
                    self.backend.jump(*slot).await?;
                } else {
                    self.seek(Position::new(u32::from(*slot) * 10, here.head))
                        .await?;
                }
            }
            Command::SetHead(head) => {
                if *head > 1 {
                    return Ok(Dispatched::Skipped);
                }
                if running {
                    self.backend.set_head(*head).await?;
                } else {
                    self.seek(Position::new(here.track, *head)).await?;
                }
            }
            Command::Recalibrate => {
                if running {
                    self.backend.recalibrate().await?;
                } else {
                    self.seek(Position::HOME).await?;
                }
            }
            Command::Analyze => self.analyze(&view.shared.format).await?,
            Command::Seek(position) => self.seek(*position).await?,
            Command::SetFormat(format) => self.set_format(format, &view.shared.format).await?,
            Command::SetSubMode(mode) => {
                self.hub.apply(HubOp::ClearActivity).await?;
                self.backend
                    .update_settings(&SettingsUpdate::sub_mode(*mode))
                    .await?;
                self.hub.apply(HubOp::AdoptSubMode(*mode)).await?;
            }
            Command::ResetData => self.backend.reset_data().await?,
        }
        Ok(Dispatched::Sent)
    }

    async fn seek(&self, target: Position) -> SyncResult<()> {
        self.backend.seek(target).await?;
        self.hub.apply(HubOp::RecordPosition(target)).await
    }

    async fn analyze(&self, format: &str) -> SyncResult<()> {
        if let Err(err) = self
            .backend
            .update_settings(&SettingsUpdate::format(format))
            .await
        {
            warn!(
                target: "align_sync::dispatch",
                error = %err,
                "format push before analysis failed; backend keeps its last format"
            );
        }
        self.hub.apply(HubOp::SetAnalyzing(true)).await?;
        let result = self.backend.analyze().await;
        self.hub.apply(HubOp::SetAnalyzing(false)).await?;
        result.map(|_| ())
    }

    async fn set_format(&self, format: &str, previous: &str) -> SyncResult<()> {
        self.hub.adopt_format(format).await?;
        let Err(err) = self
            .backend
            .update_settings(&SettingsUpdate::format(format))
            .await
        else {
            return Ok(());
        };
        let restored = match self.backend.fetch_state().await {
            Ok(state) => state
                .format_identifier
                .unwrap_or_else(|| previous.to_string()),
            Err(_) => previous.to_string(),
        };
        self.hub.adopt_format(restored).await?;
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::fragment::SessionState;
    use crate::hub::SessionHub;
    use crate::model::SharedConfig;
    use crate::position::PositionCache;
    use crate::readings::LiveReadings;
    use crate::store::SessionStore;
    use crate::testing::{Call, FakeBackend};

    async fn setup(state: SessionState, seed: Position) -> (Arc<FakeBackend>, Dispatcher) {
        let backend = Arc::new(FakeBackend::with_state(state));
        let store = SessionStore::new(PositionCache::in_memory(seed), LiveReadings::default());
        let (hub, _task) = SessionHub::spawn(store, SharedConfig::default(), None);
        hub.refresh(backend.as_ref()).await.expect("initial refresh");
        (backend.clone(), Dispatcher::new(backend, hub))
    }

    fn running_at(track: u32, head: u8) -> SessionState {
        SessionState {
            is_running: Some(true),
            current_track: Some(track),
            current_head: Some(head),
            ..SessionState::default()
        }
    }

    #[tokio::test]
    async fn running_session_uses_session_commands_then_refreshes() {
        let (backend, dispatcher) = setup(running_at(20, 0), Position::HOME).await;

        dispatcher.execute(Command::Move(1)).await.expect("move");
        dispatcher.execute(Command::Jump(4)).await.expect("jump");
        dispatcher.execute(Command::Recalibrate).await.expect("recal");

        assert_eq!(
            backend.calls(),
            vec![
                Call::FetchState,
                Call::Move(1),
                Call::FetchState,
                Call::Jump(4),
                Call::FetchState,
                Call::Recalibrate,
                Call::FetchState,
            ]
        );
    }

    #[tokio::test]
    async fn idle_positioning_degrades_to_seek() {
        let (backend, dispatcher) = setup(SessionState::default(), Position::new(82, 1)).await;

        dispatcher.execute(Command::Move(5)).await.expect("move");
        dispatcher.execute(Command::Jump(3)).await.expect("jump");
        dispatcher.execute(Command::SetHead(0)).await.expect("head");
        dispatcher.execute(Command::Recalibrate).await.expect("recal");

        assert_eq!(
            backend.commands(),
            vec![
                Call::Seek(Position::new(83, 1)),
                Call::Seek(Position::new(30, 1)),
                Call::Seek(Position::new(30, 0)),
                Call::Seek(Position::HOME),
            ]
        );
        assert_eq!(dispatcher.hub.view().position, Position::HOME);
    }

    #[tokio::test]
    async fn out_of_range_arguments_send_nothing() {
        let (backend, dispatcher) = setup(running_at(10, 0), Position::HOME).await;
        assert_eq!(
            dispatcher.execute(Command::Jump(9)).await.expect("jump"),
            Dispatched::Skipped
        );
        assert_eq!(
            dispatcher.execute(Command::SetHead(2)).await.expect("head"),
            Dispatched::Skipped
        );
        assert!(backend.commands().is_empty());
    }

    #[tokio::test]
    async fn start_begins_at_home_regardless_of_cached_position() {
        let (backend, dispatcher) = setup(SessionState::default(), Position::new(41, 1)).await;
        dispatcher.execute(Command::Start).await.expect("start");
        assert_eq!(backend.commands(), vec![Call::Start(Position::HOME)]);
        assert!(dispatcher.hub.view().running());
    }

    #[tokio::test]
    async fn analyze_tolerates_failed_format_push() {
        let (backend, dispatcher) = setup(running_at(0, 0), Position::HOME).await;
        backend.fail("settings", 1);

        dispatcher.execute(Command::Analyze).await.expect("analyze");

        assert_eq!(
            backend.commands(),
            vec![Call::Settings(SettingsUpdate::format("ibm.1440")), Call::Analyze]
        );
        assert!(!dispatcher.hub.view().analyzing);
    }

    #[tokio::test]
    async fn rejected_command_is_reported_and_state_unchanged() {
        let (backend, dispatcher) = setup(running_at(12, 1), Position::HOME).await;
        backend.fail("move", 1);

        let err = dispatcher
            .execute(Command::Move(-1))
            .await
            .expect_err("rejected");

        assert!(matches!(err, SyncError::Rejected { status: 400, .. }));
        assert_eq!(dispatcher.hub.view().position, Position::new(12, 1));
    }

    #[tokio::test]
    async fn rejected_format_is_restored_from_backend() {
        let (backend, dispatcher) = setup(
            SessionState {
                format_identifier: Some("ibm.1440".into()),
                ..SessionState::default()
            },
            Position::HOME,
        )
        .await;
        backend.fail("settings", 1);

        assert!(dispatcher
            .execute(Command::SetFormat("bogus.fmt".into()))
            .await
            .is_err());
        assert_eq!(dispatcher.hub.view().shared.format, "ibm.1440");

        dispatcher
            .execute(Command::SetFormat("ibm.720".into()))
            .await
            .expect("format");
        assert_eq!(dispatcher.hub.view().shared.format, "ibm.720");
        assert_eq!(backend.state().format_identifier.as_deref(), Some("ibm.720"));
    }

    #[tokio::test]
    async fn sub_mode_change_clears_busy_flags_first() {
        let (backend, dispatcher) = setup(running_at(5, 0), Position::HOME).await;
        dispatcher
            .hub
            .apply(HubOp::SetAnalyzing(true))
            .await
            .expect("flag");

        dispatcher
            .execute(Command::SetSubMode(SubMode::HighPrecision))
            .await
            .expect("mode");

        let view = dispatcher.hub.view();
        assert!(!view.analyzing);
        assert_eq!(view.sub_mode(), Some(SubMode::HighPrecision));
        assert_eq!(
            backend.commands(),
            vec![Call::Settings(SettingsUpdate::sub_mode(SubMode::HighPrecision))]
        );
    }
}
