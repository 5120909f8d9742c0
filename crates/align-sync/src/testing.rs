//! In-memory backend used by unit tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backend::{Backend, CommandReply, FormatInfo, SettingsUpdate};
use crate::error::{SyncError, SyncResult};
use crate::fragment::SessionState;
use crate::model::Position;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Call {
    FetchState,
    Start(Position),
    Stop,
    Seek(Position),
    Move(i32),
    Jump(u8),
    SetHead(u8),
    Recalibrate,
    Analyze,
    Settings(SettingsUpdate),
    CancelAutomatic,
    ResetData,
    ListFormats,
}

impl Call {
    fn name(&self) -> &'static str {
        match self {
            Call::FetchState => "fetch_state",
            Call::Start(_) => "start",
            Call::Stop => "stop",
            Call::Seek(_) => "seek",
            Call::Move(_) => "move",
            Call::Jump(_) => "jump",
            Call::SetHead(_) => "head",
            Call::Recalibrate => "recal",
            Call::Analyze => "analyze",
            Call::Settings(_) => "settings",
            Call::CancelAutomatic => "cancel",
            Call::ResetData => "reset",
            Call::ListFormats => "formats",
        }
    }
}

#[derive(Default)]
pub(crate) struct FakeBackend {
    state: Mutex<SessionState>,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<HashMap<&'static str, u32>>,
    stalls: Mutex<HashMap<&'static str, u32>>,
}

impl FakeBackend {
    pub(crate) fn with_state(state: SessionState) -> Self {
        let backend = Self::default();
        *backend.state.lock() = state;
        backend
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state.lock().clone()
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub(crate) fn commands(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| *call != Call::FetchState)
            .collect()
    }

    /// Rejects the next `times` calls named `name`.
    pub(crate) fn fail(&self, name: &'static str, times: u32) {
        self.failures.lock().insert(name, times);
    }

    /// Makes the next `times` calls named `name` hang far past any deadline.
    pub(crate) fn stall(&self, name: &'static str, times: u32) {
        self.stalls.lock().insert(name, times);
    }

    async fn record(&self, call: Call) -> SyncResult<()> {
        let name = call.name();
        self.calls.lock().push(call);
        if take_one(&self.stalls, name) {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        }
        if take_one(&self.failures, name) {
            return Err(SyncError::Rejected {
                status: 400,
                detail: format!("{name} rejected"),
            });
        }
        Ok(())
    }

    fn reply(&self) -> CommandReply {
        CommandReply {
            success: Some(true),
            state: Some(self.state()),
            ..CommandReply::default()
        }
    }

    fn place(&self, position: Position) {
        let mut state = self.state.lock();
        state.current_track = Some(position.track);
        state.current_head = Some(position.head);
    }
}

fn take_one(counters: &Mutex<HashMap<&'static str, u32>>, name: &'static str) -> bool {
    let mut counters = counters.lock();
    match counters.get_mut(name) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn fetch_state(&self) -> SyncResult<SessionState> {
        self.record(Call::FetchState).await?;
        Ok(self.state())
    }

    async fn start(&self, from: Position) -> SyncResult<CommandReply> {
        self.record(Call::Start(from)).await?;
        self.place(from);
        self.state.lock().is_running = Some(true);
        Ok(self.reply())
    }

    async fn stop(&self) -> SyncResult<CommandReply> {
        self.record(Call::Stop).await?;
        self.state.lock().is_running = Some(false);
        Ok(self.reply())
    }

    async fn seek(&self, to: Position) -> SyncResult<CommandReply> {
        self.record(Call::Seek(to)).await?;
        self.place(to);
        Ok(self.reply())
    }

    async fn move_by(&self, delta: i32) -> SyncResult<CommandReply> {
        self.record(Call::Move(delta)).await?;
        let current = self.state().position_or(Position::HOME);
        self.place(current.offset(delta));
        Ok(self.reply())
    }

    async fn jump(&self, slot: u8) -> SyncResult<CommandReply> {
        self.record(Call::Jump(slot)).await?;
        let current = self.state().position_or(Position::HOME);
        self.place(Position::new(u32::from(slot) * 10, current.head));
        Ok(self.reply())
    }

    async fn set_head(&self, head: u8) -> SyncResult<CommandReply> {
        self.record(Call::SetHead(head)).await?;
        self.state.lock().current_head = Some(head);
        Ok(self.reply())
    }

    async fn recalibrate(&self) -> SyncResult<CommandReply> {
        self.record(Call::Recalibrate).await?;
        self.state.lock().current_track = Some(0);
        Ok(self.reply())
    }

    async fn analyze(&self) -> SyncResult<CommandReply> {
        self.record(Call::Analyze).await?;
        Ok(self.reply())
    }

    async fn update_settings(&self, update: &SettingsUpdate) -> SyncResult<CommandReply> {
        self.record(Call::Settings(update.clone())).await?;
        let mut state = self.state.lock();
        if let Some(format) = &update.format {
            state.format_identifier = Some(format.clone());
        }
        if let Some(mode) = update.sub_mode {
            state.operating_sub_mode = Some(mode);
        }
        drop(state);
        Ok(self.reply())
    }

    async fn cancel_automatic(&self) -> SyncResult<()> {
        self.record(Call::CancelAutomatic).await
    }

    async fn reset_data(&self) -> SyncResult<()> {
        self.record(Call::ResetData).await?;
        self.state.lock().last_reading = None;
        Ok(())
    }

    async fn list_formats(&self) -> SyncResult<Vec<FormatInfo>> {
        self.record(Call::ListFormats).await?;
        Ok(vec![FormatInfo {
            name: "ibm.1440".into(),
            display_name: Some("IBM 1.44MB".into()),
        }])
    }
}
