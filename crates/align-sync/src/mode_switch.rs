//! Stop-then-resync orchestration between the automatic and manual modes.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::backend::{Backend, SettingsUpdate};
use crate::hub::HubHandle;
use crate::model::Mode;
use crate::retry::RetryPolicy;

pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(300);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionReport {
    pub from: Mode,
    pub to: Mode,
    /// The departed mode acknowledged the stop request.
    pub stopped: bool,
    /// Shared configuration was synchronized with the entered mode.
    pub synced: bool,
    pub adopted_format: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SwitchOutcome {
    Initialized(Mode),
    Unchanged(Mode),
    Transitioned(TransitionReport),
}

pub struct ModeSwitch {
    backend: Arc<dyn Backend>,
    hub: HubHandle,
    retry: RetryPolicy,
    settle: Duration,
    current: Option<Mode>,
}

impl ModeSwitch {
    pub fn new(backend: Arc<dyn Backend>, hub: HubHandle) -> Self {
        Self {
            backend,
            hub,
            retry: RetryPolicy::default(),
            settle: DEFAULT_SETTLE_DELAY,
            current: None,
        }
    }

    pub fn with_timing(mut self, retry: RetryPolicy, settle: Duration) -> Self {
        self.retry = retry;
        self.settle = settle;
        self
    }

    pub fn current(&self) -> Option<Mode> {
        self.current
    }

    /// Feeds the operator's selected mode. The first value only initializes;
    /// later changes stop the departed mode and resync shared configuration.
    /// Never fails: synchronization is best effort.
    pub async fn observe(&mut self, mode: Mode) -> SwitchOutcome {
        let Some(from) = self.current else {
            self.current = Some(mode);
            self.publish_mode(mode).await;
            debug!(target: "align_sync::mode_switch", %mode, "initial mode");
            return SwitchOutcome::Initialized(mode);
        };
        if from == mode {
            return SwitchOutcome::Unchanged(mode);
        }

        self.current = Some(mode);
        self.publish_mode(mode).await;
        info!(target: "align_sync::mode_switch", %from, to = %mode, "switching mode");

        let stopped = self.stop(from).await;
        sleep(self.settle).await;
        let (synced, adopted_format) = match mode {
            Mode::Manual => (self.push_format().await, None),
            Mode::Automatic => match self.pull_format().await {
                Some(adopted) => (true, adopted),
                None => (false, None),
            },
        };

        SwitchOutcome::Transitioned(TransitionReport {
            from,
            to: mode,
            stopped,
            synced,
            adopted_format,
        })
    }

    async fn publish_mode(&self, mode: Mode) {
        if let Err(err) = self.hub.set_mode(mode).await {
            warn!(target: "align_sync::mode_switch", error = %err, "session hub unavailable");
        }
    }

    /// A mode that is already stopped rejects the request; that is not an error.
    async fn stop(&self, leaving: Mode) -> bool {
        let result = match leaving {
            Mode::Automatic => self.backend.cancel_automatic().await,
            Mode::Manual => self.backend.stop().await.map(|_| ()),
        };
        match result {
            Ok(()) => true,
            Err(err) => {
                debug!(target: "align_sync::mode_switch", mode = %leaving, error = %err, "stop ignored");
                false
            }
        }
    }

    async fn push_format(&self) -> bool {
        let update = SettingsUpdate::format(self.hub.view().shared.format);
        let backend: &dyn Backend = self.backend.as_ref();
        let update = &update;
        let result = self
            .retry
            .run("push_format", move |_| async move {
                backend.update_settings(update).await
            })
            .await;
        match result {
            Ok(_) => true,
            Err(err) => {
                warn!(target: "align_sync::mode_switch", error = %err, "manual settings sync abandoned");
                false
            }
        }
    }

    /// Returns `Some(adopted)` on success, where `adopted` is the newly
    /// adopted format if it differed from the cached one.
    async fn pull_format(&self) -> Option<Option<String>> {
        let backend: &dyn Backend = self.backend.as_ref();
        let state = match self
            .retry
            .run("pull_format", move |_| async move { backend.fetch_state().await })
            .await
        {
            Ok(state) => state,
            Err(err) => {
                warn!(target: "align_sync::mode_switch", error = %err, "manual format pull abandoned");
                return None;
            }
        };

        let Some(format) = state.format_identifier else {
            return Some(None);
        };
        if format == self.hub.view().shared.format {
            return Some(None);
        }
        if let Err(err) = self.hub.adopt_format(format.clone()).await {
            warn!(target: "align_sync::mode_switch", error = %err, "session hub unavailable");
            return None;
        }
        Some(Some(format))
    }
}
