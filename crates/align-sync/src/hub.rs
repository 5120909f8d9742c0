//! Single owner of the session store and shared configuration.
//!
//! All mutation is serialized through one task. Producers (push channel, poller,
//! dispatcher, mode-switch coordinator) send [`HubOp`]s; readers observe the
//! published [`SessionView`] through a watch channel.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::backend::Backend;
use crate::error::{SyncError, SyncResult};
use crate::event::PushEvent;
use crate::fragment::{SessionState, StateFragment};
use crate::model::{Mode, Position, SharedConfig, SubMode};
use crate::persist::StateFile;
use crate::store::{SessionStore, SessionView};

#[derive(Debug)]
pub enum HubOp {
    Event(PushEvent),
    Merge(StateFragment),
    Replace(SessionState),
    AdoptFormat(String),
    AdoptSubMode(SubMode),
    SetMode(Mode),
    SetAnalyzing(bool),
    ClearActivity,
    RecordPosition(Position),
}

struct Envelope {
    op: HubOp,
    ack: Option<oneshot::Sender<()>>,
}

#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<Envelope>,
    view: watch::Receiver<SessionView>,
    refresh: Arc<Notify>,
}

impl HubHandle {
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Queues `op` without waiting for it to be applied.
    pub fn post(&self, op: HubOp) -> SyncResult<()> {
        self.tx
            .send(Envelope { op, ack: None })
            .map_err(|_| SyncError::Closed)
    }

    /// Queues `op` and waits until the published view reflects it.
    pub async fn apply(&self, op: HubOp) -> SyncResult<()> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Envelope {
                op,
                ack: Some(ack),
            })
            .map_err(|_| SyncError::Closed)?;
        done.await.map_err(|_| SyncError::Closed)
    }

    pub async fn merge(&self, fragment: StateFragment) -> SyncResult<()> {
        self.apply(HubOp::Merge(fragment)).await
    }

    pub async fn replace(&self, state: SessionState) -> SyncResult<()> {
        self.apply(HubOp::Replace(state)).await
    }

    pub async fn adopt_format(&self, format: impl Into<String>) -> SyncResult<()> {
        self.apply(HubOp::AdoptFormat(format.into())).await
    }

    pub async fn set_mode(&self, mode: Mode) -> SyncResult<()> {
        self.apply(HubOp::SetMode(mode)).await
    }

    /// Fetches the full session state and replaces the local copy.
    pub async fn refresh(&self, backend: &dyn Backend) -> SyncResult<()> {
        let state = backend.fetch_state().await?;
        self.replace(state).await
    }

    /// Asks the poller for an out-of-cycle refresh.
    pub fn request_refresh(&self) {
        self.refresh.notify_one();
    }

    pub(crate) fn refresh_requests(&self) -> Arc<Notify> {
        Arc::clone(&self.refresh)
    }
}

pub struct SessionHub {
    store: SessionStore,
    shared: SharedConfig,
    mode: Option<Mode>,
    state_file: Option<StateFile>,
    revision: u64,
    view_tx: watch::Sender<SessionView>,
    refresh: Arc<Notify>,
}

impl SessionHub {
    /// Starts the hub task. It runs until every handle is dropped.
    pub fn spawn(
        store: SessionStore,
        shared: SharedConfig,
        state_file: Option<StateFile>,
    ) -> (HubHandle, JoinHandle<()>) {
        let (view_tx, view) = watch::channel(store.view(0, None, &shared));
        let (tx, rx) = mpsc::unbounded_channel();
        let refresh = Arc::new(Notify::new());
        let hub = Self {
            store,
            shared,
            mode: None,
            state_file,
            revision: 0,
            view_tx,
            refresh: Arc::clone(&refresh),
        };
        let handle = HubHandle { tx, view, refresh };
        (handle, tokio::spawn(hub.run(rx)))
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Envelope>) {
        while let Some(Envelope { op, ack }) = rx.recv().await {
            self.handle(op);
            self.publish();
            if let Some(ack) = ack {
                let _ = ack.send(());
            }
        }
        debug!(target: "align_sync::hub", "session hub stopped");
    }

    fn handle(&mut self, op: HubOp) {
        match op {
            HubOp::Event(PushEvent::Manual(event)) => {
                debug!(target: "align_sync::hub", kind = event.kind.as_str(), "applying push event");
                let effect = self.store.apply_event(&event);
                if let Some(format) = effect.adopt_format {
                    self.adopt_format(format);
                }
                if let Some(mode) = self.store.state().operating_sub_mode {
                    self.shared.sub_mode = Some(mode);
                }
            }
            HubOp::Event(PushEvent::GlobalReset) => {
                info!(target: "align_sync::hub", "alignment data reset by backend");
                let effect = self.store.global_reset();
                if effect.refresh {
                    self.refresh.notify_one();
                }
            }
            HubOp::Event(PushEvent::Other { kind }) => {
                debug!(target: "align_sync::hub", %kind, "ignoring non-session event");
            }
            HubOp::Merge(fragment) => self.store.merge(&fragment),
            HubOp::Replace(state) => {
                self.store.replace(state);
                if let Some(mode) = self.store.state().operating_sub_mode {
                    self.shared.sub_mode = Some(mode);
                }
            }
            HubOp::AdoptFormat(format) => self.adopt_format(format),
            HubOp::AdoptSubMode(mode) => self.shared.sub_mode = Some(mode),
            HubOp::SetMode(mode) => self.mode = Some(mode),
            HubOp::SetAnalyzing(analyzing) => self.store.set_analyzing(analyzing),
            HubOp::ClearActivity => self.store.clear_activity(),
            HubOp::RecordPosition(position) => self.store.record_position(position),
        }
    }

    fn adopt_format(&mut self, format: String) {
        if format == self.shared.format {
            return;
        }
        info!(target: "align_sync::hub", from = %self.shared.format, to = %format, "shared format changed");
        self.shared.format = format;
        if let Some(file) = &self.state_file {
            let format = self.shared.format.clone();
            if let Err(err) = file.update(|state| state.format = Some(format)) {
                tracing::warn!(target: "align_sync::hub", error = %err, "failed to persist format");
            }
        }
    }

    fn publish(&mut self) {
        self.revision += 1;
        let view = self.store.view(self.revision, self.mode, &self.shared);
        self.view_tx.send_replace(view);
    }
}
