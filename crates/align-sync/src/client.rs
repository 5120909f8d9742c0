//! Wires the push channel, poller, hub and command paths into one client.

use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{Backend, FormatInfo, HttpBackend};
use crate::config::ClientConfig;
use crate::dispatch::{Command, Dispatched, Dispatcher};
use crate::error::SyncResult;
use crate::event::PushEvent;
use crate::hub::{HubHandle, HubOp, SessionHub};
use crate::model::{Mode, Position, SharedConfig};
use crate::mode_switch::{ModeSwitch, SwitchOutcome};
use crate::persist::StateFile;
use crate::poll::spawn_poller;
use crate::position::PositionCache;
use crate::push::{ChannelStatus, Connector, PushChannel, WsConnector};
use crate::readings::LiveReadings;
use crate::store::{SessionStore, SessionView};

pub struct AlignClient {
    backend: Arc<dyn Backend>,
    hub: HubHandle,
    push: PushChannel,
    controls: Controls,
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Cloneable command side of a client, for running commands and mode switches
/// on their own tasks. Every clone must be dropped before
/// [`AlignClient::shutdown`] can finish.
#[derive(Clone)]
pub struct Controls {
    hub: HubHandle,
    dispatcher: Dispatcher,
    mode_switch: Arc<Mutex<ModeSwitch>>,
}

impl Controls {
    pub async fn execute(&self, command: Command) -> SyncResult<Dispatched> {
        self.dispatcher.execute(command).await
    }

    /// Feeds the operator's mode selection to the coordinator. Switches are
    /// serialized; a second call waits for the first transition to finish.
    pub async fn switch_mode(&self, mode: Mode) -> SwitchOutcome {
        let outcome = self.mode_switch.lock().await.observe(mode).await;
        if mode == Mode::Manual {
            self.hub.request_refresh();
        }
        outcome
    }
}

impl AlignClient {
    /// Connects to the backend described by `config`. The push channel keeps
    /// reconnecting in the background; nothing here waits for it.
    pub fn start(config: ClientConfig) -> SyncResult<Self> {
        let backend: Arc<dyn Backend> = Arc::new(HttpBackend::new(config.backend_url.clone()));
        let connector: Arc<dyn Connector> = Arc::new(WsConnector::new(config.push_url()?));
        let state_file = match &config.state_file {
            Some(path) => Some(StateFile::new(path.clone())),
            None => match StateFile::default_path() {
                Ok(path) => Some(StateFile::new(path)),
                Err(err) => {
                    warn!(target: "align_sync::client", error = %err, "state will not be persisted");
                    None
                }
            },
        };
        Ok(Self::with_parts(&config, backend, connector, state_file))
    }

    pub fn with_parts(
        config: &ClientConfig,
        backend: Arc<dyn Backend>,
        connector: Arc<dyn Connector>,
        state_file: Option<StateFile>,
    ) -> Self {
        let mut shared = SharedConfig::default();
        let position = match &state_file {
            Some(file) => {
                match file.load() {
                    Ok(persisted) => {
                        if let Some(format) = persisted.format {
                            shared.format = format;
                        }
                    }
                    Err(err) => {
                        debug!(target: "align_sync::client", error = %err, "no persisted format")
                    }
                }
                PositionCache::load(file.clone())
            }
            None => PositionCache::in_memory(Position::HOME),
        };
        let store = SessionStore::new(position, LiveReadings::with_capacity(config.ring_capacity));
        let (hub, hub_task) = SessionHub::spawn(store, shared, state_file);

        let token = CancellationToken::new();
        let push = PushChannel::new(connector, config.reconnect_delay);
        let mut tasks = vec![hub_task];
        if let Some(task) = push.connect() {
            tasks.push(task);
        }
        tasks.push(forward_events(push.subscribe(), hub.clone(), token.clone()));
        tasks.push(spawn_poller(
            hub.clone(),
            Arc::clone(&backend),
            config.poll_interval,
            token.clone(),
        ));

        let dispatcher = Dispatcher::new(Arc::clone(&backend), hub.clone());
        let mode_switch = ModeSwitch::new(Arc::clone(&backend), hub.clone())
            .with_timing(config.retry, config.settle_delay);
        info!(target: "align_sync::client", format = %hub.view().shared.format, "alignment client started");

        let controls = Controls {
            hub: hub.clone(),
            dispatcher,
            mode_switch: Arc::new(Mutex::new(mode_switch)),
        };
        Self {
            backend,
            hub,
            push,
            controls,
            token,
            tasks,
        }
    }

    pub fn view(&self) -> SessionView {
        self.hub.view()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.hub.subscribe()
    }

    pub fn push_status(&self) -> watch::Receiver<ChannelStatus> {
        self.push.status()
    }

    pub fn controls(&self) -> Controls {
        self.controls.clone()
    }

    pub async fn execute(&self, command: Command) -> SyncResult<Dispatched> {
        self.controls.execute(command).await
    }

    pub async fn switch_mode(&self, mode: Mode) -> SwitchOutcome {
        self.controls.switch_mode(mode).await
    }

    pub async fn list_formats(&self) -> SyncResult<Vec<FormatInfo>> {
        self.backend.list_formats().await
    }

    /// Stops background tasks and closes the push channel.
    pub async fn shutdown(self) {
        self.token.cancel();
        self.push.disconnect();
        let Self {
            hub,
            controls,
            tasks,
            ..
        } = self;
        // The hub task exits once every handle is gone.
        drop((hub, controls));
        for task in tasks {
            if let Err(err) = task.await {
                debug!(target: "align_sync::client", error = %err, "background task ended abnormally");
            }
        }
        info!(target: "align_sync::client", "alignment client stopped");
    }
}

fn forward_events(
    mut events: watch::Receiver<Option<PushEvent>>,
    hub: HubHandle,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                changed = events.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            let event = events.borrow_and_update().clone();
            if let Some(event) = event {
                if hub.post(HubOp::Event(event)).is_err() {
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::SessionState;
    use crate::push::FrameStream;
    use crate::testing::{Call, FakeBackend};
    use async_trait::async_trait;
    use futures_util::stream::{self, StreamExt};
    use std::time::Duration;
    use test_timeout::timed_test;
    use tokio::time::timeout;

    struct SilentConnector;

    #[async_trait]
    impl Connector for SilentConnector {
        async fn connect(&self) -> SyncResult<FrameStream> {
            Ok(stream::pending().boxed())
        }
    }

    fn client(backend: Arc<FakeBackend>) -> AlignClient {
        AlignClient::with_parts(
            &ClientConfig::default(),
            backend,
            Arc::new(SilentConnector),
            None,
        )
    }

    #[timed_test(secs = 5, paused)]
    async fn view_updates_while_command_is_in_flight() {
        let backend = Arc::new(FakeBackend::with_state(SessionState {
            is_running: Some(true),
            ..SessionState::default()
        }));
        backend.stall("analyze", 1);
        let client = client(backend.clone());
        let mut views = client.subscribe();

        let controls = client.controls();
        let analysis = tokio::spawn(async move { controls.execute(Command::Analyze).await });

        timeout(Duration::from_secs(1), views.wait_for(|view| view.analyzing))
            .await
            .expect("analyzing flag published before the backend answers")
            .expect("hub running");
        assert_eq!(backend.commands().last(), Some(&Call::Analyze));
        assert!(!analysis.is_finished());

        analysis.abort();
        let _ = analysis.await;
        client.shutdown().await;
    }

    #[timed_test(secs = 5, paused)]
    async fn controls_switch_modes_off_the_caller_task() {
        let backend = Arc::new(FakeBackend::default());
        let client = client(backend.clone());
        client.switch_mode(Mode::Automatic).await;

        let controls = client.controls();
        let outcome = tokio::spawn(async move { controls.switch_mode(Mode::Manual).await })
            .await
            .expect("switch task");

        assert!(matches!(outcome, SwitchOutcome::Transitioned(_)));
        assert_eq!(client.view().mode, Some(Mode::Manual));
        assert_eq!(backend.commands()[0], Call::CancelAutomatic);
        client.shutdown().await;
    }
}
