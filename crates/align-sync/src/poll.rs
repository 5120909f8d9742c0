use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::backend::Backend;
use crate::hub::HubHandle;
use crate::model::Mode;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Periodic full refresh while the manual view is active, plus refreshes
/// requested by the hub. A failed poll keeps the stale view.
pub fn spawn_poller(
    hub: HubHandle,
    backend: Arc<dyn Backend>,
    period: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let requests = hub.refresh_requests();
        let views = hub.subscribe();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let reason = tokio::select! {
                _ = token.cancelled() => break,
                _ = requests.notified() => "requested",
                _ = ticker.tick() => {
                    if views.borrow().mode != Some(Mode::Manual) {
                        continue;
                    }
                    "interval"
                }
            };
            if let Err(err) = hub.refresh(backend.as_ref()).await {
                debug!(target: "align_sync::poll", reason, error = %err, "state poll failed");
            }
        }
        debug!(target: "align_sync::poll", "poller stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::SessionState;
    use crate::hub::SessionHub;
    use crate::model::{Position, SharedConfig};
    use crate::position::PositionCache;
    use crate::readings::LiveReadings;
    use crate::store::SessionStore;
    use crate::testing::{Call, FakeBackend};
    use tokio::time::sleep;

    fn fetches(backend: &FakeBackend) -> usize {
        backend
            .calls()
            .iter()
            .filter(|call| **call == Call::FetchState)
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn polls_only_while_manual_view_is_active() {
        let backend = Arc::new(FakeBackend::with_state(SessionState {
            current_track: Some(18),
            ..SessionState::default()
        }));
        let store = SessionStore::new(PositionCache::in_memory(Position::HOME), LiveReadings::default());
        let (hub, _task) = SessionHub::spawn(store, SharedConfig::default(), None);
        let token = CancellationToken::new();
        spawn_poller(hub.clone(), backend.clone(), DEFAULT_POLL_INTERVAL, token.clone());

        sleep(Duration::from_millis(3_500)).await;
        assert_eq!(fetches(&backend), 0);

        hub.set_mode(Mode::Manual).await.expect("mode");
        sleep(Duration::from_millis(3_500)).await;
        let polled = fetches(&backend);
        assert!((3..=4).contains(&polled), "polled {polled} times");
        assert_eq!(hub.view().position, Position::new(18, 0));

        hub.set_mode(Mode::Automatic).await.expect("mode");
        sleep(Duration::from_millis(500)).await;
        let settled = fetches(&backend);
        sleep(Duration::from_secs(5)).await;
        assert_eq!(fetches(&backend), settled);
        token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn requested_refresh_runs_outside_manual_view() {
        let backend = Arc::new(FakeBackend::default());
        let store = SessionStore::new(PositionCache::in_memory(Position::HOME), LiveReadings::default());
        let (hub, _task) = SessionHub::spawn(store, SharedConfig::default(), None);
        let token = CancellationToken::new();
        spawn_poller(hub.clone(), backend.clone(), DEFAULT_POLL_INTERVAL, token.clone());

        hub.request_refresh();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(fetches(&backend), 1);
        token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_poll_keeps_previous_view() {
        let backend = Arc::new(FakeBackend::with_state(SessionState {
            current_track: Some(9),
            ..SessionState::default()
        }));
        let store = SessionStore::new(PositionCache::in_memory(Position::HOME), LiveReadings::default());
        let (hub, _task) = SessionHub::spawn(store, SharedConfig::default(), None);
        hub.refresh(backend.as_ref()).await.expect("refresh");

        backend.fail("fetch_state", 1);
        let token = CancellationToken::new();
        spawn_poller(hub.clone(), backend.clone(), DEFAULT_POLL_INTERVAL, token.clone());
        hub.request_refresh();
        sleep(Duration::from_millis(10)).await;

        assert_eq!(hub.view().state.current_track, Some(9));
        token.cancel();
    }
}
