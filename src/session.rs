//! Per-rider automatic re-query.
//!
//! A [`RiderSession`] owns at most one running re-query task. Starting a new
//! search replaces the state, and replacing the state aborts the old task, so
//! a rider can never have two timers running.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::search::{RiderQuery, SearchOutcome, search};
use crate::store::FeedStore;

#[derive(Debug, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Watching {
        query: RiderQuery,
        task: JoinHandle<()>,
    },
}

#[derive(Debug)]
pub struct RiderSession {
    rider_id: String,
    state: SessionState,
}

impl RiderSession {
    pub fn new(rider_id: impl Into<String>) -> Self {
        Self {
            rider_id: rider_id.into(),
            state: SessionState::Idle,
        }
    }

    pub fn rider_id(&self) -> &str {
        &self.rider_id
    }

    pub fn is_watching(&self) -> bool {
        matches!(self.state, SessionState::Watching { .. })
    }

    pub fn query(&self) -> Option<&RiderQuery> {
        match &self.state {
            SessionState::Watching { query, .. } => Some(query),
            SessionState::Idle => None,
        }
    }

    /// Moves to `next`, aborting whatever task the previous state owned.
    fn transition(&mut self, next: SessionState) {
        if let SessionState::Watching { task, .. } = std::mem::replace(&mut self.state, next) {
            task.abort();
            debug!(rider = %self.rider_id, "Previous re-query task aborted");
        }
    }

    pub fn watch(&mut self, query: RiderQuery, task: JoinHandle<()>) {
        self.transition(SessionState::Watching { query, task });
    }

    pub fn stop(&mut self) {
        self.transition(SessionState::Idle);
    }
}

impl Drop for RiderSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sessions keyed by rider id, all reading the same store.
pub struct SessionRegistry {
    store: Arc<FeedStore>,
    config: Arc<EngineConfig>,
    sessions: HashMap<String, RiderSession>,
}

impl SessionRegistry {
    pub fn new(store: Arc<FeedStore>, config: Arc<EngineConfig>) -> Self {
        Self {
            store,
            config,
            sessions: HashMap::new(),
        }
    }

    /// Runs `query` once against the current snapshots.
    pub async fn search_once(&self, query: &RiderQuery) -> SearchOutcome {
        let view = self.store.view().await;
        search(&view, query, Utc::now(), &self.config)
    }

    /// Starts re-running `query` for `rider_id` every `every`, first run
    /// immediately. Any search the rider already had running is cancelled.
    pub fn start_search<F>(&mut self, rider_id: &str, query: RiderQuery, every: Duration, sink: F)
    where
        F: FnMut(SearchOutcome) + Send + 'static,
    {
        let task = tokio::spawn(requery_loop(
            rider_id.to_string(),
            query.clone(),
            every,
            self.store.clone(),
            self.config.clone(),
            sink,
        ));

        self.sessions
            .entry(rider_id.to_string())
            .or_insert_with(|| RiderSession::new(rider_id))
            .watch(query, task);

        info!(rider = rider_id, every_secs = every.as_secs(), "Re-query started");
    }

    /// Forgets the rider, cancelling any running search. Returns `true` if
    /// one was running.
    pub fn stop(&mut self, rider_id: &str) -> bool {
        let Some(mut session) = self.sessions.remove(rider_id) else {
            return false;
        };
        let was_watching = session.is_watching();
        session.stop();
        if was_watching {
            info!(rider = rider_id, "Re-query stopped");
        }
        was_watching
    }

    pub fn session(&self, rider_id: &str) -> Option<&RiderSession> {
        self.sessions.get(rider_id)
    }

    pub fn active_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_watching()).count()
    }

    /// Riders currently known to the registry.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[tracing::instrument(skip(query, store, config, sink))]
async fn requery_loop<F>(
    rider_id: String,
    query: RiderQuery,
    every: Duration,
    store: Arc<FeedStore>,
    config: Arc<EngineConfig>,
    mut sink: F,
) where
    F: FnMut(SearchOutcome) + Send + 'static,
{
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let view = store.view().await;
        let outcome = search(&view, &query, Utc::now(), &config);
        debug!(
            rows = match &outcome {
                SearchOutcome::Found(report) => report.rows.len(),
                _ => 0,
            },
            "Re-query ran"
        );
        sink(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::VehicleObservation;
    use crate::geo::GeoPoint;
    use crate::search::{DirectionFilter, LineFilter, NotReadyReason};
    use crate::store::FeedSnapshot;
    use tokio::sync::mpsc;

    fn query() -> RiderQuery {
        RiderQuery {
            location: GeoPoint::new(-22.9, -43.2),
            direction: DirectionFilter::Both,
            line: LineFilter::All,
        }
    }

    fn registry() -> (SessionRegistry, Arc<FeedStore>) {
        let store = Arc::new(FeedStore::new());
        (
            SessionRegistry::new(store.clone(), Arc::new(EngineConfig::default())),
            store,
        )
    }

    async fn wait_closed(rx: &mut mpsc::UnboundedReceiver<SearchOutcome>) -> bool {
        tokio::time::timeout(Duration::from_secs(2), async {
            while rx.recv().await.is_some() {}
        })
        .await
        .is_ok()
    }

    #[tokio::test]
    async fn test_first_run_is_immediate() {
        let (mut registry, _store) = registry();
        let (tx, mut rx) = mpsc::unbounded_channel();

        registry.start_search("rider-1", query(), Duration::from_secs(3600), move |o| {
            let _ = tx.send(o);
        });

        let outcome = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, SearchOutcome::NotReady(NotReadyReason::NoVehicleSnapshot));
        assert_eq!(registry.active_count(), 1);
    }

    #[tokio::test]
    async fn test_new_search_cancels_previous_task() {
        let (mut registry, _store) = registry();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();

        registry.start_search("rider-1", query(), Duration::from_millis(10), move |o| {
            let _ = tx1.send(o);
        });
        rx1.recv().await.unwrap();

        let mut second = query();
        second.line = LineFilter::Line("0.123".to_string());
        registry.start_search("rider-1", second.clone(), Duration::from_millis(10), move |o| {
            let _ = tx2.send(o);
        });

        // The aborted task drops its sink, closing the first channel.
        assert!(wait_closed(&mut rx1).await);
        assert!(rx2.recv().await.is_some());
        assert_eq!(registry.active_count(), 1);
        assert_eq!(registry.session("rider-1").unwrap().query(), Some(&second));
    }

    #[tokio::test]
    async fn test_riders_are_independent() {
        let (mut registry, _store) = registry();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();

        registry.start_search("a", query(), Duration::from_millis(10), move |o| {
            let _ = tx1.send(o);
        });
        registry.start_search("b", query(), Duration::from_millis(10), move |o| {
            let _ = tx2.send(o);
        });

        assert!(registry.stop("a"));
        assert!(!registry.stop("a"));
        assert!(wait_closed(&mut rx1).await);
        assert!(rx2.recv().await.is_some());
        assert_eq!(registry.active_count(), 1);
        assert!(registry.session("a").is_none());
    }

    #[tokio::test]
    async fn test_stopped_riders_are_forgotten() {
        let (mut registry, _store) = registry();
        for round in 0..3 {
            for i in 0..50 {
                let id = format!("rider-{round}-{i}");
                registry.start_search(&id, query(), Duration::from_secs(60), |_| {});
                assert!(registry.stop(&id));
            }
        }

        assert!(registry.is_empty());
        assert_eq!(registry.active_count(), 0);
        assert!(!registry.stop("rider-0-0"));
    }

    #[tokio::test]
    async fn test_dropping_registry_aborts_all_tasks() {
        let (mut registry, _store) = registry();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.start_search("rider-1", query(), Duration::from_millis(10), move |o| {
            let _ = tx.send(o);
        });
        rx.recv().await.unwrap();

        drop(registry);
        assert!(wait_closed(&mut rx).await);
    }

    #[tokio::test]
    async fn test_requery_sees_refreshed_snapshot() {
        let (registry, store) = registry();
        assert!(matches!(
            registry.search_once(&query()).await,
            SearchOutcome::NotReady(_)
        ));

        let now = Utc::now();
        let vehicle = VehicleObservation {
            device_id: "B1".to_string(),
            line: "0.123".to_string(),
            position: GeoPoint::new(-22.9036, -43.2),
            observed_at: now,
            ingested_at: now,
            speed_kmh: Some(20.0),
        };
        store.replace_vehicles(FeedSnapshot::new(vec![vehicle], now)).await;

        let SearchOutcome::Found(report) = registry.search_once(&query()).await else {
            panic!("expected results");
        };
        assert_eq!(report.rows[0].line, "0.123");
    }
}
