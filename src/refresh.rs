//! Periodic fetch-and-replace for each feed.
//!
//! A failed refresh (network error, timeout, bad status, undecodable body)
//! is logged and leaves the cell holding its last good snapshot.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, EngineConfig};
use crate::feed::{self, FeedKind, IngestStats};
use crate::fetch::{HttpClient, build_client, fetch_bytes};
use crate::store::{FeedSnapshot, FeedStore, ScheduleSnapshot};

/// Decodes one feed document and swaps it into the store.
pub async fn apply_bytes(
    kind: FeedKind,
    bytes: &[u8],
    fetched_at: DateTime<Utc>,
    store: &FeedStore,
    config: &EngineConfig,
) -> Result<IngestStats> {
    let stats = match kind {
        FeedKind::Vehicles => {
            let (records, stats) = feed::parse_vehicles(bytes, fetched_at, config)?;
            store.replace_vehicles(FeedSnapshot::new(records, fetched_at)).await;
            stats
        }
        FeedKind::Stops => {
            let (records, stats) = feed::parse_stops(bytes, config)?;
            store.replace_stops(FeedSnapshot::new(records, fetched_at)).await;
            stats
        }
        FeedKind::Schedules => {
            let (records, stats) = feed::parse_schedules(bytes)?;
            let snapshot = ScheduleSnapshot::new(records, fetched_at);
            if !snapshot.sequences.is_empty() {
                debug!(lines = snapshot.sequences.len(), "Schedule carries stop sequences");
            }
            store.replace_schedules(snapshot).await;
            stats
        }
    };
    Ok(stats)
}

#[tracing::instrument(skip(client, store, config), fields(feed = %kind))]
pub async fn refresh_once(
    kind: FeedKind,
    client: &dyn HttpClient,
    url: &str,
    timeout: Duration,
    store: &FeedStore,
    config: &EngineConfig,
) -> Result<IngestStats> {
    let bytes = tokio::time::timeout(timeout, fetch_bytes(client, url))
        .await
        .map_err(|_| anyhow!("fetch timed out after {}s", timeout.as_secs_f64()))??;

    apply_bytes(kind, &bytes, Utc::now(), store, config).await
}

fn log_stats(stats: &IngestStats) {
    if stats.received > 0 && stats.accepted == 0 {
        warn!(
            feed = %stats.feed,
            received = stats.received,
            reasons = ?stats.reasons,
            "Refresh produced an empty snapshot"
        );
    } else {
        info!(
            feed = %stats.feed,
            received = stats.received,
            accepted = stats.accepted,
            rejected = stats.rejected,
            "Snapshot replaced"
        );
    }
    if stats.rejected > 0 {
        debug!(feed = %stats.feed, reasons = ?stats.reasons, "Rejected records");
    }
}

pub async fn run_refresh_loop(
    kind: FeedKind,
    client: Arc<dyn HttpClient>,
    url: String,
    every: Duration,
    timeout: Duration,
    store: Arc<FeedStore>,
    config: Arc<EngineConfig>,
) {
    info!(feed = %kind, every_secs = every.as_secs(), "Starting refresh loop");

    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        match refresh_once(kind, client.as_ref(), &url, timeout, &store, &config).await {
            Ok(stats) => log_stats(&stats),
            Err(e) => error!(feed = %kind, error = %e, "Refresh failed, keeping previous snapshot"),
        }
    }
}

/// Spawns one independent loop per feed.
pub fn spawn_refresh_loops(app: &AppConfig, store: Arc<FeedStore>) -> Result<Vec<JoinHandle<()>>> {
    let config = Arc::new(app.engine.clone());
    let timeout = app.refresh.fetch_timeout();

    let feeds = [
        (FeedKind::Vehicles, &app.feeds.vehicles, app.refresh.vehicles_every_secs),
        (FeedKind::Stops, &app.feeds.stops, app.refresh.stops_every_secs),
        (FeedKind::Schedules, &app.feeds.schedules, app.refresh.schedules_every_secs),
    ];

    let mut handles = Vec::with_capacity(feeds.len());
    for (kind, source, every_secs) in feeds {
        let client = build_client(&source.auth, timeout)?;
        handles.push(tokio::spawn(run_refresh_loop(
            kind,
            client,
            source.url.clone(),
            Duration::from_secs(every_secs.max(1)),
            timeout,
            store.clone(),
            config.clone(),
        )));
    }
    Ok(handles)
}
