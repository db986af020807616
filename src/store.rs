//! Snapshot cells shared between the refresh loops and query processing.
//!
//! Each feed has its own cell. A refresh builds a complete snapshot and swaps
//! it in with one write; a query clones the current `Arc`s up front and works
//! on those, so it never sees a half-replaced feed. Different feeds are not
//! kept in lockstep.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::estimate::LineSequences;
use crate::feed::{ScheduleEntry, Stop, VehicleObservation};

/// The records of one successful refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSnapshot<T> {
    pub records: Vec<T>,
    pub fetched_at: DateTime<Utc>,
}

impl<T> FeedSnapshot<T> {
    pub fn new(records: Vec<T>, fetched_at: DateTime<Utc>) -> Self {
        Self { records, fetched_at }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Schedule entries plus the stop sequences derived from them.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleSnapshot {
    pub entries: FeedSnapshot<ScheduleEntry>,
    pub sequences: LineSequences,
}

impl ScheduleSnapshot {
    pub fn new(entries: Vec<ScheduleEntry>, fetched_at: DateTime<Utc>) -> Self {
        let sequences = LineSequences::from_schedule(&entries);
        Self {
            entries: FeedSnapshot::new(entries, fetched_at),
            sequences,
        }
    }
}

#[derive(Debug, Default)]
pub struct FeedStore {
    vehicles: RwLock<Option<Arc<FeedSnapshot<VehicleObservation>>>>,
    stops: RwLock<Option<Arc<FeedSnapshot<Stop>>>>,
    schedules: RwLock<Option<Arc<ScheduleSnapshot>>>,
}

/// A consistent set of references taken at the start of a query.
#[derive(Debug, Clone, Default)]
pub struct StoreView {
    pub vehicles: Option<Arc<FeedSnapshot<VehicleObservation>>>,
    pub stops: Option<Arc<FeedSnapshot<Stop>>>,
    pub schedules: Option<Arc<ScheduleSnapshot>>,
}

impl StoreView {
    /// Seconds between the vehicle and stop refreshes, when both exist.
    pub fn vehicle_stop_skew_secs(&self) -> Option<i64> {
        let vehicles = self.vehicles.as_ref()?;
        let stops = self.stops.as_ref()?;
        Some((vehicles.fetched_at - stops.fetched_at).num_seconds().abs())
    }
}

impl FeedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn replace_vehicles(&self, snapshot: FeedSnapshot<VehicleObservation>) {
        *self.vehicles.write().await = Some(Arc::new(snapshot));
    }

    pub async fn replace_stops(&self, snapshot: FeedSnapshot<Stop>) {
        *self.stops.write().await = Some(Arc::new(snapshot));
    }

    pub async fn replace_schedules(&self, snapshot: ScheduleSnapshot) {
        *self.schedules.write().await = Some(Arc::new(snapshot));
    }

    pub async fn view(&self) -> StoreView {
        StoreView {
            vehicles: self.vehicles.read().await.clone(),
            stops: self.stops.read().await.clone(),
            schedules: self.schedules.read().await.clone(),
        }
    }
}
