use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

use super::FeedKind;

/// Outcome of decoding one feed document: how many records arrived, how many
/// survived validation, and why the rest were dropped.
#[derive(Debug, Clone, Serialize)]
pub struct IngestStats {
    pub timestamp: DateTime<Utc>,
    #[serde(serialize_with = "serialize_display")]
    pub feed: FeedKind,
    pub received: usize,
    pub accepted: usize,
    pub rejected: usize,
    #[serde(serialize_with = "serialize_reasons")]
    pub reasons: BTreeMap<&'static str, usize>,

    // error tracking
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

fn serialize_display<S: Serializer>(kind: &FeedKind, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(kind)
}

/// Flattened to `reason=count;...` so the record stays one CSV row.
fn serialize_reasons<S: Serializer>(
    reasons: &BTreeMap<&'static str, usize>,
    s: S,
) -> Result<S::Ok, S::Error> {
    let joined = reasons
        .iter()
        .map(|(reason, count)| format!("{reason}={count}"))
        .collect::<Vec<_>>()
        .join(";");
    s.serialize_str(&joined)
}

impl IngestStats {
    pub fn new(feed: FeedKind) -> Self {
        IngestStats {
            timestamp: Utc::now(),
            feed,
            received: 0,
            accepted: 0,
            rejected: 0,
            reasons: BTreeMap::new(),
            error_type: None,
            error_message: None,
        }
    }

    /// Create an error record for a refresh that produced no snapshot.
    pub fn from_error(feed: FeedKind, error_type: &str, error_message: &str) -> Self {
        IngestStats {
            error_type: Some(error_type.to_string()),
            error_message: Some(error_message.to_string()),
            ..Self::new(feed)
        }
    }

    pub fn record_accepted(&mut self) {
        self.received += 1;
        self.accepted += 1;
    }

    pub fn record_rejected(&mut self, reason: &'static str) {
        self.received += 1;
        self.rejected += 1;
        *self.reasons.entry(reason).or_default() += 1;
    }

    pub fn pct(part: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            (part as f64 / total as f64) * 100.0
        }
    }

    pub fn acceptance_pct(&self) -> f64 {
        Self::pct(self.accepted, self.received)
    }

    pub fn count_for(&self, reason: &str) -> usize {
        self.reasons.get(reason).copied().unwrap_or(0)
    }
}
