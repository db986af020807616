use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Loose;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSchedule {
    #[serde(default)]
    pub line_code: Option<Loose>,
    #[serde(default)]
    pub direction: Option<Loose>,
    #[serde(default)]
    pub time: Option<Loose>,
    /// Only some exports link a departure to the stop it is timed at.
    #[serde(default)]
    pub stop_id: Option<Loose>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outbound,
    Inbound,
    Circular,
}

impl Direction {
    pub fn parse(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "I" | "IDA" | "0" | "OUTBOUND" => Some(Direction::Outbound),
            "V" | "VOLTA" | "1" | "INBOUND" => Some(Direction::Inbound),
            "C" | "CIRCULAR" | "2" => Some(Direction::Circular),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Outbound => "outbound",
            Direction::Inbound => "inbound",
            Direction::Circular => "circular",
        })
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScheduleRejection {
    #[error("schedule entry has no line code")]
    MissingLine,

    #[error("unknown direction code {0:?}")]
    UnknownDirection(String),

    #[error("malformed time {0:?}")]
    MalformedTime(String),
}

impl ScheduleRejection {
    pub fn code(&self) -> &'static str {
        match self {
            ScheduleRejection::MissingLine => "missing_line",
            ScheduleRejection::UnknownDirection(_) => "unknown_direction",
            ScheduleRejection::MalformedTime(_) => "malformed_time",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleEntry {
    pub line: String,
    pub direction: Direction,
    pub time: NaiveTime,
    pub stop_id: Option<String>,
}

/// Strict `H:MM` / `HH:MM`, hour 0-23, minute 0-59. Nothing is defaulted.
pub fn parse_clock_time(text: &str) -> Option<NaiveTime> {
    let (hour, minute) = text.trim().split_once(':')?;
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !digits(hour) || hour.len() > 2 || !digits(minute) || minute.len() != 2 {
        return None;
    }
    NaiveTime::from_hms_opt(hour.parse().ok()?, minute.parse().ok()?, 0)
}

impl ScheduleEntry {
    pub fn from_raw(raw: &RawSchedule) -> Result<Self, ScheduleRejection> {
        let line = raw
            .line_code
            .as_ref()
            .and_then(Loose::as_text)
            .ok_or(ScheduleRejection::MissingLine)?;

        let direction_code = raw
            .direction
            .as_ref()
            .and_then(Loose::as_text)
            .unwrap_or_default();
        let direction = Direction::parse(&direction_code)
            .ok_or(ScheduleRejection::UnknownDirection(direction_code))?;

        let time_text = raw.time.as_ref().and_then(Loose::as_text).unwrap_or_default();
        let time = parse_clock_time(&time_text).ok_or(ScheduleRejection::MalformedTime(time_text))?;

        Ok(Self {
            line,
            direction,
            time,
            stop_id: raw.stop_id.as_ref().and_then(Loose::as_text),
        })
    }
}
