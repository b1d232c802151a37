//! Daily time windows
//!
//! `[start, end)` in local wall-clock time. A window whose end is before its
//! start wraps past midnight; `start == end` covers the whole day.

use chrono::{NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::TaskParseError;

/// Parse `HH:MM:SS` or `HH:MM`
pub fn parse_time(field: &'static str, value: &str) -> Result<NaiveTime, TaskParseError> {
    let trimmed = value.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
        .map_err(|_| TaskParseError::InvalidTime {
            field,
            value: value.to_string(),
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WindowSpec", into = "WindowSpec")]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn parse(start: &str, end: &str) -> Result<Self, TaskParseError> {
        Ok(Self {
            start: parse_time("window_start", start)?,
            end: parse_time("window_end", end)?,
        })
    }

    pub fn wraps_midnight(&self) -> bool {
        self.end < self.start
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start == self.end {
            true
        } else if self.start < self.end {
            self.start <= time && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }

    /// Time left until the window closes, if `now` is inside it
    pub fn remaining(&self, now: NaiveDateTime) -> Option<Duration> {
        let time = now.time();
        if !self.contains(time) || self.start == self.end {
            return None;
        }
        let now_secs = i64::from(time.num_seconds_from_midnight());
        let end_secs = i64::from(self.end.num_seconds_from_midnight());
        let secs = if end_secs > now_secs {
            end_secs - now_secs
        } else {
            end_secs + 86_400 - now_secs
        };
        Some(Duration::from_secs(secs as u64))
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start.format("%H:%M:%S"), self.end.format("%H:%M:%S"))
    }
}

/// Serialized form: `{"start": "09:00", "end": "10:00"}`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WindowSpec {
    start: String,
    end: String,
}

impl TryFrom<WindowSpec> for TimeWindow {
    type Error = TaskParseError;

    fn try_from(spec: WindowSpec) -> Result<Self, Self::Error> {
        TimeWindow::parse(&spec.start, &spec.end)
    }
}

impl From<TimeWindow> for WindowSpec {
    fn from(window: TimeWindow) -> Self {
        Self {
            start: window.start.format("%H:%M:%S").to_string(),
            end: window.end.format("%H:%M:%S").to_string(),
        }
    }
}
