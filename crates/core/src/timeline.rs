//! The timeline: the version axis of the bitemporal graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ordinal of a timeline: microseconds since the Unix epoch of its timestamp.
///
/// Microseconds match the resolution the relational store keeps for
/// timestamps, so a number derived before insert equals the one re-read after.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimelineNumber(i64);

impl TimelineNumber {
    /// Sentinel below every real timeline.
    pub const ZERO: TimelineNumber = TimelineNumber(0);

    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    /// The timeline immediately before this one. Closing a version at `t`
    /// sets its end to `t.prev()`.
    pub const fn prev(self) -> Self {
        Self(self.0 - 1)
    }

    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn from_timestamp(ts: DateTime<Utc>) -> Self {
        Self(ts.timestamp_micros())
    }

    /// Timestamp represented by this number (microsecond resolution).
    pub fn timestamp(self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl core::fmt::Display for TimelineNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// One causally-atomic batch of projected events.
///
/// Exactly one timeline exists per `group_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    pub number: TimelineNumber,
    pub timestamp: DateTime<Utc>,
    pub group_id: Uuid,
    pub aggregate_type: Option<String>,
    pub aggregate_id: Option<Uuid>,
}

impl Timeline {
    /// Build the timeline that follows `current` for an event observed at `at`.
    ///
    /// The number is strictly greater than `current` even if the clock went
    /// backwards or two batches share the same microsecond.
    pub fn allocate(
        current: Option<TimelineNumber>,
        at: DateTime<Utc>,
        group_id: Uuid,
        aggregate_type: Option<String>,
        aggregate_id: Option<Uuid>,
    ) -> Self {
        let wanted = TimelineNumber::from_timestamp(at);
        let number = match current {
            Some(c) if wanted <= c => c.next(),
            _ => wanted,
        };
        Self {
            number,
            timestamp: number.timestamp(),
            group_id,
            aggregate_type,
            aggregate_id,
        }
    }
}
