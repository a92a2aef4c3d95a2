use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// An open, not-yet-finalized viewing record.
///
/// Created by a tune event; `watch_end` stays unset until a consolidation
/// pass closes the row. Program metadata may be filled in early by a dry-run
/// sweep without closing the row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fragment {
    pub id: i64,
    pub channel_id: i64,
    pub session_token: String,
    pub watch_start: DateTime<Utc>,
    pub watch_end: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub airing_start: Option<DateTime<Utc>>,
    pub airing_end: Option<DateTime<Utc>>,
    pub consolidated: bool,
}

impl Fragment {
    pub fn is_open(&self) -> bool {
        !self.consolidated
    }
}

/// A finalized, boundary-aligned viewing record. Immutable once written;
/// `watch_start <= watch_end` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedInterval {
    pub id: i64,
    pub channel_id: i64,
    pub session_token: String,
    pub watch_start: DateTime<Utc>,
    pub watch_end: DateTime<Utc>,
    pub title: Option<String>,
    pub description: Option<String>,
}

impl ConsolidatedInterval {
    pub fn duration(&self) -> Duration {
        self.watch_end - self.watch_start
    }

    pub fn overlaps(&self, other: &ConsolidatedInterval) -> bool {
        self.watch_start < other.watch_end && other.watch_start < self.watch_end
    }
}
