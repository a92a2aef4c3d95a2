use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A scheduled program occupying a known time range on a channel.
///
/// Supplied read-only by the program-schedule collaborator; the range is
/// half-open, `[start, end)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramAiring {
    pub channel_id: i64,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub description: Option<String>,
}

impl ProgramAiring {
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}
