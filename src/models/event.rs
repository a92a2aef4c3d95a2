use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A raw watch event as reported by the tuner pipeline.
///
/// The wire shape mirrors the event feed: a tune event carries only
/// `watch_start`, a stop-watching event only `watch_end`. Anything else is
/// malformed and gets rejected at ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchEvent {
    pub channel_id: i64,
    pub session_token: String,
    pub watch_start: Option<DateTime<Utc>>,
    pub watch_end: Option<DateTime<Utc>>,
}

/// Validated form of a [`WatchEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Start(DateTime<Utc>),
    Stop(DateTime<Utc>),
}

impl WatchEvent {
    /// The user tuned to a channel.
    pub fn tune(channel_id: i64, session_token: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            channel_id,
            session_token: session_token.into(),
            watch_start: Some(at),
            watch_end: None,
        }
    }

    /// The user stopped watching.
    pub fn stop(channel_id: i64, session_token: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            channel_id,
            session_token: session_token.into(),
            watch_start: None,
            watch_end: Some(at),
        }
    }

    /// Exactly one of the two timestamps must be present; `None` otherwise.
    pub fn kind(&self) -> Option<EventKind> {
        match (self.watch_start, self.watch_end) {
            (Some(start), None) => Some(EventKind::Start(start)),
            (None, Some(end)) => Some(EventKind::Stop(end)),
            _ => None,
        }
    }
}
