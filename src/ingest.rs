use log::debug;
use thiserror::Error;

use crate::{
    db::Database,
    models::{EventKind, WatchEvent},
    scheduler::Scheduler,
};

/// Errors surfaced to the event producer.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Exactly one of `watch_start` / `watch_end` must be set.
    #[error("exactly one of watch_start and watch_end must be set")]
    InvalidEvent,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// The only write entry point from outside the consolidation core.
///
/// Tune events insert open fragments directly (insert-only, so ingestion
/// needs no coordination with a running pass); stop events are handed to the
/// scheduler, debounced so near-simultaneous duplicates collapse into one
/// session pass.
#[derive(Clone)]
pub struct EventIngester {
    db: Database,
    scheduler: Scheduler,
}

impl EventIngester {
    pub fn new(db: Database, scheduler: Scheduler) -> Self {
        Self { db, scheduler }
    }

    /// Validates and records a watch event. Returns the new fragment's id
    /// for a tune event, `None` for a stop event. Malformed events are
    /// rejected before any storage mutation.
    pub async fn ingest(&self, event: WatchEvent) -> Result<Option<i64>, IngestError> {
        match event.kind().ok_or(IngestError::InvalidEvent)? {
            EventKind::Start(watch_start) => {
                let id = self
                    .db
                    .insert_fragment(event.channel_id, &event.session_token, watch_start)
                    .await?;
                debug!(
                    "tune event: fragment {id} on channel {} for session {}",
                    event.channel_id, event.session_token
                );
                // A new tune means open fragments exist again; make sure a
                // sweep is pending. Replaces any previously armed sweep.
                self.scheduler.request_sweep();
                Ok(Some(id))
            }
            EventKind::Stop(watch_end) => {
                self.scheduler.request_session(&event.session_token, watch_end);
                Ok(None)
            }
        }
    }

    /// Drops every open fragment, returning the number deleted. Meant for a
    /// startup recovery path that discards fragments stranded by a crash;
    /// never invoked implicitly.
    pub async fn discard_open_fragments(&self) -> Result<usize, IngestError> {
        Ok(self.db.delete_open_fragments().await?)
    }
}
