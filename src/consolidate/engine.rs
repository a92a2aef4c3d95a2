//! The consolidation core: turns open watch fragments into closed,
//! boundary-aligned, non-overlapping intervals.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::error;

use crate::{
    db::{ConsolidationWrite, Database},
    purge::RetentionPurger,
    schedule::{ChannelRegistry, ProgramLookup},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = false;

use crate::log_debug;

/// Result of a global sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Rows closed by non-dry-run writes during the pass. Dry-run probes
    /// contribute zero even when a forced split closes rows.
    pub consolidated: usize,
    /// Earliest future airing end among the fragments still open after the
    /// pass, i.e. the next instant at which a sweep could make progress.
    /// `None` when no open fragment maps to a future airing end.
    pub next_deadline: Option<DateTime<Utc>>,
}

pub struct ConsolidationEngine {
    db: Database,
    schedule: Arc<dyn ProgramLookup>,
    purger: RetentionPurger,
}

impl ConsolidationEngine {
    pub fn new(
        db: Database,
        schedule: Arc<dyn ProgramLookup>,
        channels: Arc<dyn ChannelRegistry>,
    ) -> Self {
        let purger = RetentionPurger::new(db.clone(), channels);
        Self {
            db,
            schedule,
            purger,
        }
    }

    /// Consolidates every open fragment of one session, given the watch end
    /// time from the session's stop event.
    ///
    /// Fragments are walked newest-start first: the newest closes at
    /// `watch_end`, each older one at the next-newer fragment's start, which
    /// is what keeps a session's intervals gapless and non-overlapping. A
    /// token with no open fragments is a no-op; an earlier sweep may already
    /// have closed everything.
    pub async fn consolidate_session(
        &self,
        session_token: &str,
        watch_end: DateTime<Utc>,
    ) -> Result<usize> {
        log_debug!("consolidate_session(token={session_token}, watch_end={watch_end})");

        let fragments = self.db.open_fragments_for_session(session_token).await?;
        let mut closes_at = watch_end;
        let mut consolidated = 0;
        for fragment in fragments {
            consolidated += self
                .consolidate_row(
                    fragment.id,
                    fragment.watch_start,
                    closes_at,
                    fragment.channel_id,
                    false,
                )
                .await?;
            closes_at = fragment.watch_start;
        }

        if consolidated > 0 {
            self.purger.purge_unsearchable().await?;
        }
        Ok(consolidated)
    }

    /// Consolidates open fragments across all sessions.
    ///
    /// After this pass at most one open fragment remains per session: the
    /// newest of each group, which may belong to a still-live session and is
    /// therefore only probed with a dry run against `now`. Every older
    /// fragment is fully closed at the next-newer fragment's start; its
    /// presence proves the session had already moved on.
    pub async fn consolidate_all(&self, now: DateTime<Utc>) -> Result<SweepOutcome> {
        log_debug!("consolidate_all(now={now})");

        let fragments = self.db.all_open_fragments().await?;
        let mut consolidated = 0;
        let mut previous: Option<(String, DateTime<Utc>)> = None;
        for fragment in fragments {
            match &previous {
                Some((token, newer_start)) if *token == fragment.session_token => {
                    consolidated += self
                        .consolidate_row(
                            fragment.id,
                            fragment.watch_start,
                            *newer_start,
                            fragment.channel_id,
                            false,
                        )
                        .await?;
                }
                _ => {
                    // Newest entry for this session, possibly still live:
                    // dry run against `now`, closing it only if a program
                    // boundary forces a split.
                    consolidated += self
                        .consolidate_row(
                            fragment.id,
                            fragment.watch_start,
                            now,
                            fragment.channel_id,
                            true,
                        )
                        .await?;
                }
            }
            previous = Some((fragment.session_token.clone(), fragment.watch_start));
        }

        if consolidated > 0 {
            self.purger.purge_unsearchable().await?;
        }

        let next_deadline = self.next_sweep_deadline(now).await?;
        Ok(SweepOutcome {
            consolidated,
            next_deadline,
        })
    }

    /// Consolidates one fragment over `[watch_start, watch_end]`, splitting
    /// at every program boundary crossed along the way. Each sub-interval is
    /// written atomically: the in-place close and the remainder insert share
    /// one transaction.
    ///
    /// With `dry_run` the fragment is only closed if a boundary forces a
    /// split; otherwise the write refreshes program metadata and leaves the
    /// row open, since the session may still be live. A fragment whose
    /// `watch_start` exceeds `watch_end` is deleted outright.
    ///
    /// Returns the number of rows closed, always zero for dry runs.
    pub async fn consolidate_row(
        &self,
        fragment_id: i64,
        watch_start: DateTime<Utc>,
        watch_end: DateTime<Utc>,
        channel_id: i64,
        dry_run: bool,
    ) -> Result<usize> {
        log_debug!(
            "consolidate_row(id={fragment_id}, start={watch_start}, end={watch_end}, \
             channel={channel_id}, dry_run={dry_run})"
        );

        if watch_start > watch_end {
            error!("fragment {fragment_id}: watch_end precedes watch_start, deleting");
            self.db.delete_fragment(fragment_id).await?;
            return Ok(0);
        }

        let mut count = 0;
        let mut row_id = fragment_id;
        let mut start = watch_start;
        loop {
            let airing = self.schedule.find_airing(channel_id, start);
            // An airing that doesn't extend past `start` would split forever;
            // treat it as absent.
            let split_at = airing
                .as_ref()
                .map(|a| a.end)
                .filter(|end| *end > start && *end < watch_end);
            let closes = !dry_run || split_at.is_some();

            let inserted = self
                .db
                .write_consolidation(ConsolidationWrite {
                    fragment_id: row_id,
                    watch_start: start,
                    watch_end: closes.then(|| split_at.unwrap_or(watch_end)),
                    title: airing.as_ref().map(|a| a.title.clone()),
                    description: airing.as_ref().and_then(|a| a.description.clone()),
                    airing_start: airing.as_ref().map(|a| a.start),
                    airing_end: airing.as_ref().map(|a| a.end),
                    split_at,
                })
                .await
                .with_context(|| format!("consolidation write for fragment {row_id} failed"))?;
            if !dry_run {
                count += 1;
            }

            match (split_at, inserted) {
                (Some(at), Some(remainder_id)) => {
                    log_debug!("fragment {row_id} split at {at}; remainder is row {remainder_id}");
                    row_id = remainder_id;
                    start = at;
                }
                _ => break,
            }
        }
        Ok(count)
    }

    /// Earliest future end among the airings covering the still-open
    /// fragments. Ends already in the past are skipped so a stale schedule
    /// can't arm a deadline that fires immediately.
    async fn next_sweep_deadline(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let mut min_end: Option<DateTime<Utc>> = None;
        for fragment in self.db.all_open_fragments().await? {
            let Some(airing) = self
                .schedule
                .find_airing(fragment.channel_id, fragment.watch_start)
            else {
                continue;
            };
            if airing.end <= now {
                continue;
            }
            if min_end.map_or(true, |current| airing.end < current) {
                min_end = Some(airing.end);
            }
        }
        Ok(min_end)
    }
}
