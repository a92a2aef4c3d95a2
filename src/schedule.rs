//! Collaborator seams for the program schedule and channel registry.
//!
//! Both are owned by the surrounding EPG store; the engine only needs these
//! two read-only views, passed in explicitly so it stays constructible and
//! testable in isolation.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::models::ProgramAiring;

/// Read-only program schedule lookup.
pub trait ProgramLookup: Send + Sync {
    /// Returns the airing covering `at` on `channel_id`, if any. Pure read,
    /// no side effects.
    fn find_airing(&self, channel_id: i64, at: DateTime<Utc>) -> Option<ProgramAiring>;
}

/// Channel metadata needed for retention decisions.
pub trait ChannelRegistry: Send + Sync {
    fn is_searchable(&self, channel_id: i64) -> bool;
}

/// In-memory schedule for embedders without a full EPG store, and for tests.
/// Channels are searchable unless explicitly marked otherwise.
#[derive(Debug, Clone, Default)]
pub struct StaticSchedule {
    airings: Vec<ProgramAiring>,
    unsearchable: HashSet<i64>,
}

impl StaticSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_airing(&mut self, airing: ProgramAiring) {
        self.airings.push(airing);
    }

    pub fn mark_unsearchable(&mut self, channel_id: i64) {
        self.unsearchable.insert(channel_id);
    }
}

impl ProgramLookup for StaticSchedule {
    fn find_airing(&self, channel_id: i64, at: DateTime<Utc>) -> Option<ProgramAiring> {
        // Earliest-starting match wins, like the schedule table's ASC query.
        self.airings
            .iter()
            .filter(|airing| airing.channel_id == channel_id && airing.covers(at))
            .min_by_key(|airing| airing.start)
            .cloned()
    }
}

impl ChannelRegistry for StaticSchedule {
    fn is_searchable(&self, channel_id: i64) -> bool {
        !self.unsearchable.contains(&channel_id)
    }
}
