use std::sync::Arc;

use anyhow::Result;
use log::info;

use crate::{db::Database, schedule::ChannelRegistry};

/// Removes consolidated intervals whose channel has since been flagged
/// non-searchable.
///
/// Consolidated-only: open fragments are left alone because a later session
/// pass may still need them.
#[derive(Clone)]
pub struct RetentionPurger {
    db: Database,
    channels: Arc<dyn ChannelRegistry>,
}

impl RetentionPurger {
    pub fn new(db: Database, channels: Arc<dyn ChannelRegistry>) -> Self {
        Self { db, channels }
    }

    /// Returns the number of intervals deleted.
    pub async fn purge_unsearchable(&self) -> Result<usize> {
        let blocked: Vec<i64> = self
            .db
            .consolidated_channel_ids()
            .await?
            .into_iter()
            .filter(|channel_id| !self.channels.is_searchable(*channel_id))
            .collect();

        if blocked.is_empty() {
            return Ok(0);
        }

        let deleted = self.db.delete_consolidated_for_channels(blocked).await?;
        if deleted > 0 {
            info!("purged {deleted} watch intervals from non-searchable channels");
        }
        Ok(deleted)
    }
}
