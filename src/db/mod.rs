//! SQLite store for watch fragments and consolidated intervals.
//!
//! A dedicated worker thread owns the connection; callers submit closures
//! over a channel and await the reply, so every read and write is serialized
//! through one thread and the store needs no external locking.

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info};
use rusqlite::{params, Connection, Row};
use tokio::sync::oneshot;

mod migrations;

use crate::models::{ConsolidatedInterval, Fragment};
use migrations::run_migrations;

type StoreTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum WorkerMsg {
    Run(StoreTask),
    Shutdown,
}

struct DbShared {
    tx: mpsc::Sender<WorkerMsg>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DbShared {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.tx.send(WorkerMsg::Shutdown) {
                error!("failed to send shutdown to store thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("failed to join store thread: {join_err:?}");
            }
        }
    }
}

fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid {field} '{value}': {err}"))
}

fn parse_optional_datetime(value: Option<String>, field: &str) -> Result<Option<DateTime<Utc>>> {
    value.map(|raw| parse_datetime(&raw, field)).transpose()
}

const FRAGMENT_COLUMNS: &str = "id, channel_id, session_token, watch_start, watch_end, \
     title, description, airing_start, airing_end, consolidated";

fn row_to_fragment(row: &Row) -> Result<Fragment> {
    let watch_start: String = row.get("watch_start")?;
    let watch_end: Option<String> = row.get("watch_end")?;
    let airing_start: Option<String> = row.get("airing_start")?;
    let airing_end: Option<String> = row.get("airing_end")?;
    let consolidated: i64 = row.get("consolidated")?;

    Ok(Fragment {
        id: row.get("id")?,
        channel_id: row.get("channel_id")?,
        session_token: row.get("session_token")?,
        watch_start: parse_datetime(&watch_start, "watch_start")?,
        watch_end: parse_optional_datetime(watch_end, "watch_end")?,
        title: row.get("title")?,
        description: row.get("description")?,
        airing_start: parse_optional_datetime(airing_start, "airing_start")?,
        airing_end: parse_optional_datetime(airing_end, "airing_end")?,
        consolidated: consolidated != 0,
    })
}

fn row_to_interval(row: &Row) -> Result<ConsolidatedInterval> {
    let id: i64 = row.get("id")?;
    let watch_start: String = row.get("watch_start")?;
    let watch_end: Option<String> = row.get("watch_end")?;
    let watch_end =
        watch_end.ok_or_else(|| anyhow!("consolidated row {id} has no watch_end"))?;

    Ok(ConsolidatedInterval {
        id,
        channel_id: row.get("channel_id")?,
        session_token: row.get("session_token")?,
        watch_start: parse_datetime(&watch_start, "watch_start")?,
        watch_end: parse_datetime(&watch_end, "watch_end")?,
        title: row.get("title")?,
        description: row.get("description")?,
    })
}

/// One consolidation write: the in-place update of a fragment and, when a
/// split is needed, the insert of the remainder row. Both run inside a single
/// transaction so a split can never leave a gap behind.
#[derive(Debug, Clone)]
pub struct ConsolidationWrite {
    pub fragment_id: i64,
    pub watch_start: DateTime<Utc>,
    /// `Some` closes the row (`consolidated = 1`); `None` leaves it open and
    /// refreshes program metadata only.
    pub watch_end: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub airing_start: Option<DateTime<Utc>>,
    pub airing_end: Option<DateTime<Utc>>,
    /// Watch start of the remainder row inserted on a split. The remainder
    /// copies channel and session token from the updated row.
    pub split_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct Database {
    shared: Arc<DbShared>,
    db_path: Arc<PathBuf>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (tx, rx) = mpsc::channel::<WorkerMsg>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("tunelog-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite database")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("failed to enable WAL mode: {err}");
                }
                if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
                    error!("failed to enable foreign keys: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run database migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("store initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(msg) = rx.recv() {
                    match msg {
                        WorkerMsg::Run(task) => task(&mut conn),
                        WorkerMsg::Shutdown => break,
                    }
                }

                info!("store thread shutting down");
            })
            .context("failed to spawn store worker thread")?;

        ready_rx
            .recv()
            .context("store worker exited before signaling readiness")??;

        info!("watch-history store opened at {}", db_path.display());

        Ok(Self {
            shared: Arc::new(DbShared {
                tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let tx = self.shared.tx.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let msg = WorkerMsg::Run(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("store caller dropped before receiving result");
            }
        }));

        tx.send(msg)
            .map_err(|err| anyhow!("failed to send task to store thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("store thread terminated unexpectedly"))?
    }

    /// Inserts an open fragment for a tune event and returns its row id.
    pub async fn insert_fragment(
        &self,
        channel_id: i64,
        session_token: &str,
        watch_start: DateTime<Utc>,
    ) -> Result<i64> {
        let session_token = session_token.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO watched_programs (channel_id, session_token, watch_start)
                 VALUES (?1, ?2, ?3)",
                params![channel_id, session_token, watch_start.to_rfc3339()],
            )
            .context("failed to insert watch fragment")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn delete_fragment(&self, id: i64) -> Result<()> {
        self.execute(move |conn| {
            conn.execute("DELETE FROM watched_programs WHERE id = ?1", params![id])
                .with_context(|| format!("failed to delete fragment {id}"))?;
            Ok(())
        })
        .await
    }

    /// Applies one consolidation write atomically. Returns the id of the
    /// remainder row when the write carried a split.
    pub async fn write_consolidation(
        &self,
        write: ConsolidationWrite,
    ) -> Result<Option<i64>> {
        self.execute(move |conn| {
            let tx = conn
                .transaction()
                .context("failed to open consolidation transaction")?;

            let updated = tx
                .execute(
                    "UPDATE watched_programs
                     SET watch_start = ?1,
                         watch_end = ?2,
                         title = ?3,
                         description = ?4,
                         airing_start = ?5,
                         airing_end = ?6,
                         consolidated = ?7
                     WHERE id = ?8",
                    params![
                        write.watch_start.to_rfc3339(),
                        write.watch_end.map(|dt| dt.to_rfc3339()),
                        write.title,
                        write.description,
                        write.airing_start.map(|dt| dt.to_rfc3339()),
                        write.airing_end.map(|dt| dt.to_rfc3339()),
                        write.watch_end.is_some() as i64,
                        write.fragment_id,
                    ],
                )
                .with_context(|| {
                    format!("failed to update fragment {}", write.fragment_id)
                })?;
            if updated == 0 {
                return Err(anyhow!("fragment {} no longer exists", write.fragment_id));
            }

            let inserted = match write.split_at {
                Some(split_at) => {
                    tx.execute(
                        "INSERT INTO watched_programs (channel_id, session_token, watch_start)
                         SELECT channel_id, session_token, ?2
                         FROM watched_programs WHERE id = ?1",
                        params![write.fragment_id, split_at.to_rfc3339()],
                    )
                    .with_context(|| {
                        format!("failed to insert remainder of fragment {}", write.fragment_id)
                    })?;
                    Some(tx.last_insert_rowid())
                }
                None => None,
            };

            tx.commit().context("failed to commit consolidation write")?;
            Ok(inserted)
        })
        .await
    }

    /// Deletes every open fragment; used by the startup recovery path.
    pub async fn delete_open_fragments(&self) -> Result<usize> {
        self.execute(|conn| {
            let deleted = conn
                .execute("DELETE FROM watched_programs WHERE consolidated = 0", [])
                .context("failed to delete open fragments")?;
            Ok(deleted)
        })
        .await
    }

    /// Open fragments for one session, most recent start first.
    pub async fn open_fragments_for_session(
        &self,
        session_token: &str,
    ) -> Result<Vec<Fragment>> {
        let session_token = session_token.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {FRAGMENT_COLUMNS} FROM watched_programs
                 WHERE consolidated = 0 AND session_token = ?1
                 ORDER BY watch_start DESC"
            ))?;
            let rows = stmt.query_map(params![session_token], |row| Ok(row_to_fragment(row)))?;
            let mut fragments = Vec::new();
            for row in rows {
                fragments.push(row??);
            }
            Ok(fragments)
        })
        .await
    }

    /// All open fragments grouped by session, most recent start first within
    /// each group.
    pub async fn all_open_fragments(&self) -> Result<Vec<Fragment>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {FRAGMENT_COLUMNS} FROM watched_programs
                 WHERE consolidated = 0
                 ORDER BY session_token DESC, watch_start DESC"
            ))?;
            let rows = stmt.query_map([], |row| Ok(row_to_fragment(row)))?;
            let mut fragments = Vec::new();
            for row in rows {
                fragments.push(row??);
            }
            Ok(fragments)
        })
        .await
    }

    pub async fn consolidated_intervals_for_session(
        &self,
        session_token: &str,
    ) -> Result<Vec<ConsolidatedInterval>> {
        let session_token = session_token.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {FRAGMENT_COLUMNS} FROM watched_programs
                 WHERE consolidated = 1 AND session_token = ?1
                 ORDER BY watch_start ASC"
            ))?;
            let rows = stmt.query_map(params![session_token], |row| Ok(row_to_interval(row)))?;
            let mut intervals = Vec::new();
            for row in rows {
                intervals.push(row??);
            }
            Ok(intervals)
        })
        .await
    }

    pub async fn all_consolidated_intervals(&self) -> Result<Vec<ConsolidatedInterval>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {FRAGMENT_COLUMNS} FROM watched_programs
                 WHERE consolidated = 1
                 ORDER BY session_token ASC, watch_start ASC"
            ))?;
            let rows = stmt.query_map([], |row| Ok(row_to_interval(row)))?;
            let mut intervals = Vec::new();
            for row in rows {
                intervals.push(row??);
            }
            Ok(intervals)
        })
        .await
    }

    /// Distinct channels that currently have consolidated intervals.
    pub async fn consolidated_channel_ids(&self) -> Result<Vec<i64>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT channel_id FROM watched_programs WHERE consolidated = 1",
            )?;
            let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row?);
            }
            Ok(ids)
        })
        .await
    }

    /// Deletes consolidated intervals on the given channels. Open fragments
    /// are untouched.
    pub async fn delete_consolidated_for_channels(
        &self,
        channel_ids: Vec<i64>,
    ) -> Result<usize> {
        self.execute(move |conn| {
            let tx = conn.transaction().context("failed to open purge transaction")?;
            let mut deleted = 0;
            for channel_id in &channel_ids {
                deleted += tx
                    .execute(
                        "DELETE FROM watched_programs
                         WHERE consolidated = 1 AND channel_id = ?1",
                        params![channel_id],
                    )
                    .with_context(|| format!("failed to purge channel {channel_id}"))?;
            }
            tx.commit().context("failed to commit purge")?;
            Ok(deleted)
        })
        .await
    }
}
