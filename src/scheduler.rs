//! Single serialized dispatch queue for consolidation work.
//!
//! Every pass runs inside one tokio task, so session passes and global
//! sweeps never overlap. Stop-triggered session passes are delayed by the
//! debounce window and queue up independently; sweep requests coalesce into
//! a single pending deadline, and a finished sweep re-arms itself from the
//! engine's computed next deadline.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::consolidate::{ConsolidateConfig, ConsolidationEngine};

enum Command {
    /// Stop-triggered session pass. Never coalesced: a later tune for the
    /// same token must not swallow a pending stop.
    Session {
        token: String,
        watch_end: DateTime<Utc>,
    },
    /// Debounced sweep request. Replaces any pending sweep deadline.
    Sweep,
}

struct PendingSession {
    due: Instant,
    token: String,
    watch_end: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    tx: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Spawns the dispatch loop. The engine moves into the loop task and is
    /// only ever driven from there.
    pub fn spawn(engine: ConsolidationEngine, config: ConsolidateConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(scheduler_loop(engine, config, rx, cancel.clone()));

        Self {
            inner: Arc::new(SchedulerInner {
                tx,
                cancel,
                task: Mutex::new(Some(task)),
            }),
        }
    }

    /// Queues a session consolidation, to fire after the debounce window.
    pub fn request_session(&self, token: &str, watch_end: DateTime<Utc>) {
        let command = Command::Session {
            token: token.to_string(),
            watch_end,
        };
        if self.inner.tx.send(command).is_err() {
            warn!("scheduler loop is gone; dropping session consolidation for {token}");
        }
    }

    /// Requests a global sweep after the debounce window, replacing any
    /// pending sweep deadline.
    pub fn request_sweep(&self) {
        if self.inner.tx.send(Command::Sweep).is_err() {
            warn!("scheduler loop is gone; dropping sweep request");
        }
    }

    /// Stops the dispatch loop. A pass already running finishes first;
    /// armed-but-unfired work is dropped.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let task = match self.inner.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            if let Err(err) = task.await {
                error!("scheduler task failed to join: {err}");
            }
        }
    }
}

async fn wait_until(due: Option<Instant>) {
    match due {
        Some(due) => sleep_until(due).await,
        None => std::future::pending().await,
    }
}

async fn scheduler_loop(
    engine: ConsolidationEngine,
    config: ConsolidateConfig,
    mut rx: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
) {
    let mut sessions: Vec<PendingSession> = Vec::new();
    let mut sweep: Option<Instant> = None;

    loop {
        let next_due = sessions.iter().map(|pending| pending.due).chain(sweep).min();

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("scheduler shutting down");
                break;
            }
            command = rx.recv() => {
                match command {
                    Some(Command::Session { token, watch_end }) => {
                        sessions.push(PendingSession {
                            due: Instant::now() + config.debounce,
                            token,
                            watch_end,
                        });
                    }
                    Some(Command::Sweep) => {
                        sweep = Some(Instant::now() + config.debounce);
                    }
                    None => break,
                }
            }
            _ = wait_until(next_due) => {
                run_due(&engine, &mut sessions, &mut sweep).await;
            }
        }
    }
}

/// Runs every pass whose deadline has passed. Dispatched passes run to
/// completion; a failed pass is logged and abandoned, and the next scheduled
/// pass retries from persisted state.
async fn run_due(
    engine: &ConsolidationEngine,
    sessions: &mut Vec<PendingSession>,
    sweep: &mut Option<Instant>,
) {
    let now = Instant::now();

    let mut index = 0;
    while index < sessions.len() {
        if sessions[index].due > now {
            index += 1;
            continue;
        }
        let pending = sessions.remove(index);
        match engine
            .consolidate_session(&pending.token, pending.watch_end)
            .await
        {
            Ok(count) => {
                debug!("session {} consolidated {count} rows", pending.token);
            }
            Err(err) => {
                error!(
                    "session consolidation for {} failed: {err:#}",
                    pending.token
                );
            }
        }
    }

    if sweep.map_or(false, |due| due <= now) {
        *sweep = None;
        match engine.consolidate_all(Utc::now()).await {
            Ok(outcome) => {
                if let Some(deadline) = outcome.next_deadline {
                    // The engine only reports future deadlines, but the pass
                    // itself takes time; re-arm immediately if it slipped
                    // into the past meanwhile.
                    *sweep = match (deadline - Utc::now()).to_std() {
                        Ok(delay) => {
                            info!("next sweep armed for {deadline}");
                            Some(Instant::now() + delay)
                        }
                        Err(_) => Some(Instant::now()),
                    };
                }
            }
            Err(err) => error!("global sweep failed: {err:#}"),
        }
    }
}
