//! Watch-history consolidation for TV viewing logs.
//!
//! Raw tune / stop-watching events become closed, boundary-aligned,
//! non-overlapping viewing intervals, split wherever the watch crosses a
//! program-schedule boundary. A single serialized scheduler task runs every
//! pass: stop events are debounced into session-scoped passes, and a
//! coalesced global sweep catches sessions whose stop never arrived (reboot,
//! crash), re-arming itself at the next program boundary.

pub mod consolidate;
pub mod db;
pub mod ingest;
pub mod models;
pub mod purge;
pub mod schedule;
pub mod scheduler;
mod utils;

pub use consolidate::{ConsolidateConfig, ConsolidationEngine, SweepOutcome};
pub use db::Database;
pub use ingest::{EventIngester, IngestError};
pub use models::{ConsolidatedInterval, EventKind, Fragment, ProgramAiring, WatchEvent};
pub use purge::RetentionPurger;
pub use schedule::{ChannelRegistry, ProgramLookup, StaticSchedule};
pub use scheduler::Scheduler;
