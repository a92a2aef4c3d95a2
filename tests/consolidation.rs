//! Engine-level properties: boundary splitting, ordering, dry runs,
//! idempotence, retention.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;
use tunelog::{ConsolidationEngine, Database, ProgramAiring, StaticSchedule};

fn at(hour: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, hour, min, 0).unwrap()
}

fn airing(
    channel_id: i64,
    title: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> ProgramAiring {
    ProgramAiring {
        channel_id,
        title: title.to_string(),
        start,
        end,
        description: None,
    }
}

fn new_db() -> (TempDir, Database) {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Database::new(dir.path().join("tunelog.sqlite3")).expect("database");
    (dir, db)
}

fn engine_with(db: &Database, schedule: StaticSchedule) -> ConsolidationEngine {
    let schedule = Arc::new(schedule);
    ConsolidationEngine::new(db.clone(), schedule.clone(), schedule)
}

#[tokio::test]
async fn boundary_split_produces_two_exact_intervals() {
    let (_dir, db) = new_db();
    let mut schedule = StaticSchedule::new();
    schedule.add_airing(airing(5, "Morning News", at(10, 0), at(10, 45)));
    let engine = engine_with(&db, schedule);

    db.insert_fragment(5, "s1", at(10, 0)).await.expect("insert");
    let count = engine
        .consolidate_session("s1", at(11, 30))
        .await
        .expect("consolidate");
    assert_eq!(count, 2);

    let intervals = db
        .consolidated_intervals_for_session("s1")
        .await
        .expect("query");
    assert_eq!(intervals.len(), 2);

    assert_eq!(intervals[0].watch_start, at(10, 0));
    assert_eq!(intervals[0].watch_end, at(10, 45));
    assert_eq!(intervals[0].title.as_deref(), Some("Morning News"));

    assert_eq!(intervals[1].watch_start, at(10, 45));
    assert_eq!(intervals[1].watch_end, at(11, 30));
    assert_eq!(intervals[1].title, None);

    assert!(db.all_open_fragments().await.expect("open").is_empty());
}

#[tokio::test]
async fn watch_across_many_boundaries_splits_per_airing() {
    let (_dir, db) = new_db();
    let mut schedule = StaticSchedule::new();
    schedule.add_airing(airing(1, "A", at(10, 0), at(10, 30)));
    schedule.add_airing(airing(1, "B", at(10, 30), at(11, 0)));
    schedule.add_airing(airing(1, "C", at(11, 0), at(11, 30)));
    let engine = engine_with(&db, schedule);

    db.insert_fragment(1, "s1", at(10, 5)).await.expect("insert");
    let count = engine
        .consolidate_session("s1", at(11, 20))
        .await
        .expect("consolidate");
    assert_eq!(count, 3);

    let intervals = db
        .consolidated_intervals_for_session("s1")
        .await
        .expect("query");
    let titles: Vec<Option<&str>> = intervals.iter().map(|i| i.title.as_deref()).collect();
    assert_eq!(titles, vec![Some("A"), Some("B"), Some("C")]);
    assert_eq!(intervals[0].watch_start, at(10, 5));
    assert_eq!(intervals[0].watch_end, at(10, 30));
    assert_eq!(intervals[1].watch_end, at(11, 0));
    assert_eq!(intervals[2].watch_end, at(11, 20));
}

#[tokio::test]
async fn channel_changes_yield_contiguous_non_overlapping_intervals() {
    let (_dir, db) = new_db();
    let engine = engine_with(&db, StaticSchedule::new());

    // Three tunes in one session, then a stop.
    db.insert_fragment(1, "s1", at(10, 0)).await.expect("insert");
    db.insert_fragment(2, "s1", at(10, 20)).await.expect("insert");
    db.insert_fragment(3, "s1", at(10, 40)).await.expect("insert");

    engine
        .consolidate_session("s1", at(11, 0))
        .await
        .expect("consolidate");

    let intervals = db
        .consolidated_intervals_for_session("s1")
        .await
        .expect("query");
    assert_eq!(intervals.len(), 3);
    assert_eq!(
        intervals.iter().map(|i| i.channel_id).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    // Conservation: the union of intervals is exactly [first tune, stop].
    assert_eq!(intervals[0].watch_start, at(10, 0));
    assert_eq!(intervals.last().unwrap().watch_end, at(11, 0));
    for pair in intervals.windows(2) {
        assert_eq!(pair[0].watch_end, pair[1].watch_start, "gap or overlap");
        assert!(!pair[0].overlaps(&pair[1]));
    }
}

#[tokio::test]
async fn inverted_interval_deletes_fragment_without_output() {
    let (_dir, db) = new_db();
    let engine = engine_with(&db, StaticSchedule::new());

    db.insert_fragment(1, "s1", at(11, 0)).await.expect("insert");

    // Stop before the tune: malformed, recovered by deleting the fragment.
    let count = engine
        .consolidate_session("s1", at(10, 0))
        .await
        .expect("consolidate");
    assert_eq!(count, 0);
    assert!(db
        .consolidated_intervals_for_session("s1")
        .await
        .expect("query")
        .is_empty());
    assert!(db.all_open_fragments().await.expect("open").is_empty());
}

#[tokio::test]
async fn unknown_session_is_a_noop() {
    let (_dir, db) = new_db();
    let engine = engine_with(&db, StaticSchedule::new());

    let count = engine
        .consolidate_session("ghost", at(12, 0))
        .await
        .expect("consolidate");
    assert_eq!(count, 0);
}

#[tokio::test]
async fn dry_run_leaves_live_session_open_but_fills_metadata() {
    let (_dir, db) = new_db();
    let mut schedule = StaticSchedule::new();
    schedule.add_airing(airing(1, "Matinee", at(10, 0), at(12, 0)));
    let engine = engine_with(&db, schedule);

    db.insert_fragment(1, "s1", at(10, 30)).await.expect("insert");

    let outcome = engine.consolidate_all(at(11, 0)).await.expect("sweep");
    assert_eq!(outcome.consolidated, 0);
    assert_eq!(outcome.next_deadline, Some(at(12, 0)));

    let open = db.all_open_fragments().await.expect("open");
    assert_eq!(open.len(), 1);
    assert!(open[0].is_open());
    assert_eq!(open[0].watch_end, None);
    // The probe still refreshes program metadata on the open row.
    assert_eq!(open[0].title.as_deref(), Some("Matinee"));
    assert_eq!(open[0].airing_end, Some(at(12, 0)));
}

#[tokio::test]
async fn sweep_closes_fragment_at_crossed_boundary() {
    let (_dir, db) = new_db();
    let mut schedule = StaticSchedule::new();
    schedule.add_airing(airing(1, "Evening Show", at(10, 0), at(11, 0)));
    let engine = engine_with(&db, schedule);

    db.insert_fragment(1, "s1", at(10, 30)).await.expect("insert");

    // Before the airing ends: nothing to close, sweep re-arms at the end.
    let outcome = engine.consolidate_all(at(10, 45)).await.expect("sweep");
    assert_eq!(outcome.consolidated, 0);
    assert_eq!(outcome.next_deadline, Some(at(11, 0)));
    assert_eq!(db.all_open_fragments().await.expect("open").len(), 1);

    // After the boundary: the prefix is closed, the remainder stays open
    // because the session may still be live. Dry-run closures don't count.
    let outcome = engine.consolidate_all(at(11, 30)).await.expect("sweep");
    assert_eq!(outcome.consolidated, 0);
    assert_eq!(outcome.next_deadline, None);

    let intervals = db
        .consolidated_intervals_for_session("s1")
        .await
        .expect("query");
    assert_eq!(intervals.len(), 1);
    assert_eq!(intervals[0].watch_start, at(10, 30));
    assert_eq!(intervals[0].watch_end, at(11, 0));
    assert_eq!(intervals[0].title.as_deref(), Some("Evening Show"));

    let open = db.all_open_fragments().await.expect("open");
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].watch_start, at(11, 0));
    assert_eq!(open[0].session_token, "s1");
}

#[tokio::test]
async fn sweep_closes_older_fragments_of_multi_tune_sessions() {
    let (_dir, db) = new_db();
    let engine = engine_with(&db, StaticSchedule::new());

    db.insert_fragment(1, "s1", at(10, 0)).await.expect("insert");
    db.insert_fragment(2, "s1", at(10, 20)).await.expect("insert");

    let outcome = engine.consolidate_all(at(10, 30)).await.expect("sweep");
    // The older fragment is provably over; the newest is only probed.
    assert_eq!(outcome.consolidated, 1);

    let intervals = db
        .consolidated_intervals_for_session("s1")
        .await
        .expect("query");
    assert_eq!(intervals.len(), 1);
    assert_eq!(intervals[0].channel_id, 1);
    assert_eq!(intervals[0].watch_start, at(10, 0));
    assert_eq!(intervals[0].watch_end, at(10, 20));

    let open = db.all_open_fragments().await.expect("open");
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].channel_id, 2);
}

#[tokio::test]
async fn repeated_sweeps_are_idempotent() {
    let (_dir, db) = new_db();
    let mut schedule = StaticSchedule::new();
    schedule.add_airing(airing(1, "A", at(9, 0), at(10, 10)));
    let engine = engine_with(&db, schedule);

    db.insert_fragment(1, "s1", at(9, 30)).await.expect("insert");
    db.insert_fragment(1, "s1", at(10, 0)).await.expect("insert");
    db.insert_fragment(2, "s2", at(10, 5)).await.expect("insert");

    let first = engine.consolidate_all(at(10, 30)).await.expect("sweep");
    let after_first = db.all_consolidated_intervals().await.expect("query");
    let open_after_first = db.all_open_fragments().await.expect("open");

    let second = engine.consolidate_all(at(10, 30)).await.expect("sweep");
    let after_second = db.all_consolidated_intervals().await.expect("query");
    let open_after_second = db.all_open_fragments().await.expect("open");

    assert_eq!(second.consolidated, 0);
    assert_eq!(after_first, after_second);
    assert_eq!(open_after_first.len(), open_after_second.len());
    assert_eq!(first.next_deadline, second.next_deadline);
}

#[tokio::test]
async fn sweep_without_airing_arms_nothing() {
    // A lone long-running fragment with no schedule coverage never produces
    // a future deadline; only a later tune event would arm another sweep.
    let (_dir, db) = new_db();
    let engine = engine_with(&db, StaticSchedule::new());

    db.insert_fragment(9, "s1", at(10, 0)).await.expect("insert");

    let outcome = engine.consolidate_all(at(11, 0)).await.expect("sweep");
    assert_eq!(outcome.consolidated, 0);
    assert_eq!(outcome.next_deadline, None);
    assert_eq!(db.all_open_fragments().await.expect("open").len(), 1);
}

#[tokio::test]
async fn next_deadline_skips_past_airing_ends() {
    let (_dir, db) = new_db();
    let mut schedule = StaticSchedule::new();
    // Covers the fragment start but already over at sweep time. The open
    // fragment is the newest of its session, so it survives the dry run with
    // a split, and its remainder has no airing.
    schedule.add_airing(airing(1, "Stale", at(9, 0), at(10, 0)));
    let engine = engine_with(&db, schedule);

    db.insert_fragment(1, "s1", at(9, 30)).await.expect("insert");

    let outcome = engine.consolidate_all(at(10, 30)).await.expect("sweep");
    assert_eq!(outcome.next_deadline, None);
}

#[tokio::test]
async fn purge_removes_unsearchable_consolidated_rows_only() {
    let (_dir, db) = new_db();
    let mut schedule = StaticSchedule::new();
    schedule.mark_unsearchable(7);
    let engine = engine_with(&db, schedule);

    // s1 watches the non-searchable channel and stops; s2 is still on it.
    db.insert_fragment(7, "s1", at(10, 0)).await.expect("insert");
    db.insert_fragment(7, "s2", at(10, 40)).await.expect("insert");

    let count = engine
        .consolidate_session("s1", at(10, 30))
        .await
        .expect("consolidate");
    assert_eq!(count, 1);

    // The consolidated interval was purged right after the pass.
    assert!(db
        .consolidated_intervals_for_session("s1")
        .await
        .expect("query")
        .is_empty());

    // The open fragment for s2 is never purged.
    let open = db.all_open_fragments().await.expect("open");
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].session_token, "s2");
}

#[tokio::test]
async fn consolidate_row_is_atomic_per_split() {
    // A split writes the closed prefix and the open remainder in one
    // transaction; after any number of splits the union of rows covers the
    // original range with no gaps.
    let (_dir, db) = new_db();
    let mut schedule = StaticSchedule::new();
    for slot in 0..5 {
        let start = at(10, slot * 10);
        let end = at(10, (slot + 1) * 10);
        schedule.add_airing(airing(1, &format!("slot-{slot}"), start, end));
    }
    let engine = engine_with(&db, schedule);

    let id = db.insert_fragment(1, "s1", at(10, 0)).await.expect("insert");
    let count = engine
        .consolidate_row(id, at(10, 0), at(10, 48), 1, false)
        .await
        .expect("consolidate_row");
    assert_eq!(count, 5);

    let intervals = db
        .consolidated_intervals_for_session("s1")
        .await
        .expect("query");
    assert_eq!(intervals.len(), 5);
    assert_eq!(intervals[0].watch_start, at(10, 0));
    assert_eq!(intervals.last().unwrap().watch_end, at(10, 48));
    for pair in intervals.windows(2) {
        assert_eq!(pair[0].watch_end, pair[1].watch_start);
    }
}
