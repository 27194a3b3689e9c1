//! Stale-lock recovery: hung executions are reclaimed, completed work is
//! preserved, and the sweep runs even when the scheduled run fails.

use chrono::Duration;

use pipeline_drive::models::{Phase, Status};
use pipeline_drive::run::scheduled_run;
use pipeline_drive::store::{RecordStore, SqliteStore};
use pipeline_drive::sweeper::sweep;

mod common;

use common::{make_record, plan, test_settings, utc, Fakes, FixedClock};

fn seed_hung_record(
    conn: &mut diesel::SqliteConnection,
    store: &SqliteStore,
    started_at: chrono::DateTime<chrono::Utc>,
) -> String {
    let settings = test_settings();
    let day = chrono::NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
    let record = make_record(
        &settings,
        &plan(day, utc(2025, 1, 1, 0, 0), 30),
        started_at,
    );
    store.upsert_new(conn, &record).unwrap();
    let id = record.pipeline_id;

    // The run finished source→stage, then died mid stage→target.
    assert!(store.acquire(conn, &id, "dead-run", started_at).unwrap());
    assert!(store
        .begin_phase(conn, &id, Phase::SourceToStageIngestion, "dead-run", started_at)
        .unwrap());
    assert!(store
        .end_phase_ok(conn, &id, Phase::SourceToStageIngestion, started_at)
        .unwrap());
    assert!(store
        .begin_phase(conn, &id, Phase::StageToTargetIngestion, "dead-run", started_at)
        .unwrap());
    id
}

#[test]
fn sweeper_reclaims_hung_records_and_preserves_completed_work() {
    let (_db, mut conn) = common::setup_db();
    let store = SqliteStore::new();
    let started = utc(2025, 1, 2, 1, 0);
    let id = seed_hung_record(&mut conn, &store, started);

    // Three hours later, with a two-hour threshold.
    let clock = FixedClock::new(started + Duration::hours(3));
    let cleaned = sweep(&mut conn, &store, &clock, Duration::hours(2));
    assert_eq!(cleaned, 1);

    let stored = store.get(&mut conn, &id).unwrap().unwrap();
    assert_eq!(stored.pipeline_status, Status::Pending.as_str());
    assert!(stored.dag_run_id.is_none());
    assert!(stored.pipeline_start_time.is_none());
    assert_eq!(stored.retry_attempt, 1);

    // Completed work survives; the hung phase is reset.
    assert_eq!(
        stored.source_to_stage_ingestion_status,
        Status::Completed.as_str()
    );
    assert_eq!(
        stored.stage_to_target_ingestion_status,
        Status::Pending.as_str()
    );
    assert!(stored.stage_to_target_ingestion_start_time.is_none());
    assert_eq!(
        stored.completed_phase.as_deref(),
        Some(Phase::SourceToStageIngestion.as_str())
    );

    // The next run acquires cleanly.
    assert!(store
        .acquire(&mut conn, &id, "next-run", clock_now(&clock))
        .unwrap());
}

fn clock_now(clock: &FixedClock) -> chrono::DateTime<chrono::Utc> {
    use pipeline_drive::adapters::Clock;
    clock.now()
}

#[test]
fn fresh_locks_are_left_alone() {
    let (_db, mut conn) = common::setup_db();
    let store = SqliteStore::new();
    let started = utc(2025, 1, 2, 1, 0);
    let id = seed_hung_record(&mut conn, &store, started);

    let clock = FixedClock::new(started + Duration::minutes(30));
    let cleaned = sweep(&mut conn, &store, &clock, Duration::hours(2));
    assert_eq!(cleaned, 0);

    let stored = store.get(&mut conn, &id).unwrap().unwrap();
    assert_eq!(stored.pipeline_status, Status::InProgress.as_str());
    assert_eq!(stored.dag_run_id.as_deref(), Some("dead-run"));
    assert_eq!(stored.retry_attempt, 0);
}

#[test]
fn sweep_runs_even_when_the_scheduled_run_fails() {
    let (_db, mut conn) = common::setup_db();
    let store = SqliteStore::new();

    // A hung record from yesterday's dead run.
    let started = utc(2025, 1, 1, 20, 0);
    let hung_id = seed_hung_record(&mut conn, &store, started);

    // Today's run fails in the transfer.
    let settings = test_settings();
    let clock = FixedClock::new(utc(2025, 1, 2, 1, 15));
    let fakes = Fakes::new(&[1000], &[0]);
    fakes.transfer.fail.set(true);

    let err = scheduled_run(
        &mut conn,
        &store,
        &fakes.adapters(),
        &clock,
        &settings,
        "dag-run-2",
    );
    assert!(err.is_err());

    // The sweeper still reclaimed the hung record.
    let stored = store.get(&mut conn, &hung_id).unwrap().unwrap();
    assert_eq!(stored.pipeline_status, Status::Pending.as_str());
    assert!(stored.dag_run_id.is_none());
}
