//! Durable record store for pipeline records.
//!
//! The store is the system's single consistency point: every state
//! transition is one single-row compare-and-set statement, and an unmet
//! precondition returns `false` instead of raising. There is no in-memory
//! lock anywhere; ownership is the non-null `dag_run_id` plus
//! `pipeline_status = IN_PROGRESS`, written atomically by [`RecordStore::acquire`].
//!
//! The portable surface is the [`RecordStore`] trait; the SQLite
//! implementation lives in [`repo`].

use chrono::{DateTime, Duration, NaiveDate, Utc};
use diesel::SqliteConnection;

use crate::error::StoreResult;
use crate::models::{AuditCounts, AuditResult, Phase, PipelineRecord, Status};

mod repo;

pub use repo::SqliteStore;

/// Source-side identity triple used to scope continuation and backlog
/// queries.
#[derive(Debug, Clone, Copy)]
pub struct IdentityRef<'a> {
    /// Source endpoint name.
    pub source_name: &'a str,
    /// Source coarse grouping.
    pub source_category: &'a str,
    /// Source fine grouping.
    pub source_sub_category: &'a str,
}

/// Stored processing state for one window, as seen by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCounts {
    /// Pipeline lifecycle status of the stored record.
    pub pipeline_status: Status,
    /// Source count captured by a finished audit, if any.
    pub source_count: Option<i64>,
    /// Target count captured by a finished audit, if any.
    pub target_count: Option<i64>,
}

/// Atomic operations over `pipeline_records`. Each method is a single
/// transaction; `bool` returns report whether the compare-and-set matched.
pub trait RecordStore {
    /// Insert a new record; an existing record with the same id is
    /// preserved untouched. Returns whether a row was inserted.
    fn upsert_new(&self, conn: &mut SqliteConnection, record: &PipelineRecord)
        -> StoreResult<bool>;

    /// Point-read a record by primary key.
    fn get(&self, conn: &mut SqliteConnection, pipeline_id: &str)
        -> StoreResult<Option<PipelineRecord>>;

    /// Take the pipeline lock: only succeeds while the record is PENDING or
    /// FAILED with no owner. Sets IN_PROGRESS, `pipeline_start_time`, and
    /// `dag_run_id` in one statement.
    fn acquire(
        &self,
        conn: &mut SqliteConnection,
        pipeline_id: &str,
        owner: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Mark a phase IN_PROGRESS. Only succeeds while the pipeline is
    /// IN_PROGRESS under `owner`.
    fn begin_phase(
        &self,
        conn: &mut SqliteConnection,
        pipeline_id: &str,
        phase: Phase,
        owner: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Mark a phase COMPLETED and advance `completed_phase`.
    fn end_phase_ok(
        &self,
        conn: &mut SqliteConnection,
        pipeline_id: &str,
        phase: Phase,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Reset a failed phase for retry: phase back to PENDING with cleared
    /// timestamps, lock released, pipeline back to PENDING,
    /// `retry_attempt` incremented.
    fn reset_phase(
        &self,
        conn: &mut SqliteConnection,
        pipeline_id: &str,
        phase: Phase,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Audit success: record counts, mark audit and pipeline COMPLETED.
    /// `dag_run_id` is preserved for attribution.
    fn finalize_ok(
        &self,
        conn: &mut SqliteConnection,
        pipeline_id: &str,
        now: DateTime<Utc>,
        counts: AuditCounts,
    ) -> StoreResult<bool>;

    /// Audit failure: record the verdict, reset both ingestion phases,
    /// release the lock, mark the pipeline FAILED, bump `retry_attempt`.
    fn finalize_fail(
        &self,
        conn: &mut SqliteConnection,
        pipeline_id: &str,
        now: DateTime<Utc>,
        reason: AuditResult,
        counts: Option<AuditCounts>,
    ) -> StoreResult<bool>;

    /// Highest stored `window_end_time` for the identity triple on
    /// `target_day`; the continuation point for the window calculator.
    fn select_max_window_end(
        &self,
        conn: &mut SqliteConnection,
        identity: IdentityRef<'_>,
        target_day: NaiveDate,
    ) -> StoreResult<Option<DateTime<Utc>>>;

    /// Stored status and counts for a window. The pipeline id is a pure
    /// function of identity + window, so it addresses the window directly.
    fn select_counts_by_window(
        &self,
        conn: &mut SqliteConnection,
        pipeline_id: &str,
    ) -> StoreResult<Option<WindowCounts>>;

    /// Records that have been IN_PROGRESS under an owner for longer than
    /// `threshold` as of `now`.
    fn select_stale(
        &self,
        conn: &mut SqliteConnection,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> StoreResult<Vec<PipelineRecord>>;

    /// Reclaim one stale record: release the lock, reset every
    /// non-COMPLETED phase, keep completed work so retries resume.
    fn reset_stale(
        &self,
        conn: &mut SqliteConnection,
        record: &PipelineRecord,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Oldest PENDING record for the identity triple at a given priority,
    /// by window start.
    fn oldest_pending(
        &self,
        conn: &mut SqliteConnection,
        identity: IdentityRef<'_>,
        priority: f64,
    ) -> StoreResult<Option<PipelineRecord>>;

    /// All records for a target day, by window start. Operator inspection.
    fn list_for_day(
        &self,
        conn: &mut SqliteConnection,
        target_day: NaiveDate,
    ) -> StoreResult<Vec<PipelineRecord>>;
}
