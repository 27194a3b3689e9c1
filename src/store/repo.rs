//! SQLite implementation of [`RecordStore`].
//!
//! Every transition is an UPDATE whose WHERE clause carries the
//! precondition, so the row-level compare-and-set is the mutual exclusion
//! mechanism. `execute` returning 0 rows means the precondition did not
//! hold. Timestamps are written through [`tz::to_rfc3339_millis`], which
//! keeps string comparison equivalent to instant comparison in the stale
//! scan and the continuation query.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use diesel::prelude::*;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::models::{AuditCounts, AuditResult, Phase, PipelineRecord, Status};
use crate::schema::pipeline_records::dsl as pr;
use crate::store::{IdentityRef, RecordStore, WindowCounts};
use crate::tz;

/// Record store backed by the `pipeline_records` SQLite table.
pub struct SqliteStore;

impl SqliteStore {
    /// Create the store handle.
    pub fn new() -> Self {
        Self
    }
}

impl Default for SqliteStore {
    fn default() -> Self {
        Self::new()
    }
}

fn ts(now: DateTime<Utc>) -> String {
    tz::to_rfc3339_millis(now)
}

impl RecordStore for SqliteStore {
    fn upsert_new(
        &self,
        conn: &mut SqliteConnection,
        record: &PipelineRecord,
    ) -> StoreResult<bool> {
        let inserted = diesel::insert_into(pr::pipeline_records)
            .values(record)
            .on_conflict(pr::pipeline_id)
            .do_nothing()
            .execute(conn)?;
        debug!(
            pipeline_id = %record.pipeline_id,
            inserted = (inserted == 1),
            "upsert_new"
        );
        Ok(inserted == 1)
    }

    fn get(
        &self,
        conn: &mut SqliteConnection,
        pipeline_id: &str,
    ) -> StoreResult<Option<PipelineRecord>> {
        Ok(pr::pipeline_records
            .find(pipeline_id)
            .select(PipelineRecord::as_select())
            .first(conn)
            .optional()?)
    }

    fn acquire(
        &self,
        conn: &mut SqliteConnection,
        pipeline_id: &str,
        owner: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let stamp = ts(now);
        let n = diesel::update(
            pr::pipeline_records.filter(
                pr::pipeline_id.eq(pipeline_id).and(
                    pr::pipeline_status
                        .eq_any([Status::Pending.as_str(), Status::Failed.as_str()])
                        .and(pr::dag_run_id.is_null()),
                ),
            ),
        )
        .set((
            pr::pipeline_status.eq(Status::InProgress.as_str()),
            pr::pipeline_start_time.eq(Some(stamp.clone())),
            pr::pipeline_end_time.eq(None::<String>),
            pr::dag_run_id.eq(Some(owner.to_string())),
            pr::record_last_updated_time.eq(&stamp),
        ))
        .execute(conn)?;
        debug!(pipeline_id, owner, acquired = (n == 1), "acquire");
        Ok(n == 1)
    }

    fn begin_phase(
        &self,
        conn: &mut SqliteConnection,
        pipeline_id: &str,
        phase: Phase,
        owner: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let stamp = ts(now);
        let held = pr::pipeline_id.eq(pipeline_id).and(
            pr::pipeline_status
                .eq(Status::InProgress.as_str())
                .and(pr::dag_run_id.eq(owner)),
        );
        let n = match phase {
            Phase::SourceToStageIngestion => diesel::update(pr::pipeline_records.filter(held))
                .set((
                    pr::source_to_stage_ingestion_status.eq(Status::InProgress.as_str()),
                    pr::source_to_stage_ingestion_start_time.eq(Some(stamp.clone())),
                    pr::source_to_stage_ingestion_end_time.eq(None::<String>),
                    pr::record_last_updated_time.eq(&stamp),
                ))
                .execute(conn)?,
            Phase::StageToTargetIngestion => diesel::update(pr::pipeline_records.filter(held))
                .set((
                    pr::stage_to_target_ingestion_status.eq(Status::InProgress.as_str()),
                    pr::stage_to_target_ingestion_start_time.eq(Some(stamp.clone())),
                    pr::stage_to_target_ingestion_end_time.eq(None::<String>),
                    pr::record_last_updated_time.eq(&stamp),
                ))
                .execute(conn)?,
            Phase::Audit => diesel::update(pr::pipeline_records.filter(held))
                .set((
                    pr::audit_status.eq(Status::InProgress.as_str()),
                    pr::audit_start_time.eq(Some(stamp.clone())),
                    pr::audit_end_time.eq(None::<String>),
                    pr::record_last_updated_time.eq(&stamp),
                ))
                .execute(conn)?,
        };
        debug!(pipeline_id, phase = phase.as_str(), begun = (n == 1), "begin_phase");
        Ok(n == 1)
    }

    fn end_phase_ok(
        &self,
        conn: &mut SqliteConnection,
        pipeline_id: &str,
        phase: Phase,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let stamp = ts(now);
        let n = match phase {
            Phase::SourceToStageIngestion => diesel::update(
                pr::pipeline_records.filter(
                    pr::pipeline_id.eq(pipeline_id).and(
                        pr::source_to_stage_ingestion_status.eq(Status::InProgress.as_str()),
                    ),
                ),
            )
            .set((
                pr::source_to_stage_ingestion_status.eq(Status::Completed.as_str()),
                pr::source_to_stage_ingestion_end_time.eq(Some(stamp.clone())),
                pr::completed_phase.eq(Some(phase.as_str())),
                pr::record_last_updated_time.eq(&stamp),
            ))
            .execute(conn)?,
            Phase::StageToTargetIngestion => diesel::update(
                pr::pipeline_records.filter(
                    pr::pipeline_id.eq(pipeline_id).and(
                        pr::stage_to_target_ingestion_status.eq(Status::InProgress.as_str()),
                    ),
                ),
            )
            .set((
                pr::stage_to_target_ingestion_status.eq(Status::Completed.as_str()),
                pr::stage_to_target_ingestion_end_time.eq(Some(stamp.clone())),
                pr::completed_phase.eq(Some(phase.as_str())),
                pr::record_last_updated_time.eq(&stamp),
            ))
            .execute(conn)?,
            Phase::Audit => diesel::update(
                pr::pipeline_records.filter(
                    pr::pipeline_id
                        .eq(pipeline_id)
                        .and(pr::audit_status.eq(Status::InProgress.as_str())),
                ),
            )
            .set((
                pr::audit_status.eq(Status::Completed.as_str()),
                pr::audit_end_time.eq(Some(stamp.clone())),
                pr::completed_phase.eq(Some(phase.as_str())),
                pr::record_last_updated_time.eq(&stamp),
            ))
            .execute(conn)?,
        };
        debug!(pipeline_id, phase = phase.as_str(), ended = (n == 1), "end_phase_ok");
        Ok(n == 1)
    }

    fn reset_phase(
        &self,
        conn: &mut SqliteConnection,
        pipeline_id: &str,
        phase: Phase,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let stamp = ts(now);
        conn.immediate_transaction::<_, StoreError, _>(|tx| {
            let base = diesel::update(pr::pipeline_records.filter(pr::pipeline_id.eq(pipeline_id)))
                .set((
                    pr::pipeline_status.eq(Status::Pending.as_str()),
                    pr::pipeline_start_time.eq(None::<String>),
                    pr::dag_run_id.eq(None::<String>),
                    pr::retry_attempt.eq(pr::retry_attempt + 1),
                    pr::record_last_updated_time.eq(&stamp),
                ))
                .execute(tx)?;

            match phase {
                Phase::SourceToStageIngestion => {
                    diesel::update(pr::pipeline_records.filter(pr::pipeline_id.eq(pipeline_id)))
                        .set((
                            pr::source_to_stage_ingestion_status.eq(Status::Pending.as_str()),
                            pr::source_to_stage_ingestion_start_time.eq(None::<String>),
                            pr::source_to_stage_ingestion_end_time.eq(None::<String>),
                        ))
                        .execute(tx)?;
                }
                Phase::StageToTargetIngestion => {
                    diesel::update(pr::pipeline_records.filter(pr::pipeline_id.eq(pipeline_id)))
                        .set((
                            pr::stage_to_target_ingestion_status.eq(Status::Pending.as_str()),
                            pr::stage_to_target_ingestion_start_time.eq(None::<String>),
                            pr::stage_to_target_ingestion_end_time.eq(None::<String>),
                        ))
                        .execute(tx)?;
                }
                Phase::Audit => {
                    diesel::update(pr::pipeline_records.filter(pr::pipeline_id.eq(pipeline_id)))
                        .set((
                            pr::audit_status.eq(Status::Pending.as_str()),
                            pr::audit_start_time.eq(None::<String>),
                            pr::audit_end_time.eq(None::<String>),
                            pr::audit_result.eq(None::<String>),
                        ))
                        .execute(tx)?;
                }
            }
            debug!(pipeline_id, phase = phase.as_str(), reset = (base == 1), "reset_phase");
            Ok(base == 1)
        })
    }

    fn finalize_ok(
        &self,
        conn: &mut SqliteConnection,
        pipeline_id: &str,
        now: DateTime<Utc>,
        counts: AuditCounts,
    ) -> StoreResult<bool> {
        let stamp = ts(now);
        let n = diesel::update(
            pr::pipeline_records.filter(
                pr::pipeline_id
                    .eq(pipeline_id)
                    .and(pr::audit_status.eq(Status::InProgress.as_str()))
                    .and(pr::pipeline_status.eq(Status::InProgress.as_str())),
            ),
        )
        .set((
            pr::audit_status.eq(Status::Completed.as_str()),
            pr::audit_end_time.eq(Some(stamp.clone())),
            pr::audit_result.eq(Some(AuditResult::Success.as_str())),
            pr::pipeline_status.eq(Status::Completed.as_str()),
            pr::pipeline_end_time.eq(Some(stamp.clone())),
            pr::source_count.eq(Some(counts.source)),
            pr::target_count.eq(Some(counts.target)),
            pr::count_difference.eq(Some(counts.difference())),
            pr::percentage_difference.eq(Some(counts.percentage_difference())),
            pr::completed_phase.eq(Some(Phase::Audit.as_str())),
            pr::record_last_updated_time.eq(&stamp),
        ))
        .execute(conn)?;
        debug!(pipeline_id, finalized = (n == 1), "finalize_ok");
        Ok(n == 1)
    }

    fn finalize_fail(
        &self,
        conn: &mut SqliteConnection,
        pipeline_id: &str,
        now: DateTime<Utc>,
        reason: AuditResult,
        counts: Option<AuditCounts>,
    ) -> StoreResult<bool> {
        let stamp = ts(now);
        conn.immediate_transaction::<_, StoreError, _>(|tx| {
            let n = diesel::update(pr::pipeline_records.filter(pr::pipeline_id.eq(pipeline_id)))
                .set((
                    pr::audit_status.eq(Status::Failed.as_str()),
                    pr::audit_end_time.eq(Some(stamp.clone())),
                    pr::audit_result.eq(Some(reason.as_str())),
                    pr::source_to_stage_ingestion_status.eq(Status::Pending.as_str()),
                    pr::source_to_stage_ingestion_start_time.eq(None::<String>),
                    pr::source_to_stage_ingestion_end_time.eq(None::<String>),
                    pr::stage_to_target_ingestion_status.eq(Status::Pending.as_str()),
                    pr::stage_to_target_ingestion_start_time.eq(None::<String>),
                    pr::stage_to_target_ingestion_end_time.eq(None::<String>),
                    pr::pipeline_status.eq(Status::Failed.as_str()),
                    pr::pipeline_start_time.eq(None::<String>),
                    pr::pipeline_end_time.eq(None::<String>),
                    pr::dag_run_id.eq(None::<String>),
                    pr::completed_phase.eq(None::<String>),
                    pr::retry_attempt.eq(pr::retry_attempt + 1),
                    pr::record_last_updated_time.eq(&stamp),
                ))
                .execute(tx)?;

            if let Some(c) = counts {
                diesel::update(pr::pipeline_records.filter(pr::pipeline_id.eq(pipeline_id)))
                    .set((
                        pr::source_count.eq(Some(c.source)),
                        pr::target_count.eq(Some(c.target)),
                        pr::count_difference.eq(Some(c.difference())),
                        pr::percentage_difference.eq(Some(c.percentage_difference())),
                    ))
                    .execute(tx)?;
            }
            debug!(pipeline_id, reason = reason.as_str(), finalized = (n == 1), "finalize_fail");
            Ok(n == 1)
        })
    }

    fn select_max_window_end(
        &self,
        conn: &mut SqliteConnection,
        identity: IdentityRef<'_>,
        target_day: NaiveDate,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        let max: Option<String> = pr::pipeline_records
            .filter(
                pr::source_name
                    .eq(identity.source_name)
                    .and(pr::source_category.eq(identity.source_category))
                    .and(pr::source_sub_category.eq(identity.source_sub_category))
                    .and(pr::target_day.eq(target_day.to_string())),
            )
            .select(diesel::dsl::max(pr::window_end_time))
            .first(conn)?;
        max.map(|s| {
            tz::parse_ts_to_utc(&s).map_err(|e| StoreError::Corrupt(format!("window_end_time: {e}")))
        })
        .transpose()
    }

    fn select_counts_by_window(
        &self,
        conn: &mut SqliteConnection,
        pipeline_id: &str,
    ) -> StoreResult<Option<WindowCounts>> {
        let row: Option<(String, Option<i64>, Option<i64>)> = pr::pipeline_records
            .find(pipeline_id)
            .select((pr::pipeline_status, pr::source_count, pr::target_count))
            .first(conn)
            .optional()?;
        row.map(|(status, source, target)| {
            Ok(WindowCounts {
                pipeline_status: Status::from_db(&status)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                source_count: source,
                target_count: target,
            })
        })
        .transpose()
    }

    fn select_stale(
        &self,
        conn: &mut SqliteConnection,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> StoreResult<Vec<PipelineRecord>> {
        let cutoff = ts(now - threshold);
        Ok(pr::pipeline_records
            .filter(
                pr::pipeline_status
                    .eq(Status::InProgress.as_str())
                    .and(pr::dag_run_id.is_not_null())
                    .and(pr::pipeline_start_time.is_not_null())
                    .and(pr::pipeline_start_time.lt(Some(cutoff))),
            )
            .select(PipelineRecord::as_select())
            .load(conn)?)
    }

    fn reset_stale(
        &self,
        conn: &mut SqliteConnection,
        record: &PipelineRecord,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let stamp = ts(now);
        let pipeline_id = record.pipeline_id.as_str();

        // Completed phases survive so the retry resumes behind them.
        let mut resume: Option<&'static str> = None;
        for phase in [Phase::SourceToStageIngestion, Phase::StageToTargetIngestion] {
            let status = record
                .phase_status(phase)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            if status == Status::Completed {
                resume = Some(phase.as_str());
            }
        }

        conn.immediate_transaction::<_, StoreError, _>(|tx| {
            let n = diesel::update(
                pr::pipeline_records.filter(
                    pr::pipeline_id
                        .eq(pipeline_id)
                        .and(pr::pipeline_status.eq(Status::InProgress.as_str())),
                ),
            )
            .set((
                pr::pipeline_status.eq(Status::Pending.as_str()),
                pr::pipeline_start_time.eq(None::<String>),
                pr::pipeline_end_time.eq(None::<String>),
                pr::dag_run_id.eq(None::<String>),
                pr::completed_phase.eq(resume),
                pr::retry_attempt.eq(pr::retry_attempt + 1),
                pr::record_last_updated_time.eq(&stamp),
            ))
            .execute(tx)?;
            if n == 0 {
                // Finished (or reclaimed by someone else) between the scan
                // and this reset.
                return Ok(false);
            }

            let s2s = record
                .phase_status(Phase::SourceToStageIngestion)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            if s2s != Status::Completed {
                diesel::update(pr::pipeline_records.filter(pr::pipeline_id.eq(pipeline_id)))
                    .set((
                        pr::source_to_stage_ingestion_status.eq(Status::Pending.as_str()),
                        pr::source_to_stage_ingestion_start_time.eq(None::<String>),
                        pr::source_to_stage_ingestion_end_time.eq(None::<String>),
                    ))
                    .execute(tx)?;
            }

            let s2t = record
                .phase_status(Phase::StageToTargetIngestion)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            if s2t != Status::Completed {
                diesel::update(pr::pipeline_records.filter(pr::pipeline_id.eq(pipeline_id)))
                    .set((
                        pr::stage_to_target_ingestion_status.eq(Status::Pending.as_str()),
                        pr::stage_to_target_ingestion_start_time.eq(None::<String>),
                        pr::stage_to_target_ingestion_end_time.eq(None::<String>),
                    ))
                    .execute(tx)?;
            }

            let audit = record
                .phase_status(Phase::Audit)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            if audit != Status::Completed {
                diesel::update(pr::pipeline_records.filter(pr::pipeline_id.eq(pipeline_id)))
                    .set((
                        pr::audit_status.eq(Status::Pending.as_str()),
                        pr::audit_start_time.eq(None::<String>),
                        pr::audit_end_time.eq(None::<String>),
                        pr::audit_result.eq(None::<String>),
                    ))
                    .execute(tx)?;
            }

            debug!(pipeline_id, "reset_stale");
            Ok(true)
        })
    }

    fn oldest_pending(
        &self,
        conn: &mut SqliteConnection,
        identity: IdentityRef<'_>,
        priority: f64,
    ) -> StoreResult<Option<PipelineRecord>> {
        Ok(pr::pipeline_records
            .filter(
                pr::pipeline_status
                    .eq(Status::Pending.as_str())
                    .and(pr::source_name.eq(identity.source_name))
                    .and(pr::source_category.eq(identity.source_category))
                    .and(pr::source_sub_category.eq(identity.source_sub_category))
                    .and(pr::pipeline_priority.eq(priority)),
            )
            .order(pr::window_start_time.asc())
            .select(PipelineRecord::as_select())
            .first(conn)
            .optional()?)
    }

    fn list_for_day(
        &self,
        conn: &mut SqliteConnection,
        target_day: NaiveDate,
    ) -> StoreResult<Vec<PipelineRecord>> {
        Ok(pr::pipeline_records
            .filter(pr::target_day.eq(target_day.to_string()))
            .order(pr::window_start_time.asc())
            .select(PipelineRecord::as_select())
            .load(conn)?)
    }
}
