//! Row types and status vocabulary for the `pipeline_records` table.
//!
//! Statuses, phases, and audit results are stored as uppercase text and
//! decoded through the small codec helpers here; timestamps are RFC3339 UTC
//! strings (see [`crate::tz`]). The same struct serves Queryable and
//! Insertable duty because a record is always inserted whole.

use anyhow::bail;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::pipeline_records;
use crate::tz;

/// Lifecycle state shared by the pipeline and each phase block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Not started (or reset for retry).
    Pending,
    /// Currently executing under a lock.
    InProgress,
    /// Durably finished.
    Completed,
    /// Finished unsuccessfully; eligible for re-acquire.
    Failed,
}

impl Status {
    /// Storage form.
    pub const fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "PENDING",
            Status::InProgress => "IN_PROGRESS",
            Status::Completed => "COMPLETED",
            Status::Failed => "FAILED",
        }
    }

    /// Decode the storage form.
    pub fn from_db(s: &str) -> anyhow::Result<Self> {
        Ok(match s {
            "PENDING" => Status::Pending,
            "IN_PROGRESS" => Status::InProgress,
            "COMPLETED" => Status::Completed,
            "FAILED" => Status::Failed,
            other => bail!("unknown status: {other}"),
        })
    }
}

/// The three phases that own a status block on the record, in execution
/// order. Ordering is derived from declaration order and backs the
/// `completed_phase` monotonicity checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Source→stage ingestion.
    SourceToStageIngestion,
    /// Stage→target ingestion.
    StageToTargetIngestion,
    /// Count reconciliation and finalization.
    Audit,
}

impl Phase {
    /// Storage form, also used in log fields.
    pub const fn as_str(self) -> &'static str {
        match self {
            Phase::SourceToStageIngestion => "source_to_stage_ingestion",
            Phase::StageToTargetIngestion => "stage_to_target_ingestion",
            Phase::Audit => "audit",
        }
    }

    /// Decode the storage form.
    pub fn from_db(s: &str) -> anyhow::Result<Self> {
        Ok(match s {
            "source_to_stage_ingestion" => Phase::SourceToStageIngestion,
            "stage_to_target_ingestion" => Phase::StageToTargetIngestion,
            "audit" => Phase::Audit,
            other => bail!("unknown phase: {other}"),
        })
    }
}

/// Verdict recorded by the audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditResult {
    /// Counts reconciled.
    Success,
    /// Target count exceeded source count.
    IntegrityViolation,
    /// Budget exhausted with the target still behind.
    Mismatch,
}

impl AuditResult {
    /// Storage form.
    pub const fn as_str(self) -> &'static str {
        match self {
            AuditResult::Success => "SUCCESS",
            AuditResult::IntegrityViolation => "INTEGRITY_VIOLATION",
            AuditResult::Mismatch => "MISMATCH",
        }
    }

    /// Decode the storage form.
    pub fn from_db(s: &str) -> anyhow::Result<Self> {
        Ok(match s {
            "SUCCESS" => AuditResult::Success,
            "INTEGRITY_VIOLATION" => AuditResult::IntegrityViolation,
            "MISMATCH" => AuditResult::Mismatch,
            other => bail!("unknown audit result: {other}"),
        })
    }
}

/// Counts observed by a finished audit pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditCounts {
    /// Rows counted at the source for the window.
    pub source: i64,
    /// Rows counted at the target for the window.
    pub target: i64,
}

impl AuditCounts {
    /// `target - source`.
    pub fn difference(self) -> i64 {
        self.target - self.source
    }

    /// Difference relative to the source count; 0 when the source is empty.
    pub fn percentage_difference(self) -> f64 {
        if self.source == 0 {
            0.0
        } else {
            self.difference() as f64 / self.source as f64 * 100.0
        }
    }
}

/// Free-form per-record payload stored in the `miscellaneous` column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Miscellaneous {
    /// Stage artifact location for this window, written at generation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_path: Option<String>,
}

impl Miscellaneous {
    /// Decode the column value; an absent column decodes to defaults.
    pub fn from_column(raw: Option<&str>) -> anyhow::Result<Self> {
        match raw {
            None => Ok(Self::default()),
            Some(s) => Ok(serde_json::from_str(s)?),
        }
    }

    /// Encode for storage.
    pub fn to_column(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// One row of `pipeline_records`: a (source, stage, target, window) unit of
/// work. Field order matches the table declaration.
#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = pipeline_records, check_for_backend(diesel::sqlite::Sqlite))]
pub struct PipelineRecord {
    /// Primary key: 32-hex-char hash of identity + window.
    pub pipeline_id: String,
    /// Source component id (16 hex chars).
    pub source_id: String,
    /// Source endpoint name.
    pub source_name: String,
    /// Source coarse grouping.
    pub source_category: String,
    /// Source fine grouping.
    pub source_sub_category: String,
    /// Stage component id.
    pub stage_id: String,
    /// Stage endpoint name.
    pub stage_name: String,
    /// Stage coarse grouping (bucket or share).
    pub stage_category: String,
    /// Stage artifact path for this window.
    pub stage_sub_category: String,
    /// Target component id.
    pub target_id: String,
    /// Target endpoint name.
    pub target_name: String,
    /// Target coarse grouping (database.schema.table).
    pub target_category: String,
    /// Target load match pattern for this window.
    pub target_sub_category: String,
    /// Local calendar day, `YYYY-MM-DD`.
    pub target_day: String,
    /// Window start, RFC3339 UTC.
    pub window_start_time: String,
    /// Window end (exclusive), RFC3339 UTC.
    pub window_end_time: String,
    /// Achieved granularity, compound form (e.g. `"30m"`).
    pub granularity: String,
    /// Pipeline lifecycle status.
    pub pipeline_status: String,
    /// When the lock was acquired, RFC3339 UTC.
    pub pipeline_start_time: Option<String>,
    /// When the pipeline completed, RFC3339 UTC.
    pub pipeline_end_time: Option<String>,
    /// Scheduling priority.
    pub pipeline_priority: f64,
    /// Lock owner; non-null means owned.
    pub dag_run_id: Option<String>,
    /// Source→stage phase status.
    pub source_to_stage_ingestion_status: String,
    /// Source→stage phase start, RFC3339 UTC.
    pub source_to_stage_ingestion_start_time: Option<String>,
    /// Source→stage phase end, RFC3339 UTC.
    pub source_to_stage_ingestion_end_time: Option<String>,
    /// Stage→target phase status.
    pub stage_to_target_ingestion_status: String,
    /// Stage→target phase start, RFC3339 UTC.
    pub stage_to_target_ingestion_start_time: Option<String>,
    /// Stage→target phase end, RFC3339 UTC.
    pub stage_to_target_ingestion_end_time: Option<String>,
    /// Audit phase status.
    pub audit_status: String,
    /// Audit start, RFC3339 UTC.
    pub audit_start_time: Option<String>,
    /// Audit end, RFC3339 UTC.
    pub audit_end_time: Option<String>,
    /// Audit verdict.
    pub audit_result: Option<String>,
    /// Source count captured by the audit.
    pub source_count: Option<i64>,
    /// Target count captured by the audit.
    pub target_count: Option<i64>,
    /// `target_count - source_count`.
    pub count_difference: Option<i64>,
    /// Difference relative to the source count, percent.
    pub percentage_difference: Option<f64>,
    /// Last phase durably completed; resume point.
    pub completed_phase: Option<String>,
    /// Bumped every time a phase is reset for retry.
    pub retry_attempt: i32,
    /// Semi-structured payload (JSON), see [`Miscellaneous`].
    pub miscellaneous: Option<String>,
    /// Row creation timestamp, RFC3339 UTC.
    pub record_first_created_time: String,
    /// Last mutation timestamp, RFC3339 UTC.
    pub record_last_updated_time: String,
}

impl PipelineRecord {
    /// Decoded pipeline status.
    pub fn status(&self) -> anyhow::Result<Status> {
        Status::from_db(&self.pipeline_status)
    }

    /// Decoded status of one phase block.
    pub fn phase_status(&self, phase: Phase) -> anyhow::Result<Status> {
        let raw = match phase {
            Phase::SourceToStageIngestion => &self.source_to_stage_ingestion_status,
            Phase::StageToTargetIngestion => &self.stage_to_target_ingestion_status,
            Phase::Audit => &self.audit_status,
        };
        Status::from_db(raw)
    }

    /// Decoded resume point, if any phase has completed.
    pub fn resume_point(&self) -> anyhow::Result<Option<Phase>> {
        self.completed_phase
            .as_deref()
            .map(Phase::from_db)
            .transpose()
    }

    /// Window start as a UTC instant.
    pub fn window_start(&self) -> anyhow::Result<DateTime<Utc>> {
        tz::parse_ts_to_utc(&self.window_start_time)
    }

    /// Window end as a UTC instant.
    pub fn window_end(&self) -> anyhow::Result<DateTime<Utc>> {
        tz::parse_ts_to_utc(&self.window_end_time)
    }

    /// Target day as a calendar date.
    pub fn target_day(&self) -> anyhow::Result<NaiveDate> {
        Ok(self.target_day.parse()?)
    }

    /// Stage artifact path: the `miscellaneous.stage_path` entry, falling
    /// back to the denormalized `stage_sub_category`.
    pub fn stage_path(&self) -> anyhow::Result<String> {
        let misc = Miscellaneous::from_column(self.miscellaneous.as_deref())?;
        Ok(misc
            .stage_path
            .unwrap_or_else(|| self.stage_sub_category.clone()))
    }
}
