//! Scheduled-run driver: the in-process rendition of the host contract.
//!
//! Phases run in order; a skip from the generator/validator gate bypasses
//! everything downstream without failing the run; the stale-lock sweeper
//! runs after every execution no matter how the phases ended. Deployments
//! that host phases in an external workflow engine wire the same phase
//! functions to its tasks and register the sweeper as the unconditional
//! post-run step.

use diesel::SqliteConnection;
use tracing::info;

use crate::adapters::{Adapters, Clock};
use crate::config::Settings;
use crate::error::PipelineResult;
use crate::models::AuditCounts;
use crate::phases::{audit, generator, source_to_stage, stage_to_target, validator};
use crate::phases::{PhaseContext, PhaseOutcome};
use crate::store::RecordStore;
use crate::sweeper;

/// How a scheduled run ended, short of an error.
#[derive(Debug)]
pub enum RunOutcome {
    /// The audit reconciled and the pipeline completed.
    Completed {
        /// Pipeline id of the processed record.
        pipeline_id: String,
        /// Final reconciled counts.
        counts: AuditCounts,
    },
    /// A gate skipped the run; no downstream phase executed.
    Skipped {
        /// Operator-facing explanation.
        reason: String,
    },
}

/// Result of a scheduled run, including the post-run sweep.
#[derive(Debug)]
pub struct RunReport {
    /// Phase outcome of this run.
    pub outcome: RunOutcome,
    /// Stale records reclaimed by the post-run sweep.
    pub swept: usize,
}

fn phases(
    conn: &mut SqliteConnection,
    store: &dyn RecordStore,
    adapters: &Adapters<'_>,
    clock: &dyn Clock,
    settings: &Settings,
    owner: &str,
) -> PipelineResult<RunOutcome> {
    let generated = generator::generate(conn, store, clock, settings)?;

    let validated = match validator::validate(
        conn,
        store,
        adapters.source,
        adapters.target,
        &settings.retry,
        clock,
        settings,
        &generated,
    )? {
        PhaseOutcome::Completed(v) => v,
        PhaseOutcome::Skipped { reason } => return Ok(RunOutcome::Skipped { reason }),
    };

    let pipeline_id = validated.record.pipeline_id.clone();
    let ctx = PhaseContext {
        store,
        clock,
        owner,
    };

    source_to_stage::run(conn, &ctx, adapters.stage, adapters.transfer, &pipeline_id)?;
    stage_to_target::run(
        conn,
        &ctx,
        adapters.target,
        &settings.retry,
        settings.settle_interval,
        &pipeline_id,
    )?;
    let audited = audit::run(
        conn,
        &ctx,
        adapters.source,
        adapters.stage,
        adapters.target,
        &settings.retry,
        &settings.audit,
        &pipeline_id,
        validated.observed,
    )?;

    match audited {
        PhaseOutcome::Completed(counts) => Ok(RunOutcome::Completed { pipeline_id, counts }),
        PhaseOutcome::Skipped { reason } => Ok(RunOutcome::Skipped { reason }),
    }
}

/// Execute one scheduled run for the configured pipeline.
///
/// The sweeper always runs, including when a phase failed; its count is
/// attached to the report on success and logged on the failure path.
pub fn scheduled_run(
    conn: &mut SqliteConnection,
    store: &dyn RecordStore,
    adapters: &Adapters<'_>,
    clock: &dyn Clock,
    settings: &Settings,
    owner: &str,
) -> PipelineResult<RunReport> {
    info!(owner, "scheduled run starting");
    let outcome = phases(conn, store, adapters, clock, settings, owner);

    let swept = sweeper::sweep(conn, store, clock, settings.stale_threshold);

    match outcome {
        Ok(outcome) => Ok(RunReport { outcome, swept }),
        Err(err) => {
            info!(swept, "run failed; sweep still performed");
            Err(err)
        }
    }
}
