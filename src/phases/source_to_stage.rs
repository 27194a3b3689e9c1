//! Source→stage ingestion: take the pipeline lock and move the bytes.
//!
//! This is where exclusive execution starts. The acquire is a row-level
//! compare-and-set; losing it means another run owns the pipeline and this
//! phase fails without touching the record. The stage location is cleaned
//! before the transfer so a retried window never double-stages.

use anyhow::Context;
use diesel::SqliteConnection;
use tracing::info;

use crate::adapters::{SourceToStageTransfer, Stage};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{Phase, Status};
use crate::phases::runner::run_phase;
use crate::phases::{PhaseContext, PhaseOutcome};

/// Acquire the lock and run the transfer adapter for the record.
pub fn run(
    conn: &mut SqliteConnection,
    ctx: &PhaseContext<'_>,
    stage: &dyn Stage,
    transfer: &dyn SourceToStageTransfer,
    pipeline_id: &str,
) -> PipelineResult<PhaseOutcome<()>> {
    let record = ctx
        .store
        .get(conn, pipeline_id)?
        .with_context(|| format!("record {pipeline_id} not found"))?;

    // Re-entry within the same run already holds the lock; everyone else
    // must win the compare-and-set, completed phase or not, because the
    // downstream phases run under this lock.
    let already_mine = record.status()? == Status::InProgress
        && record.dag_run_id.as_deref() == Some(ctx.owner);
    if !already_mine {
        let acquired = ctx
            .store
            .acquire(conn, pipeline_id, ctx.owner, ctx.clock.now())?;
        if !acquired {
            return Err(PipelineError::AcquireConflict {
                pipeline_id: pipeline_id.to_string(),
            });
        }
        info!(pipeline_id, owner = ctx.owner, "pipeline lock acquired");
    }

    if record.phase_status(Phase::SourceToStageIngestion)? == Status::Completed {
        info!(pipeline_id, "source to stage already completed, resuming past it");
        return Ok(PhaseOutcome::Completed(()));
    }

    run_phase(conn, ctx, pipeline_id, Phase::SourceToStageIngestion, |_conn| {
        let path = record.stage_path()?;
        // Clear leftovers from an earlier attempt before writing anew.
        stage.delete(&path)?;
        transfer.transfer(&record)?;
        Ok(())
    })?;

    Ok(PhaseOutcome::Completed(()))
}
