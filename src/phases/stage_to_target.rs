//! Stage→target ingestion: trigger the target-side load under the
//! inherited lock.
//!
//! The lock taken by source→stage is inherited, not re-acquired; the
//! begin-phase compare-and-set proves it is still held. The load may be
//! fire-and-forget on the target side, so after a successful launch the
//! phase waits a settle interval before the audit starts counting. The
//! wait belongs to this phase, which means a retried phase re-applies it.

use std::time::Duration;

use anyhow::Context;
use diesel::SqliteConnection;
use tracing::info;

use crate::adapters::Target;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{Phase, Status};
use crate::phases::runner::run_phase;
use crate::phases::{PhaseContext, PhaseOutcome};
use crate::retry::{with_retries, RetryPolicy};

/// Launch the target load for the record and let it settle.
pub fn run(
    conn: &mut SqliteConnection,
    ctx: &PhaseContext<'_>,
    target: &dyn Target,
    retry: &RetryPolicy,
    settle_interval: Duration,
    pipeline_id: &str,
) -> PipelineResult<PhaseOutcome<()>> {
    let record = ctx
        .store
        .get(conn, pipeline_id)?
        .with_context(|| format!("record {pipeline_id} not found"))?;

    if record.phase_status(Phase::StageToTargetIngestion)? == Status::Completed {
        info!(pipeline_id, "stage to target already completed, resuming past it");
        return Ok(PhaseOutcome::Completed(()));
    }

    let resume = record.resume_point()?;
    if resume.map_or(true, |p| p < Phase::SourceToStageIngestion) {
        return Err(PipelineError::OutOfOrder {
            phase: Phase::StageToTargetIngestion.as_str(),
            required: Phase::SourceToStageIngestion.as_str(),
        });
    }

    run_phase(conn, ctx, pipeline_id, Phase::StageToTargetIngestion, |_conn| {
        // Remove rows from an earlier attempt so the audit counts only this
        // load.
        target.delete(&record)?;
        with_retries(retry, "target.load", || target.load(&record))?;
        info!(
            pipeline_id,
            settle_secs = settle_interval.as_secs(),
            "load launched, waiting for target to settle"
        );
        std::thread::sleep(settle_interval);
        Ok(())
    })?;

    Ok(PhaseOutcome::Completed(()))
}
