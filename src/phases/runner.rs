//! Generic phase lifecycle wrapper.
//!
//! Both ingestion phases share the same shape: begin-phase, do the
//! adapter work, end-phase on success, reset-phase (which releases the
//! lock and bumps the retry counter) on failure, re-raise. Keeping the
//! store writes at the phase edges in one place is the point; the work
//! callback does only adapter I/O. The audit drives the store directly
//! because its failure path is finalize-fail plus data cleanup, not a
//! plain reset.

use diesel::SqliteConnection;
use tracing::{error, info};

use crate::error::{PipelineError, PipelineResult};
use crate::models::Phase;
use crate::phases::PhaseContext;

/// Run `work` inside the begin/end/reset lifecycle for `phase`.
///
/// Fails with [`PipelineError::LockNotHeld`] when the pipeline is not
/// IN_PROGRESS under this run's owner id.
pub fn run_phase<T>(
    conn: &mut SqliteConnection,
    ctx: &PhaseContext<'_>,
    pipeline_id: &str,
    phase: Phase,
    work: impl FnOnce(&mut SqliteConnection) -> PipelineResult<T>,
) -> PipelineResult<T> {
    let begun = ctx
        .store
        .begin_phase(conn, pipeline_id, phase, ctx.owner, ctx.clock.now())?;
    if !begun {
        return Err(PipelineError::LockNotHeld {
            pipeline_id: pipeline_id.to_string(),
            phase: phase.as_str(),
        });
    }
    info!(pipeline_id, phase = phase.as_str(), "phase started");

    match work(conn) {
        Ok(value) => {
            ctx.store
                .end_phase_ok(conn, pipeline_id, phase, ctx.clock.now())?;
            info!(pipeline_id, phase = phase.as_str(), "phase completed");
            Ok(value)
        }
        Err(err) => {
            error!(pipeline_id, phase = phase.as_str(), error = %err, "phase failed, resetting for retry");
            if let Err(reset_err) =
                ctx.store
                    .reset_phase(conn, pipeline_id, phase, ctx.clock.now())
            {
                error!(pipeline_id, phase = phase.as_str(), error = %reset_err, "reset after failure also failed");
            }
            Err(err)
        }
    }
}
