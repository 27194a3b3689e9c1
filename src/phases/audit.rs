//! Audit: adaptive count reconciliation and pipeline finalization.
//!
//! The audit is the sole authority that marks a pipeline COMPLETED, and the
//! only place that ever deletes data. It polls source and target counts
//! with growing delays until they reconcile, the budget runs out, or the
//! target overtakes the source (an integrity violation). On a failure
//! verdict it removes the staged artifacts and the target rows for the
//! window, then finalizes the record as FAILED and ready for a clean retry.

use anyhow::Context;
use diesel::SqliteConnection;
use tracing::{error, info, warn};

use crate::adapters::{Source, Stage, Target};
use crate::config::AuditParams;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{AuditCounts, AuditResult, Phase, PipelineRecord, Status};
use crate::phases::{PhaseContext, PhaseOutcome};
use crate::retry::{with_retries, RetryPolicy};

enum Verdict {
    Success(AuditCounts),
    Fail(AuditResult, AuditCounts),
}

/// Reconcile counts for the record and finalize the pipeline.
///
/// `validator_observed` carries the counts the validator saw earlier in the
/// same run; a `(0, 0)` pair there lets an empty window finalize as
/// success-with-no-data instead of polling the budget away.
pub fn run(
    conn: &mut SqliteConnection,
    ctx: &PhaseContext<'_>,
    source: &dyn Source,
    stage: &dyn Stage,
    target: &dyn Target,
    retry: &RetryPolicy,
    params: &AuditParams,
    pipeline_id: &str,
    validator_observed: Option<AuditCounts>,
) -> PipelineResult<PhaseOutcome<AuditCounts>> {
    let record = ctx
        .store
        .get(conn, pipeline_id)?
        .with_context(|| format!("record {pipeline_id} not found"))?;

    // Finality guard: a completed audit is never redone.
    if record.phase_status(Phase::Audit)? == Status::Completed {
        info!(pipeline_id, "audit already completed, nothing to do");
        let counts = AuditCounts {
            source: record.source_count.unwrap_or(0),
            target: record.target_count.unwrap_or(0),
        };
        return Ok(PhaseOutcome::Completed(counts));
    }

    let resume = record.resume_point()?;
    if resume.map_or(true, |p| p < Phase::StageToTargetIngestion) {
        return Err(PipelineError::OutOfOrder {
            phase: Phase::Audit.as_str(),
            required: Phase::StageToTargetIngestion.as_str(),
        });
    }

    let begun = ctx
        .store
        .begin_phase(conn, pipeline_id, Phase::Audit, ctx.owner, ctx.clock.now())?;
    if !begun {
        return Err(PipelineError::LockNotHeld {
            pipeline_id: pipeline_id.to_string(),
            phase: Phase::Audit.as_str(),
        });
    }
    info!(pipeline_id, "audit started");

    let verdict = match reconcile(ctx, source, target, retry, params, &record, validator_observed) {
        Ok(v) => v,
        Err(err) => {
            // Adapter trouble is a phase failure, not an audit verdict; no
            // data is deleted and the phase resets for retry.
            error!(pipeline_id, error = %err, "audit could not obtain counts, resetting");
            if let Err(reset_err) =
                ctx.store
                    .reset_phase(conn, pipeline_id, Phase::Audit, ctx.clock.now())
            {
                error!(pipeline_id, error = %reset_err, "audit reset also failed");
            }
            return Err(err.into());
        }
    };

    match verdict {
        Verdict::Success(counts) => {
            ctx.store
                .finalize_ok(conn, pipeline_id, ctx.clock.now(), counts)?;
            info!(
                pipeline_id,
                source = counts.source,
                target = counts.target,
                "audit passed, pipeline completed"
            );
            Ok(PhaseOutcome::Completed(counts))
        }
        Verdict::Fail(reason, counts) => {
            error!(
                pipeline_id,
                reason = reason.as_str(),
                source = counts.source,
                target = counts.target,
                "audit failed, cleaning up window data"
            );
            cleanup(stage, target, retry, &record);
            ctx.store
                .finalize_fail(conn, pipeline_id, ctx.clock.now(), reason, Some(counts))?;
            Err(match reason {
                AuditResult::IntegrityViolation => PipelineError::IntegrityViolation {
                    source_count: counts.source,
                    target: counts.target,
                },
                _ => PipelineError::Mismatch {
                    source_count: counts.source,
                    target: counts.target,
                },
            })
        }
    }
}

/// The adaptive polling loop. Returns a verdict, or an adapter error when
/// counting itself keeps failing.
fn reconcile(
    ctx: &PhaseContext<'_>,
    source: &dyn Source,
    target: &dyn Target,
    retry: &RetryPolicy,
    params: &AuditParams,
    record: &PipelineRecord,
    validator_observed: Option<AuditCounts>,
) -> Result<Verdict, crate::error::AdapterError> {
    let entered = ctx.clock.now();
    let mut delay = params.initial_delay;
    let validator_saw_empty =
        matches!(validator_observed, Some(c) if c.source == 0 && c.target == 0);

    loop {
        let s = with_retries(retry, "source.count", || source.count(record))?;
        let t = with_retries(retry, "target.count", || target.count(record))?;
        let counts = AuditCounts { source: s, target: t };
        info!(
            pipeline_id = %record.pipeline_id,
            source = s,
            target = t,
            "audit count check"
        );

        if t > s {
            return Ok(Verdict::Fail(AuditResult::IntegrityViolation, counts));
        }
        if t == s && s > 0 {
            return Ok(Verdict::Success(counts));
        }
        if t == s && validator_saw_empty {
            info!(pipeline_id = %record.pipeline_id, "window is empty on both sides");
            return Ok(Verdict::Success(counts));
        }

        // Still loading (t < s), or an empty pair the validator did not
        // corroborate. Poll until the budget runs out.
        let elapsed = ctx.clock.now() - entered;
        if elapsed >= params.max_wait {
            warn!(
                pipeline_id = %record.pipeline_id,
                source = s,
                target = t,
                "reconciliation budget exhausted"
            );
            return Ok(Verdict::Fail(AuditResult::Mismatch, counts));
        }

        info!(
            pipeline_id = %record.pipeline_id,
            delay_secs = delay.num_seconds(),
            "target still loading, backing off"
        );
        if let Ok(d) = delay.to_std() {
            std::thread::sleep(d);
        }
        let grown = chrono::Duration::milliseconds(
            (delay.num_milliseconds() as f64 * params.multiplier) as i64,
        );
        delay = grown.min(params.max_delay);
    }
}

/// Best-effort removal of the window's staged artifacts and target rows.
/// Failures are logged and do not prevent the state reset.
fn cleanup(stage: &dyn Stage, target: &dyn Target, retry: &RetryPolicy, record: &PipelineRecord) {
    match record.stage_path() {
        Ok(path) => {
            if let Err(err) = with_retries(retry, "stage.delete", || stage.delete(&path)) {
                warn!(pipeline_id = %record.pipeline_id, error = %err, "stage cleanup failed");
            }
        }
        Err(err) => {
            warn!(pipeline_id = %record.pipeline_id, error = %err, "stage path unreadable, skipping stage cleanup");
        }
    }
    if let Err(err) = with_retries(retry, "target.delete", || target.delete(record)) {
        warn!(pipeline_id = %record.pipeline_id, error = %err, "target cleanup failed");
    }
}
