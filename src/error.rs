//! Error taxonomy for the control plane.
//!
//! Adapters distinguish transient from permanent failures so the retry
//! harness knows what is worth repeating; everything the phases surface to
//! the workflow host funnels into [`PipelineError`]. A skipped phase is not
//! an error and is modeled separately by
//! [`PhaseOutcome`](crate::phases::PhaseOutcome).

use thiserror::Error;

/// Malformed duration or configuration input. Fatal for the run; nothing is
/// written to the store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The duration string was empty or contained no `<int><unit>` token.
    #[error("empty duration string")]
    Empty,
    /// A token could not be read as `<int><unit>`.
    #[error("invalid duration token {0:?}")]
    BadToken(String),
    /// The unit character is not one of `w`, `d`, `h`, `m`, `s`.
    #[error("unknown duration unit {0:?}")]
    UnknownUnit(char),
    /// The combined duration does not fit in a signed 64-bit second count.
    #[error("duration out of range")]
    Overflow,
}

/// Failure reported by a source/stage/target/transfer adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Network or capacity trouble; the retry harness may repeat the call.
    #[error("transient adapter failure: {0}")]
    Transient(anyhow::Error),
    /// Permanent failure; retrying cannot help.
    #[error("adapter failure: {0}")]
    Permanent(anyhow::Error),
}

impl AdapterError {
    /// Whether the retry harness should attempt the call again.
    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Transient(_))
    }
}

/// Record store failure: the database is unreachable, a statement failed for
/// a reason other than an unmet compare-and-set precondition, or a stored
/// value does not parse back.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying Diesel/SQLite error.
    #[error("record store error: {0}")]
    Database(#[from] diesel::result::Error),
    /// A persisted value (timestamp, status, phase name) failed to decode.
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

/// Everything a phase can surface to the workflow host.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Bad duration/config input.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Record store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Adapter failure after the retry harness gave up.
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    /// The acquire compare-and-set found the pipeline already owned. The
    /// losing run must not mutate the record.
    #[error("pipeline {pipeline_id} is already in progress under another run")]
    AcquireConflict {
        /// Identity of the contested record.
        pipeline_id: String,
    },
    /// Begin-phase precondition unmet: the pipeline is not in progress under
    /// this run's lock.
    #[error("pipeline {pipeline_id} is not locked by this run; refusing {phase}")]
    LockNotHeld {
        /// Identity of the record.
        pipeline_id: String,
        /// Phase that refused to start.
        phase: &'static str,
    },
    /// A phase was invoked before its predecessor completed.
    #[error("phase {phase} requires {required} to be completed first")]
    OutOfOrder {
        /// Phase that refused to run.
        phase: &'static str,
        /// Predecessor that has not completed.
        required: &'static str,
    },
    /// Audit verdict: the target holds more rows than the source for the
    /// window. Cleanup ran and the record was finalized as failed.
    #[error("integrity violation: target count {target} exceeds source count {source_count}")]
    IntegrityViolation {
        /// Rows counted at the source.
        source_count: i64,
        /// Rows counted at the target.
        target: i64,
    },
    /// Audit verdict: the reconciliation budget ran out with the target
    /// still behind the source.
    #[error("count mismatch after reconciliation budget: source {source_count}, target {target}")]
    Mismatch {
        /// Rows counted at the source.
        source_count: i64,
        /// Rows counted at the target.
        target: i64,
    },
    /// Anything else (record missing where one must exist, bad payload).
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Convenience alias used throughout the phases.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Convenience alias for record store operations.
pub type StoreResult<T> = Result<T, StoreError>;
