//! Contracts for the system-specific collaborators.
//!
//! The control plane never talks to a source, stage, or target directly; it
//! drives these traits and the deployment supplies implementations (an
//! Elasticsearch source, an object-store stage, a warehouse target, and so
//! on). From the control plane's point of view every call is synchronous
//! and blocking; a target `load` is allowed to merely launch an
//! asynchronous loader, which the audit reconciles by polling counts.
//!
//! Implementations classify failures as transient or permanent through
//! [`AdapterError`](crate::error::AdapterError) so the retry harness knows
//! what to repeat.

use chrono::{DateTime, Utc};

use crate::error::AdapterError;
use crate::models::PipelineRecord;

/// Result type for adapter calls.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Time source, injectable so phases are testable with a fixed instant.
pub trait Clock {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// The system records originate from.
pub trait Source {
    /// Rows in the source for the record's window.
    fn count(&self, record: &PipelineRecord) -> AdapterResult<i64>;
    /// Whether any data exists in the source for the record's window.
    fn check_exists(&self, record: &PipelineRecord) -> AdapterResult<bool>;
    /// Remove source data for the record's window. Rarely used; part of the
    /// contract for deployments that stage destructive replays.
    fn delete(&self, record: &PipelineRecord) -> AdapterResult<()>;
}

/// The intermediate landing zone.
pub trait Stage {
    /// Rows staged under `path`.
    fn count(&self, path: &str) -> AdapterResult<i64>;
    /// Remove everything staged under `path`.
    fn delete(&self, path: &str) -> AdapterResult<()>;
}

/// The system data is loaded into.
pub trait Target {
    /// Trigger the target-side load for the record. May return before the
    /// data is visible; the audit polls [`Target::count`] until it settles.
    fn load(&self, record: &PipelineRecord) -> AdapterResult<()>;
    /// Rows in the target attributable to the record's window.
    fn count(&self, record: &PipelineRecord) -> AdapterResult<i64>;
    /// Remove target rows attributable to the record's window.
    fn delete(&self, record: &PipelineRecord) -> AdapterResult<()>;
}

/// Moves the window's bytes from the source into the stage. Owns its own
/// long-transfer timeout and progress logging.
pub trait SourceToStageTransfer {
    /// Run the transfer; raises on failure.
    fn transfer(&self, record: &PipelineRecord) -> AdapterResult<()>;
}

/// The adapter set a scheduled run executes against.
pub struct Adapters<'a> {
    /// Source system.
    pub source: &'a dyn Source,
    /// Staging area.
    pub stage: &'a dyn Stage,
    /// Target system.
    pub target: &'a dyn Target,
    /// Source→stage mover.
    pub transfer: &'a dyn SourceToStageTransfer,
}
