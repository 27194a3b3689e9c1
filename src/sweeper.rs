//! Stale-lock sweeper.
//!
//! Runs after every scheduled run, whatever the outcome. A process that
//! died mid-phase leaves its record IN_PROGRESS with an owner; once such a
//! record exceeds the stale threshold the sweeper releases the lock and
//! resets every phase that did not complete, so the next run acquires
//! cleanly. The sweeper is the only actor allowed to break a lock it does
//! not own, and it never lets its own errors escape.

use chrono::Duration;
use diesel::SqliteConnection;
use tracing::{error, info, warn};

use crate::adapters::Clock;
use crate::store::RecordStore;

/// Scan for hung pipelines and reclaim them. Returns the number of records
/// cleaned; errors are logged, never propagated.
pub fn sweep(
    conn: &mut SqliteConnection,
    store: &dyn RecordStore,
    clock: &dyn Clock,
    stale_threshold: Duration,
) -> usize {
    let now = clock.now();
    let stale = match store.select_stale(conn, now, stale_threshold) {
        Ok(records) => records,
        Err(err) => {
            error!(error = %err, "stale scan failed");
            return 0;
        }
    };

    if stale.is_empty() {
        return 0;
    }

    let mut cleaned = 0;
    for record in &stale {
        warn!(
            pipeline_id = %record.pipeline_id,
            owner = record.dag_run_id.as_deref().unwrap_or(""),
            started = record.pipeline_start_time.as_deref().unwrap_or(""),
            "reclaiming stale pipeline lock"
        );
        match store.reset_stale(conn, record, now) {
            Ok(true) => cleaned += 1,
            Ok(false) => {
                info!(pipeline_id = %record.pipeline_id, "record moved on before reset, leaving it");
            }
            Err(err) => {
                error!(pipeline_id = %record.pipeline_id, error = %err, "stale reset failed");
            }
        }
    }

    info!(cleaned, scanned = stale.len(), "stale lock sweep finished");
    cleaned
}
