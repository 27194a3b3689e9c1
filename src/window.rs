//! Window calculation for a target day.
//!
//! A run processes at most one half-open `[start, end)` window per
//! invocation. The target day lags `now` by `x_time_back`; the start either
//! continues from the highest stored `window_end_time` for that day or
//! begins at the day's start plus the configured first-window offset; the
//! end is the start plus the granularity, clamped to the day boundary.
//! All boundary math happens in the operating timezone before converting
//! back to UTC, so DST days keep correct bounds.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::error::{PipelineError, PipelineResult};
use crate::tz;

/// One planned processing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPlan {
    /// Local calendar day the window belongs to.
    pub target_day: NaiveDate,
    /// Inclusive window start (UTC instant).
    pub start: DateTime<Utc>,
    /// Exclusive window end (UTC instant).
    pub end: DateTime<Utc>,
    /// Granularity that was asked for.
    pub requested: Duration,
    /// `end - start`; smaller than `requested` when clamped at the day
    /// boundary.
    pub achieved: Duration,
}

/// Inputs that shape the next window.
#[derive(Debug, Clone, Copy)]
pub struct WindowSpec {
    /// Operating timezone for day boundaries.
    pub tz: Tz,
    /// How far behind `now` the target day lies.
    pub x_time_back: Duration,
    /// Desired window length.
    pub granularity: Duration,
    /// Offset of the first window from the day start.
    pub granularity_offset: Duration,
}

/// Compute the next window, or `None` when the target day is exhausted.
///
/// `max_end` is the highest stored `window_end_time` among records for the
/// same identity triple and target day (the continuation point); the caller
/// queries it from the record store.
pub fn next_window(
    spec: &WindowSpec,
    now: DateTime<Utc>,
    max_end: Option<DateTime<Utc>>,
) -> PipelineResult<Option<WindowPlan>> {
    let target_day = tz::local_date(now - spec.x_time_back, spec.tz);
    let day_start = tz::start_of_day_utc(target_day, spec.tz).map_err(PipelineError::Other)?;
    let day_end = tz::end_of_day_utc(target_day, spec.tz).map_err(PipelineError::Other)?;

    let start = match max_end {
        Some(end) => end,
        None => day_start + spec.granularity_offset,
    };

    if start >= day_end {
        return Ok(None);
    }

    let raw_end = start + spec.granularity;
    let end = raw_end.min(day_end);

    Ok(Some(WindowPlan {
        target_day,
        start,
        end,
        requested: spec.granularity,
        achieved: end - start,
    }))
}

/// Local calendar day a run executed at `now` targets.
pub fn target_day_for(spec: &WindowSpec, now: DateTime<Utc>) -> NaiveDate {
    tz::local_date(now - spec.x_time_back, spec.tz)
}
