//! Time zone handling for window boundaries and stored timestamps.
//!
//! Every value persisted to the record store is an RFC3339 UTC string with
//! millisecond precision, so lexicographic order equals chronological order
//! and `MAX(window_end_time)` stays meaningful. Local wall time exists only
//! while computing day boundaries for the operating timezone; conversion
//! back to UTC happens before anything is stored.
//!
//! DST notes:
//! - A local day can start inside a spring-forward gap (some zones skip
//!   midnight). [`DstPolicy::ShiftForward`] nudges to the first valid
//!   instant, which is what day boundaries want.
//! - Fall-back ambiguity picks the earlier instant under
//!   [`DstPolicy::Earliest`].

use anyhow::Context;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// How to resolve local wall times that DST makes ambiguous or nonexistent.
pub enum DstPolicy {
    /// Error on ambiguous or nonexistent local times.
    Strict,
    /// Ambiguous local times resolve to the earlier instant.
    Earliest,
    /// Nonexistent local times shift forward minute by minute until a valid
    /// instant is found (capped at 2 hours); ambiguity resolves earliest.
    ShiftForward,
}

/// Parse an IANA zone name like `"America/New_York"`.
pub fn parse_tz(name: &str) -> anyhow::Result<Tz> {
    name.parse::<Tz>()
        .map_err(|e| anyhow::anyhow!("bad timezone {name:?}: {e}"))
}

/// Convert a naive local timestamp in `tz` to UTC under `policy`.
pub fn from_local_naive(naive: NaiveDateTime, tz: Tz, policy: DstPolicy) -> anyhow::Result<DateTime<Utc>> {
    use chrono::offset::LocalResult::*;
    match tz.from_local_datetime(&naive) {
        Single(dt) => Ok(dt.with_timezone(&Utc)),
        Ambiguous(a, _b) => match policy {
            DstPolicy::Earliest | DstPolicy::ShiftForward => Ok(a.with_timezone(&Utc)),
            DstPolicy::Strict => Err(anyhow::anyhow!("ambiguous local time {naive}")),
        },
        None => match policy {
            DstPolicy::ShiftForward => {
                let mut t = naive;
                for _ in 0..120 {
                    t += Duration::minutes(1);
                    if let Single(dt) = tz.from_local_datetime(&t) {
                        return Ok(dt.with_timezone(&Utc));
                    }
                }
                Err(anyhow::anyhow!("nonexistent local time {naive}"))
            }
            _ => Err(anyhow::anyhow!("nonexistent local time {naive}")),
        },
    }
}

/// UTC instant at which the local calendar day `day` begins in `tz`.
pub fn start_of_day_utc(day: NaiveDate, tz: Tz) -> anyhow::Result<DateTime<Utc>> {
    let midnight = day
        .and_hms_opt(0, 0, 0)
        .context("invalid midnight for date")?;
    from_local_naive(midnight, tz, DstPolicy::ShiftForward)
}

/// UTC instant at which the local day after `day` begins in `tz`. This is
/// the exclusive upper bound for any window on `day`.
pub fn end_of_day_utc(day: NaiveDate, tz: Tz) -> anyhow::Result<DateTime<Utc>> {
    let next = day
        .succ_opt()
        .context("date overflow computing next day")?;
    start_of_day_utc(next, tz)
}

/// Local calendar date of a UTC instant in `tz`.
pub fn local_date(instant: DateTime<Utc>, tz: Tz) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

/// `HH-mm` of a UTC instant rendered in `tz`; used as a stage path segment.
pub fn local_hour_minute(instant: DateTime<Utc>, tz: Tz) -> String {
    instant.with_timezone(&tz).format("%H-%M").to_string()
}

/// Format a UTC instant as RFC3339 with millisecond precision (the storage
/// form for every timestamp column).
pub fn to_rfc3339_millis(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Parse an RFC3339 timestamp (any offset) back to UTC.
pub fn parse_ts_to_utc(s: &str) -> anyhow::Result<DateTime<Utc>> {
    let dt = DateTime::parse_from_rfc3339(s).with_context(|| format!("bad rfc3339: {s}"))?;
    Ok(dt.with_timezone(&Utc))
}
