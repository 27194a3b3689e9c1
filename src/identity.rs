//! Deterministic identity derivation.
//!
//! Each endpoint (source, stage, target) gets a 16-hex-char component id
//! hashed over its naming fields plus the window; the pipeline id is the
//! full 32-hex-char digest over the three component ids, the target day,
//! and the window. Identical inputs always produce identical ids, which is
//! what makes record creation idempotent. MD5 is a fingerprint here, not a
//! security boundary.

use chrono::{DateTime, NaiveDate, Utc};

use crate::tz;

/// Naming fields of one endpoint as they enter the hash.
#[derive(Debug, Clone, Copy)]
pub struct EndpointRef<'a> {
    /// Endpoint name (e.g. the cluster or service name).
    pub name: &'a str,
    /// Coarse grouping (index group, bucket, database.schema.table).
    pub category: &'a str,
    /// Fine grouping (index name, object prefix, load match pattern).
    pub sub_category: &'a str,
}

/// 16-hex-char component id for one endpoint and window.
pub fn component_id(endpoint: EndpointRef<'_>, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let input = format!(
        "{}*{}*{}*{}*{}",
        endpoint.name,
        endpoint.category,
        endpoint.sub_category,
        tz::to_rfc3339_millis(start),
        tz::to_rfc3339_millis(end),
    );
    let digest = format!("{:x}", md5::compute(input.as_bytes()));
    digest[..16].to_string()
}

/// 32-hex-char pipeline id over the component ids, target day, and window.
pub fn pipeline_id(
    source_id: &str,
    stage_id: &str,
    target_id: &str,
    target_day: NaiveDate,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> String {
    let input = format!(
        "{source_id}*{stage_id}*{target_id}*{target_day}*{}*{}",
        tz::to_rfc3339_millis(start),
        tz::to_rfc3339_millis(end),
    );
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Deterministic stage hierarchy for one window: bucket, configured prefix
/// segments, target day, and the window start's local hour-minute. This is
/// what enters the stage component hash, so it must not vary across
/// regeneration attempts.
pub fn stage_prefix(
    category: &str,
    prefix: &[String],
    target_day: NaiveDate,
    hour_minute: &str,
) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(prefix.len() + 3);
    parts.push(category.to_string());
    parts.extend(prefix.iter().cloned());
    parts.push(target_day.to_string());
    parts.push(hour_minute.to_string());
    format!("{}/", parts.join("/"))
}

/// Physical stage location for one generation attempt: the deterministic
/// prefix plus a generation-epoch suffix, so artifacts left behind by an
/// earlier attempt never collide with a retry's.
pub fn stage_path(stage_prefix: &str, epoch: i64) -> String {
    format!("{stage_prefix}{epoch}/")
}
