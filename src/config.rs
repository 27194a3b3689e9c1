//! TOML configuration surface.
//!
//! A pipeline config names the (source, stage, target) identity triple and
//! tunes the windowing, audit, retry, settle, and sweeper knobs. Durations
//! are compound strings (`"2h"`, `"30m"`, `"1d2h"`), resolved to typed
//! values by [`PipelineConfig::resolve`].
//!
//! ```toml
//! timezone = "UTC"
//! x_time_back = "2h"
//! granularity = "30m"
//!
//! [source]
//! name = "es-main"
//! category = "applogs"
//! sub_category = "applogs-prod"
//!
//! [stage]
//! name = "s3"
//! category = "data-bucket"
//! prefix = ["raw", "applogs"]
//!
//! [target]
//! name = "warehouse"
//! category = "analytics.public.app_events"
//! ```

use std::path::Path;
use std::time::Duration as StdDuration;

use anyhow::Context;
use chrono::Duration;
use chrono_tz::Tz;
use serde::Deserialize;

use crate::duration::parse_compound;
use crate::retry::RetryPolicy;
use crate::tz;

/// Source endpoint naming.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceCfg {
    /// Endpoint name (cluster, host alias).
    pub name: String,
    /// Coarse grouping (e.g. index group).
    pub category: String,
    /// Fine grouping (e.g. index name).
    pub sub_category: String,
}

/// Stage endpoint naming.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageCfg {
    /// Endpoint name (store alias).
    pub name: String,
    /// Bucket or share the stage paths live under.
    pub category: String,
    /// Path segments between the bucket and the per-window hierarchy.
    #[serde(default)]
    pub prefix: Vec<String>,
}

/// Target endpoint naming.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetCfg {
    /// Endpoint name (warehouse alias).
    pub name: String,
    /// Fully qualified destination (database.schema.table).
    pub category: String,
}

/// Audit reconciliation knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditCfg {
    /// Total polling budget.
    #[serde(default = "default_audit_max_wait")]
    pub max_wait: String,
    /// Delay before the second poll.
    #[serde(default = "default_audit_initial_delay")]
    pub initial_delay: String,
    /// Upper bound on the poll delay.
    #[serde(default = "default_audit_max_delay")]
    pub max_delay: String,
    /// Growth factor between polls.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for AuditCfg {
    fn default() -> Self {
        Self {
            max_wait: default_audit_max_wait(),
            initial_delay: default_audit_initial_delay(),
            max_delay: default_audit_max_delay(),
            multiplier: default_multiplier(),
        }
    }
}

/// Stage→target knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageToTargetCfg {
    /// Wait after launching the target-side load, before the audit runs.
    #[serde(default = "default_settle_interval")]
    pub settle_interval: String,
}

impl Default for StageToTargetCfg {
    fn default() -> Self {
        Self {
            settle_interval: default_settle_interval(),
        }
    }
}

/// Retry harness knobs for adapter calls.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryCfg {
    /// Attempts including the first.
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt.
    #[serde(default = "default_retry_base_delay")]
    pub base_delay: String,
    /// Growth factor between attempts.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Randomize delays by up to 50%.
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryCfg {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_delay: default_retry_base_delay(),
            multiplier: default_multiplier(),
            jitter: false,
        }
    }
}

/// Sweeper knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweeperCfg {
    /// How long a pipeline may stay IN_PROGRESS before it counts as hung.
    #[serde(default = "default_stale_threshold")]
    pub stale_threshold: String,
}

impl Default for SweeperCfg {
    fn default() -> Self {
        Self {
            stale_threshold: default_stale_threshold(),
        }
    }
}

/// Lock owner id resolution.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockCfg {
    /// Environment variable carrying the workflow run id. A fresh UUID is
    /// generated per run when unset.
    #[serde(default)]
    pub owner_id_source: Option<String>,
}

/// The whole TOML document.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// IANA timezone windows are computed in.
    pub timezone: String,
    /// How far behind now the target day lies.
    pub x_time_back: String,
    /// Desired window length.
    pub granularity: String,
    /// Offset of a day's first window from the day start.
    #[serde(default = "default_zero_duration")]
    pub granularity_offset: String,
    /// Scheduling priority stamped on generated records.
    #[serde(default = "default_priority")]
    pub pipeline_priority: f64,
    /// Source naming.
    pub source: SourceCfg,
    /// Stage naming.
    pub stage: StageCfg,
    /// Target naming.
    pub target: TargetCfg,
    /// Audit knobs.
    #[serde(default)]
    pub audit: AuditCfg,
    /// Stage→target knobs.
    #[serde(default)]
    pub stage_to_target: StageToTargetCfg,
    /// Retry knobs.
    #[serde(default)]
    pub retry: RetryCfg,
    /// Sweeper knobs.
    #[serde(default)]
    pub sweeper: SweeperCfg,
    /// Lock owner id resolution.
    #[serde(default)]
    pub lock: LockCfg,
}

fn default_zero_duration() -> String {
    "0s".to_string()
}
fn default_priority() -> f64 {
    1.1
}
fn default_audit_max_wait() -> String {
    "5m".to_string()
}
fn default_audit_initial_delay() -> String {
    "30s".to_string()
}
fn default_audit_max_delay() -> String {
    "2m".to_string()
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_settle_interval() -> String {
    "2m".to_string()
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_base_delay() -> String {
    "4s".to_string()
}
fn default_stale_threshold() -> String {
    "2h".to_string()
}

/// Audit loop parameters in typed form.
#[derive(Debug, Clone, Copy)]
pub struct AuditParams {
    /// Total polling budget.
    pub max_wait: Duration,
    /// Delay before the second poll.
    pub initial_delay: Duration,
    /// Upper bound on the poll delay.
    pub max_delay: Duration,
    /// Growth factor between polls.
    pub multiplier: f64,
}

/// Fully resolved configuration: durations parsed, timezone validated.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Operating timezone.
    pub tz: Tz,
    /// How far behind now the target day lies.
    pub x_time_back: Duration,
    /// Desired window length.
    pub granularity: Duration,
    /// Offset of a day's first window from the day start.
    pub granularity_offset: Duration,
    /// Scheduling priority stamped on generated records.
    pub priority: f64,
    /// Source naming.
    pub source: SourceCfg,
    /// Stage naming.
    pub stage: StageCfg,
    /// Target naming.
    pub target: TargetCfg,
    /// Audit loop parameters.
    pub audit: AuditParams,
    /// Wait after launching the target-side load.
    pub settle_interval: StdDuration,
    /// Retry harness policy.
    pub retry: RetryPolicy,
    /// Stale-lock threshold.
    pub stale_threshold: Duration,
    /// Environment variable carrying the workflow run id, if configured.
    pub owner_id_source: Option<String>,
}

impl PipelineConfig {
    /// Parse a config from a TOML string.
    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        let cfg: PipelineConfig = toml::from_str(s).context("failed to parse pipeline config")?;
        Ok(cfg)
    }

    /// Read and parse a config file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("read config file {}", path.as_ref().display()))?;
        Self::from_str(&text)
    }

    /// Resolve durations and the timezone into typed [`Settings`].
    pub fn resolve(&self) -> anyhow::Result<Settings> {
        let parse = |label: &str, s: &str| -> anyhow::Result<Duration> {
            parse_compound(s).with_context(|| format!("bad {label}: {s:?}"))
        };

        let granularity = parse("granularity", &self.granularity)?;
        if granularity <= Duration::zero() {
            anyhow::bail!("granularity must be positive");
        }

        let to_std = |label: &str, d: Duration| -> anyhow::Result<StdDuration> {
            d.to_std().with_context(|| format!("{label} must not be negative"))
        };

        Ok(Settings {
            tz: tz::parse_tz(&self.timezone)?,
            x_time_back: parse("x_time_back", &self.x_time_back)?,
            granularity,
            granularity_offset: parse("granularity_offset", &self.granularity_offset)?,
            priority: self.pipeline_priority,
            source: self.source.clone(),
            stage: self.stage.clone(),
            target: self.target.clone(),
            audit: AuditParams {
                max_wait: parse("audit.max_wait", &self.audit.max_wait)?,
                initial_delay: parse("audit.initial_delay", &self.audit.initial_delay)?,
                max_delay: parse("audit.max_delay", &self.audit.max_delay)?,
                multiplier: self.audit.multiplier,
            },
            settle_interval: to_std(
                "stage_to_target.settle_interval",
                parse("stage_to_target.settle_interval", &self.stage_to_target.settle_interval)?,
            )?,
            retry: RetryPolicy {
                max_attempts: self.retry.max_attempts,
                base_delay: to_std("retry.base_delay", parse("retry.base_delay", &self.retry.base_delay)?)?,
                multiplier: self.retry.multiplier,
                jitter: self.retry.jitter,
            },
            stale_threshold: parse("sweeper.stale_threshold", &self.sweeper.stale_threshold)?,
            owner_id_source: self.lock.owner_id_source.clone(),
        })
    }
}

impl Settings {
    /// Resolve the lock owner id: the configured environment variable when
    /// set and present, a fresh UUID otherwise.
    pub fn resolve_owner_id(&self) -> String {
        if let Some(var) = &self.owner_id_source {
            if let Ok(value) = std::env::var(var) {
                if !value.trim().is_empty() {
                    return value;
                }
            }
        }
        uuid::Uuid::new_v4().to_string()
    }
}
