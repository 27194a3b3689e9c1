#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use diesel::SqliteConnection;
use tempfile::TempDir;

use pipeline_drive::adapters::{
    AdapterResult, Adapters, Clock, Source, SourceToStageTransfer, Stage, Target,
};
use pipeline_drive::config::{PipelineConfig, Settings};
use pipeline_drive::db::{connection, migrate};
use pipeline_drive::error::AdapterError;
use pipeline_drive::models::PipelineRecord;
use pipeline_drive::phases::generator::build_record;
use pipeline_drive::window::WindowPlan;

pub struct TestDb {
    _dir: TempDir, // keep alive for the life of the test
    pub path: String,
}

pub fn setup_db() -> (TestDb, SqliteConnection) {
    let dir = TempDir::new().expect("tempdir");
    let mut p = PathBuf::from(dir.path());
    p.push("test.db");
    let path = p.to_string_lossy().to_string();

    migrate::run_all(&path).expect("migrations");
    let conn = connection::connect_sqlite(&path).expect("connect");
    (TestDb { _dir: dir, path }, conn)
}

const BASE_TOML: &str = r#"
timezone = "UTC"
x_time_back = "2h"
granularity = "30m"

[source]
name = "es-main"
category = "applogs"
sub_category = "applogs-prod"

[stage]
name = "s3"
category = "data-bucket"
prefix = ["raw", "applogs"]

[target]
name = "warehouse"
category = "analytics.public.app_events"
"#;

/// Knobs that keep tests fast: no real sleeps, zero audit budget.
const FAST_KNOBS: &str = r#"
[audit]
max_wait = "0s"
initial_delay = "0s"
max_delay = "0s"

[stage_to_target]
settle_interval = "0s"

[retry]
max_attempts = 3
base_delay = "0s"
"#;

pub fn test_settings() -> Settings {
    test_settings_with(FAST_KNOBS)
}

/// Base identity plus caller-provided TOML sections.
pub fn test_settings_with(extra: &str) -> Settings {
    let toml = format!("{BASE_TOML}\n{extra}");
    PipelineConfig::from_str(&toml)
        .expect("parse test config")
        .resolve()
        .expect("resolve test config")
}

pub fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    chrono::TimeZone::with_ymd_and_hms(&Utc, y, mo, d, h, mi, 0).unwrap()
}

pub fn plan(day: NaiveDate, start: DateTime<Utc>, minutes: i64) -> WindowPlan {
    WindowPlan {
        target_day: day,
        start,
        end: start + Duration::minutes(minutes),
        requested: Duration::minutes(30),
        achieved: Duration::minutes(minutes),
    }
}

pub fn make_record(settings: &Settings, p: &WindowPlan, now: DateTime<Utc>) -> PipelineRecord {
    build_record(settings, p, now).expect("build record")
}

// ---- fakes ----------------------------------------------------------------

/// Count values handed out in order; the last one sticks.
pub struct Counts {
    queue: RefCell<VecDeque<i64>>,
    last: Cell<i64>,
}

impl Counts {
    pub fn new(values: &[i64]) -> Self {
        Self {
            queue: RefCell::new(values.iter().copied().collect()),
            last: Cell::new(values.last().copied().unwrap_or(0)),
        }
    }

    pub fn next(&self) -> i64 {
        match self.queue.borrow_mut().pop_front() {
            Some(v) => {
                self.last.set(v);
                v
            }
            None => self.last.get(),
        }
    }
}

fn transient(msg: &str) -> AdapterError {
    AdapterError::Transient(anyhow::anyhow!(msg.to_string()))
}

pub struct FixedClock {
    now: Cell<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Cell::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.now.set(now);
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }
}

pub struct FakeSource {
    pub counts: Counts,
    pub fail_count: Cell<bool>,
}

impl FakeSource {
    pub fn new(values: &[i64]) -> Self {
        Self {
            counts: Counts::new(values),
            fail_count: Cell::new(false),
        }
    }
}

impl Source for FakeSource {
    fn count(&self, _record: &PipelineRecord) -> AdapterResult<i64> {
        if self.fail_count.get() {
            return Err(transient("source count unavailable"));
        }
        Ok(self.counts.next())
    }

    fn check_exists(&self, record: &PipelineRecord) -> AdapterResult<bool> {
        self.count(record).map(|c| c > 0)
    }

    fn delete(&self, _record: &PipelineRecord) -> AdapterResult<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeStage {
    pub deleted: RefCell<Vec<String>>,
    pub fail_delete: Cell<bool>,
}

impl Stage for FakeStage {
    fn count(&self, _path: &str) -> AdapterResult<i64> {
        Ok(0)
    }

    fn delete(&self, path: &str) -> AdapterResult<()> {
        if self.fail_delete.get() {
            return Err(transient("stage delete failed"));
        }
        self.deleted.borrow_mut().push(path.to_string());
        Ok(())
    }
}

pub struct FakeTarget {
    pub counts: Counts,
    pub loads: Cell<usize>,
    pub fail_load: Cell<bool>,
    pub fail_count: Cell<bool>,
    pub deleted: RefCell<Vec<String>>,
}

impl FakeTarget {
    pub fn new(values: &[i64]) -> Self {
        Self {
            counts: Counts::new(values),
            loads: Cell::new(0),
            fail_load: Cell::new(false),
            fail_count: Cell::new(false),
            deleted: RefCell::new(Vec::new()),
        }
    }
}

impl Target for FakeTarget {
    fn load(&self, _record: &PipelineRecord) -> AdapterResult<()> {
        if self.fail_load.get() {
            return Err(transient("loader unavailable"));
        }
        self.loads.set(self.loads.get() + 1);
        Ok(())
    }

    fn count(&self, _record: &PipelineRecord) -> AdapterResult<i64> {
        if self.fail_count.get() {
            return Err(transient("target count unavailable"));
        }
        Ok(self.counts.next())
    }

    fn delete(&self, record: &PipelineRecord) -> AdapterResult<()> {
        self.deleted
            .borrow_mut()
            .push(record.target_sub_category.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeTransfer {
    pub calls: Cell<usize>,
    pub fail: Cell<bool>,
}

impl SourceToStageTransfer for FakeTransfer {
    fn transfer(&self, _record: &PipelineRecord) -> AdapterResult<()> {
        if self.fail.get() {
            return Err(transient("transfer crashed"));
        }
        self.calls.set(self.calls.get() + 1);
        Ok(())
    }
}

pub struct Fakes {
    pub source: FakeSource,
    pub stage: FakeStage,
    pub target: FakeTarget,
    pub transfer: FakeTransfer,
}

impl Fakes {
    pub fn new(source_counts: &[i64], target_counts: &[i64]) -> Self {
        Self {
            source: FakeSource::new(source_counts),
            stage: FakeStage::default(),
            target: FakeTarget::new(target_counts),
            transfer: FakeTransfer::default(),
        }
    }

    pub fn adapters(&self) -> Adapters<'_> {
        Adapters {
            source: &self.source,
            stage: &self.stage,
            target: &self.target,
            transfer: &self.transfer,
        }
    }
}
