//! Record generation: build or continue the target day's record.
//!
//! The generator computes the next window for the target day and upserts a
//! PENDING record for it. It takes no lock and never overwrites: re-running
//! with the same clock is a benign no-op against the existing record. Its
//! small outbound payload tells the validator whether a record exists and
//! which window was planned.

use diesel::SqliteConnection;
use tracing::info;

use crate::adapters::Clock;
use crate::config::Settings;
use crate::duration::format_compound;
use crate::error::PipelineResult;
use crate::identity::{self, EndpointRef};
use crate::models::{Miscellaneous, PipelineRecord, Status};
use crate::store::{IdentityRef, RecordStore};
use crate::tz;
use crate::window::{self, WindowPlan, WindowSpec};

/// Small payload handed to the validator.
#[derive(Debug, Clone, Copy)]
pub struct GeneratorOutput {
    /// Whether a record exists for this run to work on.
    pub record_present: bool,
    /// The window that was planned, when present.
    pub window: Option<WindowPlan>,
}

fn window_spec(settings: &Settings) -> WindowSpec {
    WindowSpec {
        tz: settings.tz,
        x_time_back: settings.x_time_back,
        granularity: settings.granularity,
        granularity_offset: settings.granularity_offset,
    }
}

/// Materialize the record for a planned window. Identity hashes cover only
/// deterministic inputs; the generation epoch lands solely in the physical
/// stage path inside `miscellaneous`.
pub fn build_record(
    settings: &Settings,
    plan: &WindowPlan,
    now: chrono::DateTime<chrono::Utc>,
) -> PipelineResult<PipelineRecord> {
    let hour_minute = tz::local_hour_minute(plan.start, settings.tz);
    let stage_prefix = identity::stage_prefix(
        &settings.stage.category,
        &settings.stage.prefix,
        plan.target_day,
        &hour_minute,
    );
    let stage_path = identity::stage_path(&stage_prefix, now.timestamp());
    let target_pattern = format!("{stage_prefix}%");

    let source_id = identity::component_id(
        EndpointRef {
            name: &settings.source.name,
            category: &settings.source.category,
            sub_category: &settings.source.sub_category,
        },
        plan.start,
        plan.end,
    );
    let stage_id = identity::component_id(
        EndpointRef {
            name: &settings.stage.name,
            category: &settings.stage.category,
            sub_category: &stage_prefix,
        },
        plan.start,
        plan.end,
    );
    let target_id = identity::component_id(
        EndpointRef {
            name: &settings.target.name,
            category: &settings.target.category,
            sub_category: &target_pattern,
        },
        plan.start,
        plan.end,
    );
    let pipeline_id = identity::pipeline_id(
        &source_id,
        &stage_id,
        &target_id,
        plan.target_day,
        plan.start,
        plan.end,
    );

    let misc = Miscellaneous {
        stage_path: Some(stage_path),
    };
    let stamp = tz::to_rfc3339_millis(now);

    Ok(PipelineRecord {
        pipeline_id,
        source_id,
        source_name: settings.source.name.clone(),
        source_category: settings.source.category.clone(),
        source_sub_category: settings.source.sub_category.clone(),
        stage_id,
        stage_name: settings.stage.name.clone(),
        stage_category: settings.stage.category.clone(),
        stage_sub_category: stage_prefix,
        target_id,
        target_name: settings.target.name.clone(),
        target_category: settings.target.category.clone(),
        target_sub_category: target_pattern,
        target_day: plan.target_day.to_string(),
        window_start_time: tz::to_rfc3339_millis(plan.start),
        window_end_time: tz::to_rfc3339_millis(plan.end),
        granularity: format_compound(plan.achieved),
        pipeline_status: Status::Pending.as_str().to_string(),
        pipeline_start_time: None,
        pipeline_end_time: None,
        pipeline_priority: settings.priority,
        dag_run_id: None,
        source_to_stage_ingestion_status: Status::Pending.as_str().to_string(),
        source_to_stage_ingestion_start_time: None,
        source_to_stage_ingestion_end_time: None,
        stage_to_target_ingestion_status: Status::Pending.as_str().to_string(),
        stage_to_target_ingestion_start_time: None,
        stage_to_target_ingestion_end_time: None,
        audit_status: Status::Pending.as_str().to_string(),
        audit_start_time: None,
        audit_end_time: None,
        audit_result: None,
        source_count: None,
        target_count: None,
        count_difference: None,
        percentage_difference: None,
        completed_phase: None,
        retry_attempt: 0,
        miscellaneous: Some(misc.to_column()?),
        record_first_created_time: stamp.clone(),
        record_last_updated_time: stamp,
    })
}

/// Generate (or continue) the record for the target day.
pub fn generate(
    conn: &mut SqliteConnection,
    store: &dyn RecordStore,
    clock: &dyn Clock,
    settings: &Settings,
) -> PipelineResult<GeneratorOutput> {
    let now = clock.now();
    let spec = window_spec(settings);
    let target_day = window::target_day_for(&spec, now);

    let identity = IdentityRef {
        source_name: &settings.source.name,
        source_category: &settings.source.category,
        source_sub_category: &settings.source.sub_category,
    };
    let max_end = store.select_max_window_end(conn, identity, target_day)?;

    let Some(plan) = window::next_window(&spec, now, max_end)? else {
        info!(%target_day, "target day exhausted, no record generated");
        return Ok(GeneratorOutput {
            record_present: false,
            window: None,
        });
    };

    let record = build_record(settings, &plan, now)?;
    let inserted = store.upsert_new(conn, &record)?;
    if inserted {
        info!(
            pipeline_id = %record.pipeline_id,
            window_start = %record.window_start_time,
            window_end = %record.window_end_time,
            granularity = %record.granularity,
            "record generated"
        );
    } else {
        info!(
            pipeline_id = %record.pipeline_id,
            "record already exists, idempotent re-run"
        );
    }

    Ok(GeneratorOutput {
        record_present: true,
        window: Some(plan),
    })
}
