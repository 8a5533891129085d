use sqlx::PgPool;
use uuid::Uuid;

use insight_core::{Result, TaskId};

/// Static mapping from unit kind to its typed record table. Kinds without a
/// table are skipped by the caller; the mapping being static also keeps the
/// table name out of untrusted input.
pub fn record_table(kind: &str) -> Option<&'static str> {
    match kind {
        "group_comparison_radar_chart" => Some("group_comparison_radar_chart_data"),
        "teacher_student_interaction_bubble_chart" => {
            Some("teacher_student_interaction_bubble_chart_data")
        }
        "student_time_allocation_pie_chart" => Some("student_time_allocation_pie_chart_data"),
        "academic_maturity_by_grade_aggregator" => Some("academic_maturity_by_grade_data"),
        "correlation_based_ehi_builder" => Some("correlation_ehi_builder_data"),
        "correlation_based_rpi_builder" => Some("correlation_rpi_builder_data"),
        "student_portrait" | "student_portrait_chart" => Some("student_portrait_data"),
        "satisfaction_part" | "satisfaction_part_chart" => Some("satisfaction_part_data"),
        "satisfaction_whole" | "satisfaction_whole_chart" => Some("satisfaction_whole_data"),
        "student_satisfaction_route_sankey_chart" => Some("satisfaction_route_sankey_chart_data"),
        "descriptive_summary" => Some("descriptive_summary_data"),
        _ => None,
    }
}

/// Repository for the per-kind typed record tables, all sharing the
/// `{id, task_id, data, comment, created_at}` shape.
pub struct RecordRepository {
    pool: PgPool,
}

impl RecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist one report entry into its kind's table. Returns false (with
    /// a warning) when the kind has no table, which is not an error.
    pub async fn insert(
        &self,
        kind: &str,
        task_id: &TaskId,
        data: &serde_json::Value,
        comment: &str,
    ) -> Result<bool> {
        let Some(table) = record_table(kind) else {
            tracing::warn!(kind, "no record table for kind, skipping");
            return Ok(false);
        };

        // `table` comes from the static map above, never from input.
        let sql = format!(
            "INSERT INTO {table} (id, task_id, data, comment, created_at) VALUES ($1, $2, $3, $4, now())"
        );
        sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(task_id.0)
            .bind(data)
            .bind(comment)
            .execute(&self.pool)
            .await?;

        tracing::debug!(kind, task_id = %task_id, "persisted typed record");
        Ok(true)
    }
}
