use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::collections::BTreeSet;

use insight_core::{CoreError, DataTable, DatasetId, Result, TaskId};
use insight_workflow::DatasetLoader;

/// Loads cleaned survey responses from Postgres into a `DataTable`.
///
/// Responses are stored one JSON object per row; the table's columns are
/// the sorted union of all keys, with nulls filled in where a response
/// lacks a key.
pub struct PgDatasetLoader;

#[async_trait]
impl DatasetLoader for PgDatasetLoader {
    async fn load_cleaned_dataset(
        &self,
        task_id: &TaskId,
        dataset_id: &DatasetId,
        pool: &PgPool,
    ) -> Result<DataTable> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM cleaned_survey_responses
            WHERE dataset_id = $1
            ORDER BY row_index
            "#,
        )
        .bind(dataset_id.0)
        .fetch_all(pool)
        .await?;

        if rows.is_empty() {
            return Err(CoreError::NotFound(format!(
                "no cleaned responses for dataset: {dataset_id}"
            )));
        }

        let mut objects = Vec::with_capacity(rows.len());
        for row in rows {
            let data: Value = row.get("data");
            match data {
                Value::Object(object) => objects.push(object),
                other => {
                    return Err(CoreError::Validation(format!(
                        "cleaned response for dataset {dataset_id} is not an object: {other}"
                    )))
                }
            }
        }

        let columns: BTreeSet<String> = objects
            .iter()
            .flat_map(|object| object.keys().cloned())
            .collect();
        let columns: Vec<String> = columns.into_iter().collect();

        let mut table = DataTable::new(columns.clone());
        for object in &objects {
            let row = columns
                .iter()
                .map(|column| object.get(column).cloned().unwrap_or(Value::Null))
                .collect();
            table.push_row(row)?;
        }

        tracing::debug!(
            task_id = %task_id,
            dataset_id = %dataset_id,
            rows = table.num_rows(),
            columns = table.columns.len(),
            "cleaned dataset assembled"
        );
        Ok(table)
    }
}
