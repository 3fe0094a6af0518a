use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::info;

use veyra_core::error::{Result, VeyraError};
use veyra_core::traits::Tool;
use veyra_core::types::ToolResult;

use crate::records::{MedicationEntry, RecordStore};

pub struct RecordMedicationTool {
    pub records: Arc<RecordStore>,
}

#[derive(Deserialize)]
struct RecordMedicationInput {
    name: String,
    #[serde(default)]
    dosage: Option<String>,
    #[serde(default)]
    schedule: Option<String>,
    user_id: String,
    #[serde(default)]
    correlation_id: String,
}

impl Tool for RecordMedicationTool {
    fn name(&self) -> &str {
        "record_medication"
    }

    fn description(&self) -> &str {
        "Add a medication (name, optional dosage and schedule) to the current user's list."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Medication name" },
                "dosage": { "type": "string", "description": "Dosage, e.g. '50mg' (optional)" },
                "schedule": { "type": "string", "description": "When to take it (optional)" }
            },
            "required": ["name"]
        })
    }

    fn execute(&self, input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let params: RecordMedicationInput = serde_json::from_value(input)
                .map_err(|e| VeyraError::ToolValidation(e.to_string()))?;

            if params.name.trim().is_empty() {
                return Ok(ToolResult::error("Medication name must not be empty"));
            }

            info!(
                user_id = %params.user_id,
                correlation_id = %params.correlation_id,
                medication = %params.name,
                "Recording medication"
            );

            let name = params.name.clone();
            self.records.record_medication(
                &params.user_id,
                MedicationEntry {
                    name: params.name,
                    dosage: params.dosage,
                    schedule: params.schedule,
                    recorded_at: Utc::now(),
                },
            );

            Ok(ToolResult::success(format!("Added {} to your medication list.", name)))
        })
    }
}

pub struct QueryMedicationsTool {
    pub records: Arc<RecordStore>,
}

#[derive(Deserialize)]
struct QueryMedicationsInput {
    user_id: String,
}

impl Tool for QueryMedicationsTool {
    fn name(&self) -> &str {
        "query_medications"
    }

    fn description(&self) -> &str {
        "List the current user's recorded medications."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    fn execute(&self, input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let params: QueryMedicationsInput = serde_json::from_value(input)
                .map_err(|e| VeyraError::ToolValidation(e.to_string()))?;

            let meds = self.records.medications(&params.user_id);
            if meds.is_empty() {
                return Ok(ToolResult::success("No medications on file."));
            }

            let lines: Vec<String> = meds
                .iter()
                .map(|m| {
                    let mut line = m.name.clone();
                    if let Some(dosage) = &m.dosage {
                        line.push_str(&format!(" {dosage}"));
                    }
                    if let Some(schedule) = &m.schedule {
                        line.push_str(&format!(" ({schedule})"));
                    }
                    line
                })
                .collect();

            Ok(ToolResult::success(lines.join("\n")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_record_then_query() {
        let records = Arc::new(RecordStore::new());
        let record = RecordMedicationTool {
            records: records.clone(),
        };
        let query = QueryMedicationsTool { records };

        let result = record
            .execute(json!({
                "name": "Lisinopril",
                "dosage": "10mg",
                "schedule": "morning",
                "user_id": "u1"
            }))
            .await
            .unwrap();
        assert!(!result.is_error);

        let result = query.execute(json!({"user_id": "u1"})).await.unwrap();
        assert!(result.content.contains("Lisinopril 10mg (morning)"));

        let result = query.execute(json!({"user_id": "u2"})).await.unwrap();
        assert!(result.content.contains("No medications"));
    }

    #[tokio::test]
    async fn test_empty_name_is_error_result() {
        let record = RecordMedicationTool {
            records: Arc::new(RecordStore::new()),
        };
        let result = record
            .execute(json!({"name": "  ", "user_id": "u1"}))
            .await
            .unwrap();
        assert!(result.is_error);
    }
}
