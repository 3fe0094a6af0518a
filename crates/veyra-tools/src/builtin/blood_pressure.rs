use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::info;

use veyra_core::error::{Result, VeyraError};
use veyra_core::traits::Tool;
use veyra_core::types::ToolResult;

use crate::records::{BloodPressureReading, RecordStore};

pub struct RecordBloodPressureTool {
    pub records: Arc<RecordStore>,
}

#[derive(Deserialize)]
struct RecordBloodPressureInput {
    systolic: u32,
    diastolic: u32,
    #[serde(default)]
    pulse: Option<u32>,
    #[serde(default)]
    note: Option<String>,
    // Injected by the invocation wrapper
    user_id: String,
    #[serde(default)]
    correlation_id: String,
}

impl Tool for RecordBloodPressureTool {
    fn name(&self) -> &str {
        "record_blood_pressure"
    }

    fn description(&self) -> &str {
        "Record a blood pressure reading (systolic/diastolic, optional pulse and note) for the current user."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "systolic": { "type": "integer", "description": "Systolic pressure in mmHg" },
                "diastolic": { "type": "integer", "description": "Diastolic pressure in mmHg" },
                "pulse": { "type": "integer", "description": "Pulse in bpm (optional)" },
                "note": { "type": "string", "description": "Free-form note (optional)" }
            },
            "required": ["systolic", "diastolic"]
        })
    }

    fn execute(&self, input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let params: RecordBloodPressureInput = serde_json::from_value(input)
                .map_err(|e| VeyraError::ToolValidation(e.to_string()))?;

            if !(40..=300).contains(&params.systolic) || !(20..=200).contains(&params.diastolic) {
                return Ok(ToolResult::error(format!(
                    "Implausible reading {}/{}: values must be within 40-300/20-200 mmHg",
                    params.systolic, params.diastolic
                )));
            }

            let reading = BloodPressureReading {
                systolic: params.systolic,
                diastolic: params.diastolic,
                pulse: params.pulse,
                note: params.note,
                recorded_at: Utc::now(),
            };

            info!(
                user_id = %params.user_id,
                correlation_id = %params.correlation_id,
                systolic = params.systolic,
                diastolic = params.diastolic,
                "Recording blood pressure"
            );

            self.records.record_blood_pressure(&params.user_id, reading);

            Ok(ToolResult::success(format!(
                "Recorded blood pressure {}/{} mmHg.",
                params.systolic, params.diastolic
            )))
        })
    }
}

pub struct QueryBloodPressureTool {
    pub records: Arc<RecordStore>,
}

#[derive(Deserialize)]
struct QueryBloodPressureInput {
    #[serde(default = "default_limit")]
    limit: usize,
    user_id: String,
}

fn default_limit() -> usize {
    10
}

impl Tool for QueryBloodPressureTool {
    fn name(&self) -> &str {
        "query_blood_pressure"
    }

    fn description(&self) -> &str {
        "List the current user's recent blood pressure readings, most recent first."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "limit": { "type": "integer", "description": "Maximum readings to return (default: 10)" }
            }
        })
    }

    fn execute(&self, input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let params: QueryBloodPressureInput = serde_json::from_value(input)
                .map_err(|e| VeyraError::ToolValidation(e.to_string()))?;

            let history = self
                .records
                .blood_pressure_history(&params.user_id, params.limit);

            if history.is_empty() {
                return Ok(ToolResult::success("No blood pressure readings on file."));
            }

            let lines: Vec<String> = history
                .iter()
                .map(|r| {
                    format!(
                        "{}: {}/{} mmHg{}",
                        r.recorded_at.format("%Y-%m-%d %H:%M"),
                        r.systolic,
                        r.diastolic,
                        r.pulse.map(|p| format!(", pulse {p}")).unwrap_or_default()
                    )
                })
                .collect();

            Ok(ToolResult::success(lines.join("\n")))
        })
    }
}
