pub mod blood_pressure;
pub mod medication;

use std::sync::Arc;

use crate::catalog::ToolCatalog;
use crate::records::RecordStore;

/// Register the builtin health tools against a shared record store.
pub fn register_builtins(catalog: &mut ToolCatalog, records: Arc<RecordStore>) {
    catalog.register(blood_pressure::RecordBloodPressureTool {
        records: records.clone(),
    });
    catalog.register(blood_pressure::QueryBloodPressureTool {
        records: records.clone(),
    });
    catalog.register(medication::RecordMedicationTool {
        records: records.clone(),
    });
    catalog.register(medication::QueryMedicationsTool { records });
}
