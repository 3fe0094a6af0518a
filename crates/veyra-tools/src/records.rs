use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One blood-pressure reading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BloodPressureReading {
    pub systolic: u32,
    pub diastolic: u32,
    #[serde(default)]
    pub pulse: Option<u32>,
    #[serde(default)]
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// One medication entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MedicationEntry {
    pub name: String,
    #[serde(default)]
    pub dosage: Option<String>,
    #[serde(default)]
    pub schedule: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// In-memory domain record storage, keyed by user id.
///
/// The business persistence behind the tools is an external concern;
/// this is the reference implementation used by the builtin tools and
/// the test suite.
#[derive(Default)]
pub struct RecordStore {
    blood_pressure: Mutex<HashMap<String, Vec<BloodPressureReading>>>,
    medications: Mutex<HashMap<String, Vec<MedicationEntry>>>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_blood_pressure(&self, user_id: &str, reading: BloodPressureReading) {
        self.blood_pressure
            .lock()
            .expect("record store lock poisoned")
            .entry(user_id.to_string())
            .or_default()
            .push(reading);
    }

    /// Most recent readings first.
    pub fn blood_pressure_history(&self, user_id: &str, limit: usize) -> Vec<BloodPressureReading> {
        let guard = self
            .blood_pressure
            .lock()
            .expect("record store lock poisoned");
        guard
            .get(user_id)
            .map(|v| v.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn record_medication(&self, user_id: &str, entry: MedicationEntry) {
        self.medications
            .lock()
            .expect("record store lock poisoned")
            .entry(user_id.to_string())
            .or_default()
            .push(entry);
    }

    pub fn medications(&self, user_id: &str) -> Vec<MedicationEntry> {
        let guard = self.medications.lock().expect("record store lock poisoned");
        guard.get(user_id).cloned().unwrap_or_default()
    }
}
