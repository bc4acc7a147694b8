use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Serialize, Serializer};

use super::sample::{ObservationId, Sample};
use super::slot::ObservationSlot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReportKind {
    #[serde(rename = "data")]
    Data,
    #[serde(rename = "end-of-stream")]
    EndOfStream,
}

/// Snapshot of one non-empty slot at flush time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotEntry {
    pub index: ObservationId,
    pub source_file: String,
    pub source_line: u32,
    pub condition: Option<String>,
    pub variable_expr: String,
    pub primary_expr: String,
    pub source_line_text: String,
    pub values: Vec<Sample>,
}

impl SlotEntry {
    /// Moves the slot's retained samples into a new entry, clearing the slot.
    pub fn drain_from(slot: &mut ObservationSlot) -> Self {
        let spec = slot.spec().clone();
        SlotEntry {
            index: spec.index,
            source_file: spec.source_file,
            source_line: spec.source_line,
            condition: spec.condition,
            variable_expr: spec.variable_expr,
            primary_expr: spec.primary_expr,
            source_line_text: spec.source_line_text,
            values: slot.take(),
        }
    }
}

/// A batched, serializable unit of telemetry. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub sequence: u64,
    #[serde(rename = "time", serialize_with = "unix_seconds")]
    pub timestamp: SystemTime,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ReportKind,
    pub entries: Vec<SlotEntry>,
}

impl Report {
    pub fn data(sequence: u64, name: &str, entries: Vec<SlotEntry>) -> Self {
        Self {
            sequence,
            timestamp: SystemTime::now(),
            name: name.to_string(),
            kind: ReportKind::Data,
            entries,
        }
    }

    pub fn end_of_stream(sequence: u64, name: &str) -> Self {
        Self {
            sequence,
            timestamp: SystemTime::now(),
            name: name.to_string(),
            kind: ReportKind::EndOfStream,
            entries: Vec::new(),
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.kind == ReportKind::EndOfStream
    }

    /// Wire form sent to the broker and the file mirror.
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

fn unix_seconds<S: Serializer>(ts: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
    let secs = ts
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    s.serialize_f64(secs)
}
