use serde::{Deserialize, Serialize};

/// Opaque identifier of a configured observation slot.
pub type ObservationId = u32;

/// Evaluated variable or primary-key value. Anything the instrumentation
/// source can render as JSON is accepted.
pub type Value = serde_json::Value;

/// Execution event at which a sample was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Line,
    Call,
    Return,
    Exception,
}

/// One observed variable value at one execution event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub index: ObservationId,
    pub event: EventKind,
    #[serde(default)]
    pub value: Value,
    #[serde(default, alias = "primary")]
    pub primary_key: Value,
}

impl Sample {
    pub fn new(index: ObservationId, event: EventKind, value: Value, primary_key: Value) -> Self {
        Self {
            index,
            event,
            value,
            primary_key,
        }
    }

    /// Convenience for sources that key a sample by its own value.
    pub fn keyed_by_value(index: ObservationId, event: EventKind, value: Value) -> Self {
        let primary_key = value.clone();
        Self::new(index, event, value, primary_key)
    }
}
