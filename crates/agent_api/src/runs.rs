use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::StopReason;

/// Server-side record of one run, fetched after a stream ends with a
/// generic error to decide whether the failure was transient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl RunMetadata {
    /// Collects every error string recorded in the run metadata.
    pub fn error_text(&self) -> Option<String> {
        let error = self.metadata.as_ref()?.get("error")?;
        let mut parts = Vec::new();
        collect_error_strings(error, &mut parts);

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" | "))
        }
    }
}

fn collect_error_strings(value: &Value, parts: &mut Vec<String>) {
    match value {
        Value::String(text) if !text.trim().is_empty() => parts.push(text.clone()),
        Value::Object(map) => {
            for key in ["message", "detail", "error_type", "type", "error"] {
                if let Some(nested) = map.get(key) {
                    collect_error_strings(nested, parts);
                }
            }
        }
        _ => {}
    }
}
