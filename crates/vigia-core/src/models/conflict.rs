//! Conflict structures
//!
//! Populated when the server reports that the draft's deterministic id
//! already names an authoritative record with different field values.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One field-level difference between the local draft and the server record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub campo: String,
    pub local: Value,
    pub servidor: Value,
}

/// Conflict details kept with the draft while the user decides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictoInfo {
    /// The authoritative record as the server holds it
    pub situacion_existente: Value,
    pub diferencias: Vec<FieldDiff>,
    /// Arbitration ticket id, set once the conflict is escalated
    #[serde(default)]
    pub conflicto_id: Option<i64>,
}

impl ConflictoInfo {
    /// Server-assigned id of the existing record, used for the replace call
    #[must_use]
    pub fn existing_record_id(&self) -> Option<i64> {
        self.situacion_existente.get("id").and_then(Value::as_i64)
    }
}
