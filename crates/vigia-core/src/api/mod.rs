//! Submission transport for the authoritative server
//!
//! The trait is the seam the lifecycle controller is tested against; the
//! reqwest implementation lives in [`http`].

mod http;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{DraftSituacion, FieldDiff, MultimediaRef, SituacionId};

pub use http::{ApiConfig, HttpTransport};

/// Response of the reservation endpoint
///
/// `valido_hasta` is the deadline after which the server may recycle the
/// sequence number; the reservation must be consumed into a draft before it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub num_situacion_salida: i64,
    /// ISO date of the salida
    pub fecha: String,
    pub sede_id: i64,
    pub unidad_id: i64,
    pub unidad_codigo: String,
    pub salida_id: i64,
    pub valido_hasta: String,
}

impl Reservation {
    /// Calendar date of the reservation, for the identifier's date field
    pub fn fecha_date(&self) -> Result<NaiveDate> {
        if let Ok(datetime) = DateTime::parse_from_rfc3339(&self.fecha) {
            return Ok(datetime.date_naive());
        }
        NaiveDate::parse_from_str(self.fecha.get(..10).unwrap_or(&self.fecha), "%Y-%m-%d")
            .map_err(|_| Error::InvalidInput(format!("unparseable reservation fecha: {}", self.fecha)))
    }

    /// Expiry instant, when the server sent a parseable one
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.valido_hasta)
            .ok()
            .map(|deadline| deadline.with_timezone(&Utc))
    }
}

/// Terminal outcomes of `POST /situaciones`
///
/// A 409 is a value, not an error: the engine's policy is that conflicts
/// are handed to the user, never thrown.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitResponse {
    /// 2xx: the server accepted the situation
    Created {
        situacion_id: i64,
        numero_situacion: String,
    },
    /// 409: the deterministic id already names a different record
    Conflict(ConflictPayload),
}

/// Body of a 409 response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictPayload {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub codigo: Option<String>,
    #[serde(default)]
    pub codigo_situacion: String,
    pub situacion_existente: Value,
    #[serde(default)]
    pub diferencias: Vec<FieldDiff>,
    #[serde(default)]
    pub total_diferencias: Option<i64>,
}

/// Body of `POST /situaciones/conflictos`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EscalationRequest {
    pub codigo_situacion: String,
    pub datos_locales: Value,
    pub datos_servidor: Value,
    pub diferencias: Vec<FieldDiff>,
    pub tipo_conflicto: String,
}

/// Arbitration ticket returned by the escalation endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct EscalationTicket {
    pub conflicto_id: i64,
}

/// State of an escalated conflict as the arbitration desk reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArbitrationState {
    Pendiente,
    Resuelto,
}

/// Response of `GET /situaciones/conflictos/{id}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbitrationStatus {
    pub estado: ArbitrationState,
    /// Which side the adjudicator kept, informational only
    #[serde(default)]
    pub resolucion: Option<String>,
}

impl ArbitrationStatus {
    /// True once the adjudicator has decided either way
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        matches!(self.estado, ArbitrationState::Resuelto)
    }
}

/// Network calls the lifecycle controller depends on
///
/// Every submission carries the draft's deterministic id as idempotency
/// token, which is what makes manual retries safe.
#[allow(async_fn_in_trait)]
pub trait SubmissionTransport: Send + Sync {
    /// Reserve a monotonic sequence number for the unit's current salida
    async fn reserve(&self, unidad_codigo: &str) -> Result<Reservation>;

    /// Submit the draft; 409 comes back as `SubmitResponse::Conflict`
    async fn submit(&self, draft: &DraftSituacion) -> Result<SubmitResponse>;

    /// Replace the existing server record with the local draft (Use-Local)
    async fn replace_existing(
        &self,
        existing_id: i64,
        draft: &DraftSituacion,
        razon: &str,
    ) -> Result<()>;

    /// Post both versions plus the diff list for arbitration (Escalate)
    async fn escalate(&self, request: &EscalationRequest) -> Result<EscalationTicket>;

    /// Upload one attachment for an accepted situation
    async fn upload_multimedia(
        &self,
        situacion_id: i64,
        draft_id: &SituacionId,
        media: &MultimediaRef,
    ) -> Result<()>;

    /// Poll the arbitration ticket for an escalated conflict
    async fn arbitration_status(&self, conflicto_id: i64) -> Result<ArbitrationStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reservation_fecha_accepts_date_and_datetime() {
        let mut reservation = Reservation {
            num_situacion_salida: 4,
            fecha: "2026-01-21".to_string(),
            sede_id: 1,
            unidad_id: 12,
            unidad_codigo: "030".to_string(),
            salida_id: 9,
            valido_hasta: "2026-01-21T11:00:00+00:00".to_string(),
        };
        assert_eq!(
            reservation.fecha_date().unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 21).unwrap()
        );

        reservation.fecha = "2026-01-21T06:30:00+00:00".to_string();
        assert_eq!(
            reservation.fecha_date().unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 21).unwrap()
        );

        reservation.fecha = "no-date".to_string();
        assert!(reservation.fecha_date().is_err());
    }

    #[test]
    fn conflict_payload_parses_server_body() {
        let body = serde_json::json!({
            "error": "DUPLICATE_SITUACION",
            "codigo": "409",
            "codigo_situacion": "20260121-1-030-70-86-50-4",
            "situacion_existente": {"id": 31, "km": 49},
            "diferencias": [
                {"campo": "km", "local": 50.7, "servidor": 49}
            ],
            "total_diferencias": 1
        });

        let payload: ConflictPayload = serde_json::from_value(body).unwrap();
        assert_eq!(payload.diferencias.len(), 1);
        assert_eq!(payload.diferencias[0].campo, "km");
        assert_eq!(payload.situacion_existente["id"], 31);
    }

    #[test]
    fn arbitration_status_parses_states() {
        let pending: ArbitrationStatus =
            serde_json::from_value(serde_json::json!({"estado": "PENDIENTE"})).unwrap();
        assert!(!pending.is_resolved());

        let resolved: ArbitrationStatus = serde_json::from_value(
            serde_json::json!({"estado": "RESUELTO", "resolucion": "USAR_SERVIDOR"}),
        )
        .unwrap();
        assert!(resolved.is_resolved());
        assert_eq!(resolved.resolucion.as_deref(), Some("USAR_SERVIDOR"));
    }
}
