//! Draft situation model
//!
//! The single unit of work of the engine: a locally persisted, not yet
//! confirmed situation report. Identity/context fields are copied from the
//! reservation at creation and never change afterwards; the deterministic
//! id in particular is computed once and kept even when content fields
//! (km, coordinates, free text) are edited later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::Result;

use super::conflict::ConflictoInfo;
use super::multimedia::MultimediaRef;
use super::situacion_id::SituacionId;

/// Draft lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DraftStatus {
    /// Being filled in, local only
    Draft,
    /// A submission attempt failed; eligible for manual retry
    Pendiente,
    /// A submission attempt is in flight
    Enviando,
    /// The server reported an id collision; waiting for the user's decision
    Conflicto,
    /// Escalated; waiting for an external adjudicator
    EsperandoArbitraje,
}

impl DraftStatus {
    /// Wire/storage name for this state
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Pendiente => "PENDIENTE",
            Self::Enviando => "ENVIANDO",
            Self::Conflicto => "CONFLICTO",
            Self::EsperandoArbitraje => "ESPERANDO_ARBITRAJE",
        }
    }
}

impl fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Situation classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TipoSituacion {
    Patrullaje,
    HechoTransito,
    AsistenciaVehicular,
    Emergencia,
    RegulacionTrafico,
    ParadaEstrategica,
    CambioRuta,
    Comida,
    Descanso,
    Otros,
}

impl TipoSituacion {
    /// Wire/storage name for this classification
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Patrullaje => "PATRULLAJE",
            Self::HechoTransito => "HECHO_TRANSITO",
            Self::AsistenciaVehicular => "ASISTENCIA_VEHICULAR",
            Self::Emergencia => "EMERGENCIA",
            Self::RegulacionTrafico => "REGULACION_TRAFICO",
            Self::ParadaEstrategica => "PARADA_ESTRATEGICA",
            Self::CambioRuta => "CAMBIO_RUTA",
            Self::Comida => "COMIDA",
            Self::Descanso => "DESCANSO",
            Self::Otros => "OTROS",
        }
    }
}

impl fmt::Display for TipoSituacion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A draft situation report occupying the device's single slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftSituacion {
    /// Deterministic id, primary key and idempotency token
    pub id: SituacionId,

    // Context copied from the reservation, immutable after creation
    pub num_situacion_salida: i64,
    /// ISO date of the reservation
    pub fecha: String,
    pub sede_id: i64,
    pub unidad_id: i64,
    pub unidad_codigo: String,
    pub salida_id: i64,

    pub tipo_situacion: TipoSituacion,
    pub tipo_situacion_id: i64,

    // Location and report content, mutable through patches
    pub ruta_id: i64,
    #[serde(default)]
    pub ruta_nombre: Option<String>,
    pub km: f64,
    pub sentido: String,
    pub latitud: f64,
    pub longitud: f64,
    #[serde(default)]
    pub descripcion: Option<String>,
    #[serde(default)]
    pub observaciones: Option<String>,

    #[serde(default)]
    pub multimedia: Vec<MultimediaRef>,

    pub estado: DraftStatus,
    #[serde(default)]
    pub conflicto: Option<ConflictoInfo>,

    pub created_at: String,
    pub updated_at: String,
}

/// Keys the backend does not accept on the situation payload
const INTERNAL_FIELDS: [&str; 7] = [
    "multimedia",
    "estado",
    "conflicto",
    "created_at",
    "updated_at",
    "num_situacion_salida",
    "fecha",
];

impl DraftSituacion {
    /// Minutes elapsed since the draft was created, clamped at zero
    #[must_use]
    pub fn minutes_since_creation(&self, now: DateTime<Utc>) -> i64 {
        DateTime::parse_from_rfc3339(&self.created_at)
            .map(|created| (now - created.with_timezone(&Utc)).num_minutes().max(0))
            .unwrap_or(0)
    }

    /// Body for `POST /situaciones`
    ///
    /// Strips draft-internal fields (multimedia is uploaded separately) and
    /// normalizes empty free-text fields to null.
    pub fn submission_payload(&self) -> Result<Value> {
        let mut payload = serde_json::to_value(self)?;
        if let Some(object) = payload.as_object_mut() {
            for field in INTERNAL_FIELDS {
                object.remove(field);
            }
            for field in ["descripcion", "observaciones", "ruta_nombre"] {
                if matches!(object.get(field), Some(Value::String(s)) if s.trim().is_empty()) {
                    object.insert(field.to_string(), Value::Null);
                }
            }
        }
        Ok(payload)
    }
}

/// Mutable report content accepted by `update_draft`
///
/// Identity/context fields are deliberately absent: editing km after
/// creation does not re-derive the id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftPatch {
    pub km: Option<f64>,
    pub sentido: Option<String>,
    pub latitud: Option<f64>,
    pub longitud: Option<f64>,
    pub descripcion: Option<String>,
    pub observaciones: Option<String>,
}

impl DraftPatch {
    /// True when the patch changes nothing
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.km.is_none()
            && self.sentido.is_none()
            && self.latitud.is_none()
            && self.longitud.is_none()
            && self.descripcion.is_none()
            && self.observaciones.is_none()
    }

    /// Apply this patch to a draft in place
    pub fn apply(&self, draft: &mut DraftSituacion) {
        if let Some(km) = self.km {
            draft.km = km;
        }
        if let Some(sentido) = &self.sentido {
            draft.sentido.clone_from(sentido);
        }
        if let Some(latitud) = self.latitud {
            draft.latitud = latitud;
        }
        if let Some(longitud) = self.longitud {
            draft.longitud = longitud;
        }
        if let Some(descripcion) = &self.descripcion {
            draft.descripcion = Some(descripcion.clone());
        }
        if let Some(observaciones) = &self.observaciones {
            draft.observaciones = Some(observaciones.clone());
        }
    }
}

/// Caller input for creating a new draft
#[derive(Debug, Clone, PartialEq)]
pub struct NewDraftParams {
    pub tipo_situacion: TipoSituacion,
    pub tipo_situacion_id: i64,
    pub unidad_codigo: String,
    pub ruta_id: i64,
    pub ruta_nombre: Option<String>,
    pub km: f64,
    pub sentido: String,
    pub latitud: f64,
    pub longitud: f64,
}

/// Human-readable elapsed time: minutes, or `Hh Mmin` past the hour
#[must_use]
pub fn elapsed_phrase(minutes: i64) -> String {
    if minutes < 60 {
        format!("{minutes} minutos")
    } else {
        format!("{}h {}min", minutes / 60, minutes % 60)
    }
}

/// Fully populated draft used across the crate's tests
#[cfg(test)]
pub(crate) fn sample_draft() -> DraftSituacion {
    DraftSituacion {
        id: "20260121-1-030-70-86-50-4".parse().unwrap(),
        num_situacion_salida: 4,
        fecha: "2026-01-21".to_string(),
        sede_id: 1,
        unidad_id: 12,
        unidad_codigo: "030".to_string(),
        salida_id: 9,
        tipo_situacion: TipoSituacion::HechoTransito,
        tipo_situacion_id: 70,
        ruta_id: 86,
        ruta_nombre: Some("CA-9 Norte".to_string()),
        km: 50.7,
        sentido: "NORTE".to_string(),
        latitud: 14.62,
        longitud: -90.51,
        descripcion: None,
        observaciones: Some(String::new()),
        multimedia: vec![],
        estado: DraftStatus::Draft,
        conflicto: None,
        created_at: "2026-01-21T10:00:00+00:00".to_string(),
        updated_at: "2026-01-21T10:00:00+00:00".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn status_serializes_to_wire_names() {
        assert_eq!(
            serde_json::to_value(DraftStatus::EsperandoArbitraje).unwrap(),
            serde_json::json!("ESPERANDO_ARBITRAJE")
        );
        assert_eq!(DraftStatus::Pendiente.as_str(), "PENDIENTE");
        assert_eq!(TipoSituacion::HechoTransito.as_str(), "HECHO_TRANSITO");
    }

    #[test]
    fn elapsed_phrase_formats_minutes_and_hours() {
        assert_eq!(elapsed_phrase(0), "0 minutos");
        assert_eq!(elapsed_phrase(5), "5 minutos");
        assert_eq!(elapsed_phrase(59), "59 minutos");
        assert_eq!(elapsed_phrase(60), "1h 0min");
        assert_eq!(elapsed_phrase(125), "2h 5min");
    }

    #[test]
    fn minutes_since_creation_uses_created_at() {
        let draft = sample_draft();
        let now = DateTime::parse_from_rfc3339("2026-01-21T10:42:30+00:00")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(draft.minutes_since_creation(now), 42);
    }

    #[test]
    fn patch_updates_content_but_never_identity() {
        let mut draft = sample_draft();
        let patch = DraftPatch {
            km: Some(51.3),
            sentido: Some("SUR".to_string()),
            descripcion: Some("colision menor".to_string()),
            ..DraftPatch::default()
        };
        patch.apply(&mut draft);

        assert_eq!(draft.km, 51.3);
        assert_eq!(draft.sentido, "SUR");
        assert_eq!(draft.descripcion.as_deref(), Some("colision menor"));
        // Identity stays tied to the reservation
        assert_eq!(draft.id.as_str(), "20260121-1-030-70-86-50-4");
        assert_eq!(draft.num_situacion_salida, 4);
    }

    #[test]
    fn patch_is_empty_when_defaulted() {
        assert!(DraftPatch::default().is_empty());
        assert!(!DraftPatch {
            km: Some(1.0),
            ..DraftPatch::default()
        }
        .is_empty());
    }

    #[test]
    fn submission_payload_strips_internal_fields() {
        let draft = sample_draft();
        let payload = draft.submission_payload().unwrap();
        let object = payload.as_object().unwrap();

        assert_eq!(object.get("id").unwrap(), "20260121-1-030-70-86-50-4");
        assert!(object.get("multimedia").is_none());
        assert!(object.get("estado").is_none());
        assert!(object.get("conflicto").is_none());
        assert!(object.get("created_at").is_none());
        assert!(object.get("num_situacion_salida").is_none());
        assert!(object.get("fecha").is_none());
        // Empty free text goes out as null, not ""
        assert_eq!(object.get("observaciones").unwrap(), &Value::Null);
        assert_eq!(object.get("ruta_nombre").unwrap(), "CA-9 Norte");
    }
}
