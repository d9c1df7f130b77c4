//! Deterministic situation identifier
//!
//! Format: `YYYYMMDD-SEDE-UNIDAD-TIPO-RUTA-KM-NUM_SALIDA`, e.g.
//! `20260121-1-030-70-86-50-4`. No field is padded; the km field is the
//! integer part only. The same id doubles as the local primary key and as
//! the network idempotency token, so it is computed exactly once per draft.

#![allow(clippy::cast_possible_truncation)] // km is range-checked before the floor cast

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

use super::multimedia::MediaTipo;

/// Number of dash-separated fields in a well-formed id
const FIELD_COUNT: usize = 7;

/// Attributes an identifier is derived from
#[derive(Debug, Clone, PartialEq)]
pub struct IdParams {
    pub fecha: NaiveDate,
    pub sede_id: i64,
    /// Unit code verbatim: "030", "1131", "M007"
    pub unidad_codigo: String,
    pub tipo_situacion_id: i64,
    pub ruta_id: i64,
    pub km: f64,
    /// Sequence number within this salida, not within the day
    pub num_situacion_salida: i64,
}

/// A validated deterministic situation identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SituacionId(String);

impl SituacionId {
    /// Get the string representation of this id
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Human-readable rendering, falling back to the raw id when it cannot
    /// be parsed
    ///
    /// # Examples
    ///
    /// ```
    /// use vigia_core::models::SituacionId;
    ///
    /// let id: SituacionId = "20260121-1-030-70-86-50-4".parse().unwrap();
    /// assert_eq!(
    ///     id.legible(),
    ///     "2026-01-21 | Sede 1 | Unidad 030 | Tipo 70 | Ruta 86 Km 50 | #4"
    /// );
    /// ```
    #[must_use]
    pub fn legible(&self) -> String {
        parse(&self.0).map_or_else(
            || self.0.clone(),
            |p| {
                format!(
                    "{} | Sede {} | Unidad {} | Tipo {} | Ruta {} Km {} | #{}",
                    p.fecha.format("%Y-%m-%d"),
                    p.sede_id,
                    p.unidad_codigo,
                    p.tipo_situacion_id,
                    p.ruta_id,
                    p.km as i64,
                    p.num_situacion_salida
                )
            },
        )
    }

    /// Upload file name for a multimedia item attached to this situation
    #[must_use]
    pub fn multimedia_filename(&self, tipo: MediaTipo, orden: Option<u32>) -> String {
        match tipo {
            MediaTipo::Foto => format!("{}_foto_{}.jpg", self.0, orden.unwrap_or(1)),
            MediaTipo::Video => format!("{}_video.mp4", self.0),
        }
    }
}

impl fmt::Display for SituacionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SituacionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if is_valid(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::InvalidInput(format!("malformed situacion id: {s}")))
        }
    }
}

/// Generate the deterministic id for a situation
///
/// Identical input always yields an identical string. Fails closed on any
/// input that would produce an unparseable id: a unit code containing a
/// dash (or not matching the catalog shape `[A-Z]?digits`), a negative or
/// non-finite km, or negative sequence fields.
pub fn generate(params: &IdParams) -> Result<SituacionId> {
    if !unit_code_regex().is_match(&params.unidad_codigo) {
        return Err(Error::InvalidInput(format!(
            "unidad_codigo {:?} cannot appear in a situacion id",
            params.unidad_codigo
        )));
    }
    if !params.km.is_finite() || params.km < 0.0 {
        return Err(Error::InvalidInput(format!(
            "km {} cannot appear in a situacion id",
            params.km
        )));
    }
    if params.sede_id < 0
        || params.tipo_situacion_id < 0
        || params.ruta_id < 0
        || params.num_situacion_salida < 0
    {
        return Err(Error::InvalidInput(
            "numeric id fields cannot be negative".to_string(),
        ));
    }

    let id = format!(
        "{}-{}-{}-{}-{}-{}-{}",
        params.fecha.format("%Y%m%d"),
        params.sede_id,
        params.unidad_codigo,
        params.tipo_situacion_id,
        params.ruta_id,
        params.km.floor() as i64,
        params.num_situacion_salida
    );
    Ok(SituacionId(id))
}

/// Parse an id back into its components
///
/// Splits on `-` into exactly seven fields and returns `None` on any
/// malformed shape. The km component comes back as the stored integer part.
#[must_use]
pub fn parse(id: &str) -> Option<IdParams> {
    if !is_valid(id) {
        return None;
    }

    let parts: Vec<&str> = id.split('-').collect();
    let [fecha, sede, unidad, tipo, ruta, km, num] = parts[..] else {
        return None;
    };

    Some(IdParams {
        fecha: NaiveDate::parse_from_str(fecha, "%Y%m%d").ok()?,
        sede_id: sede.parse().ok()?,
        unidad_codigo: unidad.to_string(),
        tipo_situacion_id: tipo.parse().ok()?,
        ruta_id: ruta.parse().ok()?,
        km: f64::from(km.parse::<u32>().ok()?),
        num_situacion_salida: num.parse().ok()?,
    })
}

/// Check whether a string has the exact shape of a situacion id
#[must_use]
pub fn is_valid(id: &str) -> bool {
    let parts: Vec<&str> = id.split('-').collect();
    if parts.len() != FIELD_COUNT {
        return false;
    }

    let digits = Regex::new(r"^\d+$").expect("Invalid regex");
    let date = Regex::new(r"^\d{8}$").expect("Invalid regex");

    date.is_match(parts[0])
        && digits.is_match(parts[1])
        && unit_code_regex().is_match(parts[2])
        && parts[3..].iter().all(|field| digits.is_match(field))
}

/// Unit codes are digits with an optional leading letter (motorized units)
fn unit_code_regex() -> Regex {
    Regex::new(r"^[A-Z]?\d+$").expect("Invalid regex")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_params() -> IdParams {
        IdParams {
            fecha: NaiveDate::from_ymd_opt(2026, 1, 21).unwrap(),
            sede_id: 1,
            unidad_codigo: "030".to_string(),
            tipo_situacion_id: 70,
            ruta_id: 86,
            km: 50.7,
            num_situacion_salida: 4,
        }
    }

    #[test]
    fn generate_matches_known_vector() {
        let id = generate(&sample_params()).unwrap();
        assert_eq!(id.as_str(), "20260121-1-030-70-86-50-4");
    }

    #[test]
    fn generate_is_deterministic() {
        let a = generate(&sample_params()).unwrap();
        let b = generate(&sample_params()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn generate_uses_integer_km_without_padding() {
        let mut params = sample_params();
        params.km = 7.99;
        let id = generate(&params).unwrap();
        assert_eq!(id.as_str().split('-').count(), 7);
        assert_eq!(id.as_str().split('-').nth(5), Some("7"));
    }

    #[test]
    fn generate_keeps_unit_code_verbatim() {
        let mut params = sample_params();
        params.unidad_codigo = "M007".to_string();
        let id = generate(&params).unwrap();
        assert_eq!(id.as_str(), "20260121-1-M007-70-86-50-4");
        assert!(is_valid(id.as_str()));
    }

    #[test]
    fn generate_rejects_dashed_unit_code() {
        let mut params = sample_params();
        params.unidad_codigo = "M-007".to_string();
        assert!(generate(&params).is_err());

        params.unidad_codigo = String::new();
        assert!(generate(&params).is_err());
    }

    #[test]
    fn generate_rejects_negative_fields() {
        let mut params = sample_params();
        params.km = -1.0;
        assert!(generate(&params).is_err());

        let mut params = sample_params();
        params.ruta_id = -5;
        assert!(generate(&params).is_err());
    }

    #[test]
    fn parse_roundtrips_generated_id() {
        let mut params = sample_params();
        params.km = params.km.floor();

        let id = generate(&params).unwrap();
        let parsed = parse(id.as_str()).unwrap();
        assert_eq!(parsed, params);
    }

    #[test]
    fn parse_fails_closed_on_malformed_shapes() {
        assert_eq!(parse(""), None);
        assert_eq!(parse("20260121-1-030-70-86-50"), None);
        assert_eq!(parse("20260121-1-030-70-86-50-4-9"), None);
        assert_eq!(parse("2026012-1-030-70-86-50-4"), None);
        assert_eq!(parse("20260121-x-030-70-86-50-4"), None);
        assert_eq!(parse("20260121-1-0_30-70-86-50-4"), None);
    }

    #[test]
    fn is_valid_checks_each_field() {
        assert!(is_valid("20260121-1-030-70-86-50-4"));
        assert!(is_valid("20260121-1-M007-70-86-50-4"));
        assert!(!is_valid("20260121-1-030-70-86-50"));
        assert!(!is_valid("20260121-1-030-70-86-5.5-4"));
        assert!(!is_valid("20260121--030-70-86-50-4"));
    }

    #[test]
    fn from_str_validates() {
        assert!("20260121-1-030-70-86-50-4".parse::<SituacionId>().is_ok());
        assert!("not-an-id".parse::<SituacionId>().is_err());
    }

    #[test]
    fn legible_formats_components() {
        let id: SituacionId = "20260121-1-030-70-86-50-4".parse().unwrap();
        assert_eq!(
            id.legible(),
            "2026-01-21 | Sede 1 | Unidad 030 | Tipo 70 | Ruta 86 Km 50 | #4"
        );
    }

    #[test]
    fn multimedia_filenames_follow_id() {
        let id: SituacionId = "20260121-1-030-70-86-50-4".parse().unwrap();
        assert_eq!(
            id.multimedia_filename(MediaTipo::Foto, Some(2)),
            "20260121-1-030-70-86-50-4_foto_2.jpg"
        );
        assert_eq!(
            id.multimedia_filename(MediaTipo::Video, None),
            "20260121-1-030-70-86-50-4_video.mp4"
        );
    }
}
