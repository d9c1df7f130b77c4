//! reqwest implementation of the submission transport

use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{DraftSituacion, MultimediaRef, SituacionId};

use super::{
    ArbitrationStatus, EscalationRequest, EscalationTicket, Reservation, SubmitResponse,
    SubmissionTransport,
};

/// Session-scoped API configuration, injected at construction
#[derive(Clone, PartialEq, Eq)]
pub struct ApiConfig {
    base_url: String,
    token: Option<String>,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl ApiConfig {
    /// Build a configuration for the given API base URL
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url.into())?,
            token: None,
        })
    }

    /// Attach the session's bearer token
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into().trim().to_string();
        self.token = (!token.is_empty()).then_some(token);
        self
    }

    /// The normalized base URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// HTTP transport carrying the deterministic id as `Idempotency-Key`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    config: ApiConfig,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport over the given configuration
    pub fn new(config: ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| Error::Network(error.to_string()))?;
        Ok(Self { config, client })
    }

    fn token(&self) -> Result<&str> {
        self.config.token.as_deref().ok_or(Error::NotAuthenticated)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url)
    }
}

#[derive(Debug, Deserialize)]
struct CreatedBody {
    situacion_id: i64,
    numero_situacion: String,
}

impl SubmissionTransport for HttpTransport {
    async fn reserve(&self, unidad_codigo: &str) -> Result<Reservation> {
        let token = self.token()?;
        let response = self
            .client
            .get(self.url(&format!("/unidades/{unidad_codigo}/reservar-numero-salida")))
            .bearer_auth(token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|error| Error::Network(error.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Reservation(parse_api_error(status, &body)));
        }

        response
            .json::<Reservation>()
            .await
            .map_err(|error| Error::Network(error.to_string()))
    }

    async fn submit(&self, draft: &DraftSituacion) -> Result<SubmitResponse> {
        let token = self.token()?;
        let payload = draft.submission_payload()?;

        let response = self
            .client
            .post(self.url("/situaciones"))
            .bearer_auth(token)
            .header("Idempotency-Key", draft.id.as_str())
            .json(&payload)
            .send()
            .await
            .map_err(|error| Error::Network(error.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let created = response
                .json::<CreatedBody>()
                .await
                .map_err(|error| Error::Network(error.to_string()))?;
            return Ok(SubmitResponse::Created {
                situacion_id: created.situacion_id,
                numero_situacion: created.numero_situacion,
            });
        }

        if status == StatusCode::CONFLICT {
            let conflict = response
                .json()
                .await
                .map_err(|error| Error::Network(error.to_string()))?;
            return Ok(SubmitResponse::Conflict(conflict));
        }

        let body = response.text().await.unwrap_or_default();
        Err(Error::Server {
            status: status.as_u16(),
            message: parse_api_error(status, &body),
        })
    }

    async fn replace_existing(
        &self,
        existing_id: i64,
        draft: &DraftSituacion,
        razon: &str,
    ) -> Result<()> {
        let token = self.token()?;
        let mut payload = draft.submission_payload()?;
        if let Some(object) = payload.as_object_mut() {
            object.insert("razon_actualizacion".to_string(), Value::from(razon));
        }

        let response = self
            .client
            .put(self.url(&format!("/situaciones/{existing_id}")))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|error| Error::Network(error.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Server {
                status: status.as_u16(),
                message: parse_api_error(status, &body),
            });
        }
        Ok(())
    }

    async fn escalate(&self, request: &EscalationRequest) -> Result<EscalationTicket> {
        let token = self.token()?;
        let response = self
            .client
            .post(self.url("/situaciones/conflictos"))
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .map_err(|error| Error::Network(error.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Server {
                status: status.as_u16(),
                message: parse_api_error(status, &body),
            });
        }

        response
            .json::<EscalationTicket>()
            .await
            .map_err(|error| Error::Network(error.to_string()))
    }

    async fn upload_multimedia(
        &self,
        situacion_id: i64,
        draft_id: &SituacionId,
        media: &MultimediaRef,
    ) -> Result<()> {
        let token = self.token()?;

        let path = media.uri.strip_prefix("file://").unwrap_or(&media.uri);
        let bytes = tokio::fs::read(path).await?;

        let part = Part::bytes(bytes)
            .file_name(draft_id.multimedia_filename(media.tipo, media.orden))
            .mime_str(media.tipo.mime_type())
            .map_err(|error| Error::InvalidInput(error.to_string()))?;

        let mut form = Form::new()
            .part("file", part)
            .text("tipo", media.tipo.as_str());
        if let Some(orden) = media.orden {
            form = form.text("orden", orden.to_string());
        }

        let response = self
            .client
            .post(self.url(&format!("/situaciones/{situacion_id}/multimedia")))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .map_err(|error| Error::Network(error.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Server {
                status: status.as_u16(),
                message: parse_api_error(status, &body),
            });
        }
        Ok(())
    }

    async fn arbitration_status(&self, conflicto_id: i64) -> Result<ArbitrationStatus> {
        let token = self.token()?;
        let response = self
            .client
            .get(self.url(&format!("/situaciones/conflictos/{conflicto_id}")))
            .bearer_auth(token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|error| Error::Network(error.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Server {
                status: status.as_u16(),
                message: parse_api_error(status, &body),
            });
        }

        response
            .json::<ArbitrationStatus>()
            .await
            .map_err(|error| Error::Network(error.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.error.or(payload.message) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    let base_url = raw.trim();
    if base_url.is_empty() {
        return Err(Error::InvalidInput(
            "API base URL must not be empty".to_string(),
        ));
    }
    if base_url.starts_with("http://") || base_url.starts_with("https://") {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "API base URL must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn normalize_base_url_rejects_invalid_values() {
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("api.example.com".to_string()).is_err());
        assert_eq!(
            normalize_base_url("https://api.example.com/".to_string()).unwrap(),
            "https://api.example.com"
        );
    }

    #[test]
    fn api_config_debug_redacts_token() {
        let config = ApiConfig::new("https://api.example.com")
            .unwrap()
            .with_token("secret-token");
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn api_config_ignores_blank_token() {
        let config = ApiConfig::new("https://api.example.com")
            .unwrap()
            .with_token("   ");
        let transport = HttpTransport::new(config).unwrap();
        assert!(matches!(transport.token(), Err(Error::NotAuthenticated)));
    }

    #[test]
    fn parse_api_error_prefers_json_message() {
        assert_eq!(
            parse_api_error(
                StatusCode::BAD_REQUEST,
                r#"{"error": "Salida no activa"}"#
            ),
            "Salida no activa (400)"
        );
        assert_eq!(
            parse_api_error(StatusCode::INTERNAL_SERVER_ERROR, ""),
            "HTTP 500"
        );
        assert_eq!(
            parse_api_error(StatusCode::BAD_GATEWAY, "upstream down"),
            "upstream down (502)"
        );
    }
}
