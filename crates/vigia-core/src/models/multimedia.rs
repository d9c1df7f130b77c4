//! Multimedia attachment references
//!
//! Attachments live on the device until the situation is accepted by the
//! server; only then are they uploaded, one call per item, best-effort.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum photos per situation
pub const MAX_FOTOS: usize = 3;
/// Maximum videos per situation
pub const MAX_VIDEOS: usize = 1;

/// Attachment kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaTipo {
    Foto,
    Video,
}

impl MediaTipo {
    /// Wire name used in form fields
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Foto => "FOTO",
            Self::Video => "VIDEO",
        }
    }

    /// MIME type of the captured file
    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Foto => "image/jpeg",
            Self::Video => "video/mp4",
        }
    }
}

/// Upload progress for one attachment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadState {
    #[default]
    Pendiente,
    Subida,
    Fallida,
}

/// Reference to a locally captured attachment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultimediaRef {
    pub tipo: MediaTipo,
    /// Local file URI, unique within the draft
    pub uri: String,
    /// Display position, photos only (1, 2, 3)
    #[serde(default)]
    pub orden: Option<u32>,
    #[serde(default)]
    pub latitud: Option<f64>,
    #[serde(default)]
    pub longitud: Option<f64>,
    /// Videos only
    #[serde(default)]
    pub duracion_segundos: Option<u32>,
    #[serde(default)]
    pub subida: UploadState,
}

impl MultimediaRef {
    /// Create a new attachment reference
    pub fn new(tipo: MediaTipo, uri: impl Into<String>) -> Result<Self> {
        let uri = uri.into().trim().to_string();
        if uri.is_empty() {
            return Err(Error::InvalidInput(
                "multimedia uri cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            tipo,
            uri,
            orden: None,
            latitud: None,
            longitud: None,
            duracion_segundos: None,
            subida: UploadState::Pendiente,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_trims_and_rejects_empty_uri() {
        let media = MultimediaRef::new(MediaTipo::Foto, "  file:///a.jpg  ").unwrap();
        assert_eq!(media.uri, "file:///a.jpg");
        assert_eq!(media.subida, UploadState::Pendiente);

        assert!(MultimediaRef::new(MediaTipo::Video, "   ").is_err());
    }

    #[test]
    fn tipo_serializes_to_wire_names() {
        assert_eq!(
            serde_json::to_value(MediaTipo::Foto).unwrap(),
            serde_json::json!("FOTO")
        );
        assert_eq!(MediaTipo::Video.as_str(), "VIDEO");
        assert_eq!(MediaTipo::Foto.mime_type(), "image/jpeg");
    }
}
