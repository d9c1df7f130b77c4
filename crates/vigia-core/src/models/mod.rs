//! Data models for Vigia

mod conflict;
mod draft;
mod multimedia;
pub mod situacion_id;

pub use conflict::{ConflictoInfo, FieldDiff};
#[cfg(test)]
pub(crate) use draft::sample_draft;
pub use draft::{
    elapsed_phrase, DraftPatch, DraftSituacion, DraftStatus, NewDraftParams, TipoSituacion,
};
pub use multimedia::{MediaTipo, MultimediaRef, UploadState, MAX_FOTOS, MAX_VIDEOS};
pub use situacion_id::{IdParams, SituacionId};
