//! vigia-core - Core library for Vigia
//!
//! This crate contains the offline-first situation-draft engine shared by
//! all Vigia surfaces: deterministic identifiers, the single-slot local
//! draft store, the submission transport, and the draft lifecycle
//! controller with its three-way conflict resolution protocol.

pub mod api;
pub mod db;
pub mod draft;
pub mod error;
pub mod models;

pub use error::{Error, Result};
pub use models::{DraftSituacion, DraftStatus, SituacionId, TipoSituacion};
