//! Single-slot draft store
//!
//! The device owns at most one outstanding draft; every operation here is
//! total over that slot. Writes go through SQLite so the draft survives
//! process restarts, which is the whole point of the engine.

#![allow(clippy::cast_possible_truncation)] // attachment counts are bounded by MAX_FOTOS

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{
    DraftPatch, DraftSituacion, DraftStatus, FieldDiff, MediaTipo, MultimediaRef, MAX_FOTOS,
    MAX_VIDEOS,
};

use super::connection::Database;

/// Trait for draft slot operations
pub trait DraftStore: Send + Sync {
    /// Read the outstanding draft, if any
    fn get(&self) -> Result<Option<DraftSituacion>>;

    /// Write a draft into the slot, replacing whatever was there
    fn save(&self, draft: &DraftSituacion) -> Result<()>;

    /// Apply a content patch to the outstanding draft
    fn update(&self, patch: &DraftPatch) -> Result<DraftSituacion>;

    /// Change the draft's lifecycle state
    fn set_status(&self, estado: DraftStatus) -> Result<DraftSituacion>;

    /// Discard the outstanding draft; succeeds on an empty slot
    fn delete(&self) -> Result<()>;

    /// Attach a multimedia reference, enforcing per-kind limits
    fn add_multimedia(&self, media: MultimediaRef) -> Result<DraftSituacion>;

    /// Detach the multimedia reference with the given uri, renumbering photos
    fn remove_multimedia(&self, uri: &str) -> Result<DraftSituacion>;

    /// Record a server-reported collision and move to `CONFLICTO`
    fn set_conflict(
        &self,
        situacion_existente: Value,
        diferencias: Vec<FieldDiff>,
    ) -> Result<DraftSituacion>;

    /// Record the arbitration ticket and move to `ESPERANDO_ARBITRAJE`
    fn set_waiting_arbitration(&self, conflicto_id: i64) -> Result<DraftSituacion>;
}

/// `SQLite` implementation of `DraftStore`
pub struct SqliteDraftStore {
    db: Mutex<Database>,
}

impl SqliteDraftStore {
    /// Open a durable store at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            db: Mutex::new(Database::open(path)?),
        })
    }

    /// Open an in-memory store (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            db: Mutex::new(Database::open_in_memory()?),
        })
    }

    fn db(&self) -> Result<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|_| Error::Database("connection mutex poisoned".to_string()))
    }

    fn write(&self, draft: &DraftSituacion) -> Result<()> {
        let payload = serde_json::to_string(draft)?;
        let db = self.db()?;
        db.connection().execute(
            "INSERT OR REPLACE INTO draft_slot (slot, id, estado, payload, created_at, updated_at)
             VALUES (0, ?, ?, ?, ?, ?)",
            params![
                draft.id.as_str(),
                draft.estado.as_str(),
                payload,
                draft.created_at,
                draft.updated_at
            ],
        )?;
        Ok(())
    }

    /// Read-modify-write on the slot, refreshing `updated_at`
    fn modify<F>(&self, apply: F) -> Result<DraftSituacion>
    where
        F: FnOnce(&mut DraftSituacion) -> Result<()>,
    {
        let mut draft = self.get()?.ok_or(Error::NoDraft)?;
        apply(&mut draft)?;
        draft.updated_at = Utc::now().to_rfc3339();
        self.write(&draft)?;
        Ok(draft)
    }
}

impl DraftStore for SqliteDraftStore {
    fn get(&self) -> Result<Option<DraftSituacion>> {
        let payload: Option<String> = {
            let db = self.db()?;
            db.connection()
                .query_row("SELECT payload FROM draft_slot WHERE slot = 0", [], |row| {
                    row.get(0)
                })
                .optional()?
        };

        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn save(&self, draft: &DraftSituacion) -> Result<()> {
        self.write(draft)?;
        tracing::debug!(id = %draft.id, tipo = %draft.tipo_situacion, "draft saved");
        Ok(())
    }

    fn update(&self, patch: &DraftPatch) -> Result<DraftSituacion> {
        self.modify(|draft| {
            patch.apply(draft);
            Ok(())
        })
    }

    fn set_status(&self, estado: DraftStatus) -> Result<DraftSituacion> {
        self.modify(|draft| {
            draft.estado = estado;
            Ok(())
        })
    }

    fn delete(&self) -> Result<()> {
        let db = self.db()?;
        let removed = db
            .connection()
            .execute("DELETE FROM draft_slot WHERE slot = 0", [])?;
        if removed > 0 {
            tracing::debug!("draft slot cleared");
        }
        Ok(())
    }

    fn add_multimedia(&self, mut media: MultimediaRef) -> Result<DraftSituacion> {
        self.modify(|draft| {
            let fotos = draft
                .multimedia
                .iter()
                .filter(|m| m.tipo == MediaTipo::Foto)
                .count();
            let videos = draft.multimedia.len() - fotos;

            match media.tipo {
                MediaTipo::Foto if fotos >= MAX_FOTOS => Err(Error::InvalidInput(format!(
                    "Limite de {MAX_FOTOS} fotos alcanzado"
                ))),
                MediaTipo::Video if videos >= MAX_VIDEOS => Err(Error::InvalidInput(format!(
                    "Limite de {MAX_VIDEOS} video alcanzado"
                ))),
                _ => {
                    if media.tipo == MediaTipo::Foto {
                        media.orden = Some(fotos as u32 + 1);
                    }
                    draft.multimedia.push(media);
                    Ok(())
                }
            }
        })
    }

    fn remove_multimedia(&self, uri: &str) -> Result<DraftSituacion> {
        self.modify(|draft| {
            draft.multimedia.retain(|m| m.uri != uri);

            let mut orden = 1u32;
            for media in &mut draft.multimedia {
                if media.tipo == MediaTipo::Foto {
                    media.orden = Some(orden);
                    orden += 1;
                }
            }
            Ok(())
        })
    }

    fn set_conflict(
        &self,
        situacion_existente: Value,
        diferencias: Vec<FieldDiff>,
    ) -> Result<DraftSituacion> {
        self.modify(|draft| {
            draft.estado = DraftStatus::Conflicto;
            draft.conflicto = Some(crate::models::ConflictoInfo {
                situacion_existente,
                diferencias,
                conflicto_id: None,
            });
            Ok(())
        })
    }

    fn set_waiting_arbitration(&self, conflicto_id: i64) -> Result<DraftSituacion> {
        self.modify(|draft| {
            let Some(conflicto) = draft.conflicto.as_mut() else {
                return Err(Error::InvalidInput(
                    "draft has no conflict to arbitrate".to_string(),
                ));
            };
            conflicto.conflicto_id = Some(conflicto_id);
            draft.estado = DraftStatus::EsperandoArbitraje;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sample_draft;
    use pretty_assertions::assert_eq;

    fn setup() -> SqliteDraftStore {
        SqliteDraftStore::open_in_memory().unwrap()
    }

    #[test]
    fn empty_slot_reads_none() {
        let store = setup();
        assert_eq!(store.get().unwrap(), None);
    }

    #[test]
    fn save_and_get_roundtrip() {
        let store = setup();
        let draft = sample_draft();
        store.save(&draft).unwrap();

        let fetched = store.get().unwrap().unwrap();
        assert_eq!(fetched, draft);
    }

    #[test]
    fn save_replaces_the_single_slot() {
        let store = setup();
        let first = sample_draft();
        store.save(&first).unwrap();

        let mut second = sample_draft();
        second.id = "20260122-1-030-70-86-12-1".parse().unwrap();
        store.save(&second).unwrap();

        let fetched = store.get().unwrap().unwrap();
        assert_eq!(fetched.id, second.id);

        let rows: i64 = {
            let db = store.db().unwrap();
            db.connection()
                .query_row("SELECT COUNT(*) FROM draft_slot", [], |row| row.get(0))
                .unwrap()
        };
        assert_eq!(rows, 1);
    }

    #[test]
    fn update_applies_patch_and_refreshes_updated_at() {
        let store = setup();
        store.save(&sample_draft()).unwrap();

        let patch = DraftPatch {
            km: Some(61.0),
            ..DraftPatch::default()
        };
        let updated = store.update(&patch).unwrap();
        assert_eq!(updated.km, 61.0);
        assert_ne!(updated.updated_at, sample_draft().updated_at);
        // Identity untouched
        assert_eq!(updated.id, sample_draft().id);
    }

    #[test]
    fn update_without_draft_is_no_draft_error() {
        let store = setup();
        let result = store.update(&DraftPatch::default());
        assert!(matches!(result, Err(Error::NoDraft)));

        let result = store.set_status(DraftStatus::Pendiente);
        assert!(matches!(result, Err(Error::NoDraft)));
    }

    #[test]
    fn delete_clears_and_tolerates_empty_slot() {
        let store = setup();
        store.save(&sample_draft()).unwrap();
        store.delete().unwrap();
        assert_eq!(store.get().unwrap(), None);

        // Deleting again is fine
        store.delete().unwrap();
    }

    #[test]
    fn add_multimedia_enforces_limits_and_orders_photos() {
        let store = setup();
        store.save(&sample_draft()).unwrap();

        for n in 1..=3u32 {
            let draft = store
                .add_multimedia(
                    MultimediaRef::new(MediaTipo::Foto, format!("file:///f{n}.jpg")).unwrap(),
                )
                .unwrap();
            assert_eq!(draft.multimedia.last().unwrap().orden, Some(n));
        }

        let overflow = store
            .add_multimedia(MultimediaRef::new(MediaTipo::Foto, "file:///f4.jpg").unwrap());
        assert!(matches!(overflow, Err(Error::InvalidInput(_))));

        store
            .add_multimedia(MultimediaRef::new(MediaTipo::Video, "file:///v.mp4").unwrap())
            .unwrap();
        let second_video = store
            .add_multimedia(MultimediaRef::new(MediaTipo::Video, "file:///v2.mp4").unwrap());
        assert!(matches!(second_video, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn remove_multimedia_renumbers_remaining_photos() {
        let store = setup();
        store.save(&sample_draft()).unwrap();
        for n in 1..=3u32 {
            store
                .add_multimedia(
                    MultimediaRef::new(MediaTipo::Foto, format!("file:///f{n}.jpg")).unwrap(),
                )
                .unwrap();
        }

        let draft = store.remove_multimedia("file:///f1.jpg").unwrap();
        let ordenes: Vec<Option<u32>> = draft.multimedia.iter().map(|m| m.orden).collect();
        assert_eq!(ordenes, vec![Some(1), Some(2)]);
        assert_eq!(draft.multimedia[0].uri, "file:///f2.jpg");
    }

    #[test]
    fn set_conflict_persists_diffs() {
        let store = setup();
        store.save(&sample_draft()).unwrap();

        let diffs = vec![FieldDiff {
            campo: "km".to_string(),
            local: serde_json::json!(50.7),
            servidor: serde_json::json!(49.0),
        }];
        let draft = store
            .set_conflict(serde_json::json!({"id": 77}), diffs.clone())
            .unwrap();

        assert_eq!(draft.estado, DraftStatus::Conflicto);
        let conflicto = draft.conflicto.unwrap();
        assert_eq!(conflicto.diferencias, diffs);
        assert_eq!(conflicto.existing_record_id(), Some(77));
        assert_eq!(conflicto.conflicto_id, None);
    }

    #[test]
    fn set_waiting_arbitration_requires_conflict() {
        let store = setup();
        store.save(&sample_draft()).unwrap();

        assert!(matches!(
            store.set_waiting_arbitration(5),
            Err(Error::InvalidInput(_))
        ));

        store
            .set_conflict(serde_json::json!({"id": 77}), vec![])
            .unwrap();
        let draft = store.set_waiting_arbitration(5).unwrap();
        assert_eq!(draft.estado, DraftStatus::EsperandoArbitraje);
        assert_eq!(draft.conflicto.unwrap().conflicto_id, Some(5));
    }

    #[test]
    fn draft_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigia.db");

        {
            let store = SqliteDraftStore::open(&path).unwrap();
            store.save(&sample_draft()).unwrap();
        }

        let store = SqliteDraftStore::open(&path).unwrap();
        let fetched = store.get().unwrap().unwrap();
        assert_eq!(fetched.id, sample_draft().id);
    }
}
