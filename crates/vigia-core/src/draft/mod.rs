//! Draft lifecycle controller
//!
//! Orchestrates the single outstanding draft: creation against a server
//! reservation, debounced auto-save, exactly-once submission with the
//! deterministic id as idempotency token, and the three-way conflict
//! resolution protocol. The UI subscribes to state snapshots; it never
//! touches the store directly.

mod connectivity;

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::api::{
    ArbitrationStatus, EscalationRequest, SubmitResponse, SubmissionTransport,
};
use crate::db::DraftStore;
use crate::error::{Error, Result};
use crate::models::situacion_id::{self, IdParams};
use crate::models::{
    elapsed_phrase, ConflictoInfo, DraftPatch, DraftSituacion, DraftStatus, MultimediaRef,
    NewDraftParams, TipoSituacion,
};

pub use connectivity::{connectivity_channel, ConnectivityHandle};

/// Debounce window for auto-save
const AUTOSAVE_DEBOUNCE: Duration = Duration::from_millis(500);

/// Message returned when a submission could not leave the device
const OFFLINE_MESSAGE: &str = "Sin conexion. Draft guardado localmente.";

/// Reason recorded on the server when the user keeps local data
const USE_LOCAL_REASON: &str = "Datos locales seleccionados por usuario";

const TIPO_CONFLICTO_DUPLICADO: &str = "DUPLICADO";

/// State published to subscribers on every transition
#[derive(Debug, Clone, Default)]
pub struct DraftSnapshot {
    pub draft: Option<DraftSituacion>,
    /// A submission is in flight
    pub sending: bool,
    pub online: bool,
}

/// Summary of the outstanding draft for UI banners
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftInfo {
    pub tipo: TipoSituacion,
    pub estado: DraftStatus,
    pub elapsed: String,
}

/// Answer to "can I start a new report?"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateCheck {
    pub allowed: bool,
    pub reason: Option<String>,
    pub draft_info: Option<DraftInfo>,
}

/// Outcome of a submission attempt
///
/// Connectivity and server failures are values, never errors: the draft is
/// preserved, `estado` moves to `PENDIENTE`, and the caller gets a message
/// for the user instead of an exception to catch.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The server accepted the situation; the local draft is gone
    Accepted {
        situacion_id: i64,
        numero_situacion: String,
    },
    /// Offline or the transport failed; draft kept for manual retry
    Offline { message: String },
    /// Non-conflict server rejection; draft kept for manual retry
    Rejected { message: String },
    /// Id collision; the user must pick a resolution
    Conflict(ConflictoInfo),
}

/// The draft lifecycle controller
///
/// Generic over the store and the transport so tests can script the server
/// side. One instance per app session; drop aborts any pending auto-save.
pub struct DraftService<S, T> {
    store: Arc<S>,
    transport: Arc<T>,
    online: watch::Receiver<bool>,
    snapshot: watch::Sender<DraftSnapshot>,
    autosave: StdMutex<Option<JoinHandle<()>>>,
    /// In-flight guard: `ENVIANDO` is advisory state, this is the lock
    submit_gate: Mutex<()>,
    debounce: Duration,
}

impl<S, T> DraftService<S, T> {
    /// Current state without subscribing
    #[must_use]
    pub fn snapshot(&self) -> DraftSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to state transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DraftSnapshot> {
        self.snapshot.subscribe()
    }

    /// Current connectivity flag
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    fn publish(&self, draft: Option<DraftSituacion>, sending: bool) {
        let online = *self.online.borrow();
        self.snapshot.send_modify(|state| {
            state.draft = draft;
            state.sending = sending;
            state.online = online;
        });
    }

    fn cancel_autosave(&self) {
        if let Ok(mut slot) = self.autosave.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

impl<S, T> Drop for DraftService<S, T> {
    fn drop(&mut self) {
        // No write may land after the owner believes saving has stopped
        self.cancel_autosave();
    }
}

impl<S, T> DraftService<S, T>
where
    S: DraftStore + 'static,
    T: SubmissionTransport,
{
    /// Build a controller over an opened store and transport
    pub fn new(store: Arc<S>, transport: Arc<T>, online: watch::Receiver<bool>) -> Result<Self> {
        let initial = DraftSnapshot {
            draft: store.get()?,
            sending: false,
            online: *online.borrow(),
        };
        let (snapshot, _) = watch::channel(initial);

        Ok(Self {
            store,
            transport,
            online,
            snapshot,
            autosave: StdMutex::new(None),
            submit_gate: Mutex::new(()),
            debounce: AUTOSAVE_DEBOUNCE,
        })
    }

    /// Whether a new report may be started; allowed iff the slot is empty
    pub fn can_create_new(&self) -> Result<CreateCheck> {
        let Some(draft) = self.store.get()? else {
            return Ok(CreateCheck {
                allowed: true,
                reason: None,
                draft_info: None,
            });
        };

        let elapsed = elapsed_phrase(draft.minutes_since_creation(Utc::now()));
        Ok(CreateCheck {
            allowed: false,
            reason: Some(format!(
                "Tienes {} sin enviar desde hace {}",
                draft.tipo_situacion, elapsed
            )),
            draft_info: Some(DraftInfo {
                tipo: draft.tipo_situacion,
                estado: draft.estado,
                elapsed,
            }),
        })
    }

    /// Summary of the outstanding draft, if any
    pub fn draft_info(&self) -> Result<Option<DraftInfo>> {
        Ok(self.store.get()?.map(|draft| DraftInfo {
            tipo: draft.tipo_situacion,
            estado: draft.estado,
            elapsed: elapsed_phrase(draft.minutes_since_creation(Utc::now())),
        }))
    }

    /// Create a new draft after reserving a sequence number
    ///
    /// An outstanding draft of the same type is reused instead of
    /// duplicated; a different-typed one blocks with `DraftTypeBlocked`.
    pub async fn create_draft(&self, params: NewDraftParams) -> Result<DraftSituacion> {
        let check = self.can_create_new()?;
        if !check.allowed {
            let existing = self.store.get()?.ok_or(Error::NoDraft)?;
            if existing.tipo_situacion == params.tipo_situacion {
                tracing::info!(id = %existing.id, "reusing outstanding draft of the same type");
                return Ok(existing);
            }
            return Err(Error::DraftTypeBlocked {
                tipo: existing.tipo_situacion.as_str().to_string(),
                reason: check.reason.unwrap_or_default(),
            });
        }

        let reservation = self.transport.reserve(&params.unidad_codigo).await?;
        if let Some(deadline) = reservation.expires_at() {
            if deadline <= Utc::now() {
                tracing::warn!(
                    %deadline,
                    "reservation expired on receipt; the sequence number may already be recycled"
                );
            }
        }

        // Identity is fixed here, once; content edits never re-derive it
        let id = situacion_id::generate(&IdParams {
            fecha: reservation.fecha_date()?,
            sede_id: reservation.sede_id,
            unidad_codigo: reservation.unidad_codigo.clone(),
            tipo_situacion_id: params.tipo_situacion_id,
            ruta_id: params.ruta_id,
            km: params.km,
            num_situacion_salida: reservation.num_situacion_salida,
        })?;

        let now = Utc::now().to_rfc3339();
        let draft = DraftSituacion {
            id,
            num_situacion_salida: reservation.num_situacion_salida,
            fecha: reservation.fecha,
            sede_id: reservation.sede_id,
            unidad_id: reservation.unidad_id,
            unidad_codigo: reservation.unidad_codigo,
            salida_id: reservation.salida_id,
            tipo_situacion: params.tipo_situacion,
            tipo_situacion_id: params.tipo_situacion_id,
            ruta_id: params.ruta_id,
            ruta_nombre: params.ruta_nombre,
            km: params.km,
            sentido: params.sentido,
            latitud: params.latitud,
            longitud: params.longitud,
            descripcion: None,
            observaciones: None,
            multimedia: vec![],
            estado: DraftStatus::Draft,
            conflicto: None,
            created_at: now.clone(),
            updated_at: now,
        };

        self.store.save(&draft)?;
        self.publish(Some(draft.clone()), false);
        tracing::info!(id = %draft.id, tipo = %draft.tipo_situacion, "draft created");
        Ok(draft)
    }

    /// Apply a content patch, debounced unless `immediate`
    ///
    /// Each call cancels and replaces the pending save; dropping the
    /// controller cancels it too.
    pub fn update_draft(&self, patch: DraftPatch, immediate: bool) -> Result<()> {
        self.cancel_autosave();

        if patch.is_empty() {
            return Ok(());
        }

        if immediate {
            let updated = self.store.update(&patch)?;
            self.publish(Some(updated), false);
            return Ok(());
        }

        let store = Arc::clone(&self.store);
        let snapshot = self.snapshot.clone();
        let delay = self.debounce;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match store.update(&patch) {
                Ok(updated) => snapshot.send_modify(|state| state.draft = Some(updated)),
                Err(Error::NoDraft) => {
                    tracing::debug!("debounced save skipped; draft slot already empty");
                }
                Err(error) => tracing::warn!(%error, "debounced save failed"),
            }
        });

        if let Ok(mut slot) = self.autosave.lock() {
            *slot = Some(handle);
        }
        Ok(())
    }

    /// Attach a multimedia reference to the outstanding draft
    pub fn add_multimedia(&self, media: MultimediaRef) -> Result<DraftSituacion> {
        let updated = self.store.add_multimedia(media)?;
        self.publish(Some(updated.clone()), false);
        Ok(updated)
    }

    /// Detach a multimedia reference by uri
    pub fn remove_multimedia(&self, uri: &str) -> Result<DraftSituacion> {
        let updated = self.store.remove_multimedia(uri)?;
        self.publish(Some(updated.clone()), false);
        Ok(updated)
    }

    /// Submit the outstanding draft to the authoritative server
    pub async fn submit(&self) -> Result<SubmitOutcome> {
        let _in_flight = self.submit_gate.lock().await;
        self.submit_locked().await
    }

    /// Retry a failed submission; identical to [`submit`](Self::submit)
    ///
    /// The draft's id is unchanged since creation, so the retry carries the
    /// same `Idempotency-Key` and cannot duplicate the record.
    pub async fn retry(&self) -> Result<SubmitOutcome> {
        let _in_flight = self.submit_gate.lock().await;
        self.submit_locked().await
    }

    async fn submit_locked(&self) -> Result<SubmitOutcome> {
        // Never trust a stale in-memory reference
        let draft = self.store.get()?.ok_or(Error::NoDraft)?;

        if !*self.online.borrow() {
            let updated = self.store.set_status(DraftStatus::Pendiente)?;
            self.publish(Some(updated), false);
            tracing::info!(id = %draft.id, "offline; draft kept for manual retry");
            return Ok(SubmitOutcome::Offline {
                message: OFFLINE_MESSAGE.to_string(),
            });
        }

        let draft = self.store.set_status(DraftStatus::Enviando)?;
        self.publish(Some(draft.clone()), true);

        match self.transport.submit(&draft).await {
            Ok(SubmitResponse::Created {
                situacion_id,
                numero_situacion,
            }) => {
                self.upload_attachments(situacion_id, &draft).await;
                self.store.delete()?;
                self.publish(None, false);
                tracing::info!(id = %draft.id, situacion_id, "situation accepted by the server");
                Ok(SubmitOutcome::Accepted {
                    situacion_id,
                    numero_situacion,
                })
            }
            Ok(SubmitResponse::Conflict(payload)) => {
                let updated = self
                    .store
                    .set_conflict(payload.situacion_existente, payload.diferencias)?;
                self.publish(Some(updated.clone()), false);
                tracing::warn!(id = %draft.id, "server reported an id collision");
                let conflicto = updated
                    .conflicto
                    .ok_or_else(|| Error::Database("conflict was not persisted".to_string()))?;
                Ok(SubmitOutcome::Conflict(conflicto))
            }
            Err(Error::Server { status, message }) => {
                let updated = self.store.set_status(DraftStatus::Pendiente)?;
                self.publish(Some(updated), false);
                tracing::warn!(id = %draft.id, status, %message, "submission rejected; draft kept");
                Ok(SubmitOutcome::Rejected { message })
            }
            Err(Error::Network(message)) => {
                let updated = self.store.set_status(DraftStatus::Pendiente)?;
                self.publish(Some(updated), false);
                tracing::warn!(id = %draft.id, %message, "network failure; draft kept");
                Ok(SubmitOutcome::Offline {
                    message: OFFLINE_MESSAGE.to_string(),
                })
            }
            Err(error) => {
                // ENVIANDO must not survive any outcome
                let updated = self.store.set_status(DraftStatus::Pendiente)?;
                self.publish(Some(updated), false);
                Err(error)
            }
        }
    }

    /// Best-effort sequential upload; a failed item is logged and skipped
    async fn upload_attachments(&self, situacion_id: i64, draft: &DraftSituacion) {
        for media in &draft.multimedia {
            match self
                .transport
                .upload_multimedia(situacion_id, &draft.id, media)
                .await
            {
                Ok(()) => tracing::debug!(uri = %media.uri, "attachment uploaded"),
                Err(error) => {
                    tracing::warn!(uri = %media.uri, %error, "attachment upload failed; skipping");
                }
            }
        }
    }

    /// Resolve the conflict by replacing the server record with local data
    ///
    /// On failure the draft stays `CONFLICTO` and the same resolution may be
    /// retried.
    pub async fn resolve_use_local(&self) -> Result<()> {
        let _in_flight = self.submit_gate.lock().await;
        let draft = self.require_conflict()?;
        let existing_id = draft
            .conflicto
            .as_ref()
            .and_then(ConflictoInfo::existing_record_id)
            .ok_or_else(|| {
                Error::InvalidInput("conflict payload has no server record id".to_string())
            })?;

        self.transport
            .replace_existing(existing_id, &draft, USE_LOCAL_REASON)
            .await?;

        self.store.delete()?;
        self.publish(None, false);
        tracing::info!(id = %draft.id, existing_id, "conflict resolved with local data");
        Ok(())
    }

    /// Resolve the conflict by keeping the server record
    ///
    /// Discards the local draft unconditionally and makes no network call.
    /// This is the only data-loss path in the engine; callers must have an
    /// explicit user confirmation before invoking it.
    pub fn resolve_use_server(&self) -> Result<()> {
        self.cancel_autosave();
        self.store.delete()?;
        self.publish(None, false);
        tracing::info!("conflict resolved with server data; local draft discarded");
        Ok(())
    }

    /// Escalate the conflict to a human adjudicator
    ///
    /// The draft stays on the device, flagged with the arbitration ticket;
    /// custody is only released once the ticket resolves.
    pub async fn resolve_escalate(&self) -> Result<i64> {
        let _in_flight = self.submit_gate.lock().await;
        let draft = self.require_conflict()?;
        let conflicto = draft
            .conflicto
            .clone()
            .ok_or_else(|| Error::InvalidInput("draft carries no conflict data".to_string()))?;

        let request = EscalationRequest {
            codigo_situacion: draft.id.to_string(),
            datos_locales: serde_json::to_value(&draft)?,
            datos_servidor: conflicto.situacion_existente,
            diferencias: conflicto.diferencias,
            tipo_conflicto: TIPO_CONFLICTO_DUPLICADO.to_string(),
        };

        let ticket = self.transport.escalate(&request).await?;
        let updated = self.store.set_waiting_arbitration(ticket.conflicto_id)?;
        self.publish(Some(updated), false);
        tracing::info!(
            id = %draft.id,
            conflicto_id = ticket.conflicto_id,
            "conflict escalated for arbitration"
        );
        Ok(ticket.conflicto_id)
    }

    /// Poll the arbitration ticket of an escalated conflict
    ///
    /// While the ticket is pending the draft is untouched. Once the
    /// adjudicator resolves it in either direction the authoritative record
    /// is final, so local custody is released.
    pub async fn check_arbitration(&self) -> Result<ArbitrationStatus> {
        let draft = self.store.get()?.ok_or(Error::NoDraft)?;
        if draft.estado != DraftStatus::EsperandoArbitraje {
            return Err(Error::InvalidInput(format!(
                "draft is {}, not awaiting arbitration",
                draft.estado
            )));
        }
        let conflicto_id = draft
            .conflicto
            .as_ref()
            .and_then(|conflicto| conflicto.conflicto_id)
            .ok_or_else(|| Error::InvalidInput("draft has no arbitration ticket".to_string()))?;

        let status = self.transport.arbitration_status(conflicto_id).await?;
        if status.is_resolved() {
            self.store.delete()?;
            self.publish(None, false);
            tracing::info!(
                id = %draft.id,
                conflicto_id,
                resolucion = ?status.resolucion,
                "arbitration resolved; local custody released"
            );
        }
        Ok(status)
    }

    /// Discard the outstanding draft (cancellation)
    pub fn delete_draft(&self) -> Result<()> {
        self.cancel_autosave();
        self.store.delete()?;
        self.publish(None, false);
        tracing::info!("draft discarded");
        Ok(())
    }

    fn require_conflict(&self) -> Result<DraftSituacion> {
        let draft = self.store.get()?.ok_or(Error::NoDraft)?;
        if draft.estado != DraftStatus::Conflicto {
            return Err(Error::InvalidInput(format!(
                "draft is {}, not CONFLICTO",
                draft.estado
            )));
        }
        Ok(draft)
    }
}
