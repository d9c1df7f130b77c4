//! Vigia CLI - Field-side interface for situation drafts
//!
//! Capture a report while disconnected, submit it exactly once, resolve
//! conflicts. One outstanding draft per device.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use thiserror::Error;
use vigia_core::api::{ApiConfig, HttpTransport};
use vigia_core::db::SqliteDraftStore;
use vigia_core::draft::{connectivity_channel, DraftService, SubmitOutcome};
use vigia_core::models::{
    DraftPatch, DraftSituacion, MediaTipo, MultimediaRef, NewDraftParams, TipoSituacion,
};

/// Development default; production builds ship VIGIA_API_URL
const DEFAULT_API_URL: &str = "http://localhost:3000/api";

#[derive(Parser)]
#[command(name = "vigia")]
#[command(about = "Capture and submit situation reports from the field")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    db_path: Option<PathBuf>,

    /// Treat the device as offline (submissions are kept for retry)
    #[arg(long, global = true)]
    offline: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the outstanding draft
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start a new draft (reserves a sequence number from the server)
    New {
        /// Situation type
        #[arg(long, value_enum)]
        tipo: TipoArg,
        /// Catalog id of the situation type
        #[arg(long)]
        tipo_id: i64,
        /// Unit code, e.g. 030 or M007
        #[arg(long)]
        unidad: String,
        /// Route catalog id
        #[arg(long)]
        ruta: i64,
        /// Route display name
        #[arg(long)]
        ruta_nombre: Option<String>,
        /// Kilometer marker
        #[arg(long)]
        km: f64,
        /// Direction of travel
        #[arg(long)]
        sentido: String,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
    },
    /// Edit report content on the outstanding draft
    Edit {
        #[arg(long)]
        km: Option<f64>,
        #[arg(long)]
        sentido: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        lat: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        lon: Option<f64>,
        #[arg(long)]
        descripcion: Option<String>,
        #[arg(long)]
        observaciones: Option<String>,
    },
    /// Attach or detach multimedia
    Media {
        #[command(subcommand)]
        command: MediaCommands,
    },
    /// Submit the draft to the server
    Send,
    /// Retry a failed submission
    Retry,
    /// Resolve a reported conflict
    Resolve {
        #[command(subcommand)]
        command: ResolveCommands,
    },
    /// Discard the outstanding draft
    Cancel,
}

#[derive(Subcommand)]
enum MediaCommands {
    /// Attach a local photo or video file
    Add {
        #[arg(value_enum)]
        tipo: MediaArg,
        /// Local file path or file:// uri
        uri: String,
    },
    /// Detach the attachment with the given uri
    Remove { uri: String },
}

#[derive(Subcommand)]
enum ResolveCommands {
    /// Overwrite the server record with the local draft
    Local,
    /// Keep the server record and discard the local draft
    Server {
        /// Required confirmation: local data will be lost
        #[arg(long)]
        yes: bool,
    },
    /// Escalate both versions for arbitration
    Escalate,
    /// Poll the arbitration ticket
    Check,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum TipoArg {
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

impl From<TipoArg> for TipoSituacion {
    fn from(tipo: TipoArg) -> Self {
        match tipo {
            TipoArg::Patrullaje => Self::Patrullaje,
            TipoArg::HechoTransito => Self::HechoTransito,
            TipoArg::AsistenciaVehicular => Self::AsistenciaVehicular,
            TipoArg::Emergencia => Self::Emergencia,
            TipoArg::RegulacionTrafico => Self::RegulacionTrafico,
            TipoArg::ParadaEstrategica => Self::ParadaEstrategica,
            TipoArg::CambioRuta => Self::CambioRuta,
            TipoArg::Comida => Self::Comida,
            TipoArg::Descanso => Self::Descanso,
            TipoArg::Otros => Self::Otros,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum MediaArg {
    Foto,
    Video,
}

impl From<MediaArg> for MediaTipo {
    fn from(tipo: MediaArg) -> Self {
        match tipo {
            MediaArg::Foto => Self::Foto,
            MediaArg::Video => Self::Video,
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] vigia_core::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Use --yes to confirm discarding the local draft")]
    ServerResolutionNotConfirmed,
}

type Service = DraftService<SqliteDraftStore, HttpTransport>;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vigia=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path.clone());
    tracing::debug!(db = %db_path.display(), offline = cli.offline, "opening local store");

    let store = Arc::new(SqliteDraftStore::open(&db_path)?);
    let transport = Arc::new(HttpTransport::new(api_config_from_env()?)?);
    let (_connectivity, online) = connectivity_channel(!cli.offline);
    let service = DraftService::new(store, transport, online)?;

    match cli.command {
        Commands::Status { json } => run_status(&service, json)?,
        Commands::New {
            tipo,
            tipo_id,
            unidad,
            ruta,
            ruta_nombre,
            km,
            sentido,
            lat,
            lon,
        } => {
            let draft = service
                .create_draft(NewDraftParams {
                    tipo_situacion: tipo.into(),
                    tipo_situacion_id: tipo_id,
                    unidad_codigo: unidad,
                    ruta_id: ruta,
                    ruta_nombre,
                    km,
                    sentido,
                    latitud: lat,
                    longitud: lon,
                })
                .await?;
            println!("{}", draft.id);
            println!("{}", draft.id.legible());
        }
        Commands::Edit {
            km,
            sentido,
            lat,
            lon,
            descripcion,
            observaciones,
        } => {
            let patch = DraftPatch {
                km,
                sentido,
                latitud: lat,
                longitud: lon,
                descripcion,
                observaciones,
            };
            // The CLI exits right away, so saves are always immediate
            service.update_draft(patch, true)?;
            println!("Draft actualizado");
        }
        Commands::Media { command } => match command {
            MediaCommands::Add { tipo, uri } => {
                let draft = service.add_multimedia(MultimediaRef::new(tipo.into(), uri)?)?;
                println!("{} adjuntos", draft.multimedia.len());
            }
            MediaCommands::Remove { uri } => {
                let draft = service.remove_multimedia(&uri)?;
                println!("{} adjuntos", draft.multimedia.len());
            }
        },
        Commands::Send => report_outcome(service.submit().await?),
        Commands::Retry => report_outcome(service.retry().await?),
        Commands::Resolve { command } => match command {
            ResolveCommands::Local => {
                service.resolve_use_local().await?;
                println!("Servidor actualizado con los datos locales");
            }
            ResolveCommands::Server { yes } => {
                if !yes {
                    return Err(CliError::ServerResolutionNotConfirmed);
                }
                service.resolve_use_server()?;
                println!("Draft local descartado; se conservan los datos del servidor");
            }
            ResolveCommands::Escalate => {
                let ticket = service.resolve_escalate().await?;
                println!("Conflicto escalado, ticket {ticket}");
            }
            ResolveCommands::Check => {
                let status = service.check_arbitration().await?;
                if status.is_resolved() {
                    println!(
                        "Arbitraje resuelto ({}); draft liberado",
                        status.resolucion.as_deref().unwrap_or("sin detalle")
                    );
                } else {
                    println!("Arbitraje pendiente");
                }
            }
        },
        Commands::Cancel => {
            service.delete_draft()?;
            println!("Draft eliminado");
        }
    }

    Ok(())
}

fn run_status(service: &Service, as_json: bool) -> Result<(), CliError> {
    let snapshot = service.snapshot();
    let Some(draft) = snapshot.draft else {
        println!("No hay draft pendiente");
        return Ok(());
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&draft)?);
    } else {
        for line in format_status_lines(&draft, service.draft_info()?.map(|info| info.elapsed)) {
            println!("{line}");
        }
    }
    Ok(())
}

fn format_status_lines(draft: &DraftSituacion, elapsed: Option<String>) -> Vec<String> {
    let mut lines = vec![
        format!("{}", draft.id),
        draft.id.legible(),
        format!("Tipo:     {}", draft.tipo_situacion),
        format!("Estado:   {}", draft.estado),
        format!("Adjuntos: {}", draft.multimedia.len()),
    ];
    if let Some(elapsed) = elapsed {
        lines.push(format!("Creado hace {elapsed}"));
    }
    if let Some(conflicto) = &draft.conflicto {
        lines.push(format!(
            "Conflicto: {} diferencias",
            conflicto.diferencias.len()
        ));
    }
    lines
}

fn report_outcome(outcome: SubmitOutcome) {
    match outcome {
        SubmitOutcome::Accepted {
            situacion_id,
            numero_situacion,
        } => println!("Enviado: situacion {situacion_id} ({numero_situacion})"),
        SubmitOutcome::Offline { message } | SubmitOutcome::Rejected { message } => {
            println!("{message}");
        }
        SubmitOutcome::Conflict(conflicto) => {
            println!(
                "Conflicto: el servidor ya tiene este reporte con {} diferencias",
                conflicto.diferencias.len()
            );
            for diff in &conflicto.diferencias {
                println!("  {}: local={} servidor={}", diff.campo, diff.local, diff.servidor);
            }
            println!("Resuelve con `vigia resolve local|server|escalate`");
        }
    }
}

fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("VIGIA_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("vigia.db"))
}

fn api_config_from_env() -> Result<ApiConfig, vigia_core::Error> {
    let base_url = env::var("VIGIA_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
    let mut config = ApiConfig::new(base_url)?;
    if let Ok(token) = env::var("VIGIA_TOKEN") {
        config = config.with_token(token);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use vigia_core::models::{DraftStatus, FieldDiff};

    fn sample_draft() -> DraftSituacion {
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
            ruta_nombre: None,
            km: 50.7,
            sentido: "NORTE".to_string(),
            latitud: 14.62,
            longitud: -90.51,
            descripcion: None,
            observaciones: None,
            multimedia: vec![],
            estado: DraftStatus::Pendiente,
            conflicto: None,
            created_at: "2026-01-21T10:00:00+00:00".to_string(),
            updated_at: "2026-01-21T10:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn resolve_db_path_prefers_cli_argument() {
        let path = resolve_db_path(Some(PathBuf::from("/tmp/custom.db")));
        assert_eq!(path, PathBuf::from("/tmp/custom.db"));
    }

    #[test]
    fn tipo_arg_maps_to_core_type() {
        assert_eq!(
            TipoSituacion::from(TipoArg::AsistenciaVehicular),
            TipoSituacion::AsistenciaVehicular
        );
        assert_eq!(MediaTipo::from(MediaArg::Video), MediaTipo::Video);
    }

    #[test]
    fn status_lines_cover_identity_and_state() {
        let lines = format_status_lines(&sample_draft(), Some("5 minutos".to_string()));
        assert_eq!(lines[0], "20260121-1-030-70-86-50-4");
        assert!(lines.iter().any(|line| line.contains("HECHO_TRANSITO")));
        assert!(lines.iter().any(|line| line.contains("PENDIENTE")));
        assert!(lines.iter().any(|line| line.contains("hace 5 minutos")));
    }

    #[test]
    fn status_lines_mention_conflict_diffs() {
        let mut draft = sample_draft();
        draft.estado = DraftStatus::Conflicto;
        draft.conflicto = Some(vigia_core::models::ConflictoInfo {
            situacion_existente: serde_json::json!({"id": 31}),
            diferencias: vec![FieldDiff {
                campo: "km".to_string(),
                local: serde_json::json!(50.7),
                servidor: serde_json::json!(49.0),
            }],
            conflicto_id: None,
        });

        let lines = format_status_lines(&draft, None);
        assert!(lines.iter().any(|line| line.contains("1 diferencias")));
    }
}
