//! Interfaz de línea de comandos de escalafon basada en clap.
//!
//! Define la struct [`Cli`] con los subcomandos de [`Command`] (requirements,
//! verify, submit, decide, appeal, finalize, status, retry-ledger) y las flags
//! globales (--config, --data-dir, --json, --verbose).

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::state_machine::{DecisionOutcome, ReviewStage};

/// escalafon: motor de promoción del escalafón docente.
#[derive(Debug, Parser)]
#[command(name = "escalafon", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Archivo de configuración (por defecto `escalafon.toml`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directorio de datos; tiene precedencia sobre la configuración.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Imprime los resultados como JSON.
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,

    /// Habilita salida detallada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Nivel revisor aceptado por la CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LevelArg {
    Presidente,
    TalentoHumano,
    Comision,
}

impl From<LevelArg> for ReviewStage {
    fn from(level: LevelArg) -> Self {
        match level {
            LevelArg::Presidente => ReviewStage::Presidente,
            LevelArg::TalentoHumano => ReviewStage::TalentoHumano,
            LevelArg::Comision => ReviewStage::Comision,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutcomeArg {
    Approve,
    Reject,
}

impl From<OutcomeArg> for DecisionOutcome {
    fn from(outcome: OutcomeArg) -> Self {
        match outcome {
            OutcomeArg::Approve => DecisionOutcome::Approve,
            OutcomeArg::Reject => DecisionOutcome::Reject,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Muestra los requisitos para ascender desde una categoría.
    Requirements {
        /// Categoría actual, p. ej. "Titular Auxiliar 1".
        rank: String,
    },

    /// Verifica la elegibilidad de un docente (solo lectura).
    Verify {
        /// Cédula del docente.
        faculty_id: String,

        /// Categoría a evaluar; por defecto la categoría registrada del docente.
        #[arg(long)]
        rank: Option<String>,
    },

    /// Registra una solicitud de promoción a la categoría siguiente.
    Submit {
        faculty_id: String,

        /// Metadatos adicionales como `clave=valor`.
        #[arg(long = "meta", value_parser = parse_key_value)]
        metadata: Vec<(String, String)>,
    },

    /// Registra la decisión de un nivel revisor.
    Decide {
        request_id: String,

        outcome: OutcomeArg,

        #[arg(long, value_enum)]
        level: LevelArg,

        /// Nombre de quien decide.
        #[arg(long)]
        reviewer: String,

        /// Motivo; obligatorio para rechazar.
        #[arg(long)]
        reason: Option<String>,
    },

    /// Apela una solicitud rechazada.
    Appeal {
        request_id: String,

        #[arg(long)]
        justification: String,

        /// Quien presenta la apelación; por defecto el propio docente.
        #[arg(long)]
        by: Option<String>,
    },

    /// Finaliza una solicitud aprobada y consume las credenciales.
    Finalize {
        request_id: String,

        #[arg(long, default_value = "system")]
        actor: String,
    },

    /// Muestra las solicitudes de un docente.
    Status { faculty_id: String },

    /// Reintenta las escrituras pendientes del ledger y los cambios de categoría.
    RetryLedger,
}

impl Command {
    /// `--meta` pairs as a map; later keys win.
    pub fn metadata_map(pairs: &[(String, String)]) -> BTreeMap<String, String> {
        pairs.iter().cloned().collect()
    }
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {s:?}"))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in {s:?}"));
    }
    Ok((key.trim().to_string(), value.trim().to_string()))
}
