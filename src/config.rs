//! Configuración del motor cargada desde `escalafon.toml`.
//!
//! La struct [`EscalafonConfig`] contiene todos los parámetros configurables.
//! Los valores ausentes en el archivo usan defaults razonables.
//! Las variables de entorno `ESCALAFON_DATA_DIR` y `ESCALAFON_NOTIFY_URL`
//! tienen precedencia sobre el archivo.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Deserialize;

use crate::credentials::AffiliationMatcher;
use crate::ledger::RetryConfig;

/// What to do when a faculty member's rank does not match the ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownRankPolicy {
    /// Refuse with a validation error.
    #[default]
    Strict,
    /// Evaluate against the lowest-tier thresholds and log a warning.
    LowestTier,
}

/// Configuración de nivel superior cargada de `escalafon.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct EscalafonConfig {
    /// Directorio con los archivos JSON de datos.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Nombre completo de la institución para reconocer afiliaciones.
    #[serde(default = "default_institution_name")]
    pub institution_name: String,

    /// Siglas aceptadas como afiliación institucional (palabra completa).
    #[serde(default = "default_affiliation_aliases")]
    pub affiliation_aliases: Vec<String>,

    /// Ventana, en años, de las capacitaciones que cuentan.
    #[serde(default = "default_training_window_years")]
    pub training_window_years: u32,

    #[serde(default)]
    pub unknown_rank_policy: UnknownRankPolicy,

    /// Exige elegibilidad completa para la aprobación de la comisión.
    #[serde(default = "default_gate_final_approval")]
    pub gate_final_approval: bool,

    /// URL del webhook de notificaciones. Sin URL solo se registra en el log.
    #[serde(default)]
    pub notify_url: Option<String>,

    #[serde(default = "default_notify_timeout_ms")]
    pub notify_timeout_ms: u64,

    #[serde(default)]
    pub ledger_retry: RetryConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_institution_name() -> String {
    "Universidad Técnica de Ambato".to_string()
}

fn default_affiliation_aliases() -> Vec<String> {
    vec!["UTA".to_string()]
}

// Tres años de capacitación vigente.
fn default_training_window_years() -> u32 {
    3
}

fn default_gate_final_approval() -> bool {
    true
}

fn default_notify_timeout_ms() -> u64 {
    5000
}

impl Default for EscalafonConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            institution_name: default_institution_name(),
            affiliation_aliases: default_affiliation_aliases(),
            training_window_years: default_training_window_years(),
            unknown_rank_policy: UnknownRankPolicy::default(),
            gate_final_approval: default_gate_final_approval(),
            notify_url: None,
            notify_timeout_ms: default_notify_timeout_ms(),
            ledger_retry: RetryConfig::default(),
        }
    }
}

impl EscalafonConfig {
    /// Carga la configuración desde `path`, o desde `escalafon.toml` en el
    /// directorio actual. Usa valores por defecto si el archivo no existe.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new("escalafon.toml"));
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<EscalafonConfig>(&contents)?
        } else {
            Self::default()
        };

        // Las variables de entorno tienen precedencia sobre el archivo.
        if let Ok(dir) = std::env::var("ESCALAFON_DATA_DIR")
            && !dir.is_empty()
        {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(url) = std::env::var("ESCALAFON_NOTIFY_URL")
            && !url.is_empty()
        {
            config.notify_url = Some(url);
        }

        Ok(config)
    }

    pub fn affiliation_matcher(&self) -> AffiliationMatcher {
        AffiliationMatcher::new(&self.institution_name, &self.affiliation_aliases)
    }
}
