//! Startup configuration.
//!
//! Read once from a TOML file. The credential may instead come from the
//! environment (or a `.env` file); the environment wins when both are set.
//! Anything missing or malformed here is fatal.

use crate::error::{ReportError, Result};
use crate::llm::{LlmProvider, LlmSettings};
use crate::prompt::DEFAULT_PREVIEW_ROWS;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DataSettings {
    /// Directory holding the workbooks.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_purchases_table")]
    pub purchases_table: String,
    #[serde(default = "default_customers_table")]
    pub customers_table: String,
    #[serde(default = "default_preview_rows")]
    pub preview_rows: usize,
}

fn default_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_source() -> String {
    "data_base_ecommerce".to_string()
}

fn default_purchases_table() -> String {
    "base compra".to_string()
}

fn default_customers_table() -> String {
    "Base cliente".to_string()
}

fn default_preview_rows() -> usize {
    DEFAULT_PREVIEW_ROWS
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            root: default_root(),
            source: default_source(),
            purchases_table: default_purchases_table(),
            customers_table: default_customers_table(),
            preview_rows: default_preview_rows(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    api_key: Option<String>,
    #[serde(default)]
    llm: LlmSettings,
    #[serde(default)]
    data: DataSettings,
    template_path: Option<PathBuf>,
}

#[derive(Clone)]
pub struct AppConfig {
    api_key: String,
    pub llm: LlmSettings,
    pub data: DataSettings,
    pub template_path: Option<PathBuf>,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &"<redacted>")
            .field("llm", &self.llm)
            .field("data", &self.data)
            .field("template_path", &self.template_path)
            .finish()
    }
}

impl AppConfig {
    /// Load `path`, taking the credential from the environment if present.
    pub fn load(path: &Path) -> Result<Self> {
        dotenv::dotenv().ok();

        let text = if path.exists() {
            Some(std::fs::read_to_string(path).map_err(|e| {
                ReportError::Config(format!("Cannot read {}: {}", path.display(), e))
            })?)
        } else {
            debug!("No config file at {}", path.display());
            None
        };

        let config = Self::from_sources(text.as_deref(), |var| std::env::var(var).ok())?;
        info!(
            "Loaded configuration (provider {:?}, model {})",
            config.llm.provider, config.llm.model
        );
        Ok(config)
    }

    /// Build from optional TOML text and an environment lookup.
    pub fn from_sources<F>(toml_text: Option<&str>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file: ConfigFile = match toml_text {
            Some(text) => toml::from_str(text)
                .map_err(|e| ReportError::Config(format!("Malformed configuration: {}", e)))?,
            None => ConfigFile::default(),
        };

        let env_var = file.llm.provider.api_key_env();
        let api_key = env(env_var)
            .or(file.api_key)
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                ReportError::Config(format!(
                    "No API key configured: set `api_key` in the config file or {}",
                    env_var
                ))
            })?;

        if file.data.preview_rows == 0 {
            return Err(ReportError::Config("data.preview_rows must be at least 1".to_string()));
        }

        Ok(Self {
            api_key,
            llm: file.llm,
            data: file.data,
            template_path: file.template_path,
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}
