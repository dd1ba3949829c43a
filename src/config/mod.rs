mod file_config;

pub use file_config::FileConfig;

use crate::provider::DEFAULT_BASE_URL;
use crate::scoring::request::DEFAULT_MODEL;
use crate::scoring::submit::BATCH_TARGET_LIMIT;
use anyhow::{bail, Result};
use std::path::PathBuf;

/// CLI arguments that take part in config resolution. Mirrors the fields a
/// TOML config file can override.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub port: u16,
    pub batch_limit: Option<usize>,
    pub model: Option<String>,
    pub provider_base_url: Option<String>,
    pub api_key: Option<String>,
    pub cron_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub port: u16,
    pub batch_limit: usize,
    pub model: String,
    pub provider_base_url: String,
    pub api_key: String,
    pub cron_secret: String,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file
    /// config. TOML values override CLI values where present; the secrets
    /// fall back to the environment (`OPENAI_API_KEY`, `CRON_SECRET`) last.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_path must be specified via --db-path or in config file")
            })?;

        let port = file.port.unwrap_or(cli.port);

        let batch_limit = file
            .batch_limit
            .or(cli.batch_limit)
            .unwrap_or(BATCH_TARGET_LIMIT);
        if batch_limit == 0 {
            bail!("batch_limit must be greater than zero");
        }

        let model = file
            .model
            .or_else(|| cli.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let provider_base_url = file
            .provider_base_url
            .or_else(|| cli.provider_base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let api_key = file
            .openai_api_key
            .or_else(|| cli.api_key.clone())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                anyhow::anyhow!("OpenAI API key must be provided via config or OPENAI_API_KEY")
            })?;

        let cron_secret = file
            .cron_secret
            .or_else(|| cli.cron_secret.clone())
            .or_else(|| std::env::var("CRON_SECRET").ok())
            .ok_or_else(|| {
                anyhow::anyhow!("Cron secret must be provided via config or CRON_SECRET")
            })?;

        Ok(Self {
            db_path,
            port,
            batch_limit,
            model,
            provider_base_url,
            api_key,
            cron_secret,
        })
    }
}
