use anyhow::{Context, Result};
use beacon_server::config::{AppConfig, CliConfig, FileConfig};
use beacon_server::provider::OpenAiBatchProvider;
use beacon_server::seed::seed_targets;
use beacon_server::server::{run_server, ServerState};
use beacon_server::store::SqliteScoringStore;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to the SQLite scoring database file.
    #[clap(long, value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// Path to a TOML config file. Values in it override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// Maximum number of targets per submitted batch.
    #[clap(long)]
    pub batch_limit: Option<usize>,

    /// Model to request for scoring.
    #[clap(long)]
    pub model: Option<String>,

    /// Base URL of the batch-inference provider.
    #[clap(long)]
    pub provider_base_url: Option<String>,

    /// Shared secret the cron endpoints require. Falls back to CRON_SECRET.
    #[clap(long)]
    pub cron_secret: Option<String>,

    /// Path to a JSON seed file of businesses to load on startup.
    #[clap(long, value_parser = parse_path)]
    pub seed: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = cli_args.config.as_deref().map(FileConfig::load).transpose()?;
    let cli_config = CliConfig {
        db_path: cli_args.db_path,
        port: cli_args.port,
        batch_limit: cli_args.batch_limit,
        model: cli_args.model,
        provider_base_url: cli_args.provider_base_url,
        api_key: None,
        cron_secret: cli_args.cron_secret,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Opening SQLite scoring database at {:?}...", config.db_path);
    let store = Arc::new(SqliteScoringStore::new(&config.db_path)?);

    if let Some(seed_path) = cli_args.seed {
        info!("Seeding targets from {:?}...", seed_path);
        seed_targets(store.as_ref(), &seed_path)?;
    }

    let provider = Arc::new(OpenAiBatchProvider::new(
        config.provider_base_url.clone(),
        config.api_key.clone(),
    ));

    let state = ServerState {
        store,
        provider,
        cron_secret: config.cron_secret.clone(),
        model: config.model.clone(),
        batch_limit: config.batch_limit,
        start_time: Instant::now(),
        hash: env!("GIT_HASH").to_string(),
    };

    info!("Ready to serve at port {}!", config.port);
    run_server(state, config.port).await
}
