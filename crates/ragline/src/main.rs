//! ragline: retrieval-augmented generation gateway
//!
//! Serves the document, response and classification API over HTTP, and
//! offers one-shot commands for managing indices and ingesting files.

mod config;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use config::Config;
use ragline_core::{
    AppDeps, AwsCredentials, AwsDomainDirectory, GatewayServer, LoggingChatClient,
    OpenAIConfig, OpenSearchClient, PipelineConfig, SearchStore, ServerConfig,
    StaticDomainDirectory, embedding_client, ingest, llm_client, load_sdk_config,
    moderation_client,
};

/// Retrieval-augmented generation gateway over OpenAI and Amazon OpenSearch
#[derive(Parser)]
#[command(name = "ragline")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to .ragline directory or config file (default: search for .ragline/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Environment file to load before reading configuration (default: .env if present)
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Write logs to daily rotating files in this directory instead of stderr
    #[arg(long, global = true, env = "RAGLINE_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Host to bind to (default: from config)
        #[arg(long, env = "RAGLINE_HOST")]
        host: Option<String>,

        /// Port to bind to (default: from config)
        #[arg(long, env = "RAGLINE_PORT")]
        port: Option<u16>,
    },

    /// Manage kNN indices
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Embed a text file and store it as one document
    Ingest {
        /// Target index (default: pipeline.default_index)
        #[arg(long)]
        index: Option<String>,

        /// File to ingest
        file: PathBuf,
    },

    /// Initialize a new .ragline directory with config file
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Validate configuration and report problems
    Check,
}

#[derive(Subcommand)]
enum IndexAction {
    /// Create an index with the vector mapping
    Create { name: String },
    /// Delete an index (succeeds if it does not exist)
    Delete { name: String },
    /// Report whether an index exists
    Exists { name: String },
}

fn log_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Initialize logging to stderr.
fn init_logging(verbose: bool) {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(log_filter(verbose))
        .init();
}

/// Initialize logging to rotating files with daily rotation.
fn init_file_logging(logs_dir: &Path, verbose: bool) {
    if let Err(e) = std::fs::create_dir_all(logs_dir) {
        eprintln!("Warning: Failed to create logs directory: {}", e);
        init_logging(verbose);
        return;
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, logs_dir, "ragline.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Dropping the guard stops the writer thread.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(log_filter(verbose))
        .init();
}

/// Load the environment file, if any.
///
/// An explicit `--env-file` must exist; the default `.env` is optional.
fn load_env_file(path: Option<&PathBuf>) -> Result<()> {
    match path {
        Some(path) => {
            dotenv::from_path(path)
                .with_context(|| format!("Failed to load env file: {}", path.display()))?;
        }
        None => {
            dotenv::dotenv().ok();
        }
    }
    Ok(())
}

/// Load config from file or auto-discover from `.ragline/config.toml`,
/// then apply environment overrides.
fn load_config(override_path: Option<&PathBuf>) -> Result<Config> {
    let mut config = if let Some(path) = override_path {
        let config_file = if path.is_dir() {
            path.join(config::CONFIG_FILE)
        } else {
            path.clone()
        };
        let config = Config::from_file(&config_file)?;
        info!("Loaded config from {}", config_file.display());
        config
    } else {
        match Config::find_and_load() {
            Ok(Some((config, ragline_dir))) => {
                info!("Found config at {}", ragline_dir.display());
                config
            }
            Ok(None) => {
                tracing::debug!("No .ragline/config.toml found, using defaults");
                Config::default()
            }
            Err(e) => {
                tracing::warn!("Error searching for config: {}, using defaults", e);
                Config::default()
            }
        }
    };

    config.apply_env();
    Ok(config)
}

/// Fail with every validation problem listed.
fn ensure_valid(config: &Config) -> Result<()> {
    let errors = config.validate();
    if errors.is_empty() {
        return Ok(());
    }
    for error in &errors {
        tracing::error!("{}", error);
    }
    anyhow::bail!(
        "Invalid configuration ({} problem{}); run 'ragline check' for details",
        errors.len(),
        if errors.len() == 1 { "" } else { "s" }
    )
}

fn openai_config(config: &Config) -> Result<OpenAIConfig> {
    let key = config
        .openai
        .api_key
        .clone()
        .context("OpenAI API key not configured")?;
    let mut openai = OpenAIConfig::new(key);
    if let Some(url) = &config.openai.base_url {
        openai = openai.with_base_url(url);
    }
    if let Some(secs) = config.openai.timeout_secs {
        openai = openai.with_timeout(Duration::from_secs(secs));
    }
    Ok(openai)
}

/// Resolve AWS credentials and connect to the configured domain.
async fn open_store(config: &Config) -> Result<OpenSearchClient> {
    let os = &config.opensearch;
    let sdk_config = load_sdk_config(&os.region).await;
    let credentials = AwsCredentials::from_sdk_config(&sdk_config)
        .await
        .context("Failed to resolve AWS credentials")?;

    let client = match &os.endpoint {
        Some(endpoint) => {
            let directory = StaticDomainDirectory::new().with_domain(&os.domain, endpoint);
            OpenSearchClient::for_domain(&directory, &os.domain, &os.region, credentials).await
        }
        None => {
            let directory = match &os.directory_url {
                Some(url) => AwsDomainDirectory::with_endpoint_url(&sdk_config, url),
                None => AwsDomainDirectory::new(&sdk_config),
            };
            OpenSearchClient::for_domain(&directory, &os.domain, &os.region, credentials).await
        }
    };

    client.with_context(|| format!("Failed to connect to OpenSearch domain {}", os.domain))
}

/// Build every client the gateway needs.
async fn build_deps(config: &Config) -> Result<AppDeps> {
    let openai = openai_config(config)?;
    let store = open_store(config).await?;

    Ok(AppDeps::new(
        Arc::new(embedding_client(&openai)?),
        Arc::new(LoggingChatClient::new(llm_client(&openai)?)),
        Arc::new(moderation_client(&openai)?),
        Arc::new(store),
    ))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}

fn init_ragline_dir(force: bool) -> Result<PathBuf> {
    let ragline_dir = PathBuf::from(config::RAGLINE_DIR);
    let config_path = ragline_dir.join(config::CONFIG_FILE);

    if config_path.exists() && !force {
        anyhow::bail!(".ragline/config.toml already exists. Use --force to overwrite.");
    }

    if !ragline_dir.exists() {
        std::fs::create_dir_all(&ragline_dir)?;
        info!("Created {}/", ragline_dir.display());
    }

    std::fs::write(&config_path, config::DEFAULT_CONFIG)?;
    Ok(config_path)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    load_env_file(cli.env_file.as_ref())?;

    match &cli.log_dir {
        Some(dir) => init_file_logging(dir, cli.verbose),
        None => init_logging(cli.verbose),
    }

    match cli.command {
        Commands::Init { force } => {
            let config_path = init_ragline_dir(force)?;
            info!("Created {}", config_path.display());
            info!("Next steps:");
            info!("  1. Set OPENAI_API_KEY and OPENSEARCH_DOMAIN (or edit the config file)");
            info!("  2. Run 'ragline check' to validate the configuration");
            info!("  3. Run 'ragline serve' to start the gateway");
        }

        Commands::Check => {
            let config = load_config(cli.config.as_ref())?;
            let errors = config.validate();
            if errors.is_empty() {
                info!(
                    domain = %config.opensearch.domain,
                    region = %config.opensearch.region,
                    default_index = %config.pipeline.default_index,
                    top_k = config.pipeline.top_k,
                    "Configuration is valid"
                );
            } else {
                for error in &errors {
                    tracing::error!("{}", error);
                }
                anyhow::bail!("Configuration has {} problem(s)", errors.len());
            }
        }

        Commands::Serve { host, port } => {
            let config = load_config(cli.config.as_ref())?;
            ensure_valid(&config)?;

            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            let addr: SocketAddr = format!("{}:{}", host, port)
                .parse()
                .with_context(|| format!("Invalid bind address {}:{}", host, port))?;

            let deps = build_deps(&config).await?;
            let server_config = ServerConfig::new(addr)
                .with_cors(config.server.enable_cors)
                .with_pipeline(PipelineConfig {
                    default_index: config.pipeline.default_index.clone(),
                    top_k: config.pipeline.top_k,
                });

            GatewayServer::new(server_config, deps)
                .run_with_shutdown(shutdown_signal())
                .await?;
        }

        Commands::Index { action } => {
            let config = load_config(cli.config.as_ref())?;
            ensure_valid(&config)?;
            let store = open_store(&config).await?;

            match action {
                IndexAction::Create { name } => {
                    let acknowledged = ragline_core::create_index(&store, &name).await?;
                    println!("{}", serde_json::json!({"index": name, "acknowledged": acknowledged}));
                }
                IndexAction::Delete { name } => {
                    let acknowledged = store.delete_index(&name).await?;
                    println!("{}", serde_json::json!({"index": name, "acknowledged": acknowledged}));
                }
                IndexAction::Exists { name } => {
                    let exists = store.index_exists(&name).await?;
                    println!("{}", serde_json::json!({"index": name, "exists": exists}));
                }
            }
        }

        Commands::Ingest { index, file } => {
            let config = load_config(cli.config.as_ref())?;
            ensure_valid(&config)?;

            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let index = index.unwrap_or_else(|| config.pipeline.default_index.clone());

            let openai = openai_config(&config)?;
            let embeddings = embedding_client(&openai)?;
            let store = open_store(&config).await?;

            let id = ingest(&embeddings, &store, &index, &content).await?;
            println!("{}", serde_json::json!({"id": id, "index": index}));
        }
    }

    Ok(())
}
