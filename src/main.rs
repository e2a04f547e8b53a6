//! Identity CA - private certificate authority for user/device identity certificates.
//!
//! `identity-ca init-root` creates the root CA files once; `identity-ca serve` (the default)
//! loads them and serves the HTTP API together with the periodic expiry sweep.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use identity_ca::configs::AppConfig;
use identity_ca::file_storage::FileStore;
use identity_ca::generate_root_ca::{write_root_ca_files, RsaRootCABuilder};
use identity_ca::pki_generator::CryptoGenerator;
use identity_ca::protocol::Protocol;
use identity_ca::service::CertificateService;
use identity_ca::storage::{CertificateStore, MemoryStore};
use identity_ca::{sweeper, webserver};

#[derive(Debug, Parser)]
#[command(name = "identity-ca", version, about = "Private certificate authority for identity certificates")]
struct Cli {
    /// TOML configuration file. Defaults to config.toml, then config/application.toml.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API and the expiry sweeper.
    Serve,
    /// Generate a self-signed root CA at the configured paths. Never overwrites.
    InitRoot {
        #[arg(long, default_value_t = 3650)]
        validity_days: u32,
        #[arg(long, default_value_t = 4096)]
        key_size: u32,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::InitRoot {
            validity_days,
            key_size,
        } => {
            let builder = RsaRootCABuilder::new()
                .subject(config.certificate_subject.clone())
                .key_size(key_size)
                .validity_days(validity_days);
            write_root_ca_files(
                builder,
                &config.root_cert_path,
                &config.root_cert_private_key_path,
            )
            .context("Failed to initialize root CA")?;
            Ok(())
        }
        Command::Serve => serve(config).await,
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    let root_cert = std::fs::read(&config.root_cert_path).with_context(|| {
        format!(
            "Failed to read root certificate {}",
            config.root_cert_path.display()
        )
    })?;
    let root_key = std::fs::read(&config.root_cert_private_key_path).with_context(|| {
        format!(
            "Failed to read root certificate private key {}",
            config.root_cert_private_key_path.display()
        )
    })?;
    let generator = CryptoGenerator::builder()
        .subject(config.certificate_subject.clone())
        .default_ttl_days(config.cert_ttl)
        .rsa_bits(config.key_rsa_bits)
        .load_root_ca(&root_cert, &root_key)
        .context("Failed to load root CA")?;
    info!(
        cert = %config.root_cert_path.display(),
        ttl_days = config.cert_ttl,
        rsa_bits = config.key_rsa_bits,
        "root CA loaded"
    );
    let generator = Arc::new(generator);

    match config.storage.path.clone() {
        Some(path) => {
            let store = FileStore::open(&path)
                .await
                .with_context(|| format!("Failed to open certificate store {}", path.display()))?;
            run(config, generator, Arc::new(store)).await
        }
        None => {
            info!("no storage path configured, certificates are kept in memory only");
            run(config, generator, Arc::new(MemoryStore::new())).await
        }
    }
}

async fn run<S>(config: AppConfig, generator: Arc<CryptoGenerator>, store: Arc<S>) -> Result<()>
where
    S: CertificateStore + 'static,
{
    let service = CertificateService::new(generator, store);
    let sweeper = sweeper::spawn_sweeper(service.clone(), config.sweep_interval());

    let app = webserver::router(Protocol::new(service), config.http.request_timeout());
    let result = webserver::serve(app, &config.http, shutdown_signal())
        .await
        .context("HTTP server failed");

    sweeper.abort();
    info!("identity-ca stopped");
    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
