//! callhub - signaling relay for two-party scheduled video calls

use anyhow::{Context, Result};
use callhub::auth::{Authenticator, JwtVerifier};
use callhub::config::{Config, JWT_SECRET_ENV};
use callhub::lifecycle::{LifecycleService, MemoryStore};
use callhub::server::{Hub, ServerListener, Signaling};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "callhub")]
#[command(about = "Signaling relay for two-party scheduled video calls")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to bind
    #[arg(short, long)]
    port: Option<u16>,

    /// TOML file seeding bookings and parties
    #[arg(long)]
    seed: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the signaling server (default)
    Serve,
    /// Print an access token for a party
    Token {
        /// Party id the token is issued to
        party: Uuid,

        /// Token lifetime in minutes
        #[arg(long, default_value_t = 60)]
        ttl_minutes: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(seed) = cli.seed {
        config.directory.seed_path = Some(seed);
    }

    let secret = config.auth.jwt_secret.clone().with_context(|| {
        format!("no JWT secret configured; set auth.jwt_secret or {JWT_SECRET_ENV}")
    })?;
    let verifier = Arc::new(JwtVerifier::new(&secret));

    match cli.command {
        Some(Commands::Token { party, ttl_minutes }) => {
            let token = verifier.issue(party, chrono::Duration::minutes(ttl_minutes))?;
            println!("{token}");
            Ok(())
        }
        Some(Commands::Serve) | None => serve(config, verifier).await,
    }
}

async fn serve(config: Config, verifier: Arc<JwtVerifier>) -> Result<()> {
    let store = Arc::new(match &config.directory.seed_path {
        Some(path) => MemoryStore::load_seed(path)
            .with_context(|| format!("failed to load seed file {:?}", path))?,
        None => MemoryStore::new(),
    });

    let hub = Arc::new(Hub::new(config.signaling.max_session_duration()));
    let lifecycle = Arc::new(LifecycleService::new(
        Arc::clone(&hub),
        store.clone(),
        store.clone(),
        store.clone(),
        config.lifecycle.clone(),
    ));
    let signaling = Arc::new(Signaling::new(
        hub,
        lifecycle,
        config.signaling.clone(),
    ));
    let auth = Arc::new(Authenticator::new(verifier, store.clone(), store));

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.cancel();
        }
    });

    tracing::info!("Starting callhub on {}", config.bind_addr());
    ServerListener::new(config.bind_addr(), signaling, auth)
        .run(shutdown)
        .await
}
