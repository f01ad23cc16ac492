use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use quillpad::auth::tokens::random_secret;
use quillpad::auth::{GoogleVerifier, TokenIssuer};
use quillpad::config::{Cli, Config};
use quillpad::state::AppState;
use quillpad::storage::LocalObjectStore;
use quillpad::{db, mail, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;

    // Initialize database
    let pool = db::create_pool(&config.db_path())?;
    db::run_migrations(&pool)?;

    let secret = match config.auth.jwt_secret.clone() {
        Some(secret) => secret,
        None => {
            tracing::warn!(
                "No JWT secret configured; using a random one. Tokens will not survive a restart."
            );
            random_secret()
        }
    };
    let tokens = TokenIssuer::new(secret.as_bytes(), config.access_ttl(), config.refresh_ttl());

    let storage = LocalObjectStore::new(config.media_path(), &config.storage.public_base_url)?;
    tracing::info!("Media directory: {}", config.media_path().display());

    if config.google.client_id.is_none() {
        tracing::warn!("GOOGLE_CLIENT_ID is not set; Google sign-in is disabled");
    }
    let identity = GoogleVerifier::new(
        config.google.client_id.clone(),
        config.google.certs_url.clone(),
    );
    let mailer = mail::build_mailer(&config.mail);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    let state = AppState {
        db: pool,
        config,
        tokens: Arc::new(tokens),
        storage: Arc::new(storage),
        identity: Arc::new(identity),
        mailer,
    };
    let app = routes::app(state);

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
