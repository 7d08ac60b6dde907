//! Ygg server binary.
//!
//! Wires the chosen backends into the engines, preloads the profile signing
//! key, and serves the Yggdrasil API until interrupted.

mod backends;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use ygg_api::config::ApiConfig;
use ygg_core::auth::engine::{AuthEngine, DEFAULT_MAX_TOKENS_PER_USER};
use ygg_core::auth::jwt::{DEFAULT_TOKEN_VALIDITY_DAYS, TokenSigner, resolve_token_secret};
use ygg_core::auth::password::{CredentialVerifier, PasswordAlgorithm};
use ygg_core::clock::{SharedClock, SystemClock};
use ygg_core::identity::UuidMode;
use ygg_core::options::{OptionStore, SIGNING_KEY_OPTION, SITE_URL_OPTION};
use ygg_core::session::{DEFAULT_BULK_LIMIT, SessionEngine, SessionSettings};
use ygg_core::signing::{KeySource, SigningService};
use ygg_core::store::legacy::DEFAULT_CACHE_PREFIX;
use ygg_core::sweeper::spawn_sweeper;

use crate::backends::{CacheSettings, DatabaseSettings, DemoUser, ProfileBackend, StorageBackend};

const DEFAULT_LOG_FILTER: &str = "info,ygg_api=debug,ygg_core=debug";

/// CLI arguments. Every flag can also be set through its environment variable.
#[derive(Parser, Debug)]
#[command(name = "ygg_server", about = "Yggdrasil authentication and session server")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "YGG_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Public site URL. Falls back to the `site_url` option.
    #[arg(long, env = "YGG_SITE_URL")]
    site_url: Option<String>,

    /// Server name shown to launchers.
    #[arg(long, env = "YGG_SERVER_NAME", default_value = "Ygg")]
    server_name: String,

    /// Token and session storage.
    #[arg(long, env = "YGG_STORAGE", value_enum, default_value_t = StorageBackend::Memory)]
    storage: StorageBackend,

    /// User and profile storage.
    #[arg(long, env = "YGG_PROFILES", value_enum, default_value_t = ProfileBackend::Memory)]
    profiles: ProfileBackend,

    /// PostgreSQL connection URL, required by the database and legacy backends.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long, env = "YGG_MAX_CONNECTIONS", default_value_t = 5)]
    max_connections: u32,

    /// Root directory of the file cache backend.
    #[arg(long, env = "YGG_CACHE_DIR", default_value = "storage/framework/cache/data")]
    cache_dir: PathBuf,

    /// Key prefix in the legacy cache table.
    #[arg(long, env = "YGG_CACHE_PREFIX", default_value = DEFAULT_CACHE_PREFIX)]
    cache_prefix: String,

    /// PEM file holding the profile signing key. Without it the key is read
    /// from the `ygg_private_key` option.
    #[arg(long, env = "YGG_SIGNING_KEY")]
    signing_key: Option<PathBuf>,

    /// Password hash scheme of stored credentials.
    #[arg(long, env = "YGG_PASSWORD_ALGORITHM", default_value = "BCRYPT")]
    password_algorithm: String,

    /// Salt for the salted hash schemes.
    #[arg(long, env = "YGG_PASSWORD_SALT", default_value = "")]
    password_salt: String,

    /// How new profile UUIDs are generated (`offline` or `random`).
    #[arg(long, env = "YGG_UUID_MODE", default_value = "offline")]
    uuid_mode: UuidMode,

    /// Access token lifetime in days.
    #[arg(long, env = "YGG_TOKEN_VALIDITY_DAYS", default_value_t = DEFAULT_TOKEN_VALIDITY_DAYS)]
    token_validity_days: i64,

    /// Live tokens kept per user; the oldest are revoked beyond this.
    #[arg(long, env = "YGG_MAX_TOKENS", default_value_t = DEFAULT_MAX_TOKENS_PER_USER)]
    max_tokens: usize,

    /// Maximum names per bulk profile query.
    #[arg(long, env = "YGG_BULK_LIMIT", default_value_t = DEFAULT_BULK_LIMIT)]
    bulk_limit: usize,

    /// Seconds between sweeps of expired tokens and sessions.
    #[arg(long, env = "YGG_SWEEP_INTERVAL", default_value_t = 300)]
    sweep_interval: u64,

    /// Take client addresses from `X-Forwarded-For` / `X-Real-IP`. Enable
    /// only behind a reverse proxy that sets these headers.
    #[arg(long, env = "YGG_TRUST_PROXY_HEADERS")]
    trust_proxy_headers: bool,

    /// Demo accounts for the memory profile backend, `email:password:profile`.
    #[arg(long = "demo-user", env = "YGG_DEMO_USERS", value_delimiter = ',')]
    demo_users: Vec<DemoUser>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let args = Args::parse();
    info!(
        bind = %args.bind,
        storage = ?args.storage,
        profiles = ?args.profiles,
        "starting ygg_server"
    );
    if args.profiles != ProfileBackend::Memory && !args.demo_users.is_empty() {
        warn!("demo users are only seeded into the memory profile backend");
    }

    let token_secret = resolve_token_secret()
        .map_err(|e| format!("cannot read or persist the token secret: {e}"))?;

    let clock: SharedClock = Arc::new(SystemClock);
    let db = DatabaseSettings {
        url: args.database_url.clone(),
        max_connections: args.max_connections,
    };
    let pool = backends::connect(args.storage, args.profiles, &db).await?;

    let verifier = CredentialVerifier::new(
        PasswordAlgorithm::from_config(&args.password_algorithm),
        args.password_salt.clone(),
    );
    let (profiles, options) = backends::profile_backend(
        args.profiles,
        &pool,
        verifier,
        args.uuid_mode,
        &args.demo_users,
    )
    .await?;

    let signer = Arc::new(TokenSigner::new(
        token_secret.as_bytes(),
        chrono::Duration::days(args.token_validity_days),
    ));
    let cache = CacheSettings {
        dir: args.cache_dir.clone(),
        prefix: args.cache_prefix.clone(),
    };
    let (tokens, sessions) =
        backends::token_stores(args.storage, &pool, &cache, signer.clone(), clock.clone())?;

    let key_source = match &args.signing_key {
        Some(path) => KeySource::File(path.clone()),
        None => KeySource::Option {
            store: options.clone(),
            key: SIGNING_KEY_OPTION.to_string(),
        },
    };
    let signing = Arc::new(SigningService::new(key_source));
    // A missing or broken key is a startup failure, not a per-request one.
    signing.preload().await?;

    let site_url = resolve_site_url(args.site_url.as_deref(), options.as_ref()).await?;
    let config = ApiConfig::new(args.server_name.clone(), site_url)
        .with_trusted_proxy_headers(args.trust_proxy_headers);

    let auth = AuthEngine::new(profiles.clone(), tokens.clone(), signer, clock.clone())
        .with_max_tokens_per_user(args.max_tokens);
    let session = SessionEngine::new(
        tokens.clone(),
        sessions.clone(),
        profiles,
        signing.clone(),
        clock,
        SessionSettings {
            site_url: config.site_url.clone(),
            bulk_limit: args.bulk_limit,
        },
    );

    let state = ygg_api::AppState {
        auth: Arc::new(auth),
        sessions: Arc::new(session),
        signing,
        config,
    };
    let app = ygg_api::router(state);

    let cancel = CancellationToken::new();
    let sweeper = spawn_sweeper(
        tokens,
        sessions,
        Duration::from_secs(args.sweep_interval.max(1)),
        cancel.clone(),
    );

    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    info!(addr = %listener.local_addr()?, "Yggdrasil API listening");

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    cancel.cancel();
    let _ = sweeper.await;
    served?;

    info!("ygg_server stopped");
    Ok(())
}

/// The configured site URL, or the one stored in the options.
async fn resolve_site_url(
    configured: Option<&str>,
    options: &dyn OptionStore,
) -> Result<String, Box<dyn std::error::Error>> {
    if let Some(url) = configured.filter(|u| !u.trim().is_empty()) {
        return Ok(url.trim().to_string());
    }
    options
        .get(SITE_URL_OPTION)
        .await?
        .filter(|u| !u.trim().is_empty())
        .map(|u| u.trim().to_string())
        .ok_or_else(|| "no site URL: pass --site-url or set the site_url option".into())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
