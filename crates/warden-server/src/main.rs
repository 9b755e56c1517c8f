//! Warden server binary: the live group-moderation engine.
//!
//! Starts the push bridge, log watcher and rule engine, serves the local
//! control API with structured logging, and shuts down gracefully on
//! SIGTERM/SIGINT.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use warden_api::{PlatformClient, SessionProvider, StaticSession};
use warden_auth::AuthorizationGate;
use warden_bridge::EventBridge;
use warden_exec::Executor;
use warden_rules::ModerationEngine;
use warden_server::{app, background, config, AppState};
use warden_store::SqliteStore;
use warden_types::{EventBus, KindFilter};
use warden_watcher::ActivityWatcher;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("WARDEN_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration; the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    // Initialize database
    let store = SqliteStore::open(&config.database.path, config.database.runtime_settings())
        .expect("failed to open database; check database.path in config");

    // Platform access
    let session: Arc<dyn SessionProvider> = Arc::new(StaticSession::new(
        config.session.auth_cookie.clone(),
        config.session.user_id.clone(),
    ));
    if !session.is_authenticated() {
        tracing::warn!("no platform session configured; set WARDEN_AUTH_COOKIE to enable moderation");
    }
    let executor = Executor::new();
    let client = Arc::new(
        PlatformClient::new(config.api.clone(), Arc::clone(&session), executor.clone())
            .expect("failed to build platform client; check api.base_url in config"),
    );

    // Engine
    let bus = EventBus::new();
    let gate = Arc::new(AuthorizationGate::new());
    let engine = ModerationEngine::new(
        config.engine.clone(),
        gate,
        client.clone(),
        executor.clone(),
        Arc::new(store.clone()),
    );
    match engine.load_rules().await {
        Ok(count) => tracing::info!(count, "moderation rules loaded"),
        Err(e) => tracing::error!(error = %e, "failed to load moderation rules"),
    }
    let _engine_subscription = engine.spawn(&bus);

    tokio::spawn(background::start_event_recorder(bus.receiver(), store.clone()));
    if session.is_authenticated() {
        tokio::spawn(background::start_sweep_task(engine.clone()));
    }

    // Event sources
    let bridge = EventBridge::new(config.pipeline.clone(), client, bus.clone());
    if session.is_authenticated() {
        let bridge = bridge.clone();
        tokio::spawn(async move {
            if let Err(e) = bridge.connect().await {
                tracing::warn!(error = %e, "initial push connection failed");
            }
        });
    }

    let (watcher, _watcher_subscription) = match config.watcher.log_dir.clone() {
        Some(dir) => {
            let watcher = ActivityWatcher::new(config.watcher.clone(), dir, bus.clone())
                .expect("invalid watcher grammar; check [[watcher.grammar]] in config");
            let subscription = watcher.start(KindFilter::Any, |event| {
                tracing::debug!(kind = %event.kind, "local activity");
            });
            (Some(watcher), Some(subscription))
        }
        None => {
            tracing::info!("no client log directory configured, log watcher disabled");
            (None, None)
        }
    };

    // Build application
    let state = AppState {
        engine,
        bridge: bridge.clone(),
        watcher: watcher.clone(),
        session,
        executor,
        store,
        bus,
    };
    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting warden server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address; is another process using this port?");

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    bridge.disconnect().await;
    if let Some(watcher) = watcher {
        watcher.stop();
    }
    tracing::info!("warden server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
