//! atl-daemon entry point.
//!
//! Thin: tracing, configuration, store, background loops, middleware, then
//! the HTTP server. Handlers live in `routes.rs`; shared state in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use atl_config::{load_layered_yaml, resolve_secrets, UnusedKeyPolicy, WorkshopConfig};
use atl_daemon::{routes, state};
use atl_db::{PgStore, Store};
use atl_notify::{BroadcastRealtime, Dispatcher, ExpoPushGateway, NoopPushGateway, PushGateway};
use atl_runtime::{spawn_outbox_loop, spawn_sweep_loop, BackgroundTasks, Sweep};
use atl_workflow::{Clock, SystemClock, Workflow};
use axum::http::{HeaderValue, Method};
use tokio::sync::Notify;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

/// Comma-separated YAML paths, merged in order.
const ENV_CONFIG: &str = "ATL_CONFIG";
const ENV_ADDR: &str = "ATL_DAEMON_ADDR";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience).
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let (config, config_hash) = load_config()?;
    let secrets = resolve_secrets(&config)?;
    info!(?secrets, config_hash = ?config_hash, "configuration loaded");

    let pool = atl_db::connect_from_env().await?;
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let kick = Arc::new(Notify::new());
    let realtime = Arc::new(BroadcastRealtime::default());

    let workflow = Arc::new(
        Workflow::new(Arc::clone(&store), Arc::clone(&clock), &config)?
            .with_outbox_kick(Arc::clone(&kick)),
    );
    let sweep = Arc::new(
        Sweep::new(Arc::clone(&store), Arc::clone(&clock), &config)?
            .with_outbox_kick(Arc::clone(&kick)),
    );
    let push: Arc<dyn PushGateway> = if config.push.enabled {
        Arc::new(ExpoPushGateway::new(
            config.push.base_url.clone(),
            secrets.push_access_token.clone(),
        ))
    } else {
        Arc::new(NoopPushGateway)
    };
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&store),
        realtime.clone(),
        push,
        config.outbox.clone(),
    ));

    let mut tasks = BackgroundTasks::new();
    tasks.push(spawn_outbox_loop(
        dispatcher,
        Arc::clone(&clock),
        Duration::from_millis(config.outbox.poll_interval_ms),
        config.outbox.batch_size,
        kick,
        tasks.stop_signal(),
    ));
    tasks.push(spawn_sweep_loop(
        sweep,
        Duration::from_secs(config.sweep.interval_secs),
        tasks.stop_signal(),
    ));
    state::spawn_heartbeat(realtime.clone(), Duration::from_secs(15));

    let mut app_state = state::AppState::new(workflow, realtime);
    if let Some(hash) = config_hash {
        app_state = app_state.with_config_hash(hash);
    }

    let app = routes::build_router(Arc::new(app_state))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr(&config)?;
    info!("atl-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    tasks.shutdown().await;
    info!("atl-daemon stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// Defaults when `ATL_CONFIG` is unset.
fn load_config() -> anyhow::Result<(WorkshopConfig, Option<String>)> {
    let Ok(raw) = std::env::var(ENV_CONFIG) else {
        warn!("{ENV_CONFIG} unset; booting with default configuration");
        return Ok((WorkshopConfig::default(), None));
    };
    let paths: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    let loaded = load_layered_yaml(&paths)?;
    let report = atl_config::report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
    if !report.is_clean() {
        warn!(unused = ?report.unused_leaf_pointers, "unused config keys");
    }
    let config = loaded.settings()?;
    Ok((config, Some(loaded.config_hash)))
}

fn bind_addr(config: &WorkshopConfig) -> anyhow::Result<SocketAddr> {
    let raw = std::env::var(ENV_ADDR).unwrap_or_else(|_| config.daemon.bind_addr.clone());
    raw.parse()
        .with_context(|| format!("invalid bind address: {raw}"))
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl+C, shutting down"),
        Err(e) => {
            warn!(error = %e, "ctrl_c handler unavailable; running until killed");
            std::future::pending::<()>().await;
        }
    }
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:8081",
        "http://127.0.0.1:8081",
        "http://localhost:19006",
        "http://127.0.0.1:19006",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}
