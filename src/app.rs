/*
 * Responsibility
 * - Config読み込み → 依存生成 (cache / audit store) → Router 組み立て
 * - Middleware の適用 (trace → CORS → HTTP、auth stage は routes 側)
 * - axum::serve() で起動
 */
use std::net::SocketAddr;
use std::sync::Arc;
use std::{panic, process};

use anyhow::Result;
use axum::Router;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api;
use crate::config::Config;
use crate::middleware;
use crate::services::audit::{AuditStore, MemoryAuditStore, PgAuditStore};
use crate::services::cache::{CacheClient, MemoryCache, ValkeyClient};
use crate::state::AppState;

fn init_tracing() {
    // Prefer RUST_LOG if set; otherwise use a sensible default.
    // Ex:
    // RUST_LOG=info,edge_guard=debug,tower_http=debug cargo run
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn init_panic_hook(abort_on_panic: bool) {
    // Keep the default hook as a fallback (prints to stderr with location/payload).
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        // Always surface panics via tracing so they don't get "lost".
        tracing::error!(?info, "panic");

        // In development, fail fast so we notice immediately.
        if abort_on_panic {
            process::abort();
        } else {
            default_hook(info);
        }
    }))
}

pub async fn run() -> Result<()> {
    init_tracing();
    let config = Config::from_env()?;

    let abort_on_panic = !config.app_env.is_production();
    init_panic_hook(abort_on_panic);

    tracing::info!(
        "starting API in {:?} mode on {}",
        config.app_env,
        config.addr
    );
    tracing::debug!(?config, "configuration loaded");

    let state = build_state(&config).await?;
    let app = build_router(state, &config);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    // ConnectInfo: forwarded header が無いときの client ip
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Build process-level services and inject them into the shared application state.
///
/// Without `VALKEY_URL` / `DATABASE_URL` (development only, enforced by `Config`) the
/// in-process backends are used.
pub async fn build_state(config: &Config) -> Result<AppState> {
    let cache: Arc<dyn CacheClient> = match config.valkey_url.as_deref() {
        Some(url) => Arc::new(ValkeyClient::new(url).await?),
        None => {
            tracing::warn!("VALKEY_URL not set; using in-memory cache");
            Arc::new(MemoryCache::new())
        }
    };

    let audit: Arc<dyn AuditStore> = match config.database_url.as_deref() {
        Some(url) => {
            let store = PgAuditStore::connect(url).await?;
            store.ensure_schema().await?;
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; audit records are kept in memory");
            Arc::new(MemoryAuditStore::new())
        }
    };

    if config.upstream_secret.is_none() {
        tracing::warn!("UPSTREAM_SHARED_SECRET not set; sign-in is closed");
    }

    tracing::info!(
        cache = cache.backend_name(),
        audit = audit.backend_name(),
        "backends ready"
    );

    Ok(AppState::new(config, cache, audit))
}

/// Full application router.
///
/// Layer order, outermost first: trace → CORS → HTTP (access log, body limit,
/// deadline) → per-route auth stages → handler.
pub fn build_router(state: AppState, config: &Config) -> Router {
    let router = Router::new()
        .nest("/api/v1", api::v1::routes(&state))
        .with_state(state);

    let router = middleware::http::apply(router, config.request_timeout);
    let router = middleware::cors::apply(router, config);
    middleware::trace::apply(router)
}
