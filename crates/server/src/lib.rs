pub mod assemble;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod guard;
pub mod handlers;
pub mod ws;

use crate::config::Config;
use crate::fetcher::OriginFetcher;
use crate::guard::RequestGuard;
use axum::http::StatusCode;
use axum::routing::{any, get};
use axum::{middleware, Router};
use proxy_core::ShimRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

/// Process-wide state shared by every request task.
pub struct AppState {
    pub config: Config,
    pub fetcher: OriginFetcher,
    pub shims: ShimRegistry,
    pub cart_guard: RequestGuard,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, reqwest::Error> {
        let fetcher = OriginFetcher::new(config.fetch_settings())?;
        let shims = config.shim_registry();
        let cart_guard = RequestGuard::new(config.cart_cooldown(), config.guard_retention());
        Ok(Self {
            config,
            fetcher,
            shims,
            cart_guard,
        })
    }
}

pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .route("/asset", any(handlers::asset))
        .route("/__hm/ws/:encoded", get(ws::socket_bridge))
        .fallback(handlers::proxy)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            handlers::cart_cooldown,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the app with peer addresses available to the cart cooldown.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    axum::serve(
        listener,
        build_app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

/// Periodically evicts stale loop-guard and cart-cooldown entries.
pub fn spawn_sweeper(state: Arc<AppState>) -> JoinHandle<()> {
    let period = state.config.sweep_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let loops = state.fetcher.loop_guard().sweep();
            let carts = state.cart_guard.sweep();
            if loops + carts > 0 {
                tracing::debug!(loops, carts, "swept request guards");
            }
        }
    })
}
