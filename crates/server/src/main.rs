use anyhow::Context;
use clap::Parser;
use rewrite_proxy::config::{Config, LogFormat};
use rewrite_proxy::{serve, spawn_sweeper, AppState};
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(config.log_format);

    let addr = config.listen_addr();
    let state = Arc::new(AppState::new(config).context("building upstream HTTP client")?);
    for entry in state.shims.entries() {
        tracing::info!(pattern = %entry.pattern, file = %entry.file, "registered site shim");
    }
    let _sweeper = spawn_sweeper(state.clone());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "rewrite-proxy listening");
    serve(listener, state).await.context("serving")?;
    Ok(())
}
