use crate::assemble::{assemble, preflight_response};
use crate::config::Config;
use crate::error::ProxyError;
use crate::fetcher::{outbound_headers, FetchOptions, UpstreamResponse};
use crate::AppState;
use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, State};
use axum::http::header::{CONTENT_TYPE, HOST, REFERER};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use proxy_core::{
    asset_upstream_url, classify, is_cart_path, resolve, rewrite_cart_json,
    rewrite_html_with_stats, upstream_url, ContentKind, ProxyContext, Scheme,
};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::Instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Page,
    Asset,
}

/// Catch-all proxy route.
pub async fn proxy(State(state): State<Arc<AppState>>, request: Request<Body>) -> Response {
    dispatch(state, request, Route::Page).await
}

/// Asset route: always passthrough.
pub async fn asset(State(state): State<Arc<AppState>>, request: Request<Body>) -> Response {
    dispatch(state, request, Route::Asset).await
}

async fn dispatch(state: Arc<AppState>, request: Request<Body>, route: Route) -> Response {
    let path = request.uri().path().to_string();
    let span = tracing::info_span!(
        "request",
        id = %request_id(),
        method = %request.method(),
        path = %path,
    );
    async move {
        match handle(&state, request, route).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "request failed");
                err.into_response_for(&path)
            }
        }
    }
    .instrument(span)
    .await
}

async fn handle(state: &AppState, request: Request<Body>, route: Route) -> Result<Response, ProxyError> {
    let (parts, body) = request.into_parts();
    let ctx = request_context(&parts, &state.config)?;
    tracing::debug!(target_host = %ctx.target.host, mode = ?ctx.mode(), "resolved target");

    if parts.method == Method::OPTIONS && ctx.mode().is_spa() {
        return Ok(preflight_response(&parts.headers));
    }

    let body = to_bytes(body, state.config.max_body_bytes)
        .await
        .map_err(|err| ProxyError::BadRequest(format!("unreadable request body: {err}")))?;

    let path = parts.uri.path();
    let query = parts.uri.query();
    let scheme = state.config.upstream_scheme();
    let url = match route {
        Route::Page => upstream_url(&ctx.target, path, query, scheme)?,
        Route::Asset => asset_upstream_url(&ctx.target, path, query, scheme)?,
    };
    let origin = url.origin().ascii_serialization();
    let cart = parts.uri.to_string().contains("cart");
    if cart {
        tracing::debug!(method = %parts.method, "cart request");
    }

    let options = FetchOptions {
        method: parts.method.clone(),
        headers: outbound_headers(&parts.headers, &origin, cart),
        body: Some(body),
    };
    let upstream = state.fetcher.fetch(url, options).await?;
    if upstream.status.as_u16() >= 400 && is_cart_path(path) {
        tracing::warn!(status = upstream.status.as_u16(), "cart request failed upstream");
    }

    let response = match route {
        Route::Asset => passthrough(upstream, &ctx, &parts.headers),
        Route::Page => render(state, upstream, &ctx, &parts.headers, path),
    };
    Ok(response)
}

fn render(
    state: &AppState,
    upstream: UpstreamResponse,
    ctx: &ProxyContext,
    request_headers: &HeaderMap,
    path: &str,
) -> Response {
    let kind = classify(upstream.content_type(), upstream.body.as_bytes(), path);
    tracing::debug!(?kind, content_type = upstream.content_type().unwrap_or_default(), "classified response");

    match kind {
        ContentKind::Html => {
            let shim = state.shims.lookup(&ctx.target.host);
            let (body, stats) =
                rewrite_html_with_stats(&upstream.body.into_text(), ctx, shim.as_ref());
            tracing::info!(
                meta_refresh = stats.meta_refresh,
                base_href = stats.base_href,
                self_reference = stats.self_reference,
                shim = stats.shim,
                "served rewritten document"
            );
            let mut response = assemble(upstream.status, &upstream.headers, body, ctx, request_headers);
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            );
            response
        }
        ContentKind::Json => {
            let body = rewrite_cart_json(&upstream.body.into_text(), ctx);
            let mut response = assemble(upstream.status, &upstream.headers, body, ctx, request_headers);
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/json; charset=utf-8"),
            );
            response
        }
        ContentKind::Binary | ContentKind::Other => passthrough(upstream, ctx, request_headers),
    }
}

fn passthrough(upstream: UpstreamResponse, ctx: &ProxyContext, request_headers: &HeaderMap) -> Response {
    assemble(
        upstream.status,
        &upstream.headers,
        upstream.body.into_bytes(),
        ctx,
        request_headers,
    )
}

fn request_context(parts: &Parts, config: &Config) -> Result<ProxyContext, ProxyError> {
    let proxy_host = proxy_host(&parts.headers, config);
    let referer = parts.headers.get(REFERER).and_then(|v| v.to_str().ok());
    let target = resolve(parts.uri.query(), referer, &proxy_host)?;
    let protocol = Scheme::from_forwarded(
        parts
            .headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok()),
    );
    Ok(ProxyContext::new(target, proxy_host, protocol))
}

/// The authority the client used to reach us.
pub fn proxy_host(headers: &HeaderMap, config: &Config) -> String {
    headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| format!("localhost:{}", config.port))
}

/// Per client, method and path cooldown for `/cart` routes.
pub async fn cart_cooldown(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if !path.starts_with("/cart") || !state.cart_guard.is_enabled() {
        return next.run(request).await;
    }
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let key = format!("{client}:{}:{path}", request.method());
    if state.cart_guard.check(&key) {
        return next.run(request).await;
    }
    tracing::info!(%key, "cart request throttled");
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(serde_json::json!({
            "error": "Too many requests",
            "message": "Please wait a moment before trying again",
        })),
    )
        .into_response()
}

fn request_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect::<String>()
}
