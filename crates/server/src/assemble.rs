//! Response Assembler: turns an upstream response and its (possibly
//! rewritten) body into the outbound response.

use axum::body::{Body, Bytes};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_EXPOSE_HEADERS, CACHE_CONTROL, CONTENT_SECURITY_POLICY, EXPIRES, LOCATION,
    ORIGIN, PRAGMA, SET_COOKIE, VARY,
};
use axum::http::{HeaderMap, HeaderValue, Response, StatusCode};
use proxy_core::{rewrite_location, ProxyContext, Scheme};

pub const CLASSIC_CSP: &str = "frame-ancestors *";
pub const SPA_CSP: &str = "default-src * 'unsafe-inline' 'unsafe-eval' data: blob:; frame-ancestors *";

fn should_drop_response_header(name: &str) -> bool {
    matches!(
        name,
        "connection"
            | "transfer-encoding"
            | "content-encoding"
            | "content-length"
            | "content-security-policy"
            | "content-security-policy-report-only"
            | "x-frame-options"
            | "set-cookie"
            | "location"
    )
}

/// Outbound headers for `upstream`, with every proxy override applied.
pub fn response_headers(
    upstream: &HeaderMap,
    ctx: &ProxyContext,
    request_headers: &HeaderMap,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in upstream {
        if should_drop_response_header(name.as_str()) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    for value in upstream.get_all(SET_COOKIE) {
        let Ok(raw) = value.to_str() else {
            continue;
        };
        if let Ok(cookie) = HeaderValue::from_str(&rewrite_set_cookie(raw, ctx.protocol)) {
            headers.append(SET_COOKIE, cookie);
        }
    }

    if let Some(location) = upstream.get(LOCATION).and_then(|v| v.to_str().ok()) {
        let rewritten = rewrite_location(location, ctx);
        if rewritten != location {
            tracing::debug!(from = location, to = %rewritten, "rewrote location header");
        }
        if let Ok(value) = HeaderValue::from_str(&rewritten) {
            headers.insert(LOCATION, value);
        }
    }

    let csp = if ctx.mode().is_spa() { SPA_CSP } else { CLASSIC_CSP };
    headers.insert(CONTENT_SECURITY_POLICY, HeaderValue::from_static(csp));
    attach_no_cache_headers(&mut headers);
    if ctx.mode().is_spa() {
        attach_cors_headers(&mut headers, request_headers);
    }
    headers
}

pub fn assemble(
    status: StatusCode,
    upstream_headers: &HeaderMap,
    body: impl Into<Bytes>,
    ctx: &ProxyContext,
    request_headers: &HeaderMap,
) -> Response<Body> {
    let mut response = Response::new(Body::from(body.into()));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers(upstream_headers, ctx, request_headers);
    response
}

pub fn attach_no_cache_headers(headers: &mut HeaderMap) {
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(EXPIRES, HeaderValue::from_static("0"));
}

pub fn attach_cors_headers(headers: &mut HeaderMap, request_headers: &HeaderMap) {
    let origin = request_headers
        .get(ORIGIN)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, PATCH, DELETE, OPTIONS, HEAD"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("*, content-type, authorization, x-requested-with"),
    );
    headers.insert(
        ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("content-type, content-length, location"),
    );
    headers.insert(VARY, HeaderValue::from_static("Origin"));
}

pub fn preflight_response(request_headers: &HeaderMap) -> Response<Body> {
    let mut headers = HeaderMap::new();
    attach_cors_headers(&mut headers, request_headers);
    attach_no_cache_headers(&mut headers);
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    *response.headers_mut() = headers;
    response
}

/// Drops `Domain=` so the cookie binds to the proxy host. Over plain http
/// `Secure` goes too, and `SameSite=None` (which requires `Secure`) becomes
/// `Lax`.
pub fn rewrite_set_cookie(raw: &str, protocol: Scheme) -> String {
    let plain = protocol == Scheme::Http;
    raw.split(';')
        .map(str::trim)
        .enumerate()
        .filter_map(|(idx, part)| {
            if idx == 0 {
                return Some(part.to_string());
            }
            let name = part.split('=').next().unwrap_or_default().trim();
            if name.eq_ignore_ascii_case("domain") {
                return None;
            }
            if plain && name.eq_ignore_ascii_case("secure") {
                return None;
            }
            if plain
                && name.eq_ignore_ascii_case("samesite")
                && part
                    .split('=')
                    .nth(1)
                    .is_some_and(|value| value.trim().eq_ignore_ascii_case("none"))
            {
                return Some("SameSite=Lax".to_string());
            }
            (!part.is_empty()).then(|| part.to_string())
        })
        .collect::<Vec<_>>()
        .join("; ")
}
