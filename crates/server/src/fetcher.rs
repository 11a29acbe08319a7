//! Origin Fetcher: manual redirects, bounded retries and fully buffered
//! bodies.

use crate::guard::RequestGuard;
use axum::body::Bytes;
use axum::http::header::{
    HeaderName, ACCEPT_ENCODING, CACHE_CONTROL, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE,
    IF_MODIFIED_SINCE, IF_NONE_MATCH, LOCATION, ORIGIN, PRAGMA, REFERER,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub max_redirects: usize,
    /// Failed attempts allowed before giving up, counted across redirects.
    pub max_retries: usize,
    pub timeout: Duration,
    pub retry_backoff: Duration,
    pub loop_guard: Duration,
    pub guard_retention: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_redirects: 5,
            max_retries: 3,
            timeout: Duration::from_secs(15),
            retry_backoff: Duration::from_secs(1),
            loop_guard: Duration::from_millis(200),
            guard_retention: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("too many redirects fetching {url}")]
    TooManyRedirects { url: String, chain: Vec<String> },
    #[error("maximum retries exceeded fetching {url} after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded {
        url: String,
        attempts: usize,
        last_error: String,
    },
    #[error("repeated request suppressed: {key}")]
    RateLimited { key: String },
    #[error("invalid upstream url: {0}")]
    InvalidUrl(String),
}

pub struct FetchOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl FetchOptions {
    pub fn get() -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum UpstreamBody {
    Text(String),
    Bytes(Bytes),
}

impl UpstreamBody {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Bytes(bytes) => bytes.as_ref(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The body as text, decoding raw bytes lossily.
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        }
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Text(text) => Bytes::from(text),
            Self::Bytes(bytes) => bytes,
        }
    }
}

/// Final non-redirect response of a fetch.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: UpstreamBody,
    pub url: Url,
}

impl UpstreamResponse {
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }
}

enum Hop {
    Redirect { status: StatusCode, location: String },
    Final(UpstreamResponse),
}

pub struct OriginFetcher {
    client: Client,
    settings: FetchSettings,
    guard: RequestGuard,
}

impl OriginFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        let guard = RequestGuard::new(settings.loop_guard, settings.guard_retention);
        Ok(Self {
            client,
            settings,
            guard,
        })
    }

    pub fn loop_guard(&self) -> &RequestGuard {
        &self.guard
    }

    pub async fn fetch(&self, url: Url, options: FetchOptions) -> Result<UpstreamResponse, FetchError> {
        let key = format!("{}:{url}", options.method);
        if !self.guard.check(&key) {
            tracing::warn!(%key, "suppressing repeated upstream request");
            return Err(FetchError::RateLimited { key });
        }

        let max_failures = self.settings.max_retries.max(1);
        let mut method = options.method;
        let mut body = options.body.filter(|body| !body.is_empty());
        let mut current = url.clone();
        let mut chain = vec![current.to_string()];
        let mut redirects = 0;
        let mut failures = 0;

        loop {
            tracing::debug!(%method, url = %current, "fetching upstream");
            match self.attempt(&method, &current, &options.headers, body.clone()).await {
                Ok(Hop::Final(response)) => {
                    tracing::debug!(
                        status = response.status.as_u16(),
                        bytes = response.body.len(),
                        url = %current,
                        "upstream responded"
                    );
                    return Ok(response);
                }
                Ok(Hop::Redirect { status, location }) => {
                    redirects += 1;
                    if redirects >= self.settings.max_redirects {
                        tracing::error!(url = %url, chain = ?chain, "too many redirects");
                        return Err(FetchError::TooManyRedirects {
                            url: url.to_string(),
                            chain,
                        });
                    }
                    let next = current
                        .join(&location)
                        .map_err(|err| FetchError::InvalidUrl(format!("{location}: {err}")))?;
                    if next.host_str() != current.host_str() {
                        tracing::warn!(
                            from = current.host_str().unwrap_or_default(),
                            to = next.host_str().unwrap_or_default(),
                            "cross-host redirect"
                        );
                    }
                    if switches_to_get(status, &method) {
                        method = Method::GET;
                        body = None;
                    }
                    tracing::debug!(status = status.as_u16(), to = %next, "following redirect");
                    chain.push(next.to_string());
                    current = next;
                }
                Err(err) => {
                    failures += 1;
                    tracing::warn!(attempt = failures, url = %current, error = %err, "upstream attempt failed");
                    if failures >= max_failures {
                        tracing::error!(url = %url, chain = ?chain, "maximum retries exceeded");
                        return Err(FetchError::MaxRetriesExceeded {
                            url: current.to_string(),
                            attempts: failures,
                            last_error: err.to_string(),
                        });
                    }
                    let factor = u32::try_from(failures).unwrap_or(u32::MAX);
                    tokio::time::sleep(self.settings.retry_backoff.saturating_mul(factor)).await;
                }
            }
        }
    }

    async fn attempt(
        &self,
        method: &Method,
        url: &Url,
        headers: &HeaderMap,
        body: Option<Bytes>,
    ) -> Result<Hop, reqwest::Error> {
        let mut builder = self
            .client
            .request(method.clone(), url.clone())
            .headers(headers.clone())
            .timeout(self.settings.timeout);
        if let Some(body) = body {
            if !matches!(*method, Method::GET | Method::HEAD) {
                builder = builder.body(body);
            }
        }

        let response = builder.send().await?;
        let status = response.status();
        if is_redirect(status) {
            if let Some(location) = response.headers().get(LOCATION).and_then(|v| v.to_str().ok()) {
                return Ok(Hop::Redirect {
                    status,
                    location: location.to_string(),
                });
            }
        }

        let mut response_headers = response.headers().clone();
        response_headers.remove(CONTENT_ENCODING);
        response_headers.remove(CONTENT_LENGTH);
        let textual = response_headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(is_textual);
        let body = if textual {
            UpstreamBody::Text(response.text().await?)
        } else {
            UpstreamBody::Bytes(response.bytes().await?)
        };
        Ok(Hop::Final(UpstreamResponse {
            status,
            headers: response_headers,
            body,
            url: url.clone(),
        }))
    }
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

fn switches_to_get(status: StatusCode, method: &Method) -> bool {
    status == StatusCode::SEE_OTHER
        || (matches!(status.as_u16(), 301 | 302) && *method == Method::POST)
}

fn is_textual(content_type: &str) -> bool {
    let lower = content_type.to_ascii_lowercase();
    lower.starts_with("text/") || lower.contains("json") || lower.contains("javascript")
}

fn should_skip_request_header(name: &str) -> bool {
    matches!(
        name,
        "host"
            | "content-length"
            | "transfer-encoding"
            | "connection"
            | "accept-encoding"
            | "origin"
            | "referer"
            | "upgrade"
            | "keep-alive"
            | "te"
            | "trailer"
            | "x-forwarded-host"
    ) || name.starts_with("proxy-")
}

/// Client headers as they should reach the origin. `target_origin` is
/// `scheme://host` of the origin; `cart` adds the cart cache-busting set.
pub fn outbound_headers(client: &HeaderMap, target_origin: &str, cart: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in client {
        if should_skip_request_header(name.as_str()) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

    if client.contains_key(ORIGIN) {
        if let Ok(origin) = HeaderValue::from_str(target_origin) {
            headers.insert(ORIGIN, origin);
        }
    }
    if client.contains_key(REFERER) {
        if let Ok(referer) = HeaderValue::from_str(&format!("{target_origin}/")) {
            headers.insert(REFERER, referer);
        }
    }

    if cart {
        headers.remove(IF_MODIFIED_SINCE);
        headers.remove(IF_NONE_MATCH);
        headers.insert(
            CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        );
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(
            HeaderName::from_static("x-requested-with"),
            HeaderValue::from_static("XMLHttpRequest"),
        );
    }
    headers
}
