use crate::context::{ProxyMode, Scheme, Target, MARKER};
use percent_encoding::percent_decode_str;
use std::borrow::Cow;
use thiserror::Error;
use url::form_urlencoded;
use url::Url;

const PROXY_PARAMS: [&str; 3] = ["hmtarget", "hmtype", "hmurl"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no target specified")]
    NoTargetSpecified,
    #[error("invalid target: {0}")]
    InvalidTarget(String),
}

#[derive(Default)]
struct RawParams {
    target: Option<String>,
    mode: Option<String>,
    asset: Option<String>,
}

impl RawParams {
    fn parse(query: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            let slot = match &*key {
                "hmtarget" => &mut params.target,
                "hmtype" => &mut params.mode,
                "hmurl" => &mut params.asset,
                _ => continue,
            };
            if slot.is_none() && !value.trim().is_empty() {
                *slot = Some(value.into_owned());
            }
        }
        params
    }
}

/// Resolves the origin descriptor for an inbound request.
///
/// `query` is the raw query string, `referer` the raw `Referer` header and
/// `proxy_host` the authority the client used to reach us. The referer is
/// only consulted when it points back at `proxy_host`.
pub fn resolve(
    query: Option<&str>,
    referer: Option<&str>,
    proxy_host: &str,
) -> Result<Target, ResolveError> {
    let normalized = normalize_payload_before_target(query.unwrap_or_default());
    let params = RawParams::parse(&normalized);
    let asset_url = params.asset.as_deref().and_then(parse_asset_url);

    let (raw_target, raw_mode) = match params.target {
        Some(target) => (target, params.mode),
        None => match referer.and_then(|value| referer_params(value, proxy_host)) {
            Some(from_referer) => (
                from_referer.target.unwrap_or_default(),
                params.mode.or(from_referer.mode),
            ),
            None => match &asset_url {
                Some(url) => (authority_of(url), params.mode),
                None => return Err(ResolveError::NoTargetSpecified),
            },
        },
    };

    let host = clean_host(&raw_target)?;
    let mode = raw_mode
        .as_deref()
        .map(ProxyMode::from_param)
        .unwrap_or_default();
    Ok(Target {
        host,
        mode,
        asset_url,
    })
}

fn referer_params(referer: &str, proxy_host: &str) -> Option<RawParams> {
    let url = Url::parse(referer).ok()?;
    if !authority_of(&url).eq_ignore_ascii_case(proxy_host) {
        return None;
    }
    let normalized = normalize_payload_before_target(url.query()?);
    let params = RawParams::parse(&normalized);
    params.target.is_some().then_some(params)
}

/// Strips scheme and path from an `hmtarget` value, leaving a bare host.
pub fn clean_host(raw: &str) -> Result<String, ResolveError> {
    let trimmed = raw.trim();
    let lower = trimmed.to_ascii_lowercase();
    let without_scheme = if lower.starts_with("https://") {
        &lower["https://".len()..]
    } else if lower.starts_with("http://") {
        &lower["http://".len()..]
    } else {
        lower.as_str()
    };
    let end = without_scheme
        .find(['/', '?', '#'])
        .unwrap_or(without_scheme.len());
    let host = &without_scheme[..end];

    if host.is_empty() {
        return Err(ResolveError::NoTargetSpecified);
    }
    let valid = host
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '[' | ']'));
    if !valid {
        return Err(ResolveError::InvalidTarget(trimmed.to_string()));
    }
    Ok(host.to_string())
}

/// Relocates a payload glued onto `hmtype=<digit>` so that it sits right
/// before `hmtarget=`.
///
/// Naive client-side concatenation can produce `hmtype=1/next?page=2&hmtarget=x`;
/// after this pass the query parser sees `hmtype=1&/next?page=2&hmtarget=x`.
/// This repairs malformed input only, well-formed queries pass through
/// untouched.
pub fn normalize_payload_before_target(query: &str) -> Cow<'_, str> {
    const TYPE_KEY: &str = "hmtype=";

    let Some(type_idx) = query.find(TYPE_KEY) else {
        return Cow::Borrowed(query);
    };
    let digit_idx = type_idx + TYPE_KEY.len();
    if !query[digit_idx..].starts_with(|c: char| c.is_ascii_digit()) {
        return Cow::Borrowed(query);
    }
    let payload_idx = digit_idx + 1;
    let tail = &query[payload_idx..];
    let payload_len = tail.find('&').unwrap_or(tail.len());

    let (payload, between, rest) = match tail[..payload_len].find(MARKER) {
        Some(glued) => (&tail[..glued], "", &tail[glued..]),
        None => {
            let after = &tail[payload_len..];
            let Some(target_rel) = after.find(MARKER) else {
                return Cow::Borrowed(query);
            };
            (&tail[..payload_len], &after[..target_rel], &after[target_rel..])
        }
    };
    if payload.is_empty() {
        return Cow::Borrowed(query);
    }

    let moved = payload.trim_start_matches('?');
    let mut out = String::with_capacity(query.len() + 2);
    out.push_str(&query[..payload_idx]);
    if between.is_empty() {
        out.push('&');
    } else {
        out.push_str(between);
    }
    if !moved.is_empty() {
        out.push_str(moved);
        out.push('&');
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Removes the proxy's own parameters from a raw query, keeping every
/// other segment byte-for-byte.
pub fn strip_proxy_params(query: &str) -> String {
    query
        .split('&')
        .filter(|segment| {
            if segment.is_empty() {
                return false;
            }
            let key = segment.split('=').next().unwrap_or_default();
            !PROXY_PARAMS.contains(&key)
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// `<scheme>://<host><path>?<query without proxy parameters>`
pub fn upstream_url(
    target: &Target,
    path: &str,
    query: Option<&str>,
    scheme: Scheme,
) -> Result<Url, ResolveError> {
    let path = if path.is_empty() { "/" } else { path };
    let mut raw = format!("{scheme}://{}{path}", target.host);
    if let Some(query) = query {
        let kept = strip_proxy_params(&normalize_payload_before_target(query));
        if !kept.is_empty() {
            raw.push('?');
            raw.push_str(&kept);
        }
    }
    Url::parse(&raw).map_err(|err| ResolveError::InvalidTarget(format!("{raw}: {err}")))
}

/// Upstream URL for the asset route: `hmurl` verbatim when present,
/// otherwise the path with its `/asset` prefix removed.
pub fn asset_upstream_url(
    target: &Target,
    path: &str,
    query: Option<&str>,
    scheme: Scheme,
) -> Result<Url, ResolveError> {
    if let Some(url) = &target.asset_url {
        return Ok(url.clone());
    }
    let stripped = path.strip_prefix("/asset").unwrap_or(path);
    upstream_url(target, stripped, query, scheme)
}

fn parse_asset_url(raw: &str) -> Option<Url> {
    let candidate: Cow<'_, str> = if has_http_scheme(raw) {
        Cow::Borrowed(raw)
    } else {
        percent_decode_str(raw).decode_utf8().ok()?
    };
    let url = Url::parse(candidate.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        tracing::debug!(hmurl = raw, "ignoring non-http asset url");
        return None;
    }
    Some(url)
}

fn has_http_scheme(raw: &str) -> bool {
    let lower = raw.trim_start().get(..8).unwrap_or(raw).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// `host[:port]` of a URL, matching the `Host` header form.
pub fn authority_of(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROXY: &str = "localhost:3000";

    #[test]
    fn resolves_target_and_mode_from_query() {
        let target = resolve(Some("hmtarget=shop.example&hmtype=2"), None, PROXY).unwrap();
        assert_eq!(target.host, "shop.example");
        assert_eq!(target.mode, ProxyMode::Spa);
        assert!(target.asset_url.is_none());
    }

    #[test]
    fn mode_defaults_to_classic() {
        let target = resolve(Some("hmtarget=shop.example"), None, PROXY).unwrap();
        assert_eq!(target.mode, ProxyMode::Classic);
    }

    #[test]
    fn target_scheme_and_path_are_discarded() {
        let target = resolve(
            Some("hmtarget=https%3A%2F%2FShop.Example%2Fcollections%2Fall"),
            None,
            PROXY,
        )
        .unwrap();
        assert_eq!(target.host, "shop.example");
    }

    #[test]
    fn missing_target_is_rejected() {
        assert_eq!(
            resolve(Some("page=2"), None, PROXY),
            Err(ResolveError::NoTargetSpecified)
        );
        assert_eq!(resolve(None, None, PROXY), Err(ResolveError::NoTargetSpecified));
    }

    #[test]
    fn hostile_target_is_rejected() {
        let err = resolve(Some("hmtarget=evil.example%27%3Balert(1)"), None, PROXY).unwrap_err();
        assert!(matches!(err, ResolveError::InvalidTarget(_)));
    }

    #[test]
    fn falls_back_to_referer_on_proxy_host() {
        let referer = "http://localhost:3000/products?hmtarget=shop.example&hmtype=2";
        let target = resolve(Some("v=3"), Some(referer), PROXY).unwrap();
        assert_eq!(target.host, "shop.example");
        assert_eq!(target.mode, ProxyMode::Spa);
    }

    #[test]
    fn foreign_referer_is_ignored() {
        let referer = "https://elsewhere.example/?hmtarget=shop.example";
        assert_eq!(
            resolve(None, Some(referer), PROXY),
            Err(ResolveError::NoTargetSpecified)
        );
    }

    #[test]
    fn hmurl_is_decoded_once_or_twice() {
        let once = resolve(
            Some("hmtarget=shop.example&hmurl=https%3A%2F%2Fcdn.example%2Fa.png%3Fv%3D1"),
            None,
            PROXY,
        )
        .unwrap();
        assert_eq!(
            once.asset_url.unwrap().as_str(),
            "https://cdn.example/a.png?v=1"
        );

        let twice = resolve(
            Some("hmtarget=shop.example&hmurl=https%253A%252F%252Fcdn.example%252Fb.png"),
            None,
            PROXY,
        )
        .unwrap();
        assert_eq!(twice.asset_url.unwrap().as_str(), "https://cdn.example/b.png");
    }

    #[test]
    fn non_http_hmurl_is_ignored() {
        let target = resolve(
            Some("hmtarget=shop.example&hmurl=file%3A%2F%2F%2Fetc%2Fpasswd"),
            None,
            PROXY,
        )
        .unwrap();
        assert!(target.asset_url.is_none());
    }

    #[test]
    fn hmurl_alone_supplies_the_host() {
        let target = resolve(Some("hmurl=https%3A%2F%2Fcdn.example%2Fx.js"), None, PROXY).unwrap();
        assert_eq!(target.host, "cdn.example");
    }

    #[test]
    fn payload_after_type_moves_before_target() {
        assert_eq!(
            normalize_payload_before_target("hmtype=1?page=2&hmtarget=shop.example"),
            "hmtype=1&page=2&hmtarget=shop.example"
        );
        assert_eq!(
            normalize_payload_before_target("a=1&hmtype=1/next&b=2&hmtarget=shop.example"),
            "a=1&hmtype=1&b=2&/next&hmtarget=shop.example"
        );
        assert_eq!(
            normalize_payload_before_target("hmtype=1/nexthmtarget=shop.example"),
            "hmtype=1&/next&hmtarget=shop.example"
        );
    }

    #[test]
    fn well_formed_queries_are_untouched() {
        let query = "hmtarget=shop.example&hmtype=1";
        assert!(matches!(normalize_payload_before_target(query), Cow::Borrowed(_)));
        let query = "hmtype=1&hmtarget=shop.example";
        assert!(matches!(normalize_payload_before_target(query), Cow::Borrowed(_)));
    }

    #[test]
    fn polluted_type_still_resolves() {
        let target = resolve(Some("hmtype=1?page=2&hmtarget=shop.example"), None, PROXY).unwrap();
        assert_eq!(target.host, "shop.example");
        assert_eq!(target.mode, ProxyMode::Classic);
    }

    #[test]
    fn upstream_url_drops_proxy_params() {
        let target = Target::new("shop.example", ProxyMode::Classic);
        let url = upstream_url(
            &target,
            "/search",
            Some("q=red%20shoes&hmtarget=shop.example&hmtype=1"),
            Scheme::Https,
        )
        .unwrap();
        assert_eq!(url.as_str(), "https://shop.example/search?q=red%20shoes");

        let bare = upstream_url(&target, "", Some("hmtarget=shop.example"), Scheme::Https).unwrap();
        assert_eq!(bare.as_str(), "https://shop.example/");
    }

    #[test]
    fn asset_url_prefers_hmurl() {
        let mut target = Target::new("shop.example", ProxyMode::Classic);
        let built =
            asset_upstream_url(&target, "/asset/img/a.png", Some("w=10"), Scheme::Https).unwrap();
        assert_eq!(built.as_str(), "https://shop.example/img/a.png?w=10");

        let root = asset_upstream_url(&target, "/asset", None, Scheme::Https).unwrap();
        assert_eq!(root.as_str(), "https://shop.example/");

        target.asset_url = Some(Url::parse("https://cdn.example/x.css").unwrap());
        let direct = asset_upstream_url(&target, "/asset", None, Scheme::Https).unwrap();
        assert_eq!(direct.as_str(), "https://cdn.example/x.css");
    }
}
