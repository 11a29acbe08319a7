use crate::context::{append_marker, has_marker, ProxyContext};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use thiserror::Error;
use url::form_urlencoded;
use url::Url;

/// Path prefix of the WebSocket bridge route.
pub const SOCKET_BRIDGE_PREFIX: &str = "/__hm/ws/";

const IGNORED_PREFIXES: [&str; 8] = [
    "data:",
    "blob:",
    "#",
    "javascript:",
    "mailto:",
    "tel:",
    "about:",
    "sms:",
];

#[derive(Debug, Error)]
pub enum SocketTargetError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("invalid encoded URL: {0}")]
    InvalidEncoded(#[from] base64::DecodeError),
    #[error("invalid UTF-8 in encoded URL: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("unsupported socket scheme: {0}")]
    UnsupportedScheme(String),
}

/// Splits `host/path?q` (the text after `//`) into authority and the rest.
/// User info is dropped from the authority.
pub fn split_authority(after_slashes: &str) -> (&str, &str) {
    let end = after_slashes
        .find(['/', '?', '#', '\\'])
        .unwrap_or(after_slashes.len());
    let (authority, rest) = after_slashes.split_at(end);
    let authority = authority.rsplit('@').next().unwrap_or(authority);
    (authority, rest)
}

fn valid_authority(authority: &str) -> bool {
    !authority.is_empty()
        && authority
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '[' | ']'))
}

fn normalize_rest(rest: &str) -> String {
    if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{rest}")
    }
}

/// `//origin.example/p` becomes `//<proxy>/p?hmtarget=origin.example&hmtype=N`.
pub fn protocol_relative(url: &str, ctx: &ProxyContext) -> Option<String> {
    let after = url.strip_prefix("//")?;
    let (authority, rest) = split_authority(after);
    if !valid_authority(authority) || ctx.is_proxy_authority(authority) || has_marker(url) {
        return None;
    }
    let host = authority.to_ascii_lowercase();
    Some(format!(
        "//{}{}",
        ctx.proxy_host,
        append_marker(&normalize_rest(rest), &host, ctx.mode())
    ))
}

/// `https://origin.example/p` becomes `<proto>://<proxy>/p?hmtarget=origin.example&hmtype=N`.
pub fn absolute(url: &str, ctx: &ProxyContext) -> Option<String> {
    let after = strip_http_scheme(url)?;
    let (authority, rest) = split_authority(after);
    if !valid_authority(authority) || ctx.is_proxy_authority(authority) || has_marker(url) {
        return None;
    }
    let host = authority.to_ascii_lowercase();
    Some(format!(
        "{}{}",
        ctx.proxy_origin(),
        append_marker(&normalize_rest(rest), &host, ctx.mode())
    ))
}

/// `/p` becomes `<proto>://<proxy>/p?hmtarget=<target>&hmtype=N`.
pub fn root_relative(path: &str, ctx: &ProxyContext) -> Option<String> {
    if !path.starts_with('/') || path.starts_with("//") || has_marker(path) {
        return None;
    }
    Some(format!(
        "{}{}",
        ctx.proxy_origin(),
        append_marker(path, &ctx.target.host, ctx.mode())
    ))
}

/// Marker-only rewrite of a root-relative path, leaving it relative.
pub fn mark_path(path: &str, ctx: &ProxyContext) -> Option<String> {
    if !path.starts_with('/') || path.starts_with("//") || has_marker(path) {
        return None;
    }
    Some(append_marker(path, &ctx.target.host, ctx.mode()))
}

pub fn is_ignored(raw: &str) -> bool {
    let lower = raw.trim_start().to_ascii_lowercase();
    IGNORED_PREFIXES
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}

/// Rewrites any of the three supported shapes. `None` means "leave as is":
/// ignored schemes, already marked URLs, proxy-host URLs, other relative
/// paths and anything malformed.
pub fn proxify(raw: &str, ctx: &ProxyContext) -> Option<String> {
    let url = raw.trim();
    if url.is_empty() || is_ignored(url) || has_marker(url) {
        return None;
    }
    if url.starts_with("//") {
        protocol_relative(url, ctx)
    } else if strip_http_scheme(url).is_some() {
        absolute(url, ctx)
    } else if url.starts_with('/') {
        root_relative(url, ctx)
    } else {
        None
    }
}

/// Rewrites a `Location` response header so client-driven redirects stay
/// inside the proxy.
pub fn rewrite_location(location: &str, ctx: &ProxyContext) -> String {
    proxify(location, ctx).unwrap_or_else(|| location.to_string())
}

/// Asset-route URL carrying a fully-qualified upstream URL in `hmurl`.
pub fn asset_route_url(upstream: &str, ctx: &ProxyContext) -> String {
    let encoded: String = form_urlencoded::byte_serialize(upstream.as_bytes()).collect();
    format!(
        "{}/asset?hmtarget={}&hmtype=2&hmurl={encoded}",
        ctx.proxy_origin(),
        ctx.target.host
    )
}

pub fn strip_http_scheme(url: &str) -> Option<&str> {
    let lower = url.get(..8).unwrap_or(url).to_ascii_lowercase();
    if lower.starts_with("https://") {
        Some(&url[8..])
    } else if lower.starts_with("http://") {
        Some(&url[7..])
    } else {
        None
    }
}

/// Encodes a `ws(s)://` URL for the socket bridge path segment.
pub fn encode_socket_target(raw: &str) -> Result<String, SocketTargetError> {
    let parsed = Url::parse(raw)?;
    ensure_socket_scheme(&parsed)?;
    Ok(URL_SAFE_NO_PAD.encode(parsed.as_str().as_bytes()))
}

pub fn decode_socket_target(encoded: &str) -> Result<Url, SocketTargetError> {
    let bytes = URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('='))?;
    let value = String::from_utf8(bytes)?;
    let parsed = Url::parse(&value)?;
    ensure_socket_scheme(&parsed)?;
    Ok(parsed)
}

fn ensure_socket_scheme(url: &Url) -> Result<(), SocketTargetError> {
    match url.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(SocketTargetError::UnsupportedScheme(other.to_string())),
    }
}

/// `ws(s)://<proxy>/__hm/ws/<encoded>?hmtarget=<target>&hmtype=2`
pub fn socket_bridge_url(upstream: &str, ctx: &ProxyContext) -> Result<String, SocketTargetError> {
    let encoded = encode_socket_target(upstream)?;
    Ok(format!(
        "{}://{}{SOCKET_BRIDGE_PREFIX}{encoded}?hmtarget={}&hmtype=2",
        ctx.protocol.websocket(),
        ctx.proxy_host,
        ctx.target.host
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ProxyMode, Scheme, Target};

    fn ctx() -> ProxyContext {
        ProxyContext::new(
            Target::new("shop.example", ProxyMode::Classic),
            "localhost:3000",
            Scheme::Http,
        )
    }

    #[test]
    fn protocol_relative_keeps_query_and_drops_scheme() {
        assert_eq!(
            protocol_relative("//origin.example/path?a=1", &ctx()).as_deref(),
            Some("//localhost:3000/path?a=1&hmtarget=origin.example&hmtype=1")
        );
    }

    #[test]
    fn absolute_uses_the_url_host_and_proxy_protocol() {
        assert_eq!(
            absolute("https://cdn.example/npm/pkg.css", &ctx()).as_deref(),
            Some("http://localhost:3000/npm/pkg.css?hmtarget=cdn.example&hmtype=1")
        );
        assert_eq!(
            absolute("HTTPS://CDN.example", &ctx()).as_deref(),
            Some("http://localhost:3000/?hmtarget=cdn.example&hmtype=1")
        );
        assert_eq!(
            absolute("https://cdn.example?v=2", &ctx()).as_deref(),
            Some("http://localhost:3000/?v=2&hmtarget=cdn.example&hmtype=1")
        );
    }

    #[test]
    fn root_relative_uses_the_current_target() {
        assert_eq!(
            root_relative("/account", &ctx()).as_deref(),
            Some("http://localhost:3000/account?hmtarget=shop.example&hmtype=1")
        );
        assert_eq!(root_relative("//cdn.example/a", &ctx()), None);
    }

    #[test]
    fn spa_mode_uses_digit_two() {
        let mut spa = ctx();
        spa.target.mode = ProxyMode::Spa;
        assert_eq!(
            proxify("/api/items", &spa).as_deref(),
            Some("http://localhost:3000/api/items?hmtarget=shop.example&hmtype=2")
        );
    }

    #[test]
    fn proxify_leaves_non_rewritable_values() {
        let ctx = ctx();
        for raw in [
            "",
            "   ",
            "#top",
            "data:image/png;base64,AAAA",
            "blob:http://localhost:3000/uuid",
            "javascript:void(0)",
            "mailto:help@shop.example",
            "tel:+15551234",
            "about:blank",
            "relative/page.html",
            "http://localhost:3000/already",
            "//LOCALHOST:3000/already",
            "/a?hmtarget=shop.example&hmtype=1",
            "https://",
            "https://bad host/x",
        ] {
            assert_eq!(proxify(raw, &ctx), None, "{raw:?}");
        }
    }

    #[test]
    fn user_info_is_not_treated_as_host() {
        assert_eq!(
            absolute("https://user:pw@cdn.example/x", &ctx()).as_deref(),
            Some("http://localhost:3000/x?hmtarget=cdn.example&hmtype=1")
        );
    }

    #[test]
    fn location_rewrites_absolute_and_relative() {
        let ctx = ctx();
        assert_eq!(
            rewrite_location("https://shop.example/login?next=%2F", &ctx),
            "http://localhost:3000/login?next=%2F&hmtarget=shop.example&hmtype=1"
        );
        assert_eq!(
            rewrite_location("/cart", &ctx),
            "http://localhost:3000/cart?hmtarget=shop.example&hmtype=1"
        );
        assert_eq!(rewrite_location("next.html", &ctx), "next.html");
    }

    #[test]
    fn asset_route_url_encodes_upstream() {
        assert_eq!(
            asset_route_url("https://cdn.example/a b.png", &ctx()),
            "http://localhost:3000/asset?hmtarget=shop.example&hmtype=2&hmurl=https%3A%2F%2Fcdn.example%2Fa+b.png"
        );
    }

    #[test]
    fn socket_target_survives_the_path_segment() {
        let encoded = encode_socket_target("wss://live.shop.example/socket?room=1").unwrap();
        assert!(!encoded.contains('/') && !encoded.contains('='));
        let decoded = decode_socket_target(&encoded).unwrap();
        assert_eq!(decoded.as_str(), "wss://live.shop.example/socket?room=1");
    }

    #[test]
    fn socket_target_rejects_http() {
        assert!(matches!(
            encode_socket_target("https://shop.example/"),
            Err(SocketTargetError::UnsupportedScheme(_))
        ));
        let encoded = URL_SAFE_NO_PAD.encode("https://shop.example/");
        assert!(decode_socket_target(&encoded).is_err());
        assert!(decode_socket_target("***").is_err());
    }

    #[test]
    fn socket_bridge_url_matches_the_route() {
        let url = socket_bridge_url("ws://shop.example/live", &ctx()).unwrap();
        assert!(url.starts_with("ws://localhost:3000/__hm/ws/"));
        assert!(url.ends_with("?hmtarget=shop.example&hmtype=2"));
    }
}
