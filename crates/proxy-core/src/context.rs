use std::fmt::{Display, Formatter};
use url::Url;

/// Query key that carries the origin host on every proxied URL.
pub const MARKER: &str = "hmtarget=";

/// Rewrite mode, selected by `hmtype`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyMode {
    /// Full page reload model.
    #[default]
    Classic,
    /// Client-side routed pages: relaxed CSP, CORS and socket bridging.
    Spa,
}

impl ProxyMode {
    /// Reads the leading digit of an `hmtype` value. Anything but `2` is Classic.
    pub fn from_param(raw: &str) -> Self {
        match raw.trim_start().chars().next() {
            Some('2') => Self::Spa,
            _ => Self::Classic,
        }
    }

    pub fn digit(self) -> char {
        match self {
            Self::Classic => '1',
            Self::Spa => '2',
        }
    }

    pub fn is_spa(self) -> bool {
        self == Self::Spa
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    pub fn websocket(self) -> &'static str {
        match self {
            Self::Http => "ws",
            Self::Https => "wss",
        }
    }

    /// Parses an `X-Forwarded-Proto` style value, keeping only the first hop.
    pub fn from_forwarded(raw: Option<&str>) -> Self {
        let first = raw
            .and_then(|value| value.split(',').next())
            .map(|value| value.trim().to_ascii_lowercase());
        match first.as_deref() {
            Some("https") | Some("wss") => Self::Https,
            _ => Self::Http,
        }
    }
}

impl Display for Scheme {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized origin descriptor derived once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub mode: ProxyMode,
    pub asset_url: Option<Url>,
}

impl Target {
    pub fn new(host: impl Into<String>, mode: ProxyMode) -> Self {
        Self {
            host: host.into(),
            mode,
            asset_url: None,
        }
    }
}

/// The three values threaded through every rewrite rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyContext {
    pub target: Target,
    pub proxy_host: String,
    pub protocol: Scheme,
}

impl ProxyContext {
    pub fn new(target: Target, proxy_host: impl Into<String>, protocol: Scheme) -> Self {
        Self {
            target,
            proxy_host: proxy_host.into(),
            protocol,
        }
    }

    pub fn mode(&self) -> ProxyMode {
        self.target.mode
    }

    /// `http://localhost:3000`
    pub fn proxy_origin(&self) -> String {
        format!("{}://{}", self.protocol, self.proxy_host)
    }

    pub fn is_proxy_authority(&self, authority: &str) -> bool {
        authority.eq_ignore_ascii_case(&self.proxy_host)
    }

    /// `hmtarget=<host>&hmtype=<digit>` for the given origin host.
    pub fn marker_for(&self, origin_host: &str) -> String {
        marker(origin_host, self.target.mode)
    }
}

pub fn marker(host: &str, mode: ProxyMode) -> String {
    format!("{MARKER}{host}&hmtype={}", mode.digit())
}

pub fn has_marker(value: &str) -> bool {
    value.contains(MARKER)
}

/// Appends the marker to a path-and-query, keeping any fragment last so the
/// server still receives the parameters.
pub fn append_marker(path: &str, host: &str, mode: ProxyMode) -> String {
    let (base, fragment) = match path.find('#') {
        Some(idx) => path.split_at(idx),
        None => (path, ""),
    };
    let separator = if base.ends_with('?') || base.ends_with('&') {
        ""
    } else if base.contains('?') {
        "&"
    } else {
        "?"
    };
    format!("{base}{separator}{}{fragment}", marker(host, mode))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_reads_leading_digit() {
        assert_eq!(ProxyMode::from_param("2"), ProxyMode::Spa);
        assert_eq!(ProxyMode::from_param("1"), ProxyMode::Classic);
        assert_eq!(ProxyMode::from_param("1/next/page"), ProxyMode::Classic);
        assert_eq!(ProxyMode::from_param("2?x=1"), ProxyMode::Spa);
        assert_eq!(ProxyMode::from_param(""), ProxyMode::Classic);
        assert_eq!(ProxyMode::from_param("spa"), ProxyMode::Classic);
    }

    #[test]
    fn append_marker_joins_with_the_right_separator() {
        assert_eq!(
            append_marker("/path", "origin.example", ProxyMode::Classic),
            "/path?hmtarget=origin.example&hmtype=1"
        );
        assert_eq!(
            append_marker("/path?a=1", "origin.example", ProxyMode::Spa),
            "/path?a=1&hmtarget=origin.example&hmtype=2"
        );
        assert_eq!(
            append_marker("/?", "origin.example", ProxyMode::Classic),
            "/?hmtarget=origin.example&hmtype=1"
        );
    }

    #[test]
    fn append_marker_keeps_fragment_last() {
        assert_eq!(
            append_marker("/docs?q=1#intro", "docs.example", ProxyMode::Classic),
            "/docs?q=1&hmtarget=docs.example&hmtype=1#intro"
        );
        assert_eq!(
            append_marker("/a#b?c", "docs.example", ProxyMode::Classic),
            "/a?hmtarget=docs.example&hmtype=1#b?c"
        );
    }

    #[test]
    fn forwarded_proto_picks_first_hop() {
        assert_eq!(Scheme::from_forwarded(Some("https, http")), Scheme::Https);
        assert_eq!(Scheme::from_forwarded(Some("HTTP")), Scheme::Http);
        assert_eq!(Scheme::from_forwarded(None), Scheme::Http);
    }

    #[test]
    fn proxy_authority_is_case_insensitive() {
        let ctx = ProxyContext::new(
            Target::new("shop.example", ProxyMode::Classic),
            "LocalHost:3000",
            Scheme::Http,
        );
        assert!(ctx.is_proxy_authority("localhost:3000"));
        assert!(!ctx.is_proxy_authority("localhost:3001"));
        assert_eq!(ctx.proxy_origin(), "http://LocalHost:3000");
    }
}
