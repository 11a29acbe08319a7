//! URL-bearing HTML attributes: rules 1, 2, 3 and 9.

use super::quoted;
use crate::context::{has_marker, ProxyContext};
use crate::urls;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static URL_ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)(?P<prefix>\b(?P<attr>src|href|action|data-src|data-href|d-src|poster|background|cite|formaction)\s*=\s*)(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)')"#,
    )
    .expect("valid url attribute regex")
});

/// Applies `rewrite(attribute, value)` to every URL attribute value,
/// keeping the original quote style.
fn rewrite_values<F>(input: &str, mut rewrite: F) -> String
where
    F: FnMut(&str, &str) -> Option<String>,
{
    URL_ATTR_RE
        .replace_all(input, |caps: &Captures| {
            let prefix = &caps["prefix"];
            let attr = caps["attr"].to_ascii_lowercase();
            match quoted(caps).and_then(|(quote, value)| {
                rewrite(&attr, value.as_str()).map(|new| format!("{prefix}{quote}{new}{quote}"))
            }) {
                Some(replaced) => replaced,
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Rule 1: `//host/path`.
pub fn rewrite_protocol_relative(input: &str, ctx: &ProxyContext) -> String {
    rewrite_values(input, |_, value| {
        let value = value.trim();
        value
            .starts_with("//")
            .then(|| urls::protocol_relative(value, ctx))
            .flatten()
    })
}

/// Rule 2: `http(s)://host/path`.
pub fn rewrite_absolute(input: &str, ctx: &ProxyContext) -> String {
    rewrite_values(input, |_, value| {
        let value = value.trim();
        urls::strip_http_scheme(value)
            .is_some()
            .then(|| urls::absolute(value, ctx))
            .flatten()
    })
}

/// Rule 3: `/path`, resolved against the current target.
pub fn rewrite_root_relative(input: &str, ctx: &ProxyContext) -> String {
    rewrite_values(input, |_, value| {
        let value = value.trim();
        let mut chars = value.chars();
        match (chars.next(), chars.next()) {
            (Some('/'), Some(second)) if second != '/' => urls::root_relative(value, ctx),
            _ => None,
        }
    })
}

/// Rule 9: bare `/`, bare `?query` and empty `href`/`action` values all
/// point at the proxy root for the current target.
pub fn rewrite_degenerate(input: &str, ctx: &ProxyContext) -> String {
    rewrite_values(input, |attr, value| {
        let value = value.trim();
        let root = || format!("{}/?{}", ctx.proxy_origin(), ctx.marker_for(&ctx.target.host));
        if value == "/" {
            Some(root())
        } else if let Some(query) = value.strip_prefix('?') {
            if has_marker(query) {
                None
            } else if query.is_empty() {
                Some(root())
            } else {
                Some(format!(
                    "{}/?{query}&{}",
                    ctx.proxy_origin(),
                    ctx.marker_for(&ctx.target.host)
                ))
            }
        } else if value.is_empty() && matches!(attr, "href" | "action") {
            Some(root())
        } else {
            None
        }
    })
}
