//! The narrower pass for cart JSON responses.

use crate::context::{has_marker, ProxyContext};
use crate::urls;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static URL_FIELD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)"url"\s*:\s*"(?P<path>/[^"]*)""#).expect("valid cart url field regex")
});
static ABSOLUTE_STRING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)"(?P<url>https?://[^"]*)""#).expect("valid absolute JSON string regex")
});

/// Marks root-relative `"url"` fields and proxies every absolute `http(s)`
/// string. Absolute URLs without a usable host go through the asset route.
pub fn rewrite_cart_json(body: &str, ctx: &ProxyContext) -> String {
    let fields = URL_FIELD_RE.replace_all(body, |caps: &Captures| {
        match urls::mark_path(&caps["path"], ctx) {
            Some(path) => format!(r#""url":"{path}""#),
            None => caps[0].to_string(),
        }
    });
    ABSOLUTE_STRING_RE
        .replace_all(&fields, |caps: &Captures| {
            let raw = &caps["url"];
            if has_marker(raw) {
                return caps[0].to_string();
            }
            let after = urls::strip_http_scheme(raw).unwrap_or_default();
            let (authority, _) = urls::split_authority(after);
            if ctx.is_proxy_authority(authority) {
                return caps[0].to_string();
            }
            let rewritten =
                urls::absolute(raw, ctx).unwrap_or_else(|| urls::asset_route_url(raw, ctx));
            format!("\"{rewritten}\"")
        })
        .into_owned()
}
