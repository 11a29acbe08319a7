//! Rule 5: CSS `url(...)` references, in stylesheets and inline styles.

use super::quoted;
use crate::context::{has_marker, ProxyContext};
use crate::urls;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static CSS_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?P<func>url)\(\s*(?P<quote>["']?)(?P<url>[^"')]+)["']?\s*\)"#)
        .expect("valid CSS url regex")
});

static STYLE_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)(?P<open><style\b[^>]*>)(?P<body>.*?)(?P<close></style\s*>)")
        .expect("valid style block regex")
});

static STYLE_ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?P<lead>\sstyle\s*=\s*)(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)')"#)
        .expect("valid style attribute regex")
});

/// Rule 5 over a document: only `<style>` bodies and `style` attribute
/// values are touched, so script code such as `new URL(...)` is left alone.
pub fn rewrite_document_css(html: &str, ctx: &ProxyContext) -> String {
    let blocks = STYLE_BLOCK_RE.replace_all(html, |caps: &Captures| {
        format!(
            "{}{}{}",
            &caps["open"],
            rewrite_css_urls(&caps["body"], ctx),
            &caps["close"]
        )
    });
    STYLE_ATTR_RE
        .replace_all(&blocks, |caps: &Captures| match quoted(caps) {
            Some((quote, value)) => format!(
                "{}{quote}{}{quote}",
                &caps["lead"],
                rewrite_css_urls(value.as_str(), ctx)
            ),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Rule 5 over stylesheet text.
pub fn rewrite_css_urls(input: &str, ctx: &ProxyContext) -> String {
    CSS_URL_RE
        .replace_all(input, |caps: &Captures| {
            let quote = &caps["quote"];
            let raw = caps["url"].trim();
            if raw.starts_with("data:") || raw.starts_with('#') || has_marker(raw) {
                return caps[0].to_string();
            }
            let rewritten = if raw.starts_with("//") {
                urls::protocol_relative(raw, ctx)
            } else if urls::strip_http_scheme(raw).is_some() {
                urls::absolute(raw, ctx)
            } else {
                urls::root_relative(raw, ctx)
            };
            match rewritten {
                Some(url) => format!("{}({quote}{url}{quote})", &caps["func"]),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
