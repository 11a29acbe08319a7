//! Rule 4: multi-URL attributes.

use super::quoted;
use crate::context::ProxyContext;
use crate::urls;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static SRCSET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)(?P<prefix>\b(?:data-srcset|imagesrcset|srcset)\s*=\s*)(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)')"#,
    )
    .expect("valid srcset regex")
});

pub fn rewrite_srcset(input: &str, ctx: &ProxyContext) -> String {
    SRCSET_RE
        .replace_all(input, |caps: &Captures| match quoted(caps) {
            Some((quote, list)) => {
                format!("{}{quote}{}{quote}", &caps["prefix"], rewrite_candidates(list.as_str(), ctx))
            }
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Rewrites each candidate URL independently. Separators and descriptors
/// are copied through untouched so their positions stay stable.
pub fn rewrite_candidates(list: &str, ctx: &ProxyContext) -> String {
    let mut out = String::with_capacity(list.len() + 64);
    let mut rest = list;
    loop {
        let lead = rest.len()
            - rest
                .trim_start_matches(|c: char| c == ',' || c.is_whitespace())
                .len();
        out.push_str(&rest[..lead]);
        rest = &rest[lead..];
        if rest.is_empty() {
            break;
        }

        let token_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let token = &rest[..token_end];
        let url = token.trim_end_matches(',');
        out.push_str(&rewrite_candidate(url, ctx).unwrap_or_else(|| url.to_string()));
        out.push_str(&token[url.len()..]);
        rest = &rest[token_end..];
        if url.len() != token.len() {
            continue;
        }

        let descriptor_end = rest.find(',').unwrap_or(rest.len());
        out.push_str(&rest[..descriptor_end]);
        rest = &rest[descriptor_end..];
    }
    out
}

fn rewrite_candidate(url: &str, ctx: &ProxyContext) -> Option<String> {
    if url.starts_with("//") {
        urls::protocol_relative(url, ctx)
    } else {
        urls::absolute(url, ctx)
    }
}
