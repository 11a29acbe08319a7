//! Once-per-document HTML transforms and the script injection point.

use crate::scripts::{BLOCK_BEGIN, BLOCK_END};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

pub const META_REFRESH_COMMENT: &str = "<!-- Meta refresh removed by proxy -->";
pub const BASE_HREF_COMMENT: &str = "<!-- Base href removed by proxy -->";
pub const SELF_REFERENCE_COMMENT: &str = "<!-- Script mentioning target domain removed -->";

const NEUTRALIZED_LOCATION: &str = "console.warn('[hm-proxy] blocked location change')";

static META_REFRESH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta\b[^>]*http-equiv\s*=\s*["']?refresh["']?[^>]*>"#)
        .expect("valid meta refresh regex")
});
static BASE_HREF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<base\b[^>]*href[^>]*>").expect("valid base href regex"));
static SCRIPT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script\b(?P<attrs>[^>]*)>(?P<body>.*?)</script\s*>")
        .expect("valid script block regex")
});
static LOCKSMITH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is)<script\b[^>]*?(?:data-locksmith|type\s*=\s*["']application/vnd\.locksmith\+json["'])[^>]*>.*?</script\s*>"#,
    )
    .expect("valid locksmith regex")
});
static LOCATION_WRITE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)(?:\b(?:window|document)\.)?\blocation(?:\.href)?\s*=\s*(?:"[^"]*"|'[^']*')|(?:\bwindow\.)?\blocation\.(?:replace|assign)\s*\([^)]*\)"#,
    )
    .expect("valid location write regex")
});
static INJECTED_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        "(?s){}.*?{}",
        regex::escape(BLOCK_BEGIN),
        regex::escape(BLOCK_END)
    ))
    .expect("valid injected block regex")
});
static DOCTYPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<!doctype").expect("valid doctype regex"));
static HTML_OPEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<html[\s>]").expect("valid html open regex"));
static HEAD_OPEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<head(?:\s[^>]*)?>").expect("valid head open regex"));

/// Result of a structural transform: the new text plus how many
/// constructs were touched.
pub struct Transformed {
    pub text: String,
    pub count: usize,
}

fn replace_counted(re: &Regex, input: &str, replacement: &str) -> Transformed {
    let count = re.find_iter(input).count();
    if count == 0 {
        return Transformed {
            text: input.to_string(),
            count,
        };
    }
    Transformed {
        text: re.replace_all(input, regex::NoExpand(replacement)).into_owned(),
        count,
    }
}

/// Removes a previously injected block so a second pass starts from the
/// same text the first pass rewrote.
pub fn lift_injected(input: &str) -> Transformed {
    replace_counted(&INJECTED_BLOCK_RE, input, "")
}

pub fn strip_meta_refresh(input: &str) -> Transformed {
    replace_counted(&META_REFRESH_RE, input, META_REFRESH_COMMENT)
}

pub fn strip_base_href(input: &str) -> Transformed {
    replace_counted(&BASE_HREF_RE, input, BASE_HREF_COMMENT)
}

pub fn strip_locksmith_scripts(input: &str) -> Transformed {
    replace_counted(&LOCKSMITH_RE, input, "")
}

/// Replaces inline `location` writes with a console warning.
pub fn neutralize_location_writes(input: &str) -> Transformed {
    replace_counted(&LOCATION_WRITE_RE, input, NEUTRALIZED_LOCATION)
}

/// Drops inline scripts whose text mentions `host`. Mentions that are only
/// the proxy marker (`hmtarget=<host>`) do not count, and our own scripts
/// are never touched.
pub fn strip_self_reference_scripts(input: &str, host: &str) -> Transformed {
    if host.is_empty() {
        return Transformed {
            text: input.to_string(),
            count: 0,
        };
    }
    let host = host.to_ascii_lowercase();
    let marker = format!("hmtarget={host}");
    let mut count = 0;
    let text = SCRIPT_RE
        .replace_all(input, |caps: &Captures| {
            if caps["attrs"].contains("data-hm-proxy") {
                return caps[0].to_string();
            }
            let body = caps["body"].to_ascii_lowercase().replace(&marker, "");
            if body.contains(&host) {
                count += 1;
                SELF_REFERENCE_COMMENT.to_string()
            } else {
                caps[0].to_string()
            }
        })
        .into_owned();
    Transformed { text, count }
}

/// Inserts `block` before `<!DOCTYPE`, else before `<html`, else right after
/// the opening `<head>` tag, else at the very start.
pub fn inject(input: &str, block: &str) -> String {
    let at = DOCTYPE_RE
        .find(input)
        .or_else(|| HTML_OPEN_RE.find(input))
        .map(|m| m.start())
        .or_else(|| HEAD_OPEN_RE.find(input).map(|m| m.end()))
        .unwrap_or(0);
    let mut out = String::with_capacity(input.len() + block.len());
    out.push_str(&input[..at]);
    out.push_str(block);
    out.push_str(&input[at..]);
    out
}
