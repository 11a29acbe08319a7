//! JavaScript idioms: rules 6, 7 and 8, plus dynamic `import()` in SPA mode.

use super::quoted;
use crate::context::{has_marker, ProxyContext};
use crate::urls;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static JS_LITERAL_RES: Lazy<[Regex; 3]> = Lazy::new(|| {
    ['"', '\'', '`'].map(|q| {
        Regex::new(&format!(r#"{q}//(?P<host>[^/\s'"`]+)(?P<rest>[^'"`\r\n]*){q}"#))
            .expect("valid JS literal regex")
    })
});

static TEMPLATE_ORIGIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)(?P<origin>\$\{\s*window\.location\.origin\s*\})(?P<path>/[^`'"{}$\s]*)(?P<dynamic>\$\{)?"#,
    )
    .expect("valid template origin regex")
});

static CONCAT_ORIGIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)(?P<prefix>window\.location\.origin\s*\+\s*)(?:'(?P<sq>/[^']*)'|"(?P<dq>/[^"]*)"|`(?P<bq>/[^`]*)`)(?P<dynamic>\s*\+)?"#,
    )
    .expect("valid origin concatenation regex")
});

static FETCH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)(?P<prefix>\bfetch\s*\(\s*)(?:'(?P<sq>/(?:[^/'\n][^'\n]*)?)'|"(?P<dq>/(?:[^/"\n][^"\n]*)?)"|`(?P<bq>/(?:[^/`][^`]*)?)`)(?P<suffix>\s*[,)])"#,
    )
    .expect("valid fetch regex")
});

static IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?P<prefix>\bimport\s*\(\s*)(?:'(?P<sq>[^'\n]+)'|"(?P<dq>[^"\n]+)")(?P<suffix>\s*\))"#,
    )
    .expect("valid dynamic import regex")
});

/// Rule 6: protocol-relative string literals. Deliberately conservative:
/// the host must look like a hostname and neither the literal nor the line
/// leading up to it may look like a comment.
pub fn rewrite_js_literals(input: &str, ctx: &ProxyContext) -> String {
    let mut output = input.to_string();
    for re in JS_LITERAL_RES.iter() {
        let current = output;
        output = re
            .replace_all(&current, |caps: &Captures| {
                let whole = caps.get(0).map(|m| (m.start(), m.as_str()));
                let Some((start, literal)) = whole else {
                    return String::new();
                };
                let host = &caps["host"];
                let rest = &caps["rest"];
                if !hostname_like(host)
                    || rest.contains("//")
                    || rest.contains("/*")
                    || in_comment(&current[..start])
                {
                    return literal.to_string();
                }
                let quote = &literal[..1];
                match urls::protocol_relative(&format!("//{host}{rest}"), ctx) {
                    Some(url) => format!("{quote}{url}{quote}"),
                    None => literal.to_string(),
                }
            })
            .into_owned();
    }
    output
}

fn hostname_like(host: &str) -> bool {
    host.contains('.')
        && host.starts_with(|c: char| c.is_ascii_alphanumeric())
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':'))
}

/// True when the text leading up to a literal on its line opens a comment.
/// Quoted strings are skipped, and on a line that also carries markup only
/// the part after the last `<script...>` tag counts.
fn in_comment(before: &str) -> bool {
    let line = before.rsplit('\n').next().unwrap_or(before);
    if line.trim_start().starts_with('*') {
        return true;
    }
    let code = match line.to_ascii_lowercase().rfind("<script") {
        Some(open) => line[open..]
            .find('>')
            .map_or("", |close| &line[open + close + 1..]),
        None => line,
    };

    let mut quote = None;
    let mut chars = code.chars().peekable();
    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                if c == '\\' {
                    chars.next();
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' | '`' => quote = Some(c),
                '/' if matches!(chars.peek(), Some('/' | '*')) => return true,
                _ => {}
            },
        }
    }
    false
}

/// Rule 7: `${window.location.origin}/path` and
/// `window.location.origin + '/path'`. Only the path gains the marker.
/// Paths continued by another `${...}` or `+ ...` are left to the
/// interceptor.
pub fn rewrite_origin_concatenation(input: &str, ctx: &ProxyContext) -> String {
    let templated = TEMPLATE_ORIGIN_RE.replace_all(input, |caps: &Captures| {
        if caps.name("dynamic").is_some() {
            return caps[0].to_string();
        }
        match urls::mark_path(&caps["path"], ctx) {
            Some(path) => format!("{}{path}", &caps["origin"]),
            None => caps[0].to_string(),
        }
    });
    CONCAT_ORIGIN_RE
        .replace_all(&templated, |caps: &Captures| {
            if caps.name("dynamic").is_some() {
                return caps[0].to_string();
            }
            match quoted(caps).and_then(|(quote, path)| {
                urls::mark_path(path.as_str(), ctx).map(|path| (quote, path))
            }) {
                Some((quote, path)) => format!("{}{quote}{path}{quote}", &caps["prefix"]),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Rule 8: `fetch('/path', ...)` with a literal root-relative path.
pub fn rewrite_fetch_calls(input: &str, ctx: &ProxyContext) -> String {
    FETCH_RE
        .replace_all(input, |caps: &Captures| {
            match quoted(caps).and_then(|(quote, path)| {
                urls::mark_path(path.as_str(), ctx).map(|path| (quote, path))
            }) {
                Some((quote, path)) => {
                    format!("{}{quote}{path}{quote}{}", &caps["prefix"], &caps["suffix"])
                }
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// SPA only: literal `import("...")` arguments.
pub fn rewrite_dynamic_imports(input: &str, ctx: &ProxyContext) -> String {
    IMPORT_RE
        .replace_all(input, |caps: &Captures| {
            match quoted(caps).and_then(|(quote, spec)| {
                if has_marker(spec.as_str()) {
                    return None;
                }
                urls::proxify(spec.as_str(), ctx).map(|url| (quote, url))
            }) {
                Some((quote, url)) => {
                    format!("{}{quote}{url}{quote}{}", &caps["prefix"], &caps["suffix"])
                }
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
