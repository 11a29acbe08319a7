//! Decides which rewrite pass a response body receives.

const SNIFF_WINDOW: usize = 1000;

const BINARY_PREFIXES: [&str; 8] = [
    "image/",
    "video/",
    "audio/",
    "application/octet-stream",
    "application/pdf",
    "application/zip",
    "font/",
    "application/font",
];

const HTML_SIGNATURES: [&str; 9] = [
    "<!doctype",
    "<html",
    "<head",
    "<body",
    "<div",
    "<script",
    "<meta",
    "<title",
    "<link",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Json,
    Binary,
    Other,
}

/// Paths the cart heuristics apply to.
pub fn is_cart_path(path: &str) -> bool {
    path.contains("/cart/") || path.contains("cart.js")
}

pub fn classify(content_type: Option<&str>, body: &[u8], request_path: &str) -> ContentKind {
    let content_type = content_type.unwrap_or_default().trim().to_ascii_lowercase();

    if BINARY_PREFIXES
        .iter()
        .any(|prefix| content_type.starts_with(prefix))
    {
        return ContentKind::Binary;
    }
    if content_type.contains("text/html") {
        return ContentKind::Html;
    }
    if content_type.contains("application/json") && is_cart_path(request_path) {
        return ContentKind::Json;
    }
    if !declares_script_or_data(&content_type) && looks_like_html(body) {
        return ContentKind::Html;
    }
    ContentKind::Other
}

fn declares_script_or_data(content_type: &str) -> bool {
    ["javascript", "ecmascript", "text/css", "json"]
        .iter()
        .any(|kind| content_type.contains(kind))
}

fn looks_like_html(body: &[u8]) -> bool {
    let window = &body[..body.len().min(SNIFF_WINDOW)];
    let prefix = String::from_utf8_lossy(window).to_ascii_lowercase();
    HTML_SIGNATURES.iter().any(|sig| prefix.contains(sig))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_by_content_type() {
        assert_eq!(
            classify(Some("text/html; charset=utf-8"), b"whatever", "/"),
            ContentKind::Html
        );
        assert_eq!(classify(Some("TEXT/HTML"), b"", "/"), ContentKind::Html);
    }

    #[test]
    fn binary_wins_even_when_body_looks_like_markup() {
        for ct in [
            "image/png",
            "video/mp4",
            "audio/ogg",
            "application/octet-stream",
            "application/pdf",
            "application/zip",
            "font/woff2",
            "application/font-woff",
        ] {
            assert_eq!(classify(Some(ct), b"<html>", "/"), ContentKind::Binary, "{ct}");
        }
    }

    #[test]
    fn json_only_on_cart_paths() {
        assert_eq!(
            classify(Some("application/json"), b"{}", "/cart/add.js"),
            ContentKind::Json
        );
        assert_eq!(
            classify(Some("application/json"), b"{}", "/cart.js"),
            ContentKind::Json
        );
        assert_eq!(
            classify(Some("application/json"), b"{}", "/api/products"),
            ContentKind::Other
        );
    }

    #[test]
    fn mislabeled_html_is_sniffed() {
        assert_eq!(
            classify(Some("text/plain"), b"\n  <!DOCTYPE html><html></html>", "/"),
            ContentKind::Html
        );
        assert_eq!(classify(None, b"<DIV class=x>", "/"), ContentKind::Html);
    }

    #[test]
    fn sniff_only_looks_at_the_prefix() {
        let mut body = vec![b'a'; SNIFF_WINDOW];
        body.extend_from_slice(b"<html>");
        assert_eq!(classify(Some("text/plain"), &body, "/"), ContentKind::Other);
    }

    #[test]
    fn scripts_are_never_turned_into_documents() {
        let js = b"document.write('<div>hi</div>')";
        assert_eq!(
            classify(Some("application/javascript"), js, "/app.js"),
            ContentKind::Other
        );
        assert_eq!(
            classify(Some("text/css"), b"/* <link> */", "/a.css"),
            ContentKind::Other
        );
        assert_eq!(
            classify(Some("application/json"), b"{\"html\":\"<div>\"}", "/api"),
            ContentKind::Other
        );
    }
}
