//! The URL rewrite engine.
//!
//! Every rule is a total function `(text, ctx) -> text` that leaves values
//! carrying the proxy marker alone, which makes the whole pipeline
//! idempotent. The HTML pipeline runs, in order:
//!
//! 1. lift out any previously injected block
//! 2. structural transforms (meta refresh, base href, optional location
//!    neutralization, self-reference and locksmith script removal)
//! 3. attribute rules: protocol-relative, absolute, root-relative
//! 4. `srcset` candidates
//! 5. CSS `url()` in `<style>` bodies and `style` attributes
//! 6. protocol-relative JS literals
//! 7. `window.location.origin` templates and concatenation
//! 8. `fetch()` with a literal path
//! 9. degenerate attribute values, then `import()` in SPA mode
//! 10. inject shim, Domain Lock and interceptor

pub mod attributes;
pub mod css;
pub mod json;
pub mod script;
pub mod srcset;
pub mod structure;

use crate::context::ProxyContext;
use crate::scripts;
use crate::shim::ShimScript;
use regex::{Captures, Match};

pub use json::rewrite_cart_json;

/// Counters for the structural transforms of one document.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RewriteStats {
    pub meta_refresh: usize,
    pub base_href: usize,
    pub location_writes: usize,
    pub self_reference: usize,
    pub locksmith: usize,
    pub shim: bool,
}

/// Rewrites an HTML document and injects the client runtime.
pub fn rewrite_html(body: &str, ctx: &ProxyContext, shim: Option<&ShimScript>) -> String {
    rewrite_html_with_stats(body, ctx, shim).0
}

pub fn rewrite_html_with_stats(
    body: &str,
    ctx: &ProxyContext,
    shim: Option<&ShimScript>,
) -> (String, RewriteStats) {
    let mut stats = RewriteStats {
        shim: shim.is_some(),
        ..RewriteStats::default()
    };

    let content = structure::lift_injected(body).text;

    let meta = structure::strip_meta_refresh(&content);
    stats.meta_refresh = meta.count;
    let base = structure::strip_base_href(&meta.text);
    stats.base_href = base.count;
    let mut content = base.text;

    if shim.is_some_and(|shim| shim.neutralize_location) {
        let neutralized = structure::neutralize_location_writes(&content);
        stats.location_writes = neutralized.count;
        content = neutralized.text;
    }

    let self_reference = structure::strip_self_reference_scripts(&content, &ctx.target.host);
    stats.self_reference = self_reference.count;
    let locksmith = structure::strip_locksmith_scripts(&self_reference.text);
    stats.locksmith = locksmith.count;

    let mut content = rewrite_urls(&locksmith.text, ctx);
    if ctx.mode().is_spa() {
        content = script::rewrite_dynamic_imports(&content, ctx);
    }

    let block = scripts::render(ctx, shim);
    tracing::debug!(
        target_host = %ctx.target.host,
        meta_refresh = stats.meta_refresh,
        base_href = stats.base_href,
        location_writes = stats.location_writes,
        self_reference = stats.self_reference,
        locksmith = stats.locksmith,
        shim = stats.shim,
        "rewrote document"
    );
    (structure::inject(&content, &block), stats)
}

/// Rules 1 to 9 in order, without structural transforms or injection.
pub fn rewrite_urls(input: &str, ctx: &ProxyContext) -> String {
    let content = attributes::rewrite_protocol_relative(input, ctx);
    let content = attributes::rewrite_absolute(&content, ctx);
    let content = attributes::rewrite_root_relative(&content, ctx);
    let content = srcset::rewrite_srcset(&content, ctx);
    let content = css::rewrite_document_css(&content, ctx);
    let content = script::rewrite_js_literals(&content, ctx);
    let content = script::rewrite_origin_concatenation(&content, ctx);
    let content = script::rewrite_fetch_calls(&content, ctx);
    attributes::rewrite_degenerate(&content, ctx)
}

/// Picks whichever of the `dq`, `sq` or `bq` groups matched, with its quote.
pub(crate) fn quoted<'h>(caps: &Captures<'h>) -> Option<(&'static str, Match<'h>)> {
    if let Some(value) = caps.name("dq") {
        return Some(("\"", value));
    }
    if let Some(value) = caps.name("sq") {
        return Some(("'", value));
    }
    caps.name("bq").map(|value| ("`", value))
}
