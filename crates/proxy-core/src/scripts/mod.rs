//! Client-side runtime injected into every rewritten document.
//!
//! All scripts are static templates filled from the [`ProxyContext`] alone,
//! so the same context always yields byte-identical output.

use crate::context::ProxyContext;
use crate::shim::ShimScript;
use crate::urls::SOCKET_BRIDGE_PREFIX;

const DOMAIN_LOCK: &str = include_str!("domain_lock.js");
const INTERCEPTOR: &str = include_str!("interceptor.js");
const INTERCEPTOR_SPA: &str = include_str!("interceptor_spa.js");

const SPA_SLOT: &str = "/*__HM_SPA_EXTENSIONS__*/";

pub const BLOCK_BEGIN: &str = "<!--hm-proxy:begin-->";
pub const BLOCK_END: &str = "<!--hm-proxy:end-->";

pub const DOMAIN_LOCK_TAG: &str = r#"<script data-hm-proxy="domain-lock">"#;
pub const INTERCEPTOR_TAG: &str = r#"<script data-hm-proxy="interceptor">"#;
pub const INTERCEPTOR_SPA_TAG: &str = r#"<script data-hm-proxy="interceptor-spa">"#;
pub const SHIM_TAG: &str = r#"<script data-hm-proxy="shim">"#;

/// The complete injected block: optional shim, Domain Lock, then the
/// mode-specific interceptor.
pub fn render(ctx: &ProxyContext, shim: Option<&ShimScript>) -> String {
    let mut block = String::with_capacity(DOMAIN_LOCK.len() + INTERCEPTOR.len() * 2);
    block.push_str(BLOCK_BEGIN);
    if let Some(shim) = shim {
        push_script(&mut block, SHIM_TAG, &shim.source.replace("</script", "<\\/script"));
    }
    push_script(&mut block, DOMAIN_LOCK_TAG, &domain_lock(ctx));
    if ctx.mode().is_spa() {
        push_script(&mut block, INTERCEPTOR_SPA_TAG, &interceptor(ctx));
    } else {
        push_script(&mut block, INTERCEPTOR_TAG, &interceptor(ctx));
    }
    block.push_str(BLOCK_END);
    block
}

pub fn domain_lock(ctx: &ProxyContext) -> String {
    fill(DOMAIN_LOCK, ctx)
}

/// Classic or SPA interceptor, depending on the context mode.
pub fn interceptor(ctx: &ProxyContext) -> String {
    if ctx.mode().is_spa() {
        fill(&INTERCEPTOR.replace(SPA_SLOT, INTERCEPTOR_SPA), ctx)
    } else {
        fill(&INTERCEPTOR.replace(SPA_SLOT, ""), ctx)
    }
}

fn push_script(block: &mut String, open_tag: &str, source: &str) {
    block.push_str(open_tag);
    block.push('\n');
    block.push_str(source);
    block.push_str("</script>");
}

fn fill(template: &str, ctx: &ProxyContext) -> String {
    template
        .replace("__HM_TARGET__", &js_string(&ctx.target.host))
        .replace("__HM_PROXY_HOST__", &js_string(&ctx.proxy_host))
        .replace("__HM_PROTOCOL__", &js_string(ctx.protocol.as_str()))
        .replace("__HM_MODE__", &js_string(&ctx.mode().digit().to_string()))
        .replace("__HM_SOCKET_PREFIX__", &js_string(SOCKET_BRIDGE_PREFIX))
}

/// A JSON string literal that is also safe inside an inline `<script>`.
pub fn js_string(value: &str) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| String::from("\"\""))
        .replace('<', "\\u003c")
}
