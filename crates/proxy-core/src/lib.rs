//! Pure building blocks of the rewriting proxy: target resolution, content
//! classification, the URL rewrite engine and the injected client runtime.
//!
//! Nothing in this crate performs network I/O. The only shared mutable
//! state is the shim registry's file cache.

pub mod classify;
pub mod context;
pub mod rewrite;
pub mod scripts;
pub mod shim;
pub mod target;
pub mod urls;

pub use classify::{classify, is_cart_path, ContentKind};
pub use context::{append_marker, has_marker, marker, ProxyContext, ProxyMode, Scheme, Target, MARKER};
pub use rewrite::{rewrite_cart_json, rewrite_html, rewrite_html_with_stats, RewriteStats};
pub use shim::{ShimEntry, ShimEntryError, ShimRegistry, ShimScript};
pub use target::{asset_upstream_url, authority_of, resolve, upstream_url, ResolveError};
pub use urls::{
    decode_socket_target, encode_socket_target, rewrite_location, socket_bridge_url,
    SocketTargetError, SOCKET_BRIDGE_PREFIX,
};
