use crate::fetcher::FetchSettings;
use clap::{Parser, ValueEnum};
use proxy_core::{Scheme, ShimEntry, ShimRegistry};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum UpstreamScheme {
    Http,
    Https,
}

impl From<UpstreamScheme> for Scheme {
    fn from(value: UpstreamScheme) -> Self {
        match value {
            UpstreamScheme::Http => Scheme::Http,
            UpstreamScheme::Https => Scheme::Https,
        }
    }
}

/// Runtime configuration. Every option also reads an environment variable.
#[derive(Debug, Clone, Parser)]
#[command(name = "rewrite-proxy", version, about = "Transparent URL-rewriting HTTP proxy")]
pub struct Config {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    #[arg(long, env = "PROXY_MAX_REDIRECTS", default_value_t = 5)]
    pub max_redirects: usize,

    /// Total attempts per fetch, shared across redirects.
    #[arg(long, env = "PROXY_MAX_RETRIES", default_value_t = 3)]
    pub max_retries: usize,

    #[arg(long, env = "PROXY_FETCH_TIMEOUT_SECS", default_value_t = 15)]
    pub fetch_timeout_secs: u64,

    /// Base of the linear backoff between attempts.
    #[arg(long, env = "PROXY_RETRY_BACKOFF_MS", default_value_t = 1000)]
    pub retry_backoff_ms: u64,

    #[arg(long, env = "PROXY_MAX_BODY_BYTES", default_value_t = 50 * 1024 * 1024)]
    pub max_body_bytes: usize,

    #[arg(long, env = "PROXY_UPSTREAM_SCHEME", value_enum, default_value_t = UpstreamScheme::Https)]
    pub upstream_scheme: UpstreamScheme,

    /// Window in which an identical method and URL fetch is refused. 0 disables.
    #[arg(long, env = "PROXY_LOOP_GUARD_MS", default_value_t = 200)]
    pub loop_guard_ms: u64,

    /// Per client, method and path cooldown on `/cart` routes. 0 disables.
    #[arg(long, env = "PROXY_CART_COOLDOWN_MS", default_value_t = 500)]
    pub cart_cooldown_ms: u64,

    #[arg(long, env = "PROXY_GUARD_RETENTION_SECS", default_value_t = 60)]
    pub guard_retention_secs: u64,

    #[arg(long, env = "PROXY_SWEEP_INTERVAL_SECS", default_value_t = 60)]
    pub sweep_interval_secs: u64,

    #[arg(long, env = "PROXY_SHIM_DIR", default_value = "site-specific-scripts")]
    pub shim_dir: PathBuf,

    /// `PATTERN=FILE[:neutralize]`, repeatable.
    #[arg(long = "shim", env = "PROXY_SHIMS", value_delimiter = ',')]
    pub shims: Vec<ShimEntry>,

    #[arg(long, env = "PROXY_SHIM_CACHE_TTL_SECS", default_value_t = 300)]
    pub shim_cache_ttl_secs: u64,

    #[arg(long, env = "PROXY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl Config {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            max_redirects: self.max_redirects,
            max_retries: self.max_retries,
            timeout: Duration::from_secs(self.fetch_timeout_secs),
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            loop_guard: Duration::from_millis(self.loop_guard_ms),
            guard_retention: self.guard_retention(),
        }
    }

    pub fn shim_registry(&self) -> ShimRegistry {
        ShimRegistry::new(
            self.shim_dir.clone(),
            self.shims.clone(),
            Duration::from_secs(self.shim_cache_ttl_secs),
        )
    }

    pub fn upstream_scheme(&self) -> Scheme {
        self.upstream_scheme.into()
    }

    pub fn cart_cooldown(&self) -> Duration {
        Duration::from_millis(self.cart_cooldown_ms)
    }

    pub fn guard_retention(&self) -> Duration {
        Duration::from_secs(self.guard_retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}
