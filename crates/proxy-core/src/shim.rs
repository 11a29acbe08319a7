use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use thiserror::Error;

/// A per-site compatibility script ready for injection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShimScript {
    pub name: String,
    pub source: String,
    /// Also turn inline `location` writes into warnings for this site.
    pub neutralize_location: bool,
}

/// `PATTERN=FILE[:neutralize]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShimEntry {
    pub pattern: String,
    pub file: String,
    pub neutralize_location: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShimEntryError {
    #[error("expected PATTERN=FILE[:neutralize], got {0:?}")]
    Malformed(String),
    #[error("unknown shim flag {0:?}")]
    UnknownFlag(String),
}

impl FromStr for ShimEntry {
    type Err = ShimEntryError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (pattern, rest) = raw
            .split_once('=')
            .ok_or_else(|| ShimEntryError::Malformed(raw.to_string()))?;
        let (file, flag) = match rest.split_once(':') {
            Some((file, flag)) => (file, Some(flag)),
            None => (rest, None),
        };
        let pattern = pattern.trim().to_ascii_lowercase();
        let file = file.trim();
        if pattern.is_empty() || file.is_empty() {
            return Err(ShimEntryError::Malformed(raw.to_string()));
        }
        let neutralize_location = match flag.map(str::trim) {
            None => false,
            Some("neutralize") => true,
            Some(other) => return Err(ShimEntryError::UnknownFlag(other.to_string())),
        };
        Ok(Self {
            pattern,
            file: file.to_string(),
            neutralize_location,
        })
    }
}

struct CachedShim {
    loaded_at: Instant,
    text: String,
}

/// Host pattern to script file registry with a process-wide, read-mostly
/// file cache keyed by file name.
pub struct ShimRegistry {
    dir: PathBuf,
    entries: Vec<ShimEntry>,
    ttl: Duration,
    cache: RwLock<HashMap<String, CachedShim>>,
}

impl ShimRegistry {
    pub fn new(dir: impl Into<PathBuf>, entries: Vec<ShimEntry>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            entries,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn empty() -> Self {
        Self::new(PathBuf::new(), Vec::new(), Duration::ZERO)
    }

    pub fn entries(&self) -> &[ShimEntry] {
        &self.entries
    }

    /// Exact host match first, then the first entry whose pattern is a
    /// substring of the host.
    pub fn entry_for(&self, host: &str) -> Option<&ShimEntry> {
        let host = host.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|entry| entry.pattern == host)
            .or_else(|| self.entries.iter().find(|entry| host.contains(&entry.pattern)))
    }

    pub fn lookup(&self, host: &str) -> Option<ShimScript> {
        self.lookup_at(host, Instant::now())
    }

    pub fn lookup_at(&self, host: &str, now: Instant) -> Option<ShimScript> {
        let entry = self.entry_for(host)?;
        let text = self.load(&entry.file, now)?;
        Some(ShimScript {
            name: entry.file.clone(),
            source: text.replace("__HM_TARGET__", host),
            neutralize_location: entry.neutralize_location,
        })
    }

    fn load(&self, file: &str, now: Instant) -> Option<String> {
        if let Ok(cache) = self.cache.read() {
            if let Some(cached) = cache.get(file) {
                if now.saturating_duration_since(cached.loaded_at) < self.ttl {
                    return Some(cached.text.clone());
                }
            }
        }

        let path = self.dir.join(file);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "shim script unavailable");
                return None;
            }
        };
        tracing::debug!(file, bytes = text.len(), "loaded shim script");
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(
                file.to_string(),
                CachedShim {
                    loaded_at: now,
                    text: text.clone(),
                },
            );
        }
        Some(text)
    }
}
