use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Last-seen timestamps keyed by request identity. A key seen again within
/// `window` is refused. Entries older than `retention` are dropped by
/// [`RequestGuard::sweep_at`].
pub struct RequestGuard {
    window: Duration,
    retention: Duration,
    seen: DashMap<String, Instant>,
}

impl RequestGuard {
    pub fn new(window: Duration, retention: Duration) -> Self {
        Self {
            window,
            retention,
            seen: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.window.is_zero()
    }

    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    /// `true` when the request may proceed. Refusals do not extend the window.
    pub fn check_at(&self, key: &str, now: Instant) -> bool {
        if !self.is_enabled() {
            return true;
        }
        match self.seen.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if now.saturating_duration_since(*occupied.get()) < self.window {
                    false
                } else {
                    occupied.insert(now);
                    true
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(now);
                true
            }
        }
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Evicts stale entries and returns how many were removed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let before = self.seen.len();
        self.seen
            .retain(|_, last| now.saturating_duration_since(*last) <= self.retention);
        before.saturating_sub(self.seen.len())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
