use std::sync::atomic::{AtomicU64, Ordering};

/// Coarse relay counters. Owned by the server and shared with the broadcast
/// endpoint; all updates are relaxed.
#[derive(Debug, Default)]
pub struct RelayStats {
    requests: AtomicU64,
    pings: AtomicU64,
    announced: AtomicU64,
    rejected: AtomicU64,
    unknown: AtomicU64,
    published: AtomicU64,
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub pings: u64,
    pub announced: u64,
    pub rejected: u64,
    pub unknown: u64,
    pub published: u64,
    pub enqueued: u64,
    pub dropped: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inc_requests(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }
    #[inline]
    pub fn inc_pings(&self) {
        self.pings.fetch_add(1, Ordering::Relaxed);
    }
    #[inline]
    pub fn inc_announced(&self) {
        self.announced.fetch_add(1, Ordering::Relaxed);
    }
    #[inline]
    pub fn inc_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }
    #[inline]
    pub fn inc_unknown(&self) {
        self.unknown.fetch_add(1, Ordering::Relaxed);
    }
    #[inline]
    pub fn inc_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }
    #[inline]
    pub fn inc_enqueued(&self, n: u64) {
        self.enqueued.fetch_add(n, Ordering::Relaxed);
    }
    #[inline]
    pub fn inc_dropped(&self, n: u64) {
        self.dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            pings: self.pings.load(Ordering::Relaxed),
            announced: self.announced.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Prometheus-style text, without HELP/TYPE lines.
    pub fn render(&self) -> String {
        let s = self.snapshot();
        [
            ("requests", s.requests),
            ("pings", s.pings),
            ("announced", s.announced),
            ("rejected", s.rejected),
            ("unknown", s.unknown),
            ("published", s.published),
            ("enqueued", s.enqueued),
            ("dropped", s.dropped),
        ]
        .iter()
        .map(|(name, value)| format!("fanout_{name} {value}\n"))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = RelayStats::new();
        stats.inc_requests();
        stats.inc_requests();
        stats.inc_pings();
        stats.inc_enqueued(3);
        stats.inc_dropped(1);

        let snap = stats.snapshot();
        assert_eq!(snap.requests, 2);
        assert_eq!(snap.pings, 1);
        assert_eq!(snap.enqueued, 3);
        assert_eq!(snap.dropped, 1);
        assert_eq!(snap.published, 0);
    }

    #[test]
    fn render_lists_every_counter() {
        let stats = RelayStats::new();
        stats.inc_published();
        let text = stats.render();
        assert!(text.contains("fanout_published 1\n"));
        assert_eq!(text.lines().count(), 8);
    }
}
