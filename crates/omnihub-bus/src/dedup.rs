//! Idempotent receive-side deduplication keyed by provider external id.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use omnihub_core::config::DEDUP_TTL_SECS;

/// Remembers externally-assigned message ids for a TTL so a webhook (or
/// bus redelivery) seen twice is forwarded only once.
pub struct MessageDeduplicator {
    seen: Mutex<HashMap<String, DateTime<Utc>>>,
    ttl: Duration,
}

impl MessageDeduplicator {
    pub fn new() -> Self {
        Self::with_ttl(Duration::seconds(DEDUP_TTL_SECS))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns `true` the first time an id is seen within the TTL.
    /// Duplicates are recorded (refreshing nothing) and reported `false`.
    pub fn check_and_record(&self, external_id: &str) -> bool {
        let now = Utc::now();
        let mut seen = self.seen.lock().unwrap();
        match seen.get(external_id) {
            Some(at) if now.signed_duration_since(*at) < self.ttl => false,
            _ => {
                seen.insert(external_id.to_string(), now);
                true
            }
        }
    }

    /// Drop expired entries. Called by the sweeper task.
    pub fn sweep(&self) {
        let now = Utc::now();
        let mut seen = self.seen.lock().unwrap();
        let before = seen.len();
        seen.retain(|_, at| now.signed_duration_since(*at) < self.ttl);
        let removed = before - seen.len();
        if removed > 0 {
            debug!(removed, remaining = seen.len(), "dedup sweep");
        }
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Background sweeper; runs until the token is cancelled.
    pub async fn run_sweeper(&self, interval_secs: u64, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => self.sweep(),
                _ = shutdown.cancelled() => return,
            }
        }
    }
}

impl Default for MessageDeduplicator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_seen_passes_duplicate_drops() {
        let dedup = MessageDeduplicator::new();
        assert!(dedup.check_and_record("wamid.M1"));
        assert!(!dedup.check_and_record("wamid.M1"));
        assert!(dedup.check_and_record("wamid.M2"));
    }

    #[test]
    fn expired_entry_passes_again() {
        let dedup = MessageDeduplicator::with_ttl(Duration::milliseconds(-1));
        assert!(dedup.check_and_record("wamid.M1"));
        // TTL already elapsed, so the same id is fresh again.
        assert!(dedup.check_and_record("wamid.M1"));
    }

    #[test]
    fn sweep_removes_expired_entries() {
        let dedup = MessageDeduplicator::with_ttl(Duration::milliseconds(-1));
        dedup.check_and_record("a");
        dedup.check_and_record("b");
        assert_eq!(dedup.len(), 2);
        dedup.sweep();
        assert!(dedup.is_empty());
    }
}
