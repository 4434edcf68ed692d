//! TTL deduplication of trigger event keys

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default dedup window
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(60);

/// Upper bound on remembered keys; expired keys are purged first
pub const MAX_TRACKED_KEYS: usize = 50_000;

#[derive(Debug)]
pub struct EventDeduplicator {
    ttl: Duration,
    seen: HashMap<String, Instant>,
    suppressed: u64,
}

impl Default for EventDeduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_TTL)
    }
}

impl EventDeduplicator {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: HashMap::new(),
            suppressed: 0,
        }
    }

    /// Returns true the first time `key` is seen within the TTL
    pub fn check_and_insert(&mut self, key: &str, now: Instant) -> bool {
        if let Some(first_seen) = self.seen.get(key) {
            if now.saturating_duration_since(*first_seen) < self.ttl {
                self.suppressed += 1;
                return false;
            }
        }

        if self.seen.len() >= MAX_TRACKED_KEYS {
            self.purge_expired(now);
        }
        self.seen.insert(key.to_string(), now);
        true
    }

    /// Forget `key` so a re-delivered event is processed again
    pub fn remove(&mut self, key: &str) -> bool {
        self.seen.remove(key).is_some()
    }

    pub fn purge_expired(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.seen
            .retain(|_, first_seen| now.saturating_duration_since(*first_seen) < ttl);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removed_key_admitted_again() {
        let mut d = EventDeduplicator::new(Duration::from_secs(60));
        let now = Instant::now();
        assert!(d.check_and_insert("MintA:100", now));
        assert!(d.remove("MintA:100"));
        assert!(d.check_and_insert("MintA:100", now + Duration::from_secs(1)));
        assert!(!d.remove("MintB:1"));
    }

    #[test]
    fn test_duplicate_within_ttl_suppressed() {
        let mut d = EventDeduplicator::new(Duration::from_secs(60));
        let now = Instant::now();
        assert!(d.check_and_insert("MintA:100", now));
        assert!(!d.check_and_insert("MintA:100", now + Duration::from_secs(2)));
        assert_eq!(d.suppressed(), 1);
    }

    #[test]
    fn test_duplicate_after_ttl_accepted() {
        let mut d = EventDeduplicator::new(Duration::from_secs(60));
        let now = Instant::now();
        assert!(d.check_and_insert("MintA:100", now));
        assert!(d.check_and_insert("MintA:100", now + Duration::from_secs(61)));
    }

    #[test]
    fn test_distinct_keys_independent() {
        let mut d = EventDeduplicator::default();
        let now = Instant::now();
        assert!(d.check_and_insert("MintA:100", now));
        assert!(d.check_and_insert("MintA:101", now));
        assert!(d.check_and_insert("MintB:100", now));
        assert_eq!(d.len(), 3);
    }

    #[test]
    fn test_purge_expired() {
        let mut d = EventDeduplicator::new(Duration::from_secs(10));
        let now = Instant::now();
        d.check_and_insert("a", now);
        d.check_and_insert("b", now + Duration::from_secs(8));
        d.purge_expired(now + Duration::from_secs(12));
        assert_eq!(d.len(), 1);
    }
}
