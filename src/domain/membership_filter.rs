//! Membership Filter
//!
//! Counting Bloom filter answering "is this token protected" without a
//! store round trip. False positives fall through to the store; false
//! negatives never happen, so removals are guarded.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Default expected number of protected tokens
pub const DEFAULT_EXPECTED_ITEMS: usize = 10_000;

/// Default target false-positive rate
pub const DEFAULT_FALSE_POSITIVE_RATE: f64 = 0.01;

const MAX_HASHES: u32 = 16;
const SEED_A: u64 = 0x9E37_79B9_7F4A_7C15;
const SEED_B: u64 = 0xC2B2_AE3D_27D4_EB4F;

/// Tuning snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterStats {
    pub items: usize,
    pub slots: usize,
    pub hashes: u32,
    pub memory_bytes: usize,
    pub estimated_false_positive_rate: f64,
}

#[derive(Debug, Clone)]
pub struct MembershipFilter {
    counters: Vec<u8>,
    num_hashes: u32,
    items: usize,
}

impl Default for MembershipFilter {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EXPECTED_ITEMS, DEFAULT_FALSE_POSITIVE_RATE)
    }
}

impl MembershipFilter {
    /// Size the filter for `expected_items` at `false_positive_rate`
    pub fn with_capacity(expected_items: usize, false_positive_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let p = if false_positive_rate > 0.0 && false_positive_rate < 1.0 {
            false_positive_rate
        } else {
            DEFAULT_FALSE_POSITIVE_RATE
        };
        let ln2 = std::f64::consts::LN_2;

        let slots = (-(n * p.ln()) / (ln2 * ln2)).ceil().max(8.0) as usize;
        let num_hashes = ((slots as f64 / n) * ln2).round().clamp(1.0, MAX_HASHES as f64) as u32;

        Self {
            counters: vec![0; slots],
            num_hashes,
            items: 0,
        }
    }

    fn indexes(&self, key: &str) -> Vec<usize> {
        let h1 = seeded_hash(key, SEED_A);
        // Odd second hash so the stride never collapses to zero
        let h2 = seeded_hash(key, SEED_B) | 1;
        let m = self.counters.len() as u64;
        (0..self.num_hashes as u64)
            .map(|i| (h1.wrapping_add(i.wrapping_mul(h2)) % m) as usize)
            .collect()
    }

    /// Add one count for `key`. Empty keys are ignored.
    pub fn add(&mut self, key: &str) -> bool {
        if key.trim().is_empty() {
            tracing::warn!("Membership filter: ignoring add of empty key");
            return false;
        }
        for idx in self.indexes(key) {
            // Saturated counters stay saturated
            self.counters[idx] = self.counters[idx].saturating_add(1);
        }
        self.items += 1;
        true
    }

    /// Remove one count for `key`, only if every slot is non-zero.
    /// Returns false (no-op) otherwise.
    pub fn remove(&mut self, key: &str) -> bool {
        if key.trim().is_empty() {
            tracing::warn!("Membership filter: ignoring remove of empty key");
            return false;
        }
        let indexes = self.indexes(key);
        if indexes.iter().any(|&i| self.counters[i] == 0) {
            tracing::debug!("Membership filter: remove of absent key {} ignored", key);
            return false;
        }
        for idx in indexes {
            if self.counters[idx] != u8::MAX {
                self.counters[idx] -= 1;
            }
        }
        self.items = self.items.saturating_sub(1);
        true
    }

    /// May return a false positive, never a false negative
    pub fn contains(&self, key: &str) -> bool {
        if key.trim().is_empty() {
            return false;
        }
        self.indexes(key).into_iter().all(|i| self.counters[i] > 0)
    }

    pub fn clear(&mut self) {
        self.counters.iter_mut().for_each(|c| *c = 0);
        self.items = 0;
    }

    pub fn len(&self) -> usize {
        self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items == 0
    }

    /// (1 - e^(-kn/m))^k for the current item count
    pub fn estimated_false_positive_rate(&self) -> f64 {
        let k = self.num_hashes as f64;
        let m = self.counters.len() as f64;
        let n = self.items as f64;
        (1.0 - (-k * n / m).exp()).powf(k)
    }

    pub fn memory_bytes(&self) -> usize {
        self.counters.len() * std::mem::size_of::<u8>()
    }

    pub fn stats(&self) -> FilterStats {
        FilterStats {
            items: self.items,
            slots: self.counters.len(),
            hashes: self.num_hashes,
            memory_bytes: self.memory_bytes(),
            estimated_false_positive_rate: self.estimated_false_positive_rate(),
        }
    }
}

fn seeded_hash(key: &str, seed: u64) -> u64 {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    key.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizing() {
        let f = MembershipFilter::with_capacity(1000, 0.01);
        // ~9.6 bits per item, 7 hashes
        assert!(f.memory_bytes() >= 9000 && f.memory_bytes() <= 10_000);
        assert_eq!(f.stats().hashes, 7);
    }

    #[test]
    fn test_no_false_negatives() {
        let mut f = MembershipFilter::with_capacity(500, 0.01);
        let keys: Vec<String> = (0..500).map(|i| format!("Mint{:04}", i)).collect();
        for k in &keys {
            f.add(k);
        }
        assert!(keys.iter().all(|k| f.contains(k)));
        assert_eq!(f.len(), 500);
    }

    #[test]
    fn test_remove_never_added_is_noop() {
        let mut f = MembershipFilter::with_capacity(100, 0.01);
        f.add("MintA");
        let before = f.counters.clone();
        assert!(!f.remove("NeverAdded"));
        assert_eq!(f.counters, before);
        assert!(f.contains("MintA"));
        assert_eq!(f.len(), 1);
    }

    #[test]
    fn test_remove_on_empty_filter() {
        let mut f = MembershipFilter::default();
        assert!(!f.remove("MintA"));
        assert!(f.counters.iter().all(|&c| c == 0));
    }

    #[test]
    fn test_counting_semantics() {
        let mut f = MembershipFilter::with_capacity(100, 0.01);
        f.add("MintA");
        f.add("MintA");
        assert!(f.remove("MintA"));
        assert!(f.contains("MintA"));
        assert!(f.remove("MintA"));
        assert!(!f.contains("MintA"));
    }

    #[test]
    fn test_removal_keeps_other_members() {
        let mut f = MembershipFilter::with_capacity(200, 0.01);
        for i in 0..200 {
            f.add(&format!("Mint{}", i));
        }
        for i in 0..100 {
            f.remove(&format!("Mint{}", i));
        }
        for i in 100..200 {
            assert!(f.contains(&format!("Mint{}", i)));
        }
    }

    #[test]
    fn test_empty_key_ignored() {
        let mut f = MembershipFilter::default();
        assert!(!f.add(""));
        assert!(!f.contains(""));
        assert!(!f.remove("  "));
        assert!(f.is_empty());
    }

    #[test]
    fn test_false_positive_estimate_grows() {
        let mut f = MembershipFilter::with_capacity(100, 0.01);
        assert_eq!(f.estimated_false_positive_rate(), 0.0);
        for i in 0..100 {
            f.add(&format!("Mint{}", i));
        }
        let rate = f.estimated_false_positive_rate();
        assert!(rate > 0.0 && rate < 0.02, "rate was {}", rate);
    }

    #[test]
    fn test_clear() {
        let mut f = MembershipFilter::default();
        f.add("MintA");
        f.clear();
        assert!(!f.contains("MintA"));
        assert!(f.is_empty());
    }
}
