//! Velocity Tracker
//!
//! Rolling price/liquidity/volume history per token, and the rate-of-change
//! signals derived from it.
//!
//! Window changes use the most recent sample at or before `latest - window`
//! as the reference. Nothing is extrapolated: a window without an older
//! sample reports 0.0 and its alert cannot fire.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub const ONE_MINUTE_MS: u64 = 60_000;
pub const FIVE_MINUTES_MS: u64 = 5 * ONE_MINUTE_MS;
pub const THIRTY_MINUTES_MS: u64 = 30 * ONE_MINUTE_MS;

/// Default retention of raw samples (one hour)
pub const DEFAULT_RETENTION_MS: u64 = 60 * ONE_MINUTE_MS;

/// Flash rug: liquidity drop within 1 minute (percent)
pub const DEFAULT_FLASH_RUG_DROP_PCT: f64 = 50.0;

/// Rapid drain: liquidity drop within 5 minutes (percent)
pub const DEFAULT_RAPID_DRAIN_DROP_PCT: f64 = 30.0;

/// Slow bleed: liquidity drop over 30 minutes (percent)
pub const DEFAULT_SLOW_BLEED_DROP_PCT: f64 = 15.0;

/// Volume spike: multiple of the recent baseline
pub const DEFAULT_VOLUME_SPIKE_MULTIPLIER: f64 = 5.0;

/// Minimum baseline samples before a volume spike can fire
pub const MIN_VOLUME_BASELINE_SAMPLES: usize = 3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VelocityError {
    #[error("Sample for {token} at {timestamp_ms} is older than latest {latest_ms}")]
    OutOfOrder {
        token: String,
        timestamp_ms: u64,
        latest_ms: u64,
    },

    #[error("Invalid sample: {0}")]
    InvalidSample(String),
}

/// One observation. Immutable once recorded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelocitySample {
    pub timestamp_ms: u64,
    pub price: f64,
    /// Liquidity in quote currency
    pub liquidity: f64,
    pub volume: f64,
}

impl VelocitySample {
    pub fn new(price: f64, liquidity: f64, volume: f64) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            timestamp_ms,
            price,
            liquidity,
            volume,
        }
    }

    pub fn at(timestamp_ms: u64, price: f64, liquidity: f64, volume: f64) -> Self {
        Self {
            timestamp_ms,
            price,
            liquidity,
            volume,
        }
    }

    pub fn validate(&self) -> Result<(), VelocityError> {
        for (name, v) in [("price", self.price), ("liquidity", self.liquidity), ("volume", self.volume)] {
            if !v.is_finite() || v < 0.0 {
                return Err(VelocityError::InvalidSample(format!("{} = {}", name, v)));
            }
        }
        Ok(())
    }
}

/// Percentage change over one window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowChange {
    pub price_change_pct: f64,
    pub liquidity_change_pct: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VelocityAlerts {
    pub flash_rug: bool,
    pub rapid_drain: bool,
    pub slow_bleed: bool,
    pub volume_spike: bool,
}

impl VelocityAlerts {
    pub fn any(&self) -> bool {
        self.flash_rug || self.rapid_drain || self.slow_bleed || self.volume_spike
    }

    pub fn flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if self.flash_rug {
            flags.push("flash_rug".to_string());
        }
        if self.rapid_drain {
            flags.push("rapid_drain".to_string());
        }
        if self.slow_bleed {
            flags.push("slow_bleed".to_string());
        }
        if self.volume_spike {
            flags.push("volume_spike".to_string());
        }
        flags
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocitySnapshot {
    pub token_mint: String,
    pub latest: VelocitySample,
    pub one_minute: WindowChange,
    pub five_minutes: WindowChange,
    pub thirty_minutes: WindowChange,
    /// Latest volume over baseline mean, 0.0 without a baseline
    pub volume_ratio: f64,
    pub alerts: VelocityAlerts,
    pub sample_count: usize,
}

impl VelocitySnapshot {
    /// Single decision consumed by the orchestrator
    pub fn needs_immediate_check(&self) -> bool {
        self.alerts.any()
    }
}

/// Alert policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VelocityThresholds {
    pub flash_rug_drop_pct: f64,
    pub rapid_drain_drop_pct: f64,
    pub slow_bleed_drop_pct: f64,
    pub volume_spike_multiplier: f64,
    pub retention_ms: u64,
}

impl Default for VelocityThresholds {
    fn default() -> Self {
        Self {
            flash_rug_drop_pct: DEFAULT_FLASH_RUG_DROP_PCT,
            rapid_drain_drop_pct: DEFAULT_RAPID_DRAIN_DROP_PCT,
            slow_bleed_drop_pct: DEFAULT_SLOW_BLEED_DROP_PCT,
            volume_spike_multiplier: DEFAULT_VOLUME_SPIKE_MULTIPLIER,
            retention_ms: DEFAULT_RETENTION_MS,
        }
    }
}

#[derive(Debug, Default)]
struct TokenSeries {
    samples: VecDeque<VelocitySample>,
    snapshot: Option<VelocitySnapshot>,
}

/// Per-token series behind sharded locks. Each token's series is only
/// mutated through `record`, which holds that shard's write lock.
#[derive(Debug, Default)]
pub struct VelocityTracker {
    series: DashMap<String, TokenSeries>,
    thresholds: VelocityThresholds,
}

impl VelocityTracker {
    pub fn new(thresholds: VelocityThresholds) -> Self {
        Self {
            series: DashMap::new(),
            thresholds,
        }
    }

    /// Append a sample, prune, and recompute the snapshot
    pub fn record(&self, token_mint: &str, sample: VelocitySample) -> Result<VelocitySnapshot, VelocityError> {
        sample.validate()?;

        let mut entry = self.series.entry(token_mint.to_string()).or_default();
        let series = entry.value_mut();

        if let Some(last) = series.samples.back() {
            if sample.timestamp_ms < last.timestamp_ms {
                return Err(VelocityError::OutOfOrder {
                    token: token_mint.to_string(),
                    timestamp_ms: sample.timestamp_ms,
                    latest_ms: last.timestamp_ms,
                });
            }
        }

        series.samples.push_back(sample);

        let cutoff = sample.timestamp_ms.saturating_sub(self.thresholds.retention_ms);
        while series.samples.front().map_or(false, |s| s.timestamp_ms < cutoff) {
            series.samples.pop_front();
        }

        let snapshot = compute_snapshot(token_mint, &series.samples, &self.thresholds);
        if snapshot.alerts.any() {
            tracing::warn!(
                token = token_mint,
                flags = ?snapshot.alerts.flags(),
                liq_1m = snapshot.one_minute.liquidity_change_pct,
                liq_5m = snapshot.five_minutes.liquidity_change_pct,
                "Velocity alert"
            );
        }
        series.snapshot = Some(snapshot.clone());
        Ok(snapshot)
    }

    pub fn snapshot(&self, token_mint: &str) -> Option<VelocitySnapshot> {
        self.series.get(token_mint).and_then(|s| s.snapshot.clone())
    }

    pub fn needs_immediate_check(&self, token_mint: &str) -> bool {
        self.snapshot(token_mint)
            .map(|s| s.needs_immediate_check())
            .unwrap_or(false)
    }

    pub fn tracked_tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self.series.iter().map(|e| e.key().clone()).collect();
        tokens.sort();
        tokens
    }

    pub fn sample_count(&self, token_mint: &str) -> usize {
        self.series.get(token_mint).map(|s| s.samples.len()).unwrap_or(0)
    }

    pub fn untrack(&self, token_mint: &str) -> bool {
        self.series.remove(token_mint).is_some()
    }

    pub fn thresholds(&self) -> &VelocityThresholds {
        &self.thresholds
    }
}

fn compute_snapshot(
    token_mint: &str,
    samples: &VecDeque<VelocitySample>,
    thresholds: &VelocityThresholds,
) -> VelocitySnapshot {
    // Callers always push before computing
    let latest = samples.back().copied().unwrap_or(VelocitySample::at(0, 0.0, 0.0, 0.0));

    let one_minute = window_change(samples, &latest, ONE_MINUTE_MS);
    let five_minutes = window_change(samples, &latest, FIVE_MINUTES_MS);
    let thirty_minutes = window_change(samples, &latest, THIRTY_MINUTES_MS);
    let volume_ratio = volume_ratio(samples, &latest);

    let alerts = VelocityAlerts {
        flash_rug: one_minute.liquidity_change_pct <= -thresholds.flash_rug_drop_pct,
        rapid_drain: five_minutes.liquidity_change_pct <= -thresholds.rapid_drain_drop_pct,
        slow_bleed: thirty_minutes.liquidity_change_pct <= -thresholds.slow_bleed_drop_pct
            && five_minutes.liquidity_change_pct <= 0.0,
        volume_spike: volume_ratio > thresholds.volume_spike_multiplier,
    };

    VelocitySnapshot {
        token_mint: token_mint.to_string(),
        latest,
        one_minute,
        five_minutes,
        thirty_minutes,
        volume_ratio,
        alerts,
        sample_count: samples.len(),
    }
}

/// Most recent sample at or before `latest - window`
fn reference_sample<'a>(
    samples: &'a VecDeque<VelocitySample>,
    latest: &VelocitySample,
    window_ms: u64,
) -> Option<&'a VelocitySample> {
    let boundary = latest.timestamp_ms.checked_sub(window_ms)?;
    samples.iter().rev().find(|s| s.timestamp_ms <= boundary)
}

fn window_change(samples: &VecDeque<VelocitySample>, latest: &VelocitySample, window_ms: u64) -> WindowChange {
    match reference_sample(samples, latest, window_ms) {
        Some(reference) => WindowChange {
            price_change_pct: pct_change(reference.price, latest.price),
            liquidity_change_pct: pct_change(reference.liquidity, latest.liquidity),
        },
        None => WindowChange::default(),
    }
}

fn pct_change(from: f64, to: f64) -> f64 {
    if from <= 0.0 {
        return 0.0;
    }
    let change = (to - from) / from * 100.0;
    if change.is_finite() {
        change
    } else {
        0.0
    }
}

fn volume_ratio(samples: &VecDeque<VelocitySample>, latest: &VelocitySample) -> f64 {
    let since = latest.timestamp_ms.saturating_sub(THIRTY_MINUTES_MS);
    let baseline: Vec<f64> = samples
        .iter()
        .rev()
        .skip(1)
        .take_while(|s| s.timestamp_ms >= since)
        .map(|s| s.volume)
        .collect();

    if baseline.len() < MIN_VOLUME_BASELINE_SAMPLES {
        return 0.0;
    }
    let mean = baseline.iter().sum::<f64>() / baseline.len() as f64;
    if mean <= 0.0 {
        return 0.0;
    }
    latest.volume / mean
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const T0: u64 = 1_700_000_000_000;

    fn tracker() -> VelocityTracker {
        VelocityTracker::new(VelocityThresholds::default())
    }

    #[test]
    fn test_single_sample_reports_zero() {
        let t = tracker();
        let snap = t.record("MintA", VelocitySample::at(T0, 1.0, 1000.0, 10.0)).unwrap();
        assert_eq!(snap.one_minute, WindowChange::default());
        assert_eq!(snap.thirty_minutes.liquidity_change_pct, 0.0);
        assert!(!snap.alerts.any());
    }

    #[test]
    fn test_window_without_old_sample_is_exactly_zero() {
        let t = tracker();
        // 90s of history: 1m window has a reference, 5m and 30m do not
        t.record("MintA", VelocitySample::at(T0, 1.0, 1000.0, 10.0)).unwrap();
        let snap = t
            .record("MintA", VelocitySample::at(T0 + 90_000, 0.1, 100.0, 10.0))
            .unwrap();
        assert_relative_eq!(snap.one_minute.liquidity_change_pct, -90.0);
        assert_eq!(snap.five_minutes.liquidity_change_pct, 0.0);
        assert_eq!(snap.five_minutes.price_change_pct, 0.0);
        assert!(!snap.five_minutes.liquidity_change_pct.is_nan());
        assert!(!snap.alerts.rapid_drain);
    }

    #[test]
    fn test_flash_rug_60pct_in_30s() {
        let t = tracker();
        t.record("MintA", VelocitySample::at(T0, 1.0, 10_000.0, 50.0)).unwrap();
        t.record("MintA", VelocitySample::at(T0 + 40_000, 1.0, 10_000.0, 50.0)).unwrap();
        let snap = t
            .record("MintA", VelocitySample::at(T0 + 70_000, 0.4, 4_000.0, 50.0))
            .unwrap();
        assert_relative_eq!(snap.one_minute.liquidity_change_pct, -60.0);
        assert!(snap.alerts.flash_rug);
        assert!(snap.needs_immediate_check());
        assert!(t.needs_immediate_check("MintA"));
    }

    #[test]
    fn test_reference_is_nearest_at_or_before_boundary() {
        let t = tracker();
        t.record("MintA", VelocitySample::at(T0, 1.0, 1000.0, 1.0)).unwrap();
        t.record("MintA", VelocitySample::at(T0 + 10_000, 1.0, 800.0, 1.0)).unwrap();
        t.record("MintA", VelocitySample::at(T0 + 50_000, 1.0, 500.0, 1.0)).unwrap();
        // boundary = T0 + 10s, reference is the 800 sample
        let snap = t.record("MintA", VelocitySample::at(T0 + 70_000, 1.0, 400.0, 1.0)).unwrap();
        assert_relative_eq!(snap.one_minute.liquidity_change_pct, -50.0);
    }

    #[test]
    fn test_rapid_drain() {
        let t = tracker();
        t.record("MintA", VelocitySample::at(T0, 1.0, 1000.0, 1.0)).unwrap();
        t.record("MintA", VelocitySample::at(T0 + 4 * ONE_MINUTE_MS, 1.0, 900.0, 1.0)).unwrap();
        let snap = t
            .record("MintA", VelocitySample::at(T0 + 5 * ONE_MINUTE_MS, 0.7, 650.0, 1.0))
            .unwrap();
        assert!(snap.alerts.rapid_drain);
        assert!(!snap.alerts.flash_rug);
    }

    #[test]
    fn test_slow_bleed_requires_ongoing_decline() {
        let t = tracker();
        t.record("MintA", VelocitySample::at(T0, 1.0, 1000.0, 1.0)).unwrap();
        t.record("MintA", VelocitySample::at(T0 + 25 * ONE_MINUTE_MS, 1.0, 850.0, 1.0)).unwrap();
        let snap = t
            .record("MintA", VelocitySample::at(T0 + 30 * ONE_MINUTE_MS, 1.0, 800.0, 1.0))
            .unwrap();
        assert!(snap.alerts.slow_bleed);

        let t = tracker();
        t.record("MintB", VelocitySample::at(T0, 1.0, 1000.0, 1.0)).unwrap();
        t.record("MintB", VelocitySample::at(T0 + 25 * ONE_MINUTE_MS, 1.0, 700.0, 1.0)).unwrap();
        // Recovering over the last 5 minutes
        let snap = t
            .record("MintB", VelocitySample::at(T0 + 30 * ONE_MINUTE_MS, 1.0, 800.0, 1.0))
            .unwrap();
        assert!(!snap.alerts.slow_bleed);
    }

    #[test]
    fn test_volume_spike() {
        let t = tracker();
        for i in 0..4 {
            t.record("MintA", VelocitySample::at(T0 + i * 10_000, 1.0, 1000.0, 100.0)).unwrap();
        }
        let snap = t
            .record("MintA", VelocitySample::at(T0 + 50_000, 1.0, 1000.0, 600.0))
            .unwrap();
        assert_relative_eq!(snap.volume_ratio, 6.0);
        assert!(snap.alerts.volume_spike);
    }

    #[test]
    fn test_volume_spike_needs_baseline() {
        let t = tracker();
        t.record("MintA", VelocitySample::at(T0, 1.0, 1000.0, 1.0)).unwrap();
        let snap = t.record("MintA", VelocitySample::at(T0 + 1000, 1.0, 1000.0, 500.0)).unwrap();
        assert_eq!(snap.volume_ratio, 0.0);
        assert!(!snap.alerts.volume_spike);
    }

    #[test]
    fn test_zero_reference_does_not_produce_nan() {
        let t = tracker();
        t.record("MintA", VelocitySample::at(T0, 0.0, 0.0, 0.0)).unwrap();
        let snap = t.record("MintA", VelocitySample::at(T0 + 61_000, 1.0, 100.0, 1.0)).unwrap();
        assert_eq!(snap.one_minute.price_change_pct, 0.0);
        assert_eq!(snap.one_minute.liquidity_change_pct, 0.0);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let t = tracker();
        t.record("MintA", VelocitySample::at(T0 + 1000, 1.0, 1.0, 1.0)).unwrap();
        let err = t.record("MintA", VelocitySample::at(T0, 1.0, 1.0, 1.0)).unwrap_err();
        assert!(matches!(err, VelocityError::OutOfOrder { .. }));
        assert_eq!(t.sample_count("MintA"), 1);
    }

    #[test]
    fn test_invalid_sample_rejected() {
        let t = tracker();
        assert!(t.record("MintA", VelocitySample::at(T0, f64::NAN, 1.0, 1.0)).is_err());
        assert!(t.record("MintA", VelocitySample::at(T0, 1.0, -5.0, 1.0)).is_err());
        assert!(t.snapshot("MintA").is_none());
    }

    #[test]
    fn test_retention_prunes_old_samples() {
        let t = tracker();
        t.record("MintA", VelocitySample::at(T0, 1.0, 1.0, 1.0)).unwrap();
        t.record("MintA", VelocitySample::at(T0 + 30 * ONE_MINUTE_MS, 1.0, 1.0, 1.0)).unwrap();
        t.record("MintA", VelocitySample::at(T0 + 61 * ONE_MINUTE_MS, 1.0, 1.0, 1.0)).unwrap();
        assert_eq!(t.sample_count("MintA"), 2);
    }

    #[test]
    fn test_tracked_and_untrack() {
        let t = tracker();
        t.record("MintB", VelocitySample::at(T0, 1.0, 1.0, 1.0)).unwrap();
        t.record("MintA", VelocitySample::at(T0, 1.0, 1.0, 1.0)).unwrap();
        assert_eq!(t.tracked_tokens(), vec!["MintA".to_string(), "MintB".to_string()]);
        assert!(t.untrack("MintA"));
        assert!(!t.untrack("MintA"));
        assert!(t.snapshot("MintA").is_none());
    }

    #[test]
    fn test_alert_flags_list() {
        let alerts = VelocityAlerts {
            flash_rug: true,
            volume_spike: true,
            ..Default::default()
        };
        assert_eq!(alerts.flags(), vec!["flash_rug", "volume_spike"]);
    }
}
