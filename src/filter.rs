//! Sequential gate for raw GPS fixes.
//!
//! Each fix runs through the gates in a fixed order and the first failing
//! gate decides the rejection reason:
//!
//! 1. coordinates are finite and in range
//! 2. horizontal accuracy is positive and within the threshold
//! 3. the fix is not older than the maximum age
//! 4. the fix moved far enough from the last accepted fix
//! 5. the reported (or implied) speed is plausible for the activity
//!
//! Rejections are normal outcomes, reported through [`FilterDecision`] and
//! counted in [`FilterStatistics`]. Only accepted fixes move the displacement
//! baseline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, warn};

use crate::geo_utils::haversine_distance;
use crate::RawFix;

// ============================================================================
// Clock
// ============================================================================

/// Source of "now" for staleness checks, in seconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// A settable clock for replaying recorded tracks and for tests.
#[derive(Debug)]
pub struct FixedClock {
    bits: AtomicU64,
}

impl FixedClock {
    pub fn new(now: f64) -> Self {
        Self { bits: AtomicU64::new(now.to_bits()) }
    }

    pub fn set(&self, now: f64) {
        self.bits.store(now.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

// ============================================================================
// Types
// ============================================================================

/// Thresholds for the fix filter.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FilterConfig {
    /// Maximum horizontal accuracy radius accepted, in meters. Default: 20.0
    pub accuracy_threshold: f64,
    /// Maximum fix age relative to now, in seconds. Default: 10.0
    pub max_age_seconds: f64,
    /// Minimum distance from the last accepted fix, in meters. Default: 5.0
    pub minimum_displacement: f64,
    /// Highest plausible speed, in m/s. Default: 15.0 (running)
    pub max_speed: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            accuracy_threshold: 20.0,
            max_age_seconds: 10.0,
            minimum_displacement: 5.0,
            max_speed: 15.0,
        }
    }
}

/// Why a fix was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RejectionReason {
    /// Non-finite or out-of-range coordinates or timestamp
    InvalidCoordinates,
    PoorAccuracy,
    Stale,
    InsufficientDisplacement,
    ImplausibleSpeed,
}

/// Outcome of evaluating one fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum FilterDecision {
    Accepted,
    Rejected { reason: RejectionReason },
}

impl FilterDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, FilterDecision::Accepted)
    }

    pub fn rejection_reason(&self) -> Option<RejectionReason> {
        match self {
            FilterDecision::Accepted => None,
            FilterDecision::Rejected { reason } => Some(*reason),
        }
    }
}

/// Per-session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FilterStatistics {
    pub total: u64,
    pub accepted: u64,
    pub rejected_by_invalid: u64,
    pub rejected_by_accuracy: u64,
    pub rejected_by_age: u64,
    pub rejected_by_displacement: u64,
    pub rejected_by_speed: u64,
}

impl FilterStatistics {
    pub fn rejected(&self) -> u64 {
        self.total - self.accepted
    }

    /// Accepted fraction in [0, 1]; 0 before any fix.
    pub fn acceptance_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.accepted as f64 / self.total as f64
        }
    }

    fn record(&mut self, decision: FilterDecision) {
        self.total += 1;
        match decision.rejection_reason() {
            None => self.accepted += 1,
            Some(RejectionReason::InvalidCoordinates) => self.rejected_by_invalid += 1,
            Some(RejectionReason::PoorAccuracy) => self.rejected_by_accuracy += 1,
            Some(RejectionReason::Stale) => self.rejected_by_age += 1,
            Some(RejectionReason::InsufficientDisplacement) => self.rejected_by_displacement += 1,
            Some(RejectionReason::ImplausibleSpeed) => self.rejected_by_speed += 1,
        }
    }
}

// ============================================================================
// Filter
// ============================================================================

/// Stateful fix filter. Must see fixes in arrival order.
pub struct FixFilter {
    config: FilterConfig,
    clock: Arc<dyn Clock>,
    last_accepted: Option<RawFix>,
    stats: FilterStatistics,
}

impl FixFilter {
    /// Create a filter reading the wall clock.
    pub fn new(config: FilterConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: FilterConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            last_accepted: None,
            stats: FilterStatistics::default(),
        }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Evaluate a fix against the injected clock.
    pub fn evaluate(&mut self, fix: &RawFix) -> FilterDecision {
        let now = self.clock.now();
        self.evaluate_at(fix, now)
    }

    /// Evaluate a fix as if the current time were `now`.
    pub fn evaluate_at(&mut self, fix: &RawFix, now: f64) -> FilterDecision {
        let decision = match self.check(fix, now) {
            Ok(()) => {
                self.last_accepted = Some(*fix);
                FilterDecision::Accepted
            }
            Err(reason) => {
                debug!(
                    "Rejected fix at {:.1} ({:.6}, {:.6}): {:?}",
                    fix.timestamp, fix.latitude, fix.longitude, reason
                );
                FilterDecision::Rejected { reason }
            }
        };
        self.stats.record(decision);
        decision
    }

    fn check(&self, fix: &RawFix, now: f64) -> Result<(), RejectionReason> {
        if !fix.point().is_valid() || !fix.timestamp.is_finite() {
            warn!("Fix with invalid coordinates or timestamp dropped");
            return Err(RejectionReason::InvalidCoordinates);
        }

        // Written so that a NaN accuracy also fails.
        let accuracy = fix.horizontal_accuracy;
        if !(accuracy > 0.0 && accuracy <= self.config.accuracy_threshold) {
            return Err(RejectionReason::PoorAccuracy);
        }

        if now - fix.timestamp > self.config.max_age_seconds {
            return Err(RejectionReason::Stale);
        }

        let Some(last) = &self.last_accepted else {
            return self.check_reported_speed(fix);
        };

        let displacement = haversine_distance(&fix.point(), &last.point());
        if displacement < self.config.minimum_displacement {
            return Err(RejectionReason::InsufficientDisplacement);
        }

        if fix.speed >= 0.0 {
            return self.check_reported_speed(fix);
        }

        // No reported speed: fall back to the speed implied by the hop.
        let elapsed = fix.timestamp - last.timestamp;
        if elapsed > 0.0 && displacement / elapsed > self.config.max_speed {
            return Err(RejectionReason::ImplausibleSpeed);
        }
        Ok(())
    }

    fn check_reported_speed(&self, fix: &RawFix) -> Result<(), RejectionReason> {
        if fix.speed >= 0.0 && fix.speed > self.config.max_speed {
            Err(RejectionReason::ImplausibleSpeed)
        } else {
            Ok(())
        }
    }

    pub fn last_accepted(&self) -> Option<&RawFix> {
        self.last_accepted.as_ref()
    }

    pub fn statistics(&self) -> FilterStatistics {
        self.stats
    }

    /// Zero all counters and forget the last accepted fix.
    pub fn reset(&mut self) {
        self.last_accepted = None;
        self.stats = FilterStatistics::default();
    }

    /// Swap thresholds, keeping the clock. Also resets.
    pub fn reconfigure(&mut self, config: FilterConfig) {
        self.config = config;
        self.reset();
    }
}

impl std::fmt::Debug for FixFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixFilter")
            .field("config", &self.config)
            .field("last_accepted", &self.last_accepted)
            .field("stats", &self.stats)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const T0: f64 = 1_700_000_000.0;

    fn filter() -> (FixFilter, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(T0));
        (FixFilter::with_clock(FilterConfig::default(), clock.clone()), clock)
    }

    fn fix(lat: f64, lng: f64, t: f64) -> RawFix {
        RawFix::new(lat, lng, t).with_accuracy(5.0).with_speed(3.0)
    }

    #[test]
    fn test_accepts_first_good_fix() {
        let (mut filter, _) = filter();
        let decision = filter.evaluate(&fix(51.5, -0.12, T0));
        assert_eq!(decision, FilterDecision::Accepted);
        assert!(filter.last_accepted().is_some());
        assert_eq!(filter.statistics().accepted, 1);
    }

    #[test]
    fn test_rejects_poor_accuracy() {
        let (mut filter, _) = filter();
        for accuracy in [25.0, 20.01, 0.0, -1.0, f64::NAN] {
            let decision = filter.evaluate(&fix(51.5, -0.12, T0).with_accuracy(accuracy));
            assert_eq!(decision.rejection_reason(), Some(RejectionReason::PoorAccuracy));
        }
        assert_eq!(filter.statistics().rejected_by_accuracy, 5);
        assert!(filter.last_accepted().is_none());
    }

    #[test]
    fn test_accuracy_at_threshold_is_accepted() {
        let (mut filter, _) = filter();
        assert!(filter.evaluate(&fix(51.5, -0.12, T0).with_accuracy(20.0)).is_accepted());
    }

    #[test]
    fn test_rejects_stale_fix() {
        let (mut filter, clock) = filter();
        clock.advance(10.5);
        let decision = filter.evaluate(&fix(51.5, -0.12, T0));
        assert_eq!(decision.rejection_reason(), Some(RejectionReason::Stale));
        assert_eq!(filter.statistics().rejected_by_age, 1);
    }

    #[test]
    fn test_accuracy_checked_before_staleness() {
        let (mut filter, clock) = filter();
        clock.advance(60.0);
        let decision = filter.evaluate(&fix(51.5, -0.12, T0).with_accuracy(50.0));
        assert_eq!(decision.rejection_reason(), Some(RejectionReason::PoorAccuracy));
    }

    #[test]
    fn test_rejects_insufficient_displacement() {
        let (mut filter, _) = filter();
        assert!(filter.evaluate(&fix(51.5, -0.12, T0)).is_accepted());

        // ~1.1m north
        let decision = filter.evaluate(&fix(51.50001, -0.12, T0 + 1.0));
        assert_eq!(
            decision.rejection_reason(),
            Some(RejectionReason::InsufficientDisplacement)
        );

        // Baseline unchanged, so ~11m from the first fix is accepted
        assert!(filter.evaluate(&fix(51.5001, -0.12, T0 + 2.0)).is_accepted());
        assert_eq!(filter.statistics().rejected_by_displacement, 1);
    }

    #[test]
    fn test_rejects_implausible_reported_speed() {
        let (mut filter, _) = filter();
        let decision = filter.evaluate(&fix(51.5, -0.12, T0).with_speed(16.0));
        assert_eq!(decision.rejection_reason(), Some(RejectionReason::ImplausibleSpeed));
        assert_eq!(filter.statistics().rejected_by_speed, 1);
    }

    #[test]
    fn test_rejects_implausible_implied_speed() {
        let (mut filter, _) = filter();
        assert!(filter.evaluate(&fix(51.5, -0.12, T0).with_speed(-1.0)).is_accepted());
        // ~111m in one second with no reported speed
        let decision = filter.evaluate(&fix(51.501, -0.12, T0 + 1.0).with_speed(-1.0));
        assert_eq!(decision.rejection_reason(), Some(RejectionReason::ImplausibleSpeed));
    }

    #[test]
    fn test_rejects_non_finite_coordinates() {
        let (mut filter, _) = filter();
        let decision = filter.evaluate(&fix(f64::NAN, -0.12, T0));
        assert_eq!(decision.rejection_reason(), Some(RejectionReason::InvalidCoordinates));
        let decision = filter.evaluate(&fix(51.5, f64::INFINITY, T0));
        assert_eq!(decision.rejection_reason(), Some(RejectionReason::InvalidCoordinates));
        assert_eq!(filter.statistics().rejected_by_invalid, 2);
    }

    #[test]
    fn test_statistics_and_reset() {
        let (mut filter, _) = filter();
        filter.evaluate(&fix(51.5, -0.12, T0));
        filter.evaluate(&fix(51.5, -0.12, T0).with_accuracy(30.0));
        filter.evaluate(&fix(51.5001, -0.12, T0 + 1.0));

        let stats = filter.statistics();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.rejected(), 1);
        assert!((stats.acceptance_rate() - 2.0 / 3.0).abs() < 1e-9);

        filter.reset();
        assert_eq!(filter.statistics(), FilterStatistics::default());
        assert!(filter.last_accepted().is_none());
    }

    #[test]
    fn test_evaluate_at_ignores_clock() {
        let (mut filter, _) = filter();
        let decision = filter.evaluate_at(&fix(51.5, -0.12, 100.0), 105.0);
        assert!(decision.is_accepted());
    }
}
