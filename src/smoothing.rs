//! Position smoothing for accepted fixes.
//!
//! [`KalmanSmoother`] runs an independent one-dimensional Kalman filter on
//! latitude and longitude. [`MovingAverageSmoother`] is a cheaper fixed-window
//! alternative behind the same [`PositionSmoother`] trait.
//!
//! Only coordinates change; timestamp, accuracy, speed, course and altitude
//! are copied from the input fix.

use std::collections::VecDeque;

use crate::config::ActivityType;
use crate::{RawFix, SmoothedFix};

/// Kalman tuning shared by both axes.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KalmanConfig {
    /// Uncertainty added per step. Smaller values smooth more heavily.
    pub process_noise: f64,
    /// Measurement uncertainty. Default: 1.0
    pub measurement_noise: f64,
    /// Error covariance after the first sample. Default: 1.0
    pub initial_error_covariance: f64,
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            process_noise: 1.0,
            measurement_noise: 1.0,
            initial_error_covariance: 1.0,
        }
    }
}

/// Snapshot of smoother progress.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SmootherStatistics {
    pub locations_processed: u64,
    /// `None` before the first sample or for smoothers without a covariance
    pub current_error_covariance_lat: Option<f64>,
    pub current_error_covariance_lon: Option<f64>,
}

/// Common interface of the position smoothers.
pub trait PositionSmoother: Send {
    /// Smooth one accepted fix.
    fn smooth(&mut self, fix: &RawFix) -> SmoothedFix;

    /// Forget all history.
    fn reset(&mut self);

    fn statistics(&self) -> SmootherStatistics;
}

// ============================================================================
// Kalman
// ============================================================================

/// One-dimensional Kalman filter state for a single axis.
#[derive(Debug, Clone, PartialEq)]
pub struct KalmanAxis {
    estimate: f64,
    error_covariance: f64,
    processed_count: u64,
    config: KalmanConfig,
}

impl KalmanAxis {
    pub fn new(config: KalmanConfig) -> Self {
        Self {
            estimate: 0.0,
            error_covariance: config.initial_error_covariance,
            processed_count: 0,
            config,
        }
    }

    /// Fold one measurement into the estimate and return the new estimate.
    pub fn update(&mut self, measurement: f64) -> f64 {
        if self.processed_count == 0 {
            self.estimate = measurement;
            self.error_covariance = self.config.initial_error_covariance;
            self.processed_count = 1;
            return self.estimate;
        }

        // Predict
        let predicted_covariance = self.error_covariance + self.config.process_noise;

        // Update
        let gain = predicted_covariance / (predicted_covariance + self.config.measurement_noise);
        self.estimate += gain * (measurement - self.estimate);
        self.error_covariance = (1.0 - gain) * predicted_covariance;
        self.processed_count += 1;

        self.estimate
    }

    pub fn is_initialized(&self) -> bool {
        self.processed_count > 0
    }

    pub fn estimate(&self) -> Option<f64> {
        self.is_initialized().then_some(self.estimate)
    }

    pub fn error_covariance(&self) -> Option<f64> {
        self.is_initialized().then_some(self.error_covariance)
    }

    pub fn processed_count(&self) -> u64 {
        self.processed_count
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }
}

/// Per-axis Kalman smoothing of latitude and longitude.
#[derive(Debug, Clone)]
pub struct KalmanSmoother {
    latitude: KalmanAxis,
    longitude: KalmanAxis,
}

impl KalmanSmoother {
    pub fn new(config: KalmanConfig) -> Self {
        Self {
            latitude: KalmanAxis::new(config.clone()),
            longitude: KalmanAxis::new(config),
        }
    }

    pub fn for_activity(activity: ActivityType) -> Self {
        Self::new(activity.kalman_config())
    }

    pub fn walking() -> Self {
        Self::for_activity(ActivityType::Walk)
    }

    pub fn running() -> Self {
        Self::for_activity(ActivityType::Run)
    }

    pub fn cycling() -> Self {
        Self::for_activity(ActivityType::Bike)
    }

    pub fn latitude_axis(&self) -> &KalmanAxis {
        &self.latitude
    }

    pub fn longitude_axis(&self) -> &KalmanAxis {
        &self.longitude
    }
}

impl PositionSmoother for KalmanSmoother {
    fn smooth(&mut self, fix: &RawFix) -> SmoothedFix {
        let latitude = self.latitude.update(fix.latitude);
        let longitude = self.longitude.update(fix.longitude);
        SmoothedFix::from_raw(fix, latitude, longitude)
    }

    fn reset(&mut self) {
        self.latitude.reset();
        self.longitude.reset();
    }

    fn statistics(&self) -> SmootherStatistics {
        SmootherStatistics {
            locations_processed: self.latitude.processed_count(),
            current_error_covariance_lat: self.latitude.error_covariance(),
            current_error_covariance_lon: self.longitude.error_covariance(),
        }
    }
}

// ============================================================================
// Moving average
// ============================================================================

/// Unweighted average over the last `window_size` accepted fixes.
#[derive(Debug, Clone)]
pub struct MovingAverageSmoother {
    window: VecDeque<(f64, f64)>,
    window_size: usize,
    processed: u64,
}

impl MovingAverageSmoother {
    /// Create a smoother averaging up to `window_size` fixes (at least 1).
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size,
            processed: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

impl PositionSmoother for MovingAverageSmoother {
    fn smooth(&mut self, fix: &RawFix) -> SmoothedFix {
        self.window.push_back((fix.latitude, fix.longitude));
        while self.window.len() > self.window_size {
            self.window.pop_front();
        }
        self.processed += 1;

        let n = self.window.len() as f64;
        let (sum_lat, sum_lng) = self
            .window
            .iter()
            .fold((0.0, 0.0), |(a, b), (lat, lng)| (a + lat, b + lng));
        SmoothedFix::from_raw(fix, sum_lat / n, sum_lng / n)
    }

    fn reset(&mut self) {
        self.window.clear();
        self.processed = 0;
    }

    fn statistics(&self) -> SmootherStatistics {
        SmootherStatistics {
            locations_processed: self.processed,
            ..SmootherStatistics::default()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
