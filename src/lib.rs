//! # TrailPaint
//!
//! Real-time GPS signal processing and geohash coverage aggregation for
//! outdoor-activity tracking.
//!
//! This library provides:
//! - A sequential fix filter rejecting noisy, stale, jittery or implausible GPS fixes
//! - Per-axis Kalman smoothing of accepted fixes
//! - Hysteresis-based auto-pause/resume detection
//! - Per-kilometre / per-mile split accumulation
//! - Geohash encode/decode/neighbor search
//! - Batch coverage aggregation ("where has the user been") with parallel merge
//!
//! ## Features
//!
//! - **`parallel`** - Enable parallel coverage aggregation with rayon
//! - **`serde`** - Derive `Serialize`/`Deserialize` for configuration and records
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use trailpaint::{ActivityType, RawFix, TrackingPipeline};
//!
//! let mut pipeline = TrackingPipeline::for_activity(ActivityType::Run);
//!
//! let fix = RawFix::new(51.5074, -0.1278, 1_700_000_000.0)
//!     .with_accuracy(5.0)
//!     .with_speed(3.0);
//!
//! let outcome = pipeline.process_at(fix, 1_700_000_000.5);
//! assert!(outcome.smoothed.is_some());
//! ```
//!
//! ```rust
//! use trailpaint::{coverage, LocationSample};
//!
//! let samples = vec![
//!     LocationSample::new(51.5074, -0.1278, 1_700_000_000),
//!     LocationSample::new(51.5075, -0.1279, 1_700_000_060),
//! ];
//! let tiles = coverage::into_tiles(coverage::aggregate(&samples, 7).unwrap());
//! assert!(!tiles.is_empty());
//! ```

// Unified error handling
pub mod error;
pub use error::{Result, TrackError};

// Activity profiles (filter / smoother / pause / coverage defaults)
pub mod config;
pub use config::{ActivityProfile, ActivityType};

// Geographic utilities (distance, bounds)
pub mod geo_utils;

// Geohash codec
pub mod geohash;
pub use geohash::{Direction, GeohashCell};

// Live pipeline stages
pub mod filter;
pub use filter::{
    Clock, FilterConfig, FilterDecision, FilterStatistics, FixFilter, FixedClock,
    RejectionReason, SystemClock,
};

pub mod smoothing;
pub use smoothing::{
    KalmanAxis, KalmanConfig, KalmanSmoother, MovingAverageSmoother, PositionSmoother,
    SmootherStatistics,
};

pub mod pause;
pub use pause::{MotionState, PauseConfig, PauseDetector, PauseSignal};

pub mod splits;
pub use splits::{Split, SplitTracker, SplitUnit};

pub mod pipeline;
pub use pipeline::{
    FixOutcome, FixSender, PipelineActor, PipelineEvent, PipelineStatistics, TrackingPipeline,
};

// Batch coverage aggregation and tile storage
pub mod coverage;
pub use coverage::{AggregationControl, CoverageSummary, CoverageTile, TileAccumulator};

pub mod tile_store;
pub use tile_store::{CachedTileStore, InMemoryTileStore, TileStore};

#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
pub(crate) fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("TrailPaintRust"),
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
pub(crate) fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use trailpaint::GpsPoint;
/// let point = GpsPoint::new(51.5074, -0.1278); // London
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Latitude/longitude bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from GPS points.
    pub fn from_points(points: &[GpsPoint]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let start = Bounds {
            min_lat: first.latitude,
            max_lat: first.latitude,
            min_lng: first.longitude,
            max_lng: first.longitude,
        };
        Some(rest.iter().fold(start, |b, p| Bounds {
            min_lat: b.min_lat.min(p.latitude),
            max_lat: b.max_lat.max(p.latitude),
            min_lng: b.min_lng.min(p.longitude),
            max_lng: b.max_lng.max(p.longitude),
        }))
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }

    /// Whether the point lies inside the bounds (edges inclusive).
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        latitude >= self.min_lat
            && latitude <= self.max_lat
            && longitude >= self.min_lng
            && longitude <= self.max_lng
    }
}

/// A raw position fix as delivered by the platform location provider.
///
/// Timestamps are seconds since the Unix epoch. A negative `speed`, `course`
/// or `vertical_accuracy` means the provider did not report that value.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RawFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Altitude above sea level in meters
    pub altitude: f64,
    /// Horizontal accuracy radius in meters (<= 0 means invalid)
    pub horizontal_accuracy: f64,
    /// Vertical accuracy in meters (< 0 means altitude is unusable)
    pub vertical_accuracy: f64,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
    /// Instantaneous speed in m/s (< 0 means unavailable)
    pub speed: f64,
    /// Course over ground in degrees (< 0 means unavailable)
    pub course: f64,
}

impl RawFix {
    /// Create a fix with good accuracy and no speed/course/altitude information.
    pub fn new(latitude: f64, longitude: f64, timestamp: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: 0.0,
            horizontal_accuracy: 5.0,
            vertical_accuracy: -1.0,
            timestamp,
            speed: -1.0,
            course: -1.0,
        }
    }

    pub fn with_accuracy(mut self, horizontal_accuracy: f64) -> Self {
        self.horizontal_accuracy = horizontal_accuracy;
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_course(mut self, course: f64) -> Self {
        self.course = course;
        self
    }

    /// Set the altitude together with a vertical accuracy that marks it usable.
    pub fn with_altitude(mut self, altitude: f64, vertical_accuracy: f64) -> Self {
        self.altitude = altitude;
        self.vertical_accuracy = vertical_accuracy;
        self
    }

    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

/// A fix whose coordinates have been replaced by smoothed estimates.
///
/// Only ever produced from a fix the [`FixFilter`] accepted. Timestamp,
/// accuracy, speed, course and altitude are copied through unchanged.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SmoothedFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub horizontal_accuracy: f64,
    pub vertical_accuracy: f64,
    pub timestamp: f64,
    pub speed: f64,
    pub course: f64,
}

impl SmoothedFix {
    pub(crate) fn from_raw(raw: &RawFix, latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: raw.altitude,
            horizontal_accuracy: raw.horizontal_accuracy,
            vertical_accuracy: raw.vertical_accuracy,
            timestamp: raw.timestamp,
            speed: raw.speed,
            course: raw.course,
        }
    }

    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }

    /// Whether the altitude carries a usable vertical accuracy.
    pub fn has_altitude(&self) -> bool {
        self.vertical_accuracy >= 0.0 && self.altitude.is_finite()
    }
}

/// A stored location of a completed activity, used for coverage aggregation.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Unix timestamp (seconds)
    pub timestamp: i64,
}

impl LocationSample {
    pub fn new(latitude: f64, longitude: f64, timestamp: i64) -> Self {
        Self { latitude, longitude, timestamp }
    }
}

impl From<&SmoothedFix> for LocationSample {
    fn from(fix: &SmoothedFix) -> Self {
        Self::new(fix.latitude, fix.longitude, fix.timestamp.floor() as i64)
    }
}

// ============================================================================
// Tests
// ============================================================================
