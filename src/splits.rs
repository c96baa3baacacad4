//! Per-unit-distance splits.
//!
//! Distance between consecutive smoothed fixes accumulates into the current
//! split. When it reaches the unit threshold a [`Split`] is emitted and a new
//! split starts at that fix's time with zero distance. Any overshoot in the
//! triggering hop is dropped, not carried into the next split.
//!
//! Elevation gain uses a 3 m noise gate: altitude changes of 3 m or less
//! relative to the last reference are ignored in both directions; a larger
//! change moves the reference and, when upward, adds to the gain.

use log::info;

use crate::geo_utils::haversine_distance;
use crate::SmoothedFix;

/// Altitude changes must exceed this many meters to count.
pub const ELEVATION_NOISE_GATE: f64 = 3.0;

const METERS_PER_MILE: f64 = 1609.34;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SplitUnit {
    #[default]
    Kilometers,
    Miles,
}

impl SplitUnit {
    /// Split length in meters.
    pub fn threshold(self) -> f64 {
        match self {
            SplitUnit::Kilometers => 1000.0,
            SplitUnit::Miles => METERS_PER_MILE,
        }
    }
}

/// A completed split. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Split {
    /// 1-based position in the activity
    pub index: u32,
    /// Always the unit threshold, in meters
    pub distance: f64,
    /// Seconds from split start to the fix that completed it
    pub duration: f64,
    /// `duration / (distance / 1000)`
    pub pace: f64,
    /// Meters climbed during the split
    pub elevation_gain: f64,
    pub start_time: f64,
    pub end_time: f64,
}

/// The split currently being filled.
#[derive(Debug, Clone, Default, PartialEq)]
struct SplitAccumulator {
    start_time: Option<f64>,
    start_distance_total: f64,
    accumulated_distance: f64,
    accumulated_elevation_gain: f64,
    last_elevation_reference: Option<f64>,
}

impl SplitAccumulator {
    fn starting_at(time: f64, distance_total: f64, elevation_reference: Option<f64>) -> Self {
        Self {
            start_time: Some(time),
            start_distance_total: distance_total,
            accumulated_distance: 0.0,
            accumulated_elevation_gain: 0.0,
            last_elevation_reference: elevation_reference,
        }
    }

    fn observe_altitude(&mut self, altitude: f64) {
        match self.last_elevation_reference {
            None => self.last_elevation_reference = Some(altitude),
            Some(reference) => {
                let change = altitude - reference;
                if change.abs() > ELEVATION_NOISE_GATE {
                    if change > 0.0 {
                        self.accumulated_elevation_gain += change;
                    }
                    self.last_elevation_reference = Some(altitude);
                }
            }
        }
    }
}

/// Turns a stream of smoothed fixes into completed splits.
#[derive(Debug, Clone)]
pub struct SplitTracker {
    unit: SplitUnit,
    previous: Option<SmoothedFix>,
    current: SplitAccumulator,
    total_distance: f64,
    completed: Vec<Split>,
}

impl SplitTracker {
    pub fn new(unit: SplitUnit) -> Self {
        Self {
            unit,
            previous: None,
            current: SplitAccumulator::default(),
            total_distance: 0.0,
            completed: Vec::new(),
        }
    }

    pub fn unit(&self) -> SplitUnit {
        self.unit
    }

    pub fn threshold(&self) -> f64 {
        self.unit.threshold()
    }

    /// Start the first split at `time` if nothing has started it yet.
    pub fn start_at(&mut self, time: f64) {
        if self.current.start_time.is_none() {
            self.current.start_time = Some(time);
        }
    }

    /// Feed one smoothed fix. Returns the split it completed, if any.
    pub fn record(&mut self, fix: &SmoothedFix) -> Option<Split> {
        let altitude = fix.has_altitude().then_some(fix.altitude);

        let Some(previous) = self.previous.replace(*fix) else {
            self.start_at(fix.timestamp);
            if let Some(alt) = altitude {
                self.current.observe_altitude(alt);
            }
            return None;
        };

        let delta = haversine_distance(&previous.point(), &fix.point());
        self.record_segment(delta, altitude, fix.timestamp)
    }

    /// Feed a precomputed hop of `delta` meters ending at `timestamp`.
    pub fn record_segment(
        &mut self,
        delta: f64,
        altitude: Option<f64>,
        timestamp: f64,
    ) -> Option<Split> {
        self.start_at(timestamp);

        let delta = if delta.is_finite() { delta.max(0.0) } else { 0.0 };
        self.current.accumulated_distance += delta;
        self.total_distance += delta;
        if let Some(alt) = altitude.filter(|a| a.is_finite()) {
            self.current.observe_altitude(alt);
        }

        let threshold = self.threshold();
        if self.current.accumulated_distance < threshold {
            return None;
        }

        let start_time = self.current.start_time.unwrap_or(timestamp);
        let duration = timestamp - start_time;
        let split = Split {
            index: self.completed.len() as u32 + 1,
            distance: threshold,
            duration,
            pace: duration / (threshold / 1000.0),
            elevation_gain: self.current.accumulated_elevation_gain,
            start_time,
            end_time: timestamp,
        };

        info!(
            "Split {} complete: {:.0}s, pace {:.0}s/km, +{:.1}m",
            split.index, split.duration, split.pace, split.elevation_gain
        );

        self.current = SplitAccumulator::starting_at(
            timestamp,
            self.total_distance,
            self.current.last_elevation_reference,
        );
        self.completed.push(split.clone());
        Some(split)
    }

    /// Fraction of the current split covered, in [0, 1].
    pub fn current_split_progress(&self) -> f64 {
        (self.current.accumulated_distance / self.threshold()).min(1.0)
    }

    /// Meters left in the current split, never negative.
    pub fn distance_remaining_in_split(&self) -> f64 {
        (self.threshold() - self.current.accumulated_distance).max(0.0)
    }

    pub fn current_split_distance(&self) -> f64 {
        self.current.accumulated_distance
    }

    pub fn current_split_elevation_gain(&self) -> f64 {
        self.current.accumulated_elevation_gain
    }

    /// Total distance at which the current split started.
    pub fn current_split_start_distance(&self) -> f64 {
        self.current.start_distance_total
    }

    /// Every meter recorded, including overshoot dropped at split boundaries.
    pub fn total_distance(&self) -> f64 {
        self.total_distance
    }

    pub fn completed_splits(&self) -> &[Split] {
        &self.completed
    }

    /// Discard all completed splits and start over.
    pub fn reset(&mut self) {
        *self = Self::new(self.unit);
    }
}

impl Default for SplitTracker {
    fn default() -> Self {
        Self::new(SplitUnit::Kilometers)
    }
}
