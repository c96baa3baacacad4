//! Activity-specific tuning.
//!
//! The activity type selects filter thresholds, Kalman process noise, pause
//! detection settings and the default coverage precision. Each stage's config
//! is plain data with a `Default`, so hosts may also build or deserialize
//! profiles directly (with the `serde` feature).

use crate::filter::FilterConfig;
use crate::geohash::DEFAULT_PRECISION;
use crate::pause::PauseConfig;
use crate::smoothing::KalmanConfig;

/// Kind of activity being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ActivityType {
    Walk,
    #[default]
    Run,
    Bike,
}

impl ActivityType {
    /// Minimum displacement from the last accepted fix, in meters.
    pub fn minimum_displacement(self) -> f64 {
        match self {
            ActivityType::Walk | ActivityType::Run => 5.0,
            ActivityType::Bike => 8.0,
        }
    }

    /// Highest plausible speed, in m/s.
    pub fn speed_ceiling(self) -> f64 {
        match self {
            ActivityType::Walk => 5.0,
            ActivityType::Run => 15.0,
            ActivityType::Bike => 30.0,
        }
    }

    /// Kalman process noise: smaller means heavier smoothing.
    pub fn process_noise(self) -> f64 {
        match self {
            ActivityType::Walk => 0.5,
            ActivityType::Run => 1.0,
            ActivityType::Bike => 2.0,
        }
    }

    pub fn filter_config(self) -> FilterConfig {
        FilterConfig {
            minimum_displacement: self.minimum_displacement(),
            max_speed: self.speed_ceiling(),
            ..FilterConfig::default()
        }
    }

    pub fn kalman_config(self) -> KalmanConfig {
        KalmanConfig {
            process_noise: self.process_noise(),
            ..KalmanConfig::default()
        }
    }

    pub fn profile(self) -> ActivityProfile {
        ActivityProfile {
            activity_type: self,
            filter: self.filter_config(),
            kalman: self.kalman_config(),
            pause: PauseConfig::default(),
            coverage_precision: DEFAULT_PRECISION,
        }
    }
}

/// Full tuning for one tracking session.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ActivityProfile {
    pub activity_type: ActivityType,
    pub filter: FilterConfig,
    pub kalman: KalmanConfig,
    pub pause: PauseConfig,
    /// Geohash precision used for coverage tiles (1..=12)
    pub coverage_precision: u32,
}

impl Default for ActivityProfile {
    fn default() -> Self {
        ActivityType::default().profile()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_thresholds() {
        assert_eq!(ActivityType::Walk.filter_config().minimum_displacement, 5.0);
        assert_eq!(ActivityType::Run.filter_config().minimum_displacement, 5.0);
        assert_eq!(ActivityType::Bike.filter_config().minimum_displacement, 8.0);

        assert_eq!(ActivityType::Walk.filter_config().max_speed, 5.0);
        assert_eq!(ActivityType::Run.filter_config().max_speed, 15.0);
        assert_eq!(ActivityType::Bike.filter_config().max_speed, 30.0);

        for activity in [ActivityType::Walk, ActivityType::Run, ActivityType::Bike] {
            let filter = activity.filter_config();
            assert_eq!(filter.accuracy_threshold, 20.0);
            assert_eq!(filter.max_age_seconds, 10.0);
        }
    }

    #[test]
    fn test_slower_activities_smooth_harder() {
        let walk = ActivityType::Walk.kalman_config().process_noise;
        let run = ActivityType::Run.kalman_config().process_noise;
        let bike = ActivityType::Bike.kalman_config().process_noise;
        assert!(walk < run && run < bike);
    }

    #[test]
    fn test_default_profile() {
        let profile = ActivityProfile::default();
        assert_eq!(profile.activity_type, ActivityType::Run);
        assert_eq!(profile.coverage_precision, 7);
        assert_eq!(profile.pause.threshold_count, 10);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_profile_json_round_trip() {
        let profile = ActivityType::Bike.profile();
        let json = serde_json::to_string(&profile).unwrap();
        assert!(json.contains("\"bike\""));
        let parsed: ActivityProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, profile);
    }
}
