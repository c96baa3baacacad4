//! Auto-pause / auto-resume detection.
//!
//! A debounce over instantaneous speed: a run of `threshold_count`
//! consecutive slow readings pauses, and the first reading at or above the
//! speed threshold resumes. Each state change emits exactly one signal.

use log::info;

use crate::SmoothedFix;

/// Pause detection settings.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PauseConfig {
    /// Readings below this speed (m/s) count as slow. Default: 0.5
    pub speed_threshold: f64,
    /// Consecutive slow readings needed to pause. Default: 10
    pub threshold_count: u32,
}

impl Default for PauseConfig {
    fn default() -> Self {
        Self {
            speed_threshold: 0.5,
            threshold_count: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MotionState {
    #[default]
    Active,
    Paused,
}

/// Emitted once per state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PauseSignal {
    Paused,
    Resumed,
}

#[derive(Debug, Clone)]
pub struct PauseDetector {
    config: PauseConfig,
    state: MotionState,
    consecutive_slow_count: u32,
    paused_since: Option<f64>,
    total_paused_seconds: f64,
}

impl PauseDetector {
    pub fn new(config: PauseConfig) -> Self {
        Self {
            config,
            state: MotionState::Active,
            consecutive_slow_count: 0,
            paused_since: None,
            total_paused_seconds: 0.0,
        }
    }

    /// Feed one smoothed fix; also tracks paused time from fix timestamps.
    pub fn observe(&mut self, fix: &SmoothedFix) -> Option<PauseSignal> {
        let signal = self.update(fix.speed);
        match signal {
            Some(PauseSignal::Paused) => self.paused_since = Some(fix.timestamp),
            Some(PauseSignal::Resumed) => {
                if let Some(since) = self.paused_since.take() {
                    self.total_paused_seconds += (fix.timestamp - since).max(0.0);
                }
            }
            None => {}
        }
        signal
    }

    /// Feed one speed reading. Negative or non-finite speeds count as 0.
    pub fn update(&mut self, speed: f64) -> Option<PauseSignal> {
        let speed = if speed.is_finite() { speed.max(0.0) } else { 0.0 };
        let slow = speed < self.config.speed_threshold;

        match self.state {
            MotionState::Active if slow => {
                self.consecutive_slow_count += 1;
                if self.consecutive_slow_count >= self.config.threshold_count {
                    self.state = MotionState::Paused;
                    info!(
                        "Auto-pause after {} slow readings",
                        self.consecutive_slow_count
                    );
                    return Some(PauseSignal::Paused);
                }
                None
            }
            MotionState::Active => {
                self.consecutive_slow_count = 0;
                None
            }
            MotionState::Paused if slow => None,
            MotionState::Paused => {
                self.state = MotionState::Active;
                self.consecutive_slow_count = 0;
                info!("Auto-resume at {:.2} m/s", speed);
                Some(PauseSignal::Resumed)
            }
        }
    }

    pub fn state(&self) -> MotionState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.state == MotionState::Paused
    }

    pub fn consecutive_slow_count(&self) -> u32 {
        self.consecutive_slow_count
    }

    /// Seconds spent in completed pauses.
    pub fn total_paused_seconds(&self) -> f64 {
        self.total_paused_seconds
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }

    /// Swap thresholds mid-session. The motion state and paused time carry
    /// over; only the slow-reading run starts again.
    pub fn reconfigure(&mut self, config: PauseConfig) {
        self.config = config;
        self.consecutive_slow_count = 0;
    }

    pub fn config(&self) -> &PauseConfig {
        &self.config
    }
}

impl Default for PauseDetector {
    fn default() -> Self {
        Self::new(PauseConfig::default())
    }
}
