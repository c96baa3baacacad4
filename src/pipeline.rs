//! The live tracking pipeline.
//!
//! ```text
//! RawFix -> FixFilter -> (accepted) -> PositionSmoother -> SmoothedFix
//!                                                           |-> PauseDetector -> PauseSignal
//!                                                           '-> SplitTracker  -> Split
//! ```
//!
//! Every stage is an order-dependent state machine, so a [`TrackingPipeline`]
//! owns all four and takes `&mut self` per fix: one fix is fully processed,
//! and every resulting event delivered to observers, before the next one
//! starts. [`PipelineActor`] runs a pipeline on its own thread behind a
//! single-consumer channel for providers that deliver fixes from callbacks.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, info};

use crate::config::{ActivityProfile, ActivityType};
use crate::error::{Result, TrackError};
use crate::filter::{Clock, FilterDecision, FilterStatistics, FixFilter, RejectionReason};
use crate::pause::{MotionState, PauseDetector, PauseSignal};
use crate::smoothing::{KalmanSmoother, PositionSmoother, SmootherStatistics};
use crate::splits::{Split, SplitTracker, SplitUnit};
use crate::{RawFix, SmoothedFix};

/// Something downstream consumers react to. Delivered at most once, in order.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum PipelineEvent {
    FixRejected { fix: RawFix, reason: RejectionReason },
    FixSmoothed { fix: SmoothedFix },
    Paused { timestamp: f64 },
    Resumed { timestamp: f64 },
    SplitCompleted { split: Split },
}

/// Everything one input fix produced.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct FixOutcome {
    pub decision: FilterDecision,
    pub smoothed: Option<SmoothedFix>,
    pub pause_signal: Option<PauseSignal>,
    pub split: Option<Split>,
}

impl FixOutcome {
    fn rejected(decision: FilterDecision) -> Self {
        Self {
            decision,
            smoothed: None,
            pause_signal: None,
            split: None,
        }
    }
}

/// Combined counters across all stages.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct PipelineStatistics {
    pub filter: FilterStatistics,
    pub smoother: SmootherStatistics,
    pub motion_state: MotionState,
    pub completed_splits: u32,
    /// Meters between consecutive smoothed fixes
    pub total_distance: f64,
    pub total_paused_seconds: f64,
}

type Observer = Box<dyn FnMut(&PipelineEvent) + Send>;

/// Owns the filter, smoother, pause detector and split tracker of one session.
pub struct TrackingPipeline {
    profile: ActivityProfile,
    filter: FixFilter,
    smoother: Box<dyn PositionSmoother>,
    pause: PauseDetector,
    splits: SplitTracker,
    observers: Vec<Observer>,
}

impl TrackingPipeline {
    /// Build a pipeline with Kalman smoothing, kilometre splits and the wall clock.
    pub fn new(profile: ActivityProfile) -> Self {
        Self {
            filter: FixFilter::new(profile.filter.clone()),
            smoother: Box::new(KalmanSmoother::new(profile.kalman.clone())),
            pause: PauseDetector::new(profile.pause.clone()),
            splits: SplitTracker::new(SplitUnit::Kilometers),
            observers: Vec::new(),
            profile,
        }
    }

    pub fn for_activity(activity: ActivityType) -> Self {
        Self::new(activity.profile())
    }

    /// Replace the clock used for staleness checks. Resets the filter.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.filter = FixFilter::with_clock(self.profile.filter.clone(), clock);
        self
    }

    /// Replace the smoother, e.g. with a [`MovingAverageSmoother`](crate::MovingAverageSmoother).
    pub fn with_smoother(mut self, smoother: Box<dyn PositionSmoother>) -> Self {
        self.smoother = smoother;
        self
    }

    /// Switch split units. Discards any splits recorded so far.
    pub fn with_split_unit(mut self, unit: SplitUnit) -> Self {
        self.splits = SplitTracker::new(unit);
        self
    }

    pub fn profile(&self) -> &ActivityProfile {
        &self.profile
    }

    /// Register a callback for every event this pipeline emits.
    pub fn subscribe<F>(&mut self, observer: F)
    where
        F: FnMut(&PipelineEvent) + Send + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    /// Process one fix, checking staleness against the pipeline's clock.
    pub fn process(&mut self, fix: RawFix) -> FixOutcome {
        let decision = self.filter.evaluate(&fix);
        self.advance(fix, decision)
    }

    /// Process one fix as if the current time were `now`.
    pub fn process_at(&mut self, fix: RawFix, now: f64) -> FixOutcome {
        let decision = self.filter.evaluate_at(&fix, now);
        self.advance(fix, decision)
    }

    fn advance(&mut self, fix: RawFix, decision: FilterDecision) -> FixOutcome {
        if let FilterDecision::Rejected { reason } = decision {
            self.emit(PipelineEvent::FixRejected { fix, reason });
            return FixOutcome::rejected(decision);
        }

        let smoothed = self.smoother.smooth(&fix);
        self.emit(PipelineEvent::FixSmoothed { fix: smoothed });

        let pause_signal = self.pause.observe(&smoothed);
        match pause_signal {
            Some(PauseSignal::Paused) => self.emit(PipelineEvent::Paused { timestamp: smoothed.timestamp }),
            Some(PauseSignal::Resumed) => self.emit(PipelineEvent::Resumed { timestamp: smoothed.timestamp }),
            None => {}
        }

        let split = self.splits.record(&smoothed);
        if let Some(split) = &split {
            self.emit(PipelineEvent::SplitCompleted { split: split.clone() });
        }

        debug!(
            "Fix at {:.1} -> ({:.6}, {:.6}), split progress {:.0}%",
            smoothed.timestamp,
            smoothed.latitude,
            smoothed.longitude,
            self.splits.current_split_progress() * 100.0
        );

        FixOutcome {
            decision,
            smoothed: Some(smoothed),
            pause_signal,
            split,
        }
    }

    fn emit(&mut self, event: PipelineEvent) {
        for observer in &mut self.observers {
            observer(&event);
        }
    }

    pub fn motion_state(&self) -> MotionState {
        self.pause.state()
    }

    pub fn splits(&self) -> &SplitTracker {
        &self.splits
    }

    pub fn completed_splits(&self) -> &[Split] {
        self.splits.completed_splits()
    }

    pub fn statistics(&self) -> PipelineStatistics {
        PipelineStatistics {
            filter: self.filter.statistics(),
            smoother: self.smoother.statistics(),
            motion_state: self.pause.state(),
            completed_splits: self.splits.completed_splits().len() as u32,
            total_distance: self.splits.total_distance(),
            total_paused_seconds: self.pause.total_paused_seconds(),
        }
    }

    /// Reset every stage for a new session. Observers stay registered.
    pub fn reset(&mut self) {
        self.filter.reset();
        self.smoother.reset();
        self.pause.reset();
        self.splits.reset();
        info!("Tracking pipeline reset");
    }

    /// Reconfigure for another activity type. Resets the filter and smoother;
    /// the motion state, paused time and recorded splits are kept, so a pause
    /// in progress still ends with exactly one resume.
    pub fn set_activity(&mut self, activity: ActivityType) {
        let profile = activity.profile();
        self.filter.reconfigure(profile.filter.clone());
        self.smoother = Box::new(KalmanSmoother::new(profile.kalman.clone()));
        self.pause.reconfigure(profile.pause.clone());
        self.profile = profile;
        info!("Tracking pipeline reconfigured for {:?}", activity);
    }
}

impl std::fmt::Debug for TrackingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingPipeline")
            .field("profile", &self.profile)
            .field("filter", &self.filter)
            .field("pause", &self.pause)
            .field("splits", &self.splits)
            .field("observers", &self.observers.len())
            .finish()
    }
}

// ============================================================================
// Actor
// ============================================================================

enum Command {
    Fix(RawFix),
    Reset,
}

/// Cloneable handle for submitting fixes to a running [`PipelineActor`].
#[derive(Clone)]
pub struct FixSender {
    sender: mpsc::Sender<Command>,
}

impl FixSender {
    pub fn submit(&self, fix: RawFix) -> Result<()> {
        self.sender
            .send(Command::Fix(fix))
            .map_err(|_| TrackError::PipelineClosed)
    }
}

/// Runs a [`TrackingPipeline`] on a dedicated thread.
///
/// Fixes are processed strictly in the order they arrive on the channel;
/// observers are called on the actor thread.
pub struct PipelineActor {
    sender: mpsc::Sender<Command>,
    handle: JoinHandle<TrackingPipeline>,
}

impl PipelineActor {
    pub fn spawn(mut pipeline: TrackingPipeline) -> Self {
        let (sender, receiver) = mpsc::channel::<Command>();
        let handle = thread::spawn(move || {
            let mut processed = 0u64;
            for command in receiver {
                match command {
                    Command::Fix(fix) => {
                        pipeline.process(fix);
                        processed += 1;
                    }
                    Command::Reset => pipeline.reset(),
                }
            }
            info!("Pipeline actor stopped after {} fixes", processed);
            pipeline
        });
        Self { sender, handle }
    }

    pub fn submit(&self, fix: RawFix) -> Result<()> {
        self.sender
            .send(Command::Fix(fix))
            .map_err(|_| TrackError::PipelineClosed)
    }

    pub fn reset(&self) -> Result<()> {
        self.sender
            .send(Command::Reset)
            .map_err(|_| TrackError::PipelineClosed)
    }

    /// A handle the location provider's callback can own.
    pub fn sender(&self) -> FixSender {
        FixSender { sender: self.sender.clone() }
    }

    /// Stop accepting fixes, drain the queue and return the pipeline.
    ///
    /// Outstanding [`FixSender`]s keep the actor alive until they are dropped.
    pub fn shutdown(self) -> Result<TrackingPipeline> {
        drop(self.sender);
        self.handle.join().map_err(|_| TrackError::PipelineClosed)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FixedClock;
    use std::sync::Mutex;

    const T0: f64 = 1_700_000_000.0;

    fn moving_fix(i: usize, speed: f64) -> RawFix {
        // ~11m north per fix
        RawFix::new(51.5 + i as f64 * 0.0001, -0.12, T0 + i as f64)
            .with_accuracy(5.0)
            .with_speed(speed)
    }

    #[test]
    fn test_rejected_fix_does_not_reach_smoother() {
        let mut pipeline = TrackingPipeline::for_activity(ActivityType::Run);
        let outcome = pipeline.process_at(moving_fix(0, 3.0).with_accuracy(25.0), T0);
        assert_eq!(
            outcome.decision.rejection_reason(),
            Some(RejectionReason::PoorAccuracy)
        );
        assert!(outcome.smoothed.is_none());
        assert_eq!(pipeline.statistics().smoother.locations_processed, 0);
    }

    #[test]
    fn test_events_delivered_in_order() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let mut pipeline = TrackingPipeline::for_activity(ActivityType::Run);
        pipeline.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

        pipeline.process_at(moving_fix(0, 3.0), T0);
        pipeline.process_at(moving_fix(1, 3.0).with_accuracy(50.0), T0 + 1.0);
        for i in 2..12 {
            pipeline.process_at(moving_fix(i, 0.2), T0 + i as f64);
        }

        let events = events.lock().unwrap();
        assert!(matches!(events[0], PipelineEvent::FixSmoothed { .. }));
        assert!(matches!(
            events[1],
            PipelineEvent::FixRejected { reason: RejectionReason::PoorAccuracy, .. }
        ));
        let pauses = events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::Paused { .. }))
            .count();
        assert_eq!(pauses, 1);
        // The pause comes right after the smoothed fix that triggered it
        assert!(matches!(events.last(), Some(PipelineEvent::Paused { .. })));
    }

    #[test]
    fn test_splits_flow_through_pipeline() {
        let mut pipeline = TrackingPipeline::for_activity(ActivityType::Run);
        let mut splits = Vec::new();
        for i in 0..120 {
            if let Some(split) = pipeline.process_at(moving_fix(i, 3.0), T0 + i as f64).split {
                splits.push(split);
            }
        }
        assert_eq!(splits.len(), 1);
        assert_eq!(pipeline.statistics().completed_splits, 1);
        assert!(pipeline.statistics().total_distance > 1000.0);
    }

    #[test]
    fn test_reset_clears_all_stages() {
        let mut pipeline = TrackingPipeline::for_activity(ActivityType::Walk);
        for i in 0..5 {
            pipeline.process_at(moving_fix(i, 1.0), T0 + i as f64);
        }
        pipeline.reset();
        let stats = pipeline.statistics();
        assert_eq!(stats.filter.total, 0);
        assert_eq!(stats.smoother.locations_processed, 0);
        assert_eq!(stats.total_distance, 0.0);
        assert_eq!(stats.motion_state, MotionState::Active);
    }

    #[test]
    fn test_set_activity_changes_thresholds() {
        let mut pipeline = TrackingPipeline::for_activity(ActivityType::Walk);
        assert!(!pipeline.process_at(moving_fix(0, 12.0), T0).decision.is_accepted());
        pipeline.set_activity(ActivityType::Bike);
        assert!(pipeline.process_at(moving_fix(0, 12.0), T0).decision.is_accepted());
        assert_eq!(pipeline.profile().activity_type, ActivityType::Bike);
    }

    #[test]
    fn test_set_activity_while_paused_keeps_pause() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let mut pipeline = TrackingPipeline::for_activity(ActivityType::Run);
        pipeline.subscribe(move |event| match event {
            PipelineEvent::Paused { .. } => sink.lock().unwrap().push("paused"),
            PipelineEvent::Resumed { .. } => sink.lock().unwrap().push("resumed"),
            _ => {}
        });

        pipeline.process_at(moving_fix(0, 3.0), T0);
        for i in 1..=10 {
            pipeline.process_at(moving_fix(i, 0.2), T0 + i as f64);
        }
        pipeline.process_at(moving_fix(11, 1.0), T0 + 11.0);
        for i in 12..=21 {
            pipeline.process_at(moving_fix(i, 0.2), T0 + i as f64);
        }
        assert_eq!(pipeline.motion_state(), MotionState::Paused);
        let paused_before = pipeline.statistics().total_paused_seconds;
        assert_eq!(paused_before, 1.0);

        pipeline.set_activity(ActivityType::Walk);
        assert_eq!(pipeline.motion_state(), MotionState::Paused);
        assert_eq!(pipeline.statistics().total_paused_seconds, paused_before);

        let outcome = pipeline.process_at(moving_fix(22, 1.0), T0 + 22.0);
        assert_eq!(outcome.pause_signal, Some(PauseSignal::Resumed));
        assert_eq!(pipeline.statistics().total_paused_seconds, 2.0);
        assert_eq!(
            *events.lock().unwrap(),
            vec!["paused", "resumed", "paused", "resumed"]
        );
    }

    #[test]
    fn test_actor_processes_in_order() {
        let clock = Arc::new(FixedClock::new(T0));
        let timestamps = Arc::new(Mutex::new(Vec::new()));
        let sink = timestamps.clone();

        let mut pipeline = TrackingPipeline::for_activity(ActivityType::Run).with_clock(clock.clone());
        pipeline.subscribe(move |event| {
            if let PipelineEvent::FixSmoothed { fix } = event {
                sink.lock().unwrap().push(fix.timestamp);
            }
        });

        let actor = PipelineActor::spawn(pipeline);
        let sender = actor.sender();
        for i in 0..5 {
            sender.submit(moving_fix(i, 3.0)).unwrap();
        }
        drop(sender);
        let pipeline = actor.shutdown().unwrap();

        assert_eq!(pipeline.statistics().filter.accepted, 5);
        let seen = timestamps.lock().unwrap();
        assert_eq!(*seen, (0..5).map(|i| T0 + i as f64).collect::<Vec<_>>());
    }
}
