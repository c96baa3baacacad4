//! UniFFI exports for the iOS and Android apps.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info};

use crate::coverage::{self, AggregationControl, CoverageSummary, CoverageTile};
use crate::geohash::{self, GeohashCell};
use crate::init_logging;
use crate::pipeline::{FixOutcome, PipelineEvent, PipelineStatistics, TrackingPipeline};
use crate::splits::{Split, SplitUnit};
use crate::{ActivityType, LocationSample, RawFix, TrackError};

// ============================================================================
// Callback Interfaces
// ============================================================================

/// Receives pipeline events. Implement in Kotlin/Swift.
#[uniffi::export(callback_interface)]
pub trait TrackingListener: Send + Sync {
    fn on_event(&self, event: PipelineEvent);
}

/// Receives aggregation progress.
#[uniffi::export(callback_interface)]
pub trait CoverageProgressCallback: Send + Sync {
    /// - processed: samples folded in so far
    /// - total: samples in the request
    fn on_progress(&self, processed: u64, total: u64);
}

// ============================================================================
// Geohash
// ============================================================================

#[uniffi::export]
pub fn ffi_encode_geohash(latitude: f64, longitude: f64, precision: u32) -> String {
    geohash::encode(latitude, longitude, precision)
}

#[uniffi::export]
pub fn ffi_decode_geohash(geohash: String) -> Result<GeohashCell, TrackError> {
    geohash::decode(&geohash)
}

/// The 8 adjacent cells, clockwise from north.
#[uniffi::export]
pub fn ffi_geohash_neighbors(geohash: String) -> Result<Vec<String>, TrackError> {
    geohash::neighbors(&geohash)
}

#[uniffi::export]
pub fn ffi_precision_for_zoom_level(zoom: f64) -> u32 {
    geohash::precision_for_zoom_level(zoom)
}

// ============================================================================
// Coverage
// ============================================================================

#[uniffi::export]
pub fn ffi_aggregate_coverage(
    samples: Vec<LocationSample>,
    precision: u32,
) -> Result<Vec<CoverageTile>, TrackError> {
    init_logging();
    info!(
        "[TrailPaintRust] aggregate_coverage called with {} samples at precision {}",
        samples.len(),
        precision
    );
    let start = std::time::Instant::now();

    #[cfg(feature = "parallel")]
    let tiles = coverage::aggregate_parallel(&samples, precision)?;

    #[cfg(not(feature = "parallel"))]
    let tiles = coverage::aggregate(&samples, precision)?;

    let tiles = coverage::into_tiles(tiles);
    info!("[TrailPaintRust] {} tiles in {:?}", tiles.len(), start.elapsed());
    Ok(tiles)
}

/// Aggregate with progress updates and an optional deadline.
#[uniffi::export]
pub fn ffi_aggregate_coverage_with_progress(
    samples: Vec<LocationSample>,
    precision: u32,
    timeout_ms: Option<u64>,
    callback: Box<dyn CoverageProgressCallback>,
) -> Result<Vec<CoverageTile>, TrackError> {
    init_logging();
    info!(
        "[TrailPaintRust] aggregate_coverage_with_progress called with {} samples",
        samples.len()
    );

    let callback = Arc::new(callback);
    let mut control = AggregationControl::new().with_progress(Arc::new(move |processed, total| {
        callback.on_progress(processed, total);
    }));
    if let Some(ms) = timeout_ms {
        control = control.with_timeout(Duration::from_millis(ms));
    }

    #[cfg(feature = "parallel")]
    let tiles = coverage::aggregate_parallel_with_control(&samples, precision, &control)?;

    #[cfg(not(feature = "parallel"))]
    let tiles = coverage::aggregate_with_control(&samples, precision, &control)?;

    Ok(coverage::into_tiles(tiles))
}

/// Aggregate many activities at once, one sample list per activity.
#[uniffi::export]
pub fn ffi_aggregate_activities(
    activities: Vec<Vec<LocationSample>>,
    precision: u32,
) -> Result<Vec<CoverageTile>, TrackError> {
    init_logging();
    info!("[TrailPaintRust] aggregate_activities called for {} activities", activities.len());
    coverage::aggregate_activities(&activities, precision).map(coverage::into_tiles)
}

#[uniffi::export]
pub fn ffi_rollup_tiles(
    tiles: Vec<CoverageTile>,
    precision: u32,
) -> Result<Vec<CoverageTile>, TrackError> {
    coverage::rollup_tiles(&tiles, precision)
}

#[uniffi::export]
pub fn ffi_coverage_summary(tiles: Vec<CoverageTile>, precision: u32) -> CoverageSummary {
    CoverageSummary::from_tiles(&tiles, precision)
}

// ============================================================================
// Live Tracking Session
// ============================================================================

/// One recording session, driven by the platform's location callbacks.
///
/// Calls are serialized on an internal lock so fixes are processed in the
/// order the platform delivers them.
#[derive(uniffi::Object)]
pub struct TrackingSession {
    pipeline: Mutex<TrackingPipeline>,
    samples: Mutex<Vec<LocationSample>>,
}

#[uniffi::export]
impl TrackingSession {
    #[uniffi::constructor]
    pub fn new(activity: ActivityType, split_unit: SplitUnit) -> Arc<Self> {
        init_logging();
        info!("[TrailPaintRust] New {:?} session, splits in {:?}", activity, split_unit);
        Arc::new(Self {
            pipeline: Mutex::new(TrackingPipeline::for_activity(activity).with_split_unit(split_unit)),
            samples: Mutex::new(Vec::new()),
        })
    }

    /// Register a listener. Events are delivered on the thread that called
    /// `process_fix`, while the session is locked; listeners must not call
    /// back into the session.
    pub fn add_listener(&self, listener: Box<dyn TrackingListener>) -> Result<(), TrackError> {
        let mut pipeline = self.lock_pipeline()?;
        pipeline.subscribe(move |event| listener.on_event(event.clone()));
        Ok(())
    }

    pub fn process_fix(&self, fix: RawFix) -> Result<FixOutcome, TrackError> {
        // The pipeline guard is held across the push so samples are recorded
        // in processing order. Lock order is always pipeline, then samples.
        let mut pipeline = self.lock_pipeline()?;
        let outcome = pipeline.process(fix);
        if let Some(smoothed) = &outcome.smoothed {
            self.lock_samples()?.push(LocationSample::from(smoothed));
        }
        drop(pipeline);
        debug!("[TrailPaintRust] Fix decision: {:?}", outcome.decision);
        Ok(outcome)
    }

    pub fn set_activity(&self, activity: ActivityType) -> Result<(), TrackError> {
        self.lock_pipeline()?.set_activity(activity);
        Ok(())
    }

    pub fn statistics(&self) -> Result<PipelineStatistics, TrackError> {
        Ok(self.lock_pipeline()?.statistics())
    }

    pub fn completed_splits(&self) -> Result<Vec<Split>, TrackError> {
        Ok(self.lock_pipeline()?.completed_splits().to_vec())
    }

    pub fn current_split_progress(&self) -> Result<f64, TrackError> {
        Ok(self.lock_pipeline()?.splits().current_split_progress())
    }

    /// Coverage of the smoothed track recorded so far.
    pub fn coverage(&self, precision: u32) -> Result<Vec<CoverageTile>, TrackError> {
        let _pipeline = self.lock_pipeline()?;
        let samples = self.lock_samples()?;
        coverage::aggregate(&samples, precision).map(coverage::into_tiles)
    }

    /// Forget everything recorded. Listeners stay registered.
    pub fn reset(&self) -> Result<(), TrackError> {
        let mut pipeline = self.lock_pipeline()?;
        pipeline.reset();
        self.lock_samples()?.clear();
        Ok(())
    }
}

impl TrackingSession {
    fn lock_pipeline(&self) -> Result<std::sync::MutexGuard<'_, TrackingPipeline>, TrackError> {
        self.pipeline
            .lock()
            .map_err(|_| TrackError::Store("tracking session lock poisoned".to_string()))
    }

    fn lock_samples(&self) -> Result<std::sync::MutexGuard<'_, Vec<LocationSample>>, TrackError> {
        self.samples
            .lock()
            .map_err(|_| TrackError::Store("tracking session lock poisoned".to_string()))
    }
}

// ============================================================================
// Tests
// ============================================================================
