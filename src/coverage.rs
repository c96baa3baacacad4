//! Coverage aggregation: "where has the user been".
//!
//! Maps location samples from completed activities onto geohash cells and
//! reduces them to per-cell visit statistics. The per-cell combine rule
//! (visit counts add, first visit is the minimum, last visit the maximum) is
//! associative and commutative, so samples can be partitioned arbitrarily,
//! aggregated independently and merged, in any order, to the same result.
//!
//! This module only produces tiles; storage and region queries over
//! persisted tiles live behind [`TileStore`](crate::TileStore).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{Result, TrackError};
use crate::geohash::{self, area_for_precision, validate_precision};
use crate::{Bounds, GpsPoint, LocationSample, SmoothedFix};

/// Samples processed between cancellation checks and progress reports.
const CHECK_INTERVAL: usize = 1024;

/// Per-cell visit statistics, the tile as it is being built.
#[derive(Debug, Clone, PartialEq)]
pub struct TileAccumulator {
    pub geohash: String,
    /// Cell center
    pub latitude: f64,
    pub longitude: f64,
    pub visit_count: u32,
    pub first_visited: i64,
    pub last_visited: i64,
}

impl TileAccumulator {
    /// A new tile for the first sample seen in `geohash`.
    fn first_visit(geohash: String, timestamp: i64) -> Result<Self> {
        let center = geohash::decode(&geohash)?.center();
        Ok(Self {
            geohash,
            latitude: center.latitude,
            longitude: center.longitude,
            visit_count: 1,
            first_visited: timestamp,
            last_visited: timestamp,
        })
    }

    fn observe(&mut self, timestamp: i64) {
        self.visit_count = self.visit_count.saturating_add(1);
        self.first_visited = self.first_visited.min(timestamp);
        self.last_visited = self.last_visited.max(timestamp);
    }

    /// Fold another accumulator for the same cell into this one.
    pub fn merge(&mut self, other: &TileAccumulator) {
        debug_assert_eq!(self.geohash, other.geohash);
        self.visit_count = self.visit_count.saturating_add(other.visit_count);
        self.first_visited = self.first_visited.min(other.first_visited);
        self.last_visited = self.last_visited.max(other.last_visited);
    }
}

/// Aggregation result keyed by geohash.
pub type TileMap = HashMap<String, TileAccumulator>;

/// A finished coverage tile, ready for a [`TileStore`](crate::TileStore).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CoverageTile {
    pub geohash: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Always at least 1
    pub visit_count: u32,
    /// Unix timestamp (seconds) of the earliest visit
    pub first_visited: i64,
    /// Unix timestamp (seconds) of the latest visit, never before `first_visited`
    pub last_visited: i64,
}

impl From<TileAccumulator> for CoverageTile {
    fn from(acc: TileAccumulator) -> Self {
        Self {
            geohash: acc.geohash,
            latitude: acc.latitude,
            longitude: acc.longitude,
            visit_count: acc.visit_count,
            first_visited: acc.first_visited,
            last_visited: acc.last_visited,
        }
    }
}

impl CoverageTile {
    /// Apply the aggregation combine rule with another observation of the same cell.
    pub fn absorb(&mut self, other: &CoverageTile) {
        self.visit_count = self.visit_count.saturating_add(other.visit_count);
        self.first_visited = self.first_visited.min(other.first_visited);
        self.last_visited = self.last_visited.max(other.last_visited);
    }
}

// ============================================================================
// Progress / Cancellation
// ============================================================================

/// Progress callback: (processed, total).
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Shared handle for observing and cancelling a running aggregation.
///
/// Cloning shares the same flags and counters, so one clone can be handed to
/// the worker and another kept by the UI.
#[derive(Clone, Default)]
pub struct AggregationControl {
    cancelled: Arc<AtomicBool>,
    processed: Arc<AtomicU64>,
    total: Arc<AtomicU64>,
    deadline: Option<Instant>,
    on_progress: Option<ProgressCallback>,
}

impl AggregationControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give up once `timeout` has elapsed from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// (processed, total) samples so far.
    pub fn progress(&self) -> (u64, u64) {
        (
            self.processed.load(Ordering::SeqCst),
            self.total.load(Ordering::SeqCst),
        )
    }

    fn begin(&self, total: u64) {
        self.processed.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
    }

    /// Record `count` more processed samples, then check for cancellation.
    fn advance(&self, count: u64) -> Result<()> {
        let processed = self.processed.fetch_add(count, Ordering::SeqCst) + count;
        let total = self.total.load(Ordering::SeqCst);
        if let Some(callback) = &self.on_progress {
            callback(processed, total);
        }
        self.checkpoint()
    }

    fn checkpoint(&self) -> Result<()> {
        let (processed, total) = self.progress();
        if self.is_cancelled() {
            warn!("Coverage aggregation cancelled at {}/{}", processed, total);
            return Err(TrackError::Cancelled { processed, total });
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            warn!("Coverage aggregation timed out at {}/{}", processed, total);
            return Err(TrackError::TimedOut { processed, total });
        }
        Ok(())
    }
}

impl std::fmt::Debug for AggregationControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregationControl")
            .field("cancelled", &self.is_cancelled())
            .field("progress", &self.progress())
            .field("deadline", &self.deadline)
            .finish()
    }
}

// ============================================================================
// Aggregation
// ============================================================================

fn validate_request(samples: &[LocationSample], precision: u32) -> Result<u32> {
    let precision = validate_precision(precision)?;
    if samples.is_empty() {
        return Err(TrackError::EmptySampleSet);
    }
    Ok(precision)
}

/// Fold samples into `tiles`, returning how many invalid samples were skipped.
/// Precision must already be validated.
fn accumulate(tiles: &mut TileMap, samples: &[LocationSample], precision: u32) -> usize {
    let mut skipped = 0;
    for sample in samples {
        // NaN or out-of-range coordinates would encode to a bogus corner cell.
        if !GpsPoint::new(sample.latitude, sample.longitude).is_valid() {
            skipped += 1;
            continue;
        }
        let code = geohash::encode(sample.latitude, sample.longitude, precision);
        match tiles.get_mut(&code) {
            Some(tile) => tile.observe(sample.timestamp),
            None => match TileAccumulator::first_visit(code.clone(), sample.timestamp) {
                Ok(tile) => {
                    tiles.insert(code, tile);
                }
                Err(_) => skipped += 1,
            },
        }
    }
    skipped
}

/// Fail when every sample was invalid, log when only some were.
fn finish(tiles: TileMap, skipped: usize) -> Result<TileMap> {
    if skipped > 0 {
        warn!("Skipped {} samples with invalid coordinates", skipped);
    }
    if tiles.is_empty() {
        return Err(TrackError::EmptySampleSet);
    }
    Ok(tiles)
}

/// Aggregate samples into per-geohash visit statistics.
///
/// Fails with [`TrackError::InvalidPrecision`] outside 1..=12 and with
/// [`TrackError::EmptySampleSet`] when there is nothing to aggregate.
pub fn aggregate(samples: &[LocationSample], precision: u32) -> Result<TileMap> {
    let precision = validate_request(samples, precision)?;
    let mut tiles = TileMap::new();
    let skipped = accumulate(&mut tiles, samples, precision);
    let tiles = finish(tiles, skipped)?;
    info!(
        "Aggregated {} samples into {} tiles at precision {}",
        samples.len(),
        tiles.len(),
        precision
    );
    Ok(tiles)
}

/// [`aggregate`] with progress reporting, cancellation and an optional deadline.
pub fn aggregate_with_control(
    samples: &[LocationSample],
    precision: u32,
    control: &AggregationControl,
) -> Result<TileMap> {
    let precision = validate_request(samples, precision)?;
    control.begin(samples.len() as u64);
    control.checkpoint()?;

    let mut tiles = TileMap::new();
    let mut skipped = 0;
    for chunk in samples.chunks(CHECK_INTERVAL) {
        skipped += accumulate(&mut tiles, chunk, precision);
        control.advance(chunk.len() as u64)?;
    }
    debug!("Controlled aggregation produced {} tiles", tiles.len());
    finish(tiles, skipped)
}

/// Merge two partial aggregations with the per-cell combine rule.
pub fn merge_tile_maps(a: TileMap, b: TileMap) -> TileMap {
    // Fold the smaller map into the larger one.
    let (mut into, from) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    for (code, tile) in from {
        match into.get_mut(&code) {
            Some(existing) => existing.merge(&tile),
            None => {
                into.insert(code, tile);
            }
        }
    }
    into
}

/// Aggregate samples in parallel chunks and merge the partial maps.
#[cfg(feature = "parallel")]
pub fn aggregate_parallel(samples: &[LocationSample], precision: u32) -> Result<TileMap> {
    aggregate_parallel_with_control(samples, precision, &AggregationControl::new())
}

/// Parallel aggregation with progress reporting and cancellation.
///
/// Workers check the control between chunks; the first cancelled chunk
/// aborts the whole reduction.
#[cfg(feature = "parallel")]
pub fn aggregate_parallel_with_control(
    samples: &[LocationSample],
    precision: u32,
    control: &AggregationControl,
) -> Result<TileMap> {
    use rayon::prelude::*;

    let precision = validate_request(samples, precision)?;
    control.begin(samples.len() as u64);
    control.checkpoint()?;

    let start = Instant::now();
    let (tiles, skipped) = samples
        .par_chunks(CHECK_INTERVAL)
        .map(|chunk| -> Result<(TileMap, usize)> {
            control.checkpoint()?;
            let mut partial = TileMap::new();
            let skipped = accumulate(&mut partial, chunk, precision);
            control.advance(chunk.len() as u64)?;
            Ok((partial, skipped))
        })
        .try_reduce(
            || (TileMap::new(), 0),
            |(a, skipped_a), (b, skipped_b)| Ok((merge_tile_maps(a, b), skipped_a + skipped_b)),
        )?;
    let tiles = finish(tiles, skipped)?;

    info!(
        "Parallel aggregation: {} samples -> {} tiles in {:?}",
        samples.len(),
        tiles.len(),
        start.elapsed()
    );
    Ok(tiles)
}

/// Aggregate several activities, each reduced on its own and then merged.
///
/// Uses rayon across activities when the `parallel` feature is enabled.
pub fn aggregate_activities(
    activities: &[Vec<LocationSample>],
    precision: u32,
) -> Result<TileMap> {
    let precision = validate_precision(precision)?;
    let non_empty: Vec<&Vec<LocationSample>> =
        activities.iter().filter(|a| !a.is_empty()).collect();
    if non_empty.is_empty() {
        return Err(TrackError::EmptySampleSet);
    }

    let reduce_one = |samples: &Vec<LocationSample>| {
        let mut partial = TileMap::new();
        let skipped = accumulate(&mut partial, samples, precision);
        (partial, skipped)
    };
    let combine = |(a, skipped_a): (TileMap, usize), (b, skipped_b): (TileMap, usize)| {
        (merge_tile_maps(a, b), skipped_a + skipped_b)
    };

    #[cfg(feature = "parallel")]
    let (tiles, skipped) = {
        use rayon::prelude::*;
        non_empty
            .par_iter()
            .map(|a| reduce_one(a))
            .reduce(|| (TileMap::new(), 0), combine)
    };

    #[cfg(not(feature = "parallel"))]
    let (tiles, skipped) = non_empty
        .iter()
        .map(|a| reduce_one(a))
        .fold((TileMap::new(), 0), combine);
    let tiles = finish(tiles, skipped)?;

    info!(
        "Aggregated {} activities into {} tiles",
        non_empty.len(),
        tiles.len()
    );
    Ok(tiles)
}

/// Finalize an aggregation into tiles sorted by geohash.
pub fn into_tiles(tiles: TileMap) -> Vec<CoverageTile> {
    let mut out: Vec<CoverageTile> = tiles.into_values().map(CoverageTile::from).collect();
    out.sort_by(|a, b| a.geohash.cmp(&b.geohash));
    out
}

/// Re-bucket tiles into coarser cells by truncating their geohashes.
///
/// Works because every code's prefix is the code of its enclosing cell.
/// Tiles already at or below `precision` characters keep their cell.
/// Fails on the first tile whose geohash does not decode.
pub fn rollup_tiles(tiles: &[CoverageTile], precision: u32) -> Result<Vec<CoverageTile>> {
    let precision = validate_precision(precision)? as usize;
    let mut merged = TileMap::new();
    for tile in tiles {
        if !geohash::is_valid_geohash(&tile.geohash) {
            return Err(TrackError::InvalidGeohash {
                geohash: tile.geohash.clone(),
            });
        }
        let code: String = tile
            .geohash
            .chars()
            .take(precision)
            .collect::<String>()
            .to_ascii_lowercase();
        let acc = TileAccumulator {
            visit_count: tile.visit_count,
            first_visited: tile.first_visited,
            last_visited: tile.last_visited,
            ..TileAccumulator::first_visit(code.clone(), tile.first_visited)?
        };
        match merged.get_mut(&code) {
            Some(existing) => existing.merge(&acc),
            None => {
                merged.insert(code, acc);
            }
        }
    }
    Ok(into_tiles(merged))
}

/// Convert recorded fixes into aggregation samples.
pub fn samples_from_fixes(fixes: &[SmoothedFix]) -> Vec<LocationSample> {
    fixes.iter().map(LocationSample::from).collect()
}

// ============================================================================
// Summary
// ============================================================================

/// Headline numbers for a set of tiles.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CoverageSummary {
    pub tile_count: u32,
    pub total_visits: u64,
    /// Approximate explored area, from equatorial cell dimensions
    pub explored_area_m2: f64,
    pub first_visited: Option<i64>,
    pub last_visited: Option<i64>,
    /// Box around the visited cell centers, for fitting a map camera
    pub bounds: Option<Bounds>,
}

impl CoverageSummary {
    /// Summarize tiles that all share `precision`.
    pub fn from_tiles(tiles: &[CoverageTile], precision: u32) -> Self {
        let centers: Vec<GpsPoint> = tiles
            .iter()
            .map(|t| GpsPoint::new(t.latitude, t.longitude))
            .collect();
        Self {
            tile_count: tiles.len() as u32,
            total_visits: tiles.iter().map(|t| t.visit_count as u64).sum(),
            explored_area_m2: tiles.len() as f64 * area_for_precision(precision),
            first_visited: tiles.iter().map(|t| t.first_visited).min(),
            last_visited: tiles.iter().map(|t| t.last_visited).max(),
            bounds: Bounds::from_points(&centers),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn sf_samples() -> Vec<LocationSample> {
        vec![
            LocationSample::new(37.7749, -122.4194, 1_000),
            LocationSample::new(37.776, -122.418, 3_000),
            LocationSample::new(37.772, -122.43, 2_000),
        ]
    }

    #[test]
    fn test_single_cell_visits() {
        let tiles = into_tiles(aggregate(&sf_samples(), 5).unwrap());
        assert_eq!(tiles.len(), 1);
        let tile = &tiles[0];
        assert_eq!(tile.geohash, "9q8yy");
        assert_eq!(tile.visit_count, 3);
        assert_eq!(tile.first_visited, 1_000);
        assert_eq!(tile.last_visited, 3_000);

        let cell = geohash::decode("9q8yy").unwrap();
        assert_eq!(tile.latitude, cell.center().latitude);
        assert_eq!(tile.longitude, cell.center().longitude);
    }

    #[test]
    fn test_validation_errors() {
        assert_eq!(aggregate(&[], 7), Err(TrackError::EmptySampleSet));
        assert_eq!(
            aggregate(&sf_samples(), 0),
            Err(TrackError::InvalidPrecision { precision: 0 })
        );
        assert_eq!(
            aggregate(&sf_samples(), 13),
            Err(TrackError::InvalidPrecision { precision: 13 })
        );
    }

    #[test]
    fn test_partition_and_order_independence() {
        let mut samples = Vec::new();
        for i in 0..500 {
            let lat = 51.50 + (i % 17) as f64 * 0.0007;
            let lng = -0.12 + (i % 11) as f64 * 0.0009;
            samples.push(LocationSample::new(lat, lng, 1_000 + (i * 7919 % 1000) as i64));
        }

        let whole = into_tiles(aggregate(&samples, 7).unwrap());

        let (left, right) = samples.split_at(123);
        let merged = into_tiles(merge_tile_maps(
            aggregate(right, 7).unwrap(),
            aggregate(left, 7).unwrap(),
        ));
        assert_eq!(whole, merged);

        let mut reversed = samples.clone();
        reversed.reverse();
        assert_eq!(whole, into_tiles(aggregate(&reversed, 7).unwrap()));

        let activities: Vec<Vec<LocationSample>> =
            samples.chunks(50).map(|c| c.to_vec()).collect();
        assert_eq!(whole, into_tiles(aggregate_activities(&activities, 7).unwrap()));
    }

    #[test]
    fn test_aggregate_activities_rejects_all_empty() {
        let activities = vec![Vec::new(), Vec::new()];
        assert_eq!(aggregate_activities(&activities, 7), Err(TrackError::EmptySampleSet));
    }

    #[test]
    fn test_progress_reported() {
        let samples: Vec<LocationSample> = (0..3000)
            .map(|i| LocationSample::new(51.5 + i as f64 * 1e-5, -0.12, i))
            .collect();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let control = AggregationControl::new().with_progress(Arc::new(move |done, total| {
            sink.lock().unwrap().push((done, total));
        }));

        aggregate_with_control(&samples, 7, &control).unwrap();
        assert_eq!(control.progress(), (3000, 3000));
        let reports = seen.lock().unwrap();
        assert_eq!(reports.last(), Some(&(3000, 3000)));
        assert_eq!(reports.len(), 3);
    }

    #[test]
    fn test_cancellation() {
        let samples: Vec<LocationSample> = (0..5000)
            .map(|i| LocationSample::new(51.5, -0.12, i))
            .collect();
        let control = AggregationControl::new();
        let canceller = control.clone();
        let control = control.with_progress(Arc::new(move |done, _| {
            if done >= 2048 {
                canceller.cancel();
            }
        }));

        let result = aggregate_with_control(&samples, 7, &control);
        assert_eq!(result, Err(TrackError::Cancelled { processed: 2048, total: 5000 }));
    }

    #[test]
    fn test_timeout() {
        let samples = sf_samples();
        let control = AggregationControl::new().with_timeout(Duration::ZERO);
        assert!(matches!(
            aggregate_with_control(&samples, 5, &control),
            Err(TrackError::TimedOut { processed: 0, .. })
        ));
    }

    #[test]
    fn test_summary() {
        let tiles = into_tiles(aggregate(&sf_samples(), 5).unwrap());
        let summary = CoverageSummary::from_tiles(&tiles, 5);
        assert_eq!(summary.tile_count, 1);
        assert_eq!(summary.total_visits, 3);
        assert_eq!(summary.first_visited, Some(1_000));
        assert_eq!(summary.last_visited, Some(3_000));
        assert!(summary.explored_area_m2 > 20_000_000.0);

        let center = geohash::decode("9q8yy").unwrap().center();
        let bounds = summary.bounds.unwrap();
        assert_eq!(bounds.min_lat, center.latitude);
        assert_eq!(bounds.max_lng, center.longitude);
        assert_eq!(CoverageSummary::from_tiles(&[], 5).bounds, None);
    }

    /// Within half a precision-6 cell.
    fn approx_eq_deg(a: f64, b: f64) -> bool {
        (a - b).abs() < 0.01
    }

    #[test]
    fn test_summary_bounds_span_tiles() {
        let samples = vec![
            LocationSample::new(51.5074, -0.1278, 10),
            LocationSample::new(48.8566, 2.3522, 20),
        ];
        let tiles = into_tiles(aggregate(&samples, 6).unwrap());
        let bounds = CoverageSummary::from_tiles(&tiles, 6).bounds.unwrap();
        assert!(bounds.contains(50.0, 1.0));
        assert!(approx_eq_deg(bounds.max_lat, 51.5074));
        assert!(approx_eq_deg(bounds.min_lng, -0.1278));
        assert!(!bounds.contains(52.5, 0.0));
    }

    #[test]
    fn test_invalid_samples_are_skipped() {
        let mut samples = sf_samples();
        samples.push(LocationSample::new(f64::NAN, -122.4194, 4_000));
        samples.push(LocationSample::new(37.7749, f64::INFINITY, 5_000));
        samples.push(LocationSample::new(95.0, 10.0, 6_000));

        let tiles = into_tiles(aggregate(&samples, 7).unwrap());
        assert!(tiles.iter().all(|t| !t.geohash.starts_with('0')));
        assert_eq!(tiles.iter().map(|t| t.visit_count).sum::<u32>(), 3);
        assert!(tiles.iter().all(|t| t.last_visited <= 3_000));

        let control = AggregationControl::new();
        let controlled = into_tiles(aggregate_with_control(&samples, 7, &control).unwrap());
        assert_eq!(controlled, tiles);
    }

    #[test]
    fn test_all_invalid_samples_is_empty_set() {
        let samples = vec![
            LocationSample::new(f64::NAN, f64::NAN, 1),
            LocationSample::new(f64::NAN, 0.0, 2),
        ];
        assert_eq!(aggregate(&samples, 7), Err(TrackError::EmptySampleSet));
        assert_eq!(
            aggregate_activities(&[samples.clone()], 7),
            Err(TrackError::EmptySampleSet)
        );
    }

    #[test]
    fn test_rollup_rejects_bad_geohash() {
        let mut tiles = into_tiles(aggregate(&sf_samples(), 7).unwrap());
        tiles[0].geohash = "9q8y!".to_string();
        assert_eq!(
            rollup_tiles(&tiles, 5),
            Err(TrackError::InvalidGeohash { geohash: "9q8y!".to_string() })
        );

        tiles[0].geohash = String::new();
        assert!(matches!(rollup_tiles(&tiles, 5), Err(TrackError::InvalidGeohash { .. })));
    }

    #[test]
    fn test_rollup_matches_direct_aggregation() {
        let samples: Vec<LocationSample> = (0..400)
            .map(|i| LocationSample::new(51.50 + (i % 23) as f64 * 0.002, -0.12 + (i % 19) as f64 * 0.002, i))
            .collect();
        let fine = into_tiles(aggregate(&samples, 7).unwrap());
        let coarse = into_tiles(aggregate(&samples, 5).unwrap());
        assert_eq!(rollup_tiles(&fine, 5).unwrap(), coarse);
        assert!(rollup_tiles(&fine, 0).is_err());
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_parallel_matches_sequential() {
        let samples: Vec<LocationSample> = (0..10_000)
            .map(|i| {
                LocationSample::new(
                    51.5 + (i % 97) as f64 * 0.0003,
                    -0.12 + (i % 89) as f64 * 0.0003,
                    i as i64,
                )
            })
            .collect();
        let sequential = into_tiles(aggregate(&samples, 7).unwrap());
        let parallel = into_tiles(aggregate_parallel(&samples, 7).unwrap());
        assert_eq!(sequential, parallel);
    }
}
