//! Aggregate a batch of synthetic activities into geohash coverage tiles.
//!
//! Run with: cargo run --example coverage_batch --features parallel

use std::time::Instant;

use trailpaint::coverage::{self, CoverageSummary};
use trailpaint::tile_store::{fetch_tiles_for_viewport, InMemoryTileStore, TileStore};
use trailpaint::{geo_utils, GpsPoint, LocationSample};

fn main() {
    println!("Coverage Batch Example\n");

    // 50 out-and-back runs radiating from central London, one sample every 5 s
    let origin = GpsPoint::new(51.5074, -0.1278);
    let mut activities = Vec::new();
    for run in 0..50 {
        let bearing = (run as f64 * 7.2).to_radians();
        let base_time = 1_700_000_000 + run as i64 * 86_400;
        let samples: Vec<LocationSample> = (0..720)
            .map(|i| {
                let out = if i < 360 { i } else { 720 - i } as f64 * 15.0;
                LocationSample::new(
                    origin.latitude + out * bearing.cos() / geo_utils::METERS_PER_DEGREE,
                    origin.longitude + geo_utils::meters_to_degrees(out * bearing.sin(), origin.latitude),
                    base_time + i as i64 * 5,
                )
            })
            .collect();
        activities.push(samples);
    }
    let all: Vec<LocationSample> = activities.iter().flatten().copied().collect();
    println!("Generated {} samples across {} activities\n", all.len(), activities.len());

    let start = Instant::now();
    let sequential = coverage::aggregate(&all, 7).expect("aggregate");
    println!("Sequential: {} tiles in {:?}", sequential.len(), start.elapsed());

    let start = Instant::now();
    let parallel = coverage::aggregate_parallel(&all, 7).expect("aggregate_parallel");
    println!("Parallel:   {} tiles in {:?}", parallel.len(), start.elapsed());
    assert_eq!(sequential.len(), parallel.len());

    let tiles = coverage::into_tiles(parallel);
    let summary = CoverageSummary::from_tiles(&tiles, 7);
    println!(
        "\nExplored {:.2} km² across {} tiles ({} visits)",
        summary.explored_area_m2 / 1_000_000.0,
        summary.tile_count,
        summary.total_visits
    );

    let busiest = tiles.iter().max_by_key(|t| t.visit_count).expect("non-empty");
    println!("Busiest tile: {} with {} visits", busiest.geohash, busiest.visit_count);

    let store = InMemoryTileStore::new();
    store.upsert_tiles(&tiles).expect("upsert");
    let viewport = geo_utils::bounds_around(&origin, 2_000.0);
    for zoom in [10.0, 13.0, 15.0] {
        let visible = fetch_tiles_for_viewport(&store, &viewport, zoom).expect("viewport");
        println!("Zoom {:>4}: {} tiles in a 2 km viewport", zoom, visible.len());
    }
}
