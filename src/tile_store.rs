//! Persistence boundary for coverage tiles.
//!
//! [`TileStore`] is the interface the app's database layer implements.
//! Upserts must follow the aggregation combine rule (increment on conflict,
//! never overwrite), so repeated or reordered upserts converge.
//!
//! [`InMemoryTileStore`] is a complete implementation backed by a hash map
//! and an R-tree over tile centers. [`CachedTileStore`] puts a query cache in
//! front of any store and drops the whole cache on every write.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use log::{debug, info};
use rstar::{RTree, RTreeObject, AABB};

use crate::coverage::{rollup_tiles, CoverageTile};
use crate::error::{Result, TrackError};
use crate::geohash::{self, precision_for_zoom_level};
use crate::Bounds;

/// Storage for aggregated coverage tiles.
pub trait TileStore: Send + Sync {
    /// Insert new tiles or combine them into existing ones.
    ///
    /// Either every tile is applied or none is.
    fn upsert_tiles(&self, tiles: &[CoverageTile]) -> Result<()>;

    /// Tiles whose geohash is in `geohashes`. Unknown codes are skipped.
    fn fetch_tiles(&self, geohashes: &[String]) -> Result<Vec<CoverageTile>>;

    /// Tiles whose center lies inside `bounds`.
    fn fetch_tiles_in_region(&self, bounds: &Bounds) -> Result<Vec<CoverageTile>>;

    fn delete_all(&self) -> Result<()>;
}

fn check_tile(tile: &CoverageTile) -> Result<()> {
    if !geohash::is_valid_geohash(&tile.geohash) {
        return Err(TrackError::InvalidGeohash { geohash: tile.geohash.clone() });
    }
    if tile.visit_count == 0 || tile.last_visited < tile.first_visited {
        return Err(TrackError::Store(format!(
            "tile {} has inconsistent visit statistics",
            tile.geohash
        )));
    }
    Ok(())
}

fn poisoned<T>(_: T) -> TrackError {
    TrackError::Store("tile store lock poisoned".to_string())
}

// ============================================================================
// In-memory store
// ============================================================================

/// Tile center entry for R-tree region queries.
#[derive(Debug, Clone, PartialEq)]
struct TileCenter {
    geohash: String,
    lng: f64,
    lat: f64,
}

impl RTreeObject for TileCenter {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lng, self.lat])
    }
}

#[derive(Default)]
struct StoreInner {
    tiles: HashMap<String, CoverageTile>,
    index: RTree<TileCenter>,
}

impl StoreInner {
    fn rebuild_index(&mut self) {
        let centers: Vec<TileCenter> = self
            .tiles
            .values()
            .map(|t| TileCenter {
                geohash: t.geohash.clone(),
                lng: t.longitude,
                lat: t.latitude,
            })
            .collect();
        self.index = RTree::bulk_load(centers);
    }
}

/// Thread-safe in-memory [`TileStore`].
#[derive(Default)]
pub struct InMemoryTileStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryTileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.tiles.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every stored tile, sorted by geohash.
    pub fn all_tiles(&self) -> Result<Vec<CoverageTile>> {
        let inner = self.inner.read().map_err(poisoned)?;
        let mut tiles: Vec<CoverageTile> = inner.tiles.values().cloned().collect();
        tiles.sort_by(|a, b| a.geohash.cmp(&b.geohash));
        Ok(tiles)
    }
}

impl TileStore for InMemoryTileStore {
    fn upsert_tiles(&self, tiles: &[CoverageTile]) -> Result<()> {
        for tile in tiles {
            check_tile(tile)?;
        }

        let mut inner = self.inner.write().map_err(poisoned)?;
        let mut inserted = 0usize;
        for tile in tiles {
            // Geohashes are case-insensitive; store them lower-case.
            let code = tile.geohash.to_ascii_lowercase();
            match inner.tiles.get_mut(&code) {
                Some(existing) => existing.absorb(tile),
                None => {
                    let tile = CoverageTile { geohash: code.clone(), ..tile.clone() };
                    inner.tiles.insert(code, tile);
                    inserted += 1;
                }
            }
        }
        if inserted > 0 {
            inner.rebuild_index();
        }

        info!(
            "Upserted {} tiles ({} new, {} stored)",
            tiles.len(),
            inserted,
            inner.tiles.len()
        );
        Ok(())
    }

    fn fetch_tiles(&self, geohashes: &[String]) -> Result<Vec<CoverageTile>> {
        let inner = self.inner.read().map_err(poisoned)?;
        let mut found: Vec<CoverageTile> = geohashes
            .iter()
            .filter_map(|code| inner.tiles.get(&code.to_ascii_lowercase()).cloned())
            .collect();
        found.sort_by(|a, b| a.geohash.cmp(&b.geohash));
        found.dedup_by(|a, b| a.geohash == b.geohash);
        Ok(found)
    }

    fn fetch_tiles_in_region(&self, bounds: &Bounds) -> Result<Vec<CoverageTile>> {
        let inner = self.inner.read().map_err(poisoned)?;
        let envelope = AABB::from_corners(
            [bounds.min_lng, bounds.min_lat],
            [bounds.max_lng, bounds.max_lat],
        );
        let mut found: Vec<CoverageTile> = inner
            .index
            .locate_in_envelope(&envelope)
            .filter_map(|entry| inner.tiles.get(&entry.geohash).cloned())
            .collect();
        found.sort_by(|a, b| a.geohash.cmp(&b.geohash));
        Ok(found)
    }

    fn delete_all(&self) -> Result<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        *inner = StoreInner::default();
        info!("Deleted all coverage tiles");
        Ok(())
    }
}

// ============================================================================
// Query cache
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Geohashes(Vec<String>),
    Region([u64; 4]),
}

impl CacheKey {
    fn geohashes(codes: &[String]) -> Self {
        let mut codes: Vec<String> = codes.iter().map(|c| c.to_ascii_lowercase()).collect();
        codes.sort();
        codes.dedup();
        CacheKey::Geohashes(codes)
    }

    fn region(bounds: &Bounds) -> Self {
        CacheKey::Region([
            bounds.min_lat.to_bits(),
            bounds.max_lat.to_bits(),
            bounds.min_lng.to_bits(),
            bounds.max_lng.to_bits(),
        ])
    }
}

/// A [`TileStore`] wrapper caching query results for overlay rendering.
///
/// Any write clears the entire cache; entries are never patched.
pub struct CachedTileStore<S: TileStore> {
    store: S,
    cache: Mutex<HashMap<CacheKey, Arc<Vec<CoverageTile>>>>,
}

impl<S: TileStore> CachedTileStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.store
    }

    pub fn cached_queries(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Drop every cached query result.
    pub fn invalidate(&self) -> Result<()> {
        let mut cache = self.cache.lock().map_err(poisoned)?;
        if !cache.is_empty() {
            debug!("Invalidating {} cached tile queries", cache.len());
        }
        cache.clear();
        Ok(())
    }

    fn cached(
        &self,
        key: CacheKey,
        load: impl FnOnce() -> Result<Vec<CoverageTile>>,
    ) -> Result<Vec<CoverageTile>> {
        let mut cache = self.cache.lock().map_err(poisoned)?;
        if let Some(hit) = cache.get(&key) {
            return Ok(hit.as_ref().clone());
        }
        let tiles = Arc::new(load()?);
        cache.insert(key, tiles.clone());
        Ok(tiles.as_ref().clone())
    }
}

impl<S: TileStore> TileStore for CachedTileStore<S> {
    fn upsert_tiles(&self, tiles: &[CoverageTile]) -> Result<()> {
        // Hold the cache lock across the write so no reader caches stale tiles.
        let mut cache = self.cache.lock().map_err(poisoned)?;
        let result = self.store.upsert_tiles(tiles);
        cache.clear();
        result
    }

    fn fetch_tiles(&self, geohashes: &[String]) -> Result<Vec<CoverageTile>> {
        self.cached(CacheKey::geohashes(geohashes), || self.store.fetch_tiles(geohashes))
    }

    fn fetch_tiles_in_region(&self, bounds: &Bounds) -> Result<Vec<CoverageTile>> {
        self.cached(CacheKey::region(bounds), || self.store.fetch_tiles_in_region(bounds))
    }

    fn delete_all(&self) -> Result<()> {
        let mut cache = self.cache.lock().map_err(poisoned)?;
        let result = self.store.delete_all();
        cache.clear();
        result
    }
}

/// Tiles for a map viewport, coarsened to the zoom level's precision.
pub fn fetch_tiles_for_viewport<S: TileStore + ?Sized>(
    store: &S,
    bounds: &Bounds,
    zoom: f64,
) -> Result<Vec<CoverageTile>> {
    let precision = precision_for_zoom_level(zoom);
    let tiles = store.fetch_tiles_in_region(bounds)?;
    let needs_rollup = tiles.iter().any(|t| t.geohash.len() > precision as usize);
    if needs_rollup {
        rollup_tiles(&tiles, precision)
    } else {
        Ok(tiles)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::{aggregate, into_tiles};
    use crate::LocationSample;

    fn tile(code: &str, visits: u32, first: i64, last: i64) -> CoverageTile {
        let center = geohash::decode(code).unwrap().center();
        CoverageTile {
            geohash: code.to_string(),
            latitude: center.latitude,
            longitude: center.longitude,
            visit_count: visits,
            first_visited: first,
            last_visited: last,
        }
    }

    #[test]
    fn test_upsert_increments_on_conflict() {
        let store = InMemoryTileStore::new();
        store.upsert_tiles(&[tile("gcpvj0e", 2, 100, 200)]).unwrap();
        store.upsert_tiles(&[tile("gcpvj0e", 3, 50, 150)]).unwrap();

        let tiles = store.fetch_tiles(&["gcpvj0e".to_string()]).unwrap();
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].visit_count, 5);
        assert_eq!(tiles[0].first_visited, 50);
        assert_eq!(tiles[0].last_visited, 200);
    }

    #[test]
    fn test_upsert_merges_across_case() {
        let store = InMemoryTileStore::new();
        store.upsert_tiles(&[tile("GCPVJ0E", 2, 100, 200)]).unwrap();
        store.upsert_tiles(&[tile("gcpvj0e", 3, 50, 150)]).unwrap();
        assert_eq!(store.len(), 1);

        let tiles = store.fetch_tiles(&["GCPVJ0E".to_string()]).unwrap();
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].geohash, "gcpvj0e");
        assert_eq!(tiles[0].visit_count, 5);
        assert_eq!(tiles[0].first_visited, 50);

        let region = geohash::decode("gcpvj0e").unwrap().bounds();
        assert_eq!(store.fetch_tiles_in_region(&region).unwrap().len(), 1);
    }

    #[test]
    fn test_upsert_order_does_not_matter() {
        let a = [tile("gcpvj0e", 2, 100, 200), tile("gcpvj0s", 1, 10, 10)];
        let b = [tile("gcpvj0e", 4, 300, 400)];

        let first = InMemoryTileStore::new();
        first.upsert_tiles(&a).unwrap();
        first.upsert_tiles(&b).unwrap();

        let second = InMemoryTileStore::new();
        second.upsert_tiles(&b).unwrap();
        second.upsert_tiles(&a).unwrap();

        assert_eq!(first.all_tiles().unwrap(), second.all_tiles().unwrap());
    }

    #[test]
    fn test_invalid_batch_is_not_partially_applied() {
        let store = InMemoryTileStore::new();
        let batch = [tile("gcpvj0e", 1, 1, 1), tile("gcpvj0s", 1, 5, 1)];
        assert!(store.upsert_tiles(&batch).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_fetch_in_region() {
        let store = InMemoryTileStore::new();
        let samples = vec![
            LocationSample::new(51.5074, -0.1278, 1),
            LocationSample::new(48.8566, 2.3522, 2),
        ];
        store.upsert_tiles(&into_tiles(aggregate(&samples, 7).unwrap())).unwrap();

        let london = Bounds { min_lat: 51.4, max_lat: 51.6, min_lng: -0.3, max_lng: 0.1 };
        let found = store.fetch_tiles_in_region(&london).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].geohash.starts_with("gcpvj"));

        store.delete_all().unwrap();
        assert!(store.fetch_tiles_in_region(&london).unwrap().is_empty());
    }

    #[test]
    fn test_cache_invalidated_on_upsert() {
        let store = CachedTileStore::new(InMemoryTileStore::new());
        store.upsert_tiles(&[tile("gcpvj0e", 1, 1, 1)]).unwrap();

        let query = vec!["gcpvj0e".to_string()];
        assert_eq!(store.fetch_tiles(&query).unwrap()[0].visit_count, 1);
        assert_eq!(store.cached_queries(), 1);

        store.upsert_tiles(&[tile("gcpvj0e", 1, 2, 2)]).unwrap();
        assert_eq!(store.cached_queries(), 0);
        assert_eq!(store.fetch_tiles(&query).unwrap()[0].visit_count, 2);
    }

    #[test]
    fn test_cache_key_ignores_order() {
        let store = CachedTileStore::new(InMemoryTileStore::new());
        store.upsert_tiles(&[tile("gcpvj0e", 1, 1, 1), tile("gcpvj0s", 1, 1, 1)]).unwrap();
        store.fetch_tiles(&["gcpvj0e".to_string(), "gcpvj0s".to_string()]).unwrap();
        store.fetch_tiles(&["gcpvj0s".to_string(), "gcpvj0e".to_string()]).unwrap();
        assert_eq!(store.cached_queries(), 1);
    }

    #[test]
    fn test_viewport_rolls_up_to_zoom_precision() {
        let store = InMemoryTileStore::new();
        store
            .upsert_tiles(&[tile("gcpvj0e", 2, 1, 5), tile("gcpvj0s", 3, 2, 9)])
            .unwrap();
        let bounds = geohash::decode("gcpvj").unwrap().bounds();

        let coarse = fetch_tiles_for_viewport(&store, &bounds, 8.0).unwrap();
        assert_eq!(coarse.len(), 1);
        assert_eq!(coarse[0].geohash, "gcpvj");
        assert_eq!(coarse[0].visit_count, 5);
        assert_eq!(coarse[0].first_visited, 1);
        assert_eq!(coarse[0].last_visited, 9);

        let fine = fetch_tiles_for_viewport(&store, &bounds, 14.0).unwrap();
        assert_eq!(fine.len(), 2);
    }
}
