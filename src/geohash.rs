//! # Geohash Codec
//!
//! Pure functions for converting between coordinates and geohash strings.
//!
//! A geohash interleaves longitude (even bits) and latitude (odd bits) of a
//! recursive bisection of the world and emits five bits per character using
//! the standard base-32 alphabet. Longer codes denote smaller cells nested
//! inside the cell of every prefix, so truncating a code always yields the
//! code of the enclosing coarser cell.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`encode`] | Coordinate to geohash at a precision |
//! | [`decode`] | Geohash to cell bounds and center |
//! | [`neighbor`] | Adjacent cell in a cardinal direction |
//! | [`neighbors`] | The 8 cells surrounding a cell |
//! | [`precision_for_zoom_level`] | Map zoom level to tile precision |
//! | [`dimensions_for_precision`] | Approximate cell size in meters |
//! | [`geohashes_in_bounds`] | All cells covering a bounding box |
//!
//! ## Example
//!
//! ```rust
//! use trailpaint::geohash;
//!
//! let code = geohash::encode(51.5074, -0.1278, 5);
//! assert_eq!(code, "gcpvj");
//!
//! let cell = geohash::decode(&code).unwrap();
//! assert!(cell.contains(51.5074, -0.1278));
//! ```

use crate::error::{Result, TrackError};
use crate::geo_utils::METERS_PER_DEGREE;
use crate::{Bounds, GpsPoint};

/// Standard geohash base-32 alphabet (no a, i, l, o).
const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

pub const MIN_PRECISION: u32 = 1;
pub const MAX_PRECISION: u32 = 12;

/// Precision used for coverage tiles unless the caller overrides it.
pub const DEFAULT_PRECISION: u32 = 7;

/// Approximate cell (width, height) in meters per precision, at the equator.
///
/// Derived from the cell's angular size at 111,320 m per degree. Cells
/// narrow toward the poles; the equatorial figure is used everywhere.
const CELL_DIMENSIONS: [(f64, f64); 12] = [
    (5_009_400.0, 5_009_400.0),
    (1_252_350.0, 626_175.0),
    (156_543.75, 156_543.75),
    (39_135.9375, 19_567.968_75),
    (4_891.992_187_5, 4_891.992_187_5),
    (1_222.998_046_875, 611.499_023_437_5),
    (152.874_755_859_375, 152.874_755_859_375),
    (38.218_688_964_843_75, 19.109_344_482_421_875),
    (4.777_336_120_605_469, 4.777_336_120_605_469),
    (1.194_334_030_151_367_2, 0.597_167_015_075_683_6),
    (0.149_291_753_768_920_9, 0.149_291_753_768_920_9),
    (0.037_322_938_442_230_225, 0.018_661_469_221_115_112),
];

/// Cardinal direction for [`neighbor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    /// Unit step as (latitude rows, longitude columns).
    fn step(self) -> (f64, f64) {
        match self {
            Direction::North => (1.0, 0.0),
            Direction::South => (-1.0, 0.0),
            Direction::East => (0.0, 1.0),
            Direction::West => (0.0, -1.0),
        }
    }
}

/// The rectangular cell a geohash denotes.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct GeohashCell {
    pub geohash: String,
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl GeohashCell {
    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }

    /// Cell height in degrees of latitude.
    pub fn latitude_height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    /// Cell width in degrees of longitude.
    pub fn longitude_width(&self) -> f64 {
        self.max_lng - self.min_lng
    }

    pub fn bounds(&self) -> Bounds {
        Bounds {
            min_lat: self.min_lat,
            max_lat: self.max_lat,
            min_lng: self.min_lng,
            max_lng: self.max_lng,
        }
    }

    /// Whether the coordinate falls inside this cell (edges inclusive).
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        self.bounds().contains(latitude, longitude)
    }
}

// =============================================================================
// Encoding / Decoding
// =============================================================================

/// Check a precision against the supported 1..=12 range.
pub fn validate_precision(precision: u32) -> Result<u32> {
    if (MIN_PRECISION..=MAX_PRECISION).contains(&precision) {
        Ok(precision)
    } else {
        Err(TrackError::InvalidPrecision { precision })
    }
}

/// Encode a coordinate as a geohash of `precision` characters.
///
/// The precision is clamped into 1..=12; use [`validate_precision`] first when
/// the value comes from a caller. Latitude is clamped to ±90 and longitude
/// wrapped into [-180, 180).
pub fn encode(latitude: f64, longitude: f64, precision: u32) -> String {
    let precision = precision.clamp(MIN_PRECISION, MAX_PRECISION) as usize;
    let latitude = latitude.clamp(-90.0, 90.0);
    let longitude = wrap_longitude(longitude);

    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lng_range = (-180.0_f64, 180.0_f64);
    let mut code = String::with_capacity(precision);
    let mut even_bit = true;

    while code.len() < precision {
        let mut index = 0usize;
        for _ in 0..5 {
            let (value, range) = if even_bit {
                (longitude, &mut lng_range)
            } else {
                (latitude, &mut lat_range)
            };
            let mid = (range.0 + range.1) / 2.0;
            index <<= 1;
            if value >= mid {
                index |= 1;
                range.0 = mid;
            } else {
                range.1 = mid;
            }
            even_bit = !even_bit;
        }
        code.push(BASE32[index] as char);
    }

    code
}

/// Decode a geohash into its cell.
///
/// Accepts upper or lower case. Fails on empty input, more than 12
/// characters, or symbols outside the alphabet.
pub fn decode(geohash: &str) -> Result<GeohashCell> {
    let invalid = || TrackError::InvalidGeohash { geohash: geohash.to_string() };

    if geohash.is_empty() || geohash.len() > MAX_PRECISION as usize {
        return Err(invalid());
    }

    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lng_range = (-180.0_f64, 180.0_f64);
    let mut even_bit = true;

    for c in geohash.chars() {
        let index = symbol_index(c).ok_or_else(invalid)?;
        for shift in (0..5).rev() {
            let bit_set = (index >> shift) & 1 == 1;
            let range = if even_bit { &mut lng_range } else { &mut lat_range };
            let mid = (range.0 + range.1) / 2.0;
            if bit_set {
                range.0 = mid;
            } else {
                range.1 = mid;
            }
            even_bit = !even_bit;
        }
    }

    Ok(GeohashCell {
        geohash: geohash.to_ascii_lowercase(),
        min_lat: lat_range.0,
        max_lat: lat_range.1,
        min_lng: lng_range.0,
        max_lng: lng_range.1,
    })
}

/// Whether `geohash` is a decodable code of 1..=12 characters.
pub fn is_valid_geohash(geohash: &str) -> bool {
    !geohash.is_empty()
        && geohash.len() <= MAX_PRECISION as usize
        && geohash.chars().all(|c| symbol_index(c).is_some())
}

fn symbol_index(c: char) -> Option<usize> {
    if !c.is_ascii() {
        return None;
    }
    let lower = c.to_ascii_lowercase() as u8;
    BASE32.iter().position(|&b| b == lower)
}

// =============================================================================
// Neighbors
// =============================================================================

/// The adjacent cell of equal precision in `direction`.
///
/// Stepping east or west across the antimeridian wraps around. Stepping north
/// or south over a pole continues down the far side of the globe (half a turn
/// of longitude away), so the result is never the input cell itself.
pub fn neighbor(geohash: &str, direction: Direction) -> Result<String> {
    let cell = decode(geohash)?;
    let (rows, cols) = direction.step();
    Ok(offset_cell(&cell, rows, cols))
}

/// The 8 surrounding cells, in order N, NE, E, SE, S, SW, W, NW.
pub fn neighbors(geohash: &str) -> Result<Vec<String>> {
    let cell = decode(geohash)?;
    const OFFSETS: [(f64, f64); 8] = [
        (1.0, 0.0),
        (1.0, 1.0),
        (0.0, 1.0),
        (-1.0, 1.0),
        (-1.0, 0.0),
        (-1.0, -1.0),
        (0.0, -1.0),
        (1.0, -1.0),
    ];
    Ok(OFFSETS
        .iter()
        .map(|&(rows, cols)| offset_cell(&cell, rows, cols))
        .collect())
}

/// Encode the center of the cell `rows`/`cols` steps away from `cell`.
fn offset_cell(cell: &GeohashCell, rows: f64, cols: f64) -> String {
    let center = cell.center();
    let mut lat = center.latitude + rows * cell.latitude_height();
    let mut lng = center.longitude + cols * cell.longitude_width();

    if lat > 90.0 {
        lat = 180.0 - lat;
        lng += 180.0;
    } else if lat < -90.0 {
        lat = -180.0 - lat;
        lng += 180.0;
    }

    encode(lat, wrap_longitude(lng), cell.geohash.len() as u32)
}

fn wrap_longitude(longitude: f64) -> f64 {
    if (-180.0..180.0).contains(&longitude) {
        longitude
    } else {
        (longitude + 180.0).rem_euclid(360.0) - 180.0
    }
}

// =============================================================================
// Precision Tables
// =============================================================================

/// Map a (possibly fractional) map zoom level to a tile precision.
///
/// Coarser cells at low zoom keep the number of rendered tiles bounded.
pub fn precision_for_zoom_level(zoom: f64) -> u32 {
    match zoom {
        z if z < 3.0 => 2,
        z if z < 5.0 => 3,
        z if z < 7.0 => 4,
        z if z < 9.0 => 5,
        z if z < 12.0 => 6,
        z if z < 15.0 => 7,
        z if z < 17.0 => 8,
        _ => 9,
    }
}

/// Approximate (width, height) of a cell in meters, at the equator.
///
/// The precision is clamped into 1..=12.
pub fn dimensions_for_precision(precision: u32) -> (f64, f64) {
    let index = precision.clamp(MIN_PRECISION, MAX_PRECISION) as usize - 1;
    CELL_DIMENSIONS[index]
}

/// Approximate cell area in square meters.
pub fn area_for_precision(precision: u32) -> f64 {
    let (width, height) = dimensions_for_precision(precision);
    width * height
}

// =============================================================================
// Region Cover
// =============================================================================

/// Every geohash of `precision` whose cell intersects `bounds`.
///
/// Walks the grid row by row from the south-west cell. Bounds crossing the
/// antimeridian (`min_lng > max_lng`) yield an empty set.
pub fn geohashes_in_bounds(bounds: &Bounds, precision: u32) -> Result<Vec<String>> {
    let precision = validate_precision(precision)?;
    if bounds.min_lng > bounds.max_lng || bounds.min_lat > bounds.max_lat {
        return Ok(Vec::new());
    }

    let min_lat = bounds.min_lat.clamp(-90.0, 90.0);
    let max_lat = bounds.max_lat.clamp(-90.0, 90.0);
    let min_lng = bounds.min_lng.clamp(-180.0, 180.0);
    let max_lng = bounds.max_lng.clamp(-180.0, 180.0);

    let origin = decode(&encode(min_lat, min_lng, precision))?;
    let height = origin.latitude_height();
    let width = origin.longitude_width();
    let origin_center = origin.center();

    let mut codes = Vec::new();
    let mut lat = origin_center.latitude;
    while lat - height / 2.0 <= max_lat && lat < 90.0 {
        let mut lng = origin_center.longitude;
        while lng - width / 2.0 <= max_lng && lng < 180.0 {
            codes.push(encode(lat, lng, precision));
            lng += width;
        }
        lat += height;
    }

    log::debug!(
        "Region cover at precision {}: {} cells ({:.0}m x {:.0}m each)",
        precision,
        codes.len(),
        width * METERS_PER_DEGREE,
        height * METERS_PER_DEGREE
    );

    Ok(codes)
}

// =============================================================================
// Unit Tests
// =============================================================================
