//! # Geographic Utilities
//!
//! Distance and bounding-box helpers shared by the fix filter, the split
//! tracker and the coverage layer.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two GPS points |
//! | [`meters_to_degrees`] | Convert meters to approximate degrees at a latitude |
//! | [`bounds_around`] | Square search box around a point |
//!
//! ## Example
//!
//! ```rust
//! use trailpaint::{GpsPoint, geo_utils};
//!
//! let start = GpsPoint::new(51.5074, -0.1278);
//! let search = geo_utils::bounds_around(&start, 500.0);
//! assert!(search.contains(51.5080, -0.1290));
//! ```
//!
//! All functions expect WGS84 coordinates (latitude/longitude in degrees).
//! Distances use the haversine formula on a spherical Earth (radius 6,371 km),
//! accurate to within 0.3% for the short hops between consecutive fixes.

use geo::{Distance, Haversine, Point};

use crate::{Bounds, GpsPoint};

/// Meters per degree of latitude (and of longitude at the equator).
pub const METERS_PER_DEGREE: f64 = 111_320.0;

// =============================================================================
// Distance Functions
// =============================================================================

/// Calculate the great-circle distance between two GPS points using the Haversine formula.
///
/// # Example
///
/// ```rust
/// use trailpaint::{GpsPoint, geo_utils};
///
/// let london = GpsPoint::new(51.5074, -0.1278);
/// let paris = GpsPoint::new(48.8566, 2.3522);
///
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_560.0).abs() < 1000.0); // ~344 km
/// ```
#[inline]
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let point1 = Point::new(p1.longitude, p1.latitude);
    let point2 = Point::new(p2.longitude, p2.latitude);
    Haversine::distance(point1, point2)
}

/// Convert meters to approximate degrees at a given latitude.
///
/// Uses the longitude scale (`cos(latitude)`), which is the larger of the two,
/// so a square box built from the result always covers the requested radius.
#[inline]
pub fn meters_to_degrees(meters: f64, latitude: f64) -> f64 {
    let lat_rad = latitude.to_radians();
    let meters_per_degree = METERS_PER_DEGREE * lat_rad.cos().max(0.1);
    meters / meters_per_degree
}

// =============================================================================
// Bounding Box Functions
// =============================================================================

/// A square box of half-width `radius_meters` centred on `center`, clamped to valid coordinates.
pub fn bounds_around(center: &GpsPoint, radius_meters: f64) -> Bounds {
    let delta = meters_to_degrees(radius_meters, center.latitude);
    Bounds {
        min_lat: (center.latitude - delta).max(-90.0),
        max_lat: (center.latitude + delta).min(90.0),
        min_lng: (center.longitude - delta).max(-180.0),
        max_lng: (center.longitude + delta).min(180.0),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
