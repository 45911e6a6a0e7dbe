//! # Geographic Utilities
//!
//! Closed-form spherical-earth math used for segment validation, trip
//! distances and reference-point proximity tests.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_angle`] | Central angle between two points (radians) |
//! | [`distance`] | Great-circle distance in a [`DistanceUnit`] |
//! | [`bearing`] | Initial great-circle bearing (radians, `(-π, π]`) |
//! | [`cross_track_distance`] | Signed distance from a point to the great circle through two points |
//! | [`distance_to_segment`] | Distance from a point to the finite arc between two points |
//! | [`passes_within`] | Proximity test of a path against a reference point |
//! | [`path_length`] | Summed distance along a chain of points |
//!
//! ## Example
//!
//! ```rust
//! use cab_trips::{GeoPoint, DistanceUnit, geo_utils};
//!
//! let ferry_building = GeoPoint::new(37.7955, -122.3937);
//! let sfo = GeoPoint::new(37.62131, -122.37896);
//!
//! let km = geo_utils::distance(&ferry_building, &sfo, DistanceUnit::Kilometers);
//! let mi = geo_utils::distance(&ferry_building, &sfo, DistanceUnit::StatuteMiles);
//! assert!(km > mi);
//! println!("Ferry Building to SFO: {:.1} km ({:.1} mi)", km, mi);
//! ```
//!
//! ## Algorithm Notes
//!
//! ### Haversine Formula
//!
//! `h = sin²(Δφ/2) + cos φ₁ · cos φ₂ · sin²(Δλ/2)`, angle `= 2·atan2(√h, √(1−h))`.
//! The earth is a sphere whose radius depends on the requested unit
//! (6371.009 km, 3440.069 nmi, 3958.761 mi).
//!
//! ### Cross-Track Distance
//!
//! [`cross_track_distance`] measures against the *infinite* great circle, so a
//! point far beyond either endpoint can still be "close". Reference-proximity
//! gating has always used this simplification and [`passes_within`] keeps it
//! unless asked for the bounded variant.

use std::fmt;
use std::str::FromStr;

use crate::error::TripError;
use crate::GeoPoint;

/// Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.009;
/// Earth radius in nautical miles.
pub const EARTH_RADIUS_NMI: f64 = 3440.069;
/// Earth radius in statute miles.
pub const EARTH_RADIUS_MI: f64 = 3958.761;

// =============================================================================
// Units
// =============================================================================

/// Unit selector for every distance-returning function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DistanceUnit {
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "km"))]
    Kilometers,
    #[cfg_attr(feature = "serde", serde(rename = "nmi"))]
    NauticalMiles,
    #[cfg_attr(feature = "serde", serde(rename = "mi"))]
    StatuteMiles,
}

impl DistanceUnit {
    /// Sphere radius expressed in this unit.
    #[inline]
    pub fn earth_radius(self) -> f64 {
        match self {
            DistanceUnit::Kilometers => EARTH_RADIUS_KM,
            DistanceUnit::NauticalMiles => EARTH_RADIUS_NMI,
            DistanceUnit::StatuteMiles => EARTH_RADIUS_MI,
        }
    }

    /// Short name (`km`, `nmi`, `mi`).
    pub fn code(self) -> &'static str {
        match self {
            DistanceUnit::Kilometers => "km",
            DistanceUnit::NauticalMiles => "nmi",
            DistanceUnit::StatuteMiles => "mi",
        }
    }

    /// Convert `value` expressed in `self` into `target`.
    ///
    /// Conversion goes through the radius ratio so a distance computed in one
    /// unit and converted matches the distance computed directly in the other.
    pub fn convert(self, value: f64, target: DistanceUnit) -> f64 {
        value / self.earth_radius() * target.earth_radius()
    }
}

impl fmt::Display for DistanceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for DistanceUnit {
    type Err = TripError;

    /// Accepts `km`, `nmi`, `mi` and the single-letter codes `K`, `N`, `M`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "km" | "K" | "k" => Ok(DistanceUnit::Kilometers),
            "nmi" | "N" | "n" => Ok(DistanceUnit::NauticalMiles),
            "mi" | "M" | "m" => Ok(DistanceUnit::StatuteMiles),
            other => Err(TripError::UnknownUnit(other.to_string())),
        }
    }
}

// =============================================================================
// Distance Functions
// =============================================================================

/// Central angle between two points in radians.
///
/// Returns exactly `0.0` when the points are equal.
///
/// # Example
///
/// ```rust
/// use cab_trips::{GeoPoint, geo_utils};
///
/// let a = GeoPoint::new(0.0, 0.0);
/// let b = GeoPoint::new(0.0, 90.0);
/// let angle = geo_utils::haversine_angle(&a, &b);
/// assert!((angle - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
/// ```
pub fn haversine_angle(a: &GeoPoint, b: &GeoPoint) -> f64 {
    if a == b {
        return 0.0;
    }

    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Rounding can push h marginally outside [0, 1] for antipodal points
    let h = h.clamp(0.0, 1.0);

    2.0 * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Great-circle distance between two points in the requested unit.
///
/// # Example
///
/// ```rust
/// use cab_trips::{GeoPoint, DistanceUnit, geo_utils};
///
/// let london = GeoPoint::new(51.5074, -0.1278);
/// let paris = GeoPoint::new(48.8566, 2.3522);
///
/// let km = geo_utils::distance(&london, &paris, DistanceUnit::Kilometers);
/// assert!((km - 343.5).abs() < 5.0);
/// ```
#[inline]
pub fn distance(a: &GeoPoint, b: &GeoPoint, unit: DistanceUnit) -> f64 {
    haversine_angle(a, b) * unit.earth_radius()
}

/// Initial great-circle bearing from `a` to `b` in radians.
///
/// Measured clockwise from north, in `(-π, π]`. Coincident points give `0.0`.
pub fn bearing(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();
    y.atan2(x)
}

/// Signed distance of `point` from the great circle through `line_start` and `line_end`.
///
/// Negative values lie to the left of the direction of travel. The line is
/// treated as infinite; see [`distance_to_segment`] for the bounded version.
///
/// # Example
///
/// ```rust
/// use cab_trips::{GeoPoint, DistanceUnit, geo_utils};
///
/// // Path along the equator, point one degree north of it
/// let start = GeoPoint::new(0.0, 0.0);
/// let end = GeoPoint::new(0.0, 10.0);
/// let point = GeoPoint::new(1.0, 5.0);
///
/// let xtd = geo_utils::cross_track_distance(&start, &end, &point, DistanceUnit::Kilometers);
/// assert!((xtd.abs() - 111.195).abs() < 0.01);
/// ```
pub fn cross_track_distance(
    line_start: &GeoPoint,
    line_end: &GeoPoint,
    point: &GeoPoint,
    unit: DistanceUnit,
) -> f64 {
    cross_track_angle(line_start, line_end, point) * unit.earth_radius()
}

fn cross_track_angle(line_start: &GeoPoint, line_end: &GeoPoint, point: &GeoPoint) -> f64 {
    let delta_13 = haversine_angle(line_start, point);
    let theta_13 = bearing(line_start, point);
    let theta_12 = bearing(line_start, line_end);

    (delta_13.sin() * (theta_13 - theta_12).sin())
        .clamp(-1.0, 1.0)
        .asin()
}

/// Distance from `point` to the finite great-circle arc `line_start → line_end`.
///
/// When the perpendicular foot falls outside the arc, the distance to the
/// nearer endpoint is returned instead. Degenerate arcs reduce to point
/// distance.
pub fn distance_to_segment(
    line_start: &GeoPoint,
    line_end: &GeoPoint,
    point: &GeoPoint,
    unit: DistanceUnit,
) -> f64 {
    if line_start == line_end {
        return distance(line_start, point, unit);
    }

    let delta_13 = haversine_angle(line_start, point);
    let delta_12 = haversine_angle(line_start, line_end);
    let relative_bearing = bearing(line_start, point) - bearing(line_start, line_end);

    // Foot of the perpendicular lies behind the start
    if relative_bearing.cos() < 0.0 {
        return delta_13 * unit.earth_radius();
    }

    let delta_xt = cross_track_angle(line_start, line_end, point);
    let along_track = (delta_13.cos() / delta_xt.cos()).clamp(-1.0, 1.0).acos();

    if along_track > delta_12 {
        distance(line_end, point, unit)
    } else {
        delta_xt.abs() * unit.earth_radius()
    }
}

/// Whether the path `line_start → line_end` passes within `range` of `reference`.
///
/// With `bounded == false` the historical infinite-line test is used
/// (`|cross_track_distance| <= range`). Zero-length paths are always tested by
/// point distance, since their bearing is undefined.
pub fn passes_within(
    line_start: &GeoPoint,
    line_end: &GeoPoint,
    reference: &GeoPoint,
    range: f64,
    unit: DistanceUnit,
    bounded: bool,
) -> bool {
    if line_start == line_end {
        return distance(line_start, reference, unit) <= range;
    }

    let d = if bounded {
        distance_to_segment(line_start, line_end, reference, unit)
    } else {
        cross_track_distance(line_start, line_end, reference, unit).abs()
    };
    d <= range
}

/// Total distance along a chain of points.
///
/// Consecutive duplicates contribute nothing, so a trip whose segments chain
/// exactly measures the same as the sum of its segments. Empty or
/// single-point chains return 0.0.
pub fn path_length(points: &[GeoPoint], unit: DistanceUnit) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| distance(&w[0], &w[1], unit))
        .sum()
}

// =============================================================================
// Unit Tests
// =============================================================================
