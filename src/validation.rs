//! # Segment Validation
//!
//! State-independent rejection rules applied to every segment before it
//! reaches the trip state machine or the fare calculator.
//!
//! | Check | Rejection |
//! |-------|-----------|
//! | NaN/infinite coordinate | [`Rejection::NonFinite`] |
//! | `|lat| > 90` or `|lon| > 180` | [`Rejection::InvalidCoordinates`] |
//! | `end <= start` | [`Rejection::NonPositiveDuration`] |
//! | outside calibrated box | [`Rejection::OutsideCalibrationBounds`] |
//! | average speed over ceiling | [`Rejection::ExcessiveSpeed`] |
//!
//! A rejection drops one segment. It never invalidates the open trip.

use geo::{coord, Intersects, Rect};
use thiserror::Error;

use crate::error::{ensure, Result};
use crate::{GeoPoint, RawSegment};

/// Why a single segment was dropped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejection {
    #[error("coordinates out of range")]
    InvalidCoordinates,

    #[error("end timestamp not after start timestamp")]
    NonPositiveDuration,

    #[error("implied speed {kmh:.1} km/h over ceiling")]
    ExcessiveSpeed { kmh: f64 },

    #[error("endpoint outside calibration bounds")]
    OutsideCalibrationBounds,

    /// Starts before the last accepted segment ended (consolidated span).
    #[error("segment starts before the previous accepted segment ended")]
    OutOfOrder,

    /// Vacant→Hired toggle taking longer than the meter-start window.
    #[error("meter start took {secs}s")]
    MeterStartGlitch { secs: i64 },

    #[error("start and end positions identical")]
    Stationary,

    #[error("non-finite coordinate or speed")]
    NonFinite,
}

impl Rejection {
    /// Stable short name, used as a counter key in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::InvalidCoordinates => "invalid_coordinates",
            Rejection::NonPositiveDuration => "non_positive_duration",
            Rejection::ExcessiveSpeed { .. } => "excessive_speed",
            Rejection::OutsideCalibrationBounds => "outside_bounds",
            Rejection::OutOfOrder => "out_of_order",
            Rejection::MeterStartGlitch { .. } => "meter_start_glitch",
            Rejection::Stationary => "stationary",
            Rejection::NonFinite => "non_finite",
        }
    }
}

// ============================================================================
// Acceptance bounds
// ============================================================================

/// Inclusive latitude/longitude box outside which segments are outliers.
///
/// The default box is the full valid coordinate range, so nothing is
/// rejected until calibration narrows it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcceptanceBounds {
    rect: Rect<f64>,
}

impl Default for AcceptanceBounds {
    fn default() -> Self {
        Self {
            rect: Rect::new(coord! { x: -180.0, y: -90.0 }, coord! { x: 180.0, y: 90.0 }),
        }
    }
}

impl AcceptanceBounds {
    /// Build a box from explicit limits.
    pub fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Result<Self> {
        ensure(
            [min_lat, max_lat, min_lon, max_lon].iter().all(|v| v.is_finite()),
            || "acceptance bounds must be finite".to_string(),
        )?;
        ensure(min_lat <= max_lat && min_lon <= max_lon, || {
            format!("empty acceptance bounds: lat [{min_lat}, {max_lat}], lon [{min_lon}, {max_lon}]")
        })?;
        Ok(Self {
            rect: Rect::new(coord! { x: min_lon, y: min_lat }, coord! { x: max_lon, y: max_lat }),
        })
    }

    /// `mean ± deviations·σ` on each axis.
    pub fn around(
        latitude_mean: f64,
        latitude_sd: f64,
        longitude_mean: f64,
        longitude_sd: f64,
        deviations: f64,
    ) -> Result<Self> {
        let lat_span = deviations * latitude_sd;
        let lon_span = deviations * longitude_sd;
        Self::new(
            latitude_mean - lat_span,
            latitude_mean + lat_span,
            longitude_mean - lon_span,
            longitude_mean + lon_span,
        )
    }

    pub fn min_latitude(&self) -> f64 {
        self.rect.min().y
    }

    pub fn max_latitude(&self) -> f64 {
        self.rect.max().y
    }

    pub fn min_longitude(&self) -> f64 {
        self.rect.min().x
    }

    pub fn max_longitude(&self) -> f64 {
        self.rect.max().x
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        self.rect.intersects(&geo::Coord::from(*point))
    }
}

// ============================================================================
// Validator
// ============================================================================

/// Applies the per-segment checks with one speed ceiling and one box.
#[derive(Debug, Clone)]
pub struct SegmentValidator {
    max_speed_kmh: f64,
    bounds: AcceptanceBounds,
}

impl SegmentValidator {
    pub fn new(max_speed_kmh: f64, bounds: AcceptanceBounds) -> Self {
        Self { max_speed_kmh, bounds }
    }

    pub fn max_speed_kmh(&self) -> f64 {
        self.max_speed_kmh
    }

    pub fn bounds(&self) -> &AcceptanceBounds {
        &self.bounds
    }

    /// Run every check in table order, returning the first failure.
    ///
    /// # Example
    /// ```
    /// use cab_trips::{AcceptanceBounds, GeoPoint, Marker, MeterStatus, RawSegment, Rejection, SegmentValidator};
    ///
    /// let validator = SegmentValidator::new(200.0, AcceptanceBounds::default());
    /// // ~50 km in one minute
    /// let seg = RawSegment::new(
    ///     "1",
    ///     Marker::new(0, GeoPoint::new(0.0, 0.0), MeterStatus::Hired),
    ///     Marker::new(60, GeoPoint::new(0.0, 0.45), MeterStatus::Hired),
    /// );
    /// assert!(matches!(validator.check(&seg), Err(Rejection::ExcessiveSpeed { .. })));
    /// ```
    pub fn check(&self, segment: &RawSegment) -> std::result::Result<(), Rejection> {
        let (start, end) = (&segment.start.point, &segment.end.point);

        let coords = [start.latitude, start.longitude, end.latitude, end.longitude];
        if !coords.iter().all(|v| v.is_finite()) {
            return Err(Rejection::NonFinite);
        }
        if !start.is_valid() || !end.is_valid() {
            return Err(Rejection::InvalidCoordinates);
        }
        if segment.duration_secs() <= 0 {
            return Err(Rejection::NonPositiveDuration);
        }
        if !self.bounds.contains(start) || !self.bounds.contains(end) {
            return Err(Rejection::OutsideCalibrationBounds);
        }

        let kmh = segment.average_speed_kmh().ok_or(Rejection::NonFinite)?;
        if kmh > self.max_speed_kmh {
            return Err(Rejection::ExcessiveSpeed { kmh });
        }
        Ok(())
    }
}
