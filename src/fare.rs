//! # Fares and Revenue
//!
//! Turns finished trips into metered fare estimates:
//!
//! ```text
//! cost = base_fare + distance × rate_per_unit_distance
//! ```
//!
//! ## Distance modes
//!
//! - **Accumulated**: sum of segment lengths plus the "gap" distance between
//!   one segment's end and the next segment's start when they do not chain.
//! - **Summary**: straight line from the first start to the last end.
//!
//! ## Reference gate
//!
//! With a [`ReferencePoint`] configured, a trip only gets a fare when at least
//! one segment or gap passes within `range` of the point (airport pickups and
//! drop-offs). Trips that miss are [`Exclusion::OutsideReferenceRange`],
//! which means "not applicable" rather than failure.
//!
//! By default the pass test uses the infinite great circle through each path,
//! which overstates proximity for short paths pointing at the reference. Set
//! `bounded_cross_track` to measure against the finite arc instead.

use log::{debug, info};
use thiserror::Error;

use crate::error::{ensure, Result};
use crate::geo_utils::{self, DistanceUnit};
use crate::record::TimestampFormat;
use crate::validation::{AcceptanceBounds, Rejection, SegmentValidator};
use crate::{GeoPoint, Timestamp, Trip};

/// Why a trip produced no fare.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Exclusion {
    #[error("no segment or gap passes within range of the reference point")]
    OutsideReferenceRange,

    #[error("invalid segment: {0}")]
    InvalidSegment(Rejection),

    #[error("segment starts before the previous one ended")]
    GapOutOfSequence,

    #[error("gap of {secs}s between segments")]
    GapTooLong { secs: i64 },

    #[error("trip has no segments")]
    EmptyTrip,
}

impl Exclusion {
    /// Stable short name, used as a counter key in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Exclusion::OutsideReferenceRange => "outside_reference_range",
            Exclusion::InvalidSegment(_) => "invalid_segment",
            Exclusion::GapOutOfSequence => "gap_out_of_sequence",
            Exclusion::GapTooLong { .. } => "gap_too_long",
            Exclusion::EmptyTrip => "empty_trip",
        }
    }
}

/// How trip distance is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DistanceMode {
    #[default]
    Accumulated,
    Summary,
}

/// Named location a trip must pass near to be fared.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReferencePoint {
    pub name: String,
    pub point: GeoPoint,
    /// Pass radius, in the fare unit.
    pub range: f64,
}

impl ReferencePoint {
    pub fn new(name: impl Into<String>, point: GeoPoint, range: f64) -> Self {
        Self { name: name.into(), point, range }
    }

    /// San Francisco International Airport, 1 unit radius.
    pub fn sfo() -> Self {
        Self::new("SFO", GeoPoint::new(37.62131, -122.37896), 1.0)
    }

    pub fn validate(&self) -> Result<()> {
        ensure(self.point.is_valid(), || {
            format!(
                "reference point {} has invalid coordinates ({}, {})",
                self.name, self.point.latitude, self.point.longitude
            )
        })?;
        ensure(self.range.is_finite() && self.range > 0.0, || {
            format!("reference range must be positive, got {}", self.range)
        })
    }
}

/// Fare model.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FareConfig {
    /// Flag-drop charge. Default: 3.50
    pub base_fare: f64,
    /// Charge per unit of distance. Default: 1.71
    pub rate_per_unit_distance: f64,
    /// Default: Kilometers
    pub unit: DistanceUnit,
    /// Default: Accumulated
    pub distance_mode: DistanceMode,
    /// Optional proximity gate. Default: None
    pub reference: Option<ReferencePoint>,
    /// Longest tolerated gap between consecutive segments (seconds). Default: 600
    pub max_gap_secs: i64,
    /// Segment speed ceiling (km/h). Default: 200
    pub max_speed_kmh: f64,
    /// Test proximity against finite arcs instead of infinite great circles. Default: false
    pub bounded_cross_track: bool,
}

impl Default for FareConfig {
    fn default() -> Self {
        Self {
            base_fare: 3.50,
            rate_per_unit_distance: 1.71,
            unit: DistanceUnit::Kilometers,
            distance_mode: DistanceMode::Accumulated,
            reference: None,
            max_gap_secs: 600,
            max_speed_kmh: 200.0,
            bounded_cross_track: false,
        }
    }
}

impl FareConfig {
    pub fn validate(&self) -> Result<()> {
        ensure(self.base_fare.is_finite() && self.base_fare >= 0.0, || {
            format!("base_fare must be >= 0, got {}", self.base_fare)
        })?;
        ensure(
            self.rate_per_unit_distance.is_finite() && self.rate_per_unit_distance >= 0.0,
            || format!("rate_per_unit_distance must be >= 0, got {}", self.rate_per_unit_distance),
        )?;
        ensure(self.max_gap_secs >= 0, || {
            format!("max_gap_secs must be >= 0, got {}", self.max_gap_secs)
        })?;
        ensure(self.max_speed_kmh.is_finite() && self.max_speed_kmh > 0.0, || {
            format!("max_speed_kmh must be positive, got {}", self.max_speed_kmh)
        })?;
        if let Some(reference) = &self.reference {
            reference.validate()?;
        }
        Ok(())
    }
}

/// Fare estimate for one trip.
#[derive(Debug, Clone, PartialEq)]
pub struct Fare {
    pub vehicle_id: String,
    pub trip_sequence_number: u32,
    pub start_timestamp: Timestamp,
    pub end_timestamp: Timestamp,
    pub distance: f64,
    pub cost: f64,
}

impl Fare {
    pub fn trip_id(&self) -> String {
        format!("{},{}", self.vehicle_id, self.trip_sequence_number)
    }

    /// `start end<TAB>distance cost trip_id`
    pub fn to_line(&self, ts_format: &TimestampFormat) -> String {
        format!(
            "{} {}\t{:.3} {:.2} {}",
            ts_format.format(self.start_timestamp),
            ts_format.format(self.end_timestamp),
            self.distance,
            self.cost,
            self.trip_id()
        )
    }
}

/// Order fares by `(start_timestamp, end_timestamp)`.
pub fn sort_by_time(fares: &mut [Fare]) {
    fares.sort_by(|a, b| {
        a.start_timestamp
            .cmp(&b.start_timestamp)
            .then_with(|| a.end_timestamp.cmp(&b.end_timestamp))
    });
}

/// Totals over a set of fares. Merges by addition.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RevenueSummary {
    pub trips: u64,
    pub distance: f64,
    pub revenue: f64,
}

impl RevenueSummary {
    pub fn from_fares<'a, I>(fares: I) -> Self
    where
        I: IntoIterator<Item = &'a Fare>,
    {
        let mut summary = Self::default();
        for fare in fares {
            summary.add(fare);
        }
        summary
    }

    pub fn add(&mut self, fare: &Fare) {
        self.trips += 1;
        self.distance += fare.distance;
        self.revenue += fare.cost;
    }

    pub fn merge(&mut self, other: &RevenueSummary) {
        self.trips += other.trips;
        self.distance += other.distance;
        self.revenue += other.revenue;
    }
}

// ============================================================================
// Calculator
// ============================================================================

/// Pure trip → fare function.
#[derive(Debug, Clone)]
pub struct FareCalculator {
    config: FareConfig,
    validator: SegmentValidator,
}

impl FareCalculator {
    pub fn new(config: FareConfig) -> Result<Self> {
        config.validate()?;
        if let Some(reference) = &config.reference {
            debug!(
                "[Fare] Gating on {} ({}, {}) within {} {}",
                reference.name,
                reference.point.latitude,
                reference.point.longitude,
                reference.range,
                config.unit
            );
        }
        let validator = SegmentValidator::new(config.max_speed_kmh, AcceptanceBounds::default());
        Ok(Self { config, validator })
    }

    pub fn config(&self) -> &FareConfig {
        &self.config
    }

    pub fn cost_for_distance(&self, distance: f64) -> f64 {
        self.config.base_fare + distance * self.config.rate_per_unit_distance
    }

    fn passes_reference(&self, from: &GeoPoint, to: &GeoPoint) -> bool {
        match &self.config.reference {
            Some(reference) => geo_utils::passes_within(
                from,
                to,
                &reference.point,
                reference.range,
                self.config.unit,
                self.config.bounded_cross_track,
            ),
            None => true,
        }
    }

    /// Distance of the trip in the fare unit and whether it passed the
    /// reference gate.
    fn measure(&self, trip: &Trip) -> std::result::Result<(f64, bool), Exclusion> {
        if trip.segments.is_empty() {
            return Err(Exclusion::EmptyTrip);
        }
        for segment in &trip.segments {
            self.validator.check(segment).map_err(Exclusion::InvalidSegment)?;
        }

        let unit = self.config.unit;
        match self.config.distance_mode {
            DistanceMode::Summary => {
                let (from, to) = (trip.start_point(), trip.end_point());
                Ok((geo_utils::distance(&from, &to, unit), self.passes_reference(&from, &to)))
            }
            DistanceMode::Accumulated => {
                // Waypoints chain segment ends to the next start; unchained
                // endpoints add a gap leg.
                let mut waypoints: Vec<GeoPoint> = Vec::with_capacity(trip.segments.len() * 2);
                let mut near = false;
                let mut previous: Option<&crate::RawSegment> = None;

                for segment in &trip.segments {
                    if let Some(prev) = previous {
                        let gap = segment.start.timestamp.saturating_sub(prev.end.timestamp);
                        if gap < 0 {
                            return Err(Exclusion::GapOutOfSequence);
                        }
                        if gap > self.config.max_gap_secs {
                            return Err(Exclusion::GapTooLong { secs: gap });
                        }
                        if prev.end.point != segment.start.point {
                            near = near || self.passes_reference(&prev.end.point, &segment.start.point);
                            waypoints.push(segment.start.point);
                        }
                    } else {
                        waypoints.push(segment.start.point);
                    }
                    waypoints.push(segment.end.point);
                    near = near || self.passes_reference(&segment.start.point, &segment.end.point);
                    previous = Some(segment);
                }
                Ok((geo_utils::path_length(&waypoints, unit), near))
            }
        }
    }

    /// Fare for a trip, or the reason it has none.
    ///
    /// # Example
    /// ```
    /// use cab_trips::{FareCalculator, FareConfig, GeoPoint, Marker, MeterStatus, RawSegment, Trip};
    ///
    /// let calc = FareCalculator::new(FareConfig::default()).unwrap();
    /// let seg = RawSegment::new(
    ///     "5",
    ///     Marker::new(0, GeoPoint::new(0.0, 0.0), MeterStatus::Vacant),
    ///     Marker::new(900, GeoPoint::new(0.0, 0.0899321), MeterStatus::Vacant),
    /// );
    /// let trip = Trip::new("5", 1, vec![seg]).unwrap();
    /// let fare = calc.quote(&trip).unwrap();
    /// assert!((fare.distance - 10.0).abs() < 1e-3);
    /// assert!((fare.cost - 20.60).abs() < 1e-2);
    /// ```
    pub fn quote(&self, trip: &Trip) -> std::result::Result<Fare, Exclusion> {
        let (distance, near) = self.measure(trip)?;
        if !near {
            return Err(Exclusion::OutsideReferenceRange);
        }
        let cost = self.cost_for_distance(distance);
        if !distance.is_finite() || !cost.is_finite() {
            return Err(Exclusion::InvalidSegment(Rejection::NonFinite));
        }
        Ok(Fare {
            vehicle_id: trip.vehicle_id.clone(),
            trip_sequence_number: trip.trip_sequence_number,
            start_timestamp: trip.start_timestamp,
            end_timestamp: trip.end_timestamp,
            distance,
            cost,
        })
    }

    /// Quote a batch of trips, sorted by time. Exclusions are counted and
    /// logged, never returned.
    pub fn quote_all<'a, I>(&self, trips: I) -> (Vec<Fare>, RevenueSummary)
    where
        I: IntoIterator<Item = &'a Trip>,
    {
        let mut fares = Vec::new();
        let mut excluded = 0u64;
        for trip in trips {
            match self.quote(trip) {
                Ok(fare) => fares.push(fare),
                Err(exclusion) => {
                    debug!("[Fare] {}: {}", trip.trip_id(), exclusion);
                    excluded += 1;
                }
            }
        }
        sort_by_time(&mut fares);
        let summary = RevenueSummary::from_fares(&fares);
        info!(
            "[Fare] {} fares ({} excluded), revenue {:.2}",
            summary.trips, excluded, summary.revenue
        );
        (fares, summary)
    }
}
