//! # Cab Trips
//!
//! Reconstructs taxi trips from raw GPS meter records and derives
//! distance histograms and fare estimates from them.
//!
//! This library provides:
//! - Spherical-earth geodistance math (haversine, bearing, cross-track)
//! - Parsing and validation of noisy meter records
//! - A per-vehicle trip segmentation state machine
//! - Distance banding and fare/revenue calculation over finished trips
//! - An in-process pipeline that honours the partition/sort/group contract
//!
//! ## Features
//!
//! - **`parallel`** - Fold vehicle partitions in parallel with rayon
//! - **`serde`** - Serialize/Deserialize configuration types
//! - **`json`** - Load [`PipelineConfig`] from JSON
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use cab_trips::{parse_record, AcceptanceBounds, RecordFormat, SegmentationConfig, TripSegmenter};
//!
//! let lines = [
//!     "9,1267402225,37.79076,-122.40255,E,1267402285,37.79100,-122.40200,M",
//!     "9,1267402285,37.79100,-122.40200,M,1267402345,37.78900,-122.40100,M",
//!     "9,1267402345,37.78900,-122.40100,M,1267402400,37.78538,-122.40024,E",
//! ];
//!
//! let format = RecordFormat::default();
//! let segments: Vec<_> = lines
//!     .iter()
//!     .filter_map(|line| parse_record(line, &format).ok())
//!     .collect();
//!
//! let segmenter = TripSegmenter::new(SegmentationConfig::default(), AcceptanceBounds::default());
//! let trips = segmenter.segment_vehicle(segments);
//!
//! assert_eq!(trips.len(), 1);
//! assert_eq!(trips[0].segments.len(), 3);
//! assert_eq!(trips[0].start_timestamp, 1267402225);
//! assert_eq!(trips[0].end_timestamp, 1267402400);
//! ```

use std::fmt;

// Unified error handling
pub mod error;
pub use error::{Result, TripError};

// Geographic utilities (distance, bearing, cross-track)
pub mod geo_utils;
pub use geo_utils::DistanceUnit;

// Raw record and trip line formats
pub mod record;
pub use record::{
    format_trip_line, parse_record, parse_timestamp, parse_trip_line, RecordFormat,
    TimestampFormat,
};

// Segment-level rejection rules
pub mod validation;
pub use validation::{AcceptanceBounds, Rejection, SegmentValidator};

// Latitude/longitude outlier calibration
pub mod calibration;
pub use calibration::{CalibrationSampler, CalibrationStats};

// Partition/sort/group contract
pub mod partition;
pub use partition::{group_by_vehicle, partition_for, VehicleKey, VehicleSequence};

// Trip segmentation state machine
pub mod segmentation;
pub use segmentation::{
    EndOfInput, RestartPolicy, SegmentationConfig, SegmentationReport, TripSegmenter,
    TripSink, VehicleTripState,
};

// Trip distance histogram
pub mod banding;
pub use banding::{BandConfig, BandHistogram, DistanceBander, MAX_BANDS};

// Fare and revenue estimation
pub mod fare;
pub use fare::{
    DistanceMode, Exclusion, Fare, FareCalculator, FareConfig, ReferencePoint,
    RevenueSummary,
};

// In-process reference runtime
pub mod pipeline;
pub use pipeline::{Pipeline, PipelineConfig, PipelineOutput, PipelineReport};

// ============================================================================
// Core Types
// ============================================================================

/// Seconds since the Unix epoch.
pub type Timestamp = i64;

/// A GPS coordinate with latitude and longitude in degrees.
///
/// # Example
/// ```
/// use cab_trips::GeoPoint;
/// let sfo = GeoPoint::new(37.62131, -122.37896);
/// assert!(sfo.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a new point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Check if the point has finite, in-range coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude.abs() <= 90.0
            && self.longitude.abs() <= 180.0
    }
}

impl From<GeoPoint> for geo::Coord<f64> {
    fn from(p: GeoPoint) -> Self {
        geo::Coord { x: p.longitude, y: p.latitude }
    }
}

/// Meter state of a vehicle at a sample instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeterStatus {
    /// Meter off (`E`).
    Vacant,
    /// Meter on (`M`).
    Hired,
}

impl MeterStatus {
    /// Parse the single-letter record code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "E" => Some(MeterStatus::Vacant),
            "M" => Some(MeterStatus::Hired),
            _ => None,
        }
    }

    /// Single-letter record code.
    pub fn code(self) -> &'static str {
        match self {
            MeterStatus::Vacant => "E",
            MeterStatus::Hired => "M",
        }
    }
}

impl fmt::Display for MeterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Position and meter state at one sample instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Marker {
    pub timestamp: Timestamp,
    pub point: GeoPoint,
    pub status: MeterStatus,
}

impl Marker {
    pub fn new(timestamp: Timestamp, point: GeoPoint, status: MeterStatus) -> Self {
        Self { timestamp, point, status }
    }
}

/// One parsed input record: a vehicle's movement between two successive samples.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSegment {
    pub vehicle_id: String,
    pub start: Marker,
    pub end: Marker,
}

impl RawSegment {
    pub fn new(vehicle_id: impl Into<String>, start: Marker, end: Marker) -> Self {
        Self { vehicle_id: vehicle_id.into(), start, end }
    }

    /// Elapsed seconds between the two samples (may be non-positive in raw input).
    #[inline]
    pub fn duration_secs(&self) -> i64 {
        self.end.timestamp.saturating_sub(self.start.timestamp)
    }

    /// Great-circle length of the segment.
    pub fn distance(&self, unit: DistanceUnit) -> f64 {
        geo_utils::distance(&self.start.point, &self.end.point, unit)
    }

    /// Average speed in km/h, or `None` when the duration is not positive
    /// or the result is not finite.
    pub fn average_speed_kmh(&self) -> Option<f64> {
        let duration = self.duration_secs();
        if duration <= 0 {
            return None;
        }
        let speed = 3600.0 * self.distance(DistanceUnit::Kilometers) / duration as f64;
        speed.is_finite().then_some(speed)
    }
}

/// A finished trip: a non-empty, time-ordered run of segments for one vehicle.
#[derive(Debug, Clone, PartialEq)]
pub struct Trip {
    pub vehicle_id: String,
    /// Monotonic per vehicle within one run, starting at 1.
    pub trip_sequence_number: u32,
    pub segments: Vec<RawSegment>,
    pub start_timestamp: Timestamp,
    pub end_timestamp: Timestamp,
}

impl Trip {
    /// Package segments into a trip.
    ///
    /// Returns `None` for an empty segment list.
    pub fn new(
        vehicle_id: impl Into<String>,
        trip_sequence_number: u32,
        segments: Vec<RawSegment>,
    ) -> Option<Self> {
        let start_timestamp = segments.first()?.start.timestamp;
        let end_timestamp = segments.last()?.end.timestamp;
        Some(Self {
            vehicle_id: vehicle_id.into(),
            trip_sequence_number,
            segments,
            start_timestamp,
            end_timestamp,
        })
    }

    /// `vehicle_id,sequence` identifier used in output lines.
    pub fn trip_id(&self) -> String {
        format!("{},{}", self.vehicle_id, self.trip_sequence_number)
    }

    /// Position where the first segment starts.
    pub fn start_point(&self) -> GeoPoint {
        self.segments[0].start.point
    }

    /// Position where the last segment ends.
    pub fn end_point(&self) -> GeoPoint {
        self.segments[self.segments.len() - 1].end.point
    }

    pub fn duration_secs(&self) -> i64 {
        self.end_timestamp.saturating_sub(self.start_timestamp)
    }

    /// Straight-line distance from the first start point to the last end point.
    pub fn summary_distance(&self, unit: DistanceUnit) -> f64 {
        geo_utils::distance(&self.start_point(), &self.end_point(), unit)
    }
}

// ============================================================================
// Tests
// ============================================================================
