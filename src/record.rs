//! # Record Formats
//!
//! Text formats crossing the pipeline boundary: raw meter records in, trip
//! lines out (and back in, for the fare stage).
//!
//! ## Raw record
//!
//! Nine comma- or whitespace-delimited fields:
//!
//! ```text
//! vehicle_id, start_ts, start_lat, start_lon, start_status, end_ts, end_lat, end_lon, end_status
//! ```
//!
//! Timestamps are epoch seconds or `YYYY-MM-DD HH:MM:SS` local datetimes.
//! Local datetimes need comma-delimited records since they contain a space.
//!
//! ## Trip line
//!
//! ```text
//! vehicle_id,seq<TAB>s_ts s_lat s_lon e_ts e_lat e_lon                  (summary)
//! vehicle_id,seq<TAB>s_ts,s_lat,s_lon,e_ts,e_lat,e_lon;s_ts,...         (full)
//! ```

use chrono::{DateTime, FixedOffset, NaiveDateTime};

use crate::error::{Result, TripError};
use crate::validation::Rejection;
use crate::{GeoPoint, Marker, MeterStatus, RawSegment, Timestamp, Trip};

const RECORD_FIELDS: usize = 9;
const LOCAL_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
const ISO_OFFSET_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// How raw records are read.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RecordFormat {
    /// Offset of local datetime fields from UTC, in seconds east. Default: 0
    pub utc_offset_seconds: i32,
    /// Drop records whose start and end positions are identical. Default: true
    pub drop_stationary: bool,
}

impl Default for RecordFormat {
    fn default() -> Self {
        Self {
            utc_offset_seconds: 0,
            drop_stationary: true,
        }
    }
}

impl RecordFormat {
    pub fn validate(&self) -> Result<()> {
        crate::error::ensure(self.utc_offset_seconds.abs() < 86_400, || {
            format!("utc_offset_seconds out of range: {}", self.utc_offset_seconds)
        })
    }
}

/// How timestamps are rendered in trip and fare lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TimestampFormat {
    /// Epoch seconds.
    #[default]
    Epoch,
    /// `YYYY-MM-DDTHH:MM:SS±HHMM` at a fixed offset east of UTC.
    Iso8601 { offset_seconds: i32 },
}

impl TimestampFormat {
    pub fn validate(&self) -> Result<()> {
        match self {
            TimestampFormat::Epoch => Ok(()),
            TimestampFormat::Iso8601 { offset_seconds } => {
                crate::error::ensure(FixedOffset::east_opt(*offset_seconds).is_some(), || {
                    format!("timestamp offset out of range: {offset_seconds}")
                })
            }
        }
    }

    /// Render a timestamp. Values chrono cannot represent fall back to epoch seconds.
    pub fn format(&self, ts: Timestamp) -> String {
        match self {
            TimestampFormat::Epoch => ts.to_string(),
            TimestampFormat::Iso8601 { offset_seconds } => {
                match (FixedOffset::east_opt(*offset_seconds), DateTime::from_timestamp(ts, 0)) {
                    (Some(offset), Some(utc)) => {
                        utc.with_timezone(&offset).format(ISO_OFFSET_FORMAT).to_string()
                    }
                    _ => ts.to_string(),
                }
            }
        }
    }
}

// ============================================================================
// Raw records
// ============================================================================

fn split_fields(line: &str) -> Vec<&str> {
    if line.contains(',') {
        line.split(',').map(str::trim).collect()
    } else {
        line.split_whitespace().collect()
    }
}

fn parse_coordinate(field: &str, name: &str) -> Result<f64> {
    field
        .parse::<f64>()
        .map_err(|_| TripError::MalformedRecord(format!("bad {name} '{field}'")))
}

fn parse_status(field: &str) -> Result<MeterStatus> {
    MeterStatus::from_code(field)
        .ok_or_else(|| TripError::MalformedRecord(format!("bad status '{field}'")))
}

/// Parse a timestamp field.
///
/// Accepts epoch seconds (integer or decimal), an ISO datetime with offset,
/// or a local `YYYY-MM-DD HH:MM:SS` datetime shifted by `utc_offset_seconds`.
///
/// # Example
/// ```
/// use cab_trips::parse_timestamp;
/// assert_eq!(parse_timestamp("1267402225", 0).unwrap(), 1267402225);
/// assert_eq!(parse_timestamp("'2010-03-01 00:10:25'", 0).unwrap(), 1267402225);
/// assert_eq!(parse_timestamp("2010-02-28 16:10:25", -8 * 3600).unwrap(), 1267402225);
/// ```
pub fn parse_timestamp(field: &str, utc_offset_seconds: i32) -> Result<Timestamp> {
    let field = field.trim().trim_matches(|c| c == '\'' || c == '"');
    let malformed = || TripError::MalformedRecord(format!("bad timestamp '{field}'"));

    let secs = if let Ok(secs) = field.parse::<i64>() {
        Some(secs)
    } else if let Ok(secs) = field.parse::<f64>() {
        secs.is_finite().then(|| secs.trunc() as i64)
    } else if let Ok(dt) = DateTime::parse_from_str(field, ISO_OFFSET_FORMAT) {
        Some(dt.timestamp())
    } else {
        LOCAL_DATETIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(field, fmt).ok())
            .and_then(|local| local.and_utc().timestamp().checked_sub(utc_offset_seconds as i64))
    };

    // Only instants chrono can represent; keeps timestamp differences far from overflow.
    secs.filter(|&s| DateTime::from_timestamp(s, 0).is_some())
        .ok_or_else(malformed)
}

/// Parse one raw record into a segment.
///
/// Structural failures (field count, numbers, status codes) are errors the
/// caller is expected to count and drop. Extra trailing fields are ignored.
pub fn parse_record(line: &str, format: &RecordFormat) -> Result<RawSegment> {
    let cleaned = line.replace('\'', "");
    let fields = split_fields(&cleaned);
    if fields.len() < RECORD_FIELDS {
        return Err(TripError::MalformedRecord(format!(
            "expected {RECORD_FIELDS} fields, found {}",
            fields.len()
        )));
    }

    let vehicle_id = fields[0];
    if vehicle_id.is_empty() {
        return Err(TripError::MalformedRecord("empty vehicle id".to_string()));
    }

    let offset = format.utc_offset_seconds;
    let start = Marker::new(
        parse_timestamp(fields[1], offset)?,
        GeoPoint::new(
            parse_coordinate(fields[2], "start latitude")?,
            parse_coordinate(fields[3], "start longitude")?,
        ),
        parse_status(fields[4])?,
    );
    let end = Marker::new(
        parse_timestamp(fields[5], offset)?,
        GeoPoint::new(
            parse_coordinate(fields[6], "end latitude")?,
            parse_coordinate(fields[7], "end longitude")?,
        ),
        parse_status(fields[8])?,
    );

    Ok(RawSegment::new(vehicle_id, start, end))
}

/// Cheap record-level filters applied right after parsing.
pub fn prefilter(segment: &RawSegment, format: &RecordFormat) -> std::result::Result<(), Rejection> {
    if segment.duration_secs() <= 0 {
        return Err(Rejection::NonPositiveDuration);
    }
    if format.drop_stationary && segment.start.point == segment.end.point {
        return Err(Rejection::Stationary);
    }
    Ok(())
}

// ============================================================================
// Trip lines
// ============================================================================

fn format_marker(marker: &Marker, ts_format: &TimestampFormat, sep: char) -> String {
    format!(
        "{}{sep}{}{sep}{}",
        ts_format.format(marker.timestamp),
        marker.point.latitude,
        marker.point.longitude
    )
}

/// Render the body of a trip line in summary or full form.
pub fn format_trip(trip: &Trip, summary: bool, ts_format: &TimestampFormat) -> String {
    if summary {
        let first = &trip.segments[0].start;
        let last = &trip.segments[trip.segments.len() - 1].end;
        format!(
            "{} {}",
            format_marker(first, ts_format, ' '),
            format_marker(last, ts_format, ' ')
        )
    } else {
        trip.segments
            .iter()
            .map(|seg| {
                format!(
                    "{},{}",
                    format_marker(&seg.start, ts_format, ','),
                    format_marker(&seg.end, ts_format, ',')
                )
            })
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Render a keyed trip line: `vehicle_id,seq<TAB>body`.
pub fn format_trip_line(trip: &Trip, summary: bool, ts_format: &TimestampFormat) -> String {
    format!("{}\t{}", trip.trip_id(), format_trip(trip, summary, ts_format))
}

fn parse_span(vehicle_id: &str, fields: &[&str]) -> Result<RawSegment> {
    if fields.len() != 6 {
        return Err(TripError::MalformedRecord(format!(
            "expected 6 span fields, found {}",
            fields.len()
        )));
    }
    // Trip lines carry no meter codes; every span inside a trip is hired time.
    let marker = |ts: &str, lat: &str, lon: &str| -> Result<Marker> {
        Ok(Marker::new(
            parse_timestamp(ts, 0)?,
            GeoPoint::new(parse_coordinate(lat, "latitude")?, parse_coordinate(lon, "longitude")?),
            MeterStatus::Hired,
        ))
    };
    Ok(RawSegment::new(
        vehicle_id,
        marker(fields[0], fields[1], fields[2])?,
        marker(fields[3], fields[4], fields[5])?,
    ))
}

/// Parse a keyed trip line back into a [`Trip`].
///
/// Full-form bodies yield one segment per span; summary-form bodies yield a
/// single segment from the first start to the last end.
///
/// # Example
/// ```
/// use cab_trips::parse_trip_line;
/// let trip = parse_trip_line("17,3\t100,37.7,-122.4,160,37.71,-122.41;170,37.71,-122.41,230,37.72,-122.42").unwrap();
/// assert_eq!(trip.vehicle_id, "17");
/// assert_eq!(trip.trip_sequence_number, 3);
/// assert_eq!(trip.segments.len(), 2);
/// assert_eq!(trip.end_timestamp, 230);
/// ```
pub fn parse_trip_line(line: &str) -> Result<Trip> {
    let (key, body) = line
        .trim_end()
        .split_once('\t')
        .ok_or_else(|| TripError::MalformedRecord("missing tab separator".to_string()))?;
    let (vehicle_id, seq) = key
        .rsplit_once(',')
        .ok_or_else(|| TripError::MalformedRecord(format!("bad trip key '{key}'")))?;
    let seq: u32 = seq
        .trim()
        .parse()
        .map_err(|_| TripError::MalformedRecord(format!("bad trip sequence '{seq}'")))?;
    let vehicle_id = vehicle_id.trim();

    let segments = if body.contains(',') {
        body.split(';')
            .filter(|span| !span.trim().is_empty())
            .map(|span| {
                let fields: Vec<&str> = span.split(',').map(str::trim).collect();
                parse_span(vehicle_id, &fields)
            })
            .collect::<Result<Vec<_>>>()?
    } else {
        let fields: Vec<&str> = body.split_whitespace().collect();
        vec![parse_span(vehicle_id, &fields)?]
    };

    Trip::new(vehicle_id, seq, segments)
        .ok_or_else(|| TripError::MalformedRecord("trip line has no segments".to_string()))
}
