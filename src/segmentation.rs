//! # Trip Segmentation
//!
//! Per-vehicle state machine that folds one time-ordered segment sequence
//! into finished trips.
//!
//! ## States
//!
//! `Idle` (no open trip) and `InTrip` (accumulating segments). Transitions are
//! driven by each segment's `(start_status, end_status)` pair:
//!
//! | start→end | Idle | InTrip |
//! |-----------|------|--------|
//! | E→M | reject if longer than the meter-start window, else open | gap ≥ new-trip gap: emit, reopen. Displaced start: restart per [`RestartPolicy`]. Always add |
//! | M→M | open implicitly, add | gap > missed-toggle gap or segment too long: emit, reopen, add. Else add |
//! | M→E | open implicitly, add, emit, close | add, emit, close |
//! | E→E | ignore | emit, close |
//!
//! Before the table runs, each segment passes the [`SegmentValidator`] checks
//! and must not start before the last accepted segment ended.
//!
//! A meter start inside an open trip is *displaced* when the vehicle would
//! have needed more than `max_speed_kmh` to get from the trip's last position
//! to the new start. The open trip is then treated as malformed.
//!
//! ## State ownership
//!
//! [`VehicleTripState`] is a plain value owned by whichever worker holds the
//! vehicle's sequence. The segmenter itself is immutable and shareable across
//! workers.

use std::collections::BTreeMap;

use log::{debug, warn};

use crate::error::{ensure, Result};
use crate::geo_utils::{self, DistanceUnit};
use crate::validation::{AcceptanceBounds, Rejection, SegmentValidator};
use crate::{MeterStatus, RawSegment, Timestamp, Trip};

/// What to do with an open trip when a displaced meter start shows it to be
/// malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RestartPolicy {
    /// Drop the open trip and start over.
    #[default]
    Discard,
    /// Emit the open trip, then start over.
    Emit,
}

/// What to do with a trip still open when a vehicle's sequence ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EndOfInput {
    /// Emit the open trip.
    #[default]
    Flush,
    /// Drop the open trip.
    Discard,
}

/// Segmentation thresholds.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SegmentationConfig {
    /// Longest plausible E→M toggle while idle (seconds). Default: 180
    pub meter_start_max_secs: i64,
    /// Gap before an E→M that starts a separate trip (seconds). Default: 600
    pub new_trip_gap_secs: i64,
    /// Gap between M→M segments treated as a missed toggle (seconds). Default: 300
    pub missed_toggle_gap_secs: i64,
    /// Longest single M→M segment kept in the open trip (seconds). Default: 3600
    pub max_segment_secs: i64,
    /// Average speed ceiling per segment (km/h). Default: 200
    pub max_speed_kmh: f64,
    /// Drop emitted trips longer than this (seconds). Default: None
    pub max_trip_secs: Option<i64>,
    /// Default: Discard
    pub restart_policy: RestartPolicy,
    /// Default: Flush
    pub end_of_input: EndOfInput,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            meter_start_max_secs: 180,
            new_trip_gap_secs: 600,
            missed_toggle_gap_secs: 300,
            max_segment_secs: 3600,
            max_speed_kmh: 200.0,
            max_trip_secs: None,
            restart_policy: RestartPolicy::Discard,
            end_of_input: EndOfInput::Flush,
        }
    }
}

impl SegmentationConfig {
    pub fn validate(&self) -> Result<()> {
        ensure(self.meter_start_max_secs >= 0, || {
            format!("meter_start_max_secs must be >= 0, got {}", self.meter_start_max_secs)
        })?;
        ensure(self.new_trip_gap_secs > 0, || {
            format!("new_trip_gap_secs must be > 0, got {}", self.new_trip_gap_secs)
        })?;
        ensure(self.missed_toggle_gap_secs > 0, || {
            format!("missed_toggle_gap_secs must be > 0, got {}", self.missed_toggle_gap_secs)
        })?;
        ensure(self.max_segment_secs > 0, || {
            format!("max_segment_secs must be > 0, got {}", self.max_segment_secs)
        })?;
        ensure(self.max_speed_kmh.is_finite() && self.max_speed_kmh > 0.0, || {
            format!("max_speed_kmh must be positive, got {}", self.max_speed_kmh)
        })?;
        if let Some(max) = self.max_trip_secs {
            ensure(max > 0, || format!("max_trip_secs must be > 0, got {max}"))?;
        }
        Ok(())
    }
}

/// Receiver of finished trips.
pub trait TripSink {
    fn emit(&mut self, trip: Trip);
}

impl TripSink for Vec<Trip> {
    fn emit(&mut self, trip: Trip) {
        self.push(trip);
    }
}

/// Per-vehicle transient state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VehicleTripState {
    pub in_trip: bool,
    /// Trips emitted so far; the next trip gets `trip_counter + 1`.
    pub trip_counter: u32,
    pub accumulated_segments: Vec<RawSegment>,
    /// End of the last accepted segment.
    pub last_seen_end: Option<Timestamp>,
}

impl VehicleTripState {
    pub fn new() -> Self {
        Self::default()
    }

    fn open(&mut self) {
        self.accumulated_segments.clear();
        self.in_trip = true;
    }

    fn last_end(&self) -> Option<Timestamp> {
        self.accumulated_segments
            .last()
            .map(|s| s.end.timestamp)
            .or(self.last_seen_end)
    }
}

/// Counters describing one segmentation run. Mergeable across vehicles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentationReport {
    pub segments_seen: u64,
    pub segments_accepted: u64,
    pub segments_rejected: u64,
    /// Rejections by [`Rejection::kind`].
    pub rejections: BTreeMap<&'static str, u64>,
    /// Vacant→Vacant segments while idle.
    pub vacant_ignored: u64,
    /// Hired→Hired or Hired→Vacant segments that opened a trip while idle.
    pub implicit_opens: u64,
    pub trips_emitted: u64,
    /// Open trips dropped at a displaced meter start.
    pub trips_abandoned: u64,
    /// Trips dropped for exceeding `max_trip_secs`.
    pub trips_too_long: u64,
    pub open_trips_flushed: u64,
    pub open_trips_dropped: u64,
}

impl SegmentationReport {
    fn reject(&mut self, rejection: &Rejection) {
        self.segments_rejected += 1;
        *self.rejections.entry(rejection.kind()).or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: &SegmentationReport) {
        self.segments_seen += other.segments_seen;
        self.segments_accepted += other.segments_accepted;
        self.segments_rejected += other.segments_rejected;
        for (kind, count) in &other.rejections {
            *self.rejections.entry(*kind).or_insert(0) += count;
        }
        self.vacant_ignored += other.vacant_ignored;
        self.implicit_opens += other.implicit_opens;
        self.trips_emitted += other.trips_emitted;
        self.trips_abandoned += other.trips_abandoned;
        self.trips_too_long += other.trips_too_long;
        self.open_trips_flushed += other.open_trips_flushed;
        self.open_trips_dropped += other.open_trips_dropped;
    }
}

// ============================================================================
// Segmenter
// ============================================================================

/// Immutable trip segmenter. One instance serves every vehicle.
#[derive(Debug, Clone)]
pub struct TripSegmenter {
    config: SegmentationConfig,
    validator: SegmentValidator,
}

impl TripSegmenter {
    /// Create a segmenter. Call [`SegmentationConfig::validate`] first when
    /// the config comes from outside.
    pub fn new(config: SegmentationConfig, bounds: AcceptanceBounds) -> Self {
        let validator = SegmentValidator::new(config.max_speed_kmh, bounds);
        Self { config, validator }
    }

    pub fn config(&self) -> &SegmentationConfig {
        &self.config
    }

    fn is_displaced(&self, state: &VehicleTripState, segment: &RawSegment) -> bool {
        let Some(last) = state.accumulated_segments.last() else {
            return false;
        };
        let km = geo_utils::distance(&last.end.point, &segment.start.point, DistanceUnit::Kilometers);
        if km == 0.0 {
            return false;
        }
        let secs = segment.start.timestamp.saturating_sub(last.end.timestamp);
        secs <= 0 || km * 3600.0 / secs as f64 > self.config.max_speed_kmh
    }

    fn screen(&self, state: &VehicleTripState, segment: &RawSegment) -> std::result::Result<(), Rejection> {
        self.validator.check(segment)?;
        match state.last_seen_end {
            Some(end) if segment.start.timestamp < end => Err(Rejection::OutOfOrder),
            _ => Ok(()),
        }
    }

    /// Feed one segment of the vehicle's ordered sequence.
    pub fn process<S: TripSink + ?Sized>(
        &self,
        state: &mut VehicleTripState,
        segment: RawSegment,
        sink: &mut S,
        report: &mut SegmentationReport,
    ) {
        report.segments_seen += 1;

        if let Err(rejection) = self.screen(state, &segment) {
            debug!(
                "[Segmenter] {} @{}: rejected ({})",
                segment.vehicle_id, segment.start.timestamp, rejection
            );
            report.reject(&rejection);
            return;
        }

        let gap = state.last_end().map(|end| segment.start.timestamp.saturating_sub(end));
        let duration = segment.duration_secs();
        let end_ts = segment.end.timestamp;

        use MeterStatus::{Hired, Vacant};
        match (segment.start.status, segment.end.status, state.in_trip) {
            (Vacant, Hired, false) => {
                if duration > self.config.meter_start_max_secs {
                    let rejection = Rejection::MeterStartGlitch { secs: duration };
                    debug!("[Segmenter] {}: {}", segment.vehicle_id, rejection);
                    report.reject(&rejection);
                    return;
                }
                state.open();
                state.accumulated_segments.push(segment);
            }
            (Vacant, Hired, true) => {
                if gap.is_some_and(|g| g >= self.config.new_trip_gap_secs) {
                    self.emit(state, sink, report);
                    state.open();
                } else if self.is_displaced(state, &segment) {
                    match self.config.restart_policy {
                        RestartPolicy::Discard => self.abandon(state, report),
                        RestartPolicy::Emit => self.emit(state, sink, report),
                    }
                    state.open();
                }
                state.accumulated_segments.push(segment);
            }
            (Hired, Hired, false) => {
                report.implicit_opens += 1;
                state.open();
                state.accumulated_segments.push(segment);
            }
            (Hired, Hired, true) => {
                let missed_toggle = gap.is_some_and(|g| g > self.config.missed_toggle_gap_secs);
                if missed_toggle || duration > self.config.max_segment_secs {
                    self.emit(state, sink, report);
                    state.open();
                }
                state.accumulated_segments.push(segment);
            }
            (Hired, Vacant, in_trip) => {
                if !in_trip {
                    report.implicit_opens += 1;
                    state.open();
                }
                state.accumulated_segments.push(segment);
                self.emit(state, sink, report);
            }
            (Vacant, Vacant, false) => {
                report.vacant_ignored += 1;
            }
            (Vacant, Vacant, true) => {
                self.emit(state, sink, report);
            }
        }

        report.segments_accepted += 1;
        state.last_seen_end = Some(end_ts);
    }

    /// Close out a vehicle's sequence according to [`EndOfInput`].
    pub fn finish<S: TripSink + ?Sized>(
        &self,
        state: &mut VehicleTripState,
        sink: &mut S,
        report: &mut SegmentationReport,
    ) {
        if !state.in_trip || state.accumulated_segments.is_empty() {
            state.in_trip = false;
            return;
        }
        match self.config.end_of_input {
            EndOfInput::Flush => {
                report.open_trips_flushed += 1;
                self.emit(state, sink, report);
            }
            EndOfInput::Discard => {
                report.open_trips_dropped += 1;
                state.accumulated_segments.clear();
                state.in_trip = false;
            }
        }
    }

    /// Fold a whole ordered sequence for one vehicle, then finish it.
    pub fn segment_sequence<I, S>(&self, segments: I, sink: &mut S) -> SegmentationReport
    where
        I: IntoIterator<Item = RawSegment>,
        S: TripSink + ?Sized,
    {
        let mut state = VehicleTripState::new();
        let mut report = SegmentationReport::default();
        for segment in segments {
            self.process(&mut state, segment, sink, &mut report);
        }
        self.finish(&mut state, sink, &mut report);
        report
    }

    /// Convenience wrapper collecting a vehicle's trips into a `Vec`.
    pub fn segment_vehicle<I>(&self, segments: I) -> Vec<Trip>
    where
        I: IntoIterator<Item = RawSegment>,
    {
        let mut trips = Vec::new();
        self.segment_sequence(segments, &mut trips);
        trips
    }

    fn emit<S: TripSink + ?Sized>(
        &self,
        state: &mut VehicleTripState,
        sink: &mut S,
        report: &mut SegmentationReport,
    ) {
        state.in_trip = false;
        let segments = std::mem::take(&mut state.accumulated_segments);
        let Some(first) = segments.first() else {
            return;
        };
        let vehicle_id = first.vehicle_id.clone();

        let Some(trip) = Trip::new(vehicle_id, state.trip_counter + 1, segments) else {
            return;
        };
        if let Some(max) = self.config.max_trip_secs {
            if trip.duration_secs() > max {
                debug!(
                    "[Segmenter] {}: dropping {}s trip (max {}s)",
                    trip.vehicle_id,
                    trip.duration_secs(),
                    max
                );
                report.trips_too_long += 1;
                return;
            }
        }

        state.trip_counter += 1;
        report.trips_emitted += 1;
        sink.emit(trip);
    }

    fn abandon(&self, state: &mut VehicleTripState, report: &mut SegmentationReport) {
        if let Some(first) = state.accumulated_segments.first() {
            warn!(
                "[Segmenter] {}: abandoning open trip from {} ({} segments)",
                first.vehicle_id,
                first.start.timestamp,
                state.accumulated_segments.len()
            );
            report.trips_abandoned += 1;
        }
        state.accumulated_segments.clear();
        state.in_trip = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GeoPoint, Marker};
    use crate::MeterStatus::{Hired, Vacant};

    /// Segment moving ~111 m north per call, well under any speed ceiling.
    fn seg(
        start_ts: i64,
        start_status: MeterStatus,
        end_ts: i64,
        end_status: MeterStatus,
        lat: f64,
    ) -> RawSegment {
        RawSegment::new(
            "7",
            Marker::new(start_ts, GeoPoint::new(lat, 0.0), start_status),
            Marker::new(end_ts, GeoPoint::new(lat + 0.001, 0.0), end_status),
        )
    }

    fn segmenter() -> TripSegmenter {
        TripSegmenter::new(SegmentationConfig::default(), AcceptanceBounds::default())
    }

    fn segmenter_with(config: SegmentationConfig) -> TripSegmenter {
        TripSegmenter::new(config, AcceptanceBounds::default())
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(SegmentationConfig::default().validate().is_ok());
        let bad = SegmentationConfig { max_speed_kmh: 0.0, ..Default::default() };
        assert!(bad.validate().is_err());
        let bad = SegmentationConfig { max_trip_secs: Some(0), ..Default::default() };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_single_meter_start_flushes_at_end() {
        let single = RawSegment::new(
            "7",
            Marker::new(1000, GeoPoint::new(0.0, 0.0), Vacant),
            Marker::new(1060, GeoPoint::new(0.01, 0.01), Hired),
        );
        let trips = segmenter().segment_vehicle(vec![single]);
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].start_timestamp, 1000);
        assert_eq!(trips[0].end_timestamp, 1060);
        assert_eq!(trips[0].trip_sequence_number, 1);
    }

    #[test]
    fn test_single_meter_start_discarded_at_end() {
        let config = SegmentationConfig { end_of_input: EndOfInput::Discard, ..Default::default() };
        let mut trips = Vec::new();
        let report = segmenter_with(config)
            .segment_sequence(vec![seg(1000, Vacant, 1060, Hired, 0.0)], &mut trips);
        assert!(trips.is_empty());
        assert_eq!(report.open_trips_dropped, 1);
        assert_eq!(report.trips_emitted, 0);
    }

    #[test]
    fn test_short_gap_keeps_one_trip() {
        let trips = segmenter().segment_vehicle(vec![
            seg(1000, Vacant, 1060, Hired, 0.0),
            seg(1100, Hired, 1160, Hired, 0.001),
            seg(1160, Hired, 1220, Vacant, 0.002),
        ]);
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].segments.len(), 3);
        assert_eq!(trips[0].start_timestamp, 1000);
        assert_eq!(trips[0].end_timestamp, 1220);
    }

    #[test]
    fn test_long_gap_splits_trip() {
        let trips = segmenter().segment_vehicle(vec![
            seg(1000, Vacant, 1060, Hired, 0.0),
            seg(1760, Hired, 1820, Hired, 0.001),
            seg(1820, Hired, 1880, Vacant, 0.002),
        ]);
        assert_eq!(trips.len(), 2);
        assert_eq!(trips[0].segments.len(), 1);
        assert_eq!(trips[0].end_timestamp, 1060);
        assert_eq!(trips[1].segments.len(), 2);
        assert_eq!(trips[1].start_timestamp, 1760);
        assert_eq!(trips[1].end_timestamp, 1880);
        assert_eq!(trips[1].trip_sequence_number, 2);
    }

    #[test]
    fn test_speeding_segment_never_appears() {
        // ~50 km in 60 s
        let teleport = RawSegment::new(
            "7",
            Marker::new(1060, GeoPoint::new(0.001, 0.0), Hired),
            Marker::new(1120, GeoPoint::new(0.001, 0.44966), Hired),
        );
        let mut trips = Vec::new();
        let report = segmenter().segment_sequence(
            vec![
                seg(1000, Vacant, 1060, Hired, 0.0),
                teleport.clone(),
                seg(1120, Hired, 1180, Vacant, 0.001),
            ],
            &mut trips,
        );
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].segments.len(), 2);
        assert!(!trips[0].segments.contains(&teleport));
        assert_eq!(report.rejections.get("excessive_speed"), Some(&1));
    }

    #[test]
    fn test_slow_meter_start_is_glitch() {
        let mut trips = Vec::new();
        let report = segmenter().segment_sequence(
            vec![seg(1000, Vacant, 1300, Hired, 0.0)],
            &mut trips,
        );
        assert!(trips.is_empty());
        assert_eq!(report.rejections.get("meter_start_glitch"), Some(&1));
    }

    #[test]
    fn test_missed_toggle_splits_hired_run() {
        let trips = segmenter().segment_vehicle(vec![
            seg(1000, Vacant, 1060, Hired, 0.0),
            seg(1060, Hired, 1120, Hired, 0.001),
            seg(1500, Hired, 1560, Hired, 0.002),
            seg(1560, Hired, 1620, Vacant, 0.003),
        ]);
        assert_eq!(trips.len(), 2);
        assert_eq!(trips[0].end_timestamp, 1120);
        assert_eq!(trips[1].start_timestamp, 1500);
    }

    #[test]
    fn test_long_hired_segment_starts_new_trip() {
        let trips = segmenter().segment_vehicle(vec![
            seg(1000, Vacant, 1060, Hired, 0.0),
            seg(1060, Hired, 1060 + 3700, Hired, 0.001),
            seg(4760, Hired, 4820, Vacant, 0.002),
        ]);
        assert_eq!(trips.len(), 2);
        assert_eq!(trips[0].segments.len(), 1);
        assert_eq!(trips[1].segments.len(), 2);
    }

    #[test]
    fn test_implicit_open_from_idle() {
        let mut trips = Vec::new();
        let report = segmenter().segment_sequence(
            vec![seg(1000, Hired, 1060, Hired, 0.0), seg(1060, Hired, 1120, Vacant, 0.001)],
            &mut trips,
        );
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].segments.len(), 2);
        assert_eq!(report.implicit_opens, 1);
    }

    #[test]
    fn test_vacant_segments() {
        let mut trips = Vec::new();
        let report = segmenter().segment_sequence(
            vec![
                seg(900, Vacant, 960, Vacant, 0.0),
                seg(1000, Vacant, 1060, Hired, 0.001),
                seg(1060, Hired, 1120, Hired, 0.002),
                // Missed M→E: the vacant run closes the trip
                seg(1120, Vacant, 1180, Vacant, 0.003),
            ],
            &mut trips,
        );
        assert_eq!(report.vacant_ignored, 1);
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].segments.len(), 2);
        assert_eq!(trips[0].end_timestamp, 1120);
    }

    #[test]
    fn test_meter_restart_within_gap_continues_trip() {
        let mut trips = Vec::new();
        let report = segmenter().segment_sequence(
            vec![
                seg(1000, Vacant, 1060, Hired, 0.0),
                seg(1060, Hired, 1120, Hired, 0.001),
                seg(1200, Vacant, 1260, Hired, 0.002),
                seg(1260, Hired, 1320, Vacant, 0.003),
            ],
            &mut trips,
        );
        assert_eq!(report.trips_abandoned, 0);
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].start_timestamp, 1000);
        assert_eq!(trips[0].end_timestamp, 1320);
        assert_eq!(trips[0].segments.len(), 4);
    }

    #[test]
    fn test_displaced_restart_policies() {
        // The restart is ~55 km away, 80 s after the open trip's last sample
        let input = || {
            vec![
                seg(1000, Vacant, 1060, Hired, 0.0),
                seg(1060, Hired, 1120, Hired, 0.001),
                seg(1200, Vacant, 1260, Hired, 0.5),
                seg(1260, Hired, 1320, Vacant, 0.501),
            ]
        };

        let mut trips = Vec::new();
        let report = segmenter().segment_sequence(input(), &mut trips);
        assert_eq!(report.trips_abandoned, 1);
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].start_timestamp, 1200);
        assert_eq!(trips[0].segments.len(), 2);
        assert_eq!(trips[0].trip_sequence_number, 1);

        let config = SegmentationConfig { restart_policy: RestartPolicy::Emit, ..Default::default() };
        let trips = segmenter_with(config).segment_vehicle(input());
        assert_eq!(trips.len(), 2);
        assert_eq!(trips[0].end_timestamp, 1120);
        assert_eq!(trips[1].start_timestamp, 1200);
        assert_eq!(trips[1].trip_sequence_number, 2);
    }

    #[test]
    fn test_vacant_run_while_idle_is_ignored() {
        let s = segmenter();
        let mut sink: Vec<Trip> = Vec::new();
        let mut report = SegmentationReport::default();
        let mut state = VehicleTripState::new();

        s.process(&mut state, seg(1000, Vacant, 1060, Hired, 0.0), &mut sink, &mut report);
        s.process(&mut state, seg(1060, Hired, 1120, Vacant, 0.001), &mut sink, &mut report);
        assert_eq!(sink.len(), 1);

        s.process(&mut state, seg(1120, Vacant, 1180, Vacant, 0.002), &mut sink, &mut report);
        s.process(&mut state, seg(1180, Vacant, 1240, Vacant, 0.003), &mut sink, &mut report);
        assert_eq!(sink.len(), 1);
        assert!(!state.in_trip);
        assert!(state.accumulated_segments.is_empty());
        assert_eq!(state.trip_counter, 1);
        assert_eq!(state.last_seen_end, Some(1240));
        assert_eq!(report.vacant_ignored, 2);
        assert_eq!(report.segments_accepted, 4);
    }

    #[test]
    fn test_meter_stop_from_idle_opens_and_closes() {
        let mut trips = Vec::new();
        let report = segmenter().segment_sequence(
            vec![
                seg(1000, Hired, 1060, Vacant, 0.0),
                seg(1060, Vacant, 1120, Vacant, 0.001),
            ],
            &mut trips,
        );
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].segments.len(), 1);
        assert_eq!(trips[0].start_timestamp, 1000);
        assert_eq!(trips[0].end_timestamp, 1060);
        assert_eq!(report.implicit_opens, 1);
        assert_eq!(report.vacant_ignored, 1);
        assert_eq!(report.open_trips_flushed, 0);
    }

    #[test]
    fn test_new_trip_after_long_gap_emits() {
        let trips = segmenter().segment_vehicle(vec![
            seg(1000, Vacant, 1060, Hired, 0.0),
            seg(1060, Hired, 1120, Hired, 0.001),
            seg(1720, Vacant, 1780, Hired, 0.002),
            seg(1780, Hired, 1840, Vacant, 0.003),
        ]);
        assert_eq!(trips.len(), 2);
        assert_eq!(trips[0].segments.len(), 2);
        assert_eq!(trips[1].start_timestamp, 1720);
    }

    #[test]
    fn test_overlapping_segment_rejected() {
        let mut trips = Vec::new();
        let report = segmenter().segment_sequence(
            vec![
                seg(1000, Vacant, 1060, Hired, 0.0),
                seg(1060, Hired, 1180, Hired, 0.001),
                // Consolidated span already covered by the previous segment
                seg(1120, Hired, 1240, Hired, 0.002),
                seg(1180, Hired, 1240, Vacant, 0.003),
            ],
            &mut trips,
        );
        assert_eq!(report.rejections.get("out_of_order"), Some(&1));
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].segments.len(), 3);
    }

    #[test]
    fn test_max_trip_duration() {
        let config = SegmentationConfig { max_trip_secs: Some(100), ..Default::default() };
        let mut trips = Vec::new();
        let report = segmenter_with(config).segment_sequence(
            vec![
                seg(1000, Vacant, 1060, Hired, 0.0),
                seg(1060, Hired, 1120, Hired, 0.001),
                seg(1120, Hired, 1180, Vacant, 0.002),
                seg(2000, Vacant, 2030, Hired, 0.003),
                seg(2030, Hired, 2090, Vacant, 0.004),
            ],
            &mut trips,
        );
        assert_eq!(report.trips_too_long, 1);
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].start_timestamp, 2000);
        assert_eq!(trips[0].trip_sequence_number, 1);
    }

    #[test]
    fn test_replay_is_identical() {
        let input = vec![
            seg(1000, Vacant, 1060, Hired, 0.0),
            seg(1100, Hired, 1160, Hired, 0.001),
            seg(1160, Hired, 1220, Vacant, 0.002),
            seg(2000, Vacant, 2060, Hired, 0.003),
            seg(2900, Hired, 2960, Vacant, 0.004),
        ];
        let first = segmenter().segment_vehicle(input.clone());
        let second = segmenter().segment_vehicle(input);
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn test_reversed_order_is_detected() {
        let ordered = vec![
            seg(1000, Vacant, 1060, Hired, 0.0),
            seg(1100, Hired, 1160, Hired, 0.001),
            seg(1160, Hired, 1220, Vacant, 0.002),
        ];
        let mut reversed = ordered.clone();
        reversed.reverse();

        let good = segmenter().segment_vehicle(ordered);
        let mut bad = Vec::new();
        let report = segmenter().segment_sequence(reversed, &mut bad);
        assert_ne!(good, bad);
        assert!(report.rejections.get("out_of_order").copied().unwrap_or(0) > 0);
    }

    #[test]
    fn test_state_is_per_vehicle_value() {
        let s = segmenter();
        let mut sink: Vec<Trip> = Vec::new();
        let mut report = SegmentationReport::default();
        let mut state = VehicleTripState::new();

        s.process(&mut state, seg(1000, Vacant, 1060, Hired, 0.0), &mut sink, &mut report);
        assert!(state.in_trip);
        assert_eq!(state.accumulated_segments.len(), 1);
        assert_eq!(state.last_seen_end, Some(1060));

        s.process(&mut state, seg(1060, Hired, 1120, Vacant, 0.001), &mut sink, &mut report);
        assert!(!state.in_trip);
        assert!(state.accumulated_segments.is_empty());
        assert_eq!(state.trip_counter, 1);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_report_merge() {
        let mut a = SegmentationReport { segments_seen: 3, trips_emitted: 1, ..Default::default() };
        a.rejections.insert("out_of_order", 1);
        let mut b = SegmentationReport { segments_seen: 2, ..Default::default() };
        b.rejections.insert("out_of_order", 2);
        b.rejections.insert("stationary", 1);
        a.merge(&b);
        assert_eq!(a.segments_seen, 5);
        assert_eq!(a.rejections.get("out_of_order"), Some(&3));
        assert_eq!(a.rejections.get("stationary"), Some(&1));
    }
}
