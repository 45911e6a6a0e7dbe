//! # Pipeline
//!
//! In-process runtime that wires the stages together and honours the
//! partition/sort/group contract:
//!
//! ```text
//! lines ─ parse ─ prefilter ─┬─ [calibration pass] ─ bounds
//!                            └─ partition ─ sort/group ─ segment ─┬─ trips
//!                                                                 ├─ band histogram (per partition, merged)
//!                                                                 └─ fares (sorted by time)
//! ```
//!
//! Each partition is an independent fold. With the `parallel` feature the
//! partitions run on rayon's pool; results are collected in partition order
//! so output is identical either way.

use std::collections::BTreeMap;
use std::time::Instant;

use log::{debug, info};

use crate::banding::{BandConfig, BandHistogram, DistanceBander};
use crate::calibration::{
    bounds_from_stats, CalibrationSampler, CalibrationStats, DEFAULT_DEVIATIONS,
    DEFAULT_SAMPLE_EVERY,
};
use crate::error::{ensure, Result};
use crate::fare::{sort_by_time, Fare, FareCalculator, FareConfig, RevenueSummary};
use crate::geo_utils::DistanceUnit;
use crate::partition::{group_by_vehicle, partition_segments};
use crate::record::{self, format_trip_line, parse_record, RecordFormat, TimestampFormat};
use crate::segmentation::{SegmentationConfig, SegmentationReport, TripSegmenter};
use crate::validation::AcceptanceBounds;
use crate::{RawSegment, Trip};

/// Configuration for a whole run.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PipelineConfig {
    /// Distance unit for banding and fares; overrides the unit in `bands` and `fares`.
    /// Default: Kilometers
    pub unit: DistanceUnit,
    /// Number of vehicle partitions. Default: 4
    pub partitions: usize,
    /// Default: epoch or UTC datetimes, stationary records dropped
    pub records: RecordFormat,
    /// Run the calibration pass when no stats are supplied. Default: false
    pub calibrate: bool,
    /// Calibration sampling stride. Default: 1000
    pub sample_every: u64,
    /// Calibration box half-width in standard deviations. Default: 20
    pub deviations: f64,
    pub segmentation: SegmentationConfig,
    pub bands: BandConfig,
    pub fares: FareConfig,
    /// Emit one summary span per trip instead of every segment. Default: true
    pub summary_output: bool,
    /// Default: Epoch
    pub timestamp_format: TimestampFormat,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            unit: DistanceUnit::Kilometers,
            partitions: 4,
            records: RecordFormat::default(),
            calibrate: false,
            sample_every: DEFAULT_SAMPLE_EVERY,
            deviations: DEFAULT_DEVIATIONS,
            segmentation: SegmentationConfig::default(),
            bands: BandConfig::default(),
            fares: FareConfig::default(),
            summary_output: true,
            timestamp_format: TimestampFormat::Epoch,
        }
    }
}

impl PipelineConfig {
    /// Check every section. Runs before any record is read.
    pub fn validate(&self) -> Result<()> {
        ensure(self.partitions > 0, || "partitions must be > 0".to_string())?;
        ensure(self.sample_every > 0, || "sample_every must be > 0".to_string())?;
        ensure(self.deviations.is_finite() && self.deviations > 0.0, || {
            format!("deviations must be positive, got {}", self.deviations)
        })?;
        self.records.validate()?;
        self.timestamp_format.validate()?;
        self.segmentation.validate()?;
        self.bands.validate()?;
        self.fares.validate()
    }

    /// Load and validate a JSON config. Missing fields take their defaults.
    ///
    /// # Example
    /// ```
    /// use cab_trips::{DistanceUnit, PipelineConfig};
    ///
    /// let config = PipelineConfig::from_json_str(r#"{
    ///     "unit": "mi",
    ///     "partitions": 8,
    ///     "bands": { "bandwidth": 0.5, "max_distance": 25.0 }
    /// }"#).unwrap();
    /// assert_eq!(config.unit, DistanceUnit::StatuteMiles);
    /// assert_eq!(config.partitions, 8);
    /// assert_eq!(config.bands.sanity_limit, 200.0);
    /// ```
    #[cfg(feature = "json")]
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)
            .map_err(|e| crate::error::TripError::ConfigFile(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Counters for a whole run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineReport {
    pub lines_read: u64,
    pub malformed: u64,
    /// Records dropped right after parsing, by rejection kind.
    pub prefiltered: BTreeMap<&'static str, u64>,
    /// Stats the acceptance box was derived from, one per sampler.
    pub calibration: Vec<CalibrationStats>,
    pub segmentation: SegmentationReport,
    /// Trips without a fare, by exclusion kind.
    pub fares_excluded: BTreeMap<&'static str, u64>,
    pub revenue: RevenueSummary,
}

/// Everything a run produces.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Ordered by partition, then vehicle, then trip sequence number.
    pub trips: Vec<Trip>,
    pub histogram: BandHistogram,
    /// Ordered by `(start_timestamp, end_timestamp)`.
    pub fares: Vec<Fare>,
    pub report: PipelineReport,
}

struct PartitionResult {
    trips: Vec<Trip>,
    histogram: BandHistogram,
    report: SegmentationReport,
}

/// Reference runtime.
///
/// # Example
/// ```
/// use cab_trips::{Pipeline, PipelineConfig};
///
/// let lines = [
///     "12,1000,37.7000,-122.4000,E,1060,37.7010,-122.4000,M",
///     "12,1060,37.7010,-122.4000,M,1120,37.7100,-122.4000,M",
///     "12,1120,37.7100,-122.4000,M,1180,37.7200,-122.4000,E",
///     "not a record",
/// ];
/// let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
/// let output = pipeline.run(lines, None).unwrap();
///
/// assert_eq!(output.trips.len(), 1);
/// assert_eq!(output.report.malformed, 1);
/// assert_eq!(output.histogram.total(), 1);
/// assert_eq!(output.fares.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    bander: DistanceBander,
    fares: FareCalculator,
}

impl Pipeline {
    pub fn new(mut config: PipelineConfig) -> Result<Self> {
        config.bands.unit = config.unit;
        config.fares.unit = config.unit;
        config.validate()?;

        let bander = DistanceBander::new(config.bands.clone())?;
        let fares = FareCalculator::new(config.fares.clone())?;
        Ok(Self { config, bander, fares })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn bander(&self) -> &DistanceBander {
        &self.bander
    }

    pub fn fare_calculator(&self) -> &FareCalculator {
        &self.fares
    }

    /// Parse and prefilter raw lines. Bad lines are counted, never fatal.
    pub fn parse<'a, I>(&self, lines: I, report: &mut PipelineReport) -> Vec<RawSegment>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut segments = Vec::new();
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            report.lines_read += 1;
            let segment = match parse_record(line, &self.config.records) {
                Ok(segment) => segment,
                Err(e) => {
                    debug!("[Pipeline] Dropping line: {}", e);
                    report.malformed += 1;
                    continue;
                }
            };
            match record::prefilter(&segment, &self.config.records) {
                Ok(()) => segments.push(segment),
                Err(rejection) => {
                    *report.prefiltered.entry(rejection.kind()).or_insert(0) += 1;
                }
            }
        }
        segments
    }

    /// Calibration pass: one sampler per partition, no ordering required.
    pub fn calibrate(&self, segments: &[RawSegment]) -> Vec<CalibrationStats> {
        if segments.is_empty() {
            return Vec::new();
        }
        let chunk = segments.len().div_ceil(self.config.partitions);
        segments
            .chunks(chunk)
            .filter_map(|part| {
                let mut sampler = CalibrationSampler::new(self.config.sample_every);
                for segment in part {
                    sampler.observe(segment);
                }
                sampler.finish()
            })
            .collect()
    }

    fn segment_partition(&self, segmenter: &TripSegmenter, segments: Vec<RawSegment>) -> PartitionResult {
        let mut trips = Vec::new();
        let mut report = SegmentationReport::default();
        for sequence in group_by_vehicle(segments) {
            let vehicle_report = segmenter.segment_sequence(sequence.segments, &mut trips);
            report.merge(&vehicle_report);
        }
        let histogram = self.bander.count_trips(&trips);
        PartitionResult { trips, histogram, report }
    }

    /// Partition, group and segment, returning trips, the merged histogram
    /// and merged segmentation counters.
    pub fn segment(
        &self,
        segments: Vec<RawSegment>,
        bounds: AcceptanceBounds,
    ) -> Result<(Vec<Trip>, BandHistogram, SegmentationReport)> {
        let segmenter = TripSegmenter::new(self.config.segmentation.clone(), bounds);
        let partitions = partition_segments(segments, self.config.partitions);

        #[cfg(feature = "parallel")]
        let results: Vec<PartitionResult> = {
            use rayon::prelude::*;
            partitions
                .into_par_iter()
                .map(|part| self.segment_partition(&segmenter, part))
                .collect()
        };

        #[cfg(not(feature = "parallel"))]
        let results: Vec<PartitionResult> = partitions
            .into_iter()
            .map(|part| self.segment_partition(&segmenter, part))
            .collect();

        let mut trips = Vec::new();
        let mut histogram = self.bander.histogram();
        let mut report = SegmentationReport::default();
        for result in results {
            trips.extend(result.trips);
            histogram.merge(&result.histogram)?;
            report.merge(&result.report);
        }
        Ok((trips, histogram, report))
    }

    /// Run every stage over raw lines.
    ///
    /// `stats` are externally computed calibration lines. Without them the
    /// calibration pass runs only when `calibrate` is set; otherwise the full
    /// coordinate range is accepted.
    pub fn run<'a, I>(&self, lines: I, stats: Option<&[CalibrationStats]>) -> Result<PipelineOutput>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let start = Instant::now();
        let mut report = PipelineReport::default();

        let segments = self.parse(lines, &mut report);
        info!(
            "[Pipeline] Parsed {} segments from {} lines ({} malformed)",
            segments.len(),
            report.lines_read,
            report.malformed
        );

        report.calibration = match stats {
            Some(stats) => stats.to_vec(),
            None if self.config.calibrate => self.calibrate(&segments),
            None => Vec::new(),
        };
        let bounds = bounds_from_stats(&report.calibration, self.config.deviations)?;

        let (trips, histogram, segmentation) = self.segment(segments, bounds)?;
        report.segmentation = segmentation;
        info!(
            "[Pipeline] {} trips from {} accepted segments ({} rejected)",
            trips.len(),
            report.segmentation.segments_accepted,
            report.segmentation.segments_rejected
        );

        let mut fares = Vec::new();
        for trip in &trips {
            match self.fares.quote(trip) {
                Ok(fare) => fares.push(fare),
                Err(exclusion) => {
                    *report.fares_excluded.entry(exclusion.kind()).or_insert(0) += 1;
                }
            }
        }
        sort_by_time(&mut fares);
        report.revenue = RevenueSummary::from_fares(&fares);

        let elapsed = start.elapsed();
        info!(
            "[Pipeline] Done in {:.2?}: {} trips, {} fares, revenue {:.2}",
            elapsed,
            trips.len(),
            fares.len(),
            report.revenue.revenue
        );

        Ok(PipelineOutput { trips, histogram, fares, report })
    }

    /// Keyed trip lines in the configured form.
    pub fn render_trips(&self, trips: &[Trip]) -> Vec<String> {
        trips
            .iter()
            .map(|trip| {
                format_trip_line(trip, self.config.summary_output, &self.config.timestamp_format)
            })
            .collect()
    }

    pub fn render_histogram(&self, histogram: &BandHistogram) -> Vec<String> {
        self.bander.format_histogram(histogram)
    }

    pub fn render_fares(&self, fares: &[Fare]) -> Vec<String> {
        fares
            .iter()
            .map(|fare| fare.to_line(&self.config.timestamp_format))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::parse_stats_lines;
    use crate::fare::ReferencePoint;
    use crate::record::parse_trip_line;

    /// One short airport-area trip per vehicle, plus vacant noise.
    fn fleet_lines() -> Vec<String> {
        let mut lines = Vec::new();
        for (i, vehicle) in ["3", "17", "cab_a", "42", "cab_b"].iter().enumerate() {
            let t0 = 1_000 + i as i64 * 50;
            let lat = 37.60 + i as f64 * 0.001;
            let lon = -122.37896 + i as f64 * 0.001;
            lines.push(format!("{vehicle},{},{lat},{lon},E,{},{},{lon},E", t0 - 120, t0 - 60, lat - 0.001));
            lines.push(format!("{vehicle},{t0},{lat},{lon},E,{},{},{lon},M", t0 + 60, lat + 0.002));
            lines.push(format!(
                "{vehicle},{},{},{lon},M,{},{},{lon},M",
                t0 + 60,
                lat + 0.002,
                t0 + 120,
                lat + 0.010
            ));
            lines.push(format!(
                "{vehicle},{},{},{lon},M,{},{},{lon},E",
                t0 + 120,
                lat + 0.010,
                t0 + 180,
                lat + 0.020
            ));
        }
        lines
    }

    fn run(config: PipelineConfig, lines: &[String]) -> PipelineOutput {
        Pipeline::new(config)
            .unwrap()
            .run(lines.iter().map(String::as_str), None)
            .unwrap()
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
        assert!(Pipeline::new(PipelineConfig { partitions: 0, ..Default::default() }).is_err());
        let bad_bands = BandConfig { bandwidth: 3.0, max_distance: 10.0, ..Default::default() };
        assert!(Pipeline::new(PipelineConfig { bands: bad_bands, ..Default::default() }).is_err());
    }

    #[test]
    fn test_fleet_run() {
        let lines = fleet_lines();
        let output = run(PipelineConfig::default(), &lines);

        assert_eq!(output.report.lines_read, 20);
        assert_eq!(output.report.malformed, 0);
        assert_eq!(output.trips.len(), 5);
        assert!(output.trips.iter().all(|t| t.segments.len() == 3));
        assert_eq!(output.report.segmentation.vacant_ignored, 5);
        assert_eq!(output.histogram.total(), 5);
        assert_eq!(output.histogram.counts()[2], 5);
        assert_eq!(output.fares.len(), 5);
        assert_eq!(output.report.revenue.trips, 5);
    }

    #[test]
    fn test_partition_count_does_not_change_results() {
        let lines = fleet_lines();
        let key = |trips: &[Trip]| {
            let mut ids: Vec<_> = trips.iter().map(|t| (t.trip_id(), t.start_timestamp)).collect();
            ids.sort();
            ids
        };
        let one = run(PipelineConfig { partitions: 1, ..Default::default() }, &lines);
        let many = run(PipelineConfig { partitions: 7, ..Default::default() }, &lines);
        assert_eq!(key(&one.trips), key(&many.trips));
        assert_eq!(one.histogram, many.histogram);
        assert_eq!(one.fares, many.fares);
    }

    #[test]
    fn test_rerun_is_identical() {
        let lines = fleet_lines();
        let a = run(PipelineConfig::default(), &lines);
        let b = run(PipelineConfig::default(), &lines);
        assert_eq!(a.trips, b.trips);
        assert_eq!(a.report, b.report);
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let lines = fleet_lines();
        let mut shuffled = lines.clone();
        shuffled.reverse();
        let a = run(PipelineConfig::default(), &lines);
        let b = run(PipelineConfig::default(), &shuffled);
        assert_eq!(a.trips, b.trips);
    }

    #[test]
    fn test_malformed_and_prefiltered_lines() {
        let lines: Vec<String> = vec![
            "garbage".into(),
            "1,2,3".into(),
            "5,100,37.7,-122.4,M,100,37.8,-122.4,M".into(),
            "5,100,37.7,-122.4,M,160,37.7,-122.4,M".into(),
            "".into(),
        ];
        let output = run(PipelineConfig::default(), &lines);
        assert_eq!(output.report.lines_read, 4);
        assert_eq!(output.report.malformed, 2);
        assert_eq!(output.report.prefiltered.get("non_positive_duration"), Some(&1));
        assert_eq!(output.report.prefiltered.get("stationary"), Some(&1));
        assert!(output.trips.is_empty());
        // Every band is still listed
        assert_eq!(output.histogram.counts().len(), 101);
    }

    #[test]
    fn test_extreme_timestamps_are_dropped() {
        let mut lines = fleet_lines();
        lines.push("1,-9223372036854775808,37.7,-122.4,E,9223372036854775807,37.71,-122.4,M".into());
        lines.push("1,1e300,37.7,-122.4,M,2e300,37.71,-122.4,M".into());

        let output = run(PipelineConfig::default(), &lines);
        assert_eq!(output.report.malformed, 2);
        assert_eq!(output.trips, run(PipelineConfig::default(), &fleet_lines()).trips);
    }

    #[test]
    fn test_calibration_rejects_outlier() {
        let mut lines = fleet_lines();
        // A fix in the Atlantic for vehicle 3, mid-trip
        lines.push("3,1200,37.63,-122.37896,M,1230,10.0,-40.0,M".to_string());
        let stats = parse_stats_lines("400,37.61,-122.38,0.0004,0.0004");
        let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        let output = pipeline
            .run(lines.iter().map(String::as_str), Some(&stats))
            .unwrap();
        assert_eq!(
            output.report.segmentation.rejections.get("outside_bounds"),
            Some(&1)
        );
        assert_eq!(output.trips.len(), 5);
    }

    #[test]
    fn test_calibration_pass() {
        let lines = fleet_lines();
        let config = PipelineConfig { calibrate: true, sample_every: 2, ..Default::default() };
        let output = run(config, &lines);
        assert!(!output.report.calibration.is_empty());
        let pooled = CalibrationStats::pool(&output.report.calibration).unwrap();
        assert!((pooled.latitude_mean - 37.61).abs() < 0.02);
        assert_eq!(output.trips.len(), 5);
    }

    #[test]
    fn test_reference_gate_in_pipeline() {
        let lines = fleet_lines();
        let mut fares = FareConfig { reference: Some(ReferencePoint::sfo()), ..Default::default() };
        let near = run(PipelineConfig { fares: fares.clone(), ..Default::default() }, &lines);
        assert_eq!(near.fares.len(), 5);

        fares.reference = Some(ReferencePoint::new("Oakland", crate::GeoPoint::new(37.7126, -122.2197), 1.0));
        let far = run(PipelineConfig { fares, ..Default::default() }, &lines);
        assert!(far.fares.is_empty());
        assert_eq!(far.report.fares_excluded.get("outside_reference_range"), Some(&5));
    }

    #[test]
    fn test_rendering() {
        let lines = fleet_lines();
        let pipeline = Pipeline::new(PipelineConfig { summary_output: false, ..Default::default() }).unwrap();
        let output = pipeline.run(lines.iter().map(String::as_str), None).unwrap();

        let trip_lines = pipeline.render_trips(&output.trips);
        assert_eq!(trip_lines.len(), 5);
        let reparsed = parse_trip_line(&trip_lines[0]).unwrap();
        assert_eq!(reparsed.segments.len(), 3);
        assert_eq!(reparsed.trip_id(), output.trips[0].trip_id());

        let band_lines = pipeline.render_histogram(&output.histogram);
        assert_eq!(band_lines.last().map(String::as_str), Some("Infinity\t0"));

        let fare_lines = pipeline.render_fares(&output.fares);
        assert!(fare_lines[0].starts_with("1000 1180\t"));
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_json_config_errors() {
        assert!(matches!(
            PipelineConfig::from_json_str("{ not json"),
            Err(crate::error::TripError::ConfigFile(_))
        ));
        assert!(matches!(
            PipelineConfig::from_json_str(r#"{ "partitions": 0 }"#),
            Err(crate::error::TripError::InvalidConfig(_))
        ));
    }
}
