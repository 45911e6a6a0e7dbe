//! # Outlier Calibration
//!
//! Optional pre-pass that estimates where vehicles actually drive, so the
//! segmentation pass can reject GPS outliers far outside the fleet's area.
//!
//! 1. Each sampler keeps both endpoints of every Nth record.
//! 2. It reports one [`CalibrationStats`] line (count, means, unbiased variances).
//! 3. The segmentation pass pools all lines and accepts `mean ± K·σ` per axis.
//!
//! Calibration has no ordering requirement and its output is immutable input
//! to the segmentation pass.

use log::{info, warn};

use crate::error::{Result, TripError};
use crate::validation::AcceptanceBounds;
use crate::RawSegment;

/// Sample every Nth record. Default: 1000
pub const DEFAULT_SAMPLE_EVERY: u64 = 1000;

/// Width of the acceptance box in standard deviations. Default: 20
pub const DEFAULT_DEVIATIONS: f64 = 20.0;

/// Latitude/longitude moments of a sample.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CalibrationStats {
    pub sample_count: u64,
    pub latitude_mean: f64,
    pub latitude_variance: f64,
    pub longitude_mean: f64,
    pub longitude_variance: f64,
}

fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (mean, ss / (n - 1.0))
}

impl CalibrationStats {
    /// Moments of paired latitude/longitude samples.
    ///
    /// Returns `None` for an empty sample or mismatched lengths.
    pub fn from_samples(latitudes: &[f64], longitudes: &[f64]) -> Option<Self> {
        if latitudes.is_empty() || latitudes.len() != longitudes.len() {
            return None;
        }
        let (latitude_mean, latitude_variance) = mean_and_variance(latitudes);
        let (longitude_mean, longitude_variance) = mean_and_variance(longitudes);
        Some(Self {
            sample_count: latitudes.len() as u64,
            latitude_mean,
            latitude_variance,
            longitude_mean,
            longitude_variance,
        })
    }

    /// Combine per-sampler stats: size-weighted mean, pooled variance
    /// `Σ(nᵢ−1)·sᵢ² / Σ(nᵢ−1)`.
    ///
    /// # Example
    /// ```
    /// use cab_trips::CalibrationStats;
    ///
    /// let a = CalibrationStats::from_samples(&[1.0, 3.0], &[10.0, 10.0]).unwrap();
    /// let b = CalibrationStats::from_samples(&[5.0, 7.0], &[20.0, 20.0]).unwrap();
    /// let pooled = CalibrationStats::pool(&[a, b]).unwrap();
    /// assert_eq!(pooled.sample_count, 4);
    /// assert_eq!(pooled.latitude_mean, 4.0);
    /// assert_eq!(pooled.latitude_variance, 2.0);
    /// ```
    pub fn pool(stats: &[CalibrationStats]) -> Option<Self> {
        let total: u64 = stats.iter().map(|s| s.sample_count).sum();
        if total == 0 {
            return None;
        }
        let n = total as f64;
        let dof: f64 = stats
            .iter()
            .map(|s| s.sample_count.saturating_sub(1) as f64)
            .sum();

        let weighted_mean = |f: fn(&CalibrationStats) -> f64| {
            stats.iter().map(|s| s.sample_count as f64 * f(s)).sum::<f64>() / n
        };
        let pooled_variance = |f: fn(&CalibrationStats) -> f64| {
            if dof == 0.0 {
                return 0.0;
            }
            stats
                .iter()
                .map(|s| s.sample_count.saturating_sub(1) as f64 * f(s))
                .sum::<f64>()
                / dof
        };

        Some(Self {
            sample_count: total,
            latitude_mean: weighted_mean(|s| s.latitude_mean),
            latitude_variance: pooled_variance(|s| s.latitude_variance),
            longitude_mean: weighted_mean(|s| s.longitude_mean),
            longitude_variance: pooled_variance(|s| s.longitude_variance),
        })
    }

    /// Acceptance box `mean ± deviations·σ`.
    pub fn bounds(&self, deviations: f64) -> Result<AcceptanceBounds> {
        AcceptanceBounds::around(
            self.latitude_mean,
            self.latitude_variance.sqrt(),
            self.longitude_mean,
            self.longitude_variance.sqrt(),
            deviations,
        )
    }

    /// Stats-file line: `count,lat_mean,lon_mean,lat_variance,lon_variance`.
    pub fn to_line(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.sample_count,
            self.latitude_mean,
            self.longitude_mean,
            self.latitude_variance,
            self.longitude_variance
        )
    }

    /// Parse one stats-file line (comma- or whitespace-separated).
    pub fn parse_line(line: &str) -> Result<Self> {
        let bad = || TripError::InvalidCalibration(line.to_string());
        let fields: Vec<&str> = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|f| !f.is_empty())
            .collect();
        if fields.len() != 5 {
            return Err(bad());
        }

        let sample_count = fields[0]
            .parse::<u64>()
            .or_else(|_| fields[0].parse::<f64>().map(|v| v as u64))
            .map_err(|_| bad())?;
        let mut values = [0.0f64; 4];
        for (slot, field) in values.iter_mut().zip(&fields[1..]) {
            *slot = field.parse::<f64>().map_err(|_| bad())?;
        }
        let [latitude_mean, longitude_mean, latitude_variance, longitude_variance] = values;

        let finite = values.iter().all(|v| v.is_finite());
        if !finite || latitude_variance < 0.0 || longitude_variance < 0.0 {
            return Err(bad());
        }

        Ok(Self {
            sample_count,
            latitude_mean,
            latitude_variance,
            longitude_mean,
            longitude_variance,
        })
    }
}

/// Parse a stats file, skipping (and logging) unreadable lines.
pub fn parse_stats_lines(text: &str) -> Vec<CalibrationStats> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match CalibrationStats::parse_line(line) {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!("[Calibration] Skipping line: {}", e);
                None
            }
        })
        .collect()
}

/// Acceptance box for the segmentation pass.
///
/// No usable stats gives the full-range default box, which rejects nothing.
pub fn bounds_from_stats(stats: &[CalibrationStats], deviations: f64) -> Result<AcceptanceBounds> {
    match CalibrationStats::pool(stats) {
        Some(pooled) => {
            let bounds = pooled.bounds(deviations)?;
            info!(
                "[Calibration] {} samples: lat [{:.5}, {:.5}], lon [{:.5}, {:.5}]",
                pooled.sample_count,
                bounds.min_latitude(),
                bounds.max_latitude(),
                bounds.min_longitude(),
                bounds.max_longitude()
            );
            Ok(bounds)
        }
        None => {
            info!("[Calibration] No statistics, accepting full coordinate range");
            Ok(AcceptanceBounds::default())
        }
    }
}

/// Collects every Nth segment's endpoints.
#[derive(Debug, Clone)]
pub struct CalibrationSampler {
    every: u64,
    seen: u64,
    latitudes: Vec<f64>,
    longitudes: Vec<f64>,
}

impl CalibrationSampler {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            seen: 0,
            latitudes: Vec::new(),
            longitudes: Vec::new(),
        }
    }

    /// Offer a segment; only every Nth one (the 1st, N+1th, ...) is kept.
    pub fn observe(&mut self, segment: &RawSegment) {
        let take = self.seen % self.every == 0;
        self.seen += 1;
        if !take {
            return;
        }
        for point in [&segment.start.point, &segment.end.point] {
            if point.is_valid() {
                self.latitudes.push(point.latitude);
                self.longitudes.push(point.longitude);
            }
        }
    }

    pub fn finish(&self) -> Option<CalibrationStats> {
        CalibrationStats::from_samples(&self.latitudes, &self.longitudes)
    }
}

impl Default for CalibrationSampler {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_EVERY)
    }
}
