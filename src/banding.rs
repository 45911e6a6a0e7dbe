//! # Distance Banding
//!
//! Histogram of trip lengths in fixed-width bands.
//!
//! With `bandwidth = 1` and `max_distance = 5` the bands are:
//!
//! | index | range | printed upper bound |
//! |-------|-------|---------------------|
//! | 0 | `(0, 1)` | `1.0` |
//! | 1 | `[1, 2)` | `2.0` |
//! | ... | | |
//! | 4 | `[4, 5)` | `5.0` |
//! | 5 | `[5, ∞)` up to the sanity limit | `Infinity` |
//!
//! Histograms are plain counts and merge by addition, so partial histograms
//! from any number of workers combine into the same final result.

use log::{debug, info};

use crate::error::{ensure, Result};
use crate::geo_utils::DistanceUnit;
use crate::Trip;

/// Upper limit on the number of bands, including the open-ended last one.
pub const MAX_BANDS: usize = 100_000;

/// Histogram shape and trip pre-filter.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BandConfig {
    /// Width of each band. Default: 1.0
    pub bandwidth: f64,
    /// Lower edge of the open-ended last band. Must be a multiple of `bandwidth`. Default: 100.0
    pub max_distance: f64,
    /// Distances above this are rejected outright. Default: 200.0
    pub sanity_limit: f64,
    /// Trips shorter than this (in `unit`) are skipped. Default: 0.01
    pub min_trip_distance: f64,
    /// Trips averaging faster than this are skipped (km/h). Default: 160
    pub max_speed_kmh: f64,
    /// Default: Kilometers
    pub unit: DistanceUnit,
}

impl Default for BandConfig {
    fn default() -> Self {
        Self {
            bandwidth: 1.0,
            max_distance: 100.0,
            sanity_limit: 200.0,
            min_trip_distance: 0.01,
            max_speed_kmh: 160.0,
            unit: DistanceUnit::Kilometers,
        }
    }
}

impl BandConfig {
    pub fn validate(&self) -> Result<()> {
        ensure(self.bandwidth.is_finite() && self.bandwidth > 0.0, || {
            format!("bandwidth must be positive, got {}", self.bandwidth)
        })?;
        ensure(self.max_distance.is_finite() && self.max_distance > 0.0, || {
            format!("max_distance must be positive, got {}", self.max_distance)
        })?;

        let ratio = self.max_distance / self.bandwidth;
        let whole = ratio.round();
        ensure(whole >= 1.0 && (ratio - whole).abs() <= 1e-9 * whole, || {
            format!(
                "max_distance {} is not a multiple of bandwidth {}",
                self.max_distance, self.bandwidth
            )
        })?;
        ensure(whole < MAX_BANDS as f64, || {
            format!("max_distance / bandwidth = {whole} needs more than {MAX_BANDS} bands")
        })?;

        ensure(self.sanity_limit.is_finite() && self.sanity_limit > 0.0, || {
            format!("sanity_limit must be positive, got {}", self.sanity_limit)
        })?;
        ensure(self.min_trip_distance >= 0.0, || {
            format!("min_trip_distance must be >= 0, got {}", self.min_trip_distance)
        })?;
        ensure(self.max_speed_kmh.is_finite() && self.max_speed_kmh > 0.0, || {
            format!("max_speed_kmh must be positive, got {}", self.max_speed_kmh)
        })
    }
}

/// Per-band trip counts. Combine partial histograms with [`BandHistogram::merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandHistogram {
    counts: Vec<u64>,
}

impl BandHistogram {
    /// All-zero histogram with `bands` bands.
    pub fn new(bands: usize) -> Self {
        Self { counts: vec![0; bands] }
    }

    pub fn record(&mut self, band: usize) {
        if let Some(count) = self.counts.get_mut(band) {
            *count += 1;
        }
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Add another histogram of the same shape into this one.
    pub fn merge(&mut self, other: &BandHistogram) -> Result<()> {
        ensure(self.counts.len() == other.counts.len(), || {
            format!(
                "cannot merge histograms with {} and {} bands",
                self.counts.len(),
                other.counts.len()
            )
        })?;
        for (mine, theirs) in self.counts.iter_mut().zip(&other.counts) {
            *mine += theirs;
        }
        Ok(())
    }
}

/// Assigns distances and trips to bands.
#[derive(Debug, Clone)]
pub struct DistanceBander {
    config: BandConfig,
    limits: Vec<f64>,
}

impl DistanceBander {
    /// Validate the config and lay out band limits.
    ///
    /// # Example
    /// ```
    /// use cab_trips::{BandConfig, DistanceBander};
    ///
    /// let bander = DistanceBander::new(BandConfig {
    ///     bandwidth: 1.0,
    ///     max_distance: 5.0,
    ///     ..Default::default()
    /// })
    /// .unwrap();
    /// assert_eq!(bander.num_bands(), 6);
    /// assert_eq!(bander.band_index(0.5), Some(0));
    /// assert_eq!(bander.band_index(4.2), Some(4));
    /// assert_eq!(bander.band_index(42.0), Some(5));
    /// assert_eq!(bander.band_index(0.0), None);
    /// assert_eq!(bander.band_index(250.0), None);
    /// ```
    pub fn new(config: BandConfig) -> Result<Self> {
        config.validate()?;
        let num_bands = (config.max_distance / config.bandwidth).round() as usize + 1;
        // Clamp so float drift cannot push an inner limit past max_distance
        let mut limits: Vec<f64> = (1..num_bands)
            .map(|i| (config.bandwidth * i as f64).min(config.max_distance))
            .collect();
        limits.push(config.max_distance);
        debug!(
            "[Bander] {} bands of {} {}, sanity limit {}",
            num_bands, config.bandwidth, config.unit, config.sanity_limit
        );
        Ok(Self { config, limits })
    }

    pub fn config(&self) -> &BandConfig {
        &self.config
    }

    pub fn num_bands(&self) -> usize {
        self.limits.len()
    }

    /// Printed upper bound of a band; `None` for the open-ended last band.
    pub fn upper_bound(&self, band: usize) -> Option<f64> {
        if band + 1 >= self.limits.len() {
            None
        } else {
            Some(self.limits[band])
        }
    }

    /// Band for a distance, or `None` when the distance is rejected
    /// (not positive, not finite, or above the sanity limit).
    ///
    /// Non-decreasing in `d` over `(0, sanity_limit]`.
    pub fn band_index(&self, d: f64) -> Option<usize> {
        if !d.is_finite() || d <= 0.0 || d > self.config.sanity_limit {
            return None;
        }
        let last = self.limits.len() - 1;
        if d >= self.limits[last] {
            return Some(last);
        }
        // First band whose upper limit exceeds d
        Some(self.limits.partition_point(|&limit| limit <= d))
    }

    /// Band for a finished trip, using the straight-line distance from its
    /// first start to its last end. Short, instantaneous or implausibly fast
    /// trips are skipped.
    pub fn band_trip(&self, trip: &Trip) -> Option<usize> {
        let d = trip.summary_distance(self.config.unit);
        if d < self.config.min_trip_distance {
            return None;
        }
        let duration = trip.duration_secs();
        if duration <= 0 {
            return None;
        }
        let kmh = 3600.0 * self.config.unit.convert(d, DistanceUnit::Kilometers) / duration as f64;
        if !kmh.is_finite() || kmh > self.config.max_speed_kmh {
            return None;
        }
        self.band_index(d)
    }

    /// Zeroed histogram shaped for this bander.
    pub fn histogram(&self) -> BandHistogram {
        BandHistogram::new(self.num_bands())
    }

    /// Histogram of a batch of trips.
    pub fn count_trips<'a, I>(&self, trips: I) -> BandHistogram
    where
        I: IntoIterator<Item = &'a Trip>,
    {
        let mut histogram = self.histogram();
        let mut skipped = 0u64;
        for trip in trips {
            match self.band_trip(trip) {
                Some(band) => histogram.record(band),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            debug!("[Bander] Skipped {} trips", skipped);
        }
        histogram
    }

    /// Output lines `upper_bound<TAB>count`, one per band, last band `Infinity`.
    pub fn format_histogram(&self, histogram: &BandHistogram) -> Vec<String> {
        let lines: Vec<String> = histogram
            .counts()
            .iter()
            .enumerate()
            .map(|(band, count)| match self.upper_bound(band) {
                Some(upper) => format!("{upper:?}\t{count}"),
                None => format!("Infinity\t{count}"),
            })
            .collect();
        info!("[Bander] {} trips across {} bands", histogram.total(), lines.len());
        lines
    }
}
