//! Integer high dynamic range histogram.

use tracing::debug;

use crate::{
    bucket::Geometry,
    builder::HistogramBuilder,
    iteration::{HistogramIter, IterationMode},
    ConfigError, QueryError, RecordError,
};

/// A high dynamic range histogram over unsigned integer values.
///
/// Values are counted in slots whose width grows with the magnitude of the value, such that any
/// value can be reported back with a relative error no larger than `10^-significant_digits`.
/// Recording a value is a constant-time operation that never allocates, unless the histogram is
/// auto-resizing and the value is beyond the currently covered range.
///
/// All recording and merging operations are all-or-nothing: when an error is returned, the
/// histogram is left exactly as it was.
#[derive(Debug, Clone)]
pub struct Histogram {
    geometry: Geometry,
    auto_resize: bool,
    counts: Vec<u64>,
    total_count: u64,
    // Raw extrema of recorded values, `0` and `u64::MAX` when empty.
    max_value: u64,
    min_non_zero_value: u64,
    start_timestamp: Option<u64>,
    end_timestamp: Option<u64>,
    tag: Option<String>,
}

impl Histogram {
    /// Creates a new, auto-resizing `Histogram`.
    ///
    /// The histogram starts out covering `[1, 2]` and grows as larger values are recorded.
    ///
    /// # Errors
    ///
    /// If `significant_digits` is not between 1 and 5, an error is returned.
    pub fn new(significant_digits: u8) -> Result<Histogram, ConfigError> {
        let geometry = Geometry::new(1, 2, significant_digits)?;
        Ok(Histogram::from_geometry(geometry, true))
    }

    /// Creates a new `Histogram` tracking values between 1 and `highest_trackable_value`.
    ///
    /// # Errors
    ///
    /// If the parameters do not describe a valid geometry, an error is returned.
    pub fn new_with_max(
        highest_trackable_value: u64,
        significant_digits: u8,
    ) -> Result<Histogram, ConfigError> {
        Histogram::new_with_bounds(1, highest_trackable_value, significant_digits)
    }

    /// Creates a new `Histogram` tracking values between `lowest_discernible_value` and
    /// `highest_trackable_value`.
    ///
    /// Values below `lowest_discernible_value` are still recorded, but are not distinguished from
    /// zero.
    ///
    /// # Errors
    ///
    /// If the parameters do not describe a valid geometry, an error is returned.
    pub fn new_with_bounds(
        lowest_discernible_value: u64,
        highest_trackable_value: u64,
        significant_digits: u8,
    ) -> Result<Histogram, ConfigError> {
        let geometry =
            Geometry::new(lowest_discernible_value, highest_trackable_value, significant_digits)?;
        Ok(Histogram::from_geometry(geometry, false))
    }

    /// Creates an empty `Histogram` with the same configuration, timestamps and tag as `other`.
    pub fn new_from(other: &Histogram) -> Histogram {
        let mut histogram = Histogram::from_geometry(other.geometry, other.auto_resize);
        histogram.start_timestamp = other.start_timestamp;
        histogram.end_timestamp = other.end_timestamp;
        histogram.tag = other.tag.clone();
        histogram
    }

    /// Creates a [`HistogramBuilder`] for configuring a `Histogram`.
    pub fn builder() -> HistogramBuilder {
        HistogramBuilder::new()
    }

    pub(crate) fn from_geometry(geometry: Geometry, auto_resize: bool) -> Histogram {
        Histogram {
            geometry,
            auto_resize,
            counts: vec![0; geometry.counts_len()],
            total_count: 0,
            max_value: 0,
            min_non_zero_value: u64::MAX,
            start_timestamp: None,
            end_timestamp: None,
            tag: None,
        }
    }

    /// Gets the bucket geometry.
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Gets the number of significant decimal digits of precision.
    pub fn significant_digits(&self) -> u8 {
        self.geometry.significant_digits()
    }

    /// Gets the lowest value that can be discerned from zero.
    pub fn lowest_discernible_value(&self) -> u64 {
        self.geometry.lowest_discernible_value()
    }

    /// Gets the highest value that can currently be recorded without resizing.
    pub fn highest_trackable_value(&self) -> u64 {
        self.geometry.highest_trackable_value()
    }

    /// Whether or not the histogram grows to cover values beyond its highest trackable value.
    pub fn is_auto_resize(&self) -> bool {
        self.auto_resize
    }

    /// Sets whether or not the histogram grows to cover values beyond its highest trackable value.
    pub fn set_auto_resize(&mut self, auto_resize: bool) {
        self.auto_resize = auto_resize;
    }

    /// Gets the total number of recorded samples.
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    /// Gets the total number of recorded samples.
    pub fn len(&self) -> u64 {
        self.total_count
    }

    /// Returns `true` if no samples have been recorded.
    pub fn is_empty(&self) -> bool {
        self.total_count == 0
    }

    /// Gets the number of slots in the counts array.
    pub fn distinct_values(&self) -> usize {
        self.counts.len()
    }

    /// Gets the counts array.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Gets the count held by the slot at `index`.
    pub fn count_at_index(&self, index: usize) -> Option<u64> {
        self.counts.get(index).copied()
    }

    /// Gets the start timestamp, in milliseconds since the Unix epoch.
    pub fn start_timestamp(&self) -> Option<u64> {
        self.start_timestamp
    }

    /// Sets the start timestamp, in milliseconds since the Unix epoch.
    pub fn set_start_timestamp(&mut self, timestamp: u64) {
        self.start_timestamp = Some(timestamp);
    }

    /// Gets the end timestamp, in milliseconds since the Unix epoch.
    pub fn end_timestamp(&self) -> Option<u64> {
        self.end_timestamp
    }

    /// Sets the end timestamp, in milliseconds since the Unix epoch.
    pub fn set_end_timestamp(&mut self, timestamp: u64) {
        self.end_timestamp = Some(timestamp);
    }

    /// Gets the tag.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Sets the tag, or clears it when `None`.
    pub fn set_tag(&mut self, tag: Option<String>) {
        self.tag = tag;
    }

    /// Records a single sample.
    ///
    /// # Errors
    ///
    /// If `value` is larger than the highest trackable value and the histogram is not
    /// auto-resizing, or if the total count would overflow, an error is returned.
    pub fn record_value(&mut self, value: u64) -> Result<(), RecordError> {
        self.record_value_with_count(value, 1)
    }

    /// Records `count` samples of `value`.
    ///
    /// Recording a count of zero does nothing beyond validating `value`.
    ///
    /// # Errors
    ///
    /// If `value` is larger than the highest trackable value and the histogram is not
    /// auto-resizing, or if the total count would overflow, an error is returned.
    pub fn record_value_with_count(&mut self, value: u64, count: u64) -> Result<(), RecordError> {
        let total_count = self.checked_total(count)?;
        self.ensure_covers(value)?;
        if count > 0 {
            self.increment_value(value, count);
            self.total_count = total_count;
        }
        Ok(())
    }

    /// Records a single sample, backfilling samples that were likely missed due to coordinated
    /// omission.
    ///
    /// When `value` is larger than `expected_interval`, the samples that would have been taken
    /// while waiting for `value` are synthesized: `value - expected_interval`,
    /// `value - 2 * expected_interval`, and so on, for as long as the synthesized value is at least
    /// `expected_interval`. An `expected_interval` of zero disables backfilling.
    ///
    /// # Errors
    ///
    /// If `value` is larger than the highest trackable value and the histogram is not
    /// auto-resizing, or if the total count would overflow, an error is returned.
    pub fn record_value_with_expected_interval(
        &mut self,
        value: u64,
        expected_interval: u64,
    ) -> Result<(), RecordError> {
        self.record_corrected(value, 1, expected_interval)
    }

    fn record_corrected(
        &mut self,
        value: u64,
        count: u64,
        expected_interval: u64,
    ) -> Result<(), RecordError> {
        let synthesized = synthesized_samples(value, expected_interval);
        let added = synthesized
            .checked_add(1)
            .and_then(|samples| samples.checked_mul(count))
            .ok_or(RecordError::CountOverflow { count: u64::MAX })?;
        let total_count = self.checked_total(added)?;
        self.ensure_covers(value)?;
        if count == 0 {
            return Ok(());
        }

        self.increment_value(value, count);
        let mut missing_value = value;
        for _ in 0..synthesized {
            missing_value -= expected_interval;
            self.increment_value(missing_value, count);
        }
        self.total_count = total_count;
        Ok(())
    }

    /// Merges the samples of `other` into this histogram.
    ///
    /// When both histograms share the same slot layout, counts are added slot by slot.
    /// Otherwise, each non-zero slot of `other` is re-recorded at the lowest value it represents.
    ///
    /// The earliest start timestamp and latest end timestamp are kept, and the tag of `other`
    /// replaces this histogram's tag when present.
    ///
    /// # Errors
    ///
    /// If `other` holds values beyond the highest trackable value of this histogram and this
    /// histogram is not auto-resizing, or if the total count would overflow, an error is returned.
    pub fn merge(&mut self, other: &Histogram) -> Result<(), RecordError> {
        let total_count = self.checked_total(other.total_count)?;
        if let Some(last_index) = other.last_non_zero_index() {
            self.ensure_covers(other.geometry.value_for(last_index))?;

            if self.geometry.is_index_compatible(&other.geometry) {
                for (index, &count) in other.counts.iter().enumerate().filter(|&(_, &c)| c > 0) {
                    self.counts[index] += count;
                }
                self.update_min_max(other.max_value);
                self.update_min_max(other.min_non_zero_value);
            } else {
                for (index, &count) in other.counts.iter().enumerate().filter(|&(_, &c)| c > 0) {
                    self.increment_value(other.geometry.value_for(index), count);
                }
            }
            self.total_count = total_count;
        }

        self.start_timestamp = match (self.start_timestamp, other.start_timestamp) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.end_timestamp = match (self.end_timestamp, other.end_timestamp) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        if other.tag.is_some() {
            self.tag = other.tag.clone();
        }

        Ok(())
    }

    /// Clears all recorded samples, timestamps and the tag.
    ///
    /// The geometry, including any growth from auto-resizing, is kept.
    pub fn reset(&mut self) {
        self.counts.iter_mut().for_each(|count| *count = 0);
        self.total_count = 0;
        self.max_value = 0;
        self.min_non_zero_value = u64::MAX;
        self.start_timestamp = None;
        self.end_timestamp = None;
        self.tag = None;
    }

    /// Creates a copy of this histogram corrected for coordinated omission.
    ///
    /// Every recorded slot is re-recorded as if by
    /// [`record_value_with_expected_interval`](Histogram::record_value_with_expected_interval).
    /// This is the post-recording alternative to recording with an expected interval, and the two
    /// should not be combined.
    ///
    /// # Errors
    ///
    /// If the total count of the corrected histogram would overflow, an error is returned.
    pub fn corrected_for_coordinated_omission(
        &self,
        expected_interval: u64,
    ) -> Result<Histogram, RecordError> {
        let mut corrected = Histogram::new_from(self);
        for (index, &count) in self.counts.iter().enumerate().filter(|&(_, &c)| c > 0) {
            corrected.record_corrected(self.geometry.value_for(index), count, expected_interval)?;
        }
        Ok(corrected)
    }

    /// Gets the value at the given percentile.
    ///
    /// The returned value is the highest value equivalent to the slot where the running count
    /// first reaches `percentile` percent of the total count.
    ///
    /// # Errors
    ///
    /// If `percentile` is not in `(0, 100]`, or the histogram is empty, an error is returned.
    pub fn value_at_percentile(&self, percentile: f64) -> Result<u64, QueryError> {
        let index = self.index_at_percentile(percentile)?;
        Ok(self.geometry.highest_equivalent(self.geometry.value_for(index)))
    }

    /// Gets the value at the given quantile, where `quantile` is in `(0, 1]`.
    ///
    /// # Errors
    ///
    /// If `quantile` is not in `(0, 1]`, or the histogram is empty, an error is returned.
    pub fn value_at_quantile(&self, quantile: f64) -> Result<u64, QueryError> {
        self.value_at_percentile(quantile * 100.0)
    }

    pub(crate) fn index_at_percentile(&self, percentile: f64) -> Result<usize, QueryError> {
        if !(percentile > 0.0 && percentile <= 100.0) {
            return Err(QueryError::PercentileOutOfRange(percentile));
        }
        if self.total_count == 0 {
            return Err(QueryError::Empty);
        }

        // Nudge the percentile down by one ulp so that exact products are not rounded up a slot.
        let requested = f64::from_bits(percentile.to_bits() - 1);
        let target = ((requested / 100.0) * self.total_count as f64).ceil() as u64;
        let target = target.clamp(1, self.total_count);

        let mut running_count = 0;
        for (index, &count) in self.counts.iter().enumerate() {
            running_count += count;
            if running_count >= target {
                return Ok(index);
            }
        }

        Err(QueryError::Empty)
    }

    /// Gets the percentage of samples that are less than or equivalent to `value`.
    ///
    /// An empty histogram reports 100.
    pub fn percentile_below(&self, value: u64) -> f64 {
        if self.total_count == 0 {
            return 100.0;
        }

        let index = self.clamped_index(value);
        let below: u64 = self.counts[..=index].iter().sum();
        100.0 * below as f64 / self.total_count as f64
    }

    /// Gets the number of samples equivalent to `value`.
    pub fn count_at_value(&self, value: u64) -> u64 {
        self.counts[self.clamped_index(value)]
    }

    /// Gets the number of samples between `low` and `high`, inclusive of both of their equivalent
    /// ranges.
    pub fn count_between(&self, low: u64, high: u64) -> u64 {
        let low_index = self.clamped_index(low);
        let high_index = self.clamped_index(high);
        if low_index > high_index {
            return 0;
        }
        self.counts[low_index..=high_index].iter().sum()
    }

    /// Gets the mean of all recorded samples, using the median equivalent value of every slot.
    ///
    /// An empty histogram reports 0.
    pub fn mean(&self) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }

        let total: f64 = self
            .recorded_slots()
            .map(|(value, count)| self.geometry.median_equivalent(value) as f64 * count as f64)
            .sum();
        total / self.total_count as f64
    }

    /// Gets the population standard deviation of all recorded samples, using the median equivalent
    /// value of every slot.
    ///
    /// An empty histogram reports 0.
    pub fn stdev(&self) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }

        let mean = self.mean();
        let geometric_deviation_total: f64 = self
            .recorded_slots()
            .map(|(value, count)| {
                let deviation = self.geometry.median_equivalent(value) as f64 - mean;
                deviation * deviation * count as f64
            })
            .sum();
        (geometric_deviation_total / self.total_count as f64).sqrt()
    }

    /// Gets the lowest recorded value, or 0 if the histogram is empty.
    pub fn min(&self) -> u64 {
        if self.total_count == 0 || self.counts[0] > 0 {
            0
        } else {
            self.min_nz()
        }
    }

    /// Gets the lowest recorded non-zero value, or `u64::MAX` if there is none.
    pub fn min_nz(&self) -> u64 {
        if self.min_non_zero_value == u64::MAX {
            u64::MAX
        } else {
            self.geometry.lowest_equivalent(self.min_non_zero_value)
        }
    }

    /// Gets the highest recorded value, or 0 if the histogram is empty.
    pub fn max(&self) -> u64 {
        if self.max_value == 0 {
            0
        } else {
            self.geometry.highest_equivalent(self.max_value)
        }
    }

    /// Gets the lowest value equivalent to `value`.
    pub fn lowest_equivalent(&self, value: u64) -> u64 {
        self.geometry.lowest_equivalent(value)
    }

    /// Gets the highest value equivalent to `value`.
    pub fn highest_equivalent(&self, value: u64) -> u64 {
        self.geometry.highest_equivalent(value)
    }

    /// Gets the value in the middle of the range of values equivalent to `value`.
    pub fn median_equivalent(&self, value: u64) -> u64 {
        self.geometry.median_equivalent(value)
    }

    /// Gets the next value that is not equivalent to `value`.
    pub fn next_non_equivalent(&self, value: u64) -> u64 {
        self.geometry.next_non_equivalent(value)
    }

    /// Gets the width of the range of values equivalent to `value`.
    pub fn equivalent_range(&self, value: u64) -> u64 {
        self.geometry.size_of_equivalent_range(value)
    }

    /// Whether or not two values are counted in the same slot.
    pub fn equivalent(&self, a: u64, b: u64) -> bool {
        self.geometry.values_are_equivalent(a, b)
    }

    /// Iterates over the histogram with the given traversal policy.
    pub fn iter(&self, mode: IterationMode) -> HistogramIter<'_> {
        HistogramIter::new(self, mode)
    }

    /// Iterates over every slot that holds samples.
    pub fn iter_recorded(&self) -> HistogramIter<'_> {
        self.iter(IterationMode::Recorded)
    }

    /// Iterates over every slot, whether or not it holds samples.
    pub fn iter_all(&self) -> HistogramIter<'_> {
        self.iter(IterationMode::All)
    }

    /// Iterates over the histogram in linear steps of `step` units.
    pub fn iter_linear(&self, step: u64) -> HistogramIter<'_> {
        self.iter(IterationMode::Linear { step })
    }

    /// Iterates over the histogram in logarithmically growing steps, starting with a step of
    /// `first_bucket` units and multiplying the step by `base` every time.
    pub fn iter_log(&self, first_bucket: u64, base: f64) -> HistogramIter<'_> {
        self.iter(IterationMode::Logarithmic { first_bucket, base })
    }

    /// Iterates over percentiles, taking `ticks_per_half_distance` steps for each halving of the
    /// distance to 100%.
    pub fn iter_percentiles(&self, ticks_per_half_distance: u32) -> HistogramIter<'_> {
        self.iter(IterationMode::Percentile { ticks_per_half_distance })
    }

    pub(crate) fn last_non_zero_index(&self) -> Option<usize> {
        self.counts.iter().rposition(|&count| count > 0)
    }

    /// Adds `count` samples directly to the slot at `index`.
    pub(crate) fn add_count_at_index(
        &mut self,
        index: usize,
        count: u64,
    ) -> Result<(), RecordError> {
        let total_count = self.checked_total(count)?;
        if index >= self.counts.len() {
            return Err(RecordError::ValueOutOfRange {
                value: self.geometry.value_for(index),
                highest: self.geometry.highest_trackable_value(),
            });
        }

        if count > 0 {
            self.counts[index] += count;
            self.total_count = total_count;
            self.update_min_max(self.geometry.value_for(index));
        }
        Ok(())
    }

    /// Grows the counts array in place to cover values up to `highest_trackable_value`.
    pub(crate) fn resize(&mut self, highest_trackable_value: u64) -> Result<(), ConfigError> {
        let geometry = self.geometry.resized(highest_trackable_value)?;
        if geometry.counts_len() > self.counts.len() {
            debug!(
                previous_len = self.counts.len(),
                new_len = geometry.counts_len(),
                highest_trackable_value,
                "Resizing histogram to cover larger values."
            );
            self.counts.resize(geometry.counts_len(), 0);
        }
        self.geometry = geometry;
        Ok(())
    }

    /// Creates a copy of this histogram with every recorded value multiplied by `2^shift`.
    ///
    /// Returns `None` if any recorded value would no longer be covered by the geometry.
    pub(crate) fn shifted_left(&self, shift: u32) -> Option<Histogram> {
        let mut shifted = Histogram::new_from(self);
        for (index, &count) in self.counts.iter().enumerate().filter(|&(_, &c)| c > 0) {
            let value = self.geometry.value_for(index);
            if value != 0 && value.leading_zeros() < shift {
                return None;
            }
            let new_index = self.geometry.index_of(value << shift)?;
            shifted.add_count_at_index(new_index, count).ok()?;
        }
        Some(shifted)
    }

    /// Creates a copy of this histogram with every recorded value divided by `2^shift`.
    ///
    /// Returns `None` if any recorded non-zero value would lose precision.
    pub(crate) fn shifted_right(&self, shift: u32) -> Option<Histogram> {
        let mut shifted = Histogram::new_from(self);
        for (index, &count) in self.counts.iter().enumerate().filter(|&(_, &c)| c > 0) {
            let value = self.geometry.value_for(index);
            if value != 0 && self.geometry.bucket_index(value) < shift {
                return None;
            }
            let new_index = self.geometry.index_of(value >> shift)?;
            shifted.add_count_at_index(new_index, count).ok()?;
        }
        Some(shifted)
    }

    fn recorded_slots(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count > 0)
            .map(move |(index, &count)| (self.geometry.value_for(index), count))
    }

    fn clamped_index(&self, value: u64) -> usize {
        self.geometry.counts_index(value).min(self.counts.len() - 1)
    }

    fn checked_total(&self, count: u64) -> Result<u64, RecordError> {
        self.total_count.checked_add(count).ok_or(RecordError::CountOverflow { count })
    }

    fn ensure_covers(&mut self, value: u64) -> Result<(), RecordError> {
        let highest = self.geometry.highest_trackable_value();
        if value <= highest {
            return Ok(());
        }
        if !self.auto_resize {
            return Err(RecordError::ValueOutOfRange { value, highest });
        }
        self.resize(value).map_err(|_| RecordError::ValueOutOfRange { value, highest })
    }

    // Callers must have checked coverage and the total count beforehand.
    #[inline]
    fn increment_value(&mut self, value: u64, count: u64) {
        let index = self.geometry.counts_index(value);
        self.counts[index] += count;
        self.update_min_max(value);
    }

    #[inline]
    fn update_min_max(&mut self, value: u64) {
        if value > self.max_value {
            self.max_value = value;
        }
        if value != 0 && value < self.min_non_zero_value {
            self.min_non_zero_value = value;
        }
    }
}

impl PartialEq for Histogram {
    fn eq(&self, other: &Histogram) -> bool {
        if self.geometry.lowest_discernible_value() != other.geometry.lowest_discernible_value()
            || self.geometry.significant_digits() != other.geometry.significant_digits()
            || self.total_count != other.total_count
            || self.max() != other.max()
            || self.min_nz() != other.min_nz()
        {
            return false;
        }

        let len = self.counts.len().max(other.counts.len());
        (0..len).all(|index| {
            self.count_at_index(index).unwrap_or(0) == other.count_at_index(index).unwrap_or(0)
        })
    }
}

/// Gets the number of samples synthesized when recording `value` with `expected_interval`.
fn synthesized_samples(value: u64, expected_interval: u64) -> u64 {
    if expected_interval == 0 || value / expected_interval < 2 {
        0
    } else {
        value / expected_interval - 1
    }
}
