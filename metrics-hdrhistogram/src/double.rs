//! Floating-point histogram with an auto-ranging window.

use tracing::debug;

use crate::{
    bucket::{sub_bucket_half_count_for, Geometry},
    builder::DoubleHistogramBuilder,
    iteration::{DoubleHistogramIter, IterationMode},
    ConfigError, Histogram, QueryError, RecordError,
};

/// A high dynamic range histogram over non-negative floating-point values.
///
/// The histogram tracks a window of values, `[lowest, lowest * ratio)`, whose width is fixed by the
/// configured highest-to-lowest value ratio.  Values are scaled by a power of two into an inner
/// integer [`Histogram`], so scaling never loses precision.
///
/// The window is not fixed in place: whenever a value falls outside of it, the window slides by
/// a power of two so that the value is covered, re-recording already recorded samples at the new
/// scale.  If the recorded samples cannot be re-recorded without losing precision, an
/// auto-resizing histogram widens its window instead, while a fixed-range histogram rejects the
/// value.
///
/// Like the integer histogram, every operation is all-or-nothing: a failed operation leaves the
/// histogram exactly as it was.
#[derive(Debug, Clone)]
pub struct DoubleHistogram {
    integer: Histogram,
    configured_ratio: u64,
    auto_resize: bool,
    current_lowest_value_in_auto_range: f64,
    current_highest_value_limit_in_auto_range: f64,
    integer_to_double_ratio: f64,
    double_to_integer_ratio: f64,
}

/// A candidate auto-range window, committed only once a record into it has succeeded.
struct Window {
    lowest: f64,
    highest_limit: f64,
    configured_ratio: u64,
    // Replacement for the inner histogram, if the samples had to be moved.
    integer: Option<Histogram>,
}

impl DoubleHistogram {
    /// Creates a new, auto-resizing `DoubleHistogram`.
    ///
    /// The histogram starts out with a highest-to-lowest value ratio of 2, and widens as needed.
    ///
    /// # Errors
    ///
    /// If `significant_digits` is not between 1 and 5, an error is returned.
    pub fn new(significant_digits: u8) -> Result<DoubleHistogram, ConfigError> {
        DoubleHistogram::with_configured_ratio(2, significant_digits, true)
    }

    /// Creates a new `DoubleHistogram` with a fixed dynamic range.
    ///
    /// Any value `v` can be recorded as long as every other recorded value lies within
    /// `[v / ratio, v * ratio]`.
    ///
    /// # Errors
    ///
    /// If `significant_digits` is not between 1 and 5, `ratio` is less than 2, or `ratio` is too
    /// large to represent with the requested precision, an error is returned.
    pub fn with_highest_to_lowest_value_ratio(
        ratio: u64,
        significant_digits: u8,
    ) -> Result<DoubleHistogram, ConfigError> {
        if !(1..=5).contains(&significant_digits) {
            return Err(ConfigError::SignificantDigits(significant_digits));
        }
        // The ratio times the precision must fit in 61 bits, to leave room for value shifts.
        let precision = 10u128.pow(u32::from(significant_digits));
        if ratio >= 2 && u128::from(ratio) * precision >= 1 << 61 {
            return Err(ConfigError::RatioTooLarge { ratio, digits: significant_digits });
        }
        DoubleHistogram::with_configured_ratio(ratio, significant_digits, false)
    }

    /// Creates a [`DoubleHistogramBuilder`] for configuring a `DoubleHistogram`.
    pub fn builder() -> DoubleHistogramBuilder {
        DoubleHistogramBuilder::new()
    }

    pub(crate) fn with_configured_ratio(
        configured_ratio: u64,
        significant_digits: u8,
        auto_resize: bool,
    ) -> Result<DoubleHistogram, ConfigError> {
        let geometry = integer_geometry(configured_ratio, significant_digits)?;
        let integer = Histogram::from_geometry(geometry, false);
        let mut histogram = DoubleHistogram {
            integer,
            configured_ratio,
            auto_resize,
            current_lowest_value_in_auto_range: 0.0,
            current_highest_value_limit_in_auto_range: 0.0,
            integer_to_double_ratio: 0.0,
            double_to_integer_ratio: 0.0,
        };
        histogram.reset_window();
        Ok(histogram)
    }

    /// Gets the configured highest-to-lowest value ratio.
    ///
    /// Grows whenever an auto-resizing histogram widens its window.
    pub fn highest_to_lowest_value_ratio(&self) -> u64 {
        self.configured_ratio
    }

    /// Gets the number of significant decimal digits of precision.
    pub fn significant_digits(&self) -> u8 {
        self.integer.significant_digits()
    }

    /// Whether or not the histogram widens its window when samples cannot be re-recorded.
    pub fn is_auto_resize(&self) -> bool {
        self.auto_resize
    }

    /// Sets whether or not the histogram widens its window when samples cannot be re-recorded.
    pub fn set_auto_resize(&mut self, auto_resize: bool) {
        self.auto_resize = auto_resize;
    }

    /// Gets the lowest value of the current window.
    pub fn current_lowest_value_in_auto_range(&self) -> f64 {
        self.current_lowest_value_in_auto_range
    }

    /// Gets the exclusive upper limit of the current window.
    pub fn current_highest_value_limit_in_auto_range(&self) -> f64 {
        self.current_highest_value_limit_in_auto_range
    }

    /// Gets the factor converting inner integer values into floating-point values.
    pub fn integer_to_double_ratio(&self) -> f64 {
        self.integer_to_double_ratio
    }

    /// Gets the factor converting floating-point values into inner integer values.
    pub fn double_to_integer_ratio(&self) -> f64 {
        self.double_to_integer_ratio
    }

    /// Gets the inner integer histogram.
    pub fn integer_histogram(&self) -> &Histogram {
        &self.integer
    }

    /// Gets the total number of recorded samples.
    pub fn total_count(&self) -> u64 {
        self.integer.total_count()
    }

    /// Returns `true` if no samples have been recorded.
    pub fn is_empty(&self) -> bool {
        self.integer.is_empty()
    }

    /// Gets the start timestamp, in milliseconds since the Unix epoch.
    pub fn start_timestamp(&self) -> Option<u64> {
        self.integer.start_timestamp()
    }

    /// Sets the start timestamp, in milliseconds since the Unix epoch.
    pub fn set_start_timestamp(&mut self, timestamp: u64) {
        self.integer.set_start_timestamp(timestamp);
    }

    /// Gets the end timestamp, in milliseconds since the Unix epoch.
    pub fn end_timestamp(&self) -> Option<u64> {
        self.integer.end_timestamp()
    }

    /// Sets the end timestamp, in milliseconds since the Unix epoch.
    pub fn set_end_timestamp(&mut self, timestamp: u64) {
        self.integer.set_end_timestamp(timestamp);
    }

    /// Gets the tag.
    pub fn tag(&self) -> Option<&str> {
        self.integer.tag()
    }

    /// Sets the tag, or clears it when `None`.
    pub fn set_tag(&mut self, tag: Option<String>) {
        self.integer.set_tag(tag);
    }

    /// Records a single sample.
    ///
    /// # Errors
    ///
    /// If `value` is negative or not finite, cannot be brought into the window, or the total
    /// count would overflow, an error is returned.
    pub fn record_value(&mut self, value: f64) -> Result<(), RecordError> {
        self.record_value_with_count(value, 1)
    }

    /// Records `count` samples of `value`.
    ///
    /// # Errors
    ///
    /// If `value` is negative or not finite, cannot be brought into the window, or the total
    /// count would overflow, an error is returned.
    pub fn record_value_with_count(&mut self, value: f64, count: u64) -> Result<(), RecordError> {
        if !value.is_finite() {
            return Err(RecordError::NonFiniteValue(value));
        }
        if value < 0.0 {
            return Err(RecordError::NegativeValue(value));
        }

        if value == 0.0 || self.in_window(value) {
            let integer_value = (value * self.double_to_integer_ratio) as u64;
            return self.integer.record_value_with_count(integer_value, count);
        }

        let window = self.adjusted_window(value)?;
        let integer_value = (value * (self.half_count() / window.lowest)) as u64;
        match window.integer {
            Some(mut integer) => {
                integer.record_value_with_count(integer_value, count)?;
                self.integer = integer;
            }
            None => self.integer.record_value_with_count(integer_value, count)?,
        }

        debug!(
            lowest = window.lowest,
            highest_limit = window.highest_limit,
            configured_ratio = window.configured_ratio,
            "Moved auto-range window to cover {}.",
            value
        );
        self.configured_ratio = window.configured_ratio;
        self.set_trackable_value_range(window.lowest, window.highest_limit);
        Ok(())
    }

    /// Records a single sample, backfilling samples that were likely missed due to coordinated
    /// omission.
    ///
    /// When `value` is larger than `expected_interval`, the samples `value - expected_interval`,
    /// `value - 2 * expected_interval`, and so on are synthesized for as long as they are at least
    /// `expected_interval`.  An `expected_interval` that is not positive disables backfilling.
    ///
    /// # Errors
    ///
    /// If any of the values cannot be recorded, or `expected_interval` is not finite, an error is
    /// returned.
    pub fn record_value_with_expected_interval(
        &mut self,
        value: f64,
        expected_interval: f64,
    ) -> Result<(), RecordError> {
        self.record_corrected(value, 1, expected_interval)
    }

    fn record_corrected(
        &mut self,
        value: f64,
        count: u64,
        expected_interval: f64,
    ) -> Result<(), RecordError> {
        if !expected_interval.is_finite() {
            return Err(RecordError::NonFiniteValue(expected_interval));
        }
        if expected_interval <= 0.0 || !(value - expected_interval >= expected_interval) {
            return self.record_value_with_count(value, count);
        }
        if !value.is_finite() {
            return Err(RecordError::NonFiniteValue(value));
        }

        let mut synthesized = 0u64;
        let mut lowest_missing_value = value;
        let mut missing_value = value - expected_interval;
        while missing_value >= expected_interval {
            synthesized += 1;
            lowest_missing_value = missing_value;
            missing_value -= expected_interval;
        }
        let added = synthesized
            .checked_add(1)
            .and_then(|samples| samples.checked_mul(count))
            .ok_or(RecordError::CountOverflow { count: u64::MAX })?;
        if self.integer.total_count().checked_add(added).is_none() {
            return Err(RecordError::CountOverflow { count: added });
        }

        if self.in_window(lowest_missing_value) && self.in_window(value) {
            // Every sample maps into the inner histogram as it is, so nothing below can fail.
            let ratio = self.double_to_integer_ratio;
            self.integer.record_value_with_count((value * ratio) as u64, count)?;
            let mut missing_value = value - expected_interval;
            while missing_value >= expected_interval {
                self.integer.record_value_with_count((missing_value * ratio) as u64, count)?;
                missing_value -= expected_interval;
            }
            return Ok(());
        }

        // Moving the window may still fail for a later sample, so stage the samples on a copy.
        let mut staged = self.clone();
        staged.record_value_with_count(value, count)?;
        let mut missing_value = value - expected_interval;
        while missing_value >= expected_interval {
            staged.record_value_with_count(missing_value, count)?;
            missing_value -= expected_interval;
        }
        *self = staged;
        Ok(())
    }

    /// Merges the samples of `other` into this histogram.
    ///
    /// Every non-zero slot of `other` is re-recorded at the lowest value it represents, moving or
    /// widening the window as needed.  Timestamps and tag combine as for [`Histogram::merge`].
    ///
    /// # Errors
    ///
    /// If any of the samples of `other` cannot be recorded, an error is returned.
    pub fn merge(&mut self, other: &DoubleHistogram) -> Result<(), RecordError> {
        let mut staged = self.clone();
        for (value, count) in other.recorded_slots() {
            staged.record_value_with_count(value, count)?;
        }

        // Counts are already in place, so only the timestamps and tag remain to be combined.
        staged.integer.merge(&Histogram::new_from(&other.integer))?;
        *self = staged;
        Ok(())
    }

    /// Clears all recorded samples, timestamps and the tag.
    ///
    /// The window is reset to its initial position, while any widening is kept.
    pub fn reset(&mut self) {
        self.integer.reset();
        self.reset_window();
    }

    /// Creates a copy of this histogram corrected for coordinated omission.
    ///
    /// See [`Histogram::corrected_for_coordinated_omission`].
    ///
    /// # Errors
    ///
    /// If any of the corrected samples cannot be recorded, or `expected_interval` is not finite, an
    /// error is returned.
    pub fn corrected_for_coordinated_omission(
        &self,
        expected_interval: f64,
    ) -> Result<DoubleHistogram, RecordError> {
        let mut corrected = self.clone();
        corrected.integer = Histogram::new_from(&self.integer);
        for (value, count) in self.recorded_slots() {
            corrected.record_corrected(value, count, expected_interval)?;
        }
        Ok(corrected)
    }

    /// Gets the value at the given percentile.
    ///
    /// # Errors
    ///
    /// If `percentile` is not in `(0, 100]`, or the histogram is empty, an error is returned.
    pub fn value_at_percentile(&self, percentile: f64) -> Result<f64, QueryError> {
        self.integer
            .value_at_percentile(percentile)
            .map(|value| value as f64 * self.integer_to_double_ratio)
    }

    /// Gets the value at the given quantile, where `quantile` is in `(0, 1]`.
    ///
    /// # Errors
    ///
    /// If `quantile` is not in `(0, 1]`, or the histogram is empty, an error is returned.
    pub fn value_at_quantile(&self, quantile: f64) -> Result<f64, QueryError> {
        self.value_at_percentile(quantile * 100.0)
    }

    /// Gets the percentage of samples that are less than or equivalent to `value`.
    pub fn percentile_below(&self, value: f64) -> f64 {
        self.integer.percentile_below(self.to_integer(value))
    }

    /// Gets the number of samples equivalent to `value`.
    pub fn count_at_value(&self, value: f64) -> u64 {
        self.integer.count_at_value(self.to_integer(value))
    }

    /// Gets the number of samples between `low` and `high`, inclusive of both of their equivalent
    /// ranges.
    pub fn count_between(&self, low: f64, high: f64) -> u64 {
        self.integer.count_between(self.to_integer(low), self.to_integer(high))
    }

    /// Gets the mean of all recorded samples, or 0 if the histogram is empty.
    pub fn mean(&self) -> f64 {
        self.integer.mean() * self.integer_to_double_ratio
    }

    /// Gets the population standard deviation of all recorded samples, or 0 if the histogram is
    /// empty.
    pub fn stdev(&self) -> f64 {
        self.integer.stdev() * self.integer_to_double_ratio
    }

    /// Gets the lowest recorded value, or 0 if the histogram is empty.
    pub fn min(&self) -> f64 {
        self.integer.min() as f64 * self.integer_to_double_ratio
    }

    /// Gets the lowest recorded non-zero value, or infinity if there is none.
    pub fn min_nz(&self) -> f64 {
        match self.integer.min_nz() {
            u64::MAX => f64::INFINITY,
            value => value as f64 * self.integer_to_double_ratio,
        }
    }

    /// Gets the highest recorded value, or 0 if the histogram is empty.
    pub fn max(&self) -> f64 {
        self.integer.max() as f64 * self.integer_to_double_ratio
    }

    /// Gets the lowest value equivalent to `value`.
    pub fn lowest_equivalent(&self, value: f64) -> f64 {
        self.integer.lowest_equivalent(self.to_integer(value)) as f64 * self.integer_to_double_ratio
    }

    /// Gets the highest value equivalent to `value`.
    ///
    /// This is the largest floating-point value below
    /// [`next_non_equivalent`](DoubleHistogram::next_non_equivalent).
    pub fn highest_equivalent(&self, value: f64) -> f64 {
        let next_non_equivalent = self.next_non_equivalent(value);
        // The ulp may change size right at the boundary, so step down by two and walk back up.
        let mut highest = next_non_equivalent - 2.0 * ulp(next_non_equivalent);
        while highest + ulp(highest) < next_non_equivalent {
            highest += ulp(highest);
        }
        highest
    }

    /// Gets the value in the middle of the range of values equivalent to `value`.
    pub fn median_equivalent(&self, value: f64) -> f64 {
        self.integer.median_equivalent(self.to_integer(value)) as f64 * self.integer_to_double_ratio
    }

    /// Gets the next value that is not equivalent to `value`.
    pub fn next_non_equivalent(&self, value: f64) -> f64 {
        self.integer.next_non_equivalent(self.to_integer(value)) as f64
            * self.integer_to_double_ratio
    }

    /// Gets the width of the range of values equivalent to `value`.
    pub fn equivalent_range(&self, value: f64) -> f64 {
        self.integer.equivalent_range(self.to_integer(value)) as f64 * self.integer_to_double_ratio
    }

    /// Whether or not two values are counted in the same slot.
    pub fn equivalent(&self, a: f64, b: f64) -> bool {
        self.lowest_equivalent(a) == self.lowest_equivalent(b)
    }

    /// Iterates over the histogram with the given traversal policy.
    ///
    /// Step sizes of linear and logarithmic policies are expressed in inner integer units; prefer
    /// [`iter_linear`](DoubleHistogram::iter_linear) and [`iter_log`](DoubleHistogram::iter_log)
    /// to express them as floating-point values.
    pub fn iter(&self, mode: IterationMode) -> DoubleHistogramIter<'_> {
        DoubleHistogramIter::new(self.integer.iter(mode), self.integer_to_double_ratio)
    }

    /// Iterates over every slot that holds samples.
    pub fn iter_recorded(&self) -> DoubleHistogramIter<'_> {
        self.iter(IterationMode::Recorded)
    }

    /// Iterates over every slot, whether or not it holds samples.
    pub fn iter_all(&self) -> DoubleHistogramIter<'_> {
        self.iter(IterationMode::All)
    }

    /// Iterates over the histogram in linear steps of `step`.
    pub fn iter_linear(&self, step: f64) -> DoubleHistogramIter<'_> {
        self.iter(IterationMode::Linear { step: self.to_integer(step) })
    }

    /// Iterates over the histogram in logarithmically growing steps, starting with a step of
    /// `first_bucket` and multiplying the step by `base` every time.
    pub fn iter_log(&self, first_bucket: f64, base: f64) -> DoubleHistogramIter<'_> {
        self.iter(IterationMode::Logarithmic { first_bucket: self.to_integer(first_bucket), base })
    }

    /// Iterates over percentiles, taking `ticks_per_half_distance` steps for each halving of the
    /// distance to 100%.
    pub fn iter_percentiles(&self, ticks_per_half_distance: u32) -> DoubleHistogramIter<'_> {
        self.iter(IterationMode::Percentile { ticks_per_half_distance })
    }

    /// Rebuilds a histogram from its encoded parts.
    ///
    /// `integer` must have been produced by a histogram with the same precision and a configured
    /// ratio no larger than `configured_ratio`.
    pub(crate) fn from_parts(
        configured_ratio: u64,
        auto_resize: bool,
        current_lowest_value_in_auto_range: f64,
        integer: &Histogram,
    ) -> Result<DoubleHistogram, ConfigError> {
        let mut histogram = DoubleHistogram::with_configured_ratio(
            configured_ratio,
            integer.significant_digits(),
            auto_resize,
        )?;
        let range_error = ConfigError::RatioTooLarge {
            ratio: configured_ratio,
            digits: integer.significant_digits(),
        };
        if !histogram.integer.geometry().is_index_compatible(integer.geometry()) {
            return Err(range_error);
        }
        histogram.integer.merge(integer).map_err(|_| range_error)?;

        let lowest = current_lowest_value_in_auto_range;
        let highest_limit = lowest * histogram.internal_ratio();
        if !is_usable_ratio(histogram.half_count() / lowest) || !highest_limit.is_finite() {
            return Err(range_error);
        }
        histogram.set_trackable_value_range(lowest, highest_limit);
        Ok(histogram)
    }

    fn recorded_slots(&self) -> impl Iterator<Item = (f64, u64)> + '_ {
        let geometry = self.integer.geometry();
        self.integer
            .counts()
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count > 0)
            .map(move |(index, &count)| {
                (geometry.value_for(index) as f64 * self.integer_to_double_ratio, count)
            })
    }

    fn in_window(&self, value: f64) -> bool {
        value >= self.current_lowest_value_in_auto_range
            && value < self.current_highest_value_limit_in_auto_range
    }

    fn to_integer(&self, value: f64) -> u64 {
        (value * self.double_to_integer_ratio) as u64
    }

    fn half_count(&self) -> f64 {
        f64::from(self.integer.geometry().sub_bucket_half_count())
    }

    fn internal_ratio(&self) -> f64 {
        2f64.powi(bits_needed(self.configured_ratio) as i32 + 1)
    }

    fn reset_window(&mut self) {
        let lowest = 2f64.powi(800);
        self.set_trackable_value_range(lowest, lowest * self.internal_ratio());
    }

    fn set_trackable_value_range(&mut self, lowest: f64, highest_limit: f64) {
        self.current_lowest_value_in_auto_range = lowest;
        self.current_highest_value_limit_in_auto_range = highest_limit;
        self.integer_to_double_ratio = lowest / self.half_count();
        self.double_to_integer_ratio = 1.0 / self.integer_to_double_ratio;
    }

    /// Finds the window covering `value`, moving recorded samples into a new inner histogram when
    /// needed.
    fn adjusted_window(&self, value: f64) -> Result<Window, RecordError> {
        let mut window = Window {
            lowest: self.current_lowest_value_in_auto_range,
            highest_limit: self.current_highest_value_limit_in_auto_range,
            configured_ratio: self.configured_ratio,
            integer: None,
        };

        if value < window.lowest {
            while value < window.lowest {
                let shift = capped_binary_order_of_magnitude(
                    (window.lowest / value).ceil() - 1.0,
                    window.configured_ratio,
                );
                self.shift_window_down(&mut window, shift, value)?;
            }
        } else {
            if value > highest_allowed_value_ever() {
                return Err(self.out_of_range(value, &window));
            }
            while value >= window.highest_limit {
                // Exact multiples of the limit belong to the next level up, so measure with a
                // value one ulp larger.
                let shift = capped_binary_order_of_magnitude(
                    ((value + ulp(value)) / window.highest_limit).ceil() - 1.0,
                    window.configured_ratio,
                );
                self.shift_window_up(&mut window, shift, value)?;
            }
        }

        let integer_to_double_ratio = window.lowest / self.half_count();
        if !is_usable_ratio(integer_to_double_ratio)
            || !is_usable_ratio(1.0 / integer_to_double_ratio)
        {
            return Err(self.out_of_range(value, &window));
        }
        Ok(window)
    }

    /// Slides the window towards smaller values, scaling recorded samples up.
    fn shift_window_down(
        &self,
        window: &mut Window,
        shift: u32,
        value: f64,
    ) -> Result<(), RecordError> {
        let factor = 2f64.powi(shift as i32);
        let current = window.integer.as_ref().unwrap_or(&self.integer);

        let mut widened = false;
        if has_non_zero_samples(current) {
            let shifted = match current.shifted_left(shift) {
                Some(shifted) => shifted,
                None => {
                    let expanded = self.widen(window, shift, value)?;
                    widened = true;
                    expanded.shifted_left(shift).ok_or_else(|| self.out_of_range(value, window))?
                }
            };
            window.integer = Some(shifted);
        }

        window.lowest /= factor;
        if !widened {
            window.highest_limit /= factor;
        }
        Ok(())
    }

    /// Slides the window towards larger values, scaling recorded samples down.
    fn shift_window_up(
        &self,
        window: &mut Window,
        shift: u32,
        value: f64,
    ) -> Result<(), RecordError> {
        let factor = 2f64.powi(shift as i32);
        let current = window.integer.as_ref().unwrap_or(&self.integer);

        if has_non_zero_samples(current) {
            if let Some(shifted) = current.shifted_right(shift) {
                window.integer = Some(shifted);
            } else {
                // Samples would lose precision, so grow the window upwards in place instead.
                window.integer = Some(self.widen(window, shift, value)?);
                window.highest_limit *= factor;
                return Ok(());
            }
        }

        window.lowest *= factor;
        window.highest_limit *= factor;
        Ok(())
    }

    /// Creates a copy of the window's inner histogram covering `2^shift` times larger values.
    fn widen(&self, window: &mut Window, shift: u32, value: f64) -> Result<Histogram, RecordError> {
        if !self.auto_resize {
            return Err(self.out_of_range(value, window));
        }

        let current = window.integer.as_ref().unwrap_or(&self.integer);
        let order = bits_needed(current.highest_trackable_value()) + shift;
        let configured_ratio = window.configured_ratio.checked_mul(1 << shift);
        let (Some(configured_ratio), true) = (configured_ratio, order <= 63) else {
            return Err(self.out_of_range(value, window));
        };

        let highest_trackable_value = (1u64 << order) - 1;
        let mut widened = current.clone();
        widened.resize(highest_trackable_value).map_err(|_| self.out_of_range(value, window))?;
        debug!(
            highest_trackable_value,
            configured_ratio, "Widening auto-range window by {} binary orders of magnitude.", shift
        );

        window.configured_ratio = configured_ratio;
        Ok(widened)
    }

    fn out_of_range(&self, value: f64, window: &Window) -> RecordError {
        RecordError::DoubleOutOfRange {
            value,
            lowest: window.lowest,
            highest: window.highest_limit,
        }
    }
}

impl PartialEq for DoubleHistogram {
    fn eq(&self, other: &DoubleHistogram) -> bool {
        self.configured_ratio == other.configured_ratio
            && self.current_lowest_value_in_auto_range == other.current_lowest_value_in_auto_range
            && self.integer == other.integer
    }
}

/// Gets the geometry of the inner integer histogram for a configured ratio.
///
/// The inner histogram covers `[1, sub_bucket_half_count * internal_ratio - 1]`.
pub(crate) fn integer_geometry(
    configured_ratio: u64,
    significant_digits: u8,
) -> Result<Geometry, ConfigError> {
    if !(1..=5).contains(&significant_digits) {
        return Err(ConfigError::SignificantDigits(significant_digits));
    }
    if configured_ratio < 2 {
        return Err(ConfigError::RatioTooSmall(configured_ratio));
    }

    let too_large =
        ConfigError::RatioTooLarge { ratio: configured_ratio, digits: significant_digits };
    let internal_ratio_order = bits_needed(configured_ratio) + 1;
    let half_count = u64::from(sub_bucket_half_count_for(significant_digits));
    let highest_trackable_value = 1u64
        .checked_shl(internal_ratio_order)
        .and_then(|internal_ratio| internal_ratio.checked_mul(half_count))
        .ok_or(too_large)?
        - 1;
    Geometry::new(1, highest_trackable_value, significant_digits)
}

/// Number of bits needed to represent `value`.
fn bits_needed(value: u64) -> u32 {
    64 - value.leading_zeros()
}

/// Binary order of magnitude containing `value`, capped by the configured ratio and by 50 orders.
fn capped_binary_order_of_magnitude(value: f64, configured_ratio: u64) -> u32 {
    if value > configured_ratio as f64 {
        return 63 - configured_ratio.leading_zeros();
    }
    if value > 2f64.powi(50) {
        return 50;
    }
    bits_needed(value.ceil() as u64)
}

/// Largest power of two that leaves headroom below `f64::MAX` for window arithmetic.
fn highest_allowed_value_ever() -> f64 {
    2f64.powi(1022)
}

fn ulp(value: f64) -> f64 {
    let value = value.abs();
    f64::from_bits(value.to_bits() + 1) - value
}

fn is_usable_ratio(ratio: f64) -> bool {
    ratio.is_normal() && ratio > 0.0
}

fn has_non_zero_samples(histogram: &Histogram) -> bool {
    histogram.total_count() > histogram.count_at_index(0).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::DoubleHistogram;
    use crate::{ConfigError, QueryError, RecordError};

    #[test]
    fn test_construction() {
        let histogram = DoubleHistogram::with_highest_to_lowest_value_ratio(1000, 3)
            .expect("valid histogram");
        assert_eq!(histogram.highest_to_lowest_value_ratio(), 1000);
        assert!(!histogram.is_auto_resize());
        // 1 << (10 + 1) internal ratio times 1024 half-count slots.
        assert_eq!(histogram.integer.highest_trackable_value(), 2048 * 1024 - 1);

        assert_eq!(
            DoubleHistogram::with_highest_to_lowest_value_ratio(1, 3).err(),
            Some(ConfigError::RatioTooSmall(1))
        );
        assert_eq!(
            DoubleHistogram::with_highest_to_lowest_value_ratio(1 << 52, 3).err(),
            Some(ConfigError::RatioTooLarge { ratio: 1 << 52, digits: 3 })
        );
        assert_eq!(DoubleHistogram::new(0).err(), Some(ConfigError::SignificantDigits(0)));

        let histogram = DoubleHistogram::new(3).expect("valid histogram");
        assert!(histogram.is_auto_resize());
        assert_eq!(histogram.current_lowest_value_in_auto_range(), 2f64.powi(800));
    }

    #[test]
    fn test_first_record_moves_window() {
        let mut histogram = DoubleHistogram::new(3).expect("valid histogram");
        histogram.record_value(1.0).expect("recordable");

        assert_eq!(histogram.current_lowest_value_in_auto_range(), 1.0);
        assert_eq!(histogram.current_highest_value_limit_in_auto_range(), 8.0);
        assert_eq!(histogram.total_count(), 1);
        assert_eq!(histogram.count_at_value(1.0), 1);
    }

    #[test]
    fn test_invalid_values() {
        let mut histogram = DoubleHistogram::new(3).expect("valid histogram");
        assert_eq!(histogram.record_value(-1.0), Err(RecordError::NegativeValue(-1.0)));
        assert!(matches!(histogram.record_value(f64::NAN), Err(RecordError::NonFiniteValue(_))));
        assert_eq!(
            histogram.record_value(f64::INFINITY),
            Err(RecordError::NonFiniteValue(f64::INFINITY))
        );
        assert!(matches!(
            histogram.record_value(f64::MAX),
            Err(RecordError::DoubleOutOfRange { .. })
        ));
        assert_eq!(histogram.total_count(), 0);

        histogram.record_value(0.0).expect("zero is always recordable");
        assert_eq!(histogram.total_count(), 1);
        assert_eq!(histogram.min(), 0.0);
    }

    #[test]
    fn test_auto_resize_matches_presized() {
        let values = [1.0, 1000.0, 1_000_000.0];

        let mut resized = DoubleHistogram::new(3).expect("valid histogram");
        for value in values {
            resized.record_value(value).expect("auto-resizes");
        }
        assert_eq!(resized.highest_to_lowest_value_ratio(), 1 << 18);
        assert_eq!(resized.integer.highest_trackable_value(), (1 << 30) - 1);

        let ratio = resized.highest_to_lowest_value_ratio();
        let mut presized =
            DoubleHistogram::with_highest_to_lowest_value_ratio(ratio, 3).expect("valid histogram");
        for value in values {
            presized.record_value(value).expect("in range");
        }

        assert_eq!(
            resized.current_lowest_value_in_auto_range(),
            presized.current_lowest_value_in_auto_range()
        );
        assert_eq!(resized.integer, presized.integer);
        for percentile in [25.0, 50.0, 100.0] {
            assert_eq!(
                resized.value_at_percentile(percentile),
                presized.value_at_percentile(percentile)
            );
        }
    }

    #[test]
    fn test_fixed_range_rejects_wide_values() {
        let mut histogram = DoubleHistogram::with_highest_to_lowest_value_ratio(1000, 3)
            .expect("valid histogram");
        histogram.record_value(1.0).expect("in range");
        histogram.record_value(900.0).expect("in range");
        let before = histogram.clone();

        assert!(matches!(
            histogram.record_value(1e9),
            Err(RecordError::DoubleOutOfRange { .. })
        ));
        assert_eq!(histogram, before);
        assert_eq!(histogram.total_count(), 2);
    }

    #[test]
    fn test_window_slides_when_samples_allow() {
        let mut histogram = DoubleHistogram::with_highest_to_lowest_value_ratio(1 << 20, 3)
            .expect("valid histogram");
        histogram.record_value(1000.0).expect("in range");
        histogram.record_value(0.01).expect("window slides down");
        histogram.record_value(5000.0).expect("in range");

        assert_eq!(histogram.total_count(), 3);
        assert_eq!(histogram.count_at_value(1000.0), 1);
        assert_eq!(histogram.count_at_value(0.01), 1);
        assert_relative_eq!(histogram.min(), 0.01, max_relative = 2e-3);
        assert_relative_eq!(histogram.max(), 5000.0, max_relative = 2e-3);
    }

    #[test]
    fn test_queries() {
        let mut histogram = DoubleHistogram::new(3).expect("valid histogram");
        assert_eq!(histogram.value_at_percentile(50.0), Err(QueryError::Empty));

        for value in 1..=100 {
            histogram.record_value(value as f64 / 10.0).expect("recordable");
        }

        let median = histogram.value_at_percentile(50.0).expect("not empty");
        assert_relative_eq!(median, 5.0, max_relative = 2e-3);
        let max = histogram.value_at_percentile(100.0).expect("not empty");
        assert_relative_eq!(max, 10.0, max_relative = 2e-3);
        assert_relative_eq!(histogram.mean(), 5.05, max_relative = 2e-3);
        assert_relative_eq!(histogram.min(), 0.1, max_relative = 2e-3);
        assert_relative_eq!(histogram.max(), 10.0, max_relative = 2e-3);
        assert_relative_eq!(histogram.percentile_below(5.0), 50.0, max_relative = 1e-2);
        assert_eq!(histogram.count_between(1.0, 2.0), 11);

        let value = 4.2;
        assert!(histogram.lowest_equivalent(value) <= value);
        assert!(histogram.highest_equivalent(value) >= value);
        assert!(histogram.highest_equivalent(value) < histogram.next_non_equivalent(value));
        assert!(histogram.equivalent(value, histogram.highest_equivalent(value)));
        assert!(!histogram.equivalent(value, histogram.next_non_equivalent(value)));
    }

    #[test]
    fn test_expected_interval() {
        let mut histogram = DoubleHistogram::new(3).expect("valid histogram");
        histogram.record_value_with_expected_interval(120.0, 30.0).expect("recordable");
        assert_eq!(histogram.total_count(), 4);
        assert_eq!(histogram.count_at_value(30.0), 1);
        assert_eq!(histogram.count_at_value(90.0), 1);

        let corrected = histogram.corrected_for_coordinated_omission(50.0).expect("recordable");
        assert!(corrected.total_count() > histogram.total_count());

        assert!(matches!(
            histogram.record_value_with_expected_interval(1.0, f64::NAN),
            Err(RecordError::NonFiniteValue(_))
        ));
    }

    #[test]
    fn test_expected_interval_records_in_place() {
        let mut histogram = DoubleHistogram::with_highest_to_lowest_value_ratio(1 << 30, 3)
            .expect("valid histogram");
        histogram.record_value(1.0).expect("recordable");
        assert_relative_eq!(histogram.current_lowest_value_in_auto_range(), 1.0);

        let counts = histogram.integer_histogram().counts().as_ptr();
        for _ in 0..1_000 {
            histogram.record_value_with_expected_interval(3.0, 1.5).expect("recordable");
        }
        assert_eq!(histogram.integer_histogram().counts().as_ptr(), counts);
        assert_eq!(histogram.total_count(), 2_001);
        assert_eq!(histogram.count_at_value(1.5), 1_000);
        assert_eq!(histogram.count_at_value(3.0), 1_000);

        // Samples below the window still move it, and nothing is recorded when that fails.
        let mut fixed =
            DoubleHistogram::with_highest_to_lowest_value_ratio(4, 3).expect("valid histogram");
        fixed.record_value(1_000.0).expect("recordable");
        assert!(matches!(
            fixed.record_value_with_expected_interval(1_000.0, 1.0),
            Err(RecordError::DoubleOutOfRange { .. })
        ));
        assert_eq!(fixed.total_count(), 1);
    }

    #[test]
    fn test_merge_and_reset() {
        let mut a = DoubleHistogram::new(3).expect("valid histogram");
        let mut b = DoubleHistogram::new(3).expect("valid histogram");
        a.record_value(0.5).expect("recordable");
        a.set_start_timestamp(10);
        b.record_value(250.0).expect("recordable");
        b.record_value(1e6).expect("recordable");
        b.set_tag(Some("b".to_owned()));

        a.merge(&b).expect("auto-resizes");
        assert_eq!(a.total_count(), 3);
        assert_eq!(a.count_at_value(0.5), 1);
        assert_eq!(a.count_at_value(250.0), 1);
        assert_relative_eq!(a.max(), 1e6, max_relative = 2e-3);
        assert_eq!(a.start_timestamp(), Some(10));
        assert_eq!(a.tag(), Some("b"));

        let ratio = a.highest_to_lowest_value_ratio();
        a.reset();
        assert_eq!(a.total_count(), 0);
        assert_eq!(a.tag(), None);
        assert_eq!(a.highest_to_lowest_value_ratio(), ratio);
        assert_eq!(a.current_lowest_value_in_auto_range(), 2f64.powi(800));
    }

    #[test]
    fn test_iteration_scales_values() {
        let mut histogram = DoubleHistogram::new(3).expect("valid histogram");
        histogram.record_value(0.25).expect("recordable");
        histogram.record_value(0.75).expect("recordable");

        let steps = histogram.iter_recorded().collect::<Vec<_>>();
        assert_eq!(steps.len(), 2);
        assert_relative_eq!(steps[0].value_iterated_to, 0.25, max_relative = 1e-3);
        assert_relative_eq!(steps[1].value_iterated_to, 0.75, max_relative = 1e-3);

        let total: u64 = histogram.iter_linear(0.1).map(|v| v.count_added_in_step).sum();
        assert_eq!(total, 2);
    }
}
