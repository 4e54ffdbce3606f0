//! Traversal of recorded histogram data.
//!
//! Every traversal shares the same cursor, which walks the counts array slot by slot and emits a
//! step whenever the active [`IterationMode`] decides that its next reporting level was reached.
use crate::histogram::Histogram;

/// Traversal policy of a [`HistogramIter`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IterationMode {
    /// Steps through the value range in equally-sized steps of `step` units.
    ///
    /// A step of zero is treated as a step of one.
    Linear {
        /// Number of value units per step.
        step: u64,
    },

    /// Steps through the value range in logarithmically growing steps.
    ///
    /// The first step covers `first_bucket` units, and every following step is `base` times
    /// larger than the one before. A `first_bucket` of zero is treated as one, and a `base` that
    /// is not greater than one is treated as two.
    Logarithmic {
        /// Number of value units in the first step.
        first_bucket: u64,
        /// Growth factor between steps.
        base: f64,
    },

    /// Steps through percentile levels, taking `ticks_per_half_distance` steps for each halving of
    /// the distance to 100%, followed by a final step at exactly 100%.
    Percentile {
        /// Number of steps per halving of the distance to 100%.
        ticks_per_half_distance: u32,
    },

    /// Visits every slot that holds samples.
    Recorded,

    /// Visits every slot.
    All,
}

/// A single step of a histogram traversal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationValue {
    /// Value that the step iterated up to.
    pub value_iterated_to: u64,
    /// Value that the previous step iterated up to.
    pub value_iterated_from: u64,
    /// Count held by the slot the cursor stopped at.
    pub count_at_value: u64,
    /// Samples covered since the previous step.
    pub count_added_in_step: u64,
    /// Samples covered from the start of the traversal up to this step.
    pub total_count_to_value: u64,
    /// Sum of the highest equivalent value of every sample covered up to this step.
    pub total_value_to_value: u128,
    /// Percentage of all samples covered up to this step.
    pub percentile: f64,
    /// Percentile level the step iterated to.
    ///
    /// Equal to [`percentile`](IterationValue::percentile) except for percentile traversals, where
    /// it is the reporting level that triggered the step.
    pub percentile_level_iterated_to: f64,
}

/// A single step of a floating-point histogram traversal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DoubleIterationValue {
    /// Value that the step iterated up to.
    pub value_iterated_to: f64,
    /// Value that the previous step iterated up to.
    pub value_iterated_from: f64,
    /// Count held by the slot the cursor stopped at.
    pub count_at_value: u64,
    /// Samples covered since the previous step.
    pub count_added_in_step: u64,
    /// Samples covered from the start of the traversal up to this step.
    pub total_count_to_value: u64,
    /// Sum of the highest equivalent value of every sample covered up to this step.
    pub total_value_to_value: f64,
    /// Percentage of all samples covered up to this step.
    pub percentile: f64,
    /// Percentile level the step iterated to.
    pub percentile_level_iterated_to: f64,
}

#[derive(Debug, Clone)]
enum Policy {
    Linear {
        step: u64,
        highest_reporting_level: u64,
        lowest_reporting_level: u64,
    },
    Logarithmic {
        base: f64,
        first_bucket: u64,
        next_reporting_level: f64,
        highest_reporting_level: u64,
        lowest_reporting_level: u64,
    },
    Percentile {
        ticks_per_half_distance: u32,
        level_to_iterate_to: f64,
        reached_last_recorded_value: bool,
    },
    Recorded {
        visited_index: Option<usize>,
    },
    All {
        visited_index: Option<usize>,
    },
}

impl Policy {
    fn new(mode: IterationMode, histogram: &Histogram) -> Policy {
        match mode {
            IterationMode::Linear { step } => {
                let step = step.max(1);
                Policy::Linear {
                    step,
                    highest_reporting_level: step - 1,
                    lowest_reporting_level: histogram.lowest_equivalent(step - 1),
                }
            }
            IterationMode::Logarithmic { first_bucket, base } => {
                let first_bucket = first_bucket.max(1);
                Policy::Logarithmic {
                    base: if base > 1.0 { base } else { 2.0 },
                    first_bucket,
                    next_reporting_level: first_bucket as f64,
                    highest_reporting_level: first_bucket - 1,
                    lowest_reporting_level: histogram.lowest_equivalent(first_bucket - 1),
                }
            }
            IterationMode::Percentile { ticks_per_half_distance } => Policy::Percentile {
                ticks_per_half_distance: ticks_per_half_distance.max(1),
                level_to_iterate_to: 0.0,
                reached_last_recorded_value: false,
            },
            IterationMode::Recorded => Policy::Recorded { visited_index: None },
            IterationMode::All => Policy::All { visited_index: None },
        }
    }

    fn reset(&mut self, histogram: &Histogram) {
        *self = match *self {
            Policy::Linear { step, .. } => Policy::new(IterationMode::Linear { step }, histogram),
            Policy::Logarithmic { first_bucket, base, .. } => {
                Policy::new(IterationMode::Logarithmic { first_bucket, base }, histogram)
            }
            Policy::Percentile { ticks_per_half_distance, .. } => {
                Policy::new(IterationMode::Percentile { ticks_per_half_distance }, histogram)
            }
            Policy::Recorded { .. } => Policy::Recorded { visited_index: None },
            Policy::All { .. } => Policy::All { visited_index: None },
        };
    }
}

/// Iterator over the recorded data of a [`Histogram`].
///
/// Created by [`Histogram::iter`] and its shorthands.  The iterator borrows the histogram, so the
/// histogram cannot be modified while a traversal is in progress.  A finished traversal can be
/// restarted with [`reset`](HistogramIter::reset).
#[derive(Debug, Clone)]
pub struct HistogramIter<'a> {
    histogram: &'a Histogram,
    policy: Policy,
    array_total_count: u64,
    current_index: usize,
    current_value_at_index: u64,
    next_value_at_index: u64,
    prev_value_iterated_to: u64,
    total_count_to_prev_index: u64,
    total_count_to_current_index: u64,
    total_value_to_current_index: u128,
    count_at_this_value: u64,
    fresh_sub_bucket: bool,
}

impl<'a> HistogramIter<'a> {
    /// Creates a new `HistogramIter` over `histogram` with the given traversal policy.
    pub fn new(histogram: &'a Histogram, mode: IterationMode) -> HistogramIter<'a> {
        HistogramIter {
            histogram,
            policy: Policy::new(mode, histogram),
            array_total_count: histogram.total_count(),
            current_index: 0,
            current_value_at_index: 0,
            next_value_at_index: 1 << histogram.geometry().unit_magnitude(),
            prev_value_iterated_to: 0,
            total_count_to_prev_index: 0,
            total_count_to_current_index: 0,
            total_value_to_current_index: 0,
            count_at_this_value: 0,
            fresh_sub_bucket: true,
        }
    }

    /// Restarts the traversal from the beginning of the histogram.
    pub fn reset(&mut self) {
        let histogram = self.histogram;
        self.policy.reset(histogram);
        self.array_total_count = histogram.total_count();
        self.current_index = 0;
        self.current_value_at_index = 0;
        self.next_value_at_index = 1 << histogram.geometry().unit_magnitude();
        self.prev_value_iterated_to = 0;
        self.total_count_to_prev_index = 0;
        self.total_count_to_current_index = 0;
        self.total_value_to_current_index = 0;
        self.count_at_this_value = 0;
        self.fresh_sub_bucket = true;
    }

    fn has_next(&mut self) -> bool {
        let counts_remaining = self.total_count_to_current_index < self.array_total_count;
        let histogram = self.histogram;
        match &mut self.policy {
            Policy::All { .. } => self.current_index + 1 < histogram.distinct_values(),
            _ if counts_remaining => true,
            // Linear and logarithmic traversals keep going until the reporting level passes the
            // last recorded slot, rather than stopping as soon as the last slot is reached.
            Policy::Linear { highest_reporting_level, .. } => {
                self.array_total_count > 0 && *highest_reporting_level < self.next_value_at_index
            }
            Policy::Logarithmic { next_reporting_level, .. } => {
                let lowest_next_level = histogram.lowest_equivalent(*next_reporting_level as u64);
                self.array_total_count > 0 && lowest_next_level < self.next_value_at_index
            }
            Policy::Percentile { level_to_iterate_to, reached_last_recorded_value, .. } => {
                if !*reached_last_recorded_value && self.array_total_count > 0 {
                    *level_to_iterate_to = 100.0;
                    *reached_last_recorded_value = true;
                    true
                } else {
                    false
                }
            }
            Policy::Recorded { .. } => false,
        }
    }

    fn reached_iteration_level(&self) -> bool {
        let last_index = self.histogram.distinct_values() - 1;
        match &self.policy {
            Policy::Linear { lowest_reporting_level, .. }
            | Policy::Logarithmic { lowest_reporting_level, .. } => {
                self.current_value_at_index >= *lowest_reporting_level
                    || self.current_index >= last_index
            }
            Policy::Percentile { level_to_iterate_to, .. } => {
                self.count_at_this_value != 0 && self.current_percentile() >= *level_to_iterate_to
            }
            Policy::Recorded { visited_index } => {
                self.count_at_this_value != 0 && *visited_index != Some(self.current_index)
            }
            Policy::All { visited_index } => *visited_index != Some(self.current_index),
        }
    }

    fn increment_iteration_level(&mut self) {
        let histogram = self.histogram;
        match &mut self.policy {
            Policy::Linear { step, highest_reporting_level, lowest_reporting_level } => {
                *highest_reporting_level = highest_reporting_level.saturating_add(*step);
                *lowest_reporting_level = histogram.lowest_equivalent(*highest_reporting_level);
            }
            Policy::Logarithmic {
                base,
                next_reporting_level,
                highest_reporting_level,
                lowest_reporting_level,
                ..
            } => {
                // Each step covers values up to, and including, one below the next level.
                *next_reporting_level *= *base;
                *highest_reporting_level = (*next_reporting_level as u64).saturating_sub(1);
                *lowest_reporting_level = histogram.lowest_equivalent(*highest_reporting_level);
            }
            Policy::Percentile { ticks_per_half_distance, level_to_iterate_to, .. } => {
                // Ticks stay a fixed size within each half of the remaining distance to 100%, and
                // halve in size every time a half-distance is crossed.
                let half_distances = (100.0 / (100.0 - *level_to_iterate_to)).log2().floor() + 1.0;
                let reporting_ticks = f64::from(*ticks_per_half_distance) * half_distances.exp2();
                *level_to_iterate_to += 100.0 / reporting_ticks;
            }
            Policy::Recorded { visited_index } | Policy::All { visited_index } => {
                *visited_index = Some(self.current_index);
            }
        }
    }

    fn value_iterated_to(&self) -> u64 {
        match &self.policy {
            Policy::Linear { highest_reporting_level, .. }
            | Policy::Logarithmic { highest_reporting_level, .. } => *highest_reporting_level,
            _ => self.histogram.highest_equivalent(self.current_value_at_index),
        }
    }

    fn percentile_iterated_to(&self) -> f64 {
        match &self.policy {
            Policy::Percentile { level_to_iterate_to, .. } => *level_to_iterate_to,
            _ => self.current_percentile(),
        }
    }

    fn current_percentile(&self) -> f64 {
        if self.array_total_count == 0 {
            return 0.0;
        }
        100.0 * self.total_count_to_current_index as f64 / self.array_total_count as f64
    }

    fn increment_sub_bucket(&mut self) {
        let geometry = *self.histogram.geometry();
        self.fresh_sub_bucket = true;
        self.current_index += 1;
        self.current_value_at_index = geometry.value_for(self.current_index);
        self.next_value_at_index = geometry.value_for(self.current_index + 1);
    }
}

impl Iterator for HistogramIter<'_> {
    type Item = IterationValue;

    fn next(&mut self) -> Option<IterationValue> {
        if !self.has_next() {
            return None;
        }

        let histogram = self.histogram;
        let counts = histogram.counts();
        while self.current_index < counts.len() {
            self.count_at_this_value = counts[self.current_index];
            if self.fresh_sub_bucket {
                self.total_count_to_current_index += self.count_at_this_value;
                self.total_value_to_current_index += u128::from(self.count_at_this_value)
                    * u128::from(histogram.highest_equivalent(self.current_value_at_index));
                self.fresh_sub_bucket = false;
            }

            if self.reached_iteration_level() {
                let value_iterated_to = self.value_iterated_to();
                let value = IterationValue {
                    value_iterated_to,
                    value_iterated_from: self.prev_value_iterated_to,
                    count_at_value: self.count_at_this_value,
                    count_added_in_step: self.total_count_to_current_index
                        - self.total_count_to_prev_index,
                    total_count_to_value: self.total_count_to_current_index,
                    total_value_to_value: self.total_value_to_current_index,
                    percentile: self.current_percentile(),
                    percentile_level_iterated_to: self.percentile_iterated_to(),
                };

                self.prev_value_iterated_to = value_iterated_to;
                self.total_count_to_prev_index = self.total_count_to_current_index;
                self.increment_iteration_level();
                return Some(value);
            }

            self.increment_sub_bucket();
        }

        None
    }
}

/// Iterator over the recorded data of a [`DoubleHistogram`](crate::DoubleHistogram).
///
/// Wraps a [`HistogramIter`] over the inner integer histogram and scales every value back into the
/// floating-point domain.
#[derive(Debug, Clone)]
pub struct DoubleHistogramIter<'a> {
    inner: HistogramIter<'a>,
    integer_to_double_ratio: f64,
}

impl<'a> DoubleHistogramIter<'a> {
    pub(crate) fn new(inner: HistogramIter<'a>, integer_to_double_ratio: f64) -> Self {
        DoubleHistogramIter { inner, integer_to_double_ratio }
    }

    /// Restarts the traversal from the beginning of the histogram.
    pub fn reset(&mut self) {
        self.inner.reset();
    }
}

impl Iterator for DoubleHistogramIter<'_> {
    type Item = DoubleIterationValue;

    fn next(&mut self) -> Option<DoubleIterationValue> {
        let ratio = self.integer_to_double_ratio;
        self.inner.next().map(|value| DoubleIterationValue {
            value_iterated_to: value.value_iterated_to as f64 * ratio,
            value_iterated_from: value.value_iterated_from as f64 * ratio,
            count_at_value: value.count_at_value,
            count_added_in_step: value.count_added_in_step,
            total_count_to_value: value.total_count_to_value,
            total_value_to_value: value.total_value_to_value as f64 * ratio,
            percentile: value.percentile,
            percentile_level_iterated_to: value.percentile_level_iterated_to,
        })
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::IterationMode;
    use crate::Histogram;

    fn histogram_with(values: &[u64]) -> Histogram {
        let mut histogram = Histogram::new_with_max(3_600_000_000, 3).expect("valid histogram");
        for &value in values {
            histogram.record_value(value).expect("in range");
        }
        histogram
    }

    #[test]
    fn test_recorded() {
        let histogram = histogram_with(&[5, 5, 15, 10007]);
        let steps = histogram.iter_recorded().collect::<Vec<_>>();

        let values = steps.iter().map(|v| v.value_iterated_to).collect::<Vec<_>>();
        assert_eq!(values, vec![5, 15, 10007]);
        let counts = steps.iter().map(|v| v.count_added_in_step).collect::<Vec<_>>();
        assert_eq!(counts, vec![2, 1, 1]);

        let last = steps.last().expect("has steps");
        assert_eq!(last.value_iterated_from, 15);
        assert_eq!(last.total_count_to_value, 4);
        assert_eq!(last.total_value_to_value, 5 + 5 + 15 + 10007);
        assert_relative_eq!(last.percentile, 100.0);
    }

    #[test]
    fn test_all() {
        let mut histogram = Histogram::new_with_max(10_000, 2).expect("valid histogram");
        histogram.record_value(3).expect("in range");

        let steps = histogram.iter_all().collect::<Vec<_>>();
        assert_eq!(steps.len(), histogram.distinct_values());
        assert_eq!(steps.iter().map(|v| v.count_added_in_step).sum::<u64>(), 1);
        assert_eq!(steps[3].count_at_value, 1);

        let empty = Histogram::new_with_max(10_000, 2).expect("valid histogram");
        assert_eq!(empty.iter_all().count(), empty.distinct_values());
        assert_eq!(empty.iter_recorded().count(), 0);
    }

    #[test]
    fn test_linear() {
        let histogram = histogram_with(&[5, 15]);
        let steps = histogram
            .iter_linear(10)
            .map(|v| (v.value_iterated_to, v.count_added_in_step))
            .collect::<Vec<_>>();
        assert_eq!(steps, vec![(9, 1), (19, 1)]);

        let histogram = histogram_with(&[1, 100, 1000, 5000, 5000, 123_456]);
        let total: u64 = histogram.iter_linear(1000).map(|v| v.count_added_in_step).sum();
        assert_eq!(total, histogram.total_count());

        assert_eq!(Histogram::new(3).expect("valid histogram").iter_linear(10).count(), 0);
    }

    #[test]
    fn test_logarithmic() {
        let histogram = histogram_with(&[5, 15]);
        let steps = histogram
            .iter_log(10, 2.0)
            .map(|v| (v.value_iterated_to, v.count_added_in_step))
            .collect::<Vec<_>>();
        assert_eq!(steps, vec![(9, 1), (19, 1)]);

        // Values equal to a reporting level belong to the step that starts there.
        let histogram = histogram_with(&[5, 10, 15, 20]);
        let steps = histogram
            .iter_log(10, 2.0)
            .map(|v| (v.value_iterated_to, v.count_added_in_step))
            .collect::<Vec<_>>();
        assert_eq!(steps, vec![(9, 1), (19, 2), (39, 1)]);

        let histogram = histogram_with(&[1, 100, 1000, 5000, 5000, 123_456]);
        let steps = histogram.iter_log(1, 10.0).collect::<Vec<_>>();
        assert_eq!(steps.iter().map(|v| v.count_added_in_step).sum::<u64>(), 6);
        let levels = steps.iter().map(|v| v.value_iterated_to).collect::<Vec<_>>();
        assert_eq!(levels, vec![0, 9, 99, 999, 9_999, 99_999, 999_999]);
    }

    #[test]
    fn test_percentiles() {
        let histogram = histogram_with(&[1, 2, 3, 4]);
        let steps = histogram.iter_percentiles(1).collect::<Vec<_>>();

        let values = steps.iter().map(|v| v.value_iterated_to).collect::<Vec<_>>();
        assert_eq!(values, vec![1, 2, 3, 4, 4]);
        assert_relative_eq!(steps[0].percentile_level_iterated_to, 0.0);
        assert_relative_eq!(steps[4].percentile_level_iterated_to, 100.0);
        assert_relative_eq!(steps[4].percentile, 100.0);

        let empty = Histogram::new(3).expect("valid histogram");
        assert_eq!(empty.iter_percentiles(5).count(), 0);
    }

    #[test]
    fn test_reset_restarts_traversal() {
        let histogram = histogram_with(&[1, 2, 3, 4, 1000]);
        let mut iter = histogram.iter(IterationMode::Percentile { ticks_per_half_distance: 2 });
        let first = iter.by_ref().collect::<Vec<_>>();
        assert_eq!(iter.next(), None);

        iter.reset();
        let second = iter.collect::<Vec<_>>();
        assert_eq!(first, second);
    }
}
