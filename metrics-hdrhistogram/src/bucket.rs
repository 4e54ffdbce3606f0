use crate::ConfigError;

/// Bucket geometry of a histogram.
///
/// Values are partitioned into buckets that double in width, with every bucket split into the same
/// number of linearly-spaced sub-buckets.  The first bucket covers `[0, sub_bucket_count)` at unit
/// resolution, while every following bucket only uses its upper half of sub-buckets (the lower
/// half would overlap the previous bucket), so each slot of the counts array maps to exactly one
/// `(bucket, sub-bucket)` pair.
///
/// This gives every value a relative error no larger than `10^-significant_digits`, while mapping
/// a value to its slot only takes a handful of bit operations regardless of magnitude.
///
/// `Geometry` is immutable: widening a histogram creates a new geometry via [`Geometry::resized`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    significant_digits: u8,
    lowest_discernible_value: u64,
    highest_trackable_value: u64,
    unit_magnitude: u32,
    sub_bucket_half_count_magnitude: u32,
    sub_bucket_count: u32,
    sub_bucket_half_count: u32,
    sub_bucket_mask: u64,
    leading_zero_count_base: u32,
    bucket_count: u32,
    counts_len: usize,
}

impl Geometry {
    /// Creates a new [`Geometry`].
    ///
    /// `significant_digits` must be between 1 and 5, `lowest_discernible_value` must be at least 1,
    /// and `highest_trackable_value` must be at least twice `lowest_discernible_value`.
    ///
    /// # Errors
    ///
    /// If any of the parameters are out of bounds, or the precision cannot be represented in 64
    /// bits given the lowest discernible value, an error is returned describing the problem.
    pub fn new(
        lowest_discernible_value: u64,
        highest_trackable_value: u64,
        significant_digits: u8,
    ) -> Result<Geometry, ConfigError> {
        if !(1..=5).contains(&significant_digits) {
            return Err(ConfigError::SignificantDigits(significant_digits));
        }
        if lowest_discernible_value < 1 {
            return Err(ConfigError::LowestDiscernibleValue(lowest_discernible_value));
        }
        match lowest_discernible_value.checked_mul(2) {
            Some(min_highest) if highest_trackable_value >= min_highest => {}
            _ => {
                return Err(ConfigError::HighestTrackableValue {
                    lowest: lowest_discernible_value,
                    highest: highest_trackable_value,
                })
            }
        }

        let sub_bucket_half_count = sub_bucket_half_count_for(significant_digits);
        let sub_bucket_half_count_magnitude = sub_bucket_half_count.trailing_zeros();
        let sub_bucket_count = sub_bucket_half_count << 1;

        // floor(log2(lowest_discernible_value))
        let unit_magnitude = 63 - lowest_discernible_value.leading_zeros();
        if unit_magnitude + sub_bucket_half_count_magnitude > 61 {
            return Err(ConfigError::PrecisionUnrepresentable {
                lowest: lowest_discernible_value,
                digits: significant_digits,
            });
        }

        let mut geometry = Geometry {
            significant_digits,
            lowest_discernible_value,
            highest_trackable_value,
            unit_magnitude,
            sub_bucket_half_count_magnitude,
            sub_bucket_count,
            sub_bucket_half_count,
            sub_bucket_mask: (u64::from(sub_bucket_count) - 1) << unit_magnitude,
            leading_zero_count_base: 64 - unit_magnitude - sub_bucket_half_count_magnitude - 1,
            bucket_count: 0,
            counts_len: 0,
        };
        geometry.bucket_count = geometry.buckets_to_cover(highest_trackable_value);
        geometry.counts_len =
            (geometry.bucket_count as usize + 1) * geometry.sub_bucket_half_count as usize;

        Ok(geometry)
    }

    /// Creates a geometry with the same precision and lowest discernible value, covering values up
    /// to `highest_trackable_value`.
    ///
    /// Slots keep their index across a resize, so a counts array can be grown in place.
    ///
    /// # Errors
    ///
    /// If `highest_trackable_value` is less than twice the lowest discernible value, an error is
    /// returned.
    pub fn resized(&self, highest_trackable_value: u64) -> Result<Geometry, ConfigError> {
        Geometry::new(
            self.lowest_discernible_value,
            highest_trackable_value,
            self.significant_digits,
        )
    }

    /// Gets the number of significant decimal digits of precision.
    pub fn significant_digits(&self) -> u8 {
        self.significant_digits
    }

    /// Gets the lowest value that can be discerned from zero.
    pub fn lowest_discernible_value(&self) -> u64 {
        self.lowest_discernible_value
    }

    /// Gets the highest value that can be tracked.
    pub fn highest_trackable_value(&self) -> u64 {
        self.highest_trackable_value
    }

    /// Gets the power-of-two magnitude of the smallest slot width.
    pub fn unit_magnitude(&self) -> u32 {
        self.unit_magnitude
    }

    /// Gets the number of sub-buckets per bucket.
    pub fn sub_bucket_count(&self) -> u32 {
        self.sub_bucket_count
    }

    /// Gets half the number of sub-buckets per bucket.
    pub fn sub_bucket_half_count(&self) -> u32 {
        self.sub_bucket_half_count
    }

    /// Gets the mask covering the sub-bucket bits of a value in the first bucket.
    pub fn sub_bucket_mask(&self) -> u64 {
        self.sub_bucket_mask
    }

    /// Gets the number of buckets.
    pub fn bucket_count(&self) -> u32 {
        self.bucket_count
    }

    /// Gets the length of the counts array described by this geometry.
    pub fn counts_len(&self) -> usize {
        self.counts_len
    }

    /// Whether or not `other` maps every value to the same slot index as this geometry.
    ///
    /// Counts arrays of index-compatible geometries can be added slot by slot.
    pub fn is_index_compatible(&self, other: &Geometry) -> bool {
        self.unit_magnitude == other.unit_magnitude
            && self.sub_bucket_count == other.sub_bucket_count
    }

    /// Gets the bucket that `value` falls into.
    #[inline]
    pub fn bucket_index(&self, value: u64) -> u32 {
        // Or-ing in the mask forces every value below `sub_bucket_count` units into bucket 0.
        self.leading_zero_count_base - (value | self.sub_bucket_mask).leading_zeros()
    }

    /// Gets the sub-bucket that `value` falls into within `bucket_index`.
    ///
    /// For every bucket other than the first, the result is in
    /// `[sub_bucket_half_count, sub_bucket_count)`.
    #[inline]
    pub fn sub_bucket_index(&self, value: u64, bucket_index: u32) -> u32 {
        (value >> (bucket_index + self.unit_magnitude)) as u32
    }

    /// Gets the counts array index for `value`.
    ///
    /// The index may be beyond [`counts_len`](Geometry::counts_len) if `value` is larger than the
    /// geometry covers.
    #[inline]
    pub fn counts_index(&self, value: u64) -> usize {
        let bucket_index = self.bucket_index(value);
        let sub_bucket_index = self.sub_bucket_index(value, bucket_index);

        // Bucket 0 owns the full `[0, sub_bucket_count)` range, so its base sits half a bucket
        // earlier than the others and sub-bucket indexes below the half count land at the front.
        let bucket_base_index = (bucket_index as usize + 1) << self.sub_bucket_half_count_magnitude;
        bucket_base_index - self.sub_bucket_half_count as usize + sub_bucket_index as usize
    }

    /// Gets the counts array index for `value`, if the value is covered by this geometry.
    #[inline]
    pub fn index_of(&self, value: u64) -> Option<usize> {
        let index = self.counts_index(value);
        if index < self.counts_len {
            Some(index)
        } else {
            None
        }
    }

    /// Gets the lowest value mapping to the given bucket and sub-bucket.
    ///
    /// Saturates at `u64::MAX` for locations past the end of the representable range.
    pub fn value_from_location(&self, bucket_index: u32, sub_bucket_index: u32) -> u64 {
        let shift = bucket_index + self.unit_magnitude;
        let value = u128::from(sub_bucket_index) << shift.min(127);
        value.min(u128::from(u64::MAX)) as u64
    }

    /// Gets the lowest value mapping to the given counts array index.
    pub fn value_for(&self, index: usize) -> u64 {
        let half_count = self.sub_bucket_half_count as usize;
        let bucket_index = index >> self.sub_bucket_half_count_magnitude;
        let sub_bucket_index = (index & (half_count - 1)) + half_count;

        if bucket_index == 0 {
            self.value_from_location(0, (sub_bucket_index - half_count) as u32)
        } else {
            self.value_from_location(bucket_index as u32 - 1, sub_bucket_index as u32)
        }
    }

    /// Gets the width of the range of values equivalent to `value`.
    pub fn size_of_equivalent_range(&self, value: u64) -> u64 {
        1 << (self.unit_magnitude + self.bucket_index(value))
    }

    /// Gets the lowest value equivalent to `value`.
    pub fn lowest_equivalent(&self, value: u64) -> u64 {
        let bucket_index = self.bucket_index(value);
        let sub_bucket_index = self.sub_bucket_index(value, bucket_index);
        self.value_from_location(bucket_index, sub_bucket_index)
    }

    /// Gets the highest value equivalent to `value`.
    pub fn highest_equivalent(&self, value: u64) -> u64 {
        self.lowest_equivalent(value) + (self.size_of_equivalent_range(value) - 1)
    }

    /// Gets the value in the middle of the range of values equivalent to `value`.
    pub fn median_equivalent(&self, value: u64) -> u64 {
        self.lowest_equivalent(value) + (self.size_of_equivalent_range(value) >> 1)
    }

    /// Gets the next value that is not equivalent to `value`.
    ///
    /// Saturates at `u64::MAX`.
    pub fn next_non_equivalent(&self, value: u64) -> u64 {
        self.lowest_equivalent(value)
            .saturating_add(self.size_of_equivalent_range(value))
    }

    /// Whether or not two values map to the same slot.
    pub fn values_are_equivalent(&self, a: u64, b: u64) -> bool {
        self.lowest_equivalent(a) == self.lowest_equivalent(b)
    }

    fn buckets_to_cover(&self, value: u64) -> u32 {
        let mut smallest_untrackable_value =
            u64::from(self.sub_bucket_count) << self.unit_magnitude;
        let mut buckets_needed = 1;
        while smallest_untrackable_value <= value {
            if smallest_untrackable_value > u64::MAX / 2 {
                return buckets_needed + 1;
            }
            smallest_untrackable_value <<= 1;
            buckets_needed += 1;
        }
        buckets_needed
    }
}

/// Gets half the number of sub-buckets needed for the given precision.
///
/// The full sub-bucket count is the smallest power of two that can represent
/// `2 * 10^significant_digits` at unit resolution.
pub(crate) fn sub_bucket_half_count_for(significant_digits: u8) -> u32 {
    let largest_value_with_single_unit_resolution = 2 * 10u32.pow(u32::from(significant_digits));
    largest_value_with_single_unit_resolution.next_power_of_two() / 2
}

#[cfg(test)]
mod tests {
    use super::Geometry;
    use crate::ConfigError;

    #[test]
    fn test_geometry_layout() {
        let geometry = Geometry::new(1, 3_600_000_000, 3).expect("valid geometry");
        assert_eq!(geometry.unit_magnitude(), 0);
        assert_eq!(geometry.sub_bucket_count(), 2048);
        assert_eq!(geometry.sub_bucket_half_count(), 1024);
        assert_eq!(geometry.sub_bucket_mask(), 2047);
        assert_eq!(geometry.bucket_count(), 22);
        assert_eq!(geometry.counts_len(), 23552);

        let geometry = Geometry::new(1000, 3_600_000_000, 2).expect("valid geometry");
        assert_eq!(geometry.unit_magnitude(), 9);
        assert_eq!(geometry.sub_bucket_count(), 256);
        assert_eq!(geometry.sub_bucket_mask(), 255 << 9);
    }

    #[test]
    fn test_geometry_errors() {
        assert_eq!(Geometry::new(1, 1000, 0), Err(ConfigError::SignificantDigits(0)));
        assert_eq!(Geometry::new(1, 1000, 6), Err(ConfigError::SignificantDigits(6)));
        assert_eq!(Geometry::new(0, 1000, 3), Err(ConfigError::LowestDiscernibleValue(0)));
        assert_eq!(
            Geometry::new(100, 199, 3),
            Err(ConfigError::HighestTrackableValue { lowest: 100, highest: 199 })
        );
        assert_eq!(
            Geometry::new(u64::MAX, u64::MAX, 3),
            Err(ConfigError::HighestTrackableValue { lowest: u64::MAX, highest: u64::MAX })
        );
        assert_eq!(
            Geometry::new(1 << 60, u64::MAX, 3),
            Err(ConfigError::PrecisionUnrepresentable { lowest: 1 << 60, digits: 3 })
        );
    }

    #[test]
    fn test_bucket_and_sub_bucket_indexes() {
        let geometry = Geometry::new(1, 3_600_000_000, 3).expect("valid geometry");

        let cases = [
            // value, bucket, sub-bucket, counts index
            (0, 0, 0, 0),
            (1, 0, 1, 1),
            (1023, 0, 1023, 1023),
            (2047, 0, 2047, 2047),
            (2048, 1, 1024, 2048),
            (4095, 1, 2047, 3071),
            (4096, 2, 1024, 3072),
            (10007, 3, 1250, 4322),
        ];
        for (value, bucket, sub_bucket, index) in cases {
            assert_eq!(geometry.bucket_index(value), bucket, "bucket for {value}");
            assert_eq!(
                geometry.sub_bucket_index(value, bucket),
                sub_bucket,
                "sub-bucket for {value}"
            );
            assert_eq!(geometry.counts_index(value), index, "index for {value}");
        }

        // Every bucket past the first only uses its upper half.
        for value in [2048u64, 123_456, 3_600_000_000] {
            let bucket = geometry.bucket_index(value);
            let sub_bucket = geometry.sub_bucket_index(value, bucket);
            assert!(sub_bucket >= geometry.sub_bucket_half_count());
            assert!(sub_bucket < geometry.sub_bucket_count());
        }
    }

    #[test]
    fn test_value_for_is_inverse_of_counts_index() {
        let geometry = Geometry::new(1, 100_000_000, 2).expect("valid geometry");
        for index in 0..geometry.counts_len() {
            let value = geometry.value_for(index);
            assert_eq!(geometry.counts_index(value), index);
            assert_eq!(geometry.lowest_equivalent(value), value);
        }

        let geometry = Geometry::new(1024, 100_000_000, 2).expect("valid geometry");
        for index in 0..geometry.counts_len() {
            assert_eq!(geometry.counts_index(geometry.value_for(index)), index);
        }
    }

    #[test]
    fn test_equivalent_ranges() {
        let geometry = Geometry::new(1, 3_600_000_000, 3).expect("valid geometry");

        assert_eq!(geometry.lowest_equivalent(10007), 10000);
        assert_eq!(geometry.highest_equivalent(10007), 10007);
        assert_eq!(geometry.size_of_equivalent_range(10007), 8);
        assert_eq!(geometry.median_equivalent(10007), 10004);
        assert_eq!(geometry.next_non_equivalent(10007), 10008);
        assert!(geometry.values_are_equivalent(10000, 10007));
        assert!(!geometry.values_are_equivalent(10007, 10008));

        // Unit resolution in the first bucket.
        assert_eq!(geometry.lowest_equivalent(1500), 1500);
        assert_eq!(geometry.highest_equivalent(1500), 1500);
        assert_eq!(geometry.size_of_equivalent_range(1500), 1);
    }

    #[test]
    fn test_extreme_values_saturate() {
        let geometry = Geometry::new(1, u64::MAX, 3).expect("valid geometry");
        assert_eq!(geometry.highest_equivalent(u64::MAX), u64::MAX);
        assert_eq!(geometry.next_non_equivalent(u64::MAX), u64::MAX);
        assert!(geometry.index_of(u64::MAX).is_some());
        assert_eq!(geometry.value_for(geometry.counts_len()), u64::MAX);
    }

    #[test]
    fn test_resized_keeps_slot_indexes() {
        let small = Geometry::new(1, 10_000, 3).expect("valid geometry");
        let large = small.resized(1_000_000_000).expect("valid geometry");
        assert!(small.is_index_compatible(&large));
        assert!(large.counts_len() > small.counts_len());
        for value in [0u64, 1, 2047, 2048, 9999] {
            assert_eq!(small.counts_index(value), large.counts_index(value));
        }
    }
}
