use crate::{DoubleHistogram, Histogram, RecordError};

/// A sink for recorded values.
///
/// Implemented by both [`Histogram`] and [`DoubleHistogram`], so that code producing
/// measurements does not need to know which kind of histogram it is feeding.
pub trait ValueRecorder {
    /// Type of the values being recorded.
    type Value: Copy;

    /// Records a single sample.
    ///
    /// # Errors
    ///
    /// If the value cannot be recorded, an error is returned and the recorder is left unchanged.
    fn record_value(&mut self, value: Self::Value) -> Result<(), RecordError>;

    /// Records `count` samples of `value`.
    ///
    /// # Errors
    ///
    /// If the value cannot be recorded, an error is returned and the recorder is left unchanged.
    fn record_value_with_count(
        &mut self,
        value: Self::Value,
        count: u64,
    ) -> Result<(), RecordError>;

    /// Records a single sample, backfilling samples likely missed due to coordinated omission.
    ///
    /// # Errors
    ///
    /// If the value cannot be recorded, an error is returned and the recorder is left unchanged.
    fn record_value_with_expected_interval(
        &mut self,
        value: Self::Value,
        expected_interval: Self::Value,
    ) -> Result<(), RecordError>;

    /// Clears all recorded samples.
    fn reset(&mut self);
}

impl ValueRecorder for Histogram {
    type Value = u64;

    fn record_value(&mut self, value: u64) -> Result<(), RecordError> {
        Histogram::record_value(self, value)
    }

    fn record_value_with_count(&mut self, value: u64, count: u64) -> Result<(), RecordError> {
        Histogram::record_value_with_count(self, value, count)
    }

    fn record_value_with_expected_interval(
        &mut self,
        value: u64,
        expected_interval: u64,
    ) -> Result<(), RecordError> {
        Histogram::record_value_with_expected_interval(self, value, expected_interval)
    }

    fn reset(&mut self) {
        Histogram::reset(self)
    }
}

impl ValueRecorder for DoubleHistogram {
    type Value = f64;

    fn record_value(&mut self, value: f64) -> Result<(), RecordError> {
        DoubleHistogram::record_value(self, value)
    }

    fn record_value_with_count(&mut self, value: f64, count: u64) -> Result<(), RecordError> {
        DoubleHistogram::record_value_with_count(self, value, count)
    }

    fn record_value_with_expected_interval(
        &mut self,
        value: f64,
        expected_interval: f64,
    ) -> Result<(), RecordError> {
        DoubleHistogram::record_value_with_expected_interval(self, value, expected_interval)
    }

    fn reset(&mut self) {
        DoubleHistogram::reset(self)
    }
}

#[cfg(test)]
mod tests {
    use super::ValueRecorder;
    use crate::{DoubleHistogram, Histogram};

    fn record_all<R: ValueRecorder>(recorder: &mut R, values: &[R::Value]) {
        for &value in values {
            recorder.record_value(value).expect("recordable");
        }
    }

    #[test]
    fn test_recorders_are_interchangeable() {
        let mut integer = Histogram::new(3).expect("valid histogram");
        record_all(&mut integer, &[1, 2, 3]);
        assert_eq!(integer.total_count(), 3);

        let mut double = DoubleHistogram::new(3).expect("valid histogram");
        record_all(&mut double, &[0.5, 2.5, 1000.0]);
        assert_eq!(double.total_count(), 3);

        ValueRecorder::reset(&mut integer);
        ValueRecorder::reset(&mut double);
        assert_eq!(integer.total_count(), 0);
        assert_eq!(double.total_count(), 0);
    }
}
