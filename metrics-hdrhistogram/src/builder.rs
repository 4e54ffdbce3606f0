use crate::{ConfigError, DoubleHistogram, Geometry, Histogram};

const DEFAULT_SIGNIFICANT_DIGITS: u8 = 3;
const DEFAULT_LOWEST_DISCERNIBLE_VALUE: u64 = 1;

/// Builder for a [`Histogram`].
#[derive(Debug, Clone)]
pub struct HistogramBuilder {
    significant_digits: u8,
    lowest_discernible_value: u64,
    highest_trackable_value: Option<u64>,
    auto_resize: Option<bool>,
    tag: Option<String>,
}

impl HistogramBuilder {
    /// Creates a new `HistogramBuilder` with the default configuration.
    pub fn new() -> HistogramBuilder {
        HistogramBuilder {
            significant_digits: DEFAULT_SIGNIFICANT_DIGITS,
            lowest_discernible_value: DEFAULT_LOWEST_DISCERNIBLE_VALUE,
            highest_trackable_value: None,
            auto_resize: None,
            tag: None,
        }
    }

    /// Sets the number of significant decimal digits of precision.
    ///
    /// Must be between 1 and 5.  Defaults to 3.
    #[must_use]
    pub fn with_significant_digits(mut self, significant_digits: u8) -> Self {
        self.significant_digits = significant_digits;
        self
    }

    /// Sets the lowest value that is distinguished from zero.
    ///
    /// Defaults to 1.
    #[must_use]
    pub fn with_lowest_discernible_value(mut self, lowest_discernible_value: u64) -> Self {
        self.lowest_discernible_value = lowest_discernible_value;
        self
    }

    /// Sets the highest value the histogram can track.
    ///
    /// Setting a highest trackable value disables auto-resizing, unless it is explicitly enabled
    /// with [`with_auto_resize`][Self::with_auto_resize].
    ///
    /// Defaults to an auto-resizing histogram that starts out covering `[lowest, 2 * lowest]`.
    #[must_use]
    pub fn with_highest_trackable_value(mut self, highest_trackable_value: u64) -> Self {
        self.highest_trackable_value = Some(highest_trackable_value);
        self
    }

    /// Sets whether the histogram grows to cover values larger than its highest trackable value.
    #[must_use]
    pub fn with_auto_resize(mut self, auto_resize: bool) -> Self {
        self.auto_resize = Some(auto_resize);
        self
    }

    /// Sets the tag of the histogram.
    #[must_use]
    pub fn with_tag<T: Into<String>>(mut self, tag: T) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Builds the histogram.
    ///
    /// # Errors
    ///
    /// If the configuration does not describe a valid geometry, an error is returned.
    pub fn build(self) -> Result<Histogram, ConfigError> {
        let highest_trackable_value = self
            .highest_trackable_value
            .unwrap_or_else(|| self.lowest_discernible_value.saturating_mul(2));
        let auto_resize = self.auto_resize.unwrap_or(self.highest_trackable_value.is_none());

        let geometry = Geometry::new(
            self.lowest_discernible_value,
            highest_trackable_value,
            self.significant_digits,
        )?;
        let mut histogram = Histogram::from_geometry(geometry, auto_resize);
        histogram.set_tag(self.tag);
        Ok(histogram)
    }
}

impl Default for HistogramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a [`DoubleHistogram`].
#[derive(Debug, Clone)]
pub struct DoubleHistogramBuilder {
    significant_digits: u8,
    highest_to_lowest_value_ratio: Option<u64>,
    auto_resize: Option<bool>,
    tag: Option<String>,
}

impl DoubleHistogramBuilder {
    /// Creates a new `DoubleHistogramBuilder` with the default configuration.
    pub fn new() -> DoubleHistogramBuilder {
        DoubleHistogramBuilder {
            significant_digits: DEFAULT_SIGNIFICANT_DIGITS,
            highest_to_lowest_value_ratio: None,
            auto_resize: None,
            tag: None,
        }
    }

    /// Sets the number of significant decimal digits of precision.
    ///
    /// Must be between 1 and 5.  Defaults to 3.
    #[must_use]
    pub fn with_significant_digits(mut self, significant_digits: u8) -> Self {
        self.significant_digits = significant_digits;
        self
    }

    /// Sets the ratio between the highest and lowest values the histogram covers at any time.
    ///
    /// Setting a ratio disables auto-resizing, unless it is explicitly enabled with
    /// [`with_auto_resize`][Self::with_auto_resize].
    ///
    /// Defaults to an auto-resizing histogram with a ratio of 2.
    #[must_use]
    pub fn with_highest_to_lowest_value_ratio(mut self, ratio: u64) -> Self {
        self.highest_to_lowest_value_ratio = Some(ratio);
        self
    }

    /// Sets whether the histogram widens its window when a value cannot be covered by sliding it.
    #[must_use]
    pub fn with_auto_resize(mut self, auto_resize: bool) -> Self {
        self.auto_resize = Some(auto_resize);
        self
    }

    /// Sets the tag of the histogram.
    #[must_use]
    pub fn with_tag<T: Into<String>>(mut self, tag: T) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Builds the histogram.
    ///
    /// # Errors
    ///
    /// If the precision or the ratio are invalid, an error is returned.
    pub fn build(self) -> Result<DoubleHistogram, ConfigError> {
        let mut histogram = match self.highest_to_lowest_value_ratio {
            Some(ratio) => {
                DoubleHistogram::with_highest_to_lowest_value_ratio(ratio, self.significant_digits)?
            }
            None => DoubleHistogram::new(self.significant_digits)?,
        };
        if let Some(auto_resize) = self.auto_resize {
            histogram.set_auto_resize(auto_resize);
        }
        histogram.set_tag(self.tag);
        Ok(histogram)
    }
}

impl Default for DoubleHistogramBuilder {
    fn default() -> Self {
        Self::new()
    }
}
