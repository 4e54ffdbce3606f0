use std::io;

use thiserror::Error;

use crate::codec::HistogramKind;

/// Errors that could occur while configuring a histogram.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The number of significant digits was outside of `1..=5`.
    #[error("significant digits must be between 1 and 5, got {0}")]
    SignificantDigits(u8),

    /// The lowest discernible value was zero.
    #[error("lowest discernible value must be at least 1, got {0}")]
    LowestDiscernibleValue(u64),

    /// The highest trackable value was less than twice the lowest discernible value.
    #[error("highest trackable value {highest} is below twice the lowest value {lowest}")]
    HighestTrackableValue {
        /// Configured lowest discernible value.
        lowest: u64,
        /// Configured highest trackable value.
        highest: u64,
    },

    /// The requested precision cannot be represented for the requested lowest discernible value.
    #[error("cannot represent {digits} significant digits above a lowest value of {lowest}")]
    PrecisionUnrepresentable {
        /// Configured lowest discernible value.
        lowest: u64,
        /// Configured significant digits.
        digits: u8,
    },

    /// The highest-to-lowest value ratio of a double histogram was less than two.
    #[error("highest to lowest value ratio must be at least 2, got {0}")]
    RatioTooSmall(u64),

    /// The highest-to-lowest value ratio of a double histogram was too large for the precision.
    #[error("highest to lowest value ratio {ratio} is too large for {digits} significant digits")]
    RatioTooLarge {
        /// Configured highest-to-lowest value ratio.
        ratio: u64,
        /// Configured significant digits.
        digits: u8,
    },
}

/// Errors that could occur while recording values or merging histograms.
///
/// A failed operation never modifies the histogram it was called on.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RecordError {
    /// The value is larger than the histogram can track, and auto-resize is disabled.
    #[error("value {value} exceeds the highest trackable value {highest}")]
    ValueOutOfRange {
        /// Value being recorded.
        value: u64,
        /// Current highest trackable value.
        highest: u64,
    },

    /// The value could not be brought into the covered range of a double histogram.
    #[error("value {value} is outside of the covered range [{lowest}, {highest})")]
    DoubleOutOfRange {
        /// Value being recorded.
        value: f64,
        /// Current lowest value in the auto-range window.
        lowest: f64,
        /// Current highest value limit of the auto-range window.
        highest: f64,
    },

    /// Negative values cannot be recorded.
    #[error("negative values cannot be recorded, got {0}")]
    NegativeValue(f64),

    /// NaN and infinite values cannot be recorded.
    #[error("non-finite values cannot be recorded, got {0}")]
    NonFiniteValue(f64),

    /// The update would overflow the total count.
    #[error("recording {count} more samples would overflow the total count")]
    CountOverflow {
        /// Number of samples that were about to be added.
        count: u64,
    },
}

/// Errors that could occur while querying a histogram.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum QueryError {
    /// The percentile was not in `(0, 100]`.
    #[error("percentile must be in (0, 100], got {0}")]
    PercentileOutOfRange(f64),

    /// The histogram has no recorded values.
    #[error("histogram is empty")]
    Empty,
}

/// Errors that could occur while encoding a histogram.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// A slot holds more samples than the varint payload can represent.
    #[error("count {count} at index {index} is too large to encode")]
    CountTooLarge {
        /// Index of the offending slot.
        index: usize,
        /// Count held by the slot.
        count: u64,
    },

    /// The tag is longer than the encoding allows.
    #[error("tag of {0} bytes exceeds the maximum encodable length of 65535 bytes")]
    TagTooLong(usize),

    /// The counts payload is longer than the encoding allows.
    #[error("counts payload of {0} bytes exceeds the maximum encodable length")]
    PayloadTooLarge(usize),

    /// The compression step failed.
    #[error("failed to compress encoded histogram: {0}")]
    Compression(#[source] io::Error),
}

/// Errors that could occur while decoding a histogram.
///
/// Decoding never yields a partially-populated histogram: either a complete histogram is returned,
/// or one of these errors.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The leading cookie does not identify a known histogram encoding.
    #[error("unknown encoding cookie {0:#010x}")]
    UnknownCookie(u32),

    /// The cookie identifies an encoding revision this crate does not understand.
    #[error("unsupported encoding version {0}")]
    UnsupportedVersion(u32),

    /// The input ended before a complete histogram could be read.
    #[error("truncated input: needed {needed} more bytes but only {remaining} remain")]
    Truncated {
        /// Bytes required by the next field.
        needed: usize,
        /// Bytes left in the input.
        remaining: usize,
    },

    /// The input holds a different kind of histogram than was asked for.
    #[error("expected {expected:?} histogram, found {found:?} histogram")]
    KindMismatch {
        /// Kind of histogram that was asked for.
        expected: HistogramKind,
        /// Kind of histogram held by the input.
        found: HistogramKind,
    },

    /// The encoded contents are internally inconsistent.
    #[error("corrupt encoding: {0}")]
    Corrupt(&'static str),

    /// The encoded geometry is not a valid histogram configuration.
    #[error("invalid encoded configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// The input is compressed but no decompressor was configured.
    #[error("input is compressed but no decompressor is configured")]
    NoDecompressor,

    /// The decompression step failed.
    #[error("failed to decompress encoded histogram: {0}")]
    Decompression(#[source] io::Error),

    /// The decoded histogram would need more slots than the decoder allows.
    #[error("decoded histogram needs {needed} slots, exceeding the limit of {limit}")]
    TooLarge {
        /// Slots required by the encoded geometry.
        needed: usize,
        /// Configured allocation ceiling.
        limit: usize,
    },
}
