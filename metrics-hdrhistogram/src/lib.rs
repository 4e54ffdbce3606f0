//! High dynamic range histograms.
//!
//! A high dynamic range (HDR) histogram records values across a very wide range, such as latencies
//! from a microsecond to an hour, while keeping the relative error of every reported value within a
//! configured number of significant decimal digits.  Recording is a constant-time operation that
//! does not allocate, which makes these histograms suitable for recording measurements on hot
//! paths.
//!
//! # Overview
//!
//! - [`Histogram`] counts unsigned integer values.  It either covers a fixed range, or grows to
//!   cover larger values as they are recorded.
//! - [`DoubleHistogram`] counts non-negative floating-point values by scaling them, by a power of
//!   two, into an inner integer histogram.  It covers a window of values of a configured dynamic
//!   range, and slides that window as values are recorded.
//! - Both can be iterated in several ways (see [`IterationMode`]): every recorded value, linear or
//!   logarithmic steps, or percentile ticks.
//! - Both can be encoded into a compact binary form with an [`Encoder`], optionally compressed,
//!   and decoded again with a [`Decoder`].
//!
//! # Usage
//!
//! ```
//! use metrics_hdrhistogram::{Decoder, Encoder, Histogram};
//!
//! // Track values from 1 to one hour in microseconds, with three significant digits.
//! let mut histogram = Histogram::new_with_max(3_600_000_000, 3)?;
//! for latency in [125, 250, 250, 900, 12_000] {
//!     histogram.record_value(latency)?;
//! }
//!
//! assert_eq!(histogram.total_count(), 5);
//! assert_eq!(histogram.value_at_percentile(50.0)?, 250);
//!
//! let encoded = Encoder::new().encode(&histogram)?;
//! let decoded = Decoder::new().decode_integer(&encoded)?;
//! assert_eq!(decoded, histogram);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Features
//!
//! - `zstd` (default): enables [`Zstd`] compression for encoded histograms.
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod bucket;
pub use self::bucket::Geometry;

mod builder;
pub use self::builder::{DoubleHistogramBuilder, HistogramBuilder};

mod codec;
#[cfg(feature = "zstd")]
pub use self::codec::Zstd;
pub use self::codec::{
    peek_kind, Compression, DecodedHistogram, Decoder, Encodable, Encoder, HistogramKind,
};

mod double;
pub use self::double::DoubleHistogram;

mod error;
pub use self::error::{ConfigError, DecodeError, EncodeError, QueryError, RecordError};

mod histogram;
pub use self::histogram::Histogram;

mod iteration;
pub use self::iteration::{
    DoubleHistogramIter, DoubleIterationValue, HistogramIter, IterationMode, IterationValue,
};

mod recorder;
pub use self::recorder::ValueRecorder;
