//! Compact binary encoding of histograms.
//!
//! Both integer and double histograms are encoded as a self-describing, big-endian byte sequence
//! starting with a 32-bit cookie that identifies the kind of histogram, the encoding version, and
//! whether the rest of the encoding is compressed.
//!
//! An uncompressed integer histogram is laid out as:
//!
//! ```text
//! u32 cookie | u32 payload_len | u8 significant_digits | u8 flags
//! u64 lowest_discernible_value | u64 highest_trackable_value
//! u64 start_timestamp | u64 end_timestamp | u16 tag_len | tag | payload
//! ```
//!
//! where `flags` marks the presence of each timestamp and of the tag, and whether the histogram
//! auto-resizes.  The payload holds the counts, as described in the `varint` module.
//!
//! An uncompressed double histogram is laid out as:
//!
//! ```text
//! u32 cookie | u64 configured_ratio | f64 current_lowest_value_in_auto_range | u8 auto_resize
//! <uncompressed encoding of the inner integer histogram>
//! ```
//!
//! A compressed histogram of either kind is its compressed cookie, followed by the length of the
//! compressed data as a `u32` and then the compressed uncompressed encoding.
use std::{fmt, sync::Arc};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::{double, DecodeError, DoubleHistogram, EncodeError, Geometry, Histogram, RecordError};

mod compression;
pub use self::compression::Compression;
#[cfg(feature = "zstd")]
pub use self::compression::Zstd;

mod varint;

const INTEGER_COOKIE_BASE: u32 = 0x1c84_9300;
const DOUBLE_COOKIE_BASE: u32 = 0x0c72_1240;
const FORMAT_VERSION: u32 = 3;

const COMPRESSED_FLAG: u32 = 0x01;
const VERSION_MASK: u32 = 0x1e;
const BASE_MASK: u32 = !(VERSION_MASK | COMPRESSED_FLAG);

const FLAG_START_TIMESTAMP: u8 = 0x01;
const FLAG_END_TIMESTAMP: u8 = 0x02;
const FLAG_TAG: u8 = 0x04;
const FLAG_AUTO_RESIZE: u8 = 0x08;
const KNOWN_FLAGS: u8 = FLAG_START_TIMESTAMP | FLAG_END_TIMESTAMP | FLAG_TAG | FLAG_AUTO_RESIZE;

const INTEGER_HEADER_LEN: usize = 4 + 4 + 1 + 1 + 8 * 4 + 2;
const DOUBLE_HEADER_LEN: usize = 4 + 8 + 8 + 1;
const COMPRESSED_HEADER_LEN: usize = 4 + 4;

const DEFAULT_MAX_COUNTS_LEN: usize = 1 << 24;
const DEFAULT_MAX_DECOMPRESSED_LEN: usize = 64 * 1024 * 1024;

/// The kind of an encoded histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistogramKind {
    /// An integer [`Histogram`].
    Integer,

    /// A [`DoubleHistogram`].
    Double,
}

impl HistogramKind {
    fn cookie(self, compressed: bool) -> u32 {
        let base = match self {
            HistogramKind::Integer => INTEGER_COOKIE_BASE,
            HistogramKind::Double => DOUBLE_COOKIE_BASE,
        };
        base | (FORMAT_VERSION << 1) | if compressed { COMPRESSED_FLAG } else { 0 }
    }
}

#[derive(Debug, Clone, Copy)]
struct Cookie {
    kind: HistogramKind,
    compressed: bool,
}

impl Cookie {
    fn parse(cookie: u32) -> Result<Cookie, DecodeError> {
        let kind = match cookie & BASE_MASK {
            INTEGER_COOKIE_BASE => HistogramKind::Integer,
            DOUBLE_COOKIE_BASE => HistogramKind::Double,
            _ => return Err(DecodeError::UnknownCookie(cookie)),
        };

        let version = (cookie & VERSION_MASK) >> 1;
        if version != FORMAT_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }

        Ok(Cookie { kind, compressed: cookie & COMPRESSED_FLAG != 0 })
    }

    fn read<B: Buf>(buf: &mut B) -> Result<Cookie, DecodeError> {
        ensure_remaining(buf, 4)?;
        Cookie::parse(buf.get_u32())
    }
}

/// Gets the kind of histogram encoded in `bytes`, without decoding it.
///
/// # Errors
///
/// If `bytes` does not start with a known cookie, an error is returned.
pub fn peek_kind(bytes: &[u8]) -> Result<HistogramKind, DecodeError> {
    let mut cookie = bytes;
    Cookie::read(&mut cookie).map(|cookie| cookie.kind)
}

mod private {
    use bytes::BytesMut;

    use crate::EncodeError;

    /// Writes the uncompressed encoding.
    pub trait Sealed {
        /// Writes the uncompressed encoding of `self` into `buf`.
        fn write_uncompressed(&self, buf: &mut BytesMut) -> Result<(), EncodeError>;
    }
}

/// A histogram that can be encoded.
///
/// This trait is sealed, and is implemented for [`Histogram`], [`DoubleHistogram`], and
/// [`DecodedHistogram`].  It allows processing encoded histograms generically, regardless of their
/// kind.
pub trait Encodable: private::Sealed {
    /// Gets the kind of histogram.
    fn kind(&self) -> HistogramKind;

    /// Gets an upper bound on the size of the uncompressed encoding.
    fn needed_capacity(&self) -> usize;

    /// Gets the start timestamp.
    fn start_timestamp(&self) -> Option<u64>;

    /// Gets the end timestamp.
    fn end_timestamp(&self) -> Option<u64>;

    /// Gets the tag.
    fn tag(&self) -> Option<&str>;

    /// Gets the largest recorded value, as a floating-point number.
    fn max_value_as_f64(&self) -> f64;
}

impl private::Sealed for Histogram {
    fn write_uncompressed(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        write_integer(self, buf)
    }
}

impl Encodable for Histogram {
    fn kind(&self) -> HistogramKind {
        HistogramKind::Integer
    }

    fn needed_capacity(&self) -> usize {
        let tag_len = self.tag().map_or(0, str::len);
        INTEGER_HEADER_LEN + tag_len + varint::max_encoded_len(self.counts())
    }

    fn start_timestamp(&self) -> Option<u64> {
        Histogram::start_timestamp(self)
    }

    fn end_timestamp(&self) -> Option<u64> {
        Histogram::end_timestamp(self)
    }

    fn tag(&self) -> Option<&str> {
        Histogram::tag(self)
    }

    fn max_value_as_f64(&self) -> f64 {
        self.max() as f64
    }
}

impl private::Sealed for DoubleHistogram {
    fn write_uncompressed(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.reserve(DOUBLE_HEADER_LEN);
        buf.put_u32(HistogramKind::Double.cookie(false));
        buf.put_u64(self.highest_to_lowest_value_ratio());
        buf.put_f64(self.current_lowest_value_in_auto_range());
        buf.put_u8(u8::from(self.is_auto_resize()));
        write_integer(self.integer_histogram(), buf)
    }
}

impl Encodable for DoubleHistogram {
    fn kind(&self) -> HistogramKind {
        HistogramKind::Double
    }

    fn needed_capacity(&self) -> usize {
        DOUBLE_HEADER_LEN + self.integer_histogram().needed_capacity()
    }

    fn start_timestamp(&self) -> Option<u64> {
        DoubleHistogram::start_timestamp(self)
    }

    fn end_timestamp(&self) -> Option<u64> {
        DoubleHistogram::end_timestamp(self)
    }

    fn tag(&self) -> Option<&str> {
        DoubleHistogram::tag(self)
    }

    fn max_value_as_f64(&self) -> f64 {
        self.max()
    }
}

/// A decoded histogram of either kind.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedHistogram {
    /// An integer histogram.
    Integer(Histogram),

    /// A double histogram.
    Double(DoubleHistogram),
}

impl DecodedHistogram {
    /// Gets the integer histogram, if this is one.
    pub fn into_integer(self) -> Option<Histogram> {
        match self {
            DecodedHistogram::Integer(histogram) => Some(histogram),
            DecodedHistogram::Double(_) => None,
        }
    }

    /// Gets the double histogram, if this is one.
    pub fn into_double(self) -> Option<DoubleHistogram> {
        match self {
            DecodedHistogram::Integer(_) => None,
            DecodedHistogram::Double(histogram) => Some(histogram),
        }
    }

    /// Gets the total number of recorded samples.
    pub fn total_count(&self) -> u64 {
        match self {
            DecodedHistogram::Integer(histogram) => histogram.total_count(),
            DecodedHistogram::Double(histogram) => histogram.total_count(),
        }
    }
}

impl private::Sealed for DecodedHistogram {
    fn write_uncompressed(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        match self {
            DecodedHistogram::Integer(histogram) => write_integer(histogram, buf),
            DecodedHistogram::Double(histogram) => {
                private::Sealed::write_uncompressed(histogram, buf)
            }
        }
    }
}

impl Encodable for DecodedHistogram {
    fn kind(&self) -> HistogramKind {
        match self {
            DecodedHistogram::Integer(_) => HistogramKind::Integer,
            DecodedHistogram::Double(_) => HistogramKind::Double,
        }
    }

    fn needed_capacity(&self) -> usize {
        match self {
            DecodedHistogram::Integer(histogram) => histogram.needed_capacity(),
            DecodedHistogram::Double(histogram) => histogram.needed_capacity(),
        }
    }

    fn start_timestamp(&self) -> Option<u64> {
        match self {
            DecodedHistogram::Integer(histogram) => histogram.start_timestamp(),
            DecodedHistogram::Double(histogram) => histogram.start_timestamp(),
        }
    }

    fn end_timestamp(&self) -> Option<u64> {
        match self {
            DecodedHistogram::Integer(histogram) => histogram.end_timestamp(),
            DecodedHistogram::Double(histogram) => histogram.end_timestamp(),
        }
    }

    fn tag(&self) -> Option<&str> {
        match self {
            DecodedHistogram::Integer(histogram) => histogram.tag(),
            DecodedHistogram::Double(histogram) => histogram.tag(),
        }
    }

    fn max_value_as_f64(&self) -> f64 {
        match self {
            DecodedHistogram::Integer(histogram) => histogram.max_value_as_f64(),
            DecodedHistogram::Double(histogram) => histogram.max_value_as_f64(),
        }
    }
}

impl From<Histogram> for DecodedHistogram {
    fn from(histogram: Histogram) -> Self {
        DecodedHistogram::Integer(histogram)
    }
}

impl From<DoubleHistogram> for DecodedHistogram {
    fn from(histogram: DoubleHistogram) -> Self {
        DecodedHistogram::Double(histogram)
    }
}

/// Encodes histograms into their binary form.
///
/// By default, histograms are encoded uncompressed.
#[derive(Clone, Default)]
pub struct Encoder {
    compression: Option<Arc<dyn Compression>>,
}

impl Encoder {
    /// Creates a new `Encoder` that does not compress.
    pub fn new() -> Encoder {
        Encoder::default()
    }

    /// Sets the compression scheme used for encoding.
    #[must_use]
    pub fn with_compression<C>(mut self, compression: C) -> Encoder
    where
        C: Compression + 'static,
    {
        self.compression = Some(Arc::new(compression));
        self
    }

    /// Encodes `histogram`.
    ///
    /// # Errors
    ///
    /// If the histogram holds counts that cannot be encoded, or compression fails, an error is
    /// returned.
    pub fn encode<H>(&self, histogram: &H) -> Result<Bytes, EncodeError>
    where
        H: Encodable + ?Sized,
    {
        let mut buf = BytesMut::with_capacity(histogram.needed_capacity());
        private::Sealed::write_uncompressed(histogram, &mut buf)?;

        let compression = match &self.compression {
            Some(compression) => compression,
            None => {
                trace!(kind = ?histogram.kind(), len = buf.len(), "Encoded histogram.");
                return Ok(buf.freeze());
            }
        };

        let compressed = compression.compress(&buf).map_err(EncodeError::Compression)?;
        let compressed_len = u32::try_from(compressed.len())
            .map_err(|_| EncodeError::PayloadTooLarge(compressed.len()))?;
        trace!(
            kind = ?histogram.kind(),
            uncompressed_len = buf.len(),
            compressed_len,
            "Encoded compressed histogram."
        );

        let mut out = BytesMut::with_capacity(COMPRESSED_HEADER_LEN + compressed.len());
        out.put_u32(histogram.kind().cookie(true));
        out.put_u32(compressed_len);
        out.put_slice(&compressed);
        Ok(out.freeze())
    }
}

impl fmt::Debug for Encoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encoder").field("compressed", &self.compression.is_some()).finish()
    }
}

/// Decodes histograms from their binary form.
///
/// Decoding always builds a fresh histogram, and never hands back a partially-decoded one.  The
/// amount of memory a decoder allocates is bounded by its configured maximum number of counts
/// slots and maximum decompressed length, so untrusted input can be decoded safely.
#[derive(Clone)]
pub struct Decoder {
    compression: Option<Arc<dyn Compression>>,
    min_bar: u64,
    max_counts_len: usize,
    max_decompressed_len: usize,
}

impl Decoder {
    /// Creates a new `Decoder`.
    ///
    /// When the `zstd` feature is enabled, the decoder can decompress Zstandard-compressed
    /// histograms.
    pub fn new() -> Decoder {
        Decoder {
            #[cfg(feature = "zstd")]
            compression: Some(Arc::new(Zstd::new())),
            #[cfg(not(feature = "zstd"))]
            compression: None,
            min_bar: 0,
            max_counts_len: DEFAULT_MAX_COUNTS_LEN,
            max_decompressed_len: DEFAULT_MAX_DECOMPRESSED_LEN,
        }
    }

    /// Sets the compression scheme used to decompress compressed histograms.
    #[must_use]
    pub fn with_compression<C>(mut self, compression: C) -> Decoder
    where
        C: Compression + 'static,
    {
        self.compression = Some(Arc::new(compression));
        self
    }

    /// Disables decompression.
    ///
    /// Compressed histograms fail to decode with [`DecodeError::NoDecompressor`].
    #[must_use]
    pub fn without_compression(mut self) -> Decoder {
        self.compression = None;
        self
    }

    /// Sets the minimum bar for the decoded range.
    ///
    /// Decoded integer histograms track values up to at least `min_bar`, and decoded double
    /// histograms have a highest-to-lowest value ratio of at least `min_bar`.  The encoded range
    /// is only ever widened, never narrowed.
    #[must_use]
    pub fn with_min_bar(mut self, min_bar: u64) -> Decoder {
        self.min_bar = min_bar;
        self
    }

    /// Sets the maximum number of counts slots a decoded histogram may have.
    ///
    /// Defaults to 2^24.
    #[must_use]
    pub fn with_max_counts_len(mut self, max_counts_len: usize) -> Decoder {
        self.max_counts_len = max_counts_len;
        self
    }

    /// Sets the maximum length, in bytes, of a decompressed encoding.
    ///
    /// Defaults to 64 MiB.
    #[must_use]
    pub fn with_max_decompressed_len(mut self, max_decompressed_len: usize) -> Decoder {
        self.max_decompressed_len = max_decompressed_len;
        self
    }

    /// Decodes the histogram encoded in `bytes`.
    ///
    /// `bytes` must hold exactly one encoded histogram.
    ///
    /// # Errors
    ///
    /// If `bytes` is not a valid encoding, or the encoded histogram exceeds the configured limits,
    /// an error is returned.
    pub fn decode(&self, bytes: &[u8]) -> Result<DecodedHistogram, DecodeError> {
        let mut buf = bytes;
        let histogram = self.decode_from(&mut buf)?;
        if buf.has_remaining() {
            return Err(DecodeError::Corrupt("trailing bytes after encoded histogram"));
        }
        Ok(histogram)
    }

    /// Decodes the next histogram from `buf`, consuming exactly its encoding.
    ///
    /// This allows decoding a stream of back-to-back encoded histograms.
    ///
    /// # Errors
    ///
    /// If `buf` does not start with a valid encoding, or the encoded histogram exceeds the
    /// configured limits, an error is returned.
    pub fn decode_from<B: Buf>(&self, buf: &mut B) -> Result<DecodedHistogram, DecodeError> {
        let cookie = Cookie::read(buf)?;
        if !cookie.compressed {
            return self.decode_body(cookie.kind, buf);
        }

        ensure_remaining(buf, 4)?;
        let compressed_len = buf.get_u32() as usize;
        ensure_remaining(buf, compressed_len)?;
        let compressed = buf.copy_to_bytes(compressed_len);

        let compression = self.compression.as_ref().ok_or(DecodeError::NoDecompressor)?;
        let data = compression
            .decompress(&compressed, self.max_decompressed_len)
            .map_err(DecodeError::Decompression)?;
        trace!(
            kind = ?cookie.kind,
            compressed_len,
            uncompressed_len = data.len(),
            "Decompressed encoded histogram."
        );

        let mut inner = data.as_slice();
        let inner_cookie = Cookie::read(&mut inner)?;
        if inner_cookie.kind != cookie.kind || inner_cookie.compressed {
            return Err(DecodeError::Corrupt("compressed contents do not match their cookie"));
        }
        let histogram = self.decode_body(cookie.kind, &mut inner)?;
        if inner.has_remaining() {
            return Err(DecodeError::Corrupt("trailing bytes after compressed histogram"));
        }
        Ok(histogram)
    }

    /// Decodes an integer histogram.
    ///
    /// # Errors
    ///
    /// If `bytes` holds a double histogram, or is not a valid encoding, an error is returned.
    pub fn decode_integer(&self, bytes: &[u8]) -> Result<Histogram, DecodeError> {
        match self.decode(bytes)? {
            DecodedHistogram::Integer(histogram) => Ok(histogram),
            DecodedHistogram::Double(_) => Err(DecodeError::KindMismatch {
                expected: HistogramKind::Integer,
                found: HistogramKind::Double,
            }),
        }
    }

    /// Decodes a double histogram.
    ///
    /// # Errors
    ///
    /// If `bytes` holds an integer histogram, or is not a valid encoding, an error is returned.
    pub fn decode_double(&self, bytes: &[u8]) -> Result<DoubleHistogram, DecodeError> {
        match self.decode(bytes)? {
            DecodedHistogram::Double(histogram) => Ok(histogram),
            DecodedHistogram::Integer(_) => Err(DecodeError::KindMismatch {
                expected: HistogramKind::Double,
                found: HistogramKind::Integer,
            }),
        }
    }

    fn decode_body<B: Buf>(
        &self,
        kind: HistogramKind,
        buf: &mut B,
    ) -> Result<DecodedHistogram, DecodeError> {
        match kind {
            HistogramKind::Integer => self.read_integer(buf, self.min_bar).map(Into::into),
            HistogramKind::Double => self.read_double(buf).map(Into::into),
        }
    }

    // Reads an uncompressed integer histogram, following its cookie.
    fn read_integer<B: Buf>(&self, buf: &mut B, min_bar: u64) -> Result<Histogram, DecodeError> {
        ensure_remaining(buf, INTEGER_HEADER_LEN - 4)?;
        let payload_len = buf.get_u32() as usize;
        let significant_digits = buf.get_u8();
        let flags = buf.get_u8();
        let lowest_discernible_value = buf.get_u64();
        let encoded_highest_trackable_value = buf.get_u64();
        let start_timestamp = buf.get_u64();
        let end_timestamp = buf.get_u64();
        let tag_len = usize::from(buf.get_u16());
        if flags & !KNOWN_FLAGS != 0 {
            return Err(DecodeError::Corrupt("unknown header flags"));
        }

        ensure_remaining(buf, tag_len)?;
        let tag = buf.copy_to_bytes(tag_len);
        let tag = match flags & FLAG_TAG {
            0 if tag_len > 0 => return Err(DecodeError::Corrupt("tag bytes without a tag flag")),
            0 => None,
            _ => Some(
                String::from_utf8(tag.to_vec())
                    .map_err(|_| DecodeError::Corrupt("tag is not valid UTF-8"))?,
            ),
        };

        let highest_trackable_value = encoded_highest_trackable_value.max(min_bar);
        if highest_trackable_value != encoded_highest_trackable_value {
            debug!(
                encoded_highest_trackable_value,
                highest_trackable_value, "Widening decoded histogram to the minimum bar."
            );
        }
        let geometry =
            Geometry::new(lowest_discernible_value, highest_trackable_value, significant_digits)?;
        self.check_counts_len(&geometry)?;

        ensure_remaining(buf, payload_len)?;
        let payload = buf.copy_to_bytes(payload_len);

        let mut histogram = Histogram::from_geometry(geometry, flags & FLAG_AUTO_RESIZE != 0);
        varint::decode_counts(payload, |index, count| {
            histogram.add_count_at_index(index, count).map_err(|e| match e {
                RecordError::CountOverflow { .. } => {
                    DecodeError::Corrupt("total count overflows 64 bits")
                }
                _ => DecodeError::Corrupt("counts extend beyond the encoded range"),
            })
        })?;

        if flags & FLAG_START_TIMESTAMP != 0 {
            histogram.set_start_timestamp(start_timestamp);
        }
        if flags & FLAG_END_TIMESTAMP != 0 {
            histogram.set_end_timestamp(end_timestamp);
        }
        histogram.set_tag(tag);
        Ok(histogram)
    }

    // Reads an uncompressed double histogram, following its cookie.
    fn read_double<B: Buf>(&self, buf: &mut B) -> Result<DoubleHistogram, DecodeError> {
        ensure_remaining(buf, DOUBLE_HEADER_LEN - 4)?;
        let encoded_ratio = buf.get_u64();
        let current_lowest_value_in_auto_range = buf.get_f64();
        let auto_resize = match buf.get_u8() {
            0 => false,
            1 => true,
            _ => return Err(DecodeError::Corrupt("invalid auto-resize marker")),
        };
        if !(current_lowest_value_in_auto_range.is_finite()
            && current_lowest_value_in_auto_range > 0.0)
        {
            return Err(DecodeError::Corrupt("invalid auto-range window"));
        }

        let cookie = Cookie::read(buf)?;
        if cookie.kind != HistogramKind::Integer || cookie.compressed {
            return Err(DecodeError::Corrupt("double histogram does not wrap an integer histogram"));
        }
        let integer = self.read_integer(buf, 0)?;

        let ratio = encoded_ratio.max(self.min_bar);
        if ratio != encoded_ratio {
            debug!(encoded_ratio, ratio, "Widening decoded double histogram to the minimum bar.");
        }
        let geometry = double::integer_geometry(ratio, integer.significant_digits())?;
        self.check_counts_len(&geometry)?;

        let histogram = DoubleHistogram::from_parts(
            ratio,
            auto_resize,
            current_lowest_value_in_auto_range,
            &integer,
        )?;
        Ok(histogram)
    }

    fn check_counts_len(&self, geometry: &Geometry) -> Result<(), DecodeError> {
        let needed = geometry.counts_len();
        if needed > self.max_counts_len {
            return Err(DecodeError::TooLarge { needed, limit: self.max_counts_len });
        }
        Ok(())
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoder")
            .field("decompresses", &self.compression.is_some())
            .field("min_bar", &self.min_bar)
            .field("max_counts_len", &self.max_counts_len)
            .field("max_decompressed_len", &self.max_decompressed_len)
            .finish()
    }
}

fn write_integer(histogram: &Histogram, buf: &mut BytesMut) -> Result<(), EncodeError> {
    let tag = histogram.tag().filter(|tag| !tag.is_empty());
    let tag_len = match tag {
        Some(tag) => u16::try_from(tag.len()).map_err(|_| EncodeError::TagTooLong(tag.len()))?,
        None => 0,
    };

    let mut payload = BytesMut::with_capacity(varint::max_encoded_len(histogram.counts()));
    varint::encode_counts(histogram.counts(), &mut payload)?;
    let payload_len =
        u32::try_from(payload.len()).map_err(|_| EncodeError::PayloadTooLarge(payload.len()))?;

    let mut flags = 0;
    if histogram.start_timestamp().is_some() {
        flags |= FLAG_START_TIMESTAMP;
    }
    if histogram.end_timestamp().is_some() {
        flags |= FLAG_END_TIMESTAMP;
    }
    if tag.is_some() {
        flags |= FLAG_TAG;
    }
    if histogram.is_auto_resize() {
        flags |= FLAG_AUTO_RESIZE;
    }

    let geometry = histogram.geometry();
    buf.reserve(INTEGER_HEADER_LEN + usize::from(tag_len) + payload.len());
    buf.put_u32(HistogramKind::Integer.cookie(false));
    buf.put_u32(payload_len);
    buf.put_u8(geometry.significant_digits());
    buf.put_u8(flags);
    buf.put_u64(geometry.lowest_discernible_value());
    buf.put_u64(geometry.highest_trackable_value());
    buf.put_u64(histogram.start_timestamp().unwrap_or(0));
    buf.put_u64(histogram.end_timestamp().unwrap_or(0));
    buf.put_u16(tag_len);
    if let Some(tag) = tag {
        buf.put_slice(tag.as_bytes());
    }
    buf.put_slice(&payload);
    Ok(())
}

fn ensure_remaining<B: Buf>(buf: &B, needed: usize) -> Result<(), DecodeError> {
    let remaining = buf.remaining();
    if remaining < needed {
        return Err(DecodeError::Truncated { needed, remaining });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{peek_kind, Decoder, Encodable, Encoder, HistogramKind};
    use crate::{DecodeError, DecodedHistogram, DoubleHistogram, Histogram};

    fn sample_histogram() -> Histogram {
        let mut histogram = Histogram::new_with_max(3_600_000_000, 3).expect("valid histogram");
        for value in [1, 7, 7, 42, 10_007, 250_000, 3_600_000_000] {
            histogram.record_value(value).expect("recordable");
        }
        histogram.record_value_with_count(500, 1_000).expect("recordable");
        histogram.set_start_timestamp(1_000);
        histogram.set_end_timestamp(2_000);
        histogram.set_tag(Some("api.latency".to_string()));
        histogram
    }

    #[test]
    fn test_cookies() {
        assert_eq!(HistogramKind::Integer.cookie(false), 0x1c84_9306);
        assert_eq!(HistogramKind::Integer.cookie(true), 0x1c84_9307);
        assert_eq!(HistogramKind::Double.cookie(false), 0x0c72_1246);
        assert_eq!(HistogramKind::Double.cookie(true), 0x0c72_1247);
    }

    #[test]
    fn test_integer_round_trip() {
        let histogram = sample_histogram();
        let encoded = Encoder::new().encode(&histogram).expect("encodable");
        assert!(encoded.len() <= histogram.needed_capacity());
        assert_eq!(peek_kind(&encoded).expect("known cookie"), HistogramKind::Integer);

        let decoded = Decoder::new().decode_integer(&encoded).expect("decodable");
        assert_eq!(decoded, histogram);
        assert_eq!(decoded.total_count(), histogram.total_count());
        assert_eq!(decoded.max(), histogram.max());
        assert_eq!(decoded.min_nz(), histogram.min_nz());
        assert_eq!(decoded.start_timestamp(), Some(1_000));
        assert_eq!(decoded.end_timestamp(), Some(2_000));
        assert_eq!(decoded.tag(), Some("api.latency"));
        assert!(!decoded.is_auto_resize());
        assert_eq!(decoded.value_at_percentile(99.0), histogram.value_at_percentile(99.0));
    }

    #[test]
    fn test_empty_round_trip() {
        let histogram = Histogram::new(2).expect("valid histogram");
        let encoded = Encoder::new().encode(&histogram).expect("encodable");
        let decoded = Decoder::new().decode_integer(&encoded).expect("decodable");
        assert!(decoded.is_empty());
        assert!(decoded.is_auto_resize());
        assert_eq!(decoded.tag(), None);
        assert_eq!(decoded.start_timestamp(), None);
    }

    #[test]
    fn test_empty_tag_is_dropped() {
        let mut histogram = Histogram::new(2).expect("valid histogram");
        histogram.set_tag(Some(String::new()));
        let encoded = Encoder::new().encode(&histogram).expect("encodable");
        let decoded = Decoder::new().decode_integer(&encoded).expect("decodable");
        assert_eq!(decoded.tag(), None);
    }

    #[test]
    fn test_double_round_trip() {
        let mut histogram = DoubleHistogram::new(3).expect("valid histogram");
        for value in [0.001, 0.5, 2.25, 1_000.0, 12_345.678] {
            histogram.record_value(value).expect("recordable");
        }
        histogram.set_tag(Some("ratio".to_string()));

        let encoded = Encoder::new().encode(&histogram).expect("encodable");
        assert_eq!(peek_kind(&encoded).expect("known cookie"), HistogramKind::Double);

        let decoded = Decoder::new().decode_double(&encoded).expect("decodable");
        assert_eq!(decoded, histogram);
        assert_eq!(decoded.tag(), Some("ratio"));
        assert_eq!(decoded.is_auto_resize(), histogram.is_auto_resize());
        assert_eq!(
            decoded.current_lowest_value_in_auto_range(),
            histogram.current_lowest_value_in_auto_range()
        );
        assert_eq!(decoded.max(), histogram.max());
        assert_eq!(decoded.value_at_percentile(50.0), histogram.value_at_percentile(50.0));
    }

    #[cfg(feature = "zstd")]
    #[test]
    fn test_compressed_round_trip() {
        use super::Zstd;

        let histogram = sample_histogram();
        let raw = Encoder::new().encode(&histogram).expect("encodable");
        let compressed =
            Encoder::new().with_compression(Zstd::new()).encode(&histogram).expect("encodable");
        assert_eq!(&compressed[..4], &[0x1c, 0x84, 0x93, 0x07]);
        assert_eq!(peek_kind(&compressed).expect("known cookie"), HistogramKind::Integer);

        let decoded = Decoder::new().decode(&compressed).expect("decodable");
        assert_eq!(decoded, DecodedHistogram::Integer(histogram));
        assert_eq!(Decoder::new().decode(&raw).expect("decodable"), decoded);

        let result = Decoder::new().without_compression().decode(&compressed);
        assert!(matches!(result, Err(DecodeError::NoDecompressor)));

        let result = Decoder::new().with_max_decompressed_len(16).decode(&compressed);
        assert!(matches!(result, Err(DecodeError::Decompression(_))));
    }

    #[test]
    fn test_kind_mismatch() {
        let encoded = Encoder::new().encode(&sample_histogram()).expect("encodable");
        let result = Decoder::new().decode_double(&encoded);
        assert!(matches!(
            result,
            Err(DecodeError::KindMismatch {
                expected: HistogramKind::Double,
                found: HistogramKind::Integer
            })
        ));
    }

    #[test]
    fn test_malformed_input() {
        let encoded = Encoder::new().encode(&sample_histogram()).expect("encodable");

        assert!(matches!(peek_kind(&[0x1c, 0x84]), Err(DecodeError::Truncated { .. })));
        assert!(matches!(
            Decoder::new().decode(&[0xde, 0xad, 0xbe, 0xef]),
            Err(DecodeError::UnknownCookie(0xdead_beef))
        ));
        assert!(matches!(
            Decoder::new().decode(&[0x1c, 0x84, 0x93, 0x04]),
            Err(DecodeError::UnsupportedVersion(2))
        ));

        for len in 0..encoded.len() {
            let result = Decoder::new().decode(&encoded[..len]);
            assert!(result.is_err(), "decoding {} of {} bytes succeeded", len, encoded.len());
        }

        let mut trailing = encoded.to_vec();
        trailing.push(0);
        assert!(matches!(Decoder::new().decode(&trailing), Err(DecodeError::Corrupt(_))));

        let mut bad_digits = encoded.to_vec();
        bad_digits[8] = 9;
        assert!(matches!(Decoder::new().decode(&bad_digits), Err(DecodeError::InvalidConfig(_))));
    }

    #[test]
    fn test_back_to_back_decoding() {
        let first = sample_histogram();
        let mut second = Histogram::new(3).expect("valid histogram");
        second.record_value(12).expect("recordable");

        let encoder = Encoder::new();
        let mut stream = encoder.encode(&first).expect("encodable").to_vec();
        stream.extend_from_slice(&encoder.encode(&second).expect("encodable"));

        let decoder = Decoder::new();
        let mut buf = stream.as_slice();
        assert_eq!(
            decoder.decode_from(&mut buf).expect("decodable"),
            DecodedHistogram::Integer(first)
        );
        assert_eq!(
            decoder.decode_from(&mut buf).expect("decodable"),
            DecodedHistogram::Integer(second)
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_max_counts_len() {
        let histogram = sample_histogram();
        let encoded = Encoder::new().encode(&histogram).expect("encodable");
        let needed = histogram.geometry().counts_len();

        let result = Decoder::new().with_max_counts_len(needed - 1).decode(&encoded);
        match result {
            Err(DecodeError::TooLarge { needed: actual, limit }) => {
                assert_eq!(actual, needed);
                assert_eq!(limit, needed - 1);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(Decoder::new().with_max_counts_len(needed).decode(&encoded).is_ok());
    }

    #[test]
    fn test_min_bar_only_widens() {
        let histogram = sample_histogram();
        let encoded = Encoder::new().encode(&histogram).expect("encodable");

        let widened =
            Decoder::new().with_min_bar(u64::MAX).decode_integer(&encoded).expect("decodable");
        assert_eq!(widened.highest_trackable_value(), u64::MAX);
        assert_eq!(widened, histogram);

        let kept = Decoder::new().with_min_bar(1_000).decode_integer(&encoded).expect("decodable");
        assert_eq!(kept.highest_trackable_value(), histogram.highest_trackable_value());
    }

    #[test]
    fn test_min_bar_widens_double_ratio() {
        let mut histogram = DoubleHistogram::with_highest_to_lowest_value_ratio(1_000, 3)
            .expect("valid histogram");
        histogram.record_value(5.0).expect("recordable");
        let encoded = Encoder::new().encode(&histogram).expect("encodable");

        let decoded =
            Decoder::new().with_min_bar(1 << 20).decode_double(&encoded).expect("decodable");
        assert_eq!(decoded.highest_to_lowest_value_ratio(), 1 << 20);
        assert_eq!(decoded.total_count(), 1);
        assert_eq!(decoded.max(), histogram.max());
    }

    #[test]
    fn test_decoded_histogram_is_encodable() {
        let histogram = sample_histogram();
        let decoded = DecodedHistogram::from(histogram.clone());
        assert_eq!(decoded.kind(), HistogramKind::Integer);
        assert_eq!(Encodable::tag(&decoded), Some("api.latency"));
        assert_eq!(Encodable::start_timestamp(&decoded), Some(1_000));
        assert_eq!(decoded.max_value_as_f64(), histogram.max() as f64);

        let encoder = Encoder::new();
        assert_eq!(
            encoder.encode(&decoded).expect("encodable"),
            encoder.encode(&histogram).expect("encodable")
        );
    }
}
