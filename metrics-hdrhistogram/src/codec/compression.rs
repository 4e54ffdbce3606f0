use std::io;
#[cfg(feature = "zstd")]
use std::io::Read as _;

/// A compression scheme for encoded histograms.
///
/// Implementations must be able to decompress anything they compress.  The encoder and decoder
/// only ever hand complete encodings to the compressor, never fragments of one.
pub trait Compression: Send + Sync {
    /// Compresses `data`.
    ///
    /// # Errors
    ///
    /// If the data could not be compressed, an error is returned.
    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>>;

    /// Decompresses `data`, producing at most `max_len` bytes.
    ///
    /// # Errors
    ///
    /// If the data is not a valid compressed stream, or decompresses to more than `max_len` bytes,
    /// an error is returned.
    fn decompress(&self, data: &[u8], max_len: usize) -> io::Result<Vec<u8>>;
}

/// Zstandard compression.
#[cfg(feature = "zstd")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zstd {
    level: i32,
}

#[cfg(feature = "zstd")]
impl Zstd {
    /// Creates a new `Zstd` compressor using the default compression level.
    pub fn new() -> Zstd {
        Zstd { level: zstd::DEFAULT_COMPRESSION_LEVEL }
    }

    /// Sets the compression level.
    ///
    /// Levels are clamped to `1..=22`.
    #[must_use]
    pub fn with_level(mut self, level: i32) -> Zstd {
        self.level = level.clamp(1, 22);
        self
    }

    /// Gets the compression level.
    pub fn level(&self) -> i32 {
        self.level
    }
}

#[cfg(feature = "zstd")]
impl Default for Zstd {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "zstd")]
impl Compression for Zstd {
    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        zstd::encode_all(data, self.level)
    }

    fn decompress(&self, data: &[u8], max_len: usize) -> io::Result<Vec<u8>> {
        let decoder = zstd::stream::read::Decoder::new(data)?;
        let limit = u64::try_from(max_len).unwrap_or(u64::MAX).saturating_add(1);

        let mut decompressed = Vec::new();
        decoder.take(limit).read_to_end(&mut decompressed)?;
        if decompressed.len() > max_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "decompressed data exceeds the maximum length",
            ));
        }
        Ok(decompressed)
    }
}

#[cfg(all(test, feature = "zstd"))]
mod tests {
    use super::{Compression, Zstd};

    #[test]
    fn test_zstd_levels() {
        assert_eq!(Zstd::new().level(), zstd::DEFAULT_COMPRESSION_LEVEL);
        assert_eq!(Zstd::new().with_level(0).level(), 1);
        assert_eq!(Zstd::new().with_level(40).level(), 22);
    }

    #[test]
    fn test_zstd_bounded_decompression() {
        let data = vec![42u8; 4096];
        let zstd = Zstd::default();
        let compressed = zstd.compress(&data).expect("compressible");
        assert!(compressed.len() < data.len());

        assert_eq!(zstd.decompress(&compressed, data.len()).expect("within limit"), data);
        assert!(zstd.decompress(&compressed, 1024).is_err());
        assert!(zstd.decompress(b"not zstd", 1024).is_err());
    }
}
