//! Counts payload encoding.
//!
//! Counts are written as zigzag-encoded, variable-byte integers.  Since most slots of a typical
//! histogram are empty, a run of `n > 1` consecutive zero counts is collapsed into the single
//! negative value `-n`.  Trailing empty slots are never written at all: the payload ends at the
//! last non-zero slot, and the decoder treats everything after it as zero.
//!
//! Counts larger than `i64::MAX` cannot be represented, as the sign is reserved for zero runs.

use bytes::{Buf, BufMut};

use crate::{DecodeError, EncodeError};

/// Largest number of bytes a single variable-byte encoded `u64` can occupy.
pub(crate) const MAX_VBYTE_LEN: usize = 10;

/// Writes the counts payload for `counts` into `buf`.
pub(crate) fn encode_counts<B: BufMut>(counts: &[u64], buf: &mut B) -> Result<(), EncodeError> {
    let end = match counts.iter().rposition(|&count| count > 0) {
        Some(index) => index + 1,
        None => return Ok(()),
    };

    let mut index = 0;
    while index < end {
        let count = counts[index];
        if count == 0 {
            let run_start = index;
            while index < end && counts[index] == 0 {
                index += 1;
            }

            let run = (index - run_start) as i64;
            let value = if run > 1 { -run } else { 0 };
            vbyte_encode(zigzag_encode(value), buf);
            continue;
        }

        let value =
            i64::try_from(count).map_err(|_| EncodeError::CountTooLarge { index, count })?;
        vbyte_encode(zigzag_encode(value), buf);
        index += 1;
    }

    Ok(())
}

/// Gets an upper bound on the payload size for `counts`.
pub(crate) fn max_encoded_len(counts: &[u64]) -> usize {
    counts.iter().rposition(|&count| count > 0).map_or(0, |index| (index + 1) * MAX_VBYTE_LEN)
}

/// Reads a counts payload, invoking `f` with the index and count of every non-zero slot.
///
/// The payload must be consumed in its entirety.
pub(crate) fn decode_counts<B, F>(mut payload: B, mut f: F) -> Result<(), DecodeError>
where
    B: Buf,
    F: FnMut(usize, u64) -> Result<(), DecodeError>,
{
    let mut index: usize = 0;
    while payload.has_remaining() {
        let value = zigzag_decode(vbyte_decode(&mut payload)?);
        if value < 0 {
            let run = usize::try_from(value.unsigned_abs())
                .map_err(|_| DecodeError::Corrupt("zero run does not fit in memory"))?;
            index = index
                .checked_add(run)
                .ok_or(DecodeError::Corrupt("zero run overflows the slot index"))?;
            continue;
        }

        if value > 0 {
            f(index, value as u64)?;
        }
        index =
            index.checked_add(1).ok_or(DecodeError::Corrupt("count overflows the slot index"))?;
    }

    Ok(())
}

#[inline]
fn zigzag_encode(input: i64) -> u64 {
    ((input << 1) ^ (input >> 63)) as u64
}

#[inline]
fn zigzag_decode(input: u64) -> i64 {
    ((input >> 1) as i64) ^ (-((input & 1) as i64))
}

#[inline]
fn vbyte_encode<B: BufMut>(mut input: u64, buf: &mut B) {
    while input >= 128 {
        buf.put_u8(0x80 | (input as u8 & 0x7F));
        input >>= 7;
    }
    buf.put_u8(input as u8);
}

#[inline]
fn vbyte_decode<B: Buf>(buf: &mut B) -> Result<u64, DecodeError> {
    let mut value = 0;
    for factor in 0..MAX_VBYTE_LEN {
        if !buf.has_remaining() {
            return Err(DecodeError::Truncated { needed: 1, remaining: 0 });
        }

        let byte = buf.get_u8();
        let bits = u64::from(byte & 0x7F);
        // The tenth byte only has room for the single remaining bit.
        if factor == MAX_VBYTE_LEN - 1 && bits > 1 {
            return Err(DecodeError::Corrupt("variable-byte integer overflows 64 bits"));
        }
        value |= bits << (7 * factor);
        if byte & 0x80 != 0x80 {
            return Ok(value);
        }
    }

    Err(DecodeError::Corrupt("variable-byte integer is longer than 10 bytes"))
}
