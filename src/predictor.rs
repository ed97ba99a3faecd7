//! Reversing TIFF predictors (none, horizontal differencing and floating point).
//!
//! All functions operate in place on one decompressed plane of a chunk and leave the samples in
//! native byte order.

use crate::error::AsyncTiffResult;
use crate::reader::Endianness;
use crate::tiff::tags::Predictor;
use crate::tiff::{TiffError, TiffUnsupportedError};

/// Layout of one decompressed plane of a tile or strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictorInfo {
    /// Byte order of the file.
    pub(crate) endianness: Endianness,
    /// Width of the chunk in pixels. For strips this is the image width.
    pub(crate) chunk_width: u32,
    /// Height of the chunk in pixels. The last strip of an image may be shorter than the others.
    pub(crate) chunk_height: u32,
    /// Bits per sample, shared by all samples.
    pub(crate) bits_per_sample: u16,
    /// Samples interleaved in this plane: all samples for chunky images, one for planar images.
    pub(crate) samples_per_pixel: u16,
}

impl PredictorInfo {
    /// Bits in one pixel of this plane.
    pub fn bits_per_pixel(&self) -> usize {
        self.bits_per_sample as usize * self.samples_per_pixel as usize
    }

    /// Bytes in one row of this plane. Rows are padded to a whole byte.
    pub fn row_stride(&self) -> AsyncTiffResult<usize> {
        let bits = (self.chunk_width as usize)
            .checked_mul(self.bits_per_pixel())
            .ok_or(TiffError::LimitsExceeded)?;
        Ok(bits.div_ceil(8))
    }

    /// Bytes in the whole plane.
    pub fn plane_bytes(&self) -> AsyncTiffResult<usize> {
        Ok(self
            .row_stride()?
            .checked_mul(self.chunk_height as usize)
            .ok_or(TiffError::LimitsExceeded)?)
    }
}

/// Undo `predictor` on a decompressed plane and convert it to native byte order.
///
/// `buffer` must hold exactly [`PredictorInfo::plane_bytes`] bytes.
pub fn unpredict(
    predictor: Predictor,
    buffer: &mut [u8],
    info: &PredictorInfo,
) -> AsyncTiffResult<()> {
    let bits = info.bits_per_sample;
    match predictor {
        Predictor::None => {
            fix_endianness(buffer, info.endianness, bits);
        }
        Predictor::Horizontal => {
            if !matches!(bits, 8 | 16 | 32 | 64) {
                return Err(unsupported_depth(predictor, bits));
            }
            fix_endianness(buffer, info.endianness, bits);
            let samples = info.samples_per_pixel as usize;
            for row in buffer.chunks_mut(info.row_stride()?.max(1)) {
                rev_hpredict_nsamp(row, bits, samples);
            }
        }
        Predictor::FloatingPoint => {
            if !matches!(bits, 16 | 32 | 64) {
                return Err(unsupported_depth(predictor, bits));
            }
            let samples = info.samples_per_pixel as usize;
            let row_stride = info.row_stride()?.max(1);
            let mut scratch = vec![0; row_stride];
            for row in buffer.chunks_mut(row_stride) {
                let scratch = &mut scratch[..row.len()];
                scratch.copy_from_slice(row);
                rev_predict_float(scratch, row, samples, bits as usize / 8);
            }
        }
        other => {
            return Err(TiffError::UnsupportedError(
                TiffUnsupportedError::UnsupportedPredictor(other),
            )
            .into())
        }
    }
    Ok(())
}

fn unsupported_depth(predictor: Predictor, bits: u16) -> crate::error::AsyncTiffError {
    TiffError::UnsupportedError(TiffUnsupportedError::UnsupportedPredictorBitDepth(
        predictor, bits,
    ))
    .into()
}

/// Reverse horizontal differencing on one row of native-endian samples.
///
/// `bit_depth` must be 8, 16, 32 or 64. Trailing bytes that do not form a whole sample are left
/// untouched.
///
/// From image-tiff
pub fn rev_hpredict_nsamp(buf: &mut [u8], bit_depth: u16, samples: usize) {
    match bit_depth {
        8 => {
            for i in samples..buf.len() {
                buf[i] = buf[i].wrapping_add(buf[i - samples]);
            }
        }
        16 => rev_hpredict_words::<2>(buf, samples, |v, p| {
            u16::from_ne_bytes(v)
                .wrapping_add(u16::from_ne_bytes(p))
                .to_ne_bytes()
        }),
        32 => rev_hpredict_words::<4>(buf, samples, |v, p| {
            u32::from_ne_bytes(v)
                .wrapping_add(u32::from_ne_bytes(p))
                .to_ne_bytes()
        }),
        64 => rev_hpredict_words::<8>(buf, samples, |v, p| {
            u64::from_ne_bytes(v)
                .wrapping_add(u64::from_ne_bytes(p))
                .to_ne_bytes()
        }),
        _ => {}
    }
}

fn rev_hpredict_words<const N: usize>(
    buf: &mut [u8],
    samples: usize,
    add: impl Fn([u8; N], [u8; N]) -> [u8; N],
) {
    let words = buf.len() / N;
    for i in samples..words {
        let mut value = [0; N];
        let mut previous = [0; N];
        value.copy_from_slice(&buf[i * N..(i + 1) * N]);
        previous.copy_from_slice(&buf[(i - samples) * N..(i - samples + 1) * N]);
        buf[i * N..(i + 1) * N].copy_from_slice(&add(value, previous));
    }
}

/// Fix endianness. If `byte_order` matches the host, then conversion is a no-op.
///
/// Only 16, 32 and 64 bit samples are swapped; other depths are left as stored.
///
/// from image-tiff
pub fn fix_endianness(buf: &mut [u8], byte_order: Endianness, bit_depth: u16) {
    let width = match bit_depth {
        16 => 2,
        32 => 4,
        64 => 8,
        _ => return,
    };
    let host_is_little = cfg!(target_endian = "little");
    let file_is_little = byte_order == Endianness::LittleEndian;
    if host_is_little != file_is_little {
        buf.chunks_exact_mut(width).for_each(|v| v.reverse());
    }
}

/// Reverse floating point prediction on one row.
///
/// Floating point prediction first shuffles the bytes of every value into planes, most
/// significant byte first, and then applies byte-wise horizontal differencing. `input` holds the
/// predicted row and is used as scratch space; `output` receives native-endian values.
pub fn rev_predict_float(input: &mut [u8], output: &mut [u8], samples: usize, width: usize) {
    for i in samples..input.len() {
        input[i] = input[i].wrapping_add(input[i - samples]);
    }
    let values = input.len() / width;
    for (i, chunk) in output.chunks_exact_mut(width).take(values).enumerate() {
        for (byte, out) in chunk.iter_mut().enumerate() {
            // planes are big-endian regardless of file byte order
            let plane = if cfg!(target_endian = "little") {
                width - 1 - byte
            } else {
                byte
            };
            *out = input[plane * values + i];
        }
    }
}
