use bytes::{Bytes, BytesMut};

use crate::decoder::DecoderRegistry;
use crate::error::AsyncTiffResult;
use crate::predictor::{unpredict, PredictorInfo};
use crate::tiff::tags::{CompressionMethod, PhotometricInterpretation, Predictor};
use crate::tiff::TiffError;

/// A TIFF Tile response.
///
/// This contains the required information to decode the tile. Decoding is separated from fetching
/// so that sync and async operations can be separated and non-blocking.
///
/// This is returned by `fetch_tile` and `fetch_strip`.
///
/// A strip of a stripped tiff is an image-width, rows-per-strip tile. Planar images hold one
/// compressed buffer per sample plane.
#[derive(Debug, Clone)]
pub struct Tile {
    pub(crate) row: usize,
    pub(crate) col: usize,
    pub(crate) predictor: Predictor,
    pub(crate) predictor_info: PredictorInfo,
    pub(crate) compressed_bytes: Vec<Bytes>,
    pub(crate) compression_method: CompressionMethod,
    pub(crate) photometric_interpretation: PhotometricInterpretation,
    pub(crate) jpeg_tables: Option<Bytes>,
}

impl Tile {
    /// The row index of this tile, or the strip index of a strip.
    pub fn row(&self) -> usize {
        self.row
    }

    /// The column index of this tile. Always zero for strips.
    pub fn col(&self) -> usize {
        self.col
    }

    /// Access the compressed bytes underlying this tile, one entry per sample plane.
    ///
    /// A plane whose byte count is zero is sparse and is represented by an empty buffer.
    ///
    /// Note that [`Bytes`] is reference-counted, so it is very cheap to clone if needed.
    pub fn compressed_bytes(&self) -> &[Bytes] {
        &self.compressed_bytes
    }

    /// Access the compression tag representing this tile.
    pub fn compression_method(&self) -> CompressionMethod {
        self.compression_method
    }

    /// Access the photometric interpretation tag representing this tile.
    pub fn photometric_interpretation(&self) -> PhotometricInterpretation {
        self.photometric_interpretation
    }

    /// Access the JPEG Tables, if any, from the IFD producing this tile.
    ///
    /// Note that [`Bytes`] is reference-counted, so it is very cheap to clone if needed.
    pub fn jpeg_tables(&self) -> Option<&Bytes> {
        self.jpeg_tables.as_ref()
    }

    /// Width of this chunk in pixels, including any padding past the image edge.
    pub fn width(&self) -> u32 {
        self.predictor_info.chunk_width
    }

    /// Height of this chunk in pixels, including any padding past the image edge.
    pub fn height(&self) -> u32 {
        self.predictor_info.chunk_height
    }

    /// Size in bytes of the decoded chunk.
    ///
    /// Fails with [`TiffError::LimitsExceeded`] if the size does not fit in a `usize`.
    pub fn decoded_len(&self) -> AsyncTiffResult<usize> {
        Ok(self
            .predictor_info
            .plane_bytes()?
            .checked_mul(self.compressed_bytes.len())
            .ok_or(TiffError::LimitsExceeded)?)
    }

    /// Decode this tile.
    ///
    /// Decoding is separate from fetching so that sync and async operations do not block the same
    /// runtime.
    ///
    /// The result holds the pixel samples in native byte order. Planar images are returned as
    /// consecutive planes, chunky images as interleaved samples. Sparse planes decode to zeros.
    pub fn decode(&self, decoder_registry: &DecoderRegistry) -> AsyncTiffResult<Bytes> {
        let decoder = decoder_registry.get(self.compression_method)?;
        let plane_bytes = self.predictor_info.plane_bytes()?;
        let mut result = BytesMut::zeroed(self.decoded_len()?);
        for (compressed, plane) in self
            .compressed_bytes
            .iter()
            .zip(result.chunks_mut(plane_bytes.max(1)))
        {
            if compressed.is_empty() {
                continue;
            }
            decoder.decode_tile(
                compressed.clone(),
                plane,
                self.photometric_interpretation,
                self.jpeg_tables.as_deref(),
            )?;
            unpredict(self.predictor, plane, &self.predictor_info)?;
        }
        Ok(result.freeze())
    }
}
