use std::num::TryFromIntError;

use thiserror::Error;

use super::ifd::Value;
use super::tags::{PhotometricInterpretation, PlanarConfiguration, Predictor, SampleFormat, Tag};

/// Tiff error kinds.
#[derive(Debug, Error)]
#[allow(clippy::enum_variant_names)]
pub enum TiffError {
    /// The Image is not formatted properly.
    #[error("Format error: {0}")]
    FormatError(#[from] TiffFormatError),

    /// The Decoder does not support features required by the image.
    #[error("The Decoder does not support the image format `{0}`")]
    UnsupportedError(#[from] TiffUnsupportedError),

    /// An integer conversion to or from a platform size failed, either due to
    /// limits of the platform size or limits of the format.
    #[error("Platform or format size limits exceeded")]
    IntSizeError,

    /// The image does not fit within the decoding limits, or its size overflows.
    #[error("The Decoder limits are exceeded")]
    LimitsExceeded,
}

impl From<TryFromIntError> for TiffError {
    fn from(_: TryFromIntError) -> Self {
        TiffError::IntSizeError
    }
}

/// The image is not formatted properly.
///
/// This indicates that the encoder producing the image might behave incorrectly or that the input
/// file has been corrupted.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum TiffFormatError {
    /// Two tags that must agree in length, like offsets and byte counts, do not.
    #[error("Inconsistent sizes encountered")]
    InconsistentSizesEncountered,
    /// A tag without a default is missing.
    #[error("Required tag `{0:?}` not found")]
    RequiredTagNotFound(Tag),
    /// A required tag holds no values.
    #[error("Required tag `{0:?}` was empty")]
    RequiredTagEmpty(Tag),
    /// Samples per pixel is zero.
    #[error("Samples per pixel is zero")]
    SamplesPerPixelIsZero,
    /// A zero image or tile dimension.
    #[error("Invalid dimensions: {0}x{1}")]
    InvalidDimensions(u32, u32),
    /// The tag does not hold a byte.
    #[error("Expected byte, {0:?} found")]
    ByteExpected(Value),
    /// The tag does not hold an unsigned integer.
    #[error("Expected unsigned integer, {0:?} found")]
    UnsignedIntegerExpected(Value),
    /// The tag does not hold a floating point number.
    #[error("Expected floating point number, {0:?} found")]
    FloatExpected(Value),
    /// The tag does not hold a rational.
    #[error("Expected rational, {0:?} found")]
    RationalExpected(Value),
    /// The tag does not hold a string.
    #[error("Expected string, {0:?} found")]
    AsciiExpected(Value),
}

/// The Decoder does not support features required by the image.
///
/// This only captures known failures for which the standard either does not require support or an
/// implementation has been planned but not yet completed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TiffUnsupportedError {
    /// Samples of different widths.
    #[error("Unsupported bits per sample {0:?}, all samples must share one byte-aligned width")]
    InconsistentBitsPerSample(Vec<u16>),
    /// Unsupported photometric interpretation.
    #[error("Unsupported photometric interpretation {0:?}")]
    UnsupportedInterpretation(PhotometricInterpretation),
    /// Unsupported planar configuration.
    #[error("Unsupported planar configuration {0:?}")]
    UnsupportedPlanarConfig(PlanarConfiguration),
    /// Unsupported predictor.
    #[error("Unsupported predictor {0:?}")]
    UnsupportedPredictor(Predictor),
    /// The predictor cannot be reversed at this sample width.
    #[error("Predictor {0:?} is not supported with {1} bits per sample")]
    UnsupportedPredictorBitDepth(Predictor, u16),
    /// Unsupported sample format.
    #[error("Unsupported sample format {0:?}")]
    UnsupportedSampleFormat(Vec<SampleFormat>),
}

/// Result of an image decoding/encoding process
pub type TiffResult<T> = Result<T, TiffError>;
