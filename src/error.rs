//! Error handling.

use std::fmt::Debug;
use thiserror::Error;

use crate::tiff::tags::{CompressionMethod, Tag};
use crate::tiff::TiffError;

/// Enum with all errors in this crate.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AsyncTiffError {
    /// The file does not start with a valid TIFF or BigTIFF header.
    #[error("Malformed TIFF header: {0}")]
    MalformedHeader(String),

    /// An image file directory extends past the end of the file or its entry count overflows.
    #[error("Truncated image file directory at offset {offset}: {reason}")]
    TruncatedDirectory {
        /// The byte offset at which the directory starts.
        offset: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// A single tag entry could not be decoded.
    #[error("Failed to decode tag {tag:?}: {reason}")]
    TagDecodeError {
        /// The tag whose value could not be decoded.
        tag: Tag,
        /// What was wrong with it.
        reason: String,
    },

    /// The chain of next-IFD offsets points back at an already visited directory.
    #[error("Cyclic IFD chain: offset {0} was already visited")]
    CyclicDirectoryChain(u64),

    /// The GeoTIFF key directory references data that does not exist.
    #[error("Failed to decode GeoKey directory: {0}")]
    GeoKeyDecodeError(String),

    /// Tile addressing was requested on a stripped image or vice versa.
    #[error("Unsupported layout: {0}")]
    UnsupportedLayout(String),

    /// A tile, strip, band or IFD index is outside of the valid range.
    #[error("Index {index} out of range, expected less than {len}")]
    IndexOutOfRange {
        /// The requested index.
        index: usize,
        /// The number of addressable entries.
        len: usize,
    },

    /// No decoder is registered for the compression method of the image.
    #[error("Unsupported compression method: {0:?}")]
    UnsupportedCompression(CompressionMethod),

    /// A compressed chunk could not be decompressed.
    #[error("Failed to decompress {method:?} data: {reason}")]
    DecompressionError {
        /// The compression method of the chunk.
        method: CompressionMethod,
        /// Why decompression failed.
        reason: String,
    },

    /// End of file error.
    #[error("End of File: expected to read {0} bytes, got {1}")]
    EndOfFile(u64, u64),

    /// General error.
    #[error("General error: {0}")]
    General(String),

    /// IO Error.
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Error while decoding JPEG data.
    #[error(transparent)]
    JPEGDecodingError(#[from] jpeg::Error),

    /// Error while fetching data using object store.
    #[cfg(feature = "object_store")]
    #[error(transparent)]
    ObjectStore(#[from] object_store::Error),

    /// An error while interpreting TIFF tag values.
    #[error(transparent)]
    InternalTIFFError(#[from] TiffError),

    /// Reqwest error
    #[cfg(feature = "reqwest")]
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    /// External error
    #[error(transparent)]
    External(Box<dyn std::error::Error + Send + Sync>),
}

/// Coarse classification of an [`AsyncTiffError`].
///
/// Storage errors are passed through from the underlying reader unchanged; this only tells the
/// caller which layer produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Bad magic bytes or version.
    MalformedHeader,
    /// Directory extends past the end of the file.
    TruncatedDirectory,
    /// A tag value is out of bounds or of an unexpected type.
    TagDecode,
    /// The IFD chain loops.
    CyclicDirectoryChain,
    /// The GeoKey directory is inconsistent.
    GeoKeyDecode,
    /// Wrong addressing mode for this IFD.
    UnsupportedLayout,
    /// Index beyond the tile/strip grid or IFD list.
    IndexOutOfRange,
    /// No decoder for the compression method.
    UnsupportedCompression,
    /// Compressed data is corrupt.
    Decompression,
    /// The image uses a feature this crate cannot decode.
    Unsupported,
    /// Failure inside the byte source.
    Storage,
    /// Anything else.
    Other,
}

impl AsyncTiffError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedHeader(_) => ErrorKind::MalformedHeader,
            Self::TruncatedDirectory { .. } => ErrorKind::TruncatedDirectory,
            Self::TagDecodeError { .. } => ErrorKind::TagDecode,
            Self::CyclicDirectoryChain(_) => ErrorKind::CyclicDirectoryChain,
            Self::GeoKeyDecodeError(_) => ErrorKind::GeoKeyDecode,
            Self::UnsupportedLayout(_) => ErrorKind::UnsupportedLayout,
            Self::IndexOutOfRange { .. } => ErrorKind::IndexOutOfRange,
            Self::UnsupportedCompression(_) => ErrorKind::UnsupportedCompression,
            Self::DecompressionError { .. } | Self::JPEGDecodingError(_) => {
                ErrorKind::Decompression
            }
            Self::InternalTIFFError(TiffError::FormatError(_)) => ErrorKind::TagDecode,
            Self::InternalTIFFError(TiffError::UnsupportedError(_)) => ErrorKind::Unsupported,
            Self::InternalTIFFError(TiffError::IntSizeError) => ErrorKind::TagDecode,
            Self::InternalTIFFError(TiffError::LimitsExceeded) => ErrorKind::Unsupported,
            Self::EndOfFile(..) | Self::IOError(_) => ErrorKind::Storage,
            #[cfg(feature = "object_store")]
            Self::ObjectStore(_) => ErrorKind::Storage,
            #[cfg(feature = "reqwest")]
            Self::ReqwestError(_) => ErrorKind::Storage,
            Self::General(_) | Self::External(_) => ErrorKind::Other,
        }
    }

    pub(crate) fn tag_decode(tag: Tag, reason: impl Into<String>) -> Self {
        Self::TagDecodeError {
            tag,
            reason: reason.into(),
        }
    }

    pub(crate) fn truncated(offset: u64, reason: impl Into<String>) -> Self {
        Self::TruncatedDirectory {
            offset,
            reason: reason.into(),
        }
    }
}

/// Crate-specific result type.
pub type AsyncTiffResult<T> = std::result::Result<T, AsyncTiffError>;
