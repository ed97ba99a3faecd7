//! API for reading metadata out of a TIFF file.
//!
//! ### Reading all TIFF metadata
//!
//! We can use [`TiffMetadataReader::read_all_ifds`] to read all IFDs up front:
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use async_cog_reader::metadata::{PrefetchBuffer, TiffMetadataReader};
//! use async_cog_reader::reader::{AsyncFileReader, TokioReader};
//!
//! let file = tokio::fs::File::open("tests/images/tiled-rgb.tif").await?;
//! let reader = Arc::new(TokioReader::new(file)) as Arc<dyn AsyncFileReader>;
//!
//! // Use PrefetchBuffer to ensure that a given number of bytes at the start of the
//! // file are prefetched.
//! let prefetch_reader = PrefetchBuffer::new(reader.clone(), 32 * 1024).await?;
//!
//! // Create a TiffMetadataReader wrapping some MetadataFetch
//! let mut metadata_reader = TiffMetadataReader::try_open(&prefetch_reader).await?;
//!
//! // Read all IFDs out of the source.
//! let ifds = metadata_reader.read_all_ifds(&prefetch_reader).await?;
//! ```
//!
//! [`TIFF::open`](crate::TIFF::open) does all of this for you.
//!
//! ### Caching/prefetching/buffering
//!
//! Each IFD is read with one request for its entries, plus one request per tag whose values do
//! not fit inline in the entry. All out-of-line values of one IFD are requested concurrently.
//!
//! Thus, it is **imperative to always supply some sort of caching, prefetching, or buffering**
//! middleware when reading metadata over a network. [`PrefetchBuffer`] is an example of this,
//! which fetches the first `N` bytes out of a file. Cloud-Optimized GeoTIFFs keep all of their
//! metadata at the start of the file, so a large enough prefetch opens them in a single request.

mod fetch;
mod reader;

pub use fetch::{MetadataFetch, PrefetchBuffer};
pub use reader::{ImageFileDirectoryReader, TiffMetadataReader};
