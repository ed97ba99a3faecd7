use std::sync::Arc;

use bytes::Bytes;

use crate::decoder::DecoderRegistry;
use crate::error::{AsyncTiffError, AsyncTiffResult};
use crate::ifd::ImageFileDirectory;
use crate::metadata::{PrefetchBuffer, TiffMetadataReader};
use crate::reader::{AsyncFileReader, Endianness};
use crate::tiff::TiffError;
use crate::tile::Tile;

/// Options for [`TIFF::open_with_options`].
#[derive(Debug, Clone)]
pub struct OpenOptions {
    prefetch: u64,
    decoder_registry: Arc<DecoderRegistry>,
    decoding_buffer_size: usize,
}

/// Default for [`OpenOptions::with_decoding_buffer_size`]: 256MiB.
pub const DEFAULT_DECODING_BUFFER_SIZE: usize = 256 * 1024 * 1024;

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            prefetch: 0,
            decoder_registry: Arc::new(DecoderRegistry::default()),
            decoding_buffer_size: DEFAULT_DECODING_BUFFER_SIZE,
        }
    }
}

impl OpenOptions {
    /// Read the first `prefetch` bytes of the file in one request and serve metadata reads inside
    /// that range from memory. Values larger than the file are clamped to its size.
    pub fn with_prefetch(mut self, prefetch: u64) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Decode tiles with `decoder_registry` instead of the default decoders.
    pub fn with_decoder_registry(mut self, decoder_registry: DecoderRegistry) -> Self {
        self.decoder_registry = Arc::new(decoder_registry);
        self
    }

    /// The largest decoded tile or strip, in bytes, that the fetch methods of [`TIFF`] will
    /// allocate. Larger chunks fail with [`TiffError::LimitsExceeded`].
    pub fn with_decoding_buffer_size(mut self, decoding_buffer_size: usize) -> Self {
        self.decoding_buffer_size = decoding_buffer_size;
        self
    }
}

/// A TIFF file.
///
/// All IFDs are parsed when the file is opened and never change afterwards, so a `TIFF` can be
/// shared between tasks and cloned cheaply.
#[derive(Debug, Clone)]
pub struct TIFF {
    reader: Arc<dyn AsyncFileReader>,
    ifds: Arc<Vec<ImageFileDirectory>>,
    endianness: Endianness,
    bigtiff: bool,
    file_size: u64,
    decoder_registry: Arc<DecoderRegistry>,
    decoding_buffer_size: usize,
}

impl TIFF {
    /// Open a TIFF file, reading its header and every IFD.
    ///
    /// The first `prefetch` bytes are requested once up front; directories and tag values inside
    /// that range then cost no further requests.
    pub async fn open(reader: Arc<dyn AsyncFileReader>, prefetch: u64) -> AsyncTiffResult<Self> {
        Self::open_with_options(reader, OpenOptions::default().with_prefetch(prefetch)).await
    }

    /// Open a TIFF file with non-default [`OpenOptions`].
    pub async fn open_with_options(
        reader: Arc<dyn AsyncFileReader>,
        options: OpenOptions,
    ) -> AsyncTiffResult<Self> {
        let file_size = reader.get_size().await?;
        if file_size < 8 {
            return Err(AsyncTiffError::MalformedHeader(format!(
                "file is {file_size} bytes, too short for a TIFF header"
            )));
        }

        let prefetch = options.prefetch.min(file_size);
        let prefetch_reader = PrefetchBuffer::new(reader.clone(), prefetch).await?;
        let mut metadata_reader = TiffMetadataReader::try_open(&prefetch_reader)
            .await?
            .with_file_size(file_size);
        let ifds = metadata_reader.read_all_ifds(&prefetch_reader).await?;
        if ifds.is_empty() {
            return Err(AsyncTiffError::MalformedHeader(
                "no image file directories".to_string(),
            ));
        }
        tracing::debug!(
            ifds = ifds.len(),
            bigtiff = metadata_reader.bigtiff(),
            file_size,
            "opened TIFF"
        );

        Ok(Self {
            reader,
            ifds: Arc::new(ifds),
            endianness: metadata_reader.endianness(),
            bigtiff: metadata_reader.bigtiff(),
            file_size,
            decoder_registry: options.decoder_registry,
            decoding_buffer_size: options.decoding_buffer_size,
        })
    }

    /// Open `path` inside an [`ObjectStore`](object_store::ObjectStore).
    #[cfg(feature = "object_store")]
    pub async fn open_object(
        store: Arc<dyn object_store::ObjectStore>,
        path: impl Into<object_store::path::Path>,
        prefetch: u64,
    ) -> AsyncTiffResult<Self> {
        let reader = crate::reader::ObjectReader::new(store, path.into());
        Self::open(Arc::new(reader), prefetch).await
    }

    /// Access the underlying Image File Directories.
    pub fn ifds(&self) -> &[ImageFileDirectory] {
        &self.ifds
    }

    /// Access the IFD at `index`.
    pub fn ifd(&self, index: usize) -> AsyncTiffResult<&ImageFileDirectory> {
        self.ifds.get(index).ok_or(AsyncTiffError::IndexOutOfRange {
            index,
            len: self.ifds.len(),
        })
    }

    /// The byte order of the file.
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Whether this is a BigTIFF file.
    pub fn bigtiff(&self) -> bool {
        self.bigtiff
    }

    /// The size of the file in bytes, as reported when it was opened.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// The reader this file was opened with.
    pub fn reader(&self) -> &Arc<dyn AsyncFileReader> {
        &self.reader
    }

    /// The decoders used by [`TIFF::fetch_tile`] and [`TIFF::fetch_strip`].
    pub fn decoder_registry(&self) -> &DecoderRegistry {
        &self.decoder_registry
    }

    /// Fetch the compressed tile at `row`, `col` of IFD `ifd`, without decoding it.
    pub async fn fetch_raw_tile(&self, ifd: usize, row: usize, col: usize) -> AsyncTiffResult<Tile> {
        self.ifd(ifd)?
            .fetch_tile(row, col, self.reader.as_ref())
            .await
    }

    /// Fetch and decode the tile at `row`, `col` of IFD `ifd`.
    ///
    /// Returns the pixel samples in native byte order, for the full tile size including padding
    /// past the image edge.
    pub async fn fetch_tile(&self, ifd: usize, row: usize, col: usize) -> AsyncTiffResult<Bytes> {
        let tile = self.fetch_raw_tile(ifd, row, col).await?;
        self.decode(&tile)
    }

    /// Fetch and decode several tiles of IFD `ifd` with one batched read.
    pub async fn fetch_tiles(
        &self,
        ifd: usize,
        tiles: &[(usize, usize)],
    ) -> AsyncTiffResult<Vec<Bytes>> {
        self.ifd(ifd)?
            .fetch_tiles(tiles, self.reader.as_ref())
            .await?
            .iter()
            .map(|tile| self.decode(tile))
            .collect()
    }

    /// Fetch and decode strip `strip` of IFD `ifd`.
    pub async fn fetch_strip(&self, ifd: usize, strip: usize) -> AsyncTiffResult<Bytes> {
        let strip = self
            .ifd(ifd)?
            .fetch_strip(strip, self.reader.as_ref())
            .await?;
        self.decode(&strip)
    }

    fn decode(&self, tile: &Tile) -> AsyncTiffResult<Bytes> {
        if tile.decoded_len()? > self.decoding_buffer_size {
            return Err(TiffError::LimitsExceeded.into());
        }
        tile.decode(&self.decoder_registry)
    }

    /// The EPSG code of the first IFD, from its projected or geographic CRS GeoKey.
    pub fn epsg(&self) -> Option<u16> {
        self.ifds.first()?.geo_key_directory()?.epsg_code()
    }

    /// The bounding box `(min_x, min_y, max_x, max_y)` of the first IFD in model coordinates.
    pub fn native_bounds(&self) -> Option<(f64, f64, f64, f64)> {
        self.ifds.first()?.native_bounds()
    }
}
