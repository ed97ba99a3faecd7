use std::ops::Range;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::{AsyncTiffError, AsyncTiffResult};
use crate::reader::{AsyncFileReader, EndianAwareReader, Endianness};

/// A data source that can be used with [`TiffMetadataReader`] and [`ImageFileDirectoryReader`] to
/// load [`ImageFileDirectory`]s.
///
/// Note that implementation is provided for [`AsyncFileReader`].
///
/// [`TiffMetadataReader`]: crate::metadata::TiffMetadataReader
/// [`ImageFileDirectoryReader`]: crate::metadata::ImageFileDirectoryReader
/// [`ImageFileDirectory`]: crate::ImageFileDirectory
pub trait MetadataFetch {
    /// Return a future that fetches the specified range of bytes asynchronously
    ///
    /// Note the returned type is a boxed future, often created by
    /// [futures::FutureExt::boxed]. See the trait documentation for an example.
    fn fetch(&self, range: Range<u64>) -> BoxFuture<'_, AsyncTiffResult<Bytes>>;
}

impl<T: AsyncFileReader> MetadataFetch for T {
    fn fetch(&self, range: Range<u64>) -> BoxFuture<'_, AsyncTiffResult<Bytes>> {
        self.get_bytes(range)
    }
}

/// Buffering for the first `N` bytes of a file.
///
/// This is designed so that the async requests made by the underlying tag reader get intercepted
/// here and served from the existing buffer when possible. Requests that extend beyond the buffer
/// are passed through to the wrapped source unchanged.
///
/// The buffer is filled once in [`PrefetchBuffer::new`] and never written again.
#[derive(Debug)]
pub struct PrefetchBuffer<F: MetadataFetch> {
    fetch: F,
    buffer: Bytes,
}

impl<F: MetadataFetch> PrefetchBuffer<F> {
    /// Construct a new PrefetchBuffer, caching the first `prefetch` bytes of the file.
    ///
    /// `prefetch` must not exceed the size of the file. A `prefetch` of zero issues no request and
    /// forwards every read to `fetch`.
    pub async fn new(fetch: F, prefetch: u64) -> AsyncTiffResult<Self> {
        let buffer = if prefetch == 0 {
            Bytes::new()
        } else {
            fetch.fetch(0..prefetch).await?
        };
        tracing::debug!(prefetch, buffered = buffer.len(), "filled prefetch buffer");
        Ok(Self { fetch, buffer })
    }

    /// The number of bytes held in the buffer.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Release the wrapped source.
    pub fn into_inner(self) -> F {
        self.fetch
    }
}

impl<F: MetadataFetch> MetadataFetch for PrefetchBuffer<F> {
    fn fetch(&self, range: Range<u64>) -> BoxFuture<'_, AsyncTiffResult<Bytes>> {
        if range.start <= range.end && range.end <= self.buffer.len() as u64 {
            let usize_range = range.start as usize..range.end as usize;
            let result = self.buffer.slice(usize_range);
            async { Ok(result) }.boxed()
        } else {
            tracing::trace!(?range, "prefetch miss");
            self.fetch.fetch(range)
        }
    }
}

/// Reads consecutive values from a [`MetadataFetch`], starting at a byte offset.
pub(crate) struct MetadataCursor<'a, F: MetadataFetch> {
    fetch: &'a F,
    offset: u64,
    endianness: Endianness,
}

impl<'a, F: MetadataFetch> MetadataCursor<'a, F> {
    pub fn new(fetch: &'a F, endianness: Endianness) -> Self {
        Self {
            fetch,
            offset: 0,
            endianness,
        }
    }

    pub fn new_with_offset(fetch: &'a F, endianness: Endianness, offset: u64) -> Self {
        Self {
            fetch,
            offset,
            endianness,
        }
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Read the given number of bytes, advancing the internal cursor state by the same amount.
    ///
    /// Fails with [`AsyncTiffError::EndOfFile`] if the source returns fewer bytes.
    pub(crate) async fn read(&mut self, length: u64) -> AsyncTiffResult<EndianAwareReader> {
        let end = self.offset.checked_add(length).ok_or_else(|| {
            AsyncTiffError::General(format!(
                "byte range starting at {} with length {length} overflows",
                self.offset
            ))
        })?;
        let bytes = self.fetch.fetch(self.offset..end).await?;
        if bytes.len() as u64 != length {
            return Err(AsyncTiffError::EndOfFile(length, bytes.len() as u64));
        }
        self.offset = end;
        Ok(EndianAwareReader::new(bytes, self.endianness))
    }

    /// Read a u16 from the cursor, advancing the internal state by 2 bytes.
    pub(crate) async fn read_u16(&mut self) -> AsyncTiffResult<u16> {
        self.read(2).await?.read_u16()
    }

    /// Read a u32 from the cursor, advancing the internal state by 4 bytes.
    pub(crate) async fn read_u32(&mut self) -> AsyncTiffResult<u32> {
        self.read(4).await?.read_u32()
    }

    /// Read a u64 from the cursor, advancing the internal state by 8 bytes.
    pub(crate) async fn read_u64(&mut self) -> AsyncTiffResult<u64> {
        self.read(8).await?.read_u64()
    }
}
