use std::collections::{HashMap, HashSet};

use bytes::Bytes;

use crate::error::{AsyncTiffError, AsyncTiffResult};
use crate::metadata::fetch::MetadataCursor;
use crate::metadata::MetadataFetch;
use crate::reader::{EndianAwareReader, Endianness};
use crate::tiff::tags::{Tag, Type};
use crate::tiff::Value;
use crate::ImageFileDirectory;

/// Entry point to reading TIFF metadata.
///
/// This is a stateful reader because we don't know how many IFDs will be encountered.
///
/// ```ignore
/// // fetch implements MetadataFetch
/// let mut metadata_reader = TiffMetadataReader::try_open(&fetch).await?;
/// let ifds = metadata_reader.read_all_ifds(&fetch).await?;
/// ```
#[derive(Debug)]
pub struct TiffMetadataReader {
    endianness: Endianness,
    bigtiff: bool,
    next_ifd_offset: Option<u64>,
    /// Directory offsets already read, used to reject looping chains.
    visited: HashSet<u64>,
    /// Total file size, if known. Directories and tag values are bounds checked against it.
    file_size: Option<u64>,
}

impl TiffMetadataReader {
    /// Open a new TIFF file, validating the magic bytes, reading the endianness, and checking for
    /// the bigtiff flag.
    ///
    /// This does not read any IFD metadata.
    pub async fn try_open<F: MetadataFetch>(fetch: &F) -> AsyncTiffResult<Self> {
        let magic_bytes = fetch.fetch(0..2).await.map_err(header_read_error)?;

        // Should be b"II" for little endian or b"MM" for big endian
        let endianness = if magic_bytes.as_ref() == b"II" {
            Endianness::LittleEndian
        } else if magic_bytes.as_ref() == b"MM" {
            Endianness::BigEndian
        } else {
            return Err(AsyncTiffError::MalformedHeader(format!(
                "unexpected magic bytes {magic_bytes:?}"
            )));
        };

        // Set offset to 2 since we've already read magic bytes.
        let mut cursor = MetadataCursor::new(fetch, endianness).with_offset(2);

        let version = cursor.read_u16().await.map_err(header_read_error)?;
        let bigtiff = match version {
            42 => false,
            43 => {
                // Bytesize of offsets, always 8 in BigTIFF
                let offset_size = cursor.read_u16().await.map_err(header_read_error)?;
                if offset_size != 8 {
                    return Err(AsyncTiffError::MalformedHeader(format!(
                        "unexpected BigTIFF offset size {offset_size}"
                    )));
                }
                let reserved = cursor.read_u16().await.map_err(header_read_error)?;
                if reserved != 0 {
                    return Err(AsyncTiffError::MalformedHeader(format!(
                        "unexpected BigTIFF reserved field {reserved}"
                    )));
                }
                true
            }
            _ => {
                return Err(AsyncTiffError::MalformedHeader(format!(
                    "unexpected version {version}"
                )))
            }
        };

        let first_ifd_location = if bigtiff {
            cursor.read_u64().await
        } else {
            cursor.read_u32().await.map(u64::from)
        }
        .map_err(header_read_error)?;

        tracing::debug!(?endianness, bigtiff, first_ifd_location, "read TIFF header");

        Ok(Self {
            endianness,
            bigtiff,
            next_ifd_offset: (first_ifd_location != 0).then_some(first_ifd_location),
            visited: HashSet::new(),
            file_size: None,
        })
    }

    /// Bound all subsequent reads by the total size of the file.
    pub fn with_file_size(mut self, file_size: u64) -> Self {
        self.file_size = Some(file_size);
        self
    }

    /// Returns the endianness of the file.
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Returns `true` if this is a bigtiff file.
    pub fn bigtiff(&self) -> bool {
        self.bigtiff
    }

    /// Returns `true` if there are more IFDs to read.
    pub fn has_next_ifd(&self) -> bool {
        self.next_ifd_offset.is_some()
    }

    /// The byte offset of the start of the next IFD.
    ///
    /// This will be `None` if all IFDs have already been read.
    pub fn next_ifd_offset(&self) -> Option<u64> {
        self.next_ifd_offset
    }

    /// Read the next IFD from the file.
    ///
    /// If there are no more IFDs, returns `None`. Fails with
    /// [`AsyncTiffError::CyclicDirectoryChain`] if the next offset was already visited.
    pub async fn read_next_ifd<F: MetadataFetch>(
        &mut self,
        fetch: &F,
    ) -> AsyncTiffResult<Option<ImageFileDirectory>> {
        let Some(ifd_start) = self.next_ifd_offset else {
            return Ok(None);
        };
        if !self.visited.insert(ifd_start) {
            return Err(AsyncTiffError::CyclicDirectoryChain(ifd_start));
        }

        let ifd_reader = ImageFileDirectoryReader::open(
            fetch,
            ifd_start,
            self.bigtiff,
            self.endianness,
            self.file_size,
        )
        .await?;
        let ifd = ifd_reader.read(fetch).await?;
        self.next_ifd_offset = ifd_reader.finish()?;
        Ok(Some(ifd))
    }

    /// Read all IFDs from the file.
    pub async fn read_all_ifds<F: MetadataFetch>(
        &mut self,
        fetch: &F,
    ) -> AsyncTiffResult<Vec<ImageFileDirectory>> {
        let mut ifds = vec![];
        while let Some(ifd) = self.read_next_ifd(fetch).await? {
            ifds.push(ifd);
        }
        tracing::debug!(count = ifds.len(), "read image file directories");
        Ok(ifds)
    }
}

/// Short header reads mean the file is not a TIFF at all, rather than a storage failure.
fn header_read_error(err: AsyncTiffError) -> AsyncTiffError {
    match err {
        AsyncTiffError::EndOfFile(expected, actual) => AsyncTiffError::MalformedHeader(format!(
            "file too short: expected {expected} bytes, got {actual}"
        )),
        err => err,
    }
}

/// Reads the [`ImageFileDirectory`] metadata.
///
/// TIFF metadata is not necessarily contiguous in the files: IFDs are normally all stored
/// contiguously in the header, but the TIFF format allows them to be non-contiguous or spread out through
/// the file.
///
/// All entries and the trailing next-IFD offset are fetched with a single request in
/// [`open`][Self::open]. Only values too large to be stored inline need further requests.
#[derive(Debug)]
pub struct ImageFileDirectoryReader {
    endianness: Endianness,
    bigtiff: bool,
    /// The byte offset of the beginning of this IFD
    ifd_start_offset: u64,
    /// The number of tags in this IFD
    tag_count: u64,
    /// The number of bytes that each IFD entry takes up.
    /// This is 12 bytes for normal TIFF and 20 bytes for BigTIFF.
    ifd_entry_byte_size: u64,
    /// The raw entries, followed by the next IFD offset.
    entries: Bytes,
    file_size: Option<u64>,
}

impl ImageFileDirectoryReader {
    /// Read the entry count and entries of the IFD starting at the given file offset.
    ///
    /// Fails with [`AsyncTiffError::TruncatedDirectory`] if the directory extends past the end of
    /// the file.
    pub async fn open<F: MetadataFetch>(
        fetch: &F,
        ifd_start_offset: u64,
        bigtiff: bool,
        endianness: Endianness,
        file_size: Option<u64>,
    ) -> AsyncTiffResult<Self> {
        // Tag   2 bytes
        // Type  2 bytes
        // Count:
        //  - bigtiff: 8 bytes
        //  - else: 4 bytes
        // Value:
        //  - bigtiff: 8 bytes either a pointer the value itself
        //  - else: 4 bytes either a pointer the value itself
        let ifd_entry_byte_size = if bigtiff { 20 } else { 12 };
        let tag_count_byte_size = if bigtiff { 8 } else { 2 };
        let next_offset_byte_size = if bigtiff { 8 } else { 4 };

        let truncated = |reason: String| AsyncTiffError::truncated(ifd_start_offset, reason);
        let check_in_file = |end: u64| match file_size {
            Some(size) if end > size => Err(truncated(format!(
                "directory needs {end} bytes but the file has {size}"
            ))),
            _ => Ok(()),
        };

        let entries_start = ifd_start_offset
            .checked_add(tag_count_byte_size)
            .ok_or_else(|| truncated("entry count offset overflows".to_string()))?;
        check_in_file(entries_start)?;

        let mut cursor = MetadataCursor::new_with_offset(fetch, endianness, ifd_start_offset);
        let tag_count = if bigtiff {
            cursor.read_u64().await
        } else {
            cursor.read_u16().await.map(u64::from)
        }
        .map_err(|err| match err {
            AsyncTiffError::EndOfFile(..) => truncated(err.to_string()),
            err => err,
        })?;

        let entries_end = tag_count
            .checked_mul(ifd_entry_byte_size)
            .and_then(|len| len.checked_add(next_offset_byte_size))
            .and_then(|len| len.checked_add(entries_start))
            .ok_or_else(|| truncated(format!("entry count {tag_count} overflows")))?;
        check_in_file(entries_end)?;

        let entries = fetch.fetch(entries_start..entries_end).await?;
        if entries.len() as u64 != entries_end - entries_start {
            return Err(truncated(format!(
                "expected {} bytes of entries, got {}",
                entries_end - entries_start,
                entries.len()
            )));
        }
        tracing::trace!(offset = ifd_start_offset, tag_count, "read directory entries");

        Ok(Self {
            endianness,
            bigtiff,
            ifd_start_offset,
            tag_count,
            ifd_entry_byte_size,
            entries,
            file_size,
        })
    }

    /// The number of entries in this directory.
    pub fn tag_count(&self) -> u64 {
        self.tag_count
    }

    /// Manually read the tag with the specified index.
    ///
    /// This can be useful if you need to access tags at a low level. You'll need to call
    /// [`ImageFileDirectory::from_tags`] on the resulting collection of tags.
    pub async fn read_tag<F: MetadataFetch>(
        &self,
        fetch: &F,
        tag_idx: u64,
    ) -> AsyncTiffResult<(Tag, Value)> {
        if tag_idx >= self.tag_count {
            return Err(AsyncTiffError::IndexOutOfRange {
                index: tag_idx as usize,
                len: self.tag_count as usize,
            });
        }
        let start = (tag_idx * self.ifd_entry_byte_size) as usize;
        let entry = self
            .entries
            .slice(start..start + self.ifd_entry_byte_size as usize);
        read_entry(fetch, entry, self.endianness, self.bigtiff, self.file_size).await
    }

    /// Read all tags out of this IFD.
    ///
    /// Out-of-line values are fetched concurrently. When a tag appears more than once, the entry
    /// stored last wins.
    pub async fn read<F: MetadataFetch>(&self, fetch: &F) -> AsyncTiffResult<ImageFileDirectory> {
        let entries = futures::future::try_join_all(
            (0..self.tag_count).map(|tag_idx| self.read_tag(fetch, tag_idx)),
        )
        .await?;

        let mut tags = HashMap::with_capacity(entries.len());
        for (tag, value) in entries {
            if tags.insert(tag, value).is_some() {
                tracing::warn!(
                    ?tag,
                    offset = self.ifd_start_offset,
                    "duplicate tag, keeping the last entry"
                );
            }
        }
        Ok(ImageFileDirectory::from_tags(tags, self.endianness)?.with_file_size(self.file_size))
    }

    /// Finish this reader, decoding the byte offset of the next IFD.
    pub fn finish(&self) -> AsyncTiffResult<Option<u64>> {
        let start = (self.tag_count * self.ifd_entry_byte_size) as usize;
        let mut reader = EndianAwareReader::new(self.entries.slice(start..), self.endianness);
        let next_ifd_offset = reader.read_offset(self.bigtiff)?;

        // If the ifd_offset is 0, no more IFDs
        if next_ifd_offset == 0 {
            Ok(None)
        } else {
            Ok(Some(next_ifd_offset))
        }
    }
}

/// Decode a single 12 or 20 byte directory entry, fetching its value if it is stored out of line.
async fn read_entry<F: MetadataFetch>(
    fetch: &F,
    entry: Bytes,
    endianness: Endianness,
    bigtiff: bool,
    file_size: Option<u64>,
) -> AsyncTiffResult<(Tag, Value)> {
    let mut reader = EndianAwareReader::new(entry, endianness);
    let tag = Tag::from_u16_exhaustive(reader.read_u16()?);
    let type_code = reader.read_u16()?;
    let count = if bigtiff {
        reader.read_u64()?
    } else {
        reader.read_u32()?.into()
    };
    let field = reader.read_bytes(if bigtiff { 8 } else { 4 })?;

    let tag_type = Type::from_u16_exhaustive(type_code);
    if let Type::Unknown(type_code) = tag_type {
        tracing::debug!(?tag, type_code, "keeping value of unknown field type as opaque bytes");
        return Ok((
            tag,
            Value::Opaque {
                type_code,
                count,
                raw: field.to_vec(),
            },
        ));
    }

    let value_byte_length = tag_type.value_bytes(count).ok_or_else(|| {
        AsyncTiffError::tag_decode(tag, format!("{count} values of type {tag_type:?} overflow"))
    })?;

    let data = if value_byte_length <= field.len() as u64 {
        field.slice(..value_byte_length as usize)
    } else {
        let offset = EndianAwareReader::new(field, endianness).read_offset(bigtiff)?;
        let end = offset.checked_add(value_byte_length).ok_or_else(|| {
            AsyncTiffError::tag_decode(tag, format!("value at offset {offset} overflows"))
        })?;
        if let Some(size) = file_size {
            if end > size {
                return Err(AsyncTiffError::tag_decode(
                    tag,
                    format!("value at {offset}..{end} is past the end of the file ({size} bytes)"),
                ));
            }
        }
        let data = fetch.fetch(offset..end).await?;
        if data.len() as u64 != value_byte_length {
            return Err(AsyncTiffError::tag_decode(
                tag,
                format!("expected {value_byte_length} bytes, got {}", data.len()),
            ));
        }
        data
    };

    let value = decode_values(tag, tag_type, count, EndianAwareReader::new(data, endianness))?;
    Ok((tag, value))
}

/// Decode `count` values of a known type.
///
/// A single value decodes to its scalar variant, anything else to a [`Value::List`]. ASCII is the
/// exception: it always decodes to one string, cut at the first NUL. GeoAsciiParams is kept whole,
/// since its GeoKeys address NUL or pipe terminated substrings by byte offset.
// This is derived from the upstream tiff crate:
// https://github.com/image-rs/image-tiff/blob/6dc7a266d30291db1e706c8133357931f9e2a053/src/decoder/ifd.rs#L369-L639
fn decode_values(
    tag: Tag,
    tag_type: Type,
    count: u64,
    mut data: EndianAwareReader,
) -> AsyncTiffResult<Value> {
    if tag_type == Type::ASCII {
        let bytes = data.as_ref();
        let end = match tag {
            Tag::GeoAsciiParamsTag => bytes.len(),
            _ => bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len()),
        };
        let value = std::str::from_utf8(&bytes[..end])
            .map_err(|err| AsyncTiffError::tag_decode(tag, err.to_string()))?;
        return Ok(Value::Ascii(value.to_string()));
    }

    // Case 1: there are no values so we can return immediately.
    if count == 0 {
        return Ok(Value::List(vec![]));
    }

    // Case 2: there is one value.
    if count == 1 {
        return decode_value(tag_type, &mut data);
    }

    let values = (0..count)
        .map(|_| decode_value(tag_type, &mut data))
        .collect::<AsyncTiffResult<Vec<_>>>()?;
    Ok(Value::List(values))
}

fn decode_value(tag_type: Type, data: &mut EndianAwareReader) -> AsyncTiffResult<Value> {
    Ok(match tag_type {
        Type::BYTE | Type::UNDEFINED => Value::Byte(data.read_u8()?),
        Type::SBYTE => Value::SignedByte(data.read_i8()?),
        Type::SHORT => Value::Short(data.read_u16()?),
        Type::SSHORT => Value::SignedShort(data.read_i16()?),
        Type::LONG => Value::Unsigned(data.read_u32()?),
        Type::SLONG => Value::Signed(data.read_i32()?),
        Type::FLOAT => Value::Float(data.read_f32()?),
        Type::DOUBLE => Value::Double(data.read_f64()?),
        Type::RATIONAL => Value::Rational(data.read_u32()?, data.read_u32()?),
        Type::SRATIONAL => Value::SRational(data.read_i32()?, data.read_i32()?),
        Type::IFD => Value::Ifd(data.read_u32()?),
        Type::LONG8 => Value::UnsignedBig(data.read_u64()?),
        Type::SLONG8 => Value::SignedBig(data.read_i64()?),
        Type::IFD8 => Value::IfdBig(data.read_u64()?),
        Type::ASCII => Value::Ascii(char::from(data.read_u8()?).to_string()),
        Type::Unknown(type_code) => {
            return Err(AsyncTiffError::General(format!(
                "cannot decode values of unknown type {type_code}"
            )))
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorKind;

    /// Decode the entry at `tag_offset`, bounded by the size of `fetch`.
    async fn read_tag(
        fetch: &Bytes,
        tag_offset: u64,
        endianness: Endianness,
        bigtiff: bool,
    ) -> AsyncTiffResult<(Tag, Value)> {
        let entry_size = if bigtiff { 20 } else { 12 };
        let entry = fetch.slice(tag_offset as usize..(tag_offset + entry_size) as usize);
        read_entry(fetch, entry, endianness, bigtiff, Some(fetch.len() as u64)).await
    }

    #[tokio::test]
    #[rustfmt::skip]
    async fn test_single_fits_notbig() {
        // personal sanity checks
        assert_eq!(u16::from_le_bytes([42,0]),42);
        assert_eq!(u16::from_be_bytes([0,42]),42);
        assert_eq!(f32::from_le_bytes([0x42,0,0,0]),f32::from_bits(0x00_00_00_42));
        assert_eq!(f32::from_be_bytes([0,0,0,0x42]),f32::from_bits(0x00_00_00_42));
        let cases= [
        // tag type   count      offset
        // /\  / \   /     \   /       \
        ([1,1, 1, 0, 1,0,0,0, 42, 0, 0, 0], Endianness::LittleEndian, Value::Byte      (42                )),
        ([1,1, 0, 1, 0,0,0,1, 42, 0, 0, 0], Endianness::BigEndian,    Value::Byte      (42                )),
        ([1,1, 6, 0, 1,0,0,0, 42, 0, 0, 0], Endianness::LittleEndian, Value::SignedByte(42                )),
        ([1,1, 0, 6, 0,0,0,1, 42, 0, 0, 0], Endianness::BigEndian,    Value::SignedByte(42                )),
        ([1,1, 7, 0, 1,0,0,0, 42, 0, 0, 0], Endianness::LittleEndian, Value::Byte      (42                )), // undefined
        ([1,1, 0, 7, 0,0,0,1, 42, 0, 0, 0], Endianness::BigEndian,    Value::Byte      (42                )), // undefined
        ([1,1, 2, 0, 1,0,0,0,  0, 0, 0, 0], Endianness::LittleEndian, Value::Ascii     ("".into()         )),
        ([1,1, 0, 2, 0,0,0,1,  0, 0, 0, 0], Endianness::BigEndian,    Value::Ascii     ("".into()         )),
        ([1,1, 3, 0, 1,0,0,0, 42, 0, 0, 0], Endianness::LittleEndian, Value::Short       (42              )),
        ([1,1, 0, 3, 0,0,0,1,  0,42, 0, 0], Endianness::BigEndian,    Value::Short       (42              )),
        ([1,1, 8, 0, 1,0,0,0, 42, 0, 0, 0], Endianness::LittleEndian, Value::SignedShort (42              )),
        ([1,1, 0, 8, 0,0,0,1,  0,42, 0, 0], Endianness::BigEndian,    Value::SignedShort (42              )),
        ([1,1, 4, 0, 1,0,0,0, 42, 0, 0, 0], Endianness::LittleEndian, Value::Unsigned  (42                )),
        ([1,1, 0, 4, 0,0,0,1,  0, 0, 0,42], Endianness::BigEndian,    Value::Unsigned  (42                )),
        ([1,1, 9, 0, 1,0,0,0, 42, 0, 0, 0], Endianness::LittleEndian, Value::Signed    (42                )),
        ([1,1, 0, 9, 0,0,0,1,  0, 0, 0,42], Endianness::BigEndian,    Value::Signed    (42                )),
        ([1,1,13, 0, 1,0,0,0, 42, 0, 0, 0], Endianness::LittleEndian, Value::Ifd       (42                )),
        ([1,1, 0,13, 0,0,0,1,  0, 0, 0,42], Endianness::BigEndian,    Value::Ifd       (42                )),
        ([1,1,11, 0, 1,0,0,0, 42, 0, 0, 0], Endianness::LittleEndian, Value::Float     (f32::from_bits(42))),
        ([1,1, 0,11, 0,0,0,1,  0, 0, 0,42], Endianness::BigEndian,    Value::Float     (f32::from_bits(42))),
        ];
        for (buf, byte_order, res) in cases {
            let fetch = Bytes::copy_from_slice(&buf);
            assert_eq!(
                read_tag(&fetch, 0, byte_order, false).await.unwrap(),
                (Tag::from_u16_exhaustive(0x01_01),res)
            );
        }
    }

    #[tokio::test]
    #[rustfmt::skip]
    async fn test_single_fits_big() {
        let cases = [
        //      type       count            offset
        //       / \  1 2 3 4 5 6 7 8   1  2  3  4  5  6  7  8
        ([1,1,  1, 0, 1,0,0,0,0,0,0,0, 42, 0, 0, 0, 0, 0, 0, 0], Endianness::LittleEndian, Value::Byte       (42)                ),
        ([1,1,  0, 1, 0,0,0,0,0,0,0,1, 42, 0, 0, 0, 0, 0, 0, 0], Endianness::BigEndian,    Value::Byte       (42)                ),
        ([1,1,  3, 0, 1,0,0,0,0,0,0,0, 42, 0, 0, 0, 0, 0, 0, 0], Endianness::LittleEndian, Value::Short      (42)                ),
        ([1,1,  0, 3, 0,0,0,0,0,0,0,1,  0,42, 0, 0, 0, 0, 0, 0], Endianness::BigEndian,    Value::Short      (42)                ),
        ([1,1,  4, 0, 1,0,0,0,0,0,0,0, 42, 0, 0, 0, 0, 0, 0, 0], Endianness::LittleEndian, Value::Unsigned   (42)                ),
        ([1,1,  0, 4, 0,0,0,0,0,0,0,1,  0, 0, 0,42, 0, 0, 0, 0], Endianness::BigEndian,    Value::Unsigned   (42)                ),
        ([1,1, 16, 0, 1,0,0,0,0,0,0,0, 42, 0, 0, 0, 0, 0, 0, 0], Endianness::LittleEndian, Value::UnsignedBig(42)                ),
        ([1,1,  0,16, 0,0,0,0,0,0,0,1,  0, 0, 0, 0, 0, 0, 0,42], Endianness::BigEndian,    Value::UnsignedBig(42)                ),
        ([1,1, 17, 0, 1,0,0,0,0,0,0,0, 42, 0, 0, 0, 0, 0, 0, 0], Endianness::LittleEndian, Value::SignedBig  (42)                ),
        ([1,1,  0,17, 0,0,0,0,0,0,0,1,  0, 0, 0, 0, 0, 0, 0,42], Endianness::BigEndian,    Value::SignedBig  (42)                ),
        ([1,1, 18, 0, 1,0,0,0,0,0,0,0, 42, 0, 0, 0, 0, 0, 0, 0], Endianness::LittleEndian, Value::IfdBig     (42)                ),
        ([1,1,  0,18, 0,0,0,0,0,0,0,1,  0, 0, 0, 0, 0, 0, 0,42], Endianness::BigEndian,    Value::IfdBig     (42)                ),
        ([1,1, 12, 0, 1,0,0,0,0,0,0,0, 42, 0, 0, 0, 0, 0, 0, 0], Endianness::LittleEndian, Value::Double     (f64::from_bits(42))),
        ([1,1,  0,12, 0,0,0,0,0,0,0,1,  0, 0, 0, 0, 0, 0, 0,42], Endianness::BigEndian,    Value::Double     (f64::from_bits(42))),
        ([1,1,  5, 0, 1,0,0,0,0,0,0,0,  42,0, 0, 0,43, 0, 0, 0], Endianness::LittleEndian, Value::Rational   (42, 43)            ),
        ([1,1,  0, 5, 0,0,0,0,0,0,0,1,  0, 0, 0,42, 0, 0, 0,43], Endianness::BigEndian,    Value::Rational   (42, 43)            ),
        ([1,1,  10,0, 1,0,0,0,0,0,0,0, 42, 0, 0, 0,43, 0, 0, 0], Endianness::LittleEndian, Value::SRational  (42, 43)            ),
        ([1,1,  0,10, 0,0,0,0,0,0,0,1,  0, 0, 0,42, 0, 0, 0,43], Endianness::BigEndian,    Value::SRational  (42, 43)            ),
        ];
        for (buf, byte_order, res) in cases {
            let fetch = Bytes::copy_from_slice(&buf);
            assert_eq!(
                read_tag(&fetch, 0, byte_order, true).await.unwrap(),
                (Tag::from_u16_exhaustive(0x0101), res)
            )
        }
    }

    #[tokio::test]
    #[rustfmt::skip]
    async fn test_fits_multi_notbig() {
        let cases = [
        //  tag type  count    offset
        //  // /  \  /     \   /     \
        ([1,1, 1, 0, 4,0,0,0, 42,42,42,42], Endianness::LittleEndian, Value::List(vec![Value::Byte       (42); 4]) ),
        ([1,1, 0, 1, 0,0,0,4, 42,42,42,42], Endianness::BigEndian,    Value::List(vec![Value::Byte       (42); 4]) ),
        ([1,1, 6, 0, 4,0,0,0, 42,42,42,42], Endianness::LittleEndian, Value::List(vec![Value::SignedByte (42); 4]) ),
        ([1,1, 2, 0, 4,0,0,0, 42,42,42, 0], Endianness::LittleEndian, Value::Ascii("***".into())),
        ([1,1, 0, 2, 0,0,0,4, 42,42,42, 0], Endianness::BigEndian,    Value::Ascii("***".into())),
        ([1,1, 3, 0, 2,0,0,0, 42, 0,42, 0], Endianness::LittleEndian, Value::List(vec![Value::Short       (42); 2]) ),
        ([1,1, 0, 3, 0,0,0,2,  0,42, 0,42], Endianness::BigEndian,    Value::List(vec![Value::Short       (42); 2]) ),
        ([1,1, 8, 0, 2,0,0,0, 42, 0,42, 0], Endianness::LittleEndian, Value::List(vec![Value::SignedShort (42); 2]) ),
        ([1,1, 0, 8, 0,0,0,2,  0,42, 0,42], Endianness::BigEndian,    Value::List(vec![Value::SignedShort (42); 2]) ),
        ([1,1, 0, 2, 0,0,0,4, b'A',b'B',b'C',0], Endianness::BigEndian, Value::Ascii("ABC".into())),
        ];
        for (buf, byte_order, res) in cases {
            let fetch = Bytes::copy_from_slice(&buf);
            assert_eq!(
                read_tag(&fetch, 0, byte_order, false).await.unwrap(),
                (Tag::from_u16_exhaustive(0x0101), res)
            )
        }
    }

    #[tokio::test]
    #[rustfmt::skip]
    async fn test_notfits_notbig() {
        let cases = [
        //          type  count    offset 12
        //          /\   /     \   /     \
        (vec![1,1, 1, 0, 5,0,0,0, 12, 0, 0, 0, 42,42,42,42,42],          Endianness::LittleEndian, Value::List(vec![Value::Byte       (42                 );5])),
        (vec![1,1, 0, 1, 0,0,0,5,  0, 0, 0,12, 42,42,42,42,42],          Endianness::BigEndian   , Value::List(vec![Value::Byte       (42                 );5])),
        (vec![1,1, 2, 0, 5,0,0,0, 12, 0, 0, 0, 42,42,42,42, 0],          Endianness::LittleEndian,                  Value::Ascii      ("****".into()      )    ),
        (vec![1,1, 0, 2, 0,0,0,5,  0, 0, 0,12, 42,42,42,42, 0],          Endianness::BigEndian   ,                  Value::Ascii      ("****".into()      )    ),
        (vec![1,1, 3, 0, 3,0,0,0, 12, 0, 0, 0, 42, 0,42, 0,42, 0],       Endianness::LittleEndian, Value::List(vec![Value::Short      (42                 );3])),
        (vec![1,1, 0, 3, 0,0,0,3,  0, 0, 0,12,  0,42, 0,42, 0,42],       Endianness::BigEndian   , Value::List(vec![Value::Short      (42                 );3])),
        (vec![1,1, 4, 0, 2,0,0,0, 12, 0, 0, 0, 42, 0, 0, 0,42, 0, 0, 0], Endianness::LittleEndian, Value::List(vec![Value::Unsigned   (42                 );2])),
        (vec![1,1, 0, 4, 0,0,0,2,  0, 0, 0,12,  0, 0, 0,42, 0, 0, 0,42], Endianness::BigEndian   , Value::List(vec![Value::Unsigned   (42                 );2])),
        (vec![1,1, 16,0, 1,0,0,0, 12, 0, 0, 0, 42, 0, 0, 0, 0, 0, 0, 0], Endianness::LittleEndian,                  Value::UnsignedBig(42                 )    ),
        (vec![1,1, 0,16, 0,0,0,1,  0, 0, 0,12,  0, 0, 0, 0, 0, 0, 0,42], Endianness::BigEndian   ,                  Value::UnsignedBig(42                 )    ),
        (vec![1,1, 12,0, 1,0,0,0, 12, 0, 0, 0, 42, 0, 0, 0, 0, 0, 0, 0], Endianness::LittleEndian,                  Value::Double     (f64::from_bits(42))     ),
        (vec![1,1, 0,12, 0,0,0,1,  0, 0, 0,12,  0, 0, 0, 0, 0, 0, 0,42], Endianness::BigEndian   ,                  Value::Double     (f64::from_bits(42))     ),
        (vec![1,1, 5, 0, 1,0,0,0, 12, 0, 0, 0, 42, 0, 0, 0,42, 0, 0, 0], Endianness::LittleEndian,                  Value::Rational   (42, 42             )    ),
        (vec![1,1, 0, 5, 0,0,0,1,  0, 0, 0,12,  0, 0, 0,42, 0, 0, 0,42], Endianness::BigEndian   ,                  Value::Rational   (42, 42             )    ),
        (vec![1,1, 10,0, 1,0,0,0, 12, 0, 0, 0, 42, 0, 0, 0,42, 0, 0, 0], Endianness::LittleEndian,                  Value::SRational  (42, 42             )    ),
        (vec![1,1, 0,10, 0,0,0,1,  0, 0, 0,12,  0, 0, 0,42, 0, 0, 0,42], Endianness::BigEndian   ,                  Value::SRational  (42, 42             )    ),
        ];
        for (buf, byte_order, res) in cases {
            let fetch = Bytes::from(buf);
            assert_eq!(
                read_tag(&fetch, 0, byte_order, false).await.unwrap(),
                (Tag::from_u16_exhaustive(0x0101), res)
            )
        }
    }

    #[tokio::test]
    #[rustfmt::skip]
    async fn test_notfits_big() {
        let cases = [
        //           type       count            offset
        //           / \  1 2 3 4 5 6 7 8   1  2  3  4  5  6  7  8
        (vec![1,1,  1, 0, 9,0,0,0,0,0,0,0, 20, 0, 0, 0, 0, 0, 0, 0, 42,42,42,42,42,42,42,42,42],                      Endianness::LittleEndian, Value::List(vec![Value::Byte       (42                );9])),
        (vec![1,1,  0, 1, 0,0,0,0,0,0,0,9,  0, 0, 0, 0, 0, 0, 0,20, 42,42,42,42,42,42,42,42,42],                      Endianness::BigEndian   , Value::List(vec![Value::Byte       (42                );9])),
        (vec![1,1,  2, 0, 9,0,0,0,0,0,0,0, 20, 0, 0, 0, 0, 0, 0, 0, 42,42,42,42,42,42,42,42, 0],                      Endianness::LittleEndian,                  Value::Ascii      ("********".into() )    ),
        (vec![1,1,  3, 0, 5,0,0,0,0,0,0,0, 20, 0, 0, 0, 0, 0, 0, 0, 42, 0,42, 0,42, 0,42, 0,42, 0],                   Endianness::LittleEndian, Value::List(vec![Value::Short      (42                );5])),
        (vec![1,1,  0, 3, 0,0,0,0,0,0,0,5,  0, 0, 0, 0, 0, 0, 0,20,  0,42, 0,42, 0,42, 0,42, 0,42],                   Endianness::BigEndian   , Value::List(vec![Value::Short      (42                );5])),
        (vec![1,1, 16, 0, 2,0,0,0,0,0,0,0, 20, 0, 0, 0, 0, 0, 0, 0, 42, 0, 0, 0, 0, 0, 0, 0,42, 0, 0, 0, 0, 0, 0, 0], Endianness::LittleEndian, Value::List(vec![Value::UnsignedBig(42                );2])),
        (vec![1,1,  0,16, 0,0,0,0,0,0,0,2,  0, 0, 0, 0, 0, 0, 0,20,  0, 0, 0, 0, 0, 0, 0,42, 0, 0, 0, 0, 0, 0, 0,42], Endianness::BigEndian   , Value::List(vec![Value::UnsignedBig(42                );2])),
        (vec![1,1, 12, 0, 2,0,0,0,0,0,0,0, 20, 0, 0, 0, 0, 0, 0, 0, 42, 0, 0, 0, 0, 0, 0, 0,42, 0, 0, 0, 0, 0, 0, 0], Endianness::LittleEndian, Value::List(vec![Value::Double     (f64::from_bits(42));2])),
        (vec![1,1,  0,12, 0,0,0,0,0,0,0,2,  0, 0, 0, 0, 0, 0, 0,20,  0, 0, 0, 0, 0, 0, 0,42, 0, 0, 0, 0, 0, 0, 0,42], Endianness::BigEndian   , Value::List(vec![Value::Double     (f64::from_bits(42));2])),
        (vec![1,1,  5, 0, 2,0,0,0,0,0,0,0, 20, 0, 0, 0, 0, 0, 0, 0, 42, 0, 0, 0,42, 0, 0, 0,42, 0, 0, 0,42, 0, 0, 0], Endianness::LittleEndian, Value::List(vec![Value::Rational   (42, 42            );2])),
        (vec![1,1,  0, 5, 0,0,0,0,0,0,0,2,  0, 0, 0, 0, 0, 0, 0,20,  0, 0, 0,42, 0, 0, 0,42, 0, 0, 0,42, 0, 0, 0,42], Endianness::BigEndian   , Value::List(vec![Value::Rational   (42, 42            );2])),
        ];
        for (buf, byte_order, res) in cases {
            let fetch = Bytes::from(buf);
            assert_eq!(read_tag(&fetch, 0, byte_order, true).await.unwrap(), (Tag::from_u16_exhaustive(0x0101), res))
        }
    }

    #[tokio::test]
    #[rustfmt::skip]
    async fn test_unknown_type_is_opaque() {
        let fetch = Bytes::copy_from_slice(&[1,1, 99,0, 3,0,0,0, 1,2,3,4]);
        let (tag, value) = read_tag(&fetch, 0, Endianness::LittleEndian, false).await.unwrap();
        assert_eq!(tag, Tag::Unknown(0x0101));
        assert_eq!(value, Value::Opaque { type_code: 99, count: 3, raw: vec![1, 2, 3, 4] });
    }

    #[tokio::test]
    #[rustfmt::skip]
    async fn test_value_past_end_of_file() {
        // 5 bytes at offset 12, but only 3 are present
        let fetch = Bytes::copy_from_slice(&[1,1, 1,0, 5,0,0,0, 12,0,0,0, 42,42,42]);
        let err = read_tag(&fetch, 0, Endianness::LittleEndian, false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TagDecode);

        // count * width overflows u64
        let fetch = Bytes::copy_from_slice(&[1,1, 0,12, 0xff,0xff,0xff,0xff,0xff,0xff,0xff,0xff, 0,0,0,0,0,0,0,20]);
        let err = read_tag(&fetch, 0, Endianness::BigEndian, true).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TagDecode);
    }

    #[tokio::test]
    async fn test_geo_ascii_params_keep_embedded_nul() {
        let fetch = Bytes::copy_from_slice(b"\xb1\x87\x02\0\x0b\0\0\0\x0c\0\0\0ab|c\0de\0fg\0");
        let (tag, value) = read_tag(&fetch, 0, Endianness::LittleEndian, false).await.unwrap();
        assert_eq!(tag, Tag::GeoAsciiParamsTag);
        assert_eq!(value, Value::Ascii("ab|c\0de\0fg\0".to_string()));

        // any other ASCII tag stops at the first NUL
        let fetch = Bytes::copy_from_slice(b"\x0e\x01\x02\0\x0b\0\0\0\x0c\0\0\0ab|c\0de\0fg\0");
        let (_, value) = read_tag(&fetch, 0, Endianness::LittleEndian, false).await.unwrap();
        assert_eq!(value, Value::Ascii("ab|c".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_utf8_ascii() {
        let fetch = Bytes::copy_from_slice(&[1, 1, 2, 0, 3, 0, 0, 0, 0xff, 0xfe, 0, 0]);
        let err = read_tag(&fetch, 0, Endianness::LittleEndian, false)
            .await
            .unwrap_err();
        assert!(matches!(err, AsyncTiffError::TagDecodeError { tag: Tag::Unknown(0x0101), .. }));
    }

    #[tokio::test]
    async fn test_bad_headers() {
        for header in [
            &b"XX*\0\x08\0\0\0"[..],
            &b"II\x2c\0\x08\0\0\0"[..],
            &b"II+\0\x04\0\0\0\0\0\0\0\0\0\0\0"[..],
            &b"MM\0"[..],
        ] {
            let fetch = Bytes::copy_from_slice(header);
            let err = TiffMetadataReader::try_open(&fetch).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedHeader, "{header:?}");
        }
    }

    #[tokio::test]
    #[rustfmt::skip]
    async fn test_directory_past_end_of_file() {
        // header pointing at an IFD with 200 entries but no room for them
        let fetch = Bytes::copy_from_slice(&[b'I',b'I', 42,0, 8,0,0,0, 200,0, 0,0]);
        let mut reader = TiffMetadataReader::try_open(&fetch).await.unwrap()
            .with_file_size(fetch.len() as u64);
        let err = reader.read_next_ifd(&fetch).await.unwrap_err();
        assert!(matches!(err, AsyncTiffError::TruncatedDirectory { offset: 8, .. }));

        // BigTIFF entry count that overflows when multiplied by the entry size
        let fetch = Bytes::copy_from_slice(&[
            b'M',b'M', 0,43, 0,8, 0,0, 0,0,0,0,0,0,0,16,
            0xff,0xff,0xff,0xff,0xff,0xff,0xff,0xff,
        ]);
        let mut reader = TiffMetadataReader::try_open(&fetch).await.unwrap()
            .with_file_size(fetch.len() as u64);
        assert!(reader.bigtiff());
        let err = reader.read_next_ifd(&fetch).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TruncatedDirectory);
    }

    #[tokio::test]
    #[rustfmt::skip]
    async fn test_directory_loop() {
        // An empty IFD at 8 whose next-IFD offset points back at itself
        let fetch = Bytes::copy_from_slice(&[b'I',b'I', 42,0, 8,0,0,0, 0,0, 8,0,0,0]);
        let mut reader = TiffMetadataReader::try_open(&fetch).await.unwrap();
        let ifd_reader = ImageFileDirectoryReader::open(
            &fetch, 8, false, Endianness::LittleEndian, Some(fetch.len() as u64),
        ).await.unwrap();
        assert_eq!(ifd_reader.tag_count(), 0);
        assert_eq!(ifd_reader.finish().unwrap(), Some(8));

        // An empty directory has no image width, so use the visited set directly.
        reader.visited.insert(8);
        let err = reader.read_next_ifd(&fetch).await.unwrap_err();
        assert!(matches!(err, AsyncTiffError::CyclicDirectoryChain(8)));
    }
}
