//! Synthetic TIFF files and instrumented readers shared by the integration tests.
#![allow(dead_code)]

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_cog_reader::error::AsyncTiffResult;
use async_cog_reader::reader::AsyncFileReader;
use async_cog_reader::TIFF;
use bytes::Bytes;
use futures::future::BoxFuture;

/// An in-memory file that counts the byte range requests made against it.
#[derive(Debug)]
pub struct CountingReader {
    data: Bytes,
    requests: AtomicUsize,
}

impl CountingReader {
    pub fn new(data: Bytes) -> Arc<Self> {
        Arc::new(Self {
            data,
            requests: AtomicUsize::new(0),
        })
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl AsyncFileReader for CountingReader {
    fn get_bytes(&self, range: Range<u64>) -> BoxFuture<'_, AsyncTiffResult<Bytes>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.data.get_bytes(range)
    }

    fn get_size(&self) -> BoxFuture<'_, AsyncTiffResult<u64>> {
        self.data.get_size()
    }
}

pub async fn open_bytes(data: Bytes, prefetch: u64) -> AsyncTiffResult<TIFF> {
    TIFF::open(Arc::new(data), prefetch).await
}

/// TIFF field types used by [`Entry`].
pub const BYTE: u16 = 1;
pub const ASCII: u16 = 2;
pub const SHORT: u16 = 3;
pub const LONG: u16 = 4;
pub const RATIONAL: u16 = 5;
pub const UNDEFINED: u16 = 7;
pub const DOUBLE: u16 = 12;
pub const LONG8: u16 = 16;

/// One directory entry, with its values already encoded.
#[derive(Debug, Clone)]
pub struct Entry {
    tag: u16,
    field_type: u16,
    count: u64,
    values: Vec<Value>,
}

#[derive(Debug, Clone, Copy)]
enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F64(f64),
}

impl Entry {
    pub fn bytes(tag: u16, values: &[u8]) -> Self {
        Self::new(tag, BYTE, values.iter().map(|v| Value::U8(*v)).collect())
    }

    pub fn undefined(tag: u16, values: &[u8]) -> Self {
        Self::new(tag, UNDEFINED, values.iter().map(|v| Value::U8(*v)).collect())
    }

    pub fn ascii(tag: u16, value: &str) -> Self {
        let mut values: Vec<_> = value.bytes().map(Value::U8).collect();
        values.push(Value::U8(0));
        Self::new(tag, ASCII, values)
    }

    pub fn short(tag: u16, values: &[u16]) -> Self {
        Self::new(tag, SHORT, values.iter().map(|v| Value::U16(*v)).collect())
    }

    pub fn long(tag: u16, values: &[u32]) -> Self {
        Self::new(tag, LONG, values.iter().map(|v| Value::U32(*v)).collect())
    }

    pub fn long8(tag: u16, values: &[u64]) -> Self {
        Self::new(tag, LONG8, values.iter().map(|v| Value::U64(*v)).collect())
    }

    pub fn rational(tag: u16, numerator: u32, denominator: u32) -> Self {
        let mut entry = Self::new(
            tag,
            RATIONAL,
            vec![Value::U32(numerator), Value::U32(denominator)],
        );
        entry.count = 1;
        entry
    }

    pub fn double(tag: u16, values: &[f64]) -> Self {
        Self::new(tag, DOUBLE, values.iter().map(|v| Value::F64(*v)).collect())
    }

    /// An entry with an arbitrary type code and raw value bytes.
    pub fn raw(tag: u16, field_type: u16, count: u64, raw: &[u8]) -> Self {
        let mut entry = Self::new(tag, field_type, raw.iter().map(|v| Value::U8(*v)).collect());
        entry.count = count;
        entry
    }

    pub fn tag(&self) -> u16 {
        self.tag
    }

    fn new(tag: u16, field_type: u16, values: Vec<Value>) -> Self {
        Self {
            tag,
            field_type,
            count: values.len() as u64,
            values,
        }
    }
}

/// Lays out a TIFF file: header, then data blobs, then the IFD chain with each IFD followed by its
/// out-of-line values.
pub struct TiffBuilder {
    little_endian: bool,
    bigtiff: bool,
    buf: Vec<u8>,
    ifds: Vec<Vec<Entry>>,
}

impl TiffBuilder {
    pub fn new(little_endian: bool, bigtiff: bool) -> Self {
        let mut builder = Self {
            little_endian,
            bigtiff,
            buf: Vec::new(),
            ifds: Vec::new(),
        };
        builder
            .buf
            .extend_from_slice(if little_endian { b"II" } else { b"MM" });
        if bigtiff {
            builder.put_u16(43);
            builder.put_u16(8);
            builder.put_u16(0);
            builder.put_u64(0);
        } else {
            builder.put_u16(42);
            builder.put_u32(0);
        }
        builder
    }

    pub fn classic() -> Self {
        Self::new(true, false)
    }

    /// Append raw bytes, returning their offset.
    pub fn add_blob(&mut self, data: &[u8]) -> u64 {
        let offset = self.buf.len() as u64;
        self.buf.extend_from_slice(data);
        offset
    }

    pub fn add_ifd(&mut self, entries: Vec<Entry>) -> &mut Self {
        self.ifds.push(entries);
        self
    }

    pub fn finish(self) -> Bytes {
        self.build(false)
    }

    /// Like [`TiffBuilder::finish`], but the last IFD links back to the first one.
    pub fn finish_with_cycle(self) -> Bytes {
        self.build(true)
    }

    fn build(mut self, cycle: bool) -> Bytes {
        let first_pointer = if self.bigtiff { 8 } else { 4 };
        let mut pointer = first_pointer;
        let mut first_ifd = None;
        let ifds = std::mem::take(&mut self.ifds);
        for mut entries in ifds {
            if self.buf.len() % 2 == 1 {
                self.buf.push(0);
            }
            let ifd_offset = self.buf.len() as u64;
            first_ifd.get_or_insert(ifd_offset);
            self.patch_offset(pointer, ifd_offset);

            entries.sort_by_key(|entry| entry.tag);
            let (count_size, entry_size, field_size) = if self.bigtiff {
                (8, 20, 8)
            } else {
                (2, 12, 4)
            };
            let mut values_offset =
                ifd_offset + count_size + entry_size * entries.len() as u64 + field_size;

            if self.bigtiff {
                self.put_u64(entries.len() as u64);
            } else {
                self.put_u16(entries.len() as u16);
            }
            let mut out_of_line = Vec::new();
            for entry in &entries {
                let encoded = self.encode(&entry.values);
                self.put_u16(entry.tag);
                self.put_u16(entry.field_type);
                if self.bigtiff {
                    self.put_u64(entry.count);
                } else {
                    self.put_u32(entry.count as u32);
                }
                if encoded.len() as u64 <= field_size {
                    let mut field = encoded;
                    field.resize(field_size as usize, 0);
                    self.buf.extend_from_slice(&field);
                } else {
                    self.put_offset(values_offset);
                    values_offset += encoded.len() as u64;
                    out_of_line.push(encoded);
                }
            }
            pointer = self.buf.len();
            self.put_offset(0);
            for encoded in out_of_line {
                self.buf.extend_from_slice(&encoded);
            }
        }
        if let (true, Some(first_ifd)) = (cycle, first_ifd) {
            self.patch_offset(pointer, first_ifd);
        }
        Bytes::from(self.buf)
    }

    fn encode(&self, values: &[Value]) -> Vec<u8> {
        let mut out = Vec::new();
        for value in values {
            match (*value, self.little_endian) {
                (Value::U8(v), _) => out.push(v),
                (Value::U16(v), true) => out.extend_from_slice(&v.to_le_bytes()),
                (Value::U16(v), false) => out.extend_from_slice(&v.to_be_bytes()),
                (Value::U32(v), true) => out.extend_from_slice(&v.to_le_bytes()),
                (Value::U32(v), false) => out.extend_from_slice(&v.to_be_bytes()),
                (Value::U64(v), true) => out.extend_from_slice(&v.to_le_bytes()),
                (Value::U64(v), false) => out.extend_from_slice(&v.to_be_bytes()),
                (Value::F64(v), true) => out.extend_from_slice(&v.to_le_bytes()),
                (Value::F64(v), false) => out.extend_from_slice(&v.to_be_bytes()),
            }
        }
        out
    }

    fn patch_offset(&mut self, at: usize, offset: u64) {
        let encoded = if self.bigtiff {
            self.encode(&[Value::U64(offset)])
        } else {
            self.encode(&[Value::U32(offset as u32)])
        };
        self.buf[at..at + encoded.len()].copy_from_slice(&encoded);
    }

    fn put_offset(&mut self, offset: u64) {
        if self.bigtiff {
            self.put_u64(offset);
        } else {
            self.put_u32(offset as u32);
        }
    }

    fn put_u16(&mut self, v: u16) {
        let encoded = self.encode(&[Value::U16(v)]);
        self.buf.extend_from_slice(&encoded);
    }

    fn put_u32(&mut self, v: u32) {
        let encoded = self.encode(&[Value::U32(v)]);
        self.buf.extend_from_slice(&encoded);
    }

    fn put_u64(&mut self, v: u64) {
        let encoded = self.encode(&[Value::U64(v)]);
        self.buf.extend_from_slice(&encoded);
    }
}

pub mod tags {
    pub const IMAGE_WIDTH: u16 = 256;
    pub const IMAGE_LENGTH: u16 = 257;
    pub const BITS_PER_SAMPLE: u16 = 258;
    pub const COMPRESSION: u16 = 259;
    pub const PHOTOMETRIC: u16 = 262;
    pub const IMAGE_DESCRIPTION: u16 = 270;
    pub const STRIP_OFFSETS: u16 = 273;
    pub const SAMPLES_PER_PIXEL: u16 = 277;
    pub const ROWS_PER_STRIP: u16 = 278;
    pub const STRIP_BYTE_COUNTS: u16 = 279;
    pub const X_RESOLUTION: u16 = 282;
    pub const PLANAR_CONFIGURATION: u16 = 284;
    pub const PREDICTOR: u16 = 317;
    pub const TILE_WIDTH: u16 = 322;
    pub const TILE_LENGTH: u16 = 323;
    pub const TILE_OFFSETS: u16 = 324;
    pub const TILE_BYTE_COUNTS: u16 = 325;
    pub const MODEL_PIXEL_SCALE: u16 = 33550;
    pub const MODEL_TIEPOINT: u16 = 33922;
    pub const GEO_KEY_DIRECTORY: u16 = 34735;
    pub const GEO_DOUBLE_PARAMS: u16 = 34736;
    pub const GEO_ASCII_PARAMS: u16 = 34737;
}

/// Pixel value of sample `s` at `(x, y)` in the synthetic RGB test images.
pub fn rgb_sample(x: u32, y: u32, s: u32) -> u8 {
    ((x * 7 + y * 13 + s * 101) % 251) as u8
}

/// The chunky RGB content of the tile at `(row, col)`, padded with zeros past the image edge.
pub fn rgb_tile(
    width: u32,
    height: u32,
    tile_size: u32,
    row: u32,
    col: u32,
) -> Vec<u8> {
    let mut out = Vec::with_capacity((tile_size * tile_size * 3) as usize);
    for ty in 0..tile_size {
        for tx in 0..tile_size {
            let (x, y) = (col * tile_size + tx, row * tile_size + ty);
            for s in 0..3 {
                out.push(if x < width && y < height {
                    rgb_sample(x, y, s)
                } else {
                    0
                });
            }
        }
    }
    out
}

/// An uncompressed, tiled, chunky RGB image of `width` x `height` pixels.
pub fn tiled_rgb(width: u32, height: u32, tile_size: u32, builder: &mut TiffBuilder) -> Vec<Entry> {
    let across = width.div_ceil(tile_size);
    let down = height.div_ceil(tile_size);
    let mut offsets = Vec::new();
    let mut counts = Vec::new();
    for row in 0..down {
        for col in 0..across {
            let tile = rgb_tile(width, height, tile_size, row, col);
            offsets.push(builder.add_blob(&tile) as u32);
            counts.push(tile.len() as u32);
        }
    }
    vec![
        Entry::long(tags::IMAGE_WIDTH, &[width]),
        Entry::long(tags::IMAGE_LENGTH, &[height]),
        Entry::short(tags::BITS_PER_SAMPLE, &[8, 8, 8]),
        Entry::short(tags::COMPRESSION, &[1]),
        Entry::short(tags::PHOTOMETRIC, &[2]),
        Entry::short(tags::SAMPLES_PER_PIXEL, &[3]),
        Entry::short(tags::TILE_WIDTH, &[tile_size as u16]),
        Entry::short(tags::TILE_LENGTH, &[tile_size as u16]),
        Entry::long(tags::TILE_OFFSETS, &offsets),
        Entry::long(tags::TILE_BYTE_COUNTS, &counts),
    ]
}
