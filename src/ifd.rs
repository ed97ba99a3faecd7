use std::collections::HashMap;
use std::ops::Range;

use bytes::Bytes;

use crate::error::{AsyncTiffError, AsyncTiffResult};
use crate::geo::{AffineTransform, GeoKeyDirectory};
use crate::predictor::PredictorInfo;
use crate::reader::{AsyncFileReader, Endianness};
use crate::tiff::tags::{
    CompressionMethod, PhotometricInterpretation, PlanarConfiguration, Predictor, ResolutionUnit,
    SampleFormat, Tag,
};
use crate::tiff::{
    Rational, TiffError, TiffFormatError, TiffResult, TiffUnsupportedError, Value,
};
use crate::tile::Tile;

/// An ImageFileDirectory representing Image content
// The ordering of these tags matches the sorted order in TIFF spec Appendix A
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFileDirectory {
    pub(crate) endianness: Endianness,

    pub(crate) new_subfile_type: Option<u32>,

    /// The number of columns in the image, i.e., the number of pixels per row.
    pub(crate) image_width: u32,

    /// The number of rows of pixels in the image.
    pub(crate) image_height: u32,

    pub(crate) bits_per_sample: Vec<u16>,

    pub(crate) compression: CompressionMethod,

    pub(crate) photometric_interpretation: PhotometricInterpretation,

    pub(crate) document_name: Option<String>,

    pub(crate) image_description: Option<String>,

    pub(crate) strip_offsets: Option<Vec<u64>>,

    pub(crate) orientation: Option<u16>,

    /// The number of components per pixel.
    ///
    /// SamplesPerPixel is usually 1 for bilevel, grayscale, and palette-color images.
    /// SamplesPerPixel is usually 3 for RGB images. If this value is higher, ExtraSamples should
    /// give an indication of the meaning of the additional channels.
    pub(crate) samples_per_pixel: u16,

    pub(crate) rows_per_strip: Option<u32>,

    pub(crate) strip_byte_counts: Option<Vec<u64>>,

    pub(crate) min_sample_value: Option<Vec<u16>>,
    pub(crate) max_sample_value: Option<Vec<u16>>,

    /// The number of pixels per ResolutionUnit in the ImageWidth direction.
    pub(crate) x_resolution: Option<Rational>,

    /// The number of pixels per ResolutionUnit in the ImageLength direction.
    pub(crate) y_resolution: Option<Rational>,

    /// How the components of each pixel are stored.
    ///
    /// - Chunky format. The component values for each pixel are stored contiguously. For example,
    ///   for RGB data, the data is stored as RGBRGBRGB
    /// - Planar format. The components are stored in separate component planes. For example, RGB
    ///   data is stored with the Red components in one component plane, the Green in another, and
    ///   the Blue in another.
    ///
    /// If SamplesPerPixel is 1, PlanarConfiguration is irrelevant, and need not be included.
    pub(crate) planar_configuration: PlanarConfiguration,

    pub(crate) resolution_unit: Option<ResolutionUnit>,

    /// Name and version number of the software package(s) used to create the image.
    pub(crate) software: Option<String>,

    /// Date and time of image creation.
    ///
    /// The format is: "YYYY:MM:DD HH:MM:SS", with hours like those on a 24-hour clock, and one
    /// space character between the date and the time. The length of the string, including the
    /// terminating NUL, is 20 bytes.
    pub(crate) date_time: Option<String>,
    pub(crate) artist: Option<String>,
    pub(crate) host_computer: Option<String>,

    pub(crate) predictor: Option<Predictor>,

    /// A color map for palette color images.
    ///
    /// In a TIFF ColorMap, all the Red values come first, followed by the Green values, then the
    /// Blue values. The number of values for each color is 2**BitsPerSample. 0 represents the
    /// minimum intensity, and 65535 represents the maximum intensity.
    pub(crate) color_map: Option<Vec<u16>>,

    pub(crate) tile_width: Option<u32>,
    pub(crate) tile_height: Option<u32>,

    pub(crate) tile_offsets: Option<Vec<u64>>,
    pub(crate) tile_byte_counts: Option<Vec<u64>>,

    pub(crate) extra_samples: Option<Vec<u16>>,

    pub(crate) sample_format: Vec<SampleFormat>,

    pub(crate) jpeg_tables: Option<Bytes>,

    pub(crate) copyright: Option<String>,

    // Geospatial tags
    pub(crate) geo_key_directory: Option<GeoKeyDirectory>,
    pub(crate) model_pixel_scale: Option<Vec<f64>>,
    pub(crate) model_tiepoint: Option<Vec<f64>>,
    pub(crate) model_transformation: Option<Vec<f64>>,

    // GDAL tags
    pub(crate) gdal_nodata: Option<String>,
    pub(crate) gdal_metadata: Option<String>,

    pub(crate) other_tags: HashMap<Tag, Value>,

    /// Size of the file this IFD was read from, when known. Chunk ranges must end inside it.
    pub(crate) file_size: Option<u64>,
}

impl ImageFileDirectory {
    /// Create a new ImageFileDirectory from tag data
    ///
    /// `endianness` is the byte order of the file the tags were read from; it is needed later to
    /// interpret pixel data.
    pub fn from_tags(
        tag_data: HashMap<Tag, Value>,
        endianness: Endianness,
    ) -> AsyncTiffResult<Self> {
        let mut new_subfile_type = None;
        let mut image_width = None;
        let mut image_height = None;
        let mut bits_per_sample = None;
        let mut compression = None;
        let mut photometric_interpretation = None;
        let mut document_name = None;
        let mut image_description = None;
        let mut strip_offsets = None;
        let mut orientation = None;
        let mut samples_per_pixel = None;
        let mut rows_per_strip = None;
        let mut strip_byte_counts = None;
        let mut min_sample_value = None;
        let mut max_sample_value = None;
        let mut x_resolution = None;
        let mut y_resolution = None;
        let mut planar_configuration = None;
        let mut resolution_unit = None;
        let mut software = None;
        let mut date_time = None;
        let mut artist = None;
        let mut host_computer = None;
        let mut predictor = None;
        let mut color_map = None;
        let mut tile_width = None;
        let mut tile_height = None;
        let mut tile_offsets = None;
        let mut tile_byte_counts = None;
        let mut extra_samples = None;
        let mut sample_format = None;
        let mut jpeg_tables = None;
        let mut copyright = None;
        let mut geo_key_directory_data = None;
        let mut model_pixel_scale = None;
        let mut model_tiepoint = None;
        let mut model_transformation = None;
        let mut geo_ascii_params: Option<String> = None;
        let mut geo_double_params: Option<Vec<f64>> = None;
        let mut gdal_nodata = None;
        let mut gdal_metadata = None;

        let mut other_tags = HashMap::new();

        let mut assign = |tag: Tag, value: Value| -> TiffResult<()> {
            match tag {
                Tag::NewSubfileType => new_subfile_type = Some(value.into_u32()?),
                Tag::ImageWidth => image_width = Some(value.into_u32()?),
                Tag::ImageLength => image_height = Some(value.into_u32()?),
                Tag::BitsPerSample => bits_per_sample = Some(value.into_u16_vec()?),
                Tag::Compression => {
                    compression = Some(CompressionMethod::from_u16_exhaustive(value.into_u16()?))
                }
                Tag::PhotometricInterpretation => {
                    photometric_interpretation = Some(
                        PhotometricInterpretation::from_u16_exhaustive(value.into_u16()?),
                    )
                }
                Tag::DocumentName => document_name = Some(value.into_string()?),
                Tag::ImageDescription => image_description = Some(value.into_string()?),
                Tag::StripOffsets => strip_offsets = Some(value.into_u64_vec()?),
                Tag::Orientation => orientation = Some(value.into_u16()?),
                Tag::SamplesPerPixel => samples_per_pixel = Some(value.into_u16()?),
                Tag::RowsPerStrip => rows_per_strip = Some(value.into_u32()?),
                Tag::StripByteCounts => strip_byte_counts = Some(value.into_u64_vec()?),
                Tag::MinSampleValue => min_sample_value = Some(value.into_u16_vec()?),
                Tag::MaxSampleValue => max_sample_value = Some(value.into_u16_vec()?),
                Tag::XResolution => x_resolution = Some(value.into_rational()?),
                Tag::YResolution => y_resolution = Some(value.into_rational()?),
                Tag::PlanarConfiguration => {
                    planar_configuration =
                        Some(PlanarConfiguration::from_u16_exhaustive(value.into_u16()?))
                }
                Tag::ResolutionUnit => {
                    resolution_unit = Some(ResolutionUnit::from_u16_exhaustive(value.into_u16()?))
                }
                Tag::Software => software = Some(value.into_string()?),
                Tag::DateTime => date_time = Some(value.into_string()?),
                Tag::Artist => artist = Some(value.into_string()?),
                Tag::HostComputer => host_computer = Some(value.into_string()?),
                Tag::Predictor => {
                    predictor = Some(Predictor::from_u16_exhaustive(value.into_u16()?))
                }
                Tag::ColorMap => color_map = Some(value.into_u16_vec()?),
                Tag::TileWidth => tile_width = Some(value.into_u32()?),
                Tag::TileLength => tile_height = Some(value.into_u32()?),
                Tag::TileOffsets => tile_offsets = Some(value.into_u64_vec()?),
                Tag::TileByteCounts => tile_byte_counts = Some(value.into_u64_vec()?),
                Tag::ExtraSamples => extra_samples = Some(value.into_u16_vec()?),
                Tag::SampleFormat => {
                    let values = value.into_u16_vec()?;
                    sample_format = Some(
                        values
                            .into_iter()
                            .map(SampleFormat::from_u16_exhaustive)
                            .collect(),
                    );
                }
                Tag::JPEGTables => jpeg_tables = Some(value.into_u8_vec()?.into()),
                Tag::Copyright => copyright = Some(value.into_string()?),

                // Geospatial tags
                // http://geotiff.maptools.org/spec/geotiff2.4.html
                Tag::GeoKeyDirectoryTag => geo_key_directory_data = Some(value.into_u16_vec()?),
                Tag::ModelPixelScaleTag => model_pixel_scale = Some(value.into_f64_vec()?),
                Tag::ModelTiepointTag => model_tiepoint = Some(value.into_f64_vec()?),
                Tag::ModelTransformationTag => {
                    model_transformation = Some(value.into_f64_vec()?)
                }
                Tag::GeoAsciiParamsTag => geo_ascii_params = Some(value.into_string()?),
                Tag::GeoDoubleParamsTag => geo_double_params = Some(value.into_f64_vec()?),

                // GDAL tags
                Tag::GdalNodata => gdal_nodata = Some(value.into_string()?),
                Tag::GdalMetadata => gdal_metadata = Some(value.into_string()?),
                _ => {
                    other_tags.insert(tag, value);
                }
            };
            Ok(())
        };

        for (tag, value) in tag_data {
            assign(tag, value).map_err(|err| AsyncTiffError::tag_decode(tag, err.to_string()))?;
        }

        // We need to actually parse the GeoKeyDirectory after parsing all other tags because the
        // GeoKeyDirectory relies on `GeoAsciiParamsTag` and `GeoDoubleParamsTag` having been
        // parsed.
        let geo_key_directory = geo_key_directory_data
            .map(|data| {
                GeoKeyDirectory::from_tags(
                    &data,
                    geo_double_params.as_deref(),
                    geo_ascii_params.as_deref(),
                )
            })
            .transpose()?;

        let image_width = image_width.ok_or_else(|| required(Tag::ImageWidth))?;
        let image_height = image_height.ok_or_else(|| required(Tag::ImageLength))?;
        let photometric_interpretation =
            photometric_interpretation.ok_or_else(|| required(Tag::PhotometricInterpretation))?;

        // Defaults to one sample per pixel
        // https://web.archive.org/web/20240329145339/https://www.awaresystems.be/imaging/tiff/tifftags/samplesperpixel.html
        let samples_per_pixel = samples_per_pixel.unwrap_or(1);
        if samples_per_pixel == 0 {
            return Err(TiffError::FormatError(TiffFormatError::SamplesPerPixelIsZero).into());
        }
        if let (Some(width @ 0), Some(height)) | (Some(width), Some(height @ 0)) =
            (tile_width, tile_height)
        {
            return Err(
                TiffError::FormatError(TiffFormatError::InvalidDimensions(width, height)).into(),
            );
        }
        if rows_per_strip == Some(0) {
            return Err(AsyncTiffError::tag_decode(
                Tag::RowsPerStrip,
                "rows per strip must be positive",
            ));
        }

        Ok(Self {
            endianness,
            new_subfile_type,
            image_width,
            image_height,
            // Defaults to bilevel
            bits_per_sample: bits_per_sample.unwrap_or_else(|| vec![1; samples_per_pixel as _]),
            // Defaults to no compression
            // https://web.archive.org/web/20240329145331/https://www.awaresystems.be/imaging/tiff/tifftags/compression.html
            compression: compression.unwrap_or(CompressionMethod::None),
            photometric_interpretation,
            document_name,
            image_description,
            strip_offsets,
            orientation,
            samples_per_pixel,
            rows_per_strip,
            strip_byte_counts,
            min_sample_value,
            max_sample_value,
            x_resolution,
            y_resolution,
            planar_configuration: planar_configuration.unwrap_or(PlanarConfiguration::Chunky),
            resolution_unit,
            software,
            date_time,
            artist,
            host_computer,
            predictor,
            color_map,
            tile_width,
            tile_height,
            tile_offsets,
            tile_byte_counts,
            extra_samples,
            // Uint8 is the default for SampleFormat
            // https://web.archive.org/web/20240329145340/https://www.awaresystems.be/imaging/tiff/tifftags/sampleformat.html
            sample_format: sample_format
                .unwrap_or(vec![SampleFormat::Uint; samples_per_pixel as _]),
            copyright,
            jpeg_tables,
            geo_key_directory,
            model_pixel_scale,
            model_tiepoint,
            model_transformation,
            gdal_nodata,
            gdal_metadata,
            other_tags,
            file_size: None,
        })
    }

    pub(crate) fn with_file_size(mut self, file_size: Option<u64>) -> Self {
        self.file_size = file_size;
        self
    }

    /// The byte order of the file this IFD was read from.
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// A general indication of the kind of data contained in this subfile.
    /// <https://web.archive.org/web/20240329145250/https://www.awaresystems.be/imaging/tiff/tifftags/newsubfiletype.html>
    pub fn new_subfile_type(&self) -> Option<u32> {
        self.new_subfile_type
    }

    /// The number of columns in the image, i.e., the number of pixels per row.
    /// <https://web.archive.org/web/20240329145250/https://www.awaresystems.be/imaging/tiff/tifftags/imagewidth.html>
    pub fn image_width(&self) -> u32 {
        self.image_width
    }

    /// The number of rows of pixels in the image.
    /// <https://web.archive.org/web/20240329145250/https://www.awaresystems.be/imaging/tiff/tifftags/imagelength.html>
    pub fn image_height(&self) -> u32 {
        self.image_height
    }

    /// Number of bits per component.
    /// <https://web.archive.org/web/20240329145250/https://www.awaresystems.be/imaging/tiff/tifftags/bitspersample.html>
    pub fn bits_per_sample(&self) -> &[u16] {
        &self.bits_per_sample
    }

    /// Compression scheme used on the image data.
    /// <https://web.archive.org/web/20240329145250/https://www.awaresystems.be/imaging/tiff/tifftags/compression.html>
    pub fn compression(&self) -> CompressionMethod {
        self.compression
    }

    /// The color space of the image data.
    /// <https://web.archive.org/web/20240329145250/https://www.awaresystems.be/imaging/tiff/tifftags/photometricinterpretation.html>
    pub fn photometric_interpretation(&self) -> PhotometricInterpretation {
        self.photometric_interpretation
    }

    /// The name of the document from which this image was scanned.
    pub fn document_name(&self) -> Option<&str> {
        self.document_name.as_deref()
    }

    /// A string that describes the subject of the image.
    pub fn image_description(&self) -> Option<&str> {
        self.image_description.as_deref()
    }

    /// For each strip, the byte offset of that strip.
    pub fn strip_offsets(&self) -> Option<&[u64]> {
        self.strip_offsets.as_deref()
    }

    /// The orientation of the image with respect to the rows and columns.
    pub fn orientation(&self) -> Option<u16> {
        self.orientation
    }

    /// The number of components per pixel.
    pub fn samples_per_pixel(&self) -> u16 {
        self.samples_per_pixel
    }

    /// The number of rows per strip, as stored in the file.
    pub fn rows_per_strip(&self) -> Option<u32> {
        self.rows_per_strip
    }

    /// For each strip, the number of bytes in the strip after compression.
    pub fn strip_byte_counts(&self) -> Option<&[u64]> {
        self.strip_byte_counts.as_deref()
    }

    /// The minimum component value used.
    pub fn min_sample_value(&self) -> Option<&[u16]> {
        self.min_sample_value.as_deref()
    }

    /// The maximum component value used.
    pub fn max_sample_value(&self) -> Option<&[u16]> {
        self.max_sample_value.as_deref()
    }

    /// The number of pixels per ResolutionUnit in the ImageWidth direction.
    pub fn x_resolution(&self) -> Option<Rational> {
        self.x_resolution
    }

    /// The number of pixels per ResolutionUnit in the ImageLength direction.
    pub fn y_resolution(&self) -> Option<Rational> {
        self.y_resolution
    }

    /// How the components of each pixel are stored.
    pub fn planar_configuration(&self) -> PlanarConfiguration {
        self.planar_configuration
    }

    /// The unit of measurement for XResolution and YResolution.
    pub fn resolution_unit(&self) -> Option<ResolutionUnit> {
        self.resolution_unit
    }

    /// Name and version number of the software package(s) used to create the image.
    pub fn software(&self) -> Option<&str> {
        self.software.as_deref()
    }

    /// Date and time of image creation.
    pub fn date_time(&self) -> Option<&str> {
        self.date_time.as_deref()
    }

    /// Person who created the image.
    pub fn artist(&self) -> Option<&str> {
        self.artist.as_deref()
    }

    /// The computer and/or operating system in use at the time of image creation.
    pub fn host_computer(&self) -> Option<&str> {
        self.host_computer.as_deref()
    }

    /// A mathematical operator that is applied to the image data before an encoding scheme is
    /// applied.
    pub fn predictor(&self) -> Option<Predictor> {
        self.predictor
    }

    /// The raw ColorMap tag, red values first, then green, then blue.
    pub fn color_map(&self) -> Option<&[u16]> {
        self.color_map.as_deref()
    }

    /// The tile width in pixels.
    pub fn tile_width(&self) -> Option<u32> {
        self.tile_width
    }

    /// The tile length (height) in pixels.
    pub fn tile_height(&self) -> Option<u32> {
        self.tile_height
    }

    /// For each tile, the byte offset of that tile, as compressed and stored on disk.
    pub fn tile_offsets(&self) -> Option<&[u64]> {
        self.tile_offsets.as_deref()
    }

    /// For each tile, the number of (compressed) bytes in that tile.
    pub fn tile_byte_counts(&self) -> Option<&[u64]> {
        self.tile_byte_counts.as_deref()
    }

    /// Description of extra components.
    pub fn extra_samples(&self) -> Option<&[u16]> {
        self.extra_samples.as_deref()
    }

    /// Specifies how to interpret each data sample in a pixel.
    pub fn sample_format(&self) -> &[SampleFormat] {
        &self.sample_format
    }

    /// JPEG quantization and/or Huffman tables.
    pub fn jpeg_tables(&self) -> Option<&[u8]> {
        self.jpeg_tables.as_deref()
    }

    /// Copyright notice.
    pub fn copyright(&self) -> Option<&str> {
        self.copyright.as_deref()
    }

    /// Geospatial tags
    /// <https://web.archive.org/web/20240329145313/https://www.awaresystems.be/imaging/tiff/tifftags/geokeydirectorytag.html>
    pub fn geo_key_directory(&self) -> Option<&GeoKeyDirectory> {
        self.geo_key_directory.as_ref()
    }

    /// Used in interchangeable GeoTIFF files.
    /// <https://web.archive.org/web/20240329145238/https://www.awaresystems.be/imaging/tiff/tifftags/modelpixelscaletag.html>
    pub fn model_pixel_scale(&self) -> Option<&[f64]> {
        self.model_pixel_scale.as_deref()
    }

    /// Used in interchangeable GeoTIFF files.
    /// <https://web.archive.org/web/20240329145303/https://www.awaresystems.be/imaging/tiff/tifftags/modeltiepointtag.html>
    pub fn model_tiepoint(&self) -> Option<&[f64]> {
        self.model_tiepoint.as_deref()
    }

    /// A 4x4 row-major matrix mapping raster space to model space.
    pub fn model_transformation(&self) -> Option<&[f64]> {
        self.model_transformation.as_deref()
    }

    /// The GDAL nodata value, as the string GDAL wrote.
    pub fn gdal_nodata(&self) -> Option<&str> {
        self.gdal_nodata.as_deref()
    }

    /// GDAL XML metadata.
    pub fn gdal_metadata(&self) -> Option<&str> {
        self.gdal_metadata.as_deref()
    }

    /// Tags for which this crate doesn't have a hard-coded field.
    pub fn other_tags(&self) -> &HashMap<Tag, Value> {
        &self.other_tags
    }

    /// The pixel to model space transform, if the IFD carries georeferencing tags.
    pub fn geotransform(&self) -> Option<AffineTransform> {
        AffineTransform::from_ifd(self)
    }

    /// The bounding box `(min_x, min_y, max_x, max_y)` of the image in model coordinates.
    ///
    /// Only meaningful for north-up images without rotation.
    pub fn native_bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let transform = self.geotransform()?;
        let (width, height) = (self.image_width as f64, self.image_height as f64);
        let (left, top) = transform.apply(0.0, 0.0);
        let (right, bottom) = transform.apply(width, height);
        Some((
            left.min(right),
            top.min(bottom),
            left.max(right),
            top.max(bottom),
        ))
    }

    /// Construct colormap from colormap tag
    ///
    /// Returns `None` if there is no ColorMap or it holds fewer than `3 * 2**BitsPerSample`
    /// values.
    pub fn colormap(&self) -> Option<HashMap<usize, [u8; 3]>> {
        fn cmap_transform(val: u16) -> u8 {
            // 65535 maps to 255
            (val / 257) as u8
        }

        let cmap_data = self.color_map.as_deref()?;
        let bits_per_sample = *self.bits_per_sample.first()?;
        if bits_per_sample > 16 {
            return None;
        }
        let count = 1usize << bits_per_sample;
        if cmap_data.len() < count * 3 {
            return None;
        }
        Some(
            (0..count)
                .map(|idx| {
                    let color = std::array::from_fn(|i| cmap_transform(cmap_data[idx + i * count]));
                    (idx, color)
                })
                .collect(),
        )
    }

    /// Whether image data is organized in tiles rather than strips.
    pub fn is_tiled(&self) -> bool {
        self.tile_width.is_some() && self.tile_height.is_some()
    }

    /// Number of separately stored sample planes: SamplesPerPixel for planar images, else 1.
    pub fn planes(&self) -> usize {
        match self.planar_configuration {
            PlanarConfiguration::Planar => self.samples_per_pixel as usize,
            _ => 1,
        }
    }

    /// Return the number of x/y tiles in the IFD
    /// Returns `None` if this is not a tiled TIFF
    pub fn tile_count(&self) -> Option<(usize, usize)> {
        let x_count = self.image_width.div_ceil(self.tile_width?);
        let y_count = self.image_height.div_ceil(self.tile_height?);
        Some((x_count as usize, y_count as usize))
    }

    /// Rows in every strip but possibly the last, clamped to the image height.
    fn effective_rows_per_strip(&self) -> u32 {
        self.rows_per_strip
            .unwrap_or(self.image_height)
            .min(self.image_height)
            .max(1)
    }

    /// Return the number of strips in each plane of the IFD
    /// Returns `None` if this is a tiled TIFF
    pub fn strip_count(&self) -> Option<usize> {
        if self.is_tiled() {
            return None;
        }
        Some(self.image_height.div_ceil(self.effective_rows_per_strip()) as usize)
    }

    fn check_plane(&self, plane: usize) -> AsyncTiffResult<()> {
        if plane >= self.planes() {
            return Err(AsyncTiffError::IndexOutOfRange {
                index: plane,
                len: self.planes(),
            });
        }
        Ok(())
    }

    /// The byte range of the tile at `row`, `col` in sample plane `plane`.
    ///
    /// `plane` must be 0 unless the image is stored planar.
    pub fn tile_byte_range(
        &self,
        row: usize,
        col: usize,
        plane: usize,
    ) -> AsyncTiffResult<Range<u64>> {
        let (across, down) = self.tile_count().ok_or_else(|| {
            AsyncTiffError::UnsupportedLayout(
                "image is organized in strips, use strip addressing".to_string(),
            )
        })?;
        if row >= down {
            return Err(AsyncTiffError::IndexOutOfRange {
                index: row,
                len: down,
            });
        }
        if col >= across {
            return Err(AsyncTiffError::IndexOutOfRange {
                index: col,
                len: across,
            });
        }
        self.check_plane(plane)?;
        let index = (across * down)
            .checked_mul(plane)
            .and_then(|start| start.checked_add(row * across + col));
        chunk_byte_range(
            self.tile_offsets.as_deref(),
            self.tile_byte_counts.as_deref(),
            (Tag::TileOffsets, Tag::TileByteCounts),
            index,
            self.file_size,
        )
    }

    /// The byte range of strip `strip` in sample plane `plane`.
    ///
    /// `plane` must be 0 unless the image is stored planar.
    pub fn strip_byte_range(&self, strip: usize, plane: usize) -> AsyncTiffResult<Range<u64>> {
        let strips = self.strip_count().ok_or_else(|| {
            AsyncTiffError::UnsupportedLayout(
                "image is organized in tiles, use tile addressing".to_string(),
            )
        })?;
        if strip >= strips {
            return Err(AsyncTiffError::IndexOutOfRange {
                index: strip,
                len: strips,
            });
        }
        self.check_plane(plane)?;
        let index = strips
            .checked_mul(plane)
            .and_then(|start| start.checked_add(strip));
        chunk_byte_range(
            self.strip_offsets.as_deref(),
            self.strip_byte_counts.as_deref(),
            (Tag::StripOffsets, Tag::StripByteCounts),
            index,
            self.file_size,
        )
    }

    fn predictor_info(&self, chunk_width: u32, chunk_height: u32) -> AsyncTiffResult<PredictorInfo> {
        let bits_per_sample = match self.bits_per_sample.as_slice() {
            [first, rest @ ..] if rest.iter().all(|bits| bits == first) => *first,
            _ => {
                return Err(TiffError::UnsupportedError(
                    TiffUnsupportedError::InconsistentBitsPerSample(self.bits_per_sample.clone()),
                )
                .into())
            }
        };
        let samples_per_pixel = match self.planar_configuration {
            PlanarConfiguration::Chunky => self.samples_per_pixel,
            PlanarConfiguration::Planar => 1,
            other => {
                return Err(TiffError::UnsupportedError(
                    TiffUnsupportedError::UnsupportedPlanarConfig(other),
                )
                .into())
            }
        };
        Ok(PredictorInfo {
            endianness: self.endianness,
            chunk_width,
            chunk_height,
            bits_per_sample,
            samples_per_pixel,
        })
    }

    fn tile_predictor_info(&self) -> AsyncTiffResult<PredictorInfo> {
        match (self.tile_width, self.tile_height) {
            (Some(width), Some(height)) => self.predictor_info(width, height),
            _ => Err(AsyncTiffError::UnsupportedLayout(
                "image is organized in strips, use strip addressing".to_string(),
            )),
        }
    }

    fn strip_predictor_info(&self, strip: usize) -> AsyncTiffResult<PredictorInfo> {
        let rows_per_strip = self.effective_rows_per_strip();
        let first_row = (strip as u64 * rows_per_strip as u64).min(self.image_height as u64) as u32;
        let rows = rows_per_strip.min(self.image_height - first_row);
        self.predictor_info(self.image_width, rows)
    }

    fn make_tile(
        &self,
        row: usize,
        col: usize,
        predictor_info: PredictorInfo,
        compressed_bytes: Vec<Bytes>,
    ) -> Tile {
        Tile {
            row,
            col,
            predictor: self.predictor.unwrap_or(Predictor::None),
            predictor_info,
            compressed_bytes,
            compression_method: self.compression,
            photometric_interpretation: self.photometric_interpretation,
            jpeg_tables: self.jpeg_tables.clone(),
        }
    }

    /// Fetch the tile located at `row` and `col` using the provided reader.
    ///
    /// All sample planes of a planar image are fetched with a single
    /// [`AsyncFileReader::get_byte_ranges`] call.
    pub async fn fetch_tile(
        &self,
        row: usize,
        col: usize,
        reader: &dyn AsyncFileReader,
    ) -> AsyncTiffResult<Tile> {
        let predictor_info = self.tile_predictor_info()?;
        let ranges = (0..self.planes())
            .map(|plane| self.tile_byte_range(row, col, plane))
            .collect::<AsyncTiffResult<Vec<_>>>()?;
        let compressed_bytes = fetch_chunks(reader, ranges).await?;
        Ok(self.make_tile(row, col, predictor_info, compressed_bytes))
    }

    /// Fetch the tiles located at each `(row, col)` using the provided reader.
    ///
    /// All byte ranges are requested in one [`AsyncFileReader::get_byte_ranges`] call.
    pub async fn fetch_tiles(
        &self,
        tiles: &[(usize, usize)],
        reader: &dyn AsyncFileReader,
    ) -> AsyncTiffResult<Vec<Tile>> {
        let predictor_info = self.tile_predictor_info()?;
        let planes = self.planes();

        // 1: Get all the byte ranges for all tiles
        let mut byte_ranges = Vec::with_capacity(tiles.len() * planes);
        for &(row, col) in tiles {
            for plane in 0..planes {
                byte_ranges.push(self.tile_byte_range(row, col, plane)?);
            }
        }

        // 2: Fetch using `get_ranges`
        let mut buffers = fetch_chunks(reader, byte_ranges).await?.into_iter();

        // 3: Create tile objects
        Ok(tiles
            .iter()
            .map(|&(row, col)| {
                let compressed_bytes = buffers.by_ref().take(planes).collect();
                self.make_tile(row, col, predictor_info, compressed_bytes)
            })
            .collect())
    }

    /// Fetch strip `strip` using the provided reader.
    pub async fn fetch_strip(
        &self,
        strip: usize,
        reader: &dyn AsyncFileReader,
    ) -> AsyncTiffResult<Tile> {
        let ranges = (0..self.planes())
            .map(|plane| self.strip_byte_range(strip, plane))
            .collect::<AsyncTiffResult<Vec<_>>>()?;
        let predictor_info = self.strip_predictor_info(strip)?;
        let compressed_bytes = fetch_chunks(reader, ranges).await?;
        Ok(self.make_tile(strip, 0, predictor_info, compressed_bytes))
    }
}

fn required(tag: Tag) -> AsyncTiffError {
    TiffError::FormatError(TiffFormatError::RequiredTagNotFound(tag)).into()
}

/// Look up entry `index` of a pair of offset and byte count arrays.
///
/// Non-empty chunks must end within `file_size`, if it is known.
fn chunk_byte_range(
    offsets: Option<&[u64]>,
    byte_counts: Option<&[u64]>,
    (offsets_tag, byte_counts_tag): (Tag, Tag),
    index: Option<usize>,
    file_size: Option<u64>,
) -> AsyncTiffResult<Range<u64>> {
    let offsets = offsets.ok_or_else(|| required(offsets_tag))?;
    let byte_counts = byte_counts.ok_or_else(|| required(byte_counts_tag))?;
    let inconsistent =
        || AsyncTiffError::from(TiffError::FormatError(TiffFormatError::InconsistentSizesEncountered));
    let index = index.ok_or_else(inconsistent)?;
    let offset = *offsets.get(index).ok_or_else(inconsistent)?;
    let byte_count = *byte_counts.get(index).ok_or_else(inconsistent)?;
    let end = offset.checked_add(byte_count).ok_or_else(|| {
        AsyncTiffError::tag_decode(
            offsets_tag,
            format!("chunk at {offset} with {byte_count} bytes overflows"),
        )
    })?;
    match file_size {
        Some(file_size) if byte_count > 0 && end > file_size => Err(AsyncTiffError::tag_decode(
            byte_counts_tag,
            format!("chunk {offset}..{end} extends past the end of the file at {file_size}"),
        )),
        _ => Ok(offset..end),
    }
}

/// Fetch every range in one batch, skipping empty ranges of sparse chunks.
async fn fetch_chunks(
    reader: &dyn AsyncFileReader,
    ranges: Vec<Range<u64>>,
) -> AsyncTiffResult<Vec<Bytes>> {
    let requested = ranges
        .iter()
        .filter(|range| !range.is_empty())
        .cloned()
        .collect::<Vec<_>>();
    let mut fetched = if requested.is_empty() {
        Vec::new()
    } else {
        reader.get_byte_ranges(requested).await?
    }
    .into_iter();

    ranges
        .into_iter()
        .map(|range| {
            if range.is_empty() {
                return Ok(Bytes::new());
            }
            let expected = range.end - range.start;
            let bytes = fetched.next().ok_or(AsyncTiffError::EndOfFile(expected, 0))?;
            if bytes.len() as u64 != expected {
                return Err(AsyncTiffError::EndOfFile(expected, bytes.len() as u64));
            }
            Ok(bytes)
        })
        .collect()
}
