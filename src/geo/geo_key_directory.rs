use std::collections::BTreeMap;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{AsyncTiffError, AsyncTiffResult};
use crate::tiff::tags::Tag;

/// Well-known GeoKey ids.
///
/// Keys outside of this list are still decoded and can be looked up with
/// [`GeoKeyDirectory::get`] by their numeric id.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, TryFromPrimitive, IntoPrimitive, Eq, Hash)]
#[repr(u16)]
pub enum GeoKeyTag {
    // GeoTIFF configuration keys
    ModelType = 1024,
    RasterType = 1025,
    Citation = 1026,

    // Geodetic CRS Parameter Keys
    GeographicType = 2048,
    GeogCitation = 2049,
    GeogGeodeticDatum = 2050,
    GeogPrimeMeridian = 2051,
    GeogLinearUnits = 2052,
    GeogLinearUnitSize = 2053,
    GeogAngularUnits = 2054,
    GeogAngularUnitSize = 2055,
    GeogEllipsoid = 2056,
    GeogSemiMajorAxis = 2057,
    GeogSemiMinorAxis = 2058,
    GeogInvFlattening = 2059,
    GeogAzimuthUnits = 2060,
    GeogPrimeMeridianLong = 2061,

    // Projected CRS Parameter Keys
    ProjectedType = 3072,
    ProjCitation = 3073,
    Projection = 3074,
    ProjCoordTrans = 3075,
    ProjLinearUnits = 3076,
    ProjLinearUnitSize = 3077,
    ProjStdParallel1 = 3078,
    ProjStdParallel2 = 3079,
    ProjNatOriginLong = 3080,
    ProjNatOriginLat = 3081,
    ProjFalseEasting = 3082,
    ProjFalseNorthing = 3083,
    ProjFalseOriginLong = 3084,
    ProjFalseOriginLat = 3085,
    ProjFalseOriginEasting = 3086,
    ProjFalseOriginNorthing = 3087,
    ProjCenterLong = 3088,
    ProjCenterLat = 3089,
    ProjCenterEasting = 3090,
    ProjCenterNorthing = 3091,
    ProjScaleAtNatOrigin = 3092,
    ProjScaleAtCenter = 3093,
    ProjAzimuthAngle = 3094,
    ProjStraightVertPoleLong = 3095,

    // Vertical CRS Parameter Keys (4096-5119)
    Vertical = 4096,
    VerticalCitation = 4097,
    VerticalDatum = 4098,
    VerticalUnits = 4099,
}

/// The value of a single GeoKey.
#[derive(Debug, Clone, PartialEq)]
pub enum GeoKeyValue {
    /// A short stored in the key entry itself, or a single short from the key directory.
    Short(u16),
    /// Several shorts from the key directory.
    ShortList(Vec<u16>),
    /// A single value from `GeoDoubleParamsTag`.
    Double(f64),
    /// Several values from `GeoDoubleParamsTag`.
    DoubleList(Vec<f64>),
    /// A substring of `GeoAsciiParamsTag`, with its trailing `|` removed.
    Ascii(String),
}

impl GeoKeyValue {
    /// The value as a short, if it is one.
    pub fn as_u16(&self) -> Option<u16> {
        match self {
            Self::Short(val) => Some(*val),
            _ => None,
        }
    }

    /// The value as a double, if it is one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(val) => Some(*val),
            _ => None,
        }
    }

    /// The value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Ascii(val) => Some(val),
            _ => None,
        }
    }
}

/// Decoded contents of the GeoTIFF key directory.
///
/// <http://docs.opengeospatial.org/is/19-008r4/19-008r4.html#_requirements_class_geokeydirectorytag>
#[derive(Debug, Clone, PartialEq)]
pub struct GeoKeyDirectory {
    key_directory_version: u16,
    key_revision: u16,
    key_minor_revision: u16,
    keys: BTreeMap<u16, GeoKeyValue>,
}

impl GeoKeyDirectory {
    /// Decode the key directory from the raw contents of `GeoKeyDirectoryTag`,
    /// `GeoDoubleParamsTag` and `GeoAsciiParamsTag`.
    ///
    /// The directory starts with a `(version, revision, minor revision, key count)` header,
    /// followed by one `(key id, location, count, value or index)` quadruple per key.
    pub fn from_tags(
        directory: &[u16],
        double_params: Option<&[f64]>,
        ascii_params: Option<&str>,
    ) -> AsyncTiffResult<Self> {
        if directory.len() < 4 {
            return Err(AsyncTiffError::GeoKeyDecodeError(format!(
                "key directory has {} values, expected at least a 4 value header",
                directory.len()
            )));
        }
        let (header, entries) = directory.split_at(4);
        let key_directory_version = header[0];
        let key_revision = header[1];
        let key_minor_revision = header[2];
        let number_of_keys = header[3] as usize;

        if key_directory_version != 1 {
            tracing::warn!(key_directory_version, "unexpected GeoKey directory version");
        }

        if entries.len() < number_of_keys * 4 {
            return Err(AsyncTiffError::GeoKeyDecodeError(format!(
                "header declares {number_of_keys} keys but only {} values follow",
                entries.len()
            )));
        }

        let mut keys = BTreeMap::new();
        for entry in entries.chunks_exact(4).take(number_of_keys) {
            let key_id = entry[0];
            let location = entry[1];
            let count = entry[2] as usize;
            let value_offset = entry[3];

            let value = match location {
                0 => GeoKeyValue::Short(value_offset),
                _ => {
                    let start = value_offset as usize;
                    let range = start..start + count;
                    let out_of_range = |len: usize| {
                        AsyncTiffError::GeoKeyDecodeError(format!(
                            "key {key_id} references values {range:?} of tag {location}, which has {len}"
                        ))
                    };
                    match Tag::from_u16_exhaustive(location) {
                        Tag::GeoKeyDirectoryTag => {
                            let values = directory
                                .get(range.clone())
                                .ok_or_else(|| out_of_range(directory.len()))?;
                            match values {
                                [value] => GeoKeyValue::Short(*value),
                                values => GeoKeyValue::ShortList(values.to_vec()),
                            }
                        }
                        Tag::GeoDoubleParamsTag => {
                            let params = double_params.unwrap_or_default();
                            let values = params
                                .get(range.clone())
                                .ok_or_else(|| out_of_range(params.len()))?;
                            match values {
                                [value] => GeoKeyValue::Double(*value),
                                values => GeoKeyValue::DoubleList(values.to_vec()),
                            }
                        }
                        Tag::GeoAsciiParamsTag => {
                            let params = ascii_params.unwrap_or_default();
                            let value = params
                                .get(range.clone())
                                .ok_or_else(|| out_of_range(params.len()))?;
                            GeoKeyValue::Ascii(value.trim_end_matches(['|', '\0']).to_string())
                        }
                        _ => {
                            return Err(AsyncTiffError::GeoKeyDecodeError(format!(
                                "key {key_id} has unsupported location {location}"
                            )))
                        }
                    }
                }
            };

            if GeoKeyTag::try_from(key_id).is_err() {
                tracing::debug!(key_id, "keeping unrecognized GeoKey");
            }
            keys.insert(key_id, value);
        }

        Ok(Self {
            key_directory_version,
            key_revision,
            key_minor_revision,
            keys,
        })
    }

    /// The `(version, revision, minor revision)` triple from the directory header.
    pub fn version(&self) -> (u16, u16, u16) {
        (
            self.key_directory_version,
            self.key_revision,
            self.key_minor_revision,
        )
    }

    /// Look up a key by its numeric id.
    pub fn get(&self, key_id: impl Into<u16>) -> Option<&GeoKeyValue> {
        self.keys.get(&key_id.into())
    }

    /// All decoded keys, ordered by id.
    pub fn keys(&self) -> &BTreeMap<u16, GeoKeyValue> {
        &self.keys
    }

    fn get_u16(&self, tag: GeoKeyTag) -> Option<u16> {
        self.get(tag).and_then(GeoKeyValue::as_u16)
    }

    fn get_f64(&self, tag: GeoKeyTag) -> Option<f64> {
        self.get(tag).and_then(GeoKeyValue::as_f64)
    }

    fn get_str(&self, tag: GeoKeyTag) -> Option<&str> {
        self.get(tag).and_then(GeoKeyValue::as_str)
    }

    /// GTModelTypeGeoKey
    pub fn model_type(&self) -> Option<u16> {
        self.get_u16(GeoKeyTag::ModelType)
    }

    /// GTRasterTypeGeoKey
    pub fn raster_type(&self) -> Option<u16> {
        self.get_u16(GeoKeyTag::RasterType)
    }

    /// GTCitationGeoKey
    pub fn citation(&self) -> Option<&str> {
        self.get_str(GeoKeyTag::Citation)
    }

    /// GeographicTypeGeoKey
    pub fn geographic_type(&self) -> Option<u16> {
        self.get_u16(GeoKeyTag::GeographicType)
    }

    /// GeogCitationGeoKey
    pub fn geog_citation(&self) -> Option<&str> {
        self.get_str(GeoKeyTag::GeogCitation)
    }

    /// GeogGeodeticDatumGeoKey
    pub fn geog_geodetic_datum(&self) -> Option<u16> {
        self.get_u16(GeoKeyTag::GeogGeodeticDatum)
    }

    /// GeogAngularUnitsGeoKey
    pub fn geog_angular_units(&self) -> Option<u16> {
        self.get_u16(GeoKeyTag::GeogAngularUnits)
    }

    /// GeogEllipsoidGeoKey
    pub fn geog_ellipsoid(&self) -> Option<u16> {
        self.get_u16(GeoKeyTag::GeogEllipsoid)
    }

    /// GeogSemiMajorAxisGeoKey
    pub fn geog_semi_major_axis(&self) -> Option<f64> {
        self.get_f64(GeoKeyTag::GeogSemiMajorAxis)
    }

    /// GeogInvFlatteningGeoKey
    pub fn geog_inv_flattening(&self) -> Option<f64> {
        self.get_f64(GeoKeyTag::GeogInvFlattening)
    }

    /// ProjectedCSTypeGeoKey
    pub fn projected_type(&self) -> Option<u16> {
        self.get_u16(GeoKeyTag::ProjectedType)
    }

    /// PCSCitationGeoKey
    pub fn proj_citation(&self) -> Option<&str> {
        self.get_str(GeoKeyTag::ProjCitation)
    }

    /// ProjectionGeoKey
    pub fn projection(&self) -> Option<u16> {
        self.get_u16(GeoKeyTag::Projection)
    }

    /// ProjLinearUnitsGeoKey
    pub fn proj_linear_units(&self) -> Option<u16> {
        self.get_u16(GeoKeyTag::ProjLinearUnits)
    }

    /// VerticalCSTypeGeoKey
    pub fn vertical(&self) -> Option<u16> {
        self.get_u16(GeoKeyTag::Vertical)
    }

    /// Return the EPSG code representing the crs of the image
    pub fn epsg_code(&self) -> Option<u16> {
        self.projected_type().or_else(|| self.geographic_type())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    #[rustfmt::skip]
    fn test_utm_directory() {
        let directory = [
            1, 1, 0, 4,
            1024, 0, 1, 1,
            1025, 0, 1, 1,
            1026, 34737, 22, 0,
            3072, 0, 1, 32612,
        ];
        let ascii = "WGS 84 / UTM zone 12N|";
        let gkd = GeoKeyDirectory::from_tags(&directory, None, Some(ascii)).unwrap();
        assert_eq!(gkd.version(), (1, 1, 0));
        assert_eq!(gkd.model_type(), Some(1));
        assert_eq!(gkd.raster_type(), Some(1));
        assert_eq!(gkd.citation(), Some("WGS 84 / UTM zone 12N"));
        assert_eq!(gkd.projected_type(), Some(32612));
        assert_eq!(gkd.geographic_type(), None);
        assert_eq!(gkd.epsg_code(), Some(32612));
    }

    #[test]
    #[rustfmt::skip]
    fn test_doubles_and_unknown_keys() {
        let directory = [
            1, 1, 0, 4,
            2048, 0, 1, 4326,
            2057, 34736, 1, 1,
            5000, 34736, 2, 0,
            5001, 34735, 2, 1,
        ];
        let doubles = [1.5, 6378137.0];
        let gkd = GeoKeyDirectory::from_tags(&directory, Some(&doubles), None).unwrap();
        assert_eq!(gkd.epsg_code(), Some(4326));
        assert_eq!(gkd.geog_semi_major_axis(), Some(6378137.0));
        assert_eq!(gkd.get(5000u16), Some(&GeoKeyValue::DoubleList(vec![1.5, 6378137.0])));
        assert_eq!(gkd.get(5001u16), Some(&GeoKeyValue::ShortList(vec![1, 0])));
        assert_eq!(gkd.keys().len(), 4);
    }

    #[test]
    #[rustfmt::skip]
    fn test_out_of_range() {
        let cases: [(&[u16], Option<&[f64]>, Option<&str>); 5] = [
            // header only, but declares one key
            (&[1, 1, 0, 1], None, None),
            // ascii substring past the end
            (&[1, 1, 0, 1, 1026, 34737, 10, 0], None, Some("short|")),
            // double index past the end
            (&[1, 1, 0, 1, 2057, 34736, 1, 3], Some(&[1.0]), None),
            // double params missing altogether
            (&[1, 1, 0, 1, 2057, 34736, 1, 0], None, None),
            // location that is none of the three GeoTIFF tags
            (&[1, 1, 0, 1, 2057, 256, 1, 0], None, None),
        ];
        for (directory, doubles, ascii) in cases {
            let err = GeoKeyDirectory::from_tags(directory, doubles, ascii).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::GeoKeyDecode, "{directory:?}");
        }
        assert!(GeoKeyDirectory::from_tags(&[1, 1], None, None).is_err());
    }
}
