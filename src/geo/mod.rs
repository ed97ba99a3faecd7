//! Support for GeoTIFF files.

mod affine;
mod geo_key_directory;

pub use affine::AffineTransform;
pub use geo_key_directory::{GeoKeyDirectory, GeoKeyTag, GeoKeyValue};
