//! Low-level TIFF vocabulary: tag and field type codes, decoded tag values and format errors.

mod error;
mod ifd;
pub mod tags;

pub use error::{TiffError, TiffFormatError, TiffResult, TiffUnsupportedError};
pub use ifd::{Rational, Value};
