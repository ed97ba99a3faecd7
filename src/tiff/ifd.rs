use super::error::{TiffError, TiffFormatError, TiffResult};

use self::Value::{
    Ascii, Byte, Double, Float, Ifd, IfdBig, List, Rational as RationalValue, Short, Unsigned,
    UnsignedBig,
};

/// A decoded TIFF tag value.
///
/// A tag with a single value decodes to the scalar variant for its type; a tag with any other
/// count decodes to a [`Value::List`] of scalars.
#[allow(unused_qualifications)]
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Value {
    /// `BYTE` or `UNDEFINED`.
    Byte(u8),
    /// `SHORT`.
    Short(u16),
    /// `SBYTE`.
    SignedByte(i8),
    /// `SSHORT`.
    SignedShort(i16),
    /// `SLONG`.
    Signed(i32),
    /// `SLONG8`, BigTIFF only.
    SignedBig(i64),
    /// `LONG`.
    Unsigned(u32),
    /// `LONG8`, BigTIFF only.
    UnsignedBig(u64),
    /// `FLOAT`.
    Float(f32),
    /// `DOUBLE`.
    Double(f64),
    /// Any tag with a count other than one.
    List(Vec<Value>),
    /// `RATIONAL` as numerator and denominator.
    Rational(u32, u32),
    /// `SRATIONAL` as numerator and denominator.
    SRational(i32, i32),
    /// `ASCII`, without the trailing NUL.
    Ascii(String),
    /// `IFD`, an offset to a child directory.
    Ifd(u32),
    /// `IFD8`, a BigTIFF offset to a child directory.
    IfdBig(u64),
    /// A value of a field type this crate does not know.
    ///
    /// The width of unknown types cannot be derived, so only the raw value-or-offset field of the
    /// directory entry is kept.
    Opaque {
        /// The on-disk field type.
        type_code: u16,
        /// The declared number of values.
        count: u64,
        /// The raw bytes of the value-or-offset field, in file byte order.
        raw: Vec<u8>,
    },
}

/// An unsigned fraction, as stored by `RATIONAL` tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    /// The numerator.
    pub numerator: u32,
    /// The denominator.
    pub denominator: u32,
}

impl Rational {
    /// Divide out the fraction.
    ///
    /// A zero denominator yields an infinite or NaN result rather than an error.
    pub fn to_f64(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }
}

impl Value {
    /// Convert a `BYTE` value.
    pub fn into_u8(self) -> TiffResult<u8> {
        match self {
            Byte(val) => Ok(val),
            val => Err(TiffError::FormatError(TiffFormatError::ByteExpected(val))),
        }
    }

    /// Convert a `BYTE` or `SHORT` value.
    pub fn into_u16(self) -> TiffResult<u16> {
        match self {
            Byte(val) => Ok(val.into()),
            Short(val) => Ok(val),
            Unsigned(val) => Ok(u16::try_from(val)?),
            UnsignedBig(val) => Ok(u16::try_from(val)?),
            val => Err(TiffError::FormatError(
                TiffFormatError::UnsignedIntegerExpected(val),
            )),
        }
    }

    /// Convert any unsigned value that fits in 32 bits.
    pub fn into_u32(self) -> TiffResult<u32> {
        match self {
            Byte(val) => Ok(val.into()),
            Short(val) => Ok(val.into()),
            Unsigned(val) => Ok(val),
            UnsignedBig(val) => Ok(u32::try_from(val)?),
            Ifd(val) => Ok(val),
            IfdBig(val) => Ok(u32::try_from(val)?),
            val => Err(TiffError::FormatError(
                TiffFormatError::UnsignedIntegerExpected(val),
            )),
        }
    }

    /// Convert any unsigned integer or offset value.
    pub fn into_u64(self) -> TiffResult<u64> {
        match self {
            Byte(val) => Ok(val.into()),
            Short(val) => Ok(val.into()),
            Unsigned(val) => Ok(val.into()),
            UnsignedBig(val) => Ok(val),
            Ifd(val) => Ok(val.into()),
            IfdBig(val) => Ok(val),
            val => Err(TiffError::FormatError(
                TiffFormatError::UnsignedIntegerExpected(val),
            )),
        }
    }

    /// Convert a `FLOAT` or `DOUBLE` value.
    pub fn into_f64(self) -> TiffResult<f64> {
        match self {
            Float(val) => Ok(val.into()),
            Double(val) => Ok(val),
            val => Err(TiffError::FormatError(TiffFormatError::FloatExpected(val))),
        }
    }

    /// Convert a `RATIONAL` value.
    pub fn into_rational(self) -> TiffResult<Rational> {
        match self {
            RationalValue(numerator, denominator) => Ok(Rational {
                numerator,
                denominator,
            }),
            val => Err(TiffError::FormatError(TiffFormatError::RationalExpected(
                val,
            ))),
        }
    }

    /// Convert an `ASCII` value.
    pub fn into_string(self) -> TiffResult<String> {
        match self {
            Ascii(val) => Ok(val),
            val => Err(TiffError::FormatError(TiffFormatError::AsciiExpected(val))),
        }
    }

    /// Convert a list of bytes, or a single byte.
    pub fn into_u8_vec(self) -> TiffResult<Vec<u8>> {
        match self {
            List(vec) => vec.into_iter().map(Value::into_u8).collect(),
            Byte(val) => Ok(vec![val]),
            val => Err(TiffError::FormatError(TiffFormatError::ByteExpected(val))),
        }
    }

    /// Convert a list of unsigned 16-bit values, or a single one.
    pub fn into_u16_vec(self) -> TiffResult<Vec<u16>> {
        match self {
            List(vec) => vec.into_iter().map(Value::into_u16).collect(),
            val => Ok(vec![val.into_u16()?]),
        }
    }

    /// Convert a list of unsigned integers, as used by offset and byte count tags.
    pub fn into_u64_vec(self) -> TiffResult<Vec<u64>> {
        match self {
            List(vec) => vec.into_iter().map(Value::into_u64).collect(),
            val => Ok(vec![val.into_u64()?]),
        }
    }

    /// Convert a list of floating point values, or a single one.
    pub fn into_f64_vec(self) -> TiffResult<Vec<f64>> {
        match self {
            List(vec) => vec.into_iter().map(Value::into_f64).collect(),
            val => Ok(vec![val.into_f64()?]),
        }
    }
}
