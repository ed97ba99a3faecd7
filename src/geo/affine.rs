use crate::ImageFileDirectory;

/// Affine transformation values.
///
/// Maps pixel `(col, row)` to model coordinates as
/// `x = a * col + b * row + c` and `y = d * col + e * row + f`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform(f64, f64, f64, f64, f64, f64);

impl AffineTransform {
    /// Construct a new transform from its six coefficients.
    pub fn new(a: f64, b: f64, xoff: f64, d: f64, e: f64, yoff: f64) -> Self {
        Self(a, b, xoff, d, e, yoff)
    }

    /// Pixel width.
    pub fn a(&self) -> f64 {
        self.0
    }

    /// Row rotation.
    pub fn b(&self) -> f64 {
        self.1
    }

    /// X offset of the upper left corner.
    pub fn c(&self) -> f64 {
        self.2
    }

    /// Column rotation.
    pub fn d(&self) -> f64 {
        self.3
    }

    /// Pixel height, negative for north-up images.
    pub fn e(&self) -> f64 {
        self.4
    }

    /// Y offset of the upper left corner.
    pub fn f(&self) -> f64 {
        self.5
    }

    /// Apply the transform to a pixel coordinate.
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.0 * col + self.1 * row + self.2,
            self.3 * col + self.4 * row + self.5,
        )
    }

    /// Construct a new Affine Transform from the IFD
    ///
    /// Uses `ModelTransformationTag` when present, otherwise `ModelPixelScaleTag` together with
    /// the first `ModelTiepointTag`. Returns `None` if neither is available or a tag is too short.
    pub fn from_ifd(ifd: &ImageFileDirectory) -> Option<Self> {
        if let Some(matrix) = ifd.model_transformation() {
            let m = matrix.get(..8)?;
            return Some(Self::new(m[0], m[1], m[3], m[4], m[5], m[7]));
        }

        let scale = ifd.model_pixel_scale()?;
        let tiepoint = ifd.model_tiepoint()?;
        let (scale_x, scale_y) = (*scale.first()?, *scale.get(1)?);
        let (i, j, x, y) = (
            *tiepoint.first()?,
            *tiepoint.get(1)?,
            *tiepoint.get(3)?,
            *tiepoint.get(4)?,
        );
        Some(Self::new(
            scale_x,
            0.0,
            x - i * scale_x,
            0.0,
            -scale_y,
            y + j * scale_y,
        ))
    }
}
