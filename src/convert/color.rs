/// Linear BT.709 (scRGB) primaries to linear BT.2020 / BT.2100 primaries.
///
/// Rows sum to exactly 1 so achromatic input stays achromatic. The last
/// coefficient of each row is derived from the other two to keep that
/// property exact in binary64.
const BT709_TO_BT2020: [[f64; 3]; 3] = {
    const fn row(a: f64, b: f64) -> [f64; 3] {
        [a, b, 1.0 - a - b]
    }
    [
        row(0.627_403_895_934_699, 0.329_283_038_377_883_7),
        row(0.069_097_289_358_232_08, 0.919_540_395_075_458_7),
        row(0.016_391_438_875_150_28, 0.088_013_307_877_225_75),
    ]
};

/// scRGB-linear to clamped BT.2100-linear conversion.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorTransform {
    /// Applied to the source value before the matrix; 1.0 after scaling is
    /// the PQ peak (10000 cd/m2).
    scale: f64,
}

impl Default for ColorTransform {
    fn default() -> Self {
        Self { scale: 1.0 }
    }
}

impl ColorTransform {
    pub fn with_scale(scale: f32) -> Self {
        Self {
            scale: f64::from(scale),
        }
    }

    /// Convert one pixel. The result is always within `[0, 1]`;
    /// over-range and out-of-gamut values are hard-clipped. NaN clips to 0.
    #[inline(always)]
    pub fn apply(&self, rgb: [f32; 3]) -> [f32; 3] {
        let r = f64::from(rgb[0]) * self.scale;
        let g = f64::from(rgb[1]) * self.scale;
        let b = f64::from(rgb[2]) * self.scale;
        let m = &BT709_TO_BT2020;
        [
            saturate(m[0][0] * r + m[0][1] * g + m[0][2] * b),
            saturate(m[1][0] * r + m[1][1] * g + m[1][2] * b),
            saturate(m[2][0] * r + m[2][1] * g + m[2][2] * b),
        ]
    }
}

#[inline(always)]
fn saturate(v: f64) -> f32 {
    // `f64::clamp` propagates NaN, `max` does not.
    (v.max(0.0).min(1.0)) as f32
}
