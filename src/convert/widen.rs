use crate::frame::PixelFormat;
use half::f16;

/// Widen one interleaved little-endian RGBA pixel to an `f32` RGB triple.
/// Alpha is ignored.
#[inline(always)]
pub(crate) fn load_rgb(format: PixelFormat, px: &[u8]) -> [f32; 3] {
    match format {
        PixelFormat::Float32x4 => [f32_at(px, 0), f32_at(px, 4), f32_at(px, 8)],
        PixelFormat::Half16x4 => {
            let packed = u64::from_le_bytes([
                px[0], px[1], px[2], px[3], px[4], px[5], px[6], px[7],
            ]);
            [
                f16::from_bits((packed & 0xFFFF) as u16).to_f32(),
                f16::from_bits(((packed >> 16) & 0xFFFF) as u16).to_f32(),
                f16::from_bits(((packed >> 32) & 0xFFFF) as u16).to_f32(),
            ]
        }
    }
}

#[inline(always)]
fn f32_at(px: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([
        px[offset],
        px[offset + 1],
        px[offset + 2],
        px[offset + 3],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_pixels_widen_exactly() {
        let mut px = Vec::new();
        for v in [1.0f32, 0.5, 65504.0, 1.0] {
            px.extend_from_slice(&f16::from_f32(v).to_bits().to_le_bytes());
        }
        assert_eq!(load_rgb(PixelFormat::Half16x4, &px), [1.0, 0.5, 65504.0]);
    }

    #[test]
    fn float_pixels_ignore_alpha() {
        let mut px = Vec::new();
        for v in [-0.25f32, 2.0, 0.125, 7.0] {
            px.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(load_rgb(PixelFormat::Float32x4, &px), [-0.25, 2.0, 0.125]);
    }
}
