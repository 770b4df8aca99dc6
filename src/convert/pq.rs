//! SMPTE ST 2084 perceptual quantizer.
//!
//! The inverse EOTF maps normalized linear luminance `Y` (1.0 = 10000
//! cd/m2) to the non-linear code value `V`:
//!
//!   V = ((c1 + c2 * Y^m1) / (1 + c3 * Y^m1))^m2
//!
//! with the exact rational constants from the standard. `V(0)` is `c1^m2`
//! (about 7.3e-7), not zero; the curve is not forced through the origin.

pub const PQ_M1: f32 = 1305.0 / 8192.0;
pub const PQ_M2: f32 = 2523.0 / 32.0;
pub const PQ_C1: f32 = 107.0 / 128.0;
pub const PQ_C2: f32 = 2413.0 / 128.0;
pub const PQ_C3: f32 = 2392.0 / 128.0;

/// Encode a clamped linear BT.2100 value into a PQ code value in `[0, 1]`.
#[inline(always)]
pub fn linear_to_st2084(y: f32) -> f32 {
    let p = y.max(0.0).powf(PQ_M1);
    ((PQ_C1 + PQ_C2 * p) / (1.0 + PQ_C3 * p)).powf(PQ_M2)
}

/// Decode a PQ code value back to normalized linear luminance.
#[cfg(test)]
fn st2084_to_linear(v: f32) -> f32 {
    let p = v.max(0.0).powf(1.0 / PQ_M2);
    let numerator = (p - PQ_C1).max(0.0);
    let denominator = PQ_C2 - PQ_C3 * p;
    (numerator / denominator).powf(1.0 / PQ_M1)
}
