/// Rounds PQ code values onto a `target`-bit grid and expands the level onto
/// the wider `container`-bit grid, so stored samples are exact images of
/// one of `2^target` levels.
///
/// Both roundings are half-away-from-zero. The expansion runs in integers:
/// `level * container_max / target_max` can land within 0.0005 of a .5
/// boundary, closer than `f32` resolves at 16 bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Requantizer {
    target_max: u32,
    container_max: u32,
}

impl Requantizer {
    pub fn new(target_bits: u8, container_bits: u8) -> Self {
        debug_assert!(target_bits >= 1 && target_bits <= container_bits && container_bits <= 16);
        Self {
            target_max: (1u32 << target_bits) - 1,
            container_max: (1u32 << container_bits) - 1,
        }
    }

    /// Level on the target grid, `0..=2^target - 1`.
    #[inline(always)]
    pub fn level(&self, code: f32) -> u32 {
        (code.clamp(0.0, 1.0) * self.target_max as f32).round() as u32
    }

    /// Container sample for a target level, rounded half away from zero.
    #[inline(always)]
    pub fn expand(&self, level: u32) -> u16 {
        let level = u64::from(level.min(self.target_max));
        let target_max = u64::from(self.target_max);
        let container_max = u64::from(self.container_max);
        ((level * container_max * 2 + target_max) / (2 * target_max)) as u16
    }

    #[inline(always)]
    pub fn quantize(&self, code: f32) -> u16 {
        self.expand(self.level(code))
    }

    /// Map a stored sample back to a code value in `[0, 1]`.
    #[inline(always)]
    pub fn code_of(&self, stored: u16) -> f32 {
        f32::from(stored) / self.container_max as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// round(level / 1023 * 65535) evaluated exactly.
    fn exact_10_in_16(level: u64) -> u16 {
        let num = level * 65_535;
        let (q, r) = (num / 1023, num % 1023);
        (if 2 * r >= 1023 { q + 1 } else { q }) as u16
    }

    #[test]
    fn endpoints_map_to_grid_ends() {
        let q = Requantizer::new(10, 16);
        assert_eq!(q.quantize(0.0), 0);
        assert_eq!(q.quantize(1.0), 65_535);
    }

    #[test]
    fn every_level_expands_exactly() {
        let q = Requantizer::new(10, 16);
        for level in 0..=1023u32 {
            let code = level as f32 / 1023.0;
            assert_eq!(q.level(code), level, "level {level}");
            assert_eq!(q.quantize(code), exact_10_in_16(u64::from(level)), "level {level}");
        }
    }

    #[test]
    fn level_820_sits_just_below_half() {
        // 820 * 65535 / 1023 = 52530.4985...
        let q = Requantizer::new(10, 16);
        assert_eq!(q.expand(820), 52_530);
        assert_eq!(q.quantize(820.0 / 1023.0), 52_530);
    }

    #[test]
    fn idempotent_at_same_target_depth() {
        let q = Requantizer::new(10, 16);
        for i in 0..=2000 {
            let once = q.quantize(i as f32 / 2000.0);
            let twice = q.quantize(q.code_of(once));
            assert_eq!(once, twice, "input {i}");
        }
    }

    #[test]
    fn rounds_half_away_from_zero() {
        let q = Requantizer::new(2, 16);
        // 0.5 * 3 = 1.5 rounds up to level 2, not to the even level.
        assert_eq!(q.level(0.5), 2);
        assert_eq!(q.quantize(0.5), 43_690);
    }

    #[test]
    fn equal_depths_are_identity_on_grid() {
        let q = Requantizer::new(16, 16);
        for stored in [0u16, 1, 512, 40_000, 65_535] {
            assert_eq!(q.quantize(q.code_of(stored)), stored);
        }
    }
}
