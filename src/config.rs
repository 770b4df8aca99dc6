use crate::error::{ConvertError, ConvertResult};

/// Bit depth of the quantized PQ signal.
pub const TARGET_BITS: u8 = 10;

/// Bit depth of the PNG samples the signal is expanded into.
pub const CONTAINER_BITS: u8 = 16;

/// Fraction of pixels that must lie at or below the reported MaxCLL in
/// percentile mode.
pub const MAXCLL_PERCENTILE: f64 = 0.9999;

/// Upper bound on conversion workers regardless of available cores.
pub const DEFAULT_MAX_WORKERS: usize = 8;

pub const DEFAULT_OUTPUT_PATH: &str = "output.png";

/// Luminance represented by a linear BT.2100 value of 1.0.
pub const PQ_PEAK_NITS: f32 = 10_000.0;

/// How MaxCLL is derived from the per-pixel maximum channel values.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MaxCllMode {
    /// Brightest pixel in the frame.
    TruePeak,
    /// Lowest level that at least `1 - p` of the pixels reach, walking down
    /// from the true peak. Discounts isolated specular highlights.
    Percentile(f64),
}

impl Default for MaxCllMode {
    fn default() -> Self {
        if cfg!(feature = "true-peak-maxcll") {
            Self::TruePeak
        } else {
            Self::Percentile(MAXCLL_PERCENTILE)
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConvertConfig {
    pub target_bits: u8,
    pub container_bits: u8,
    pub max_cll_mode: MaxCllMode,
    /// Cap on the number of row chunks (and pool threads). The effective
    /// count is also limited by available parallelism and image height.
    pub max_workers: usize,
    /// Luminance of a linear source value of 1.0. The default maps 1.0 to
    /// the PQ peak; scRGB content mastered to the 80 nit convention uses 80.
    pub reference_white_nits: f32,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            target_bits: TARGET_BITS,
            container_bits: CONTAINER_BITS,
            max_cll_mode: MaxCllMode::default(),
            max_workers: crate::env_config::max_workers_override().unwrap_or(DEFAULT_MAX_WORKERS),
            reference_white_nits: PQ_PEAK_NITS,
        }
    }
}

impl ConvertConfig {
    pub fn with_target_bits(mut self, bits: u8) -> Self {
        self.target_bits = bits;
        self
    }

    pub fn with_max_cll_mode(mut self, mode: MaxCllMode) -> Self {
        self.max_cll_mode = mode;
        self
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    pub fn with_reference_white_nits(mut self, nits: f32) -> Self {
        self.reference_white_nits = nits;
        self
    }

    /// Scale applied to linear source values so that 1.0 after scaling is
    /// the PQ peak.
    pub fn linear_scale(&self) -> f32 {
        self.reference_white_nits / PQ_PEAK_NITS
    }

    pub fn validate(&self) -> ConvertResult<()> {
        if self.container_bits != CONTAINER_BITS {
            return Err(ConvertError::InvalidConfig(format!(
                "container bit depth must be {CONTAINER_BITS}, got {}",
                self.container_bits
            )));
        }
        if self.target_bits == 0 || self.target_bits > self.container_bits {
            return Err(ConvertError::InvalidConfig(format!(
                "target bit depth must be in 1..={}, got {}",
                self.container_bits, self.target_bits
            )));
        }
        if let MaxCllMode::Percentile(p) = self.max_cll_mode {
            if !(p > 0.0 && p <= 1.0) {
                return Err(ConvertError::InvalidConfig(format!(
                    "MaxCLL percentile must be in (0, 1], got {p}"
                )));
            }
        }
        if self.max_workers == 0 {
            return Err(ConvertError::InvalidConfig(
                "worker cap must be at least 1".into(),
            ));
        }
        if !(self.reference_white_nits.is_finite() && self.reference_white_nits > 0.0) {
            return Err(ConvertError::InvalidConfig(format!(
                "reference white must be a positive luminance, got {}",
                self.reference_white_nits
            )));
        }
        Ok(())
    }
}
