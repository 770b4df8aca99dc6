//! Per-worker luminance statistics and the MaxCLL / MaxFALL reduction.
//!
//! Every pixel contributes its maximum clamped BT.2100-linear channel
//! (`max_comp`, 1.0 = 10000 cd/m2). Workers keep a private histogram of
//! `max_comp` in whole nits plus a running sum; the driver merges them
//! after the join.

use tracing::debug;

use crate::config::{MaxCllMode, PQ_PEAK_NITS};
use crate::error::{ConvertError, ConvertResult};

/// Highest representable light level, reached by `max_comp == 1.0`.
pub const MAX_NITS: u16 = 10_000;

/// Buckets `0..=MAX_NITS`. The table includes the 10000 bucket so a fully
/// saturated pixel is counted at its own level instead of being folded
/// into 9999.
pub const NITS_BUCKETS: usize = MAX_NITS as usize + 1;

/// Integer light level of a clamped linear value.
#[inline(always)]
pub fn nits_of(max_comp: f32) -> u16 {
    (max_comp * PQ_PEAK_NITS).round().clamp(0.0, f32::from(MAX_NITS)) as u16
}

/// Fixed-size frequency table of per-pixel light levels.
#[derive(Clone, PartialEq, Eq)]
pub struct NitsHistogram {
    counts: Box<[u64]>,
}

impl Default for NitsHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl NitsHistogram {
    pub fn new() -> Self {
        Self {
            counts: vec![0; NITS_BUCKETS].into_boxed_slice(),
        }
    }

    #[inline(always)]
    pub fn record(&mut self, nits: u16) {
        self.counts[usize::from(nits.min(MAX_NITS))] += 1;
    }

    pub fn count(&self, nits: u16) -> u64 {
        self.counts.get(usize::from(nits)).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Element-wise addition.
    pub fn merge(&mut self, other: &Self) {
        for (dst, src) in self.counts.iter_mut().zip(other.counts.iter()) {
            *dst += src;
        }
    }

    /// Number of samples in buckets `from..=top`.
    pub fn count_between(&self, from: u16, top: u16) -> u64 {
        if from > top {
            return 0;
        }
        let top = usize::from(top.min(MAX_NITS));
        self.counts[usize::from(from)..=top].iter().sum()
    }

    /// Walk down from `top`, accumulating counts, and return the first level
    /// at which the running total reaches `count_target`. `None` when the
    /// walk exhausts the table first.
    pub fn level_reaching(&self, top: u16, count_target: u64) -> Option<u16> {
        let mut cumulative = 0u64;
        for idx in (0..=top.min(MAX_NITS)).rev() {
            cumulative += self.counts[usize::from(idx)];
            if cumulative >= count_target {
                return Some(idx);
            }
        }
        None
    }
}

impl std::fmt::Debug for NitsHistogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let occupied = self.counts.iter().filter(|c| **c != 0).count();
        f.debug_struct("NitsHistogram")
            .field("total", &self.total())
            .field("occupied_buckets", &occupied)
            .finish()
    }
}

/// Statistics gathered by one worker over its row range.
#[derive(Clone, Debug, Default)]
pub struct ChunkStatistics {
    pub max_comp: f32,
    pub histogram: NitsHistogram,
    /// Sum of `max_comp` over the chunk. Binary64 so millions of pixels
    /// don't lose low-order contributions.
    pub sum_max_comp: f64,
    pub pixels: u64,
}

impl ChunkStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn record(&mut self, max_comp: f32) {
        self.histogram.record(nits_of(max_comp));
        if max_comp > self.max_comp {
            self.max_comp = max_comp;
        }
        self.sum_max_comp += f64::from(max_comp);
        self.pixels += 1;
    }

    pub fn max_nits(&self) -> u16 {
        nits_of(self.max_comp)
    }
}

/// HDR static metadata for the frame, in whole cd/m2.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImageMetadata {
    pub max_cll: u16,
    pub max_fall: u16,
}

/// Merge per-worker statistics into MaxCLL and MaxFALL.
///
/// The result does not depend on how rows were split among workers: the
/// peak is a max, and the histogram and sum merges are plain additions.
pub fn aggregate(
    chunks: &[ChunkStatistics],
    pixel_count: u64,
    mode: MaxCllMode,
) -> ConvertResult<ImageMetadata> {
    if pixel_count == 0 {
        return Err(ConvertError::InconsistentStatistics(
            "no pixels were converted".into(),
        ));
    }

    let true_max = chunks.iter().map(ChunkStatistics::max_nits).max().unwrap_or(0);
    let sum: f64 = chunks.iter().map(|c| c.sum_max_comp).sum();
    let max_fall = (f64::from(PQ_PEAK_NITS) * (sum / pixel_count as f64))
        .round()
        .clamp(0.0, f64::from(MAX_NITS)) as u16;

    let max_cll = match mode {
        MaxCllMode::TruePeak => true_max,
        MaxCllMode::Percentile(percentile) => {
            let mut merged = NitsHistogram::new();
            for chunk in chunks {
                merged.merge(&chunk.histogram);
            }
            let count_target = percentile_count_target(percentile, pixel_count);
            let level = merged.level_reaching(true_max, count_target).ok_or_else(|| {
                ConvertError::InconsistentStatistics(format!(
                    "histogram holds {} samples at or below {true_max} nits, \
                     {count_target} needed for the {percentile} percentile",
                    merged.count_between(0, true_max)
                ))
            })?;
            debug!(
                "percentile MaxCLL walk: top {true_max}, target {count_target}, stopped at {level}"
            );
            level
        }
    };

    Ok(ImageMetadata { max_cll, max_fall })
}

/// Number of pixels allowed above the reported MaxCLL.
pub fn percentile_count_target(percentile: f64, pixel_count: u64) -> u64 {
    ((1.0 - percentile) * pixel_count as f64).round() as u64
}
