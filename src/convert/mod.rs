mod color;
mod parallel;
mod pq;
mod requant;
mod widen;

pub use color::ColorTransform;
pub use pq::{PQ_C1, PQ_C2, PQ_C3, PQ_M1, PQ_M2, linear_to_st2084};
pub use requant::Requantizer;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::ConvertConfig;
use crate::error::{ConvertError, ConvertResult};
use crate::frame::{FrameBuffer, OutputPlane, PixelFormat};
use crate::stats::{self, ChunkStatistics, ImageMetadata};

/// Pre-initialize the conversion pool so the first frame doesn't pay the
/// thread start-up cost. Safe to call multiple times.
pub fn warmup(max_workers: usize) -> ConvertResult<()> {
    parallel::warmup_pool(max_workers)
}

/// The fused per-pixel transform: scRGB-linear -> clamped BT.2100-linear
/// -> PQ -> requantized samples.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PixelPipeline {
    color: ColorTransform,
    requant: Requantizer,
}

impl PixelPipeline {
    pub fn new(config: &ConvertConfig) -> Self {
        Self {
            color: ColorTransform::with_scale(config.linear_scale()),
            requant: Requantizer::new(config.target_bits, config.container_bits),
        }
    }

    /// Quantize a clamped BT.2100-linear triple.
    #[inline(always)]
    pub fn encode_linear(&self, linear: [f32; 3]) -> [u16; 3] {
        linear.map(|c| self.requant.quantize(linear_to_st2084(c)))
    }

    /// Convert one scRGB pixel, returning the stored samples and the
    /// maximum clamped linear channel.
    #[inline(always)]
    pub fn convert_pixel(&self, rgb: [f32; 3]) -> ([u16; 3], f32) {
        let linear = self.color.apply(rgb);
        let max_comp = linear[0].max(linear[1]).max(linear[2]);
        (self.encode_linear(linear), max_comp)
    }

    fn convert_rows(
        &self,
        format: PixelFormat,
        src: &[u8],
        dst: &mut [u16],
        chunk: &mut ChunkStatistics,
    ) {
        for (px, out) in src
            .chunks_exact(format.pixel_bytes())
            .zip(dst.chunks_exact_mut(3))
        {
            let (samples, max_comp) = self.convert_pixel(widen::load_rgb(format, px));
            chunk.record(max_comp);
            out.copy_from_slice(&samples);
        }
    }
}

/// Requantized plane plus the metadata gathered while producing it.
#[derive(Debug)]
pub struct ConvertedImage {
    pub plane: OutputPlane,
    pub metadata: ImageMetadata,
    /// Number of row chunks the frame was split into.
    pub workers: usize,
}

/// Convert `frame` using as many workers as the hardware and
/// `config.max_workers` allow.
pub fn convert_frame(frame: &FrameBuffer, config: &ConvertConfig) -> ConvertResult<ConvertedImage> {
    let workers = parallel::conversion_workers(config.max_workers);
    convert_frame_with_workers(frame, config, workers)
}

/// Convert `frame` split into exactly `workers` row chunks (fewer when the
/// frame has fewer rows). The result does not depend on the chunk count.
pub fn convert_frame_with_workers(
    frame: &FrameBuffer,
    config: &ConvertConfig,
    workers: usize,
) -> ConvertResult<ConvertedImage> {
    config.validate()?;

    let ranges = parallel::row_ranges(frame.height() as usize, workers);
    info!("Using {} workers", ranges.len());
    debug!(?ranges, "row partition");

    let mut plane = OutputPlane::allocate(frame.width(), frame.height())?;
    let row_samples = plane.row_samples();
    let pipeline = PixelPipeline::new(config);
    let format = frame.format();

    let mut tasks = Vec::with_capacity(ranges.len());
    let mut rest = plane.samples_mut();
    for range in ranges {
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(range.len() * row_samples);
        tasks.push((range, head));
        rest = tail;
    }

    let chunks: Vec<ChunkStatistics> =
        parallel::install_conversion_pool(config.max_workers, move || {
            tasks
                .into_par_iter()
                .map(|(range, dst)| {
                    let mut chunk = ChunkStatistics::new();
                    let src = frame.rows(range.start, range.end);
                    pipeline.convert_rows(format, src, dst, &mut chunk);
                    chunk
                })
                .collect()
        })?;

    let visited: u64 = chunks.iter().map(|c| c.pixels).sum();
    if visited != frame.pixel_count() {
        return Err(ConvertError::InconsistentStatistics(format!(
            "workers visited {visited} pixels, frame has {}",
            frame.pixel_count()
        )));
    }

    let metadata = stats::aggregate(&chunks, frame.pixel_count(), config.max_cll_mode)?;
    info!(
        "Computed HDR metadata: {} MaxCLL, {} MaxFALL",
        metadata.max_cll, metadata.max_fall
    );

    Ok(ConvertedImage {
        workers: chunks.len(),
        plane,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MaxCllMode;

    fn gradient(width: u32, height: u32) -> Vec<f32> {
        let mut samples = Vec::new();
        for y in 0..height {
            for x in 0..width {
                let t = (x + y * width) as f32 / (width * height) as f32;
                samples.extend_from_slice(&[t * 1.5, t * t, 0.3 - t * 0.2, 1.0]);
            }
        }
        samples
    }

    #[test]
    fn pixel_pipeline_maps_black_to_pq_floor() {
        let pipeline = PixelPipeline::new(&ConvertConfig::default());
        let (samples, max_comp) = pipeline.convert_pixel([0.0, 0.0, 0.0]);
        assert_eq!(max_comp, 0.0);
        // c1^m2 * 1023 rounds to level 0.
        assert_eq!(samples, [0, 0, 0]);
    }

    #[test]
    fn pixel_pipeline_maps_white_to_peak() {
        let pipeline = PixelPipeline::new(&ConvertConfig::default());
        let (samples, max_comp) = pipeline.convert_pixel([1.0, 1.0, 1.0]);
        assert_eq!(max_comp, 1.0);
        assert_eq!(samples, [65_535; 3]);
    }

    #[test]
    fn every_row_is_written_once() {
        let (width, height) = (7, 13);
        let frame = FrameBuffer::from_rgba_f32(width, height, &gradient(width, height)).unwrap();
        let config = ConvertConfig::default();
        let single = convert_frame_with_workers(&frame, &config, 1).unwrap();
        let pipeline = PixelPipeline::new(&config);
        for workers in [2, 3, 5, 13, 40] {
            let split = convert_frame_with_workers(&frame, &config, workers).unwrap();
            assert_eq!(split.plane.samples(), single.plane.samples(), "{workers}");
            assert_eq!(split.metadata, single.metadata, "{workers}");
            assert_eq!(split.workers, workers.min(height as usize));
        }
        let samples = gradient(width, height);
        let last = &samples[samples.len() - 4..];
        let (expected, _) = pipeline.convert_pixel([last[0], last[1], last[2]]);
        assert_eq!(single.plane.pixel(width - 1, height - 1), expected);
    }

    #[test]
    fn half_and_float_sources_agree() {
        let (width, height) = (4, 4);
        let samples = gradient(width, height);
        let halves: Vec<half::f16> = samples.iter().map(|v| half::f16::from_f32(*v)).collect();
        let widened: Vec<f32> = halves.iter().map(|v| v.to_f32()).collect();
        let config = ConvertConfig::default().with_max_cll_mode(MaxCllMode::TruePeak);
        let from_half = convert_frame(
            &FrameBuffer::from_rgba_f16(width, height, &halves).unwrap(),
            &config,
        )
        .unwrap();
        let from_float = convert_frame(
            &FrameBuffer::from_rgba_f32(width, height, &widened).unwrap(),
            &config,
        )
        .unwrap();
        assert_eq!(from_half.plane.samples(), from_float.plane.samples());
        assert_eq!(from_half.metadata, from_float.metadata);
    }

    #[test]
    fn invalid_config_is_rejected_before_work() {
        let frame = FrameBuffer::from_rgba_f32(1, 1, &[0.0; 4]).unwrap();
        let config = ConvertConfig::default().with_target_bits(0);
        assert!(matches!(
            convert_frame(&frame, &config),
            Err(ConvertError::InvalidConfig(_))
        ));
    }
}
