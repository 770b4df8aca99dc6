//! Boundary to the external image decoder.
//!
//! The conversion core only sees a [`FrameBuffer`]. A [`PixelSource`]
//! reports dimensions and pixel format, then copies its decoded pixels into
//! a buffer owned by [`acquire_frame`]; the source itself is dropped before
//! `acquire_frame` returns, on success and on every error path.

use std::path::{Path, PathBuf};

use anyhow::Context;
use exr::meta::attribute::SampleType;
use exr::prelude::{RgbaChannels, Vec2, read_first_rgba_layer_from_file};
use half::f16;
use tracing::debug;

use crate::error::{ConvertError, ConvertResult};
use crate::frame::{FrameBuffer, PixelFormat, try_reserve};

/// A decoded image that can hand over linear scRGB RGBA pixels.
pub trait PixelSource {
    /// Width and height in pixels.
    fn dimensions(&self) -> (u32, u32);

    /// Layout of the pixels `copy_pixels` will produce. Sources whose
    /// native layout is not one of the supported formats return
    /// `UnsupportedInputFormat`.
    fn pixel_format(&self) -> ConvertResult<PixelFormat>;

    /// Fill `dst` (exactly `width * height * pixel_bytes` long) with
    /// row-major, interleaved, little-endian RGBA.
    fn copy_pixels(&mut self, dst: &mut [u8]) -> anyhow::Result<()>;
}

/// Take ownership of a source's pixels and release the source.
pub fn acquire_frame<S: PixelSource>(mut source: S) -> ConvertResult<FrameBuffer> {
    let (width, height) = source.dimensions();
    if width == 0 || height == 0 {
        return Err(ConvertError::InvalidFrame(format!(
            "source reported empty dimensions {width}x{height}"
        )));
    }
    let format = source.pixel_format()?;
    let len = (width as usize)
        .checked_mul(height as usize)
        .and_then(|px| px.checked_mul(format.pixel_bytes()))
        .ok_or_else(|| {
            ConvertError::ResourceExhaustion(format!(
                "source buffer for {width}x{height} frame (size overflow)"
            ))
        })?;

    let mut data = Vec::new();
    try_reserve(&mut data, len, "source pixel buffer")?;
    data.resize(len, 0);
    source
        .copy_pixels(&mut data)
        .map_err(ConvertError::source_read)?;
    drop(source);

    debug!(width, height, ?format, "acquired source frame");
    FrameBuffer::from_raw(width, height, format, data)
}

/// First RGB(A) layer of an OpenEXR file.
///
/// Layers whose R, G and B channels are all half floats are delivered as
/// `Half16x4`; any mix involving 32-bit floats as `Float32x4`. Missing alpha
/// reads as 1.
#[derive(Debug)]
pub struct ExrSource {
    path: PathBuf,
    width: u32,
    height: u32,
    format: Option<PixelFormat>,
    sample_types: Vec<SampleType>,
}

impl ExrSource {
    /// Read the header of `path`. Pixels are decoded by `copy_pixels`.
    pub fn open(path: impl AsRef<Path>) -> ConvertResult<Self> {
        let path = path.as_ref();
        let meta = exr::meta::MetaData::read_from_file(path, false)
            .with_context(|| format!("failed to read OpenEXR header of {}", path.display()))
            .map_err(ConvertError::source_read)?;

        let header = meta
            .headers
            .iter()
            .find(|header| {
                ["R", "G", "B"].iter().all(|name| {
                    header
                        .channels
                        .list
                        .iter()
                        .any(|channel| channel.name.to_string() == *name)
                })
            })
            .ok_or_else(|| {
                ConvertError::UnsupportedInputFormat(format!(
                    "{} has no layer with R, G and B channels",
                    path.display()
                ))
            })?;

        let sample_types: Vec<SampleType> = header
            .channels
            .list
            .iter()
            .filter(|channel| {
                let name = channel.name.to_string();
                name == "R" || name == "G" || name == "B"
            })
            .map(|channel| channel.sample_type)
            .collect();

        let size = header.layer_size;
        let width = u32::try_from(size.width())
            .map_err(|_| ConvertError::InvalidFrame(format!("width {} too large", size.width())))?;
        let height = u32::try_from(size.height()).map_err(|_| {
            ConvertError::InvalidFrame(format!("height {} too large", size.height()))
        })?;

        Ok(Self {
            path: path.to_owned(),
            width,
            height,
            format: format_for(&sample_types),
            sample_types,
        })
    }
}

fn format_for(sample_types: &[SampleType]) -> Option<PixelFormat> {
    if sample_types.iter().any(|t| *t == SampleType::U32) {
        None
    } else if sample_types.iter().all(|t| *t == SampleType::F16) {
        Some(PixelFormat::Half16x4)
    } else {
        Some(PixelFormat::Float32x4)
    }
}

impl PixelSource for ExrSource {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn pixel_format(&self) -> ConvertResult<PixelFormat> {
        self.format.ok_or_else(|| {
            ConvertError::UnsupportedInputFormat(format!(
                "OpenEXR RGB sample types {:?} in {}",
                self.sample_types,
                self.path.display()
            ))
        })
    }

    fn copy_pixels(&mut self, dst: &mut [u8]) -> anyhow::Result<()> {
        let format = self
            .format
            .ok_or_else(|| anyhow::anyhow!("unsupported OpenEXR sample types"))?;
        let decoded = match format {
            PixelFormat::Half16x4 => read_half_rgba(&self.path)?,
            PixelFormat::Float32x4 => read_float_rgba(&self.path)?,
        };
        anyhow::ensure!(
            decoded.len() == dst.len(),
            "decoded {} bytes from {}, expected {}",
            decoded.len(),
            self.path.display(),
            dst.len()
        );
        dst.copy_from_slice(&decoded);
        Ok(())
    }
}

/// Interleaved little-endian RGBA bytes of a fixed width.
struct RgbaBytes {
    width: usize,
    bytes: Vec<u8>,
}

impl RgbaBytes {
    fn new(resolution: Vec2<usize>, pixel_bytes: usize) -> Self {
        Self {
            width: resolution.width(),
            bytes: vec![0; resolution.width() * resolution.height() * pixel_bytes],
        }
    }
}

fn read_half_rgba(path: &Path) -> anyhow::Result<Vec<u8>> {
    let image = read_first_rgba_layer_from_file(
        path,
        |resolution: Vec2<usize>, _: &RgbaChannels| RgbaBytes::new(resolution, 8),
        |pixels: &mut RgbaBytes, position: Vec2<usize>, (r, g, b, a): (f16, f16, f16, f16)| {
            let offset = (position.y() * pixels.width + position.x()) * 8;
            for (i, sample) in [r, g, b, a].into_iter().enumerate() {
                pixels.bytes[offset + i * 2..offset + i * 2 + 2]
                    .copy_from_slice(&sample.to_bits().to_le_bytes());
            }
        },
    )
    .with_context(|| format!("failed to decode OpenEXR pixels from {}", path.display()))?;
    Ok(image.layer_data.channel_data.pixels.bytes)
}

fn read_float_rgba(path: &Path) -> anyhow::Result<Vec<u8>> {
    let image = read_first_rgba_layer_from_file(
        path,
        |resolution: Vec2<usize>, _: &RgbaChannels| RgbaBytes::new(resolution, 16),
        |pixels: &mut RgbaBytes, position: Vec2<usize>, (r, g, b, a): (f32, f32, f32, f32)| {
            let offset = (position.y() * pixels.width + position.x()) * 16;
            for (i, sample) in [r, g, b, a].into_iter().enumerate() {
                pixels.bytes[offset + i * 4..offset + i * 4 + 4]
                    .copy_from_slice(&sample.to_le_bytes());
            }
        },
    )
    .with_context(|| format!("failed to decode OpenEXR pixels from {}", path.display()))?;
    Ok(image.layer_data.channel_data.pixels.bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// In-memory source that records when it is released.
    struct MemorySource {
        width: u32,
        height: u32,
        format: ConvertResult<PixelFormat>,
        fail_copy: bool,
        released: Arc<AtomicBool>,
    }

    impl MemorySource {
        fn new(width: u32, height: u32, format: ConvertResult<PixelFormat>) -> Self {
            Self {
                width,
                height,
                format,
                fail_copy: false,
                released: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl Drop for MemorySource {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    impl PixelSource for MemorySource {
        fn dimensions(&self) -> (u32, u32) {
            (self.width, self.height)
        }

        fn pixel_format(&self) -> ConvertResult<PixelFormat> {
            match &self.format {
                Ok(format) => Ok(*format),
                Err(_) => Err(ConvertError::UnsupportedInputFormat("Gray8".into())),
            }
        }

        fn copy_pixels(&mut self, dst: &mut [u8]) -> anyhow::Result<()> {
            anyhow::ensure!(!self.fail_copy, "device lost during copy");
            for chunk in dst.chunks_exact_mut(4) {
                chunk.copy_from_slice(&0.5f32.to_le_bytes());
            }
            Ok(())
        }
    }

    #[test]
    fn acquires_and_releases() {
        let source = MemorySource::new(3, 2, Ok(PixelFormat::Float32x4));
        let released = Arc::clone(&source.released);
        let frame = acquire_frame(source).unwrap();
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(frame.as_bytes().len(), 3 * 2 * 16);
        assert_eq!(&frame.as_bytes()[..4], &0.5f32.to_le_bytes());
    }

    #[test]
    fn releases_on_copy_failure() {
        let mut source = MemorySource::new(2, 2, Ok(PixelFormat::Half16x4));
        source.fail_copy = true;
        let released = Arc::clone(&source.released);
        let err = acquire_frame(source).unwrap_err();
        assert!(matches!(err, ConvertError::SourceRead(_)));
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn unsupported_format_is_fatal() {
        let unsupported = Err(ConvertError::UnsupportedInputFormat(String::new()));
        let source = MemorySource::new(2, 2, unsupported);
        let released = Arc::clone(&source.released);
        let err = acquire_frame(source).unwrap_err();
        assert!(matches!(err, ConvertError::UnsupportedInputFormat(_)));
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn empty_dimensions_are_rejected() {
        let source = MemorySource::new(0, 5, Ok(PixelFormat::Float32x4));
        assert!(matches!(
            acquire_frame(source),
            Err(ConvertError::InvalidFrame(_))
        ));
    }

    #[test]
    fn exr_sample_types_pick_format() {
        assert_eq!(
            format_for(&[SampleType::F16, SampleType::F16, SampleType::F16]),
            Some(PixelFormat::Half16x4)
        );
        assert_eq!(
            format_for(&[SampleType::F16, SampleType::F32, SampleType::F16]),
            Some(PixelFormat::Float32x4)
        );
        assert_eq!(
            format_for(&[SampleType::U32, SampleType::F32, SampleType::F32]),
            None
        );
    }
}
