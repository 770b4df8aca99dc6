pub mod config;
pub mod container;
pub mod convert;
pub(crate) mod env_config;
pub mod error;
pub mod frame;
pub mod icc;
pub mod source;
pub mod stats;

use std::path::Path;

use tracing::info;

use config::ConvertConfig;
use error::ConvertResult;

pub use config::MaxCllMode;
pub use container::{HdrChunks, PngEmitter};
pub use convert::{ConvertedImage, PixelPipeline, convert_frame};
pub use error::{ConvertError, ConvertPhase};
pub use frame::{FrameBuffer, OutputPlane, PixelFormat};
pub use icc::IccProfile;
pub use source::{ExrSource, PixelSource, acquire_frame};
pub use stats::ImageMetadata;

/// Outcome of a successful conversion.
#[derive(Clone, Debug, PartialEq)]
pub struct ConversionReport {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub workers: usize,
    pub metadata: ImageMetadata,
    pub bytes_written: u64,
}

impl std::fmt::Display for ConversionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{} {:?} frame, {} workers, MaxCLL {} cd/m2, MaxFALL {} cd/m2, {} bytes",
            self.width,
            self.height,
            self.format,
            self.workers,
            self.metadata.max_cll,
            self.metadata.max_fall,
            self.bytes_written
        )
    }
}

/// Convert an OpenEXR file into a BT.2100 PQ PNG at `output`.
pub fn convert_file(
    input: &Path,
    output: &Path,
    config: &ConvertConfig,
    icc: &IccProfile,
) -> ConvertResult<ConversionReport> {
    info!("Converting {} -> {}", input.display(), output.display());
    convert_source(ExrSource::open(input)?, output, config, icc)
}

/// Acquire, convert and emit any pixel source.
pub fn convert_source<S: PixelSource>(
    source: S,
    output: &Path,
    config: &ConvertConfig,
    icc: &IccProfile,
) -> ConvertResult<ConversionReport> {
    config.validate()?;
    let frame = acquire_frame(source)?;
    let converted = convert_frame(&frame, config)?;
    let emitter = PngEmitter::new(icc.clone(), config.target_bits);
    let bytes_written = emitter.write_file(output, &converted.plane, converted.metadata)?;

    Ok(ConversionReport {
        width: frame.width(),
        height: frame.height(),
        format: frame.format(),
        workers: converted.workers,
        metadata: converted.metadata,
        bytes_written,
    })
}
