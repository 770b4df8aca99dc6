use crate::error::{ConvertError, ConvertResult};

/// Channel encoding of an interleaved RGBA source buffer. Samples are
/// little-endian, linear-light scRGB.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// 4 x IEEE 754 binary32 per pixel.
    Float32x4,
    /// 4 x IEEE 754 binary16 per pixel.
    Half16x4,
}

impl PixelFormat {
    pub const fn channel_bytes(self) -> usize {
        match self {
            Self::Float32x4 => 4,
            Self::Half16x4 => 2,
        }
    }

    pub const fn pixel_bytes(self) -> usize {
        self.channel_bytes() * 4
    }
}

/// Decoded source frame. Read-only to the conversion core.
pub struct FrameBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl FrameBuffer {
    /// Wrap a buffer produced by an external decoder.
    pub fn from_raw(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> ConvertResult<Self> {
        if width == 0 || height == 0 {
            return Err(ConvertError::InvalidFrame(format!(
                "frame dimensions must be non-zero, got {width}x{height}"
            )));
        }
        let expected = plane_len(width, height, format.pixel_bytes())?;
        if data.len() != expected {
            return Err(ConvertError::InvalidFrame(format!(
                "{format:?} frame data length mismatch: got {}, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            format,
        })
    }

    /// Build a `Float32x4` frame from RGBA samples.
    pub fn from_rgba_f32(width: u32, height: u32, samples: &[f32]) -> ConvertResult<Self> {
        let mut data = Vec::new();
        try_reserve(&mut data, samples.len() * 4, "source pixel buffer")?;
        for sample in samples {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        Self::from_raw(width, height, PixelFormat::Float32x4, data)
    }

    /// Build a `Half16x4` frame from RGBA samples.
    pub fn from_rgba_f16(width: u32, height: u32, samples: &[half::f16]) -> ConvertResult<Self> {
        let mut data = Vec::new();
        try_reserve(&mut data, samples.len() * 2, "source pixel buffer")?;
        for sample in samples {
            data.extend_from_slice(&sample.to_bits().to_le_bytes());
        }
        Self::from_raw(width, height, PixelFormat::Half16x4, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.format.pixel_bytes()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Source bytes for rows `start..end`.
    pub(crate) fn rows(&self, start: usize, end: usize) -> &[u8] {
        let row_bytes = self.row_bytes();
        &self.data[start * row_bytes..end * row_bytes]
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// Requantized RGB plane, three native-endian `u16` samples per pixel.
pub struct OutputPlane {
    samples: Vec<u16>,
    width: u32,
    height: u32,
}

impl OutputPlane {
    pub(crate) fn allocate(width: u32, height: u32) -> ConvertResult<Self> {
        let len = plane_len(width, height, 3)?;
        let mut samples = Vec::new();
        try_reserve(&mut samples, len, "output plane")?;
        samples.resize(len, 0);
        Ok(Self {
            samples,
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn samples(&self) -> &[u16] {
        &self.samples
    }

    pub fn row_samples(&self) -> usize {
        self.width as usize * 3
    }

    /// RGB samples of pixel `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> [u16; 3] {
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        [
            self.samples[idx],
            self.samples[idx + 1],
            self.samples[idx + 2],
        ]
    }

    pub(crate) fn samples_mut(&mut self) -> &mut [u16] {
        &mut self.samples
    }
}

impl std::fmt::Debug for OutputPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputPlane")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("samples_len", &self.samples.len())
            .finish()
    }
}

fn plane_len(width: u32, height: u32, per_pixel: usize) -> ConvertResult<usize> {
    let w = usize::try_from(width).map_err(|_| overflow(width, height))?;
    let h = usize::try_from(height).map_err(|_| overflow(width, height))?;
    w.checked_mul(h)
        .and_then(|px| px.checked_mul(per_pixel))
        .ok_or_else(|| overflow(width, height))
}

fn overflow(width: u32, height: u32) -> ConvertError {
    ConvertError::ResourceExhaustion(format!("buffer for {width}x{height} frame (size overflow)"))
}

pub(crate) fn try_reserve<T>(buf: &mut Vec<T>, len: usize, what: &str) -> ConvertResult<()> {
    buf.try_reserve_exact(len)
        .map_err(|err| ConvertError::ResourceExhaustion(format!("{what} ({len} elements): {err}")))
}
