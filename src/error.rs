use std::fmt;

#[derive(Debug)]
pub enum ConvertError {
    /// A buffer size computation overflowed or the allocation could not be
    /// reserved.
    ResourceExhaustion(String),

    UnsupportedInputFormat(String),

    /// The external decoder failed to open the input or copy its pixels.
    SourceRead(anyhow::Error),

    /// Frame dimensions or buffer length do not satisfy the collaborator
    /// contract (non-zero size, `width * height * channel_bytes * 4` bytes).
    InvalidFrame(String),

    InvalidConfig(String),

    WorkerCreation(String),

    /// A conversion worker panicked. Carries the panic message when it was
    /// a string payload.
    WorkerAbnormalTermination(String),

    /// The merged histogram did not contain enough samples to satisfy the
    /// percentile walk.
    InconsistentStatistics(String),

    ContainerWrite(anyhow::Error),
}

/// Stage of a conversion run an error originated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConvertPhase {
    Acquire,
    Convert,
    Aggregate,
    Emit,
}

impl ConvertPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Acquire => "source acquisition",
            Self::Convert => "pixel conversion",
            Self::Aggregate => "metadata aggregation",
            Self::Emit => "PNG emission",
        }
    }
}

impl fmt::Display for ConvertPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ConvertError {
    pub fn phase(&self) -> ConvertPhase {
        match self {
            Self::UnsupportedInputFormat(_) | Self::SourceRead(_) | Self::InvalidFrame(_) => {
                ConvertPhase::Acquire
            }
            Self::ResourceExhaustion(_)
            | Self::InvalidConfig(_)
            | Self::WorkerCreation(_)
            | Self::WorkerAbnormalTermination(_) => ConvertPhase::Convert,
            Self::InconsistentStatistics(_) => ConvertPhase::Aggregate,
            Self::ContainerWrite(_) => ConvertPhase::Emit,
        }
    }

    pub(crate) fn source_read(err: impl Into<anyhow::Error>) -> Self {
        Self::SourceRead(err.into())
    }

    pub(crate) fn container_write(err: impl Into<anyhow::Error>) -> Self {
        Self::ContainerWrite(err.into())
    }
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceExhaustion(what) => write!(f, "failed to allocate {what}"),
            Self::UnsupportedInputFormat(name) => write!(f, "unsupported pixel format: {name}"),
            Self::SourceRead(_) => f.write_str("failed to read source image"),
            Self::InvalidFrame(message) => write!(f, "invalid source frame: {message}"),
            Self::InvalidConfig(message) => write!(f, "invalid conversion settings: {message}"),
            Self::WorkerCreation(message) => {
                write!(f, "failed to create conversion workers: {message}")
            }
            Self::WorkerAbnormalTermination(message) => {
                write!(f, "conversion worker failed to terminate properly: {message}")
            }
            Self::InconsistentStatistics(message) => {
                write!(f, "luminance statistics are inconsistent: {message}")
            }
            Self::ContainerWrite(_) => f.write_str("failed to write PNG"),
        }
    }
}

impl std::error::Error for ConvertError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SourceRead(inner) | Self::ContainerWrite(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

impl From<png::EncodingError> for ConvertError {
    fn from(err: png::EncodingError) -> Self {
        Self::container_write(err)
    }
}

pub type ConvertResult<T> = Result<T, ConvertError>;
