use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by enrollment, identification and index access.
#[derive(Error, Debug)]
pub enum Error {
    /// Input signal cannot produce a single analysis frame.
    #[error("signal too short: {len} samples, need at least {min}")]
    ShortSignal { len: usize, min: usize },

    /// Index file was built under a different fingerprint configuration.
    #[error("parameter digest mismatch for {path}: index was built with an incompatible configuration")]
    ParamDigestMismatch { path: PathBuf },

    /// Index file failed a structural or checksum validation.
    #[error("corrupt index {path}: {reason}")]
    CorruptIndex { path: PathBuf, reason: String },

    /// Write attempted through a read-mode index handle.
    #[error("index {path} is open read-only")]
    ReadOnlyIndex { path: PathBuf },

    /// Underlying storage failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation was cancelled before producing a result.
    #[error("operation cancelled")]
    Cancelled,

    /// PCM preparation was handed zero-channel input.
    #[error("at least one channel is required")]
    NoChannels,

    /// PCM preparation was handed an implausibly low sample rate.
    #[error("sample rate {rate} Hz is too low, required min. {min} Hz")]
    SampleRateTooLow { rate: u32, min: u32 },

    /// Resampler could not be constructed for the requested rates.
    #[error("cannot resample: {0}")]
    CannotResample(#[from] rubato::ResamplerConstructionError),

    /// Resampling failed mid-stream.
    #[error("resampling failed: {0}")]
    Resample(#[from] rubato::ResampleError),
}

pub type Result<T> = std::result::Result<T, Error>;
