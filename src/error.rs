//! Error types shared by the jitterer and the trajectory container.

use thiserror::Error;

/// Unified error for configuration sampling and trajectory operations.
///
/// Collision and constraint rejections during jittering are *not* errors;
/// they are counted in [`crate::jitterer::FailureCounter`] and sampling
/// continues. Everything here is a hard failure that surfaces to the caller.
#[derive(Debug, Error)]
pub enum SamplingError {
    /// Shape, limit, or format violation, including a missing
    /// derivative/integral chain discovered at sample time.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation on an object whose internal state forbids it, such as a
    /// negative deltatime or access before initialization.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A documented gap, such as cubic interpolation of 5D
    /// translation-direction targets.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// A runtime capability is missing, such as requesting a manipulator
    /// bias without the `jacobian-bias` feature.
    #[error("command not supported: {0}")]
    CommandNotSupported(String),

    /// The status callback requested cancellation of the jitter loop.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The stream does not carry the binary trajectory magic; the caller
    /// should fall through to its legacy textual parser.
    #[error("stream is not a binary trajectory, fall through to the textual parser")]
    LegacyTrajectoryFormat,

    /// Transport failure while writing a serialized trajectory.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SamplingError {
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument(reason.into())
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, SamplingError>;
