//! Error taxonomy shared by the device, rasterizer and audio layers.
//!
//! None of these ever reach the host as a crash: the controller catches
//! them at the boundary of the operation that failed and logs them.

use std::path::PathBuf;

/// Result alias carrying [`MatrixError`].
pub type Result<T> = std::result::Result<T, MatrixError>;

#[derive(Debug, thiserror::Error)]
pub enum MatrixError {
    /// No matching panel was found at startup; the controller goes inert.
    #[error("matrix device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The device handshake failed while entering a mode.
    #[error("could not acquire output provider: {0}")]
    ProviderAcquisition(String),

    /// The picture could not be opened or decoded.
    #[error("could not decode image {}: {reason}", path.display())]
    ImageDecode { path: PathBuf, reason: String },

    /// No default render endpoint, or one we cannot read.
    #[error("audio endpoint error: {0}")]
    AudioEndpoint(String),

    /// Stopping or releasing a capture stream failed.
    #[error("capture teardown failed: {0}")]
    CaptureTeardown(String),

    /// The settings store could not be read or written.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MatrixError {
    pub(crate) fn decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::ImageDecode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
