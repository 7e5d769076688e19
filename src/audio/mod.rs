//! Loopback audio → spectrum bar visualization.
//!
//! ```text
//! capture callback ─▶ decode ─▶ zero-pad + FFT ─▶ rate limit ─▶ bars ─▶ frame
//! ```
//!
//! The pure stages (`decode`, `spectrum`, `bars`, `pipeline`) are
//! testable without an audio device. `backend` describes what the OS audio
//! layer has to provide; `endpoint` reacts to default-device changes.

pub mod backend;
pub mod bars;
#[cfg(feature = "capture")]
pub mod cpal_backend;
pub mod decode;
pub mod endpoint;
pub mod pipeline;
pub mod spectrum;

pub use backend::{AudioBackend, EndpointInfo, NullAudioBackend};
pub use endpoint::EndpointWatcher;
pub use pipeline::AudioVisualizer;

/// The audio backend compiled into this build.
#[cfg(feature = "capture")]
pub fn default_backend() -> std::sync::Arc<dyn AudioBackend> {
    std::sync::Arc::new(cpal_backend::CpalBackend)
}

/// The audio backend compiled into this build.
#[cfg(not(feature = "capture"))]
pub fn default_backend() -> std::sync::Arc<dyn AudioBackend> {
    std::sync::Arc::new(NullAudioBackend)
}
