//! Capabilities the engine needs from the OS audio subsystem.
//!
//! Loopback capture of the default render endpoint, and notifications
//! when that default changes. The cpal implementation lives in
//! `cpal_backend` behind the `capture` feature; [`NullAudioBackend`] stands
//! in when capture is compiled out.

use super::decode::StreamFormat;
use crate::error::{MatrixError, Result};
use std::sync::Arc;

/// The default render endpoint at the moment it was queried.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointInfo {
    pub id: String,
    pub format: StreamFormat,
}

/// Receives raw interleaved capture bytes on the audio thread.
pub type CaptureCallback = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// A running capture stream. Dropping it without [`stop`](Self::stop)
/// also ends capture, just without the teardown report.
pub trait CaptureStream: Send {
    fn stop(self: Box<Self>) -> Result<()>;
}

/// Keeps endpoint notifications flowing until dropped.
pub trait EndpointRegistration: Send {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataFlow {
    Render,
    Capture,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Console,
    Multimedia,
    Communications,
}

/// Sink for endpoint notifications. Only the default-device change matters
/// to the engine; the other handlers default to no-ops.
pub trait EndpointNotificationClient: Send + Sync {
    fn on_default_device_changed(&self, flow: DataFlow, role: Role, device_id: &str);

    fn on_device_added(&self, _device_id: &str) {}

    fn on_device_removed(&self, _device_id: &str) {}

    fn on_device_state_changed(&self, _device_id: &str) {}
}

pub trait AudioBackend: Send + Sync {
    /// The current default render endpoint.
    fn default_endpoint(&self) -> Result<EndpointInfo>;

    /// Start loopback capture of `endpoint`, feeding `callback`.
    fn start_capture(
        &self,
        endpoint: &EndpointInfo,
        callback: CaptureCallback,
    ) -> Result<Box<dyn CaptureStream>>;

    /// Subscribe `client` to endpoint notifications.
    fn watch_endpoints(
        &self,
        client: Arc<dyn EndpointNotificationClient>,
    ) -> Result<Box<dyn EndpointRegistration>>;
}

/// Backend for builds without audio capture: every start fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullAudioBackend;

impl AudioBackend for NullAudioBackend {
    fn default_endpoint(&self) -> Result<EndpointInfo> {
        Err(MatrixError::AudioEndpoint(
            "audio capture is not compiled in (enable the `capture` feature)".into(),
        ))
    }

    fn start_capture(
        &self,
        _endpoint: &EndpointInfo,
        _callback: CaptureCallback,
    ) -> Result<Box<dyn CaptureStream>> {
        Err(MatrixError::AudioEndpoint("no audio backend".into()))
    }

    fn watch_endpoints(
        &self,
        _client: Arc<dyn EndpointNotificationClient>,
    ) -> Result<Box<dyn EndpointRegistration>> {
        Err(MatrixError::AudioEndpoint("no audio backend".into()))
    }
}
