//! Loopback capture through cpal.
//!
//! Opening an input stream on an *output* device gives loopback on
//! WASAPI; hosts without loopback support fail at `start_capture` with
//! an endpoint error.
//!
//! A `cpal::Stream` is not `Send` on every host, so each stream lives on
//! its own thread and is dropped there when the handle is stopped.

use super::backend::{
    AudioBackend, CaptureCallback, CaptureStream, DataFlow, EndpointInfo,
    EndpointNotificationClient, EndpointRegistration, Role,
};
use super::decode::{SampleEncoding, StreamFormat};
use crate::error::{MatrixError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often the default output device is polled for changes.
const ENDPOINT_POLL: Duration = Duration::from_millis(500);

fn encoding(format: cpal::SampleFormat) -> SampleEncoding {
    match format {
        cpal::SampleFormat::I16 => SampleEncoding::Int16,
        cpal::SampleFormat::I32 => SampleEncoding::Int32,
        cpal::SampleFormat::F32 => SampleEncoding::Float32,
        _ => SampleEncoding::Unsupported,
    }
}

fn endpoint_err(e: impl std::fmt::Display) -> MatrixError {
    MatrixError::AudioEndpoint(e.to_string())
}

fn default_output_name() -> Option<String> {
    cpal::default_host()
        .default_output_device()
        .and_then(|d| d.name().ok())
}

fn find_output(id: &str) -> Result<cpal::Device> {
    let host = cpal::default_host();
    let mut devices = host.output_devices().map_err(endpoint_err)?;
    devices
        .find(|d| d.name().is_ok_and(|n| n == id))
        .ok_or_else(|| MatrixError::AudioEndpoint(format!("output device {id} disappeared")))
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn default_endpoint(&self) -> Result<EndpointInfo> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| MatrixError::AudioEndpoint("no default render endpoint".into()))?;
        let id = device.name().map_err(endpoint_err)?;
        let config = device.default_output_config().map_err(endpoint_err)?;

        Ok(EndpointInfo {
            id,
            format: StreamFormat {
                sample_rate: config.sample_rate().0,
                channels: config.channels(),
                encoding: encoding(config.sample_format()),
            },
        })
    }

    fn start_capture(
        &self,
        endpoint: &EndpointInfo,
        mut callback: CaptureCallback,
    ) -> Result<Box<dyn CaptureStream>> {
        let id = endpoint.id.clone();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let handle = thread::Builder::new()
            .name("loopback-capture".into())
            .spawn(move || {
                let opened = (|| -> Result<cpal::Stream> {
                    let device = find_output(&id)?;
                    let config = device.default_output_config().map_err(endpoint_err)?;
                    let stream = device
                        .build_input_stream_raw(
                            &config.config(),
                            config.sample_format(),
                            move |data: &cpal::Data, _: &cpal::InputCallbackInfo| {
                                callback(data.bytes());
                            },
                            |err| tracing::error!("Audio stream error: {}", err),
                            None,
                        )
                        .map_err(endpoint_err)?;
                    stream.play().map_err(endpoint_err)?;
                    Ok(stream)
                })();

                match opened {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        // Park until stopped or the handle is dropped.
                        let _ = stop_rx.recv();
                        if let Err(e) = stream.pause() {
                            tracing::warn!("Pausing capture stream failed: {}", e);
                        }
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalCapture {
                stop_tx,
                handle: Some(handle),
            })),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(MatrixError::AudioEndpoint("capture thread exited early".into()))
            }
        }
    }

    fn watch_endpoints(
        &self,
        client: Arc<dyn EndpointNotificationClient>,
    ) -> Result<Box<dyn EndpointRegistration>> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let mut last = default_output_name();

        let handle = thread::Builder::new()
            .name("endpoint-watch".into())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(ENDPOINT_POLL) {
                        Err(RecvTimeoutError::Timeout) => {
                            let now = default_output_name();
                            if now != last {
                                if let Some(id) = &now {
                                    client.on_default_device_changed(
                                        DataFlow::Render,
                                        Role::Console,
                                        id,
                                    );
                                }
                                last = now;
                            }
                        }
                        _ => break,
                    }
                }
            })?;

        Ok(Box::new(CpalWatch {
            stop_tx,
            handle: Some(handle),
        }))
    }
}

struct CpalCapture {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureStream for CpalCapture {
    fn stop(mut self: Box<Self>) -> Result<()> {
        let _ = self.stop_tx.send(());
        match self.handle.take().map(JoinHandle::join) {
            Some(Err(_)) => Err(MatrixError::CaptureTeardown(
                "capture thread panicked".into(),
            )),
            _ => Ok(()),
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct CpalWatch {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl EndpointRegistration for CpalWatch {}

impl Drop for CpalWatch {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
