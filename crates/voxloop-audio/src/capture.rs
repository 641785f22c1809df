use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, StreamConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::pcm;
use voxloop_core::{AudioChunk, AudioSource};
use voxloop_foundation::CollaboratorError;

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Input device name; `None` uses the host default.
    pub device: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: 44_100,
            channels: 1,
        }
    }
}

/// Capture side of the audio device. The cpal stream lives on a dedicated
/// blocking thread that polls the cancellation token; captured samples are
/// converted to i16 little-endian bytes and pushed through the lossy
/// capture channel.
pub struct CpalSource {
    config: CaptureConfig,
    opened: AtomicBool,
    dropped_chunks: Arc<AtomicU64>,
}

impl CpalSource {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            opened: AtomicBool::new(false),
            dropped_chunks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Chunks dropped because the capture channel was full.
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped_chunks.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AudioSource for CpalSource {
    async fn open(&self) -> Result<(), CollaboratorError> {
        let device_name = self.config.device.clone();
        // Device enumeration can block on some hosts.
        let probed = tokio::task::spawn_blocking(move || {
            resolve_input_device(device_name.as_deref()).and_then(|device| {
                device
                    .name()
                    .map_err(|e| CollaboratorError::Device(format!("device name: {e}")))
            })
        })
        .await
        .map_err(|e| CollaboratorError::Device(format!("device probe failed: {e}")))??;

        tracing::info!("Capture device opened: {}", probed);
        self.opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn start_capture(
        &self,
        cancel: CancellationToken,
        out: mpsc::Sender<AudioChunk>,
    ) -> Result<(), CollaboratorError> {
        if !self.opened.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Device(
                "capture device not opened".to_string(),
            ));
        }

        let config = self.config.clone();
        let dropped = self.dropped_chunks.clone();
        let result =
            tokio::task::spawn_blocking(move || capture_thread(config, cancel, out, dropped))
                .await;
        match result {
            Ok(outcome) => outcome,
            Err(e) => Err(CollaboratorError::Device(format!(
                "capture thread failed: {e}"
            ))),
        }
    }

    async fn close(&self) -> Result<(), CollaboratorError> {
        self.opened.store(false, Ordering::SeqCst);
        Ok(())
    }
}

fn capture_thread(
    config: CaptureConfig,
    cancel: CancellationToken,
    out: mpsc::Sender<AudioChunk>,
    dropped: Arc<AtomicU64>,
) -> Result<(), CollaboratorError> {
    let device = resolve_input_device(config.device.as_deref())?;
    let supported = device
        .default_input_config()
        .map_err(|e| CollaboratorError::Device(format!("no input config: {e}")))?;

    let stream_config = StreamConfig {
        channels: config.channels,
        sample_rate: SampleRate(config.sample_rate),
        buffer_size: BufferSize::Default,
    };

    let err_fn = |e| tracing::warn!("Capture stream error: {}", e);
    let stream = match supported.sample_format() {
        SampleFormat::I16 => {
            let out = out.clone();
            let dropped = dropped.clone();
            device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    push_chunk(&out, pcm::i16_to_bytes(data), &dropped);
                },
                err_fn,
                None,
            )
        }
        SampleFormat::F32 => {
            let out = out.clone();
            let dropped = dropped.clone();
            device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    push_chunk(&out, pcm::f32_to_bytes(data), &dropped);
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(CollaboratorError::Device(format!(
                "unsupported input sample format: {other:?}"
            )))
        }
    }
    .map_err(|e| CollaboratorError::Device(format!("build input stream: {e}")))?;

    stream
        .play()
        .map_err(|e| CollaboratorError::Device(format!("start input stream: {e}")))?;

    tracing::debug!("Capture stream running");
    while !cancel.is_cancelled() {
        thread::sleep(Duration::from_millis(50));
    }
    drop(stream);

    let total_dropped = dropped.load(Ordering::Relaxed);
    if total_dropped > 0 {
        tracing::debug!("Capture phase ended, {} chunks dropped", total_dropped);
    }
    Ok(())
}

/// Lossy edge carried over from the source system: when recognition lags
/// and the channel fills, newly captured audio is dropped rather than
/// blocking the device callback. Flagged for review; bounded staleness is
/// traded against unbounded buffering.
fn push_chunk(out: &mpsc::Sender<AudioChunk>, bytes: Vec<u8>, dropped: &AtomicU64) {
    if out.try_send(bytes).is_err() {
        let count = dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if count % 100 == 1 {
            tracing::debug!("Capture channel full, dropping audio ({} so far)", count);
        }
    }
}

fn resolve_input_device(name: Option<&str>) -> Result<cpal::Device, CollaboratorError> {
    let host = cpal::default_host();
    match name {
        Some(name) => host
            .input_devices()
            .map_err(|e| CollaboratorError::Device(format!("enumerate input devices: {e}")))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| CollaboratorError::Device(format!("input device not found: {name}"))),
        None => host
            .default_input_device()
            .ok_or_else(|| CollaboratorError::Device("no default input device".to_string())),
    }
}
