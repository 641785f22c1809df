use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, StreamConfig};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::pcm;
use voxloop_core::{AudioChunk, AudioSink};
use voxloop_foundation::CollaboratorError;

/// Samples queued ahead of the device before the feeder applies
/// backpressure.
const QUEUE_HIGH_WATER: usize = 32_768;

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Output device name; `None` uses the host default.
    pub device: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    pub frames_per_buffer: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: 22_050,
            channels: 1,
            frames_per_buffer: 2048,
        }
    }
}

/// Playback side of the audio device. The cpal output stream pulls from a
/// shared sample queue and writes silence on underrun, matching the
/// zero-fill behavior the reframer's padding guarantees at stream end.
pub struct CpalSink {
    config: PlaybackConfig,
    opened: AtomicBool,
}

impl CpalSink {
    pub fn new(config: PlaybackConfig) -> Self {
        Self {
            config,
            opened: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl AudioSink for CpalSink {
    async fn open(&self) -> Result<(), CollaboratorError> {
        let device_name = self.config.device.clone();
        let probed = tokio::task::spawn_blocking(move || {
            resolve_output_device(device_name.as_deref()).and_then(|device| {
                device
                    .name()
                    .map_err(|e| CollaboratorError::Device(format!("device name: {e}")))
            })
        })
        .await
        .map_err(|e| CollaboratorError::Device(format!("device probe failed: {e}")))??;

        tracing::info!("Playback device opened: {}", probed);
        self.opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn play_stream(
        &self,
        cancel: CancellationToken,
        mut frames: mpsc::Receiver<AudioChunk>,
    ) -> Result<(), CollaboratorError> {
        if !self.opened.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Device(
                "playback device not opened".to_string(),
            ));
        }

        let queue: Arc<Mutex<VecDeque<i16>>> = Arc::new(Mutex::new(VecDeque::new()));
        let running = Arc::new(AtomicBool::new(true));

        let stream_thread = {
            let config = self.config.clone();
            let queue = queue.clone();
            let running = running.clone();
            tokio::task::spawn_blocking(move || playback_thread(config, queue, running))
        };

        // Feed the device queue with backpressure; this edge never drops.
        // The stream thread only ends early on a device failure, so a
        // finished handle means nothing will drain the queue again.
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                frame = frames.recv() => frame,
            };
            let Some(frame) = frame else {
                break;
            };

            let samples = pcm::bytes_to_i16(&frame);
            loop {
                if stream_thread.is_finished() {
                    break;
                }
                if queue.lock().len() <= QUEUE_HIGH_WATER {
                    queue.lock().extend(samples.iter().copied());
                    break;
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = sleep(Duration::from_millis(10)) => {}
                }
                if cancel.is_cancelled() {
                    break;
                }
            }
            if cancel.is_cancelled() || stream_thread.is_finished() {
                break;
            }
        }

        // Let buffered audio drain before tearing the stream down, unless
        // we were cancelled or the stream died.
        while !cancel.is_cancelled() && !stream_thread.is_finished() && !queue.lock().is_empty() {
            sleep(Duration::from_millis(10)).await;
        }

        running.store(false, Ordering::SeqCst);
        match stream_thread.await {
            Ok(outcome) => outcome,
            Err(e) => Err(CollaboratorError::Device(format!(
                "playback thread failed: {e}"
            ))),
        }
    }

    async fn close(&self) -> Result<(), CollaboratorError> {
        self.opened.store(false, Ordering::SeqCst);
        Ok(())
    }
}

fn playback_thread(
    config: PlaybackConfig,
    queue: Arc<Mutex<VecDeque<i16>>>,
    running: Arc<AtomicBool>,
) -> Result<(), CollaboratorError> {
    let device = resolve_output_device(config.device.as_deref())?;
    let supported = device
        .default_output_config()
        .map_err(|e| CollaboratorError::Device(format!("no output config: {e}")))?;

    let stream_config = StreamConfig {
        channels: config.channels,
        sample_rate: SampleRate(config.sample_rate),
        buffer_size: BufferSize::Fixed(config.frames_per_buffer as u32),
    };

    let err_fn = |e| tracing::warn!("Playback stream error: {}", e);
    let stream = match supported.sample_format() {
        SampleFormat::I16 => {
            let queue = queue.clone();
            device.build_output_stream(
                &stream_config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    fill_i16(&queue, data);
                },
                err_fn,
                None,
            )
        }
        SampleFormat::F32 => {
            let queue = queue.clone();
            device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    fill_f32(&queue, data);
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(CollaboratorError::Device(format!(
                "unsupported output sample format: {other:?}"
            )))
        }
    }
    .map_err(|e| CollaboratorError::Device(format!("build output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| CollaboratorError::Device(format!("start output stream: {e}")))?;

    tracing::debug!("Playback stream running");
    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(20));
    }
    drop(stream);
    Ok(())
}

fn fill_i16(queue: &Mutex<VecDeque<i16>>, data: &mut [i16]) {
    let mut queue = queue.lock();
    for slot in data.iter_mut() {
        *slot = queue.pop_front().unwrap_or(0);
    }
}

fn fill_f32(queue: &Mutex<VecDeque<i16>>, data: &mut [f32]) {
    let mut queue = queue.lock();
    for slot in data.iter_mut() {
        *slot = queue
            .pop_front()
            .map(|s| s as f32 / i16::MAX as f32)
            .unwrap_or(0.0);
    }
}

fn resolve_output_device(name: Option<&str>) -> Result<cpal::Device, CollaboratorError> {
    let host = cpal::default_host();
    match name {
        Some(name) => host
            .output_devices()
            .map_err(|e| CollaboratorError::Device(format!("enumerate output devices: {e}")))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| CollaboratorError::Device(format!("output device not found: {name}"))),
        None => host
            .default_output_device()
            .ok_or_else(|| CollaboratorError::Device("no default output device".to_string())),
    }
}
