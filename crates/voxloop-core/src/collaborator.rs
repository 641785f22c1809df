//! Capability interfaces the engine consumes.
//!
//! These are in-process streaming contracts: collaborators exchange raw PCM
//! byte chunks and text fragments over bounded channels and observe a shared
//! cancellation token. Cancellation is a terminal condition for a streaming
//! operation, not a hard error; implementations return `Ok(())` when they
//! stop because the token fired and reserve `Err` for device or transport
//! failures.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::SynthesisOptions;
use voxloop_foundation::CollaboratorError;

/// Raw PCM bytes, i16 little-endian.
pub type AudioChunk = Vec<u8>;

/// Capture side of the audio device.
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Prepare the capture device. Failure here is fatal to engine startup.
    async fn open(&self) -> Result<(), CollaboratorError>;

    /// Push captured PCM chunks into `out` until `cancel` fires.
    ///
    /// When `out` is full the chunk is dropped rather than blocking the
    /// device; bounded staleness is preferred over device overrun.
    async fn start_capture(
        &self,
        cancel: CancellationToken,
        out: mpsc::Sender<AudioChunk>,
    ) -> Result<(), CollaboratorError>;

    async fn close(&self) -> Result<(), CollaboratorError>;
}

/// Streaming speech recognition.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Consume audio chunks from `audio` and emit recognized text fragments
    /// into `results`. The results sink is closed (sender dropped) when the
    /// audio source is exhausted, the provider finishes, or `cancel` fires.
    async fn stream_recognize(
        &self,
        cancel: CancellationToken,
        audio: mpsc::Receiver<AudioChunk>,
        results: mpsc::Sender<String>,
        sample_rate: u32,
    ) -> Result<(), CollaboratorError>;

    async fn close(&self) -> Result<(), CollaboratorError>;
}

/// Single-shot reply generation.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// One blocking round-trip: grounding context plus user input, reply out.
    async fn complete(&self, context: &str, input: &str) -> Result<String, CollaboratorError>;
}

/// Streaming speech synthesis.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Emit raw audio chunks into `out` until synthesis completes, then
    /// close the sink. Options are forwarded verbatim.
    async fn synthesize_to_stream(
        &self,
        cancel: CancellationToken,
        text: &str,
        options: &SynthesisOptions,
        out: mpsc::Sender<AudioChunk>,
    ) -> Result<(), CollaboratorError>;

    async fn close(&self) -> Result<(), CollaboratorError>;
}

/// Playback side of the audio device.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Prepare the playback device. Failure here is fatal to engine startup.
    async fn open(&self) -> Result<(), CollaboratorError>;

    /// Write fixed-size frames to the output device until `frames` is
    /// exhausted or `cancel` fires.
    async fn play_stream(
        &self,
        cancel: CancellationToken,
        frames: mpsc::Receiver<AudioChunk>,
    ) -> Result<(), CollaboratorError>;

    async fn close(&self) -> Result<(), CollaboratorError>;
}
