//! Silence-based end-of-utterance detection for one listening phase.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::collaborator::{AudioChunk, AudioSource, Recognizer};
use voxloop_foundation::EngineError;

/// Capture -> recognition edge. Lossy on overflow: the source drops chunks
/// rather than blocking the device (see the drop site in the audio crate).
pub const AUDIO_CHANNEL_CAPACITY: usize = 100;
/// Recognition -> turn edge.
pub const RESULT_CHANNEL_CAPACITY: usize = 10;

/// Drives one listening phase: capture and recognition run concurrently
/// while recognized fragments accumulate, and the phase closes on a silence
/// deadline, recognizer stream closure, or outer cancellation.
///
/// The deadline is an explicit monotonic instant recomputed on every
/// accepted fragment, not a reusable timer.
pub struct TurnCapture {
    source: Arc<dyn AudioSource>,
    recognizer: Arc<dyn Recognizer>,
    sample_rate: u32,
    silence_timeout: Duration,
}

enum PhaseEnd {
    /// The silence deadline expired.
    Silence,
    /// The recognizer closed its result stream on its own.
    StreamClosed,
    /// The outer cancellation signal fired.
    Cancelled,
}

impl TurnCapture {
    pub fn new(
        source: Arc<dyn AudioSource>,
        recognizer: Arc<dyn Recognizer>,
        sample_rate: u32,
        silence_timeout: Duration,
    ) -> Self {
        Self {
            source,
            recognizer,
            sample_rate,
            silence_timeout,
        }
    }

    /// Returns the accumulated utterance text for this phase. An empty
    /// string is a valid result and means nothing intelligible was said.
    /// Only outer cancellation surfaces as an error.
    pub async fn capture(&self, cancel: &CancellationToken) -> Result<String, EngineError> {
        let phase = cancel.child_token();
        let (audio_tx, audio_rx) = mpsc::channel::<AudioChunk>(AUDIO_CHANNEL_CAPACITY);
        let (result_tx, mut result_rx) = mpsc::channel::<String>(RESULT_CHANNEL_CAPACITY);

        let capture_task = {
            let source = self.source.clone();
            let phase = phase.clone();
            tokio::spawn(async move {
                if let Err(e) = source.start_capture(phase, audio_tx).await {
                    tracing::warn!("Audio capture error: {}", e);
                }
            })
        };

        let recognize_task = {
            let recognizer = self.recognizer.clone();
            let phase = phase.clone();
            let sample_rate = self.sample_rate;
            tokio::spawn(async move {
                if let Err(e) = recognizer
                    .stream_recognize(phase, audio_rx, result_tx, sample_rate)
                    .await
                {
                    tracing::warn!("Recognition error: {}", e);
                }
            })
        };

        let mut transcript = String::new();
        let mut deadline = Instant::now() + self.silence_timeout;

        let end = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break PhaseEnd::Cancelled,
                fragment = result_rx.recv() => match fragment {
                    Some(fragment) => {
                        if !fragment.is_empty() {
                            transcript.push_str(&fragment);
                            transcript.push(' ');
                            deadline = Instant::now() + self.silence_timeout;
                        }
                    }
                    None => break PhaseEnd::StreamClosed,
                },
                _ = time::sleep_until(deadline) => break PhaseEnd::Silence,
            }
        };

        if matches!(end, PhaseEnd::Silence) {
            // A final fragment may have raced the deadline; accept it rather
            // than losing the last word.
            while let Ok(fragment) = result_rx.try_recv() {
                if !fragment.is_empty() {
                    transcript.push_str(&fragment);
                    transcript.push(' ');
                }
            }
        }

        phase.cancel();
        let _ = capture_task.await;
        let _ = recognize_task.await;

        match end {
            PhaseEnd::Cancelled => Err(EngineError::Cancelled),
            _ => Ok(transcript),
        }
    }
}
