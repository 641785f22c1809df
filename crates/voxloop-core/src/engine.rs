//! Top-level turn orchestrator.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::collaborator::{
    AudioChunk, AudioSink, AudioSource, Recognizer, ReplyGenerator, Synthesizer,
};
use crate::config::{EngineConfig, SynthesisOptions};
use crate::history::{ConversationEntry, ConversationHistory};
use crate::reframe::AudioFrameReframer;
use crate::turn::TurnCapture;
use voxloop_foundation::{CollaboratorError, EngineError, RunFlag, ShutdownError};

/// Synthesis -> reframer edge. Blocking on full, no drops; audio
/// correctness dominates this edge, not device real-time constraints.
const SYNTH_CHANNEL_CAPACITY: usize = 100;
/// Reframer -> playback edge. Blocking on full.
const FRAME_CHANNEL_CAPACITY: usize = 8;

/// Runs the conversation loop: capture -> generate -> speak -> record,
/// until cancelled or a fatal initialization failure.
///
/// The engine owns the capture and playback devices exclusively for its
/// lifetime. Mid-turn collaborator failures are logged and the turn is
/// abandoned; only initialization failures and cancellation cross the `run`
/// boundary.
pub struct Engine {
    config: EngineConfig,
    source: Arc<dyn AudioSource>,
    recognizer: Arc<dyn Recognizer>,
    generator: Arc<dyn ReplyGenerator>,
    synthesizer: Arc<dyn Synthesizer>,
    sink: Arc<dyn AudioSink>,
    options: SynthesisOptions,
    history: Arc<ConversationHistory>,
    run_flag: RunFlag,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        source: Arc<dyn AudioSource>,
        recognizer: Arc<dyn Recognizer>,
        generator: Arc<dyn ReplyGenerator>,
        synthesizer: Arc<dyn Synthesizer>,
        sink: Arc<dyn AudioSink>,
    ) -> Self {
        let config = config.normalized();
        let history = Arc::new(ConversationHistory::new(config.max_history_size));
        Self {
            config,
            source,
            recognizer,
            generator,
            synthesizer,
            sink,
            options: SynthesisOptions::default(),
            history,
            run_flag: RunFlag::new(),
        }
    }

    /// Replace the default synthesis options forwarded to the synthesizer.
    pub fn with_synthesis_options(mut self, options: SynthesisOptions) -> Self {
        self.options = options;
        self
    }

    pub fn is_running(&self) -> bool {
        self.run_flag.is_running()
    }

    pub fn history(&self) -> Arc<ConversationHistory> {
        self.history.clone()
    }

    pub fn clear_history(&self) {
        self.history.clear();
    }

    /// Runs the turn loop until `cancel` fires or startup fails.
    ///
    /// Re-entrant calls while running fail with `AlreadyRunning` and leave
    /// the running engine untouched. Cancellation propagates out as
    /// `EngineError::Cancelled`; callers treat it as an orderly exit.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), EngineError> {
        self.run_flag.acquire()?;
        let result = self.run_loop(&cancel).await;
        self.run_flag.release();
        result
    }

    async fn run_loop(&self, cancel: &CancellationToken) -> Result<(), EngineError> {
        self.source.open().await.map_err(EngineError::Init)?;
        if let Err(e) = self.sink.open().await {
            if let Err(close_err) = self.source.close().await {
                tracing::warn!("Failed to close audio source after init failure: {}", close_err);
            }
            return Err(EngineError::Init(e));
        }

        tracing::info!("Engine started, listening for user input");

        let turn_capture = TurnCapture::new(
            self.source.clone(),
            self.recognizer.clone(),
            self.config.sample_rate,
            self.config.silence_timeout,
        );

        let outcome = loop {
            if cancel.is_cancelled() {
                tracing::info!("Engine stopping: cancellation requested");
                break Err(EngineError::Cancelled);
            }
            match self.run_turn(cancel, &turn_capture).await {
                Ok(()) => {}
                Err(EngineError::Cancelled) => {
                    tracing::info!("Engine stopping: cancellation requested");
                    break Err(EngineError::Cancelled);
                }
                Err(e) => {
                    // Contained: the turn is abandoned, the loop continues.
                    tracing::warn!("Turn failed: {}", e);
                }
            }
        };

        let mut device_failures = ShutdownError::default();
        if let Err(e) = self.source.close().await {
            device_failures.push("audio source", e);
        }
        if let Err(e) = self.sink.close().await {
            device_failures.push("audio sink", e);
        }
        if !device_failures.is_empty() {
            tracing::warn!("Device close failures: {}", device_failures);
        }

        outcome
    }

    /// One cycle of listen -> transcribe -> generate -> speak -> record.
    async fn run_turn(
        &self,
        cancel: &CancellationToken,
        turn_capture: &TurnCapture,
    ) -> Result<(), EngineError> {
        let utterance = turn_capture.capture(cancel).await?;
        if utterance.trim().is_empty() {
            tracing::debug!("Nothing intelligible captured, listening again");
            return Ok(());
        }
        tracing::info!("User said: {}", utterance.trim());

        let context = self.history.render_context(&self.config.system_prompt);
        let reply = match self.generator.complete(&context, &utterance).await {
            Ok(reply) => reply,
            Err(e) => {
                if cancel.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                tracing::warn!("Reply generation failed, turn abandoned: {}", e);
                return Ok(());
            }
        };
        tracing::info!("Assistant reply: {}", reply.trim());

        self.speak(cancel, &reply).await?;

        self.history
            .append(ConversationEntry::new(utterance, reply));
        Ok(())
    }

    /// Synthesize `text` and play it: synthesis, reframing, and playback run
    /// concurrently, connected by bounded blocking channels, and all three
    /// complete (or observe cancellation) before the turn proceeds.
    async fn speak(&self, cancel: &CancellationToken, text: &str) -> Result<(), EngineError> {
        let phase = cancel.child_token();
        let (synth_tx, synth_rx) = mpsc::channel::<AudioChunk>(SYNTH_CHANNEL_CAPACITY);
        let (frame_tx, frame_rx) = mpsc::channel::<AudioChunk>(FRAME_CHANNEL_CAPACITY);

        let synth_task = {
            let synthesizer = self.synthesizer.clone();
            let phase = phase.clone();
            let text = text.to_string();
            let options = self.options.clone();
            tokio::spawn(async move {
                synthesizer
                    .synthesize_to_stream(phase, &text, &options, synth_tx)
                    .await
            })
        };

        let reframe_task = {
            let phase = phase.clone();
            let frame_bytes = self.config.playback.frame_bytes();
            tokio::spawn(async move {
                AudioFrameReframer::new(frame_bytes)
                    .run(phase, synth_rx, frame_tx)
                    .await
            })
        };

        let play_result = self.sink.play_stream(phase.clone(), frame_rx).await;
        let synth_result = match synth_task.await {
            Ok(result) => result,
            Err(e) => Err(CollaboratorError::Device(format!(
                "synthesis task failed: {e}"
            ))),
        };
        let _ = reframe_task.await;

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        synth_result.map_err(EngineError::Stream)?;
        play_result.map_err(EngineError::Stream)?;
        Ok(())
    }

    /// Closes the owned network collaborators, collecting every failure.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let mut failures = ShutdownError::default();
        if let Err(e) = self.recognizer.close().await {
            failures.push("recognizer", e);
        }
        if let Err(e) = self.synthesizer.close().await {
            failures.push("synthesizer", e);
        }
        failures.into_result()
    }
}
