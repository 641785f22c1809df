//! End-to-end engine loop tests against scripted in-process collaborators.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

use voxloop_core::{
    AudioChunk, AudioSink, AudioSource, Engine, EngineConfig, PlaybackFormat, Recognizer,
    ReplyGenerator, SynthesisOptions, Synthesizer,
};
use voxloop_foundation::{CollaboratorError, EngineError};

struct SilentSource;

#[async_trait]
impl AudioSource for SilentSource {
    async fn open(&self) -> Result<(), CollaboratorError> {
        Ok(())
    }

    async fn start_capture(
        &self,
        cancel: CancellationToken,
        _out: mpsc::Sender<AudioChunk>,
    ) -> Result<(), CollaboratorError> {
        cancel.cancelled().await;
        Ok(())
    }

    async fn close(&self) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

struct BrokenSource;

#[async_trait]
impl AudioSource for BrokenSource {
    async fn open(&self) -> Result<(), CollaboratorError> {
        Err(CollaboratorError::Device("no capture device".into()))
    }

    async fn start_capture(
        &self,
        _cancel: CancellationToken,
        _out: mpsc::Sender<AudioChunk>,
    ) -> Result<(), CollaboratorError> {
        unreachable!("open failed")
    }

    async fn close(&self) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// Per-turn recognizer script: either speak a phrase and close the result
/// stream, or stay quiet until the phase is cancelled.
enum TurnScript {
    Say(&'static str),
    Quiet,
}

struct ScriptedRecognizer {
    turns: Mutex<VecDeque<TurnScript>>,
    close_fails: bool,
}

impl ScriptedRecognizer {
    fn new(turns: Vec<TurnScript>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            close_fails: false,
        }
    }
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    async fn stream_recognize(
        &self,
        cancel: CancellationToken,
        _audio: mpsc::Receiver<AudioChunk>,
        results: mpsc::Sender<String>,
        _sample_rate: u32,
    ) -> Result<(), CollaboratorError> {
        let script = self.turns.lock().unwrap().pop_front();
        match script {
            Some(TurnScript::Say(text)) => {
                let _ = results.send(text.to_string()).await;
                // Dropping `results` here closes the phase immediately.
            }
            Some(TurnScript::Quiet) | None => {
                cancel.cancelled().await;
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), CollaboratorError> {
        if self.close_fails {
            Err(CollaboratorError::Transport("socket already gone".into()))
        } else {
            Ok(())
        }
    }
}

struct StaticGenerator {
    reply: &'static str,
}

#[async_trait]
impl ReplyGenerator for StaticGenerator {
    async fn complete(&self, _context: &str, _input: &str) -> Result<String, CollaboratorError> {
        Ok(self.reply.to_string())
    }
}

struct ContextRecorder {
    contexts: Mutex<Vec<String>>,
}

#[async_trait]
impl ReplyGenerator for ContextRecorder {
    async fn complete(&self, context: &str, input: &str) -> Result<String, CollaboratorError> {
        self.contexts.lock().unwrap().push(context.to_string());
        Ok(format!("echo {}", input.trim()))
    }
}

struct FailingGenerator {
    calls: AtomicUsize,
}

#[async_trait]
impl ReplyGenerator for FailingGenerator {
    async fn complete(&self, _context: &str, _input: &str) -> Result<String, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CollaboratorError::Transport("connection reset".into()))
    }
}

/// Emits its chunks and completes.
struct ChunkSynthesizer {
    chunks: Vec<AudioChunk>,
    close_fails: bool,
}

#[async_trait]
impl Synthesizer for ChunkSynthesizer {
    async fn synthesize_to_stream(
        &self,
        cancel: CancellationToken,
        _text: &str,
        _options: &SynthesisOptions,
        out: mpsc::Sender<AudioChunk>,
    ) -> Result<(), CollaboratorError> {
        for chunk in &self.chunks {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                sent = out.send(chunk.clone()) => {
                    if sent.is_err() {
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), CollaboratorError> {
        if self.close_fails {
            Err(CollaboratorError::Provider("flush failed".into()))
        } else {
            Ok(())
        }
    }
}

/// Emits one chunk, then stalls until cancelled (mid-synthesis hang).
struct StallingSynthesizer;

#[async_trait]
impl Synthesizer for StallingSynthesizer {
    async fn synthesize_to_stream(
        &self,
        cancel: CancellationToken,
        _text: &str,
        _options: &SynthesisOptions,
        out: mpsc::Sender<AudioChunk>,
    ) -> Result<(), CollaboratorError> {
        let _ = out.send(vec![1, 2, 3, 4]).await;
        cancel.cancelled().await;
        Ok(())
    }

    async fn close(&self) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

#[derive(Default)]
struct CollectingSink {
    frames: Mutex<Vec<AudioChunk>>,
}

#[async_trait]
impl AudioSink for CollectingSink {
    async fn open(&self) -> Result<(), CollaboratorError> {
        Ok(())
    }

    async fn play_stream(
        &self,
        cancel: CancellationToken,
        mut frames: mpsc::Receiver<AudioChunk>,
    ) -> Result<(), CollaboratorError> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                frame = frames.recv() => match frame {
                    Some(frame) => self.frames.lock().unwrap().push(frame),
                    None => return Ok(()),
                },
            }
        }
    }

    async fn close(&self) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

fn test_config() -> EngineConfig {
    EngineConfig {
        system_prompt: "Be brief.".into(),
        max_history_size: 10,
        sample_rate: 16_000,
        silence_timeout: Duration::from_millis(50),
        playback: PlaybackFormat {
            frames_per_buffer: 2,
            channels: 1,
            bytes_per_sample: 2,
        },
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within 5s");
        sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn completed_turn_speaks_padded_frames_and_records_history() {
    let sink = Arc::new(CollectingSink::default());
    let engine = Arc::new(Engine::new(
        test_config(),
        Arc::new(SilentSource),
        Arc::new(ScriptedRecognizer::new(vec![TurnScript::Say("hello")])),
        Arc::new(StaticGenerator { reply: "world" }),
        Arc::new(ChunkSynthesizer {
            chunks: vec![vec![1, 2, 3], vec![4, 5]],
            close_fails: false,
        }),
        sink.clone(),
    ));

    let cancel = CancellationToken::new();
    let runner = {
        let engine = engine.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.run(cancel).await })
    };

    let history = engine.history();
    wait_for(|| history.len() == 1).await;

    let entry = &history.snapshot()[0];
    assert_eq!(entry.user_input, "hello ");
    assert_eq!(entry.ai_response, "world");

    // Frame size is 2 * 1 * 2 = 4 bytes; five payload bytes make one full
    // frame plus one zero-padded frame.
    let frames = sink.frames.lock().unwrap().clone();
    assert_eq!(frames, vec![vec![1, 2, 3, 4], vec![5, 0, 0, 0]]);

    cancel.cancel();
    let result = timeout(Duration::from_secs(5), runner).await.unwrap().unwrap();
    assert!(matches!(result, Err(EngineError::Cancelled)));
    assert!(!engine.is_running());
}

#[tokio::test]
async fn generation_failure_abandons_turn_without_history() {
    let generator = Arc::new(FailingGenerator {
        calls: AtomicUsize::new(0),
    });
    let engine = Arc::new(Engine::new(
        test_config(),
        Arc::new(SilentSource),
        Arc::new(ScriptedRecognizer::new(vec![TurnScript::Say("hi there")])),
        generator.clone(),
        Arc::new(ChunkSynthesizer {
            chunks: vec![],
            close_fails: false,
        }),
        Arc::new(CollectingSink::default()),
    ));

    let cancel = CancellationToken::new();
    let runner = {
        let engine = engine.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.run(cancel).await })
    };

    wait_for(|| generator.calls.load(Ordering::SeqCst) >= 1).await;
    // Give the abandoned turn time to (incorrectly) record anything.
    sleep(Duration::from_millis(50)).await;
    assert!(engine.history().is_empty());

    cancel.cancel();
    let result = timeout(Duration::from_secs(5), runner).await.unwrap().unwrap();
    assert!(matches!(result, Err(EngineError::Cancelled)));
}

#[tokio::test]
async fn cancellation_mid_synthesis_stops_without_history_append() {
    let sink = Arc::new(CollectingSink::default());
    let engine = Arc::new(Engine::new(
        test_config(),
        Arc::new(SilentSource),
        Arc::new(ScriptedRecognizer::new(vec![TurnScript::Say("go")])),
        Arc::new(StaticGenerator { reply: "stalling" }),
        Arc::new(StallingSynthesizer),
        sink.clone(),
    ));

    let cancel = CancellationToken::new();
    let runner = {
        let engine = engine.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.run(cancel).await })
    };

    // Wait until synthesis has produced the first frame, then cancel while
    // the synthesizer is stalled mid-stream.
    wait_for(|| !sink.frames.lock().unwrap().is_empty()).await;
    cancel.cancel();

    let result = timeout(Duration::from_secs(5), runner).await.unwrap().unwrap();
    assert!(matches!(result, Err(EngineError::Cancelled)));
    assert!(engine.history().is_empty());
    assert!(!engine.is_running());
}

#[tokio::test]
async fn concurrent_runs_admit_exactly_one() {
    let engine = Arc::new(Engine::new(
        test_config(),
        Arc::new(SilentSource),
        Arc::new(ScriptedRecognizer::new(vec![])),
        Arc::new(StaticGenerator { reply: "unused" }),
        Arc::new(ChunkSynthesizer {
            chunks: vec![],
            close_fails: false,
        }),
        Arc::new(CollectingSink::default()),
    ));

    let cancel = CancellationToken::new();
    let runner = {
        let engine = engine.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.run(cancel).await })
    };

    {
        let engine = engine.clone();
        wait_for(move || engine.is_running()).await;
    }
    let second = engine.run(CancellationToken::new()).await;
    assert!(matches!(second, Err(EngineError::AlreadyRunning)));
    assert!(engine.is_running());

    cancel.cancel();
    let result = timeout(Duration::from_secs(5), runner).await.unwrap().unwrap();
    assert!(matches!(result, Err(EngineError::Cancelled)));
}

#[tokio::test]
async fn device_init_failure_aborts_before_the_loop() {
    let engine = Engine::new(
        test_config(),
        Arc::new(BrokenSource),
        Arc::new(ScriptedRecognizer::new(vec![])),
        Arc::new(StaticGenerator { reply: "unused" }),
        Arc::new(ChunkSynthesizer {
            chunks: vec![],
            close_fails: false,
        }),
        Arc::new(CollectingSink::default()),
    );

    let result = engine.run(CancellationToken::new()).await;
    assert!(matches!(result, Err(EngineError::Init(_))));
    assert!(!engine.is_running());
    assert!(engine.history().is_empty());
}

#[tokio::test]
async fn history_context_grows_across_turns() {
    let generator = Arc::new(ContextRecorder {
        contexts: Mutex::new(Vec::new()),
    });
    let engine = Arc::new(Engine::new(
        test_config(),
        Arc::new(SilentSource),
        Arc::new(ScriptedRecognizer::new(vec![
            TurnScript::Say("first"),
            TurnScript::Say("second"),
        ])),
        generator.clone(),
        Arc::new(ChunkSynthesizer {
            chunks: vec![vec![0; 4]],
            close_fails: false,
        }),
        Arc::new(CollectingSink::default()),
    ));

    let cancel = CancellationToken::new();
    let runner = {
        let engine = engine.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.run(cancel).await })
    };

    let history = engine.history();
    wait_for(|| history.len() == 2).await;
    cancel.cancel();
    let _ = timeout(Duration::from_secs(5), runner).await.unwrap().unwrap();

    let contexts = generator.contexts.lock().unwrap().clone();
    assert_eq!(contexts.len(), 2);
    // First turn: no history yet, context is the bare system prompt.
    assert_eq!(contexts[0], "Be brief.");
    // Second turn: first exchange rendered ahead of the prompt.
    assert!(contexts[1].starts_with("Previous conversation history:\n"));
    assert!(contexts[1].contains("User: first"));
    assert!(contexts[1].contains("Assistant: echo first"));
    assert!(contexts[1].ends_with("Be brief."));

    let snap = history.snapshot();
    assert_eq!(snap[0].user_input, "first ");
    assert_eq!(snap[1].user_input, "second ");
}

#[tokio::test]
async fn stop_aggregates_every_close_failure() {
    let recognizer = Arc::new(ScriptedRecognizer {
        turns: Mutex::new(VecDeque::new()),
        close_fails: true,
    });
    let engine = Engine::new(
        test_config(),
        Arc::new(SilentSource),
        recognizer,
        Arc::new(StaticGenerator { reply: "unused" }),
        Arc::new(ChunkSynthesizer {
            chunks: vec![],
            close_fails: true,
        }),
        Arc::new(CollectingSink::default()),
    );

    match engine.stop().await {
        Err(EngineError::Shutdown(agg)) => {
            assert_eq!(agg.failures.len(), 2);
            let components: Vec<_> = agg.failures.iter().map(|(c, _)| *c).collect();
            assert!(components.contains(&"recognizer"));
            assert!(components.contains(&"synthesizer"));
        }
        other => panic!("expected aggregated shutdown failure, got {other:?}"),
    }
}
