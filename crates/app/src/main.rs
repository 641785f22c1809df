use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;

use voxloop_audio::{CaptureConfig, CpalSink, CpalSource, PlaybackConfig};
use voxloop_cloud::{
    ChatConfig, DeepgramConfig, DeepgramRecognizer, DeepgramSynthesizer, OpenAiGenerator,
    SpeakConfig,
};
use voxloop_core::{Engine, EngineConfig, PlaybackFormat, SynthesisOptions};
use voxloop_foundation::{EngineError, ShutdownHandler};

#[derive(Parser, Debug)]
#[command(name = "voxloop", about = "Spoken-dialogue assistant")]
struct Args {
    /// Capture device name (host default when omitted)
    #[arg(long)]
    device: Option<String>,

    /// Playback device name (host default when omitted)
    #[arg(long)]
    output_device: Option<String>,

    /// Capture sample rate in Hz
    #[arg(long, default_value_t = 44_100)]
    sample_rate: u32,

    /// Playback sample rate in Hz
    #[arg(long, default_value_t = 22_050)]
    playback_sample_rate: u32,

    /// Playback buffer size in sample frames
    #[arg(long, default_value_t = 2048)]
    frames_per_buffer: usize,

    /// Silence timeout ending an utterance, in milliseconds
    #[arg(long, default_value_t = 3000)]
    silence_timeout_ms: u64,

    /// Retained conversation exchanges
    #[arg(long, default_value_t = 10)]
    history_size: usize,

    /// System prompt appended after the conversation history
    #[arg(
        long,
        env = "VOXLOOP_SYSTEM_PROMPT",
        default_value = "You are a helpful voice assistant. Keep replies short enough to speak aloud."
    )]
    system_prompt: String,

    /// Deepgram API key (speech recognition and synthesis)
    #[arg(long, env = "DEEPGRAM_API_KEY")]
    deepgram_api_key: String,

    /// Recognition model
    #[arg(long, default_value = "nova-2")]
    stt_model: String,

    /// Recognition language
    #[arg(long, default_value = "en")]
    language: String,

    /// Synthesis voice model
    #[arg(long, default_value = "aura-asteria-en")]
    speak_model: String,

    /// API key for the reply-generation endpoint
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_api_key: String,

    /// Reply-generation model
    #[arg(long, env = "VOXLOOP_CHAT_MODEL", default_value = "gpt-4o-mini")]
    chat_model: String,

    /// OpenAI-compatible chat-completions URL
    #[arg(
        long,
        env = "VOXLOOP_CHAT_ENDPOINT",
        default_value = "https://api.openai.com/v1/chat/completions"
    )]
    chat_endpoint: String,
}

fn init_logging() -> anyhow::Result<()> {
    std::fs::create_dir_all("logs")?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, "logs", "voxloop.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_writer(std::io::stdout.and(non_blocking_file))
        .with_env_filter(log_level)
        .init();
    std::mem::forget(guard);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging()?;
    tracing::info!("Starting voxloop");

    let engine_config = EngineConfig {
        system_prompt: args.system_prompt.clone(),
        max_history_size: args.history_size,
        sample_rate: args.sample_rate,
        silence_timeout: Duration::from_millis(args.silence_timeout_ms),
        playback: PlaybackFormat {
            frames_per_buffer: args.frames_per_buffer,
            channels: 1,
            bytes_per_sample: 2,
        },
    };

    let source = Arc::new(CpalSource::new(CaptureConfig {
        device: args.device.clone(),
        sample_rate: args.sample_rate,
        channels: 1,
    }));
    let sink = Arc::new(CpalSink::new(PlaybackConfig {
        device: args.output_device.clone(),
        sample_rate: args.playback_sample_rate,
        channels: 1,
        frames_per_buffer: args.frames_per_buffer,
    }));

    let recognizer = Arc::new(DeepgramRecognizer::new(DeepgramConfig {
        model: args.stt_model.clone(),
        language: args.language.clone(),
        ..DeepgramConfig::new(args.deepgram_api_key.clone())
    }));
    let synthesizer = Arc::new(DeepgramSynthesizer::new(SpeakConfig {
        model: args.speak_model.clone(),
        sample_rate: args.playback_sample_rate,
        ..SpeakConfig::new(args.deepgram_api_key.clone())
    }));
    let generator = Arc::new(OpenAiGenerator::new(ChatConfig {
        model: args.chat_model.clone(),
        endpoint: args.chat_endpoint.clone(),
        ..ChatConfig::new(args.openai_api_key.clone())
    }));

    let engine = Engine::new(
        engine_config,
        source,
        recognizer,
        generator,
        synthesizer,
        sink,
    )
    .with_synthesis_options(SynthesisOptions {
        model: args.speak_model,
        ..Default::default()
    });

    let shutdown = ShutdownHandler::new().install().await;
    tracing::info!("Press Ctrl-C to stop");

    let run_result = engine.run(shutdown.token()).await;
    let stop_result = engine.stop().await;

    match run_result {
        Ok(()) | Err(EngineError::Cancelled) => {
            tracing::info!("Engine stopped");
        }
        Err(e) => {
            tracing::error!("Engine failed: {}", e);
            if let Err(stop) = stop_result {
                tracing::error!("Shutdown incomplete: {}", stop);
            }
            return Err(e.into());
        }
    }

    stop_result.map_err(|e| anyhow::anyhow!("shutdown incomplete: {e}"))?;
    tracing::info!("Shutdown complete");
    Ok(())
}
