//! Turn-orchestration engine for spoken dialogue.
//!
//! One turn is listen -> transcribe -> generate -> speak. The engine drives
//! that cycle against five narrow collaborator capabilities (audio source,
//! recognizer, reply generator, synthesizer, audio sink), detecting the end
//! of an utterance with a silence timeout, reframing synthesized audio into
//! fixed-size playback frames, and keeping a bounded conversation history.

pub mod collaborator;
pub mod config;
pub mod engine;
pub mod history;
pub mod reframe;
pub mod turn;

pub use collaborator::{
    AudioChunk, AudioSink, AudioSource, Recognizer, ReplyGenerator, Synthesizer,
};
pub use config::{EngineConfig, PlaybackFormat, SynthesisOptions};
pub use engine::Engine;
pub use history::{ConversationEntry, ConversationHistory};
pub use reframe::AudioFrameReframer;
pub use turn::TurnCapture;
