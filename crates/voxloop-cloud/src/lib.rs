//! Network collaborators: a WebSocket streaming recognizer, an HTTP
//! streaming synthesizer, and a single-shot chat-completion reply
//! generator. Each implements the corresponding voxloop-core capability
//! trait; the engine never sees provider specifics.

pub mod chat;
pub mod deepgram;
pub mod speak;

pub use chat::{ChatConfig, OpenAiGenerator};
pub use deepgram::{DeepgramConfig, DeepgramRecognizer};
pub use speak::{DeepgramSynthesizer, SpeakConfig};
