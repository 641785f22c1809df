use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed-size frame geometry the playback device expects.
///
/// The reframer emits frames of exactly `frame_bytes()` so the sink never
/// receives a short write.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlaybackFormat {
    /// Sample frames per device buffer.
    pub frames_per_buffer: usize,
    /// Output channel count.
    pub channels: u16,
    /// Bytes per sample (i16 little-endian PCM).
    pub bytes_per_sample: usize,
}

impl Default for PlaybackFormat {
    fn default() -> Self {
        Self {
            frames_per_buffer: 2048,
            channels: 1,
            bytes_per_sample: 2,
        }
    }
}

impl PlaybackFormat {
    pub fn frame_bytes(&self) -> usize {
        self.frames_per_buffer * self.bytes_per_sample * self.channels as usize
    }
}

/// Engine configuration. Zero-valued fields take defaults via [`normalized`].
///
/// [`normalized`]: EngineConfig::normalized
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// System prompt appended after the rendered conversation history.
    pub system_prompt: String,
    /// Maximum number of retained conversation entries (>= 1).
    pub max_history_size: usize,
    /// Capture sample rate in Hz.
    pub sample_rate: u32,
    /// Maximum gap between recognized fragments before a turn is considered
    /// finished (> 0).
    pub silence_timeout: Duration,
    /// Playback frame geometry used by the reframer.
    pub playback: PlaybackFormat,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            max_history_size: 10,
            sample_rate: 44_100,
            silence_timeout: Duration::from_secs(3),
            playback: PlaybackFormat::default(),
        }
    }
}

impl EngineConfig {
    /// Applies defaults to zero-valued fields: history 10, timeout 3s,
    /// sample rate 44100 Hz, and playback geometry 2048 frames x 1 channel
    /// x 2 bytes. Zero geometry would otherwise make the frame size
    /// degenerate.
    pub fn normalized(mut self) -> Self {
        if self.max_history_size == 0 {
            self.max_history_size = 10;
        }
        if self.silence_timeout.is_zero() {
            self.silence_timeout = Duration::from_secs(3);
        }
        if self.sample_rate == 0 {
            self.sample_rate = 44_100;
        }
        if self.playback.frames_per_buffer == 0 {
            self.playback.frames_per_buffer = 2048;
        }
        if self.playback.channels == 0 {
            self.playback.channels = 1;
        }
        if self.playback.bytes_per_sample == 0 {
            self.playback.bytes_per_sample = 2;
        }
        self
    }
}

/// Options forwarded verbatim to the synthesis collaborator.
///
/// The engine does not interpret these beyond defaulting; the format and
/// loudness tags are opaque to the core and only meaningful to a concrete
/// synthesizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisOptions {
    pub voice: String,
    pub speed: f64,
    pub volume: f64,
    pub model: String,
    pub format: Option<String>,
    pub loudness_normalization: Option<String>,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            voice: "jane".to_string(),
            speed: 1.0,
            volume: 1.0,
            model: "tts-1".to_string(),
            format: None,
            loudness_normalization: None,
        }
    }
}
