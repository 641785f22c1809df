//! cpal-backed audio device collaborators.
//!
//! Capture and playback each run their cpal stream on a dedicated blocking
//! thread (cpal streams are not `Send`) and bridge to the async engine
//! through channels and shared queues. All PCM on the wire is i16
//! little-endian.

pub mod capture;
pub mod pcm;
pub mod playback;

pub use capture::{CaptureConfig, CpalSource};
pub use playback::{CpalSink, PlaybackConfig};
