//! Reshapes a stream of arbitrarily-sized audio chunks into fixed-size
//! playback frames.
//!
//! Streaming synthesizers emit whatever chunk sizes the network hands them;
//! the playback device expects buffers of exactly one frame. The reframer
//! sits between the two, carrying a remainder across chunk boundaries and
//! zero-padding the final partial frame so the sink never sees a short
//! write. Empty input produces no output at all.

use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::collaborator::AudioChunk;

pub struct AudioFrameReframer {
    frame_bytes: usize,
}

impl AudioFrameReframer {
    /// `frame_bytes` must be > 0.
    pub fn new(frame_bytes: usize) -> Self {
        assert!(frame_bytes > 0, "frame size must be positive");
        Self { frame_bytes }
    }

    /// Pump chunks from `input` into exactly-sized frames on `output`.
    ///
    /// Returns when the input closes (after flushing the padded remainder)
    /// or when `cancel` fires, whichever comes first. Byte order is
    /// preserved; the accumulation buffer only ever holds less than one
    /// frame between chunks.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        mut input: mpsc::Receiver<AudioChunk>,
        output: mpsc::Sender<AudioChunk>,
    ) {
        let mut buffer: VecDeque<u8> = VecDeque::with_capacity(self.frame_bytes * 2);

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("Reframer cancelled, {} bytes discarded", buffer.len());
                    return;
                }
                chunk = input.recv() => chunk,
            };

            let Some(chunk) = chunk else {
                break;
            };
            buffer.extend(chunk);

            while buffer.len() >= self.frame_bytes {
                let frame: AudioChunk = buffer.drain(..self.frame_bytes).collect();
                if !self.send_frame(&cancel, &output, frame).await {
                    return;
                }
            }
        }

        // Input exhausted: pad the remainder on the right with zeros.
        if !buffer.is_empty() {
            let mut frame: AudioChunk = buffer.drain(..).collect();
            frame.resize(self.frame_bytes, 0);
            self.send_frame(&cancel, &output, frame).await;
        }
    }

    /// Blocking send that stays responsive to cancellation; no frames are
    /// dropped on this edge. Returns false once the stream is dead.
    async fn send_frame(
        &self,
        cancel: &CancellationToken,
        output: &mpsc::Sender<AudioChunk>,
        frame: AudioChunk,
    ) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            sent = output.send(frame) => sent.is_ok(),
        }
    }
}
