//! Audio subsystem module
//!
//! The core talks to sound hardware only through [`AudioBackend`]. The
//! shipped implementation is [`CpalBackend`]; tests plug in their own.

pub mod buffer;
pub mod capture;
pub mod device;
pub mod playback;

pub use buffer::{AudioFrame, BlockAssembler, FrameReader, RingBuffer};
pub use capture::CaptureFanout;
pub use device::{find_loopback, CaptureSource, CpalBackend};
pub use playback::AudioPlayback;

use crate::error::AudioError;

/// Fixed PCM layout shared by every peer: interleaved little-endian `i16`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per block
    pub block_size: u32,
}

impl StreamFormat {
    /// Interleaved samples in one block
    pub fn samples_per_block(&self) -> usize {
        self.block_size as usize * self.channels as usize
    }

    /// Bytes in one block on the wire
    pub fn block_bytes(&self) -> usize {
        self.samples_per_block() * std::mem::size_of::<i16>()
    }
}

/// Called from the audio subsystem's real-time context with captured samples
pub type SampleCallback = Box<dyn FnMut(&[i16]) + Send + 'static>;

/// An open capture stream. Dropping or closing it stops the callbacks.
pub trait CaptureStream: Send {
    fn close(&mut self);
}

/// An open output stream accepting raw wire blocks
pub trait PlaybackSink: Send {
    fn write(&mut self, block: &[u8]);
    fn close(&mut self);
}

/// Collaborator interface to the platform audio stack
pub trait AudioBackend: Send + Sync {
    fn capture_sources(&self) -> Vec<CaptureSource>;

    fn open_capture(
        &self,
        source: &CaptureSource,
        format: StreamFormat,
        on_samples: SampleCallback,
    ) -> Result<Box<dyn CaptureStream>, AudioError>;

    fn open_playback(&self, format: StreamFormat) -> Result<Box<dyn PlaybackSink>, AudioError>;
}
