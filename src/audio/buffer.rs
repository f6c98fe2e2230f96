//! Block buffers for the streaming pipeline
//!
//! - [`BlockAssembler`] cuts whatever the capture callback delivers into
//!   fixed-size blocks.
//! - [`RingBuffer`] is a lock-free single-producer single-consumer queue
//!   between the network receive loop and the output callback.
//! - [`FrameReader`] drains that queue sample by sample inside the output
//!   callback, emitting silence on underrun.

use bytes::Bytes;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One received block of raw interleaved little-endian `i16` PCM
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioFrame {
    pub payload: Bytes,
}

impl AudioFrame {
    pub fn new(payload: Bytes) -> Self {
        Self { payload }
    }

    /// Number of whole samples; a trailing odd byte is ignored
    pub fn sample_count(&self) -> usize {
        self.payload.len() / 2
    }

    pub fn sample(&self, index: usize) -> i16 {
        i16::from_le_bytes([self.payload[2 * index], self.payload[2 * index + 1]])
    }
}

/// Lock-free ring buffer for audio frames
pub struct RingBuffer {
    queue: ArrayQueue<AudioFrame>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl RingBuffer {
    /// Create a new ring buffer with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push a frame into the buffer
    /// Returns false if buffer is full (overflow)
    pub fn push(&self, frame: AudioFrame) -> bool {
        match self.queue.push(frame) {
            Ok(()) => true,
            Err(_) => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Pop a frame from the buffer
    /// Returns None if buffer is empty (underrun)
    pub fn pop(&self) -> Option<AudioFrame> {
        match self.queue.pop() {
            Some(frame) => Some(frame),
            None => {
                self.underrun_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a ring buffer
pub type SharedRingBuffer = Arc<RingBuffer>;

/// Create a new shared ring buffer
pub fn create_shared_buffer(capacity: usize) -> SharedRingBuffer {
    Arc::new(RingBuffer::new(capacity))
}

/// Regroups arbitrary sample runs into blocks of exactly `block_len` samples
pub struct BlockAssembler {
    block_len: usize,
    pending: Vec<i16>,
}

impl BlockAssembler {
    pub fn new(block_len: usize) -> Self {
        let block_len = block_len.max(1);
        Self {
            block_len,
            pending: Vec::with_capacity(block_len * 2),
        }
    }

    /// Append samples, calling `emit` once per completed block
    pub fn push(&mut self, samples: &[i16], mut emit: impl FnMut(&[i16])) {
        let mut input = samples;

        // Top up a partial block first
        if !self.pending.is_empty() {
            let take = (self.block_len - self.pending.len()).min(input.len());
            self.pending.extend_from_slice(&input[..take]);
            input = &input[take..];
            if self.pending.len() < self.block_len {
                return;
            }
            emit(&self.pending);
            self.pending.clear();
        }

        let mut chunks = input.chunks_exact(self.block_len);
        for block in &mut chunks {
            emit(block);
        }
        self.pending.extend_from_slice(chunks.remainder());
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Sample cursor over a [`RingBuffer`], used from the output callback
#[derive(Default)]
pub struct FrameReader {
    current: Option<AudioFrame>,
    position: usize,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill `out` with queued samples converted to `f32`, then silence.
    /// Returns the number of samples that came from the queue.
    pub fn fill(&mut self, queue: &RingBuffer, out: &mut [f32]) -> usize {
        let mut written = 0;

        for slot in out.iter_mut() {
            match self.next_sample(queue) {
                Some(sample) => {
                    *slot = sample as f32 / i16::MAX as f32;
                    written += 1;
                }
                None => *slot = 0.0,
            }
        }

        written
    }

    fn next_sample(&mut self, queue: &RingBuffer) -> Option<i16> {
        loop {
            if let Some(frame) = &self.current {
                if self.position < frame.sample_count() {
                    let sample = frame.sample(self.position);
                    self.position += 1;
                    return Some(sample);
                }
            }
            self.current = Some(queue.pop()?);
            self.position = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(samples: &[i16]) -> AudioFrame {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        AudioFrame::new(Bytes::from(bytes))
    }

    #[test]
    fn test_ring_buffer_basic() {
        let buffer = RingBuffer::new(2);

        assert!(buffer.push(frame(&[1])));
        assert!(buffer.push(frame(&[2])));
        assert!(!buffer.push(frame(&[3])));
        assert_eq!(buffer.overflow_count(), 1);

        assert_eq!(buffer.pop().unwrap(), frame(&[1]));
        assert_eq!(buffer.pop().unwrap(), frame(&[2]));
        assert!(buffer.pop().is_none());
        assert_eq!(buffer.underrun_count(), 1);
    }

    #[test]
    fn test_frame_ignores_trailing_byte() {
        let f = AudioFrame::new(Bytes::from_static(&[0x01, 0x00, 0xff, 0xff, 0x07]));
        assert_eq!(f.sample_count(), 2);
        assert_eq!(f.sample(0), 1);
        assert_eq!(f.sample(1), -1);
    }

    #[test]
    fn test_assembler_emits_fixed_blocks() {
        let mut assembler = BlockAssembler::new(512);
        let mut blocks = Vec::new();

        assembler.push(&vec![1i16; 300], |b| blocks.push(b.to_vec()));
        assert!(blocks.is_empty());

        assembler.push(&vec![2i16; 800], |b| blocks.push(b.to_vec()));
        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().all(|b| b.len() == 512));
        assert_eq!(blocks[0][299], 1);
        assert_eq!(blocks[0][300], 2);
        assert_eq!(assembler.pending(), 1100 - 1024);
    }

    #[test]
    fn test_assembler_exact_multiple_leaves_nothing() {
        let mut assembler = BlockAssembler::new(4);
        let mut count = 0;
        assembler.push(&[0; 12], |_| count += 1);
        assert_eq!(count, 3);
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn test_reader_spans_frames_and_pads_with_silence() {
        let queue = RingBuffer::new(4);
        queue.push(frame(&[i16::MAX, 0]));
        queue.push(frame(&[i16::MAX]));

        let mut reader = FrameReader::new();
        let mut out = [9.0f32; 5];
        assert_eq!(reader.fill(&queue, &mut out), 3);
        assert_eq!(out, [1.0, 0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_reader_keeps_position_between_callbacks() {
        let queue = RingBuffer::new(4);
        queue.push(frame(&[1, 2, 3, 4]));

        let mut reader = FrameReader::new();
        let mut out = [0.0f32; 3];
        reader.fill(&queue, &mut out);
        let mut rest = [0.0f32; 1];
        assert_eq!(reader.fill(&queue, &mut rest), 1);
        assert_eq!(rest[0], 4.0 / i16::MAX as f32);
    }
}
