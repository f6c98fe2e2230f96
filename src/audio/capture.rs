//! Loopback capture and fan-out to connected receivers
//!
//! The audio subsystem drives capture through a callback. Each delivered run
//! of samples is cut into fixed blocks and every block is unicast, as raw
//! little-endian PCM, to every peer in the registry's connected set. There is
//! no buffering, retry or backpressure: a failed send to one peer is logged
//! and the next peer is tried.

use bytes::{BufMut, BytesMut};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::BlockAssembler;
use crate::audio::device::{capture_device, stream_config};
use crate::audio::{CaptureStream, SampleCallback, StreamFormat};
use crate::error::AudioError;
use crate::network::registry::PeerRegistry;

/// Sends captured blocks to every connected peer
pub struct CaptureFanout {
    registry: Arc<PeerRegistry>,
    audio_port: u16,
    assembler: BlockAssembler,
    wire: BytesMut,
    active: Arc<AtomicBool>,
    blocks_sent: Arc<AtomicU64>,
}

impl CaptureFanout {
    pub fn new(registry: Arc<PeerRegistry>, audio_port: u16, format: StreamFormat, active: Arc<AtomicBool>) -> Self {
        Self {
            registry,
            audio_port,
            assembler: BlockAssembler::new(format.samples_per_block()),
            wire: BytesMut::with_capacity(format.block_bytes()),
            active,
            blocks_sent: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared counter of blocks handed to the network
    pub fn blocks_sent(&self) -> Arc<AtomicU64> {
        self.blocks_sent.clone()
    }

    /// Feed captured samples. Does nothing once capture is marked inactive.
    pub fn on_samples(&mut self, samples: &[i16]) {
        if !self.active.load(Ordering::Relaxed) {
            self.assembler.clear();
            return;
        }

        let Self {
            registry,
            audio_port,
            assembler,
            wire,
            blocks_sent,
            ..
        } = self;

        assembler.push(samples, |block| {
            wire.clear();
            for &sample in block {
                wire.put_i16_le(sample);
            }
            send_block(registry, *audio_port, wire);
            blocks_sent.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub fn into_callback(mut self) -> SampleCallback {
        Box::new(move |samples| self.on_samples(samples))
    }
}

/// Unicast one block to every connected peer; returns how many sends succeeded
pub fn send_block(registry: &PeerRegistry, audio_port: u16, block: &[u8]) -> usize {
    let mut delivered = 0;
    for (peer_id, transport) in registry.snapshot_connected() {
        match transport.send(block, audio_port) {
            Ok(_) => delivered += 1,
            Err(e) => tracing::trace!("Dropped audio block for {}: {}", peer_id, e),
        }
    }
    delivered
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// cpal input stream kept alive on its own thread
///
/// cpal streams are not `Send` on every platform, so the stream is built and
/// owned by a dedicated thread that parks until the capture is closed.
pub struct CpalCapture {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalCapture {
    pub fn open(device_id: &str, format: StreamFormat, mut on_samples: SampleCallback) -> Result<Self, AudioError> {
        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let device_id = device_id.to_string();

        let handle = thread::Builder::new()
            .name("loopback-capture".into())
            .spawn(move || {
                let stream = (|| {
                    let (device, default_config) = capture_device(&device_id)?;
                    let config = stream_config(format, default_config.buffer_size());

                    let mut samples: Vec<i16> = Vec::with_capacity(format.samples_per_block());
                    let stream = device.build_input_stream(
                        &config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            samples.clear();
                            samples.extend(data.iter().copied().map(to_i16));
                            on_samples(&samples);
                        },
                        |err| tracing::warn!("Capture stream error: {}", err),
                        None,
                    )?;
                    stream.play().map_err(|e| AudioError::StreamError(e.to_string()))?;
                    Ok::<_, AudioError>(stream)
                })();

                match stream {
                    Ok(_stream) => {
                        let _ = ready_tx.send(Ok(()));
                        // Keep thread alive while running
                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                        // Stream is dropped here, stopping capture
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(AudioError::StreamError("capture thread exited".into())));

        let mut capture = Self {
            running,
            thread_handle: Some(handle),
        };
        match ready {
            Ok(()) => Ok(capture),
            Err(e) => {
                capture.close();
                Err(e)
            }
        }
    }
}

impl CaptureStream for CpalCapture {
    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.close();
    }
}
