//! Network playback
//!
//! A dedicated thread owns the audio-port socket and an output sink. Every
//! datagram is written to the sink as it arrives: no reordering, no jitter
//! buffer, no gap filling. The socket has a read timeout so a stop request
//! is observed within one timeout period.

use bytes::Bytes;
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::bounded;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{create_shared_buffer, AudioFrame, FrameReader, SharedRingBuffer};
use crate::audio::device::{get_default_output_device, stream_config};
use crate::audio::{PlaybackSink, StreamFormat};
use crate::error::{AudioError, NetworkError};
use crate::network::udp::{bind_listener, is_timeout, MAX_DATAGRAM_SIZE};

/// Receive loop feeding a [`PlaybackSink`]
pub struct AudioPlayback {
    running: Arc<AtomicBool>,
    local_addr: SocketAddr,
    datagrams: Arc<AtomicU64>,
    thread_handle: Option<JoinHandle<()>>,
}

impl AudioPlayback {
    /// Bind the audio port and start forwarding datagrams into `sink`
    pub fn start(port: u16, timeout: Duration, sink: Box<dyn PlaybackSink>) -> Result<Self, NetworkError> {
        let socket = bind_listener(port, false, timeout)?;
        Self::with_socket(socket, sink)
    }

    pub fn with_socket(socket: UdpSocket, mut sink: Box<dyn PlaybackSink>) -> Result<Self, NetworkError> {
        let local_addr = socket
            .local_addr()
            .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;
        let running = Arc::new(AtomicBool::new(true));
        let datagrams = Arc::new(AtomicU64::new(0));

        let running_for_loop = running.clone();
        let counter = datagrams.clone();

        let handle = thread::Builder::new()
            .name("audio-receive".into())
            .spawn(move || {
                let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
                while running_for_loop.load(Ordering::Relaxed) {
                    match socket.recv_from(&mut buf) {
                        Ok((n, _)) => {
                            sink.write(&buf[..n]);
                            counter.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) if is_timeout(&e) => continue,
                        Err(e) => {
                            tracing::warn!("Audio receive loop stopped: {}", e);
                            break;
                        }
                    }
                }
                sink.close();
                // Socket is dropped here, closing it
            })
            .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;

        tracing::info!("Playback listening on {}", local_addr);

        Ok(Self {
            running,
            local_addr,
            datagrams,
            thread_handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Datagrams written to the sink so far
    pub fn datagrams_received(&self) -> u64 {
        self.datagrams.load(Ordering::Relaxed)
    }

    /// Stop the loop and wait for it. Safe to call more than once.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!("Playback stopped after {} datagrams", self.datagrams_received());
        }
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

/// cpal output stream fed from a ring buffer of received blocks
pub struct CpalPlayback {
    buffer: SharedRingBuffer,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalPlayback {
    pub fn open(format: StreamFormat, queue_blocks: usize) -> Result<Self, AudioError> {
        let buffer = create_shared_buffer(queue_blocks);
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let running_for_loop = running.clone();
        let queue = buffer.clone();

        let handle = thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || {
                let stream = (|| {
                    let device = get_default_output_device()?;
                    let default_config = device.default_output_config()?;
                    let config = stream_config(format, default_config.buffer_size());

                    let mut reader = FrameReader::new();
                    let stream = device.build_output_stream(
                        &config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            reader.fill(&queue, data);
                        },
                        |err| tracing::warn!("Output stream error: {}", err),
                        None,
                    )?;
                    stream.play().map_err(|e| AudioError::StreamError(e.to_string()))?;
                    Ok::<_, AudioError>(stream)
                })();

                match stream {
                    Ok(_stream) => {
                        let _ = ready_tx.send(Ok(()));
                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(AudioError::StreamError("output thread exited".into())));

        let mut playback = Self {
            buffer,
            running,
            thread_handle: Some(handle),
        };
        match ready {
            Ok(()) => Ok(playback),
            Err(e) => {
                playback.close();
                Err(e)
            }
        }
    }
}

impl PlaybackSink for CpalPlayback {
    fn write(&mut self, block: &[u8]) {
        if !self.buffer.push(AudioFrame::new(Bytes::copy_from_slice(block))) {
            tracing::trace!("Playback queue full, dropped block");
        }
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::debug!(
                "Output closed ({} blocks dropped, {} underruns)",
                self.buffer.overflow_count(),
                self.buffer.underrun_count()
            );
        }
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Instant;

    #[derive(Default, Clone)]
    struct Recorder {
        blocks: Arc<Mutex<Vec<Vec<u8>>>>,
        closes: Arc<AtomicU64>,
    }

    impl PlaybackSink for Recorder {
        fn write(&mut self, block: &[u8]) {
            self.blocks.lock().push(block.to_vec());
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_datagrams_are_written_in_arrival_order() {
        let recorder = Recorder::default();
        let mut playback = AudioPlayback::start(0, Duration::from_millis(50), Box::new(recorder.clone())).unwrap();
        let target = SocketAddr::from(([127, 0, 0, 1], playback.local_addr().port()));

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(&[1, 0, 2, 0], target).unwrap();
        sender.send_to(&[3, 0], target).unwrap();

        assert!(wait_for(|| recorder.blocks.lock().len() == 2));
        assert_eq!(*recorder.blocks.lock(), vec![vec![1, 0, 2, 0], vec![3, 0]]);
        assert_eq!(playback.datagrams_received(), 2);
        playback.stop();
    }

    #[test]
    fn test_stop_twice_closes_sink_once() {
        let recorder = Recorder::default();
        let mut playback = AudioPlayback::start(0, Duration::from_millis(20), Box::new(recorder.clone())).unwrap();

        let started = Instant::now();
        playback.stop();
        playback.stop();
        drop(playback);

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);
    }
}
