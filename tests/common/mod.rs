//! In-memory LAN and audio doubles shared by the integration tests

#![allow(dead_code)]

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use lan_audio_sync::audio::{
    AudioBackend, CaptureSource, CaptureStream, PlaybackSink, SampleCallback, StreamFormat,
};
use lan_audio_sync::config::AppConfig;
use lan_audio_sync::error::AudioError;
use lan_audio_sync::network::{Connector, DatagramSocket};
use lan_audio_sync::{Event, Node};

struct Datagram {
    from: IpAddr,
    to: SocketAddr,
    payload: Vec<u8>,
}

/// A broadcast domain routing datagrams between nodes in this process
///
/// Discovery and control traffic is handed to the addressed node directly;
/// audio is forwarded over loopback UDP to the node's playback socket.
pub struct Lan {
    tx: Sender<Datagram>,
    nodes: Arc<Mutex<HashMap<IpAddr, Weak<Node>>>>,
}

impl Lan {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        let nodes = Arc::new(Mutex::new(HashMap::new()));
        let routes = nodes.clone();

        thread::Builder::new()
            .name("fake-lan".into())
            .spawn(move || route(rx, routes))
            .unwrap();

        Self { tx, nodes }
    }

    /// Attach a node with address `10.0.0.<host>`
    pub fn join(&self, host: u8, backend: Arc<FakeBackend>) -> Arc<Node> {
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, host));
        let connector = Arc::new(LanConnector { ip, tx: self.tx.clone() });
        let node = Arc::new(Node::with_connector(test_config(), ip, connector, backend).unwrap());
        self.nodes.lock().insert(ip, Arc::downgrade(&node));
        node
    }
}

fn route(rx: Receiver<Datagram>, nodes: Arc<Mutex<HashMap<IpAddr, Weak<Node>>>>) {
    let config = test_config();
    let Ok(audio_out) = UdpSocket::bind("127.0.0.1:0") else {
        return;
    };

    for datagram in rx.iter() {
        let source = SocketAddr::new(datagram.from, 40000);
        let port = datagram.to.port();

        let targets: Vec<Arc<Node>> = {
            let nodes = nodes.lock();
            if datagram.to.ip() == IpAddr::V4(Ipv4Addr::BROADCAST) {
                nodes.values().filter_map(Weak::upgrade).collect()
            } else {
                nodes.get(&datagram.to.ip()).and_then(Weak::upgrade).into_iter().collect()
            }
        };

        for node in targets {
            if port == config.network.broadcast_port {
                node.handle_broadcast(&datagram.payload, source);
            } else if port == config.network.control_port {
                node.handle_control(&datagram.payload, source);
            } else if port == config.network.audio_port {
                if let Some(addr) = node.playback_addr() {
                    let _ = audio_out.send_to(&datagram.payload, (Ipv4Addr::LOCALHOST, addr.port()));
                }
            }
        }
    }
}

/// Fast timings; audio port 0 so each receiver binds its own loopback port
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.network.announce_interval_ms = 20;
    config.network.probe_interval_ms = 20;
    config.network.recv_timeout_ms = 20;
    config.network.audio_port = 0;
    config
}

struct LanConnector {
    ip: IpAddr,
    tx: Sender<Datagram>,
}

impl Connector for LanConnector {
    fn open(&self, _broadcast: bool) -> io::Result<Arc<dyn DatagramSocket>> {
        Ok(Arc::new(LanSocket {
            ip: self.ip,
            tx: self.tx.clone(),
        }))
    }
}

struct LanSocket {
    ip: IpAddr,
    tx: Sender<Datagram>,
}

impl DatagramSocket for LanSocket {
    fn send_to(&self, payload: &[u8], dest: SocketAddr) -> io::Result<usize> {
        self.tx
            .send(Datagram {
                from: self.ip,
                to: dest,
                payload: payload.to_vec(),
            })
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "lan is gone"))?;
        Ok(payload.len())
    }
}

/// Audio backend with a scripted loopback source and a recording output
#[derive(Default)]
pub struct FakeBackend {
    pub loopback: bool,
    callback: Arc<Mutex<Option<SampleCallback>>>,
    played: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl FakeBackend {
    pub fn with_loopback() -> Arc<Self> {
        Arc::new(Self {
            loopback: true,
            ..Default::default()
        })
    }

    pub fn without_loopback() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Push samples as if the capture device produced them
    pub fn feed(&self, samples: &[i16]) {
        if let Some(callback) = self.callback.lock().as_mut() {
            callback(samples);
        }
    }

    pub fn played(&self) -> Vec<Vec<u8>> {
        self.played.lock().clone()
    }
}

struct FakeCapture;

impl CaptureStream for FakeCapture {
    fn close(&mut self) {}
}

struct FakeSink(Arc<Mutex<Vec<Vec<u8>>>>);

impl PlaybackSink for FakeSink {
    fn write(&mut self, block: &[u8]) {
        self.0.lock().push(block.to_vec());
    }

    fn close(&mut self) {}
}

impl AudioBackend for FakeBackend {
    fn capture_sources(&self) -> Vec<CaptureSource> {
        let mut sources = vec![CaptureSource::input("Built-in Microphone")];
        if self.loopback {
            sources.push(CaptureSource::input("Stereo Mix"));
        }
        sources
    }

    fn open_capture(
        &self,
        _source: &CaptureSource,
        _format: StreamFormat,
        on_samples: SampleCallback,
    ) -> Result<Box<dyn CaptureStream>, AudioError> {
        *self.callback.lock() = Some(on_samples);
        Ok(Box::new(FakeCapture))
    }

    fn open_playback(&self, _format: StreamFormat) -> Result<Box<dyn PlaybackSink>, AudioError> {
        Ok(Box::new(FakeSink(self.played.clone())))
    }
}

/// Wait for the first event matching `pred`, skipping others
pub fn wait_for<F>(events: &Receiver<Event>, timeout: Duration, mut pred: F) -> Option<Event>
where
    F: FnMut(&Event) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        let left = deadline.checked_duration_since(Instant::now())?;
        match events.recv_timeout(left) {
            Ok(event) if pred(&event) => return Some(event),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

/// Poll `check` until it holds or `timeout` passes
pub fn eventually<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}
