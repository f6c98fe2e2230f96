//! The node: command surface of the streaming core
//!
//! A [`Node`] owns the session, the peer registry, the two always-on
//! listeners and whichever audio pipeline the current role needs. The
//! presentation layer drives it through commands and watches
//! [`Node::events`].
//!
//! Every role switch first performs a full reset: capture and playback are
//! stopped, the session drops to `Idle` (ending the periodic tasks of the
//! old role), and the registry is emptied with its transports closed.

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::audio::{find_loopback, AudioBackend, AudioPlayback, CaptureFanout, CaptureStream};
use crate::config::AppConfig;
use crate::error::{AudioError, Result, SessionError};
use crate::events::{self, Event, EventSink};
use crate::network::registry::{PeerId, PeerRecord, PeerRegistry};
use crate::network::udp::{self, bind_listener, spawn_listener, Connector, DatagramSocket, UdpConnector};
use crate::network::{control, discovery};
use crate::protocol::ChatMessage;
use crate::session::{Role, Session, SessionState};

/// State shared between the node and its network threads
pub(crate) struct Core {
    pub(crate) config: AppConfig,
    pub(crate) local_ip: IpAddr,
    pub(crate) session: SessionState,
    pub(crate) registry: Arc<PeerRegistry>,
    pub(crate) events: EventSink,
    pub(crate) connector: Arc<dyn Connector>,
    /// Unicast socket for join and receiver-side chat
    pub(crate) outbound: Arc<dyn DatagramSocket>,
}

impl Core {
    pub(crate) fn new(
        config: AppConfig,
        local_ip: IpAddr,
        connector: Arc<dyn Connector>,
        events: EventSink,
    ) -> std::io::Result<Self> {
        Ok(Self {
            outbound: connector.open(false)?,
            registry: Arc::new(PeerRegistry::new(connector.clone())),
            session: SessionState::new(local_ip),
            config,
            local_ip,
            events,
            connector,
        })
    }
}

struct ActiveCapture {
    stream: Box<dyn CaptureStream>,
    active: Arc<AtomicBool>,
    blocks_sent: Arc<AtomicU64>,
}

pub struct Node {
    core: Arc<Core>,
    events: Receiver<Event>,
    backend: Arc<dyn AudioBackend>,
    capture: Mutex<Option<ActiveCapture>>,
    playback: Mutex<Option<AudioPlayback>>,
    listening: Arc<AtomicBool>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Node on the real network, advertising the detected LAN address
    pub fn new(config: AppConfig, backend: Arc<dyn AudioBackend>) -> Result<Self> {
        let local_ip = config.network.local_address.unwrap_or_else(udp::local_ip);
        Self::with_connector(config, local_ip, Arc::new(UdpConnector), backend)
    }

    /// Node with a custom outbound transport
    pub fn with_connector(
        config: AppConfig,
        local_ip: IpAddr,
        connector: Arc<dyn Connector>,
        backend: Arc<dyn AudioBackend>,
    ) -> Result<Self> {
        let (sink, events) = events::channel();
        let core = Core::new(config, local_ip, connector, sink)?;

        Ok(Self {
            core: Arc::new(core),
            events,
            backend,
            capture: Mutex::new(None),
            playback: Mutex::new(None),
            listening: Arc::new(AtomicBool::new(false)),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Event stream for the presentation layer. Meant for a single consumer.
    pub fn events(&self) -> Receiver<Event> {
        self.events.clone()
    }

    pub fn config(&self) -> &AppConfig {
        &self.core.config
    }

    pub fn local_address(&self) -> IpAddr {
        self.core.local_ip
    }

    pub fn role(&self) -> Role {
        self.core.session.role()
    }

    pub fn session(&self) -> Session {
        self.core.session.snapshot()
    }

    /// Known peers with their connected flag
    pub fn peers(&self) -> Vec<(PeerId, PeerRecord, bool)> {
        self.core.registry.records()
    }

    /// Bind the discovery and control ports and start their listeners
    ///
    /// A port that cannot be bound is reported here; nothing is retried.
    pub fn start_listeners(&self) -> Result<()> {
        let mut listeners = self.listeners.lock();
        if !listeners.is_empty() {
            return Ok(());
        }

        let net = &self.core.config.network;
        let broadcast = bind_listener(net.broadcast_port, true, net.recv_timeout())?;
        let control = bind_listener(net.control_port, false, net.recv_timeout())?;

        self.listening.store(true, Ordering::SeqCst);

        let core = self.core.clone();
        listeners.push(spawn_listener("broadcast-listener", broadcast, self.listening.clone(), move |data, source| {
            discovery::handle_broadcast(&core, data, source)
        })?);

        let core = self.core.clone();
        listeners.push(spawn_listener("control-listener", control, self.listening.clone(), move |data, source| {
            control::handle_control(&core, data, source)
        })?);

        tracing::info!(
            "Listening on {} (discovery :{}, control :{})",
            self.core.local_ip,
            net.broadcast_port,
            net.control_port
        );
        Ok(())
    }

    /// Feed a datagram received on the discovery port
    pub fn handle_broadcast(&self, data: &[u8], source: SocketAddr) {
        discovery::handle_broadcast(&self.core, data, source);
    }

    /// Feed a datagram received on the control port
    pub fn handle_control(&self, data: &[u8], source: SocketAddr) {
        control::handle_control(&self.core, data, source);
    }

    /// Reset and start announcing ourselves as the sender
    pub fn become_sender(&self, name: &str) -> Result<()> {
        let name = validate_name(name)?;
        self.reset();

        let epoch = self.core.session.enter(Role::Sender, name);
        tracing::info!("Sender mode active as {}", name);
        self.core.events.emit(Event::SenderAvailabilityChanged {
            active: true,
            name: name.to_string(),
        });

        discovery::spawn_announcer(self.core.clone(), epoch)?;
        Ok(())
    }

    /// Reset, start probing for a sender and open playback
    ///
    /// The role is entered even if playback cannot start; the error is
    /// returned so it can be shown.
    pub fn become_receiver(&self, name: &str) -> Result<()> {
        let name = validate_name(name)?;
        self.reset();

        let epoch = self.core.session.enter(Role::Receiver, name);
        tracing::info!("Receiver mode active as {}, searching for sender", name);
        self.core.events.emit(Event::SenderAvailabilityChanged {
            active: false,
            name: String::new(),
        });

        discovery::spawn_prober(self.core.clone(), epoch)?;
        self.start_playback()
    }

    /// Reset into the idle state
    pub fn go_idle(&self) {
        self.reset();
        tracing::info!("Idle");
    }

    fn reset(&self) {
        self.stop_capture();
        self.stop_playback();

        let name = self.core.session.local_name();
        self.core.session.enter(Role::Idle, &name);

        for peer_id in self.core.registry.close_all() {
            self.core.events.emit(Event::PeerRemoved { peer_id });
        }
    }

    /// Open transports to the selected receivers
    pub fn connect_to_peers(&self, peers: &[PeerId]) -> Result<usize> {
        control::connect_to_peers(&self.core, peers)
    }

    /// Close every transport, keeping the discovered peers
    pub fn disconnect_all(&self) -> usize {
        let closed = self.core.registry.disconnect_all();
        tracing::info!("Disconnected {} peers", closed);
        closed
    }

    /// Send a chat line. Returns the message as sent, for local echo.
    pub fn send_chat(&self, text: &str) -> Result<ChatMessage> {
        control::send_chat(&self.core, text)
    }

    /// Start streaming the loopback source to connected receivers
    ///
    /// Already capturing is a no-op.
    pub fn start_capture(&self) -> Result<()> {
        let mut capture = self.capture.lock();
        if capture.is_some() {
            return Ok(());
        }

        if self.core.session.role() != Role::Sender {
            return Err(SessionError::NotSender.into());
        }
        if self.core.registry.snapshot_connected().is_empty() {
            return Err(SessionError::NoPeersSelected.into());
        }

        let sources = self.backend.capture_sources();
        let source = find_loopback(&sources, self.core.config.audio.capture_device.as_deref()).ok_or_else(|| {
            AudioError::LoopbackUnavailable(
                "enable 'Stereo Mix', a monitor source or a virtual cable".to_string(),
            )
        })?;

        let format = self.core.config.audio.stream_format();
        let active = Arc::new(AtomicBool::new(true));
        let fanout = CaptureFanout::new(
            self.core.registry.clone(),
            self.core.config.network.audio_port,
            format,
            active.clone(),
        );
        let blocks_sent = fanout.blocks_sent();

        let stream = self.backend.open_capture(source, format, fanout.into_callback())?;
        tracing::info!(
            "Capturing '{}' at {}Hz, {} channels, {} frames per block",
            source.label,
            format.sample_rate,
            format.channels,
            format.block_size
        );

        *capture = Some(ActiveCapture {
            stream,
            active,
            blocks_sent,
        });
        Ok(())
    }

    /// Stop streaming. Returns false if nothing was running.
    pub fn stop_capture(&self) -> bool {
        let Some(mut capture) = self.capture.lock().take() else {
            return false;
        };
        capture.active.store(false, Ordering::SeqCst);
        capture.stream.close();
        tracing::info!("Capture stopped after {} blocks", capture.blocks_sent.load(Ordering::Relaxed));
        true
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.lock().is_some()
    }

    /// Start playing whatever arrives on the audio port
    ///
    /// Already playing is a no-op.
    pub fn start_playback(&self) -> Result<()> {
        let mut playback = self.playback.lock();
        if playback.is_some() {
            return Ok(());
        }

        if self.core.session.role() != Role::Receiver {
            return Err(SessionError::NotReceiver.into());
        }

        let net = &self.core.config.network;
        let socket = bind_listener(net.audio_port, false, net.recv_timeout())?;
        let sink = self.backend.open_playback(self.core.config.audio.stream_format())?;

        *playback = Some(AudioPlayback::with_socket(socket, sink)?);
        Ok(())
    }

    /// Stop playback and join the receive loop. Returns false if nothing was running.
    pub fn stop_playback(&self) -> bool {
        match self.playback.lock().take() {
            Some(mut playback) => {
                playback.stop();
                true
            }
            None => false,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playback.lock().is_some()
    }

    /// Local address of the running playback socket
    pub fn playback_addr(&self) -> Option<SocketAddr> {
        self.playback.lock().as_ref().map(|p| p.local_addr())
    }

    /// Reset to idle and stop the listeners
    pub fn shutdown(&self) {
        self.reset();
        self.listening.store(false, Ordering::SeqCst);
        for handle in self.listeners.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn validate_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(SessionError::NameRequired.into());
    }
    Ok(name)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::{CaptureSource, PlaybackSink, SampleCallback, StreamFormat};
    use crate::error::NetworkError;
    use crate::network::testing::RecordingConnector;
    use crate::Error;
    use std::sync::atomic::AtomicUsize;

    /// Core on a recording network with fast discovery timings
    pub(crate) fn test_core(local: &str) -> (Core, Arc<RecordingConnector>, Receiver<Event>) {
        let connector = Arc::new(RecordingConnector::default());
        let (sink, rx) = events::channel();
        let core = Core::new(test_config(), local.parse().unwrap(), connector.clone(), sink).unwrap();
        (core, connector, rx)
    }

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.network.announce_interval_ms = 10;
        config.network.probe_interval_ms = 10;
        config.network.recv_timeout_ms = 20;
        config
    }

    #[derive(Default)]
    pub(crate) struct FakeBackend {
        sources: Vec<CaptureSource>,
        callback: Arc<Mutex<Option<SampleCallback>>>,
        capture_closes: Arc<AtomicUsize>,
        playback_closes: Arc<AtomicUsize>,
    }

    impl FakeBackend {
        pub(crate) fn with_loopback() -> Self {
            Self {
                sources: vec![CaptureSource::input("Stereo Mix")],
                ..Default::default()
            }
        }

        fn deliver(&self, samples: &[i16]) {
            if let Some(callback) = self.callback.lock().as_mut() {
                callback(samples);
            }
        }
    }

    struct FakeCapture(Arc<AtomicUsize>);

    impl CaptureStream for FakeCapture {
        fn close(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeSink(Arc<AtomicUsize>);

    impl PlaybackSink for FakeSink {
        fn write(&mut self, _block: &[u8]) {}

        fn close(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl AudioBackend for FakeBackend {
        fn capture_sources(&self) -> Vec<CaptureSource> {
            self.sources.clone()
        }

        fn open_capture(
            &self,
            _source: &CaptureSource,
            _format: StreamFormat,
            on_samples: SampleCallback,
        ) -> std::result::Result<Box<dyn CaptureStream>, AudioError> {
            *self.callback.lock() = Some(on_samples);
            Ok(Box::new(FakeCapture(self.capture_closes.clone())))
        }

        fn open_playback(&self, _format: StreamFormat) -> std::result::Result<Box<dyn PlaybackSink>, AudioError> {
            Ok(Box::new(FakeSink(self.playback_closes.clone())))
        }
    }

    /// Node on a recording network; audio port 0 so playback binds anywhere
    pub(crate) fn node(backend: Arc<FakeBackend>) -> (Node, Arc<RecordingConnector>) {
        let mut config = test_config();
        config.network.audio_port = 0;
        let connector = Arc::new(RecordingConnector::default());
        let node = Node::with_connector(config, "10.0.0.1".parse().unwrap(), connector.clone(), backend).unwrap();
        (node, connector)
    }

    pub(crate) fn join(node: &Node, name: &str, addr: &str) -> PeerId {
        let ip: IpAddr = addr.parse().unwrap();
        node.handle_control(&crate::protocol::Message::join(name).encode(), SocketAddr::new(ip, 40000));
        PeerId::new(ip, name)
    }

    #[test]
    fn test_role_switch_resets_everything() {
        let (node, _) = node(Arc::new(FakeBackend::with_loopback()));
        let events = node.events();

        node.become_sender("A").unwrap();
        let b = join(&node, "B", "10.0.0.2");
        node.connect_to_peers(&[b.clone()]).unwrap();
        let (_, handle) = node.core.registry.snapshot_connected().remove(0);

        node.become_receiver("A").unwrap();

        assert_eq!(node.role(), Role::Receiver);
        assert!(node.peers().is_empty());
        assert!(handle.is_closed());
        assert!(events.try_iter().any(|e| e == Event::PeerRemoved { peer_id: b.clone() }));
        node.shutdown();
    }

    #[test]
    fn test_reselecting_role_restarts_cleanly() {
        let (node, _) = node(Arc::new(FakeBackend::with_loopback()));
        node.become_sender("A").unwrap();
        let first = node.core.session.epoch();
        join(&node, "B", "10.0.0.2");

        node.become_sender("A").unwrap();
        assert!(node.core.session.epoch() > first);
        assert_eq!(node.role(), Role::Sender);
        assert!(node.peers().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_start_listeners_reports_taken_port() {
        let held = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
        let port = held.local_addr().unwrap().port();
        let mut config = test_config();
        config.network.broadcast_port = port;

        let node = Node::with_connector(
            config,
            "10.0.0.1".parse().unwrap(),
            Arc::new(RecordingConnector::default()),
            Arc::new(FakeBackend::default()),
        )
        .unwrap();

        match node.start_listeners() {
            Err(Error::Network(NetworkError::BindFailed { port: failed, .. })) => assert_eq!(failed, port),
            other => panic!("expected BindFailed, got {:?}", other),
        }
        assert!(node.listeners.lock().is_empty());
    }

    #[test]
    fn test_name_is_required() {
        let (node, _) = node(Arc::new(FakeBackend::with_loopback()));
        assert!(matches!(node.become_sender("  "), Err(Error::Session(SessionError::NameRequired))));
        assert_eq!(node.role(), Role::Idle);
    }

    #[test]
    fn test_capture_streams_to_connected_peers() {
        let backend = Arc::new(FakeBackend::with_loopback());
        let (node, connector) = node(backend.clone());
        node.become_sender("A").unwrap();
        let b = join(&node, "B", "10.0.0.2");
        node.connect_to_peers(&[b]).unwrap();

        node.start_capture().unwrap();
        node.start_capture().unwrap();
        assert!(node.is_capturing());

        backend.deliver(&vec![7i16; 1024]);
        let audio: Vec<_> = connector
            .sent()
            .into_iter()
            .filter(|(addr, payload)| addr.port() == 0 && payload.len() == 2048)
            .collect();
        assert_eq!(audio.len(), 1);
        assert_eq!(audio[0].0.ip(), "10.0.0.2".parse::<IpAddr>().unwrap());

        assert!(node.stop_capture());
        assert!(!node.stop_capture());
        assert_eq!(backend.capture_closes.load(Ordering::SeqCst), 1);

        backend.deliver(&vec![7i16; 1024]);
        assert_eq!(connector.sent().iter().filter(|(_, p)| p.len() == 2048).count(), 1);
    }

    #[test]
    fn test_capture_misuse_is_rejected() {
        let (node, _) = node(Arc::new(FakeBackend::default()));
        assert!(matches!(node.start_capture(), Err(Error::Session(SessionError::NotSender))));

        node.become_sender("A").unwrap();
        assert!(matches!(node.start_capture(), Err(Error::Session(SessionError::NoPeersSelected))));

        let b = join(&node, "B", "10.0.0.2");
        node.connect_to_peers(&[b]).unwrap();
        assert!(matches!(node.start_capture(), Err(Error::Audio(AudioError::LoopbackUnavailable(_)))));
        assert!(!node.is_capturing());
    }

    #[test]
    fn test_playback_follows_receiver_role() {
        let backend = Arc::new(FakeBackend::with_loopback());
        let (node, _) = node(backend.clone());

        node.become_receiver("B").unwrap();
        assert!(node.is_playing());
        assert!(node.playback_addr().is_some());
        node.start_playback().unwrap();

        node.become_sender("B").unwrap();
        assert!(!node.is_playing());
        assert!(!node.stop_playback());
        assert_eq!(backend.playback_closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disconnect_keeps_peers() {
        let (node, _) = node(Arc::new(FakeBackend::with_loopback()));
        node.become_sender("A").unwrap();
        let b = join(&node, "B", "10.0.0.2");
        node.connect_to_peers(&[b]).unwrap();

        assert_eq!(node.disconnect_all(), 1);
        let peers = node.peers();
        assert_eq!(peers.len(), 1);
        assert!(!peers[0].2);
    }
}
