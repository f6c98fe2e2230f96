//! Socket doubles for unit tests

use parking_lot::Mutex;
use std::collections::HashSet;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::network::udp::{Connector, DatagramSocket};

#[derive(Default)]
struct Log {
    sent: Mutex<Vec<(SocketAddr, Vec<u8>)>>,
    unreachable: Mutex<HashSet<IpAddr>>,
}

/// Connector whose sockets record every datagram instead of sending it
#[derive(Default)]
pub struct RecordingConnector {
    log: Arc<Log>,
    opened: AtomicUsize,
}

impl RecordingConnector {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        self.log.sent.lock().clone()
    }

    pub fn sent_to_port(&self, port: u16) -> Vec<(SocketAddr, Vec<u8>)> {
        self.sent().into_iter().filter(|(a, _)| a.port() == port).collect()
    }

    pub fn clear(&self) {
        self.log.sent.lock().clear();
    }

    /// Make every send to `ip` fail
    pub fn set_unreachable(&self, ip: IpAddr) {
        self.log.unreachable.lock().insert(ip);
    }
}

impl Connector for RecordingConnector {
    fn open(&self, _broadcast: bool) -> io::Result<Arc<dyn DatagramSocket>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(RecordingSocket { log: self.log.clone() }))
    }
}

struct RecordingSocket {
    log: Arc<Log>,
}

impl DatagramSocket for RecordingSocket {
    fn send_to(&self, payload: &[u8], dest: SocketAddr) -> io::Result<usize> {
        if self.log.unreachable.lock().contains(&dest.ip()) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "unreachable"));
        }
        self.log.sent.lock().push((dest, payload.to_vec()));
        Ok(payload.len())
    }
}
