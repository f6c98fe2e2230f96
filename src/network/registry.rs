//! Peer registry
//!
//! The single table of who we know about and who we are streaming to. One
//! mutex guards the map; it is only held while the map is read or mutated,
//! never while a datagram is in flight. Callers take a snapshot of the
//! connected handles and send outside the lock.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{NetworkError, Result, SessionError};
use crate::network::udp::{Connector, DatagramSocket};

/// Identity of a peer: its address plus the name it announced
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(address: IpAddr, name: &str) -> Self {
        PeerId(format!("{}:{}", address, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        PeerId(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Available,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub address: IpAddr,
    pub display_name: String,
    pub status: PeerStatus,
}

impl PeerRecord {
    pub fn available(address: IpAddr, display_name: &str) -> Self {
        Self {
            address,
            display_name: display_name.to_string(),
            status: PeerStatus::Available,
        }
    }
}

/// Outcome of [`PeerRegistry::upsert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}

/// Outbound socket dedicated to one connected peer
pub struct TransportHandle {
    peer_id: PeerId,
    address: IpAddr,
    socket: Arc<dyn DatagramSocket>,
    closed: AtomicBool,
}

impl TransportHandle {
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    /// Send one datagram to `port` on this peer
    pub fn send(&self, payload: &[u8], port: u16) -> std::result::Result<usize, NetworkError> {
        if self.is_closed() {
            return Err(NetworkError::TransportClosed);
        }
        self.socket
            .send_to(payload, SocketAddr::new(self.address, port))
            .map_err(|e| NetworkError::SendFailed(format!("{}: {}", self.peer_id, e)))
    }

    /// Mark the handle closed. Returns false if it already was.
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle")
            .field("peer_id", &self.peer_id)
            .field("address", &self.address)
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct Entry {
    record: PeerRecord,
    transport: Option<Arc<TransportHandle>>,
}

/// Thread-safe table of known peers and their transports
pub struct PeerRegistry {
    peers: Mutex<BTreeMap<PeerId, Entry>>,
    connector: Arc<dyn Connector>,
}

impl PeerRegistry {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            peers: Mutex::new(BTreeMap::new()),
            connector,
        }
    }

    /// Insert or refresh a peer record, keeping any open transport
    pub fn upsert(&self, peer_id: PeerId, record: PeerRecord) -> Upsert {
        let mut peers = self.peers.lock();
        match peers.get_mut(&peer_id) {
            Some(entry) => {
                entry.record = record;
                Upsert::Updated
            }
            None => {
                peers.insert(peer_id, Entry { record, transport: None });
                Upsert::Inserted
            }
        }
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<PeerRecord> {
        self.peers.lock().get(peer_id).map(|e| e.record.clone())
    }

    /// Forget a peer, closing its transport
    pub fn remove(&self, peer_id: &PeerId) -> Option<PeerRecord> {
        let entry = self.peers.lock().remove(peer_id)?;
        if let Some(transport) = entry.transport {
            transport.close();
        }
        Some(entry.record)
    }

    /// Open (or reuse) the outbound transport for a known peer
    pub fn open_transport(&self, peer_id: &PeerId) -> Result<Arc<TransportHandle>> {
        let address = {
            let peers = self.peers.lock();
            let entry = peers
                .get(peer_id)
                .ok_or_else(|| SessionError::UnknownPeer(peer_id.to_string()))?;
            if let Some(existing) = &entry.transport {
                return Ok(existing.clone());
            }
            entry.record.address
        };

        // Socket creation happens outside the lock
        let handle = Arc::new(TransportHandle {
            peer_id: peer_id.clone(),
            address,
            socket: self.connector.open(false)?,
            closed: AtomicBool::new(false),
        });

        let mut peers = self.peers.lock();
        let entry = peers
            .get_mut(peer_id)
            .ok_or_else(|| SessionError::UnknownPeer(peer_id.to_string()))?;
        match &entry.transport {
            // Lost a race with another opener; theirs wins
            Some(existing) => Ok(existing.clone()),
            None => {
                entry.transport = Some(handle.clone());
                Ok(handle)
            }
        }
    }

    /// Handles of every connected peer, in peer id order
    pub fn snapshot_connected(&self) -> Vec<(PeerId, Arc<TransportHandle>)> {
        self.peers
            .lock()
            .iter()
            .filter_map(|(id, e)| e.transport.as_ref().map(|t| (id.clone(), t.clone())))
            .collect()
    }

    /// Every known peer with its record and whether it is connected
    pub fn records(&self) -> Vec<(PeerId, PeerRecord, bool)> {
        self.peers
            .lock()
            .iter()
            .map(|(id, e)| (id.clone(), e.record.clone(), e.transport.is_some()))
            .collect()
    }

    pub fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.peers
            .lock()
            .get(peer_id)
            .map_or(false, |e| e.transport.is_some())
    }

    /// Close every transport but keep the records. Returns how many were closed.
    pub fn disconnect_all(&self) -> usize {
        let closed: Vec<_> = self
            .peers
            .lock()
            .values_mut()
            .filter_map(|e| e.transport.take())
            .collect();
        for transport in &closed {
            transport.close();
        }
        closed.len()
    }

    /// Empty the registry in one step, closing every transport
    ///
    /// Idempotent. Returns the ids that were removed.
    pub fn close_all(&self) -> Vec<PeerId> {
        let drained = std::mem::take(&mut *self.peers.lock());
        drained
            .into_iter()
            .map(|(id, entry)| {
                if let Some(transport) = entry.transport {
                    transport.close();
                }
                id
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }
}
