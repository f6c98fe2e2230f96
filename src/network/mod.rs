//! Network subsystem: sockets, peer registry, discovery and the control relay

pub mod control;
pub mod discovery;
pub mod registry;
pub mod udp;

#[cfg(test)]
pub(crate) mod testing;

pub use registry::{PeerId, PeerRecord, PeerRegistry, PeerStatus, TransportHandle};
pub use udp::{Connector, DatagramSocket, UdpConnector};
