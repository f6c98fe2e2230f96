//! Notifications from the core to the presentation layer
//!
//! Network threads push [`Event`]s into an unbounded channel; a single
//! consumer (GUI thread, console loop, test) drains it. Ordering is kept per
//! emitting thread.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::net::IpAddr;

use crate::network::registry::PeerId;
use crate::protocol::ChatMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A receiver joined us (sender role)
    PeerDiscovered {
        peer_id: PeerId,
        name: String,
        address: IpAddr,
    },
    /// A peer was dropped by a session reset
    PeerRemoved { peer_id: PeerId },
    /// A chat line arrived from the network
    ChatReceived(ChatMessage),
    /// Sender presence changed (receiver role), or we became a sender
    SenderAvailabilityChanged { active: bool, name: String },
    /// A sender acknowledged our connection
    Acknowledged { from: String },
}

/// Cloneable producer side of the event channel
#[derive(Clone)]
pub struct EventSink {
    tx: Sender<Event>,
}

impl EventSink {
    pub fn emit(&self, event: Event) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event consumer is gone");
        }
    }
}

/// Create a connected sink/receiver pair
pub fn channel() -> (EventSink, Receiver<Event>) {
    let (tx, rx) = unbounded();
    (EventSink { tx }, rx)
}
