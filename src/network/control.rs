//! Control listener and chat relay
//!
//! Chat is a star with the sender as hub. A receiver sends one copy to its
//! sender; the sender shows it locally and forwards it to every other
//! connected receiver. A sender's own lines go straight to every connected
//! receiver.

use std::net::{IpAddr, SocketAddr};

use crate::error::{Result, SessionError};
use crate::events::Event;
use crate::network::registry::{PeerId, PeerRecord, Upsert};
use crate::node::Core;
use crate::protocol::{ChatMessage, Message};
use crate::session::Role;

/// Handle one datagram from the control port
pub(crate) fn handle_control(core: &Core, data: &[u8], source: SocketAddr) {
    let Some(message) = Message::decode_from(data, source, core.local_ip) else {
        return;
    };

    match message {
        Message::Join { name, .. } => on_join(core, &name, source.ip()),
        Message::Chat(chat) => {
            core.events.emit(Event::ChatReceived(chat.clone()));
            if core.session.role() == Role::Sender {
                relay_chat(core, &chat, source.ip());
            }
        }
        Message::Ack { from } => core.events.emit(Event::Acknowledged { from }),
        other => tracing::trace!("Ignoring {} on control port", other.kind()),
    }
}

fn on_join(core: &Core, name: &str, address: IpAddr) {
    let peer_id = PeerId::new(address, name);

    // Holding the session keeps a concurrent reset from clearing the
    // registry between the role check and the insert
    core.session.while_in(Role::Sender, |_| {
        if core.registry.upsert(peer_id.clone(), PeerRecord::available(address, name)) == Upsert::Inserted {
            tracing::info!("Receiver {} joined from {}", name, address);
            core.events.emit(Event::PeerDiscovered {
                peer_id,
                name: name.to_string(),
                address,
            });
        }
    });
}

/// Forward a chat line to every connected peer except `origin`
///
/// Returns the number of datagrams sent.
pub(crate) fn relay_chat(core: &Core, chat: &ChatMessage, origin: IpAddr) -> usize {
    let payload = Message::Chat(chat.clone()).encode();
    let port = core.config.network.control_port;

    let mut relayed = 0;

    for (peer_id, transport) in core.registry.snapshot_connected() {
        if transport.address() == origin {
            continue;
        }
        match transport.send(&payload, port) {
            Ok(_) => relayed += 1,
            Err(e) => tracing::debug!("Chat relay to {} failed: {}", peer_id, e),
        }
    }

    relayed
}

/// Send a chat line from the local user
pub(crate) fn send_chat(core: &Core, text: &str) -> Result<ChatMessage> {
    if text.trim().is_empty() {
        return Err(SessionError::EmptyMessage.into());
    }

    let session = core.session.snapshot();
    let chat = ChatMessage::now(&session.local_name, text);
    let port = core.config.network.control_port;

    match session.role {
        Role::Idle => Err(SessionError::NoRole.into()),
        Role::Sender => {
            let payload = Message::Chat(chat.clone()).encode();
            for (peer_id, transport) in core.registry.snapshot_connected() {
                if let Err(e) = transport.send(&payload, port) {
                    tracing::debug!("Chat to {} failed: {}", peer_id, e);
                }
            }
            Ok(chat)
        }
        Role::Receiver => {
            let sender = session
                .active_sender
                .and_then(|id| core.registry.get(&id))
                .ok_or(SessionError::NotConnected)?;

            let payload = Message::Chat(chat.clone()).encode();
            let target = SocketAddr::new(sender.address, port);
            if let Err(e) = core.outbound.send_to(&payload, target) {
                tracing::debug!("Chat to {} failed: {}", target, e);
            }
            Ok(chat)
        }
    }
}

/// Open transports to the selected receivers and acknowledge them
///
/// Returns how many of the selected peers are now connected.
pub(crate) fn connect_to_peers(core: &Core, peers: &[PeerId]) -> Result<usize> {
    if core.session.role() != Role::Sender {
        return Err(SessionError::NotSender.into());
    }
    if peers.is_empty() {
        return Err(SessionError::NoPeersSelected.into());
    }

    let ack = Message::ack(&core.session.local_name()).encode();
    let port = core.config.network.control_port;
    let mut connected = 0;

    for peer_id in peers {
        if core.registry.is_connected(peer_id) {
            connected += 1;
            continue;
        }
        match core.registry.open_transport(peer_id) {
            Ok(transport) => {
                tracing::info!("Connected to {}", peer_id);
                if let Err(e) = transport.send(&ack, port) {
                    tracing::debug!("Ack to {} failed: {}", peer_id, e);
                }
                connected += 1;
            }
            Err(e) => tracing::warn!("Cannot connect to {}: {}", peer_id, e),
        }
    }

    Ok(connected)
}
