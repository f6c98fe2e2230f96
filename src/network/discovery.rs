//! LAN discovery
//!
//! A sender broadcasts `presence` every announce interval; a receiver
//! broadcasts `discover` every probe interval. Receivers learn about a sender
//! by overhearing its `presence` and answer with a unicast `join` to the
//! sender's control port, which is what puts them in the sender's registry.
//!
//! The periodic loops poll the session epoch each iteration and exit once
//! the role they were started for is gone.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::events::Event;
use crate::network::registry::{PeerId, PeerRecord};
use crate::network::udp::{broadcast_addr, DatagramSocket};
use crate::node::Core;
use crate::protocol::{Message, PeerRole};
use crate::session::Role;

/// Start the sender's `presence` loop for the session `epoch`
pub(crate) fn spawn_announcer(core: Arc<Core>, epoch: u64) -> io::Result<JoinHandle<()>> {
    let socket = core.connector.open(true)?;
    let interval = core.config.network.announce_interval();

    spawn_periodic("presence-announce", core, epoch, socket, interval, |core| {
        Message::presence(&core.session.local_name(), core.local_ip, core.config.network.audio_port)
    })
}

/// Start the receiver's `discover` loop for the session `epoch`
pub(crate) fn spawn_prober(core: Arc<Core>, epoch: u64) -> io::Result<JoinHandle<()>> {
    let socket = core.connector.open(true)?;
    let interval = core.config.network.probe_interval();

    spawn_periodic("sender-probe", core, epoch, socket, interval, |core| {
        Message::discover(&core.session.local_name(), core.local_ip)
    })
}

fn spawn_periodic<F>(
    name: &str,
    core: Arc<Core>,
    epoch: u64,
    socket: Arc<dyn DatagramSocket>,
    interval: Duration,
    make_message: F,
) -> io::Result<JoinHandle<()>>
where
    F: Fn(&Core) -> Message + Send + 'static,
{
    let thread_name = name.to_string();
    thread::Builder::new().name(thread_name.clone()).spawn(move || {
        let target = broadcast_addr(core.config.network.broadcast_port);
        tracing::debug!("{} started", thread_name);

        while core.session.is_current(epoch) {
            let payload = make_message(&core).encode();
            if let Err(e) = socket.send_to(&payload, target) {
                tracing::debug!("{}: broadcast failed: {}", thread_name, e);
            }
            thread::sleep(interval);
        }

        tracing::debug!("{} stopped", thread_name);
    })
}

/// Handle one datagram from the discovery port
pub(crate) fn handle_broadcast(core: &Core, data: &[u8], source: SocketAddr) {
    let Some(message) = Message::decode_from(data, source, core.local_ip) else {
        return;
    };

    match message {
        Message::Presence {
            name,
            role: PeerRole::Sender,
            ..
        } => on_presence(core, &name, source.ip()),
        Message::Discover { name, .. } => {
            tracing::trace!("{} at {} is looking for a sender", name, source.ip());
        }
        other => tracing::trace!("Ignoring {} on discovery port", other.kind()),
    }
}

fn on_presence(core: &Core, name: &str, address: IpAddr) {
    let peer_id = PeerId::new(address, name);

    let adopted = core.session.while_in(Role::Receiver, |session| {
        core.registry.upsert(peer_id.clone(), PeerRecord::available(address, name));
        if session.adopt_sender(peer_id) {
            tracing::info!("Found sender {} at {}", name, address);
            core.events.emit(Event::SenderAvailabilityChanged {
                active: true,
                name: name.to_string(),
            });
        }
    });

    // Re-sent on every presence so a lost join heals on the next announce
    if adopted.is_some() {
        send_join(core, address);
    }
}

fn send_join(core: &Core, sender: IpAddr) {
    let payload = Message::join(&core.session.local_name()).encode();
    let target = SocketAddr::new(sender, core.config.network.control_port);
    if let Err(e) = core.outbound.send_to(&payload, target) {
        tracing::debug!("Join to {} failed: {}", target, e);
    }
}
