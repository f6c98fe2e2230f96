//! Role/session state
//!
//! ```text
//!            become_sender            become_receiver
//!   Idle ─────────────────▶ Sender ◀─────────────────▶ Receiver
//!    ▲                        │                          │
//!    └──────── go_idle ───────┴──────────────────────────┘
//! ```
//!
//! Every transition bumps the session epoch. Periodic tasks remember the
//! epoch they were started in and exit once it changes, so re-selecting the
//! current role restarts them cleanly.

use parking_lot::RwLock;
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::network::registry::PeerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Idle,
    Sender,
    Receiver,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Idle => "idle",
            Role::Sender => "sender",
            Role::Receiver => "receiver",
        })
    }
}

/// The process-wide session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub role: Role,
    pub local_name: String,
    pub local_address: IpAddr,
    /// Sender we stream from and chat through (receiver role only)
    pub active_sender: Option<PeerId>,
}

impl Session {
    /// Follow `peer_id`. Returns true when the active sender changed.
    pub fn adopt_sender(&mut self, peer_id: PeerId) -> bool {
        if self.active_sender.as_ref() == Some(&peer_id) {
            return false;
        }
        self.active_sender = Some(peer_id);
        true
    }
}

pub struct SessionState {
    session: RwLock<Session>,
    epoch: AtomicU64,
}

impl SessionState {
    pub fn new(local_address: IpAddr) -> Self {
        Self {
            session: RwLock::new(Session {
                role: Role::Idle,
                local_name: String::new(),
                local_address,
                active_sender: None,
            }),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> Session {
        self.session.read().clone()
    }

    pub fn role(&self) -> Role {
        self.session.read().role
    }

    pub fn local_name(&self) -> String {
        self.session.read().local_name.clone()
    }

    pub fn active_sender(&self) -> Option<PeerId> {
        self.session.read().active_sender.clone()
    }

    /// Switch role, clearing the active sender. Returns the new epoch.
    pub fn enter(&self, role: Role, local_name: &str) -> u64 {
        let mut session = self.session.write();
        session.role = role;
        session.local_name = local_name.to_string();
        session.active_sender = None;
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Whether a task started in `epoch` should keep running
    pub fn is_current(&self, epoch: u64) -> bool {
        self.epoch() == epoch
    }

    /// Run `f` only while the session is in `role`
    ///
    /// The state lock is held for the whole call, so a role switch waits
    /// until `f` returns. `f` must not call back into this `SessionState`.
    pub fn while_in<R>(&self, role: Role, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let mut session = self.session.write();
        (session.role == role).then(|| f(&mut session))
    }
}
