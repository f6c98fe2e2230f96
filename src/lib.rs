//! # LAN Audio Sync
//!
//! Stream what one PC is playing to other PCs on the same LAN, with a small
//! text chat alongside.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────── SENDER ─────────────────────────────────┐
//! │                                                                          │
//! │  ┌──────────────┐   presence (broadcast :5000, every second)             │
//! │  │  discovery   │ ───────────────────────────────────────────────┐       │
//! │  └──────────────┘                                                │       │
//! │  ┌──────────────┐   join / chat (:5010)                          │       │
//! │  │   control    │ ◄──────────────────────────────────────┐       │       │
//! │  └──────┬───────┘                                        │       │       │
//! │         ▼                                                │       │       │
//! │  ┌──────────────┐   ┌──────────────┐   raw PCM (:5012)   │       │       │
//! │  │ PeerRegistry │──►│CaptureFanout │ ─────────────────┐  │       │       │
//! │  └──────────────┘   └──────▲───────┘                  │  │       │       │
//! │                            │ loopback capture (cpal)  │  │       │       │
//! └────────────────────────────┼──────────────────────────┼──┼───────┼───────┘
//!                                                         │  │       │
//! ┌──────────────────────────────── RECEIVER ─────────────┼──┼───────┼───────┐
//! │                                                       ▼  │       ▼       │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐ ┌──────────────┐ │
//! │  │ output device│◄──│ RingBuffer   │◄──│AudioPlayback │ │  discovery   │ │
//! │  └──────────────┘   └──────────────┘   └──────────────┘ └──────┬───────┘ │
//! │                                                   join ▲       │         │
//! │                                                        └───────┘         │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`Node`] is the entry point; it exposes the role switches, peer selection,
//! streaming and chat commands, and reports what happens through [`Event`]s.

pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod network;
pub mod node;
pub mod protocol;
pub mod session;
pub mod ui;

pub use error::{Error, Result};
pub use events::Event;
pub use node::Node;

/// Application-wide constants
pub mod constants {
    /// Discovery broadcasts (presence / discover)
    pub const BROADCAST_PORT: u16 = 5000;

    /// Unicast control messages (join / ack / chat)
    pub const CONTROL_PORT: u16 = 5010;

    /// Raw PCM audio blocks
    pub const AUDIO_PORT: u16 = 5012;

    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Frames per audio datagram
    pub const DEFAULT_BLOCK_SIZE: u32 = 512;

    /// Blocks buffered ahead of the output device
    pub const PLAYBACK_QUEUE_BLOCKS: usize = 32;
}
