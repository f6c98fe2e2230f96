//! Audio Receiver Application
//!
//! Searches the LAN for a sender, joins it, and plays whatever it streams
//! on the default output device.
//!
//! Usage: `receiver [display-name]`

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_audio_sync::{
    audio::CpalBackend,
    config::{self, AppConfig},
    ui::{format_event, Console, Flow},
    Node,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting LAN Audio Receiver");

    let config = AppConfig::load_or_default();
    let name = match std::env::args().nth(1) {
        Some(name) => {
            if let Err(e) = config::save_display_name(&name) {
                tracing::warn!("Could not save display name: {}", e);
            }
            name
        }
        None => config::load_display_name(),
    };

    let backend = Arc::new(CpalBackend::with_playback_queue(config.audio.playback_queue));
    let node = Arc::new(Node::new(config, backend).context("creating node")?);
    node.start_listeners().context("binding discovery/control ports")?;

    // Playback failure leaves us in receiver mode so chat still works
    if let Err(e) = node.become_receiver(&name) {
        tracing::error!("Playback unavailable: {}", e);
    }

    println!("Receiving as '{}' on {}. Type /help for commands.", name, node.local_address());

    let events = node.events();
    std::thread::Builder::new()
        .name("event-printer".into())
        .spawn(move || {
            for event in events.iter() {
                println!("{}", format_event(&event));
            }
        })?;

    let console = Console::new(&node).with_profile(config::profile_path());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if console.handle_line(&line) == Flow::Quit {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down...");
                break;
            }
        }
    }

    node.shutdown();
    tracing::info!("Receiver stopped");
    Ok(())
}
