//! Application configuration and display-name persistence
//!
//! Both live as TOML files in the platform config directory:
//! `config.toml` for tunables and `profile.toml` for the display name.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::StreamFormat;
use crate::constants::*;
use crate::error::{Error, Result};

const CONFIG_FILE: &str = "config.toml";
const PROFILE_FILE: &str = "profile.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub audio: AudioConfig,
}

/// Ports and timings shared by every peer on the LAN
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub broadcast_port: u16,
    pub control_port: u16,
    pub audio_port: u16,
    pub announce_interval_ms: u64,
    pub probe_interval_ms: u64,
    pub recv_timeout_ms: u64,
    /// Address to advertise instead of the detected one
    pub local_address: Option<std::net::IpAddr>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            broadcast_port: BROADCAST_PORT,
            control_port: CONTROL_PORT,
            audio_port: AUDIO_PORT,
            announce_interval_ms: 1000,
            probe_interval_ms: 2000,
            recv_timeout_ms: 1000,
            local_address: None,
        }
    }
}

impl NetworkConfig {
    pub fn announce_interval(&self) -> Duration {
        Duration::from_millis(self.announce_interval_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn recv_timeout(&self) -> Duration {
        // A zero read timeout means "block forever" to the OS
        Duration::from_millis(self.recv_timeout_ms.max(1))
    }
}

/// PCM format every peer must agree on, plus local device preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per block
    pub block_size: u32,
    /// Label of the capture source to prefer over auto-detection
    pub capture_device: Option<String>,
    /// Playback queue capacity in blocks
    pub playback_queue: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            block_size: DEFAULT_BLOCK_SIZE,
            capture_device: None,
            playback_queue: PLAYBACK_QUEUE_BLOCKS,
        }
    }
}

impl AudioConfig {
    pub fn stream_format(&self) -> StreamFormat {
        StreamFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
            block_size: self.block_size,
        }
    }
}

impl AppConfig {
    /// Directory holding `config.toml` and `profile.toml`
    pub fn config_dir() -> Option<PathBuf> {
        ProjectDirs::from("net", "LanAudioSync", "lan-audio-sync").map(|d| d.config_dir().to_path_buf())
    }

    /// Load from an explicit path
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load from the default location, falling back to defaults
    pub fn load_or_default() -> Self {
        let Some(path) = Self::config_dir().map(|d| d.join(CONFIG_FILE)) else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => {
                tracing::info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                tracing::warn!("Ignoring unreadable config: {}", e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct UserProfile {
    name: String,
}

/// Where the display name is kept
pub fn profile_path() -> Option<PathBuf> {
    AppConfig::config_dir().map(|d| d.join(PROFILE_FILE))
}

/// Stored display name, or a freshly generated (and saved) random one
pub fn load_display_name() -> String {
    match profile_path() {
        Some(path) => load_display_name_from(&path),
        None => random_name(),
    }
}

pub fn save_display_name(name: &str) -> Result<()> {
    let path = profile_path().ok_or_else(|| Error::Config("no config directory".into()))?;
    save_display_name_to(&path, name)
}

pub fn load_display_name_from(path: &Path) -> String {
    let stored = std::fs::read_to_string(path)
        .ok()
        .and_then(|text| toml::from_str::<UserProfile>(&text).ok())
        .map(|p| p.name)
        .filter(|name| !name.trim().is_empty());

    match stored {
        Some(name) => name,
        None => {
            let name = random_name();
            if let Err(e) = save_display_name_to(path, &name) {
                tracing::warn!("Could not save display name: {}", e);
            }
            name
        }
    }
}

pub fn save_display_name_to(path: &Path, name: &str) -> Result<()> {
    let profile = UserProfile { name: name.to_string() };
    let text = toml::to_string(&profile).map_err(|e| Error::Config(e.to_string()))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text)?;
    Ok(())
}

fn random_name() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..4].to_string()
}
