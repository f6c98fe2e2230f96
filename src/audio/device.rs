//! Audio device enumeration and the cpal backend

use cpal::traits::{DeviceTrait, HostTrait};

use crate::audio::capture::CpalCapture;
use crate::audio::playback::CpalPlayback;
use crate::audio::{AudioBackend, CaptureStream, PlaybackSink, SampleCallback, StreamFormat};
use crate::error::AudioError;

/// Device-name fragments that identify a "what you hear" input
const LOOPBACK_HINTS: &[&str] = &["stereo mix", "loopback", "monitor", "blackhole", "cable output", "what u hear"];

/// A labeled input the backend can capture from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSource {
    /// `input:<name>` or `output:<name>`
    pub id: String,
    pub label: String,
    /// Mirrors the machine's own output rather than a microphone
    pub is_loopback: bool,
}

impl CaptureSource {
    pub fn input(name: &str) -> Self {
        Self {
            id: format!("input:{}", name),
            label: name.to_string(),
            is_loopback: looks_like_loopback(name),
        }
    }
}

pub fn looks_like_loopback(name: &str) -> bool {
    let lower = name.to_lowercase();
    LOOPBACK_HINTS.iter().any(|hint| lower.contains(hint))
}

/// Pick the capture source to stream from
///
/// A configured preference wins when present (matched case-insensitively
/// against the label); otherwise the first loopback source is used.
pub fn find_loopback<'a>(sources: &'a [CaptureSource], preferred: Option<&str>) -> Option<&'a CaptureSource> {
    if let Some(wanted) = preferred {
        let wanted = wanted.to_lowercase();
        if let Some(source) = sources.iter().find(|s| s.label.to_lowercase() == wanted) {
            return Some(source);
        }
        tracing::warn!("Preferred capture device '{}' not found, auto-detecting", wanted);
    }
    sources.iter().find(|s| s.is_loopback)
}

/// Get a cpal device by its source ID
/// Which side of the device a capture id refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Input,
    /// Render device captured through WASAPI loopback
    Output,
}

/// Split an `input:<name>` / `output:<name>` id. Bare names are inputs.
pub fn parse_device_id(id: &str) -> (DeviceKind, &str) {
    match id.strip_prefix("output:") {
        Some(name) => (DeviceKind::Output, name),
        None => (DeviceKind::Input, id.strip_prefix("input:").unwrap_or(id)),
    }
}

pub fn get_device_by_id(id: &str) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    let (kind, name) = parse_device_id(id);

    let devices = match kind {
        DeviceKind::Output => host.output_devices(),
        DeviceKind::Input => host.input_devices(),
    };
    let devices = devices.map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if device.name().map_or(false, |n| n == name) {
            return Ok(device);
        }
    }

    Err(AudioError::DeviceNotFound(id.to_string()))
}

/// Device for a capture id together with the default config of the matching side
///
/// Render devices only report an output config; asking them for an input one
/// fails even though WASAPI can build a loopback input stream on them.
pub fn capture_device(id: &str) -> Result<(cpal::Device, cpal::SupportedStreamConfig), AudioError> {
    let device = get_device_by_id(id)?;
    let config = match parse_device_id(id).0 {
        DeviceKind::Output => device.default_output_config()?,
        DeviceKind::Input => device.default_input_config()?,
    };
    Ok((device, config))
}

/// Get default output device
pub fn get_default_output_device() -> Result<cpal::Device, AudioError> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))
}

/// Stream configuration for the shared PCM format
///
/// The fixed block size is requested only when the device supports it;
/// otherwise the device default is used and blocks are re-cut downstream.
pub fn stream_config(format: StreamFormat, supported: &cpal::SupportedBufferSize) -> cpal::StreamConfig {
    let buffer_size = match supported {
        cpal::SupportedBufferSize::Range { min, max } if (*min..=*max).contains(&format.block_size) => {
            cpal::BufferSize::Fixed(format.block_size)
        }
        _ => cpal::BufferSize::Default,
    };

    cpal::StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size,
    }
}

/// [`AudioBackend`] on top of the platform's default cpal host
#[derive(Debug, Clone, Copy)]
pub struct CpalBackend {
    playback_queue: usize,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self::with_playback_queue(crate::constants::PLAYBACK_QUEUE_BLOCKS)
    }

    /// Backend whose playback streams queue up to `blocks` received blocks
    pub fn with_playback_queue(blocks: usize) -> Self {
        Self { playback_queue: blocks }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn capture_sources(&self) -> Vec<CaptureSource> {
        let host = cpal::default_host();
        let mut sources = Vec::new();

        if let Ok(inputs) = host.input_devices() {
            sources.extend(inputs.filter_map(|d| d.name().ok()).map(|name| CaptureSource::input(&name)));
        }

        // WASAPI captures an output device's mix when an input stream is
        // built on it
        if cfg!(target_os = "windows") {
            if let Ok(outputs) = host.output_devices() {
                sources.extend(outputs.filter_map(|d| d.name().ok()).map(|name| CaptureSource {
                    id: format!("output:{}", name),
                    label: name,
                    is_loopback: true,
                }));
            }
        }

        sources
    }

    fn open_capture(
        &self,
        source: &CaptureSource,
        format: StreamFormat,
        on_samples: SampleCallback,
    ) -> Result<Box<dyn CaptureStream>, AudioError> {
        Ok(Box::new(CpalCapture::open(&source.id, format, on_samples)?))
    }

    fn open_playback(&self, format: StreamFormat) -> Result<Box<dyn PlaybackSink>, AudioError> {
        Ok(Box::new(CpalPlayback::open(format, self.playback_queue)?))
    }
}
