use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Duration covered by this frame
    pub fn duration(&self) -> Duration {
        let per_second = self.sample_rate as u64 * self.channels.max(1) as u64;
        if per_second == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.samples.len() as u64 * 1_000_000 / per_second)
    }
}

/// Configuration shared by capture and playback devices
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Sample rate in Hz. Devices are opened at this rate; there is no resampling.
    pub sample_rate: u32,
    /// Channel count (1 = mono, 2 = stereo)
    pub channels: u16,
    /// Frames per device buffer. One `AudioFrame` carries `frame_size * channels` samples.
    pub frame_size: usize,
    /// Capacity of the frame channel between device and capture pipeline
    pub channel_capacity: usize,
    /// How long to wait for a device to open before giving up
    pub device_open_timeout: Duration,
}

impl AudioBackendConfig {
    /// Number of interleaved samples in one full frame
    pub fn samples_per_frame(&self) -> usize {
        self.frame_size * self.channels.max(1) as usize
    }
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 1,
            frame_size: 1024,
            channel_capacity: 1024,
            device_open_timeout: Duration::from_secs(3),
        }
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - cpal microphone input (all platforms)
/// - WAV file input (testing, re-recording from a reference track)
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames. The channel
    /// closes when the device stops, whether requested or not.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio playback device
///
/// Calls are blocking and must be made off the UI thread.
pub trait AudioOutput: Send {
    /// Queue one frame of interleaved samples, blocking while the device is backed up
    fn write_frame(&mut self, samples: &[i16]) -> Result<()>;

    /// Block until everything queued has been played
    fn drain(&mut self) -> Result<()>;

    /// Drop anything queued but not yet played
    fn discard(&mut self) {}

    /// Get device name for logging
    fn name(&self) -> &str;
}

/// Audio source type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Microphone input, optionally matched by a case-insensitive name pattern
    Microphone { device: Option<String> },
    /// File input (WAV)
    File(PathBuf),
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create a capture backend for the given source
    pub fn create(
        source: AudioSource,
        config: AudioBackendConfig,
    ) -> Result<Box<dyn AudioBackend>> {
        match source {
            AudioSource::Microphone { device } => {
                let backend = super::device::CpalInput::new(device, config);
                Ok(Box::new(backend))
            }
            AudioSource::File(path) => {
                let backend = super::file::FileBackend::new(path, config)?;
                Ok(Box::new(backend))
            }
        }
    }

    /// Open a playback device, optionally matched by name pattern
    pub fn create_output(
        device: Option<String>,
        config: AudioBackendConfig,
    ) -> Result<Box<dyn AudioOutput>> {
        let output = super::device::CpalOutput::open(device, config)?;
        Ok(Box::new(output))
    }
}
