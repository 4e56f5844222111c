use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::AudioBackendConfig;

/// Looked up (with any supported extension) when no config path is given
pub const DEFAULT_CONFIG: &str = "config/voxtake";

/// Environment variables override file values, e.g. `VOXTAKE_AUDIO__SAMPLE_RATE=48000`
pub const ENV_PREFIX: &str = "VOXTAKE";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub audio: AudioConfig,
    pub sessions: SessionsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel in one device frame
    pub frame_size: usize,
    /// Case-insensitive substring of the input device name
    #[serde(default)]
    pub input_device: Option<String>,
    #[serde(default)]
    pub output_device: Option<String>,
    pub device_open_timeout_ms: u64,
    /// Frames queued between the device and the capture task
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionsConfig {
    pub root: String,
    pub export_good_takes: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub file: String,
    pub level: String,
}

impl Config {
    /// Defaults, then the config file, then `VOXTAKE_*` environment variables
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("audio.sample_rate", 44100)?
            .set_default("audio.channels", 1)?
            .set_default("audio.frame_size", 1024)?
            .set_default("audio.device_open_timeout_ms", 3000)?
            .set_default("audio.channel_capacity", 1024)?
            .set_default("sessions.root", "sessions")?
            .set_default("sessions.export_good_takes", true)?
            .set_default("logging.file", "voxtake.log")?
            .set_default("logging.level", "info")?;

        builder = match path {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name(DEFAULT_CONFIG).required(false)),
        };

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?;

        let cfg: Config = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        cfg.validate()?;

        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        let audio = &self.audio;
        if audio.sample_rate == 0 {
            bail!("audio.sample_rate must be greater than zero");
        }
        if audio.channels == 0 {
            bail!("audio.channels must be greater than zero");
        }
        if audio.frame_size == 0 {
            bail!("audio.frame_size must be greater than zero");
        }
        if audio.channel_capacity == 0 {
            bail!("audio.channel_capacity must be greater than zero");
        }
        if self.sessions.root.trim().is_empty() {
            bail!("sessions.root must not be empty");
        }
        Ok(())
    }

    /// Sessions root with `~` and environment variables expanded
    pub fn sessions_root(&self) -> Result<PathBuf> {
        expand_path(&self.sessions.root)
    }

    pub fn log_file(&self) -> Result<PathBuf> {
        expand_path(&self.logging.file)
    }

    pub fn backend_config(&self) -> AudioBackendConfig {
        AudioBackendConfig {
            sample_rate: self.audio.sample_rate,
            channels: self.audio.channels,
            frame_size: self.audio.frame_size,
            channel_capacity: self.audio.channel_capacity,
            device_open_timeout: Duration::from_millis(self.audio.device_open_timeout_ms),
        }
    }
}

fn expand_path(raw: &str) -> Result<PathBuf> {
    let expanded =
        shellexpand::full(raw).with_context(|| format!("Failed to expand path {}", raw))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = write_config(concat!(
            "[audio]\nsample_rate = 48000\ninput_device = \"USB\"\n\n",
            "[sessions]\nroot = \"/tmp/takes\"\n",
        ));

        let cfg = Config::load(Some(file.path())).unwrap();

        assert_eq!(cfg.audio.sample_rate, 48000);
        assert_eq!(cfg.audio.channels, 1);
        assert_eq!(cfg.audio.input_device.as_deref(), Some("USB"));
        assert_eq!(cfg.audio.output_device, None);
        assert_eq!(cfg.sessions.root, "/tmp/takes");
        assert!(cfg.sessions.export_good_takes);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_backend_config_conversion() {
        let file =
            write_config("[audio]\nchannels = 2\nframe_size = 256\ndevice_open_timeout_ms = 500\n");
        let backend = Config::load(Some(file.path())).unwrap().backend_config();

        assert_eq!(backend.channels, 2);
        assert_eq!(backend.samples_per_frame(), 512);
        assert_eq!(backend.device_open_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_zero_sample_rate_rejected() {
        let file = write_config("[audio]\nsample_rate = 0\n");
        assert!(Config::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        assert!(Config::load(Some(Path::new("/nonexistent/voxtake.toml"))).is_err());
    }

    #[test]
    fn test_sessions_root_expands_home() {
        let file = write_config("[sessions]\nroot = \"~/voxtake\"\n");
        let root = Config::load(Some(file.path())).unwrap().sessions_root().unwrap();
        assert!(!root.to_string_lossy().starts_with('~'));
        assert!(root.ends_with("voxtake"));
    }
}
