use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::audio::AudioBackendConfig;

/// Configuration for a recording session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session identifier, used as the directory name (e.g., "chapter-1-20251028-101500")
    pub session_id: String,

    /// Script the session records, kept in the manifest
    pub script: Option<PathBuf>,

    /// Capture and playback format
    #[serde(skip)]
    pub audio: AudioBackendConfig,
}

impl SessionConfig {
    pub fn new(
        session_id: impl Into<String>,
        script: Option<PathBuf>,
        audio: AudioBackendConfig,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            script,
            audio,
        }
    }

    /// `<script stem>-<YYYYmmdd-HHMMSS>`
    pub fn default_id(script: &Path, now: DateTime<Local>) -> String {
        let stem: String = script
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();

        let stem = stem.trim_start_matches(['.', '-']);
        let stem = if stem.is_empty() { "session" } else { stem };

        format!("{}-{}", stem, now.format("%Y%m%d-%H%M%S"))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("session-{}", uuid::Uuid::new_v4()),
            script: None,
            audio: AudioBackendConfig::default(),
        }
    }
}
