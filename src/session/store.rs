//! On-disk session store
//!
//! Layout:
//! ```text
//! {root}/
//! ├── {id}/
//! │   ├── audio.wav          # whole session buffer
//! │   ├── session.json       # manifest: document, takes, marks, format
//! │   └── takes/
//! │       └── chunk-000-take-01.wav   # takes marked good
//! └── .staging-{id}-{uuid}/  # in-progress write, never listed
//! ```
//!
//! A session is written completely into a hidden staging directory, every
//! file is synced, and only then is the directory renamed to its id. A crash
//! before the rename leaves only a staging directory behind, which `list`
//! skips and `sweep_staging` removes.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audio::{write_wav, AudioFile, SessionBuffer};
use crate::script::{Document, Mark};

const AUDIO_FILE: &str = "audio.wav";
const MANIFEST_FILE: &str = "session.json";
const TAKES_DIR: &str = "takes";
const STAGING_PREFIX: &str = ".staging-";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sessions directory {0} does not exist")]
    RootMissing(PathBuf),

    #[error("session {0} already exists")]
    AlreadyExists(String),

    #[error("invalid session id {id:?}: {reason}")]
    InvalidId { id: String, reason: &'static str },

    #[error("session {0} not found")]
    NotFound(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    fn io(context: impl Into<String>, source: io::Error) -> Self {
        StoreError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Everything about a session except the audio itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionManifest {
    pub id: String,
    pub script: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub finalized_at: DateTime<Utc>,
    pub sample_rate: u32,
    pub channels: u16,
    pub total_samples: usize,
    pub document: Document,
}

impl SessionManifest {
    pub fn new(
        id: impl Into<String>,
        script: Option<PathBuf>,
        created_at: DateTime<Utc>,
        buffer: &SessionBuffer,
        document: Document,
    ) -> Self {
        Self {
            id: id.into(),
            script,
            created_at,
            finalized_at: Utc::now(),
            sample_rate: buffer.sample_rate(),
            channels: buffer.channels(),
            total_samples: buffer.len(),
            document,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        let per_second = self.sample_rate as f64 * self.channels.max(1) as f64;
        if per_second == 0.0 {
            return 0.0;
        }
        self.total_samples as f64 / per_second
    }
}

/// A published session read back from disk
#[derive(Debug, Clone)]
pub struct StoredSession {
    pub manifest: SessionManifest,
    pub samples: Vec<i16>,
}

impl StoredSession {
    /// Samples of one take
    pub fn take_samples(&self, chunk: usize, take: usize) -> Option<&[i16]> {
        let take = self.manifest.document.chunk(chunk)?.take(take)?;
        self.samples.get(take.range())
    }
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
    export_good_takes: bool,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            export_good_takes: true,
        }
    }

    /// Also write each take marked good as its own WAV file
    pub fn with_take_export(mut self, enabled: bool) -> Self {
        self.export_good_takes = enabled;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Ids are directory names: non-empty, not hidden, no path separators
    pub fn validate_id(id: &str) -> Result<(), StoreError> {
        let reason = if id.is_empty() {
            Some("empty")
        } else if id.starts_with('.') {
            Some("must not start with '.'")
        } else if id.contains(['/', '\\']) {
            Some("must not contain path separators")
        } else if id.chars().any(char::is_control) {
            Some("must not contain control characters")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(StoreError::InvalidId {
                id: id.to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }

    /// Publish a session. The directory appears under its id only once every file is on disk.
    pub fn save(&self, manifest: &SessionManifest, samples: &[i16]) -> Result<PathBuf, StoreError> {
        Self::validate_id(&manifest.id)?;

        fs::create_dir_all(&self.root).map_err(|e| {
            StoreError::io(format!("Failed to create {}", self.root.display()), e)
        })?;

        let target = self.session_dir(&manifest.id);
        if target.exists() {
            return Err(StoreError::AlreadyExists(manifest.id.clone()));
        }

        let staging = self
            .root
            .join(format!("{}{}-{}", STAGING_PREFIX, manifest.id, Uuid::new_v4()));

        fs::create_dir(&staging).map_err(|e| {
            StoreError::io(format!("Failed to create {}", staging.display()), e)
        })?;
        debug!("Staging session {} in {}", manifest.id, staging.display());

        let written = self
            .write_contents(&staging, manifest, samples)
            .and_then(|_| self.publish(&staging, &target, &manifest.id));

        if let Err(e) = written {
            warn!("Failed to save session {}: {}", manifest.id, e);
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", staging.display(), cleanup);
                }
            }
            return Err(e);
        }

        info!(
            "Session {} saved to {} ({} chunks, {} takes, {:.1}s)",
            manifest.id,
            target.display(),
            manifest.document.len(),
            manifest.document.take_count(),
            manifest.duration_secs()
        );

        Ok(target)
    }

    fn write_contents(
        &self,
        dir: &Path,
        manifest: &SessionManifest,
        samples: &[i16],
    ) -> Result<(), StoreError> {
        if samples.len() != manifest.total_samples {
            return Err(StoreError::Other(anyhow::anyhow!(
                "manifest expects {} samples but {} were given",
                manifest.total_samples,
                samples.len()
            )));
        }
        manifest
            .document
            .validate(samples.len())
            .context("Session document does not match its audio")?;

        write_wav(
            &dir.join(AUDIO_FILE),
            samples,
            manifest.sample_rate,
            manifest.channels,
        )?;

        if self.export_good_takes {
            self.export_takes(dir, manifest, samples)?;
        }

        let path = dir.join(MANIFEST_FILE);
        let file = File::create(&path)
            .map_err(|e| StoreError::io(format!("Failed to create {}", path.display()), e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, manifest)
            .context("Failed to serialize session manifest")?;
        writer
            .flush()
            .map_err(|e| StoreError::io(format!("Failed to write {}", path.display()), e))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| StoreError::io(format!("Failed to sync {}", path.display()), e))?;

        sync_dir(dir)
    }

    fn export_takes(
        &self,
        dir: &Path,
        manifest: &SessionManifest,
        samples: &[i16],
    ) -> Result<(), StoreError> {
        let good: Vec<_> = manifest
            .document
            .takes()
            .filter(|(_, _, take)| take.mark == Mark::Good && !take.is_empty())
            .collect();

        if good.is_empty() {
            return Ok(());
        }

        let takes_dir = dir.join(TAKES_DIR);
        fs::create_dir(&takes_dir)
            .map_err(|e| StoreError::io(format!("Failed to create {}", takes_dir.display()), e))?;

        for (chunk, index, take) in good {
            let path = takes_dir.join(take_file_name(chunk, index));
            write_wav(
                &path,
                &samples[take.range()],
                manifest.sample_rate,
                manifest.channels,
            )?;
        }

        sync_dir(&takes_dir)
    }

    fn publish(&self, staging: &Path, target: &Path, id: &str) -> Result<(), StoreError> {
        if target.exists() {
            return Err(StoreError::AlreadyExists(id.to_string()));
        }

        fs::rename(staging, target).map_err(|e| {
            StoreError::io(
                format!("Failed to publish {} as {}", staging.display(), target.display()),
                e,
            )
        })?;

        sync_dir(&self.root)
    }

    /// Ids of every published session, sorted
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::RootMissing(self.root.clone()));
            }
            Err(e) => {
                return Err(StoreError::io(
                    format!("Failed to read {}", self.root.display()),
                    e,
                ));
            }
        };

        let mut ids = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                StoreError::io(format!("Failed to read {}", self.root.display()), e)
            })?;

            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            if !entry.path().join(MANIFEST_FILE).is_file() {
                debug!("Skipping {}: no manifest", name);
                continue;
            }

            ids.insert(name);
        }

        Ok(ids.into_iter().collect())
    }

    /// Read only the manifest of a published session
    pub fn manifest(&self, id: &str) -> Result<SessionManifest, StoreError> {
        Self::validate_id(id)?;

        let path = self.session_dir(id).join(MANIFEST_FILE);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_string()));
            }
            Err(e) => {
                return Err(StoreError::io(format!("Failed to open {}", path.display()), e));
            }
        };

        let manifest: SessionManifest = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        manifest
            .document
            .validate(manifest.total_samples)
            .with_context(|| format!("Session {} has takes outside its audio", id))?;

        Ok(manifest)
    }

    /// Read a published session back, audio included
    pub fn load(&self, id: &str) -> Result<StoredSession, StoreError> {
        let manifest = self.manifest(id)?;
        let audio = AudioFile::open(self.session_dir(id).join(AUDIO_FILE))?;

        if audio.samples.len() != manifest.total_samples {
            return Err(StoreError::Other(anyhow::anyhow!(
                "session {} has {} samples on disk but its manifest records {}",
                id,
                audio.samples.len(),
                manifest.total_samples
            )));
        }

        Ok(StoredSession {
            manifest,
            samples: audio.samples,
        })
    }

    /// Remove staging directories left behind by interrupted saves
    pub fn sweep_staging(&self) -> Result<usize, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(StoreError::io(
                    format!("Failed to read {}", self.root.display()),
                    e,
                ));
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let is_staging = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(STAGING_PREFIX));
            if !is_staging || !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }

            let path = entry.path();
            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    info!("Removed interrupted save {}", path.display());
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }

        Ok(removed)
    }
}

/// File name of an exported take
pub fn take_file_name(chunk: usize, take: usize) -> String {
    format!("chunk-{:03}-take-{:02}.wav", chunk, take + 1)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<(), StoreError> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| StoreError::io(format!("Failed to sync {}", dir.display()), e))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<(), StoreError> {
    Ok(())
}
