use super::config::SessionConfig;
use super::controller::TakeController;
use super::stats::SessionStats;
use super::store::{SessionManifest, SessionStore};
use crate::audio::{
    AudioBackend, AudioOutput, CapturePipeline, CaptureStatus, PlaybackError, PlaybackHandle,
    PlaybackPipeline, SessionBuffer,
};
use crate::script::{Mark, Take};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Seconds of audio to reserve up front in the session buffer
const PREALLOCATED_SECS: usize = 600;

/// A recording session: the session buffer plus the pipelines that feed and read it
///
/// Capture runs from `start` until finalize or shutdown. Takes are owned by
/// the `TakeController`; the session only reads them to play or persist.
pub struct RecordingSession {
    /// Session configuration
    config: SessionConfig,

    /// When the session started
    started_at: DateTime<Utc>,

    /// Every sample captured this session
    buffer: SessionBuffer,

    capture: CapturePipeline,

    playback: PlaybackPipeline,

    store: SessionStore,

    /// Where the session was published, once it has been
    saved_to: Option<PathBuf>,
}

impl RecordingSession {
    /// Open the pipelines and start capturing
    pub async fn start(
        config: SessionConfig,
        backend: Box<dyn AudioBackend>,
        output: Box<dyn AudioOutput>,
        store: SessionStore,
    ) -> Result<Self> {
        SessionStore::validate_id(&config.session_id)?;
        if store.session_dir(&config.session_id).exists() {
            anyhow::bail!("Session {} already exists", config.session_id);
        }

        info!("Starting recording session: {}", config.session_id);

        let audio = &config.audio;
        let buffer = SessionBuffer::with_capacity(
            audio.sample_rate,
            audio.channels,
            audio.sample_rate as usize * audio.channels as usize * PREALLOCATED_SECS,
        );

        let playback = PlaybackPipeline::new(buffer.clone(), output, audio.samples_per_frame())
            .context("Failed to set up playback")?;

        let capture = CapturePipeline::start(backend, buffer.clone())
            .await
            .context("Failed to start capture")?;

        info!("Recording session started successfully");

        Ok(Self {
            config,
            started_at: Utc::now(),
            buffer,
            capture,
            playback,
            store,
            saved_to: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.config.session_id
    }

    pub fn buffer(&self) -> &SessionBuffer {
        &self.buffer
    }

    pub fn capture_status(&self) -> CaptureStatus {
        self.capture.status()
    }

    pub fn saved_to(&self) -> Option<&Path> {
        self.saved_to.as_deref()
    }

    /// Play a take, replacing any playback in progress
    pub fn play(&mut self, take: &Take) -> Result<PlaybackHandle, PlaybackError> {
        self.playback.play(take.range())
    }

    pub fn stop_playback(&mut self) {
        self.playback.stop();
    }

    /// Close any open take, stop capture, seal the buffer, and publish the session
    ///
    /// On failure nothing in memory is lost and finalize can be called again.
    pub async fn finalize(&mut self, controller: &mut TakeController) -> Result<PathBuf> {
        if let Some(path) = &self.saved_to {
            return Ok(path.clone());
        }

        controller.force_close();

        if !self.buffer.is_sealed() {
            let status = self.capture.stop().await;
            let total = self.buffer.seal();
            info!(
                "Session buffer sealed at {} samples (capture {})",
                total, status
            );
        }

        let manifest = SessionManifest::new(
            self.config.session_id.clone(),
            self.config.script.clone(),
            self.started_at,
            &self.buffer,
            controller.document().clone(),
        );

        let store = self.store.clone();
        let buffer = self.buffer.clone();
        let path = tokio::task::spawn_blocking(move || {
            buffer.with_samples(|samples| store.save(&manifest, samples))
        })
        .await
        .context("Session save task panicked")?
        .with_context(|| format!("Failed to save session {}", self.config.session_id))?;

        controller.mark_saved();
        self.saved_to = Some(path.clone());

        Ok(path)
    }

    /// Save before exiting if there are takes that are not on disk yet
    ///
    /// `Ok(None)` means there was nothing to save. On error the session is
    /// untouched and the caller should keep running so the save can be retried.
    pub async fn save_before_exit(
        &mut self,
        controller: &mut TakeController,
    ) -> Result<Option<PathBuf>> {
        controller.force_close();
        if controller.is_saved() || controller.document().take_count() == 0 {
            return Ok(None);
        }

        let path = self.finalize(controller).await?;
        info!("Saved session on exit to {}", path.display());
        Ok(Some(path))
    }

    pub fn stats(&self, controller: &TakeController) -> SessionStats {
        let document = controller.document();

        SessionStats {
            session_id: self.config.session_id.clone(),
            started_at: self.started_at,
            buffered_secs: self.buffer.duration().as_secs_f64(),
            chunk_count: document.len(),
            take_count: document.take_count(),
            good_takes: document.count_marked(Mark::Good),
            bad_takes: document.count_marked(Mark::Bad),
            unmarked_takes: document.count_marked(Mark::Unmarked),
            capture: self.capture.status().to_string(),
            playback_degraded: self.playback.is_degraded(),
            saved: self.saved_to.is_some(),
        }
    }

    /// Stop playback and capture. Buffer and takes are left untouched.
    pub async fn shutdown(&mut self, controller: &mut TakeController) -> SessionStats {
        controller.force_close();
        self.playback.stop();

        let status = self.capture.stop().await;
        if let CaptureStatus::Degraded(reason) = &status {
            warn!("Capture ended degraded: {}", reason);
        }

        let stats = self.stats(controller);
        if stats.saved {
            info!("Session closed: {}", stats);
        } else if stats.take_count > 0 {
            error!(
                "Session {} closed without saving; {} takes were not persisted",
                stats.session_id, stats.take_count
            );
        } else {
            info!("Session closed without saving: {}", stats);
        }

        stats
    }
}
