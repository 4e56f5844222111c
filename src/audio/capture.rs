use anyhow::{Context, Result};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backend::{AudioBackend, AudioFrame};
use super::buffer::{BufferError, SessionBuffer};

/// Health of the capture pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureStatus {
    /// Frames are flowing into the session buffer
    Running,
    /// Stopped on request (quit or finalize)
    Stopped,
    /// The device went away on its own. Takes recorded so far remain valid.
    Degraded(String),
}

impl CaptureStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, CaptureStatus::Running)
    }
}

impl fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureStatus::Running => write!(f, "capturing"),
            CaptureStatus::Stopped => write!(f, "stopped"),
            CaptureStatus::Degraded(reason) => write!(f, "degraded: {}", reason),
        }
    }
}

/// Capture pipeline
///
/// Runs for the whole session, moving every frame the backend delivers into
/// the session buffer. It is not aware of takes.
pub struct CapturePipeline {
    status: Arc<Mutex<CaptureStatus>>,
    frames_captured: Arc<AtomicU64>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl CapturePipeline {
    /// Start the backend and spawn the capture task
    pub async fn start(mut backend: Box<dyn AudioBackend>, buffer: SessionBuffer) -> Result<Self> {
        let audio_rx = backend
            .start()
            .await
            .with_context(|| format!("Failed to start audio capture on {}", backend.name()))?;

        info!("Capture backend started: {}", backend.name());

        Ok(Self::spawn(Some(backend), audio_rx, buffer))
    }

    /// Capture from an already-open frame channel
    pub fn from_receiver(audio_rx: mpsc::Receiver<AudioFrame>, buffer: SessionBuffer) -> Self {
        Self::spawn(None, audio_rx, buffer)
    }

    fn spawn(
        backend: Option<Box<dyn AudioBackend>>,
        audio_rx: mpsc::Receiver<AudioFrame>,
        buffer: SessionBuffer,
    ) -> Self {
        let status = Arc::new(Mutex::new(CaptureStatus::Running));
        let frames_captured = Arc::new(AtomicU64::new(0));
        let (stop_tx, stop_rx) = oneshot::channel();

        let task = tokio::spawn(run_capture(
            backend,
            audio_rx,
            buffer,
            Arc::clone(&status),
            Arc::clone(&frames_captured),
            stop_rx,
        ));

        Self {
            status,
            frames_captured,
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }

    pub fn status(&self) -> CaptureStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    /// Stop the backend, drain frames it already delivered, and wait for the task
    pub async fn stop(&mut self) -> CaptureStatus {
        if let Some(stop_tx) = self.stop_tx.take() {
            // The task may already have exited on its own.
            let _ = stop_tx.send(());
        }

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Capture task panicked: {}", e);
                set_status(&self.status, CaptureStatus::Degraded("capture task panicked".into()));
            }
        }

        self.status()
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

async fn run_capture(
    mut backend: Option<Box<dyn AudioBackend>>,
    mut audio_rx: mpsc::Receiver<AudioFrame>,
    buffer: SessionBuffer,
    status: Arc<Mutex<CaptureStatus>>,
    frames_captured: Arc<AtomicU64>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    info!("Capture pipeline started");

    let mut stop_requested = false;

    loop {
        tokio::select! {
            frame = audio_rx.recv() => {
                let Some(frame) = frame else { break };

                match append_frame(&buffer, &frame) {
                    Ok(true) => {
                        frames_captured.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(false) => {}
                    Err(BufferError::Sealed) => {
                        info!("Session buffer sealed, stopping capture");
                        stop_requested = true;
                        audio_rx.close();
                        stop_backend(&mut backend).await;
                        break;
                    }
                }
            }
            _ = &mut stop_rx, if !stop_requested => {
                info!("Capture stop requested");
                stop_requested = true;
                // Frames already queued are still received; nothing new gets in,
                // and a producer blocked on a full channel is released.
                audio_rx.close();
                stop_backend(&mut backend).await;
            }
        }
    }

    let final_status = if stop_requested {
        CaptureStatus::Stopped
    } else {
        error!(
            "Audio input ended unexpectedly after {} frames; session continues without capture",
            frames_captured.load(Ordering::Relaxed)
        );
        stop_backend(&mut backend).await;
        CaptureStatus::Degraded("input device stopped delivering audio".into())
    };

    info!(
        "Capture pipeline finished ({}): {} samples buffered",
        final_status,
        buffer.len()
    );

    set_status(&status, final_status);
}

/// Returns whether the frame made it into the buffer
fn append_frame(buffer: &SessionBuffer, frame: &AudioFrame) -> Result<bool, BufferError> {
    if frame.sample_rate != buffer.sample_rate() {
        warn!(
            "Frame sample rate mismatch: expected {}, got {}. Dropping frame.",
            buffer.sample_rate(),
            frame.sample_rate
        );
        return Ok(false);
    }

    if frame.channels != buffer.channels() {
        warn!(
            "Frame channel count mismatch: expected {}, got {}. Dropping frame.",
            buffer.channels(),
            frame.channels
        );
        return Ok(false);
    }

    if frame.samples.len() % buffer.channels().max(1) as usize != 0 {
        warn!(
            "Frame of {} samples is not a whole number of {}-channel frames. Dropping frame.",
            frame.samples.len(),
            buffer.channels()
        );
        return Ok(false);
    }

    let len = buffer.append(&frame.samples)?;
    debug!("Captured frame at {}ms, buffer at {} samples", frame.timestamp_ms, len);
    Ok(true)
}

async fn stop_backend(backend: &mut Option<Box<dyn AudioBackend>>) {
    if let Some(backend) = backend.as_mut() {
        if backend.is_capturing() {
            if let Err(e) = backend.stop().await {
                error!("Failed to stop audio backend {}: {:#}", backend.name(), e);
            }
        }
    }
}

fn set_status(status: &Mutex<CaptureStatus>, value: CaptureStatus) {
    *status.lock().unwrap_or_else(PoisonError::into_inner) = value;
}
