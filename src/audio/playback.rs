use anyhow::{Context, Result};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::backend::AudioOutput;
use super::buffer::SessionBuffer;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("nothing to play: range is empty")]
    Empty,
    #[error("range {start}..{end} is outside the session buffer (length {len})")]
    OutOfRange { start: usize, end: usize, len: usize },
}

/// Handle to one running playback
pub struct PlaybackHandle {
    cancel: Arc<AtomicBool>,
    task: JoinHandle<Result<usize>>,
}

impl PlaybackHandle {
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the playback to end; returns the number of samples written
    pub async fn wait(self) -> Result<usize> {
        self.task.await.context("Playback task panicked")?
    }
}

/// Playback pipeline
///
/// Copies a finished range out of the session buffer and streams it to the
/// output device from a blocking worker. At most one playback is active:
/// starting another cancels the previous one.
pub struct PlaybackPipeline {
    buffer: SessionBuffer,
    output: Arc<Mutex<Box<dyn AudioOutput>>>,
    samples_per_frame: usize,
    runtime: Handle,
    current: Option<Arc<AtomicBool>>,
    degraded: Arc<AtomicBool>,
}

impl PlaybackPipeline {
    /// Must be called from within a tokio runtime
    pub fn new(
        buffer: SessionBuffer,
        output: Box<dyn AudioOutput>,
        samples_per_frame: usize,
    ) -> Result<Self> {
        let runtime = Handle::try_current().context("Playback requires a tokio runtime")?;

        info!("Playback pipeline ready on {}", output.name());

        Ok(Self {
            buffer,
            output: Arc::new(Mutex::new(output)),
            samples_per_frame: samples_per_frame.max(1),
            runtime,
            current: None,
            degraded: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Play `buffer[range]`, replacing any playback in progress
    pub fn play(&mut self, range: Range<usize>) -> Result<PlaybackHandle, PlaybackError> {
        if range.start == range.end {
            return Err(PlaybackError::Empty);
        }

        let samples = self
            .buffer
            .read_range(range.clone())
            .ok_or_else(|| PlaybackError::OutOfRange {
                start: range.start,
                end: range.end,
                len: self.buffer.len(),
            })?;

        self.stop();

        let cancel = Arc::new(AtomicBool::new(false));
        self.current = Some(Arc::clone(&cancel));

        info!(
            "Playing samples {}..{} ({:.2}s)",
            range.start,
            range.end,
            self.buffer.duration_of(samples.len()).as_secs_f64()
        );

        let output = Arc::clone(&self.output);
        let degraded = Arc::clone(&self.degraded);
        let frame = self.samples_per_frame;
        let task_cancel = Arc::clone(&cancel);

        let task = self.runtime.spawn_blocking(move || {
            let result = stream_samples(&output, &samples, frame, &task_cancel);
            if let Err(e) = &result {
                error!("Playback failed: {:#}", e);
                degraded.store(true, Ordering::SeqCst);
            }
            result
        });

        Ok(PlaybackHandle { cancel, task })
    }

    /// Cancel the playback in progress, if any
    pub fn stop(&mut self) {
        if let Some(cancel) = self.current.take() {
            cancel.store(true, Ordering::SeqCst);
        }
    }

    /// Set once an output device error has stopped a playback
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }
}

impl Drop for PlaybackPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn stream_samples(
    output: &Mutex<Box<dyn AudioOutput>>,
    samples: &[i16],
    samples_per_frame: usize,
    cancel: &AtomicBool,
) -> Result<usize> {
    // Waits for a cancelled predecessor to release the device.
    let mut output = output.lock().unwrap_or_else(PoisonError::into_inner);
    let mut written = 0;

    for frame in samples.chunks(samples_per_frame) {
        if cancel.load(Ordering::SeqCst) {
            output.discard();
            info!("Playback cancelled after {} samples", written);
            return Ok(written);
        }
        output
            .write_frame(frame)
            .with_context(|| format!("Failed to write to {}", output.name()))?;
        written += frame.len();
    }

    output
        .drain()
        .with_context(|| format!("Failed to drain {}", output.name()))?;

    Ok(written)
}

/// Output that records everything written to it. Used for tests and dry runs.
#[derive(Clone, Default)]
pub struct MemoryOutput {
    played: Arc<Mutex<Vec<Vec<i16>>>>,
    pending: Vec<i16>,
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// One entry per completed (drained) playback
    pub fn playbacks(&self) -> Vec<Vec<i16>> {
        self.played
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AudioOutput for MemoryOutput {
    fn write_frame(&mut self, samples: &[i16]) -> Result<()> {
        self.pending.extend_from_slice(samples);
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        let played = std::mem::take(&mut self.pending);
        self.played
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(played);
        Ok(())
    }

    fn discard(&mut self) {
        self.pending.clear();
    }

    fn name(&self) -> &str {
        "memory"
    }
}
