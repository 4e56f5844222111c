//! cpal input/output devices.
//!
//! cpal streams are not `Send`, so each stream lives on its own OS thread for
//! as long as it is open. The owning struct talks to that thread through a
//! stop channel and learns whether the device opened through a ready channel
//! with a bounded wait, so a wedged driver fails startup instead of hanging it.

use anyhow::{bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, Device, SampleFormat, SampleRate, SizedSample, StreamConfig, StreamError,
    SupportedStreamConfigRange,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame, AudioOutput};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Thread that keeps a cpal stream alive until told to stop
struct StreamThread {
    stop_tx: std_mpsc::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    fn shutdown(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Audio device thread panicked");
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Input,
    Output,
}

/// Find a device whose name contains `pattern` (case-insensitive), else the default device
fn resolve_device(pattern: Option<&str>, direction: Direction) -> Result<Device> {
    let host = cpal::default_host();

    if let Some(pattern) = pattern {
        let pat = pattern.to_lowercase();
        let devices: Vec<Device> = match direction {
            Direction::Input => host
                .input_devices()
                .context("Failed to enumerate input devices")?
                .collect(),
            Direction::Output => host
                .output_devices()
                .context("Failed to enumerate output devices")?
                .collect(),
        };
        if let Some(device) = devices.into_iter().find(|d| {
            d.name()
                .map(|n| n.to_lowercase().contains(&pat))
                .unwrap_or(false)
        }) {
            return Ok(device);
        }
        warn!("No audio device matches '{}', using the default device", pattern);
    }

    match direction {
        Direction::Input => host.default_input_device().context("No input audio device found"),
        Direction::Output => host
            .default_output_device()
            .context("No output audio device found"),
    }
}

/// Sample types the device streams are built with, in order of preference
const STREAM_FORMATS: [SampleFormat; 2] = [SampleFormat::F32, SampleFormat::I16];

/// Build a stream config at exactly the requested rate and channel count
///
/// Returns the sample format to build the stream with: `f32` when the device
/// offers it, else `i16`.
fn stream_config(
    device: &Device,
    config: &AudioBackendConfig,
    direction: Direction,
) -> Result<(StreamConfig, SampleFormat)> {
    let desired_rate = SampleRate(config.sample_rate);
    let device_name = device.name().unwrap_or_else(|_| "<unknown>".into());

    let ranges: Vec<SupportedStreamConfigRange> = match direction {
        Direction::Input => device
            .supported_input_configs()
            .context("Cannot query device input configs")?
            .collect(),
        Direction::Output => device
            .supported_output_configs()
            .context("Cannot query device output configs")?
            .collect(),
    };

    let offered: Vec<SampleFormat> = ranges
        .iter()
        .filter(|c| {
            c.channels() == config.channels
                && c.min_sample_rate() <= desired_rate
                && desired_rate <= c.max_sample_rate()
        })
        .map(|c| c.sample_format())
        .collect();

    if offered.is_empty() {
        bail!(
            "Device '{}' does not support {}Hz with {} channel(s)",
            device_name,
            config.sample_rate,
            config.channels
        );
    }

    let Some(format) = STREAM_FORMATS.into_iter().find(|f| offered.contains(f)) else {
        bail!(
            "Device '{}' has no f32 or i16 stream at {}Hz with {} channel(s), only {:?}",
            device_name,
            config.sample_rate,
            config.channels,
            offered
        );
    };

    let stream_config = StreamConfig {
        channels: config.channels,
        sample_rate: desired_rate,
        buffer_size: BufferSize::Default,
    };
    Ok((stream_config, format))
}

/// Conversion between the device's sample type and the session's `i16`
trait DeviceSample: SizedSample + Send + 'static {
    const SILENCE: Self;

    fn to_i16(self) -> i16;

    fn from_i16(sample: i16) -> Self;
}

impl DeviceSample for f32 {
    const SILENCE: Self = 0.0;

    #[inline]
    fn to_i16(self) -> i16 {
        (self.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
    }

    #[inline]
    fn from_i16(sample: i16) -> Self {
        sample as f32 / i16::MAX as f32
    }
}

impl DeviceSample for i16 {
    const SILENCE: Self = 0;

    #[inline]
    fn to_i16(self) -> i16 {
        self
    }

    #[inline]
    fn from_i16(sample: i16) -> Self {
        sample
    }
}

/// Cuts the device's variable-size callbacks into fixed-size frames
struct FrameAssembler {
    pending: Vec<i16>,
    samples_per_frame: usize,
    emitted: u64,
    sample_rate: u32,
    channels: u16,
}

impl FrameAssembler {
    fn new(config: &AudioBackendConfig) -> Self {
        let samples_per_frame = config.samples_per_frame().max(1);
        Self {
            pending: Vec::with_capacity(samples_per_frame),
            samples_per_frame,
            emitted: 0,
            sample_rate: config.sample_rate,
            channels: config.channels,
        }
    }

    fn push<T: DeviceSample>(&mut self, data: &[T], mut emit: impl FnMut(AudioFrame)) {
        for &sample in data {
            self.pending.push(sample.to_i16());
            if self.pending.len() == self.samples_per_frame {
                let samples = std::mem::replace(
                    &mut self.pending,
                    Vec::with_capacity(self.samples_per_frame),
                );
                let per_second = self.sample_rate as u64 * self.channels.max(1) as u64;
                let timestamp_ms = if per_second == 0 {
                    0
                } else {
                    self.emitted * 1000 / per_second
                };
                self.emitted += samples.len() as u64;
                emit(AudioFrame {
                    samples,
                    sample_rate: self.sample_rate,
                    channels: self.channels,
                    timestamp_ms,
                });
            }
        }
    }
}

/// Microphone capture through cpal
pub struct CpalInput {
    device_pattern: Option<String>,
    config: AudioBackendConfig,
    thread: Option<StreamThread>,
    name: String,
}

impl CpalInput {
    pub fn new(device_pattern: Option<String>, config: AudioBackendConfig) -> Self {
        Self {
            device_pattern,
            config,
            thread: None,
            name: "cpal input".to_string(),
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for CpalInput {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.thread.is_some() {
            bail!("Already capturing");
        }

        let (frame_tx, frame_rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<String>>(1);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let pattern = self.device_pattern.clone();
        let config = self.config.clone();
        let error_stop = stop_tx.clone();

        let handle = thread::Builder::new()
            .name("voxtake-capture".into())
            .spawn(move || {
                let opened = open_input_stream(pattern.as_deref(), &config, frame_tx, error_stop);
                match opened {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        // Either a stop request or the sender side going away ends the stream.
                        let _ = stop_rx.recv();
                        drop(stream);
                        info!("Capture device closed");
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .context("Failed to spawn capture thread")?;

        let thread = StreamThread {
            stop_tx,
            handle: Some(handle),
        };

        let timeout = self.config.device_open_timeout;
        let ready = tokio::task::spawn_blocking(move || ready_rx.recv_timeout(timeout))
            .await
            .context("Capture open task failed")?;

        match ready {
            Ok(Ok(name)) => {
                info!(
                    "Audio input: {} ({}Hz, {}ch, {} frames per buffer)",
                    name, self.config.sample_rate, self.config.channels, self.config.frame_size
                );
                self.name = name;
                self.thread = Some(thread);
                Ok(frame_rx)
            }
            Ok(Err(e)) => {
                thread.shutdown();
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) => {
                // The thread may be stuck inside the driver; detach it.
                let _ = thread.stop_tx.send(());
                bail!("Timed out after {:?} opening the input device", timeout)
            }
            Err(RecvTimeoutError::Disconnected) => {
                thread.shutdown();
                bail!("Capture thread exited before the device opened")
            }
        }
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(thread) = self.thread.take() {
            info!("Stopping audio input: {}", self.name);
            tokio::task::spawn_blocking(move || thread.shutdown())
                .await
                .context("Failed to join capture thread")?;
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.thread.is_some()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.stop_tx.send(());
        }
    }
}

fn open_input_stream(
    pattern: Option<&str>,
    config: &AudioBackendConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
    error_stop: std_mpsc::Sender<()>,
) -> Result<(cpal::Stream, String)> {
    let device = resolve_device(pattern, Direction::Input)?;
    let name = device.name().unwrap_or_else(|_| "<unknown>".into());
    let (stream_config, format) = stream_config(&device, config, Direction::Input)?;

    let assembler = FrameAssembler::new(config);
    let stream = match format {
        SampleFormat::I16 => {
            build_input::<i16>(&device, &stream_config, assembler, frame_tx, error_stop)
        }
        _ => build_input::<f32>(&device, &stream_config, assembler, frame_tx, error_stop),
    }?;

    stream.play().context("Failed to start audio input stream")?;
    info!("Input stream format: {:?}", format);

    Ok((stream, name))
}

fn build_input<T: DeviceSample>(
    device: &Device,
    stream_config: &StreamConfig,
    mut assembler: FrameAssembler,
    frame_tx: mpsc::Sender<AudioFrame>,
    error_stop: std_mpsc::Sender<()>,
) -> Result<cpal::Stream> {
    device
        .build_input_stream(
            stream_config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                assembler.push(data, |frame| {
                    if let Err(mpsc::error::TrySendError::Full(_)) = frame_tx.try_send(frame) {
                        warn!("Capture channel full, dropping a frame");
                    }
                });
            },
            move |err| match err {
                StreamError::DeviceNotAvailable => {
                    error!("Audio input device is no longer available");
                    let _ = error_stop.send(());
                }
                other => error!("Audio capture error: {}", other),
            },
            None,
        )
        .context("Failed to build audio input stream")
}

/// Speaker output through cpal
///
/// Samples are queued into a shared deque that the device callback drains;
/// underruns are filled with silence.
pub struct CpalOutput {
    queue: Arc<Mutex<VecDeque<i16>>>,
    failed: Arc<AtomicBool>,
    high_water: usize,
    stall_timeout: Duration,
    thread: Option<StreamThread>,
    name: String,
}

impl CpalOutput {
    pub fn open(device_pattern: Option<String>, config: AudioBackendConfig) -> Result<Self> {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let failed = Arc::new(AtomicBool::new(false));

        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<String>>(1);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread_queue = Arc::clone(&queue);
        let thread_failed = Arc::clone(&failed);
        let thread_config = config.clone();
        let error_stop = stop_tx.clone();

        let handle = thread::Builder::new()
            .name("voxtake-playback".into())
            .spawn(move || {
                let opened = open_output_stream(
                    device_pattern.as_deref(),
                    &thread_config,
                    thread_queue,
                    thread_failed,
                    error_stop,
                );
                match opened {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        let _ = stop_rx.recv();
                        drop(stream);
                        info!("Playback device closed");
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .context("Failed to spawn playback thread")?;

        let thread = StreamThread {
            stop_tx,
            handle: Some(handle),
        };

        let name = match ready_rx.recv_timeout(config.device_open_timeout) {
            Ok(Ok(name)) => name,
            Ok(Err(e)) => {
                thread.shutdown();
                return Err(e);
            }
            Err(RecvTimeoutError::Timeout) => {
                let _ = thread.stop_tx.send(());
                bail!(
                    "Timed out after {:?} opening the output device",
                    config.device_open_timeout
                )
            }
            Err(RecvTimeoutError::Disconnected) => {
                thread.shutdown();
                bail!("Playback thread exited before the device opened")
            }
        };

        info!(
            "Audio output: {} ({}Hz, {}ch)",
            name, config.sample_rate, config.channels
        );

        Ok(Self {
            queue,
            failed,
            high_water: config.samples_per_frame().max(1) * 4,
            stall_timeout: config.device_open_timeout,
            thread: Some(thread),
            name,
        })
    }

    fn queued(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn check_failed(&self) -> Result<()> {
        if self.failed.load(Ordering::SeqCst) {
            bail!("Output device {} is no longer available", self.name);
        }
        Ok(())
    }

    /// Sleep until the queue drops to `level`, failing if the device stops consuming
    fn wait_below(&self, level: usize) -> Result<()> {
        let mut last = self.queued();
        let mut last_progress = Instant::now();
        while last > level {
            self.check_failed()?;
            thread::sleep(POLL_INTERVAL);
            let now = self.queued();
            if now < last {
                last_progress = Instant::now();
            } else if last_progress.elapsed() > self.stall_timeout {
                bail!("Output device {} stalled", self.name);
            }
            last = now;
        }
        Ok(())
    }
}

impl AudioOutput for CpalOutput {
    fn write_frame(&mut self, samples: &[i16]) -> Result<()> {
        self.check_failed()?;
        self.wait_below(self.high_water.saturating_sub(samples.len()))?;
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(samples.iter().copied());
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        self.wait_below(0)
    }

    fn discard(&mut self) {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            thread.shutdown();
        }
    }
}

fn open_output_stream(
    pattern: Option<&str>,
    config: &AudioBackendConfig,
    queue: Arc<Mutex<VecDeque<i16>>>,
    failed: Arc<AtomicBool>,
    error_stop: std_mpsc::Sender<()>,
) -> Result<(cpal::Stream, String)> {
    let device = resolve_device(pattern, Direction::Output)?;
    let name = device.name().unwrap_or_else(|_| "<unknown>".into());
    let (stream_config, format) = stream_config(&device, config, Direction::Output)?;

    let stream = match format {
        SampleFormat::I16 => {
            build_output::<i16>(&device, &stream_config, queue, failed, error_stop)
        }
        _ => build_output::<f32>(&device, &stream_config, queue, failed, error_stop),
    }?;

    stream.play().context("Failed to start audio output stream")?;
    info!("Output stream format: {:?}", format);

    Ok((stream, name))
}

fn build_output<T: DeviceSample>(
    device: &Device,
    stream_config: &StreamConfig,
    queue: Arc<Mutex<VecDeque<i16>>>,
    failed: Arc<AtomicBool>,
    error_stop: std_mpsc::Sender<()>,
) -> Result<cpal::Stream> {
    device
        .build_output_stream(
            stream_config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut queue = queue.lock().unwrap_or_else(PoisonError::into_inner);
                for out in data.iter_mut() {
                    *out = queue.pop_front().map(T::from_i16).unwrap_or(T::SILENCE);
                }
            },
            move |err| match err {
                StreamError::DeviceNotAvailable => {
                    error!("Audio output device is no longer available");
                    failed.store(true, Ordering::SeqCst);
                    let _ = error_stop.send(());
                }
                other => error!("Audio playback error: {}", other),
            },
            None,
        )
        .context("Failed to build audio output stream")
}
