use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path)
            .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;

        let spec = reader.spec();
        if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
            bail!(
                "Unsupported WAV format in {}: expected 16-bit PCM, got {}-bit {:?}",
                path.display(),
                spec.bits_per_sample,
                spec.sample_format
            );
        }

        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }
}

/// Write 16-bit PCM samples to a WAV file and flush it to disk
pub fn write_wav(path: &Path, samples: &[i16], sample_rate: u32, channels: u16) -> Result<()> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer: WavWriter<BufWriter<File>> = WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create WAV file: {:?}", path))?;

    for &sample in samples {
        writer
            .write_sample(sample)
            .context("Failed to write sample to WAV")?;
    }

    writer
        .finalize()
        .with_context(|| format!("Failed to finalize WAV file: {:?}", path))?;

    File::open(path)
        .and_then(|f| f.sync_all())
        .with_context(|| format!("Failed to sync WAV file: {:?}", path))?;

    Ok(())
}

/// Capture backend that plays a WAV file into the session as if it were a microphone
///
/// Frames are paced in real time unless `realtime` is off. When the file runs
/// out the channel closes, which the capture pipeline treats as the device
/// going away.
pub struct FileBackend {
    path: PathBuf,
    config: AudioBackendConfig,
    realtime: bool,
    capturing: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
    name: String,
}

impl FileBackend {
    pub fn new(path: PathBuf, config: AudioBackendConfig) -> Result<Self> {
        if !path.exists() {
            bail!("Input file does not exist: {}", path.display());
        }

        let name = format!("file {}", path.display());

        Ok(Self {
            path,
            config,
            realtime: true,
            capturing: Arc::new(AtomicBool::new(false)),
            task: None,
            name,
        })
    }

    /// Deliver frames as fast as the channel accepts them
    pub fn unpaced(mut self) -> Self {
        self.realtime = false;
        self
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.capturing.load(Ordering::SeqCst) {
            bail!("Already capturing");
        }

        let path = self.path.clone();
        let audio = tokio::task::spawn_blocking(move || AudioFile::open(path))
            .await
            .context("File reader task failed")??;

        if audio.sample_rate != self.config.sample_rate || audio.channels != self.config.channels {
            bail!(
                "{} is {}Hz/{}ch but the session records {}Hz/{}ch",
                audio.path,
                audio.sample_rate,
                audio.channels,
                self.config.sample_rate,
                self.config.channels
            );
        }

        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let samples_per_frame = self.config.samples_per_frame().max(1);
        let frame_period = Duration::from_secs_f64(
            self.config.frame_size.max(1) as f64 / self.config.sample_rate.max(1) as f64,
        );
        let realtime = self.realtime;
        let capturing = Arc::clone(&self.capturing);
        capturing.store(true, Ordering::SeqCst);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(frame_period);
            let per_second = audio.sample_rate as u64 * audio.channels.max(1) as u64;
            let mut offset = 0usize;

            for samples in audio.samples.chunks(samples_per_frame) {
                if !capturing.load(Ordering::SeqCst) {
                    break;
                }
                if realtime {
                    ticker.tick().await;
                }

                let frame = AudioFrame {
                    samples: samples.to_vec(),
                    sample_rate: audio.sample_rate,
                    channels: audio.channels,
                    timestamp_ms: offset as u64 * 1000 / per_second.max(1),
                };
                offset += samples.len();

                if tx.send(frame).await.is_err() {
                    warn!("Capture channel closed while reading {}", audio.path);
                    break;
                }
            }

            capturing.store(false, Ordering::SeqCst);
            info!("File input finished after {} samples", offset);
        });

        self.task = Some(task);

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.capturing.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.await.context("File input task panicked")?;
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_open_preserves_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tone.wav");
        let samples: Vec<i16> = (0..800).map(|i| (i * 10) as i16).collect();

        write_wav(&path, &samples, 8000, 2).unwrap();
        let audio = AudioFile::open(&path).unwrap();

        assert_eq!(audio.sample_rate, 8000);
        assert_eq!(audio.channels, 2);
        assert_eq!(audio.samples, samples);
        assert!((audio.duration_seconds - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_file_backend_requires_existing_file() {
        let result = FileBackend::new(
            PathBuf::from("/nonexistent/input.wav"),
            AudioBackendConfig::default(),
        );
        assert!(result.is_err());
    }
}
