// Integration tests for audio backend abstractions
//
// These tests verify the frame and config types and that the WAV file input
// delivers a whole file as fixed-size frames.

use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use voxtake::audio::{
    write_wav, AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource,
    FileBackend,
};

fn config(sample_rate: u32, channels: u16, frame_size: usize) -> AudioBackendConfig {
    AudioBackendConfig {
        sample_rate,
        channels,
        frame_size,
        ..Default::default()
    }
}

#[test]
fn test_audio_backend_config_default() {
    let config = AudioBackendConfig::default();

    assert_eq!(config.sample_rate, 44100);
    assert_eq!(config.channels, 1, "Default should be mono");
    assert_eq!(config.frame_size, 1024);
    assert_eq!(config.device_open_timeout, Duration::from_secs(3));
}

#[test]
fn test_audio_frame_stereo_interleaved() {
    // Stereo audio: samples are interleaved [L, R, L, R, ...]
    let frame = AudioFrame {
        samples: vec![100, 200, 150, 250, 175, 275],
        sample_rate: 48000,
        channels: 2,
        timestamp_ms: 0,
    };

    let left: Vec<i16> = frame.samples.iter().step_by(2).copied().collect();
    assert_eq!(left, vec![100, 150, 175]);
    assert_eq!(frame.duration(), Duration::from_micros(62));
}

#[test]
fn test_factory_rejects_missing_input_file() {
    let result = AudioBackendFactory::create(
        AudioSource::File(PathBuf::from("/nonexistent/input.wav")),
        AudioBackendConfig::default(),
    );
    assert!(result.is_err());
}

#[tokio::test]
async fn test_file_backend_delivers_every_sample() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("input.wav");
    let samples: Vec<i16> = (0..2500).map(|i| (i % 300) as i16).collect();
    write_wav(&path, &samples, 8000, 1)?;

    let mut backend = FileBackend::new(path, config(8000, 1, 1000))?.unpaced();
    let mut rx = backend.start().await?;

    let mut received = Vec::new();
    let mut frame_sizes = Vec::new();
    while let Some(frame) = rx.recv().await {
        assert_eq!(frame.sample_rate, 8000);
        frame_sizes.push(frame.samples.len());
        received.extend(frame.samples);
    }

    assert_eq!(received, samples);
    assert_eq!(frame_sizes, vec![1000, 1000, 500]);
    Ok(())
}

#[tokio::test]
async fn test_file_backend_rejects_format_mismatch() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("stereo.wav");
    write_wav(&path, &[0; 200], 8000, 2)?;

    let mut backend = FileBackend::new(path, config(8000, 1, 100))?;
    let result = backend.start().await;

    assert!(result.is_err(), "Stereo file must not feed a mono session");
    Ok(())
}
