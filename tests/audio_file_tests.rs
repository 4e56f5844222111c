// Integration tests for WAV file reading and writing
//
// Fixtures are generated in a temp directory so the tests need no audio files.

use anyhow::Result;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::PathBuf;
use tempfile::TempDir;
use voxtake::audio::{write_wav, AudioFile};

fn sine(sample_rate: u32, seconds: f64) -> Vec<i16> {
    let count = (sample_rate as f64 * seconds) as usize;
    (0..count)
        .map(|i| {
            let t = i as f64 / sample_rate as f64;
            ((t * 440.0 * std::f64::consts::TAU).sin() * 8000.0) as i16
        })
        .collect()
}

#[test]
fn test_audio_file_round_trip_metadata() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("tone.wav");
    let samples = sine(16000, 0.5);

    write_wav(&path, &samples, 16000, 1)?;
    let audio = AudioFile::open(&path)?;

    assert_eq!(audio.sample_rate, 16000);
    assert_eq!(audio.channels, 1);
    assert_eq!(audio.samples, samples);
    assert!((audio.duration_seconds - 0.5).abs() < 0.001);
    assert!(audio.path.ends_with("tone.wav"));

    Ok(())
}

#[test]
fn test_audio_file_nonexistent() {
    let path = PathBuf::from("/nonexistent/path/to/audio.wav");
    let result = AudioFile::open(&path);

    assert!(result.is_err(), "Opening nonexistent file should fail");
}

#[test]
fn test_audio_file_rejects_float_wav() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("float.wav");

    let spec = WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(&path, spec)?;
    for _ in 0..100 {
        writer.write_sample(0.25f32)?;
    }
    writer.finalize()?;

    assert!(AudioFile::open(&path).is_err(), "Only 16-bit PCM is supported");
    Ok(())
}

#[test]
fn test_write_empty_wav() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("empty.wav");

    write_wav(&path, &[], 44100, 2)?;
    let audio = AudioFile::open(&path)?;

    assert!(audio.samples.is_empty());
    assert_eq!(audio.duration_seconds, 0.0);
    Ok(())
}
