// Integration tests for the capture and playback pipelines
//
// Capture is fed through a frame channel and playback goes to an in-memory
// output, so both run without audio hardware.

use anyhow::Result;
use std::time::Duration;
use tokio::sync::mpsc;
use voxtake::audio::{
    AudioFrame, CapturePipeline, CaptureStatus, MemoryOutput, PlaybackPipeline, SessionBuffer,
};

const RATE: u32 = 16000;

fn frame(value: i16, len: usize) -> AudioFrame {
    AudioFrame {
        samples: vec![value; len],
        sample_rate: RATE,
        channels: 1,
        timestamp_ms: 0,
    }
}

async fn wait_for_len(buffer: &SessionBuffer, len: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while buffer.len() < len {
        assert!(
            tokio::time::Instant::now() < deadline,
            "buffer stuck at {} of {} samples",
            buffer.len(),
            len
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_capture_appends_while_playback_reads() -> Result<()> {
    let buffer = SessionBuffer::new(RATE, 1);
    let (tx, rx) = mpsc::channel(64);
    let mut capture = CapturePipeline::from_receiver(rx, buffer.clone());

    for i in 0..10 {
        tx.send(frame(i, 160)).await?;
    }
    wait_for_len(&buffer, 1600).await;

    let output = MemoryOutput::new();
    let mut playback = PlaybackPipeline::new(buffer.clone(), Box::new(output.clone()), 160)?;
    let handle = playback.play(320..640)?;

    // Capture keeps going during playback.
    for i in 10..20 {
        tx.send(frame(i, 160)).await?;
    }

    assert_eq!(handle.wait().await?, 320);
    wait_for_len(&buffer, 3200).await;

    let played = output.playbacks();
    assert_eq!(played.len(), 1);
    assert_eq!(played[0], [vec![2i16; 160], vec![3i16; 160]].concat());

    assert_eq!(capture.stop().await, CaptureStatus::Stopped);
    assert_eq!(capture.frames_captured(), 20);
    drop(tx);
    Ok(())
}

#[tokio::test]
async fn test_replay_is_identical() -> Result<()> {
    let buffer = SessionBuffer::new(RATE, 1);
    let samples: Vec<i16> = (0..5000).map(|i| (i % 1000) as i16 - 500).collect();
    buffer.append(&samples)?;

    let output = MemoryOutput::new();
    let mut playback = PlaybackPipeline::new(buffer.clone(), Box::new(output.clone()), 256)?;

    playback.play(1234..4321)?.wait().await?;
    buffer.append(&[7; 1000])?;
    playback.play(1234..4321)?.wait().await?;

    let played = output.playbacks();
    assert_eq!(played.len(), 2);
    assert_eq!(played[0], played[1]);
    assert_eq!(played[0], samples[1234..4321].to_vec());
    Ok(())
}

#[tokio::test]
async fn test_device_loss_keeps_buffer_usable() -> Result<()> {
    let buffer = SessionBuffer::new(RATE, 1);
    let (tx, rx) = mpsc::channel(64);
    let capture = CapturePipeline::from_receiver(rx, buffer.clone());

    tx.send(frame(5, 400)).await?;
    wait_for_len(&buffer, 400).await;

    // Device disappears without a stop request.
    drop(tx);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while capture.status().is_running() {
        assert!(tokio::time::Instant::now() < deadline, "capture never noticed the device loss");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(matches!(capture.status(), CaptureStatus::Degraded(_)));

    // Recorded audio stays playable.
    let output = MemoryOutput::new();
    let mut playback = PlaybackPipeline::new(buffer.clone(), Box::new(output.clone()), 100)?;
    assert_eq!(playback.play(0..400)?.wait().await?, 400);
    assert_eq!(buffer.len(), 400);
    Ok(())
}

#[tokio::test]
async fn test_stop_drains_queued_frames() -> Result<()> {
    let buffer = SessionBuffer::new(RATE, 1);
    let (tx, rx) = mpsc::channel(64);

    for i in 0..30 {
        tx.send(frame(i, 100)).await?;
    }

    let mut capture = CapturePipeline::from_receiver(rx, buffer.clone());
    capture.stop().await;

    assert_eq!(buffer.len(), 3000, "frames queued before stop must be kept");
    drop(tx);
    Ok(())
}
