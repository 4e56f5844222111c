// Integration tests for the take lifecycle
//
// The controller runs against a buffer filled by a live capture pipeline,
// the way the terminal front end drives it.

use anyhow::Result;
use std::time::Duration;
use tokio::sync::mpsc;
use voxtake::audio::{AudioFrame, CapturePipeline, SessionBuffer};
use voxtake::script::{parse_markdown, Document, Mark, Take};
use voxtake::session::{Command, Outcome, Selection, TakeController, TakeState};

const RATE: u32 = 16000;

struct Rig {
    buffer: SessionBuffer,
    tx: mpsc::Sender<AudioFrame>,
    pipeline: CapturePipeline,
    controller: TakeController,
}

impl Rig {
    fn new(script: &str) -> Result<Self> {
        let buffer = SessionBuffer::new(RATE, 1);
        let (tx, rx) = mpsc::channel(256);
        let pipeline = CapturePipeline::from_receiver(rx, buffer.clone());
        let document = Document::from_texts(parse_markdown(script))?;
        let controller = TakeController::new(document, buffer.clone());
        Ok(Self {
            buffer,
            tx,
            pipeline,
            controller,
        })
    }

    /// Capture `samples` more samples and wait until they are in the buffer
    async fn capture(&self, samples: usize) -> Result<()> {
        let target = self.buffer.len() + samples;
        let mut left = samples;
        while left > 0 {
            let n = left.min(100);
            self.tx
                .send(AudioFrame {
                    samples: vec![1; n],
                    sample_rate: RATE,
                    channels: 1,
                    timestamp_ms: 0,
                })
                .await?;
            left -= n;
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.buffer.len() < target {
            assert!(tokio::time::Instant::now() < deadline, "capture stalled");
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        Ok(())
    }

    fn takes(&self, chunk: usize) -> Vec<Take> {
        self.controller.document().chunk(chunk).unwrap().takes().to_vec()
    }
}

const SCRIPT: &str = "# Intro\n\nWelcome to the show.\n\nToday we talk about rivers.\n";

#[tokio::test]
async fn test_two_takes_on_one_chunk() -> Result<()> {
    let mut rig = Rig::new(SCRIPT)?;

    assert_eq!(rig.controller.apply(Command::StartTake), Outcome::Applied);
    assert_eq!(rig.controller.state(), TakeState::Recording { anchor: 0, chunk: 0 });
    rig.capture(1000).await?;
    rig.controller.apply(Command::EndTake);

    assert_eq!(rig.takes(0), vec![Take::new(0, 1000)]);

    rig.controller.apply(Command::StartTake);
    rig.capture(700).await?;
    rig.controller.apply(Command::EndTake);

    assert_eq!(rig.takes(0), vec![Take::new(0, 1000), Take::new(1000, 1700)]);
    assert_eq!(rig.controller.selected_take(), Some(1));

    rig.pipeline.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_take_ignores_audio_outside_its_window() -> Result<()> {
    let mut rig = Rig::new(SCRIPT)?;

    rig.capture(500).await?;
    rig.controller.apply(Command::StartTake);
    rig.capture(300).await?;
    rig.controller.apply(Command::EndTake);
    rig.capture(900).await?;

    assert_eq!(rig.takes(0), vec![Take::new(500, 800)]);
    assert_eq!(rig.buffer.len(), 1700);

    rig.pipeline.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_end_and_mark_bad() -> Result<()> {
    let mut rig = Rig::new(SCRIPT)?;

    rig.capture(200).await?;
    rig.controller.apply(Command::StartTake);
    rig.capture(250).await?;
    assert_eq!(rig.controller.apply(Command::MarkBad), Outcome::Applied);

    assert_eq!(
        rig.takes(0),
        vec![Take {
            start: 200,
            end: 450,
            mark: Mark::Bad
        }]
    );
    assert_eq!(rig.controller.state(), TakeState::Idle);

    rig.pipeline.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_navigation_pinned_while_recording() -> Result<()> {
    let mut rig = Rig::new(SCRIPT)?;

    rig.controller.apply(Command::NextChunk);
    rig.controller.apply(Command::StartTake);
    assert!(rig.controller.apply(Command::NextChunk).is_ignored());
    assert!(rig.controller.apply(Command::PrevChunk).is_ignored());
    assert_eq!(rig.controller.selected_chunk(), 1);

    rig.capture(100).await?;
    rig.controller.apply(Command::EndTake);

    assert!(rig.takes(0).is_empty());
    assert_eq!(rig.takes(1), vec![Take::new(0, 100)]);
    assert!(rig.takes(2).is_empty());

    rig.pipeline.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_selection_promoted_without_touching_recording_state() -> Result<()> {
    let mut rig = Rig::new(SCRIPT)?;
    rig.capture(400).await?;

    assert_eq!(
        rig.controller.set_selection(Selection::new(300, 100)),
        Outcome::Applied
    );
    assert_eq!(rig.controller.selection(), Some(Selection { start: 100, end: 300 }));

    rig.controller.apply(Command::PromoteSelection);

    assert_eq!(rig.takes(0), vec![Take::new(100, 300)]);
    assert_eq!(rig.controller.selection(), None);
    assert_eq!(rig.controller.state(), TakeState::Idle);

    rig.pipeline.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_live_selection_around_a_line() -> Result<()> {
    let mut rig = Rig::new(SCRIPT)?;

    rig.capture(100).await?;
    rig.controller.apply(Command::SelectionStart);
    rig.capture(640).await?;
    rig.controller.apply(Command::SelectionEnd);
    rig.controller.apply(Command::NextChunk);
    rig.controller.apply(Command::PromoteSelection);
    rig.controller.apply(Command::MarkGood);

    assert_eq!(
        rig.takes(1),
        vec![Take {
            start: 100,
            end: 740,
            mark: Mark::Good
        }]
    );

    rig.pipeline.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_marks_only_change_in_place() -> Result<()> {
    let mut rig = Rig::new(SCRIPT)?;

    for _ in 0..3 {
        rig.controller.apply(Command::StartTake);
        rig.capture(100).await?;
        rig.controller.apply(Command::EndTake);
    }
    let before = rig.takes(0);

    rig.controller.apply(Command::PrevTake);
    rig.controller.apply(Command::MarkGood);
    rig.controller.apply(Command::PrevTake);
    rig.controller.apply(Command::MarkBad);
    rig.controller.apply(Command::MarkGood);

    let after = rig.takes(0);
    assert_eq!(after.len(), before.len());
    for (b, a) in before.iter().zip(&after) {
        assert_eq!((b.start, b.end), (a.start, a.end));
    }
    assert_eq!(
        after.iter().map(|t| t.mark).collect::<Vec<_>>(),
        vec![Mark::Good, Mark::Good, Mark::Unmarked]
    );

    rig.pipeline.stop().await;
    Ok(())
}
