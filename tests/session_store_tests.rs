// Integration tests for session persistence
//
// These tests verify that sessions are only listed once completely written,
// that interrupted saves are invisible, and that saved sessions read back
// exactly.

use anyhow::Result;
use chrono::Utc;
use std::fs;
use tempfile::TempDir;
use voxtake::audio::{AudioFile, SessionBuffer};
use voxtake::script::{Document, Mark};
use voxtake::session::{
    take_file_name, Command, Outcome, SessionManifest, SessionStore, Selection, StoreError,
    TakeController,
};

const RATE: u32 = 8000;

/// A session with two takes on chunk 0 (the first marked good) and one on chunk 1
fn recorded_session(id: &str) -> Result<(SessionManifest, Vec<i16>)> {
    let buffer = SessionBuffer::new(RATE, 1);
    let samples: Vec<i16> = (0..4000).map(|i| (i % 250) as i16).collect();
    buffer.append(&samples)?;

    let document = Document::from_texts(["First line.", "Second line."])?;
    let mut controller = TakeController::new(document, buffer.clone());

    controller.set_selection(Selection::new(0, 1000));
    controller.apply(Command::PromoteSelection);
    controller.apply(Command::MarkGood);
    controller.set_selection(Selection::new(1000, 1800));
    controller.apply(Command::PromoteSelection);
    controller.apply(Command::NextChunk);
    controller.set_selection(Selection::new(2000, 3500));
    controller.apply(Command::PromoteSelection);
    controller.apply(Command::MarkBad);

    let manifest = SessionManifest::new(
        id,
        Some("script.md".into()),
        Utc::now(),
        &buffer,
        controller.document().clone(),
    );
    Ok((manifest, samples))
}

#[test]
fn test_save_then_load_round_trip() -> Result<()> {
    let dir = TempDir::new()?;
    let store = SessionStore::new(dir.path().join("sessions"));
    let (manifest, samples) = recorded_session("chapter-1")?;

    let path = store.save(&manifest, &samples)?;
    assert_eq!(path, store.session_dir("chapter-1"));

    let loaded = store.load("chapter-1")?;
    assert_eq!(loaded.manifest, manifest);
    assert_eq!(loaded.samples, samples);
    assert_eq!(loaded.take_samples(0, 1), Some(&samples[1000..1800]));
    assert_eq!(loaded.take_samples(1, 0), Some(&samples[2000..3500]));
    assert_eq!(loaded.manifest.document.count_marked(Mark::Good), 1);
    Ok(())
}

#[test]
fn test_good_takes_exported() -> Result<()> {
    let dir = TempDir::new()?;
    let store = SessionStore::new(dir.path());
    let (manifest, samples) = recorded_session("s1")?;

    let path = store.save(&manifest, &samples)?;

    let takes: Vec<_> = fs::read_dir(path.join("takes"))?
        .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<Result<_, _>>()?;
    assert_eq!(takes, vec![take_file_name(0, 0)]);

    let exported = AudioFile::open(path.join("takes").join(take_file_name(0, 0)))?;
    assert_eq!(exported.samples, samples[0..1000].to_vec());
    Ok(())
}

#[test]
fn test_take_export_can_be_disabled() -> Result<()> {
    let dir = TempDir::new()?;
    let store = SessionStore::new(dir.path()).with_take_export(false);
    let (manifest, samples) = recorded_session("s1")?;

    let path = store.save(&manifest, &samples)?;

    assert!(!path.join("takes").exists());
    Ok(())
}

#[test]
fn test_interrupted_save_is_not_listed() -> Result<()> {
    let dir = TempDir::new()?;
    let store = SessionStore::new(dir.path());
    let (manifest, samples) = recorded_session("done")?;
    store.save(&manifest, &samples)?;

    // A save that died before publishing: complete-looking files in staging.
    let staging = dir.path().join(".staging-crashed-0000");
    fs::create_dir(&staging)?;
    fs::write(staging.join("audio.wav"), b"RIFF")?;
    fs::write(staging.join("session.json"), b"{}")?;

    // A directory without a manifest is not a session either.
    fs::create_dir(dir.path().join("half-copied"))?;
    fs::write(dir.path().join("half-copied").join("audio.wav"), b"RIFF")?;

    // Nor is a stray file.
    fs::write(dir.path().join("notes.txt"), b"hello")?;

    assert_eq!(store.list()?, vec!["done".to_string()]);

    assert_eq!(store.sweep_staging()?, 1);
    assert!(!staging.exists());
    assert!(store.session_dir("done").exists());
    assert!(dir.path().join("half-copied").exists());
    Ok(())
}

#[test]
fn test_list_is_sorted_and_distinct() -> Result<()> {
    let dir = TempDir::new()?;
    let store = SessionStore::new(dir.path());

    for id in ["zeta", "alpha", "mid"] {
        let (manifest, samples) = recorded_session(id)?;
        store.save(&manifest, &samples)?;
    }

    assert_eq!(store.list()?, vec!["alpha", "mid", "zeta"]);
    Ok(())
}

#[test]
fn test_list_missing_root() {
    let dir = TempDir::new().unwrap();
    let store = SessionStore::new(dir.path().join("absent"));

    assert!(matches!(store.list(), Err(StoreError::RootMissing(_))));
}

#[test]
fn test_existing_session_never_overwritten() -> Result<()> {
    let dir = TempDir::new()?;
    let store = SessionStore::new(dir.path());
    let (manifest, samples) = recorded_session("same")?;
    store.save(&manifest, &samples)?;

    let (mut second, other) = recorded_session("same")?;
    second.script = Some("other.md".into());

    assert!(matches!(
        store.save(&second, &other),
        Err(StoreError::AlreadyExists(id)) if id == "same"
    ));
    assert_eq!(store.manifest("same")?.script, manifest.script);

    let leftovers: Vec<_> = fs::read_dir(dir.path())?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
        .collect();
    assert!(leftovers.is_empty(), "failed save left staging behind");
    Ok(())
}

#[test]
fn test_invalid_ids_rejected() -> Result<()> {
    let dir = TempDir::new()?;
    let store = SessionStore::new(dir.path());

    for id in ["", ".hidden", "../escape", "a/b"] {
        let (manifest, samples) = recorded_session(id)?;
        assert!(matches!(
            store.save(&manifest, &samples),
            Err(StoreError::InvalidId { .. })
        ));
    }
    assert!(matches!(store.load("../x"), Err(StoreError::InvalidId { .. })));
    Ok(())
}

#[test]
fn test_load_unknown_session() {
    let dir = TempDir::new().unwrap();
    let store = SessionStore::new(dir.path());

    assert!(matches!(store.load("nope"), Err(StoreError::NotFound(_))));
}

#[test]
fn test_edited_manifest_with_inverted_take_rejected() -> Result<()> {
    let dir = TempDir::new()?;
    let store = SessionStore::new(dir.path());
    let (manifest, samples) = recorded_session("edited")?;
    store.save(&manifest, &samples)?;

    let path = store.session_dir("edited").join("session.json");
    let mut json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
    json["document"]["chunks"][0]["takes"][0]["start"] = serde_json::json!(900);
    json["document"]["chunks"][0]["takes"][0]["end"] = serde_json::json!(100);
    fs::write(&path, serde_json::to_string_pretty(&json)?)?;

    assert!(matches!(store.manifest("edited"), Err(StoreError::Other(_))));
    assert!(store.load("edited").is_err());
    Ok(())
}

#[test]
fn test_stereo_session_saves_whole_frames() -> Result<()> {
    let dir = TempDir::new()?;
    let store = SessionStore::new(dir.path());

    let buffer = SessionBuffer::new(RATE, 2);
    let samples: Vec<i16> = (0..100).collect();
    buffer.append(&samples)?;

    let document = Document::from_texts(["Only line."])?;
    let mut controller = TakeController::new(document, buffer.clone());

    // A range that splits a left/right pair can never be written as WAV.
    assert!(controller.set_selection(Selection::new(1, 4)).is_ignored());
    assert!(controller.apply(Command::PromoteSelection).is_ignored());

    assert_eq!(controller.set_selection(Selection::new(2, 40)), Outcome::Applied);
    assert_eq!(controller.apply(Command::PromoteSelection), Outcome::Applied);
    controller.apply(Command::MarkGood);

    let manifest = SessionManifest::new(
        "stereo",
        None,
        Utc::now(),
        &buffer,
        controller.document().clone(),
    );
    let path = store.save(&manifest, &samples)?;

    let take = AudioFile::open(path.join("takes").join(take_file_name(0, 0)))?;
    assert_eq!(take.channels, 2);
    assert_eq!(take.samples, samples[2..40]);
    assert_eq!(store.list()?, vec!["stereo"]);
    Ok(())
}
