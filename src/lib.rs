pub mod audio;
pub mod config;
pub mod script;
pub mod session;
pub mod tui;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFile, AudioFrame, AudioOutput,
    AudioSource, CapturePipeline, CaptureStatus, MemoryOutput, PlaybackPipeline, SessionBuffer,
};
pub use config::Config;
pub use script::{load_script, Chunk, Document, Mark, Take};
pub use session::{
    Command, Outcome, RecordingSession, Selection, SessionConfig, SessionManifest, SessionStats,
    SessionStore, StoreError, TakeController, TakeState,
};
