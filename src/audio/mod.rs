pub mod backend;
pub mod buffer;
pub mod capture;
pub mod device;
pub mod file;
pub mod playback;

pub use backend::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioOutput, AudioSource,
};
pub use buffer::{BufferError, SessionBuffer};
pub use capture::{CapturePipeline, CaptureStatus};
pub use device::{CpalInput, CpalOutput};
pub use file::{write_wav, AudioFile, FileBackend};
pub use playback::{MemoryOutput, PlaybackError, PlaybackHandle, PlaybackPipeline};
