use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Statistics about a recording session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Session identifier (also the directory name once saved)
    pub session_id: String,

    /// When the session started
    pub started_at: DateTime<Utc>,

    /// Seconds of audio in the session buffer
    pub buffered_secs: f64,

    /// Number of script chunks
    pub chunk_count: usize,

    /// Takes across all chunks
    pub take_count: usize,

    pub good_takes: usize,
    pub bad_takes: usize,
    pub unmarked_takes: usize,

    /// Capture pipeline state, as displayed
    pub capture: String,

    /// An output device error stopped a playback
    pub playback_degraded: bool,

    /// The session has been written to disk
    pub saved: bool,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | {:.1}s | {} takes ({} good, {} bad) | capture {}",
            self.session_id,
            self.buffered_secs,
            self.take_count,
            self.good_takes,
            self.bad_takes,
            self.capture
        )?;
        if self.playback_degraded {
            write!(f, " | playback failed")?;
        }
        if self.saved {
            write!(f, " | saved")?;
        }
        Ok(())
    }
}
