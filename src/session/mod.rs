//! Recording session engine
//!
//! This module provides:
//! - `TakeController`: the take lifecycle state machine and navigation cursor
//! - `Command`: the user command set with per-state availability
//! - `RecordingSession`: capture and playback pipelines around one session buffer
//! - `SessionStore`: crash-safe publishing and discovery of saved sessions

mod command;
mod config;
mod controller;
mod session;
mod stats;
mod store;

pub use command::{Command, ControllerStatus};
pub use config::SessionConfig;
pub use controller::{Outcome, Selection, TakeController, TakeState};
pub use session::RecordingSession;
pub use stats::SessionStats;
pub use store::{take_file_name, SessionManifest, SessionStore, StoreError, StoredSession};
