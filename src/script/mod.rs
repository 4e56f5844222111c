//! Script document model
//!
//! The script is parsed once at startup into a fixed list of chunks. Each
//! chunk owns the takes recorded for it; takes are ranges into the session
//! buffer, never copies of audio.

mod document;
mod parser;

pub use document::{Chunk, Document, Mark, Take};
pub use parser::{load_script, parse_markdown};
