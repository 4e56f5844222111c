use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Quality tag on a take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mark {
    #[default]
    Unmarked,
    Good,
    Bad,
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mark::Unmarked => write!(f, "unmarked"),
            Mark::Good => write!(f, "good"),
            Mark::Bad => write!(f, "bad"),
        }
    }
}

/// One recorded performance: a range of the session buffer plus a mark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Take {
    /// First sample (inclusive)
    pub start: usize,
    /// One past the last sample
    pub end: usize,
    pub mark: Mark,
}

impl Take {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end,
            mark: Mark::Unmarked,
        }
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Zero-length takes are valid but have nothing to play
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One unit of script text and the takes recorded for it
///
/// Takes are only ever appended; the only in-place change is the mark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    index: usize,
    text: String,
    takes: Vec<Take>,
}

impl Chunk {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn takes(&self) -> &[Take] {
        &self.takes
    }

    pub fn take(&self, index: usize) -> Option<&Take> {
        self.takes.get(index)
    }

    /// Index of the most recently appended take
    pub fn last_take_index(&self) -> Option<usize> {
        self.takes.len().checked_sub(1)
    }

    pub(crate) fn push_take(&mut self, take: Take) -> usize {
        self.takes.push(take);
        self.takes.len() - 1
    }

    pub(crate) fn set_mark(&mut self, take: usize, mark: Mark) -> bool {
        match self.takes.get_mut(take) {
            Some(take) => {
                take.mark = mark;
                true
            }
            None => false,
        }
    }
}

/// The script as an ordered, fixed list of chunks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    chunks: Vec<Chunk>,
}

impl Document {
    /// Build a document from parsed chunk texts. An empty script is an error.
    pub fn from_texts<I, S>(texts: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let chunks: Vec<Chunk> = texts
            .into_iter()
            .enumerate()
            .map(|(index, text)| Chunk {
                index,
                text: text.into(),
                takes: Vec::new(),
            })
            .collect();

        if chunks.is_empty() {
            bail!("Script contains no chunks");
        }

        Ok(Self { chunks })
    }

    /// Check that indices are sequential and every take lies within `buffer_len`
    pub fn validate(&self, buffer_len: usize) -> Result<()> {
        if self.chunks.is_empty() {
            bail!("Document contains no chunks");
        }
        for (position, chunk) in self.chunks.iter().enumerate() {
            if chunk.index != position {
                bail!("Chunk at position {} has index {}", position, chunk.index);
            }
            for (i, take) in chunk.takes.iter().enumerate() {
                if take.start > take.end || take.end > buffer_len {
                    bail!(
                        "Take {} of chunk {} ({}..{}) lies outside the buffer (length {})",
                        i,
                        position,
                        take.start,
                        take.end,
                        buffer_len
                    );
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn chunk(&self, index: usize) -> Option<&Chunk> {
        self.chunks.get(index)
    }

    pub(crate) fn chunk_mut(&mut self, index: usize) -> Option<&mut Chunk> {
        self.chunks.get_mut(index)
    }

    /// All takes in chunk order, with their chunk and take indices
    pub fn takes(&self) -> impl Iterator<Item = (usize, usize, &Take)> {
        self.chunks.iter().flat_map(|chunk| {
            chunk
                .takes
                .iter()
                .enumerate()
                .map(move |(i, take)| (chunk.index, i, take))
        })
    }

    pub fn take_count(&self) -> usize {
        self.chunks.iter().map(|c| c.takes.len()).sum()
    }

    pub fn count_marked(&self, mark: Mark) -> usize {
        self.takes().filter(|(_, _, take)| take.mark == mark).count()
    }
}
