//! Take lifecycle controller
//!
//! The only code that creates takes or changes marks. It owns the document
//! and the navigation cursor; the capture pipeline only ever touches the
//! buffer, so the controller reads the buffer length and never writes to it.
//!
//! State machine: `Idle` --start--> `Recording` --end--> `Idle`. The chunk
//! selected at start is pinned for the whole recording (navigation is refused
//! while recording), so the take always lands in the chunk it was started on.

use tracing::{debug, info};

use super::command::{Command, ControllerStatus};
use crate::audio::SessionBuffer;
use crate::script::{Document, Mark, Take};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeState {
    Idle,
    Recording {
        /// Buffer length when the take started
        anchor: usize,
        /// Chunk the take belongs to
        chunk: usize,
    },
}

/// A staged buffer range that can be turned into a take without recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub start: usize,
    pub end: usize,
}

impl Selection {
    /// Bounds are ordered so `start <= end`
    pub fn new(a: usize, b: usize) -> Self {
        Self {
            start: a.min(b),
            end: a.max(b),
        }
    }
}

/// Result of one controller operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// Not legal in the current state; nothing changed
    Ignored(&'static str),
    /// The caller should play this take
    Play(Take),
    /// The caller should persist the session
    Finalize,
    /// The caller should shut the session down
    Quit,
}

impl Outcome {
    pub fn is_ignored(&self) -> bool {
        matches!(self, Outcome::Ignored(_))
    }
}

#[derive(Debug, Clone, Default)]
struct Cursor {
    selected_chunk: usize,
    selected_take: Option<usize>,
    selection_start: Option<usize>,
    selection_end: Option<usize>,
}

pub struct TakeController {
    document: Document,
    buffer: SessionBuffer,
    state: TakeState,
    cursor: Cursor,
    saved: bool,
}

impl TakeController {
    pub fn new(document: Document, buffer: SessionBuffer) -> Self {
        let cursor = Cursor {
            selected_take: document.chunk(0).and_then(|c| c.last_take_index()),
            ..Default::default()
        };

        Self {
            document,
            buffer,
            state: TakeState::Idle,
            cursor,
            saved: false,
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn buffer(&self) -> &SessionBuffer {
        &self.buffer
    }

    pub fn state(&self) -> TakeState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, TakeState::Recording { .. })
    }

    pub fn is_saved(&self) -> bool {
        self.saved
    }

    pub fn selected_chunk(&self) -> usize {
        self.cursor.selected_chunk
    }

    pub fn selected_take(&self) -> Option<usize> {
        self.cursor.selected_take
    }

    /// The take under the cursor
    pub fn current_take(&self) -> Option<&Take> {
        let take = self.cursor.selected_take?;
        self.document.chunk(self.cursor.selected_chunk)?.take(take)
    }

    /// Active selection; a half-staged selection is not active
    pub fn selection(&self) -> Option<Selection> {
        match (self.cursor.selection_start, self.cursor.selection_end) {
            (Some(start), Some(end)) => Some(Selection::new(start, end)),
            _ => None,
        }
    }

    /// Staged bounds, including a half-set selection, for display
    pub fn staged_selection(&self) -> (Option<usize>, Option<usize>) {
        (self.cursor.selection_start, self.cursor.selection_end)
    }

    pub fn status(&self) -> ControllerStatus {
        let takes_in_chunk = self
            .document
            .chunk(self.cursor.selected_chunk)
            .map(|c| c.takes().len())
            .unwrap_or(0);

        ControllerStatus {
            recording: self.is_recording(),
            can_record: !self.buffer.is_sealed(),
            saved: self.saved,
            chunk_count: self.document.len(),
            selected_chunk: self.cursor.selected_chunk,
            takes_in_chunk,
            selected_take: self.cursor.selected_take,
            selected_take_playable: self.current_take().is_some_and(|t| !t.is_empty()),
            has_selection: self.selection().is_some(),
            selection_staged: self.cursor.selection_start.is_some()
                || self.cursor.selection_end.is_some(),
        }
    }

    /// Run one user command
    pub fn apply(&mut self, command: Command) -> Outcome {
        let outcome = match command {
            Command::NextChunk => self.next_chunk(),
            Command::PrevChunk => self.prev_chunk(),
            Command::NextTake => self.next_take(),
            Command::PrevTake => self.prev_take(),
            Command::StartTake => self.start_take(),
            Command::EndTake => self.end_take(),
            Command::MarkGood => self.mark_good(),
            Command::MarkBad => self.mark_bad(),
            Command::PlayTake => self.play_take(),
            Command::SelectionStart => self.selection_start(),
            Command::SelectionEnd => self.selection_end(),
            Command::ClearSelection => self.clear_selection(),
            Command::PromoteSelection => self.promote_selection(),
            Command::Finalize => self.finalize(),
            Command::Quit => {
                self.force_close();
                Outcome::Quit
            }
        };

        if let Outcome::Ignored(reason) = outcome {
            debug!("Ignored {}: {}", command, reason);
        }

        outcome
    }

    pub fn start_take(&mut self) -> Outcome {
        if self.is_recording() {
            return Outcome::Ignored("already recording");
        }
        if self.saved {
            return Outcome::Ignored("session already saved");
        }
        if self.buffer.is_sealed() {
            return Outcome::Ignored("session buffer is sealed");
        }

        let anchor = self.buffer.len();
        let chunk = self.cursor.selected_chunk;
        self.state = TakeState::Recording { anchor, chunk };

        info!("Take started on chunk {} at sample {}", chunk, anchor);
        Outcome::Applied
    }

    pub fn end_take(&mut self) -> Outcome {
        match self.close_take() {
            Some(_) => Outcome::Applied,
            None => Outcome::Ignored("not recording"),
        }
    }

    pub fn mark_good(&mut self) -> Outcome {
        self.mark(Mark::Good)
    }

    pub fn mark_bad(&mut self) -> Outcome {
        self.mark(Mark::Bad)
    }

    /// Mark the selected take. While recording, ends the take first and marks the new one.
    pub fn mark(&mut self, mark: Mark) -> Outcome {
        if self.saved {
            return Outcome::Ignored("session already saved");
        }

        let (chunk, take) = if self.is_recording() {
            match self.close_take() {
                Some(position) => position,
                None => return Outcome::Ignored("not recording"),
            }
        } else {
            match self.cursor.selected_take {
                Some(take) => (self.cursor.selected_chunk, take),
                None => return Outcome::Ignored("no take selected"),
            }
        };

        let marked = self
            .document
            .chunk_mut(chunk)
            .is_some_and(|c| c.set_mark(take, mark));

        if !marked {
            return Outcome::Ignored("selected take does not exist");
        }

        info!("Chunk {} take {} marked {}", chunk, take, mark);
        Outcome::Applied
    }

    /// Turn the active selection into a take on the selected chunk
    pub fn promote_selection(&mut self) -> Outcome {
        if self.is_recording() {
            return Outcome::Ignored("cannot promote a selection while recording");
        }
        if self.saved {
            return Outcome::Ignored("session already saved");
        }
        let Some(selection) = self.selection() else {
            return Outcome::Ignored("no active selection");
        };
        if let Some(reason) = self.out_of_bounds(selection) {
            return Outcome::Ignored(reason);
        }

        let chunk = self.cursor.selected_chunk;
        let take = Take::new(selection.start, selection.end);
        let Some(index) = self.document.chunk_mut(chunk).map(|c| c.push_take(take)) else {
            return Outcome::Ignored("selected chunk does not exist");
        };

        self.cursor.selected_take = Some(index);
        self.cursor.selection_start = None;
        self.cursor.selection_end = None;

        info!(
            "Selection {}..{} promoted to take {} of chunk {}",
            selection.start, selection.end, index, chunk
        );
        Outcome::Applied
    }

    pub fn next_chunk(&mut self) -> Outcome {
        if self.cursor.selected_chunk + 1 >= self.document.len() {
            return self.navigate_to(None);
        }
        self.navigate_to(Some(self.cursor.selected_chunk + 1))
    }

    pub fn prev_chunk(&mut self) -> Outcome {
        self.navigate_to(self.cursor.selected_chunk.checked_sub(1))
    }

    fn navigate_to(&mut self, target: Option<usize>) -> Outcome {
        if self.is_recording() {
            return Outcome::Ignored("navigation is disabled while recording");
        }
        let Some(target) = target else {
            return Outcome::Ignored("no chunk in that direction");
        };
        let Some(chunk) = self.document.chunk(target) else {
            return Outcome::Ignored("no chunk in that direction");
        };

        self.cursor.selected_take = chunk.last_take_index();
        self.cursor.selected_chunk = target;
        Outcome::Applied
    }

    pub fn next_take(&mut self) -> Outcome {
        let count = self.status().takes_in_chunk;
        match self.cursor.selected_take {
            Some(i) if i + 1 < count => self.select_take(i + 1),
            _ => self.select_take_ignored(),
        }
    }

    pub fn prev_take(&mut self) -> Outcome {
        match self.cursor.selected_take {
            Some(i) if i > 0 => self.select_take(i - 1),
            _ => self.select_take_ignored(),
        }
    }

    fn select_take(&mut self, index: usize) -> Outcome {
        if self.is_recording() {
            return Outcome::Ignored("navigation is disabled while recording");
        }
        self.cursor.selected_take = Some(index);
        Outcome::Applied
    }

    fn select_take_ignored(&self) -> Outcome {
        if self.is_recording() {
            Outcome::Ignored("navigation is disabled while recording")
        } else {
            Outcome::Ignored("no take in that direction")
        }
    }

    pub fn play_take(&self) -> Outcome {
        match self.current_take() {
            Some(take) if !take.is_empty() => Outcome::Play(*take),
            Some(_) => Outcome::Ignored("take is empty"),
            None => Outcome::Ignored("no take selected"),
        }
    }

    /// Stage the selection start at the current buffer position
    pub fn selection_start(&mut self) -> Outcome {
        if let Some(reason) = self.selection_blocked() {
            return Outcome::Ignored(reason);
        }
        self.cursor.selection_start = Some(self.buffer.len());
        Outcome::Applied
    }

    /// Stage the selection end at the current buffer position
    pub fn selection_end(&mut self) -> Outcome {
        if let Some(reason) = self.selection_blocked() {
            return Outcome::Ignored(reason);
        }
        self.cursor.selection_end = Some(self.buffer.len());
        Outcome::Applied
    }

    /// Stage an explicit selection. Bounds past the current buffer are refused.
    pub fn set_selection(&mut self, selection: Selection) -> Outcome {
        if self.saved {
            return Outcome::Ignored("session already saved");
        }
        let selection = Selection::new(selection.start, selection.end);
        if let Some(reason) = self.out_of_bounds(selection) {
            return Outcome::Ignored(reason);
        }
        self.cursor.selection_start = Some(selection.start);
        self.cursor.selection_end = Some(selection.end);
        Outcome::Applied
    }

    pub fn clear_selection(&mut self) -> Outcome {
        if self.cursor.selection_start.is_none() && self.cursor.selection_end.is_none() {
            return Outcome::Ignored("no selection");
        }
        self.cursor.selection_start = None;
        self.cursor.selection_end = None;
        Outcome::Applied
    }

    /// Takes must lie inside the buffer and cover whole sample frames
    fn out_of_bounds(&self, selection: Selection) -> Option<&'static str> {
        let channels = self.buffer.channels().max(1) as usize;
        if selection.end > self.buffer.len() {
            Some("selection reaches past the buffer")
        } else if selection.start % channels != 0 || selection.end % channels != 0 {
            Some("selection splits a sample frame")
        } else {
            None
        }
    }

    fn selection_blocked(&self) -> Option<&'static str> {
        if self.saved {
            Some("session already saved")
        } else if self.buffer.is_sealed() {
            Some("session buffer is sealed")
        } else {
            None
        }
    }

    fn finalize(&mut self) -> Outcome {
        if self.saved {
            return Outcome::Ignored("session already saved");
        }
        self.force_close();
        Outcome::Finalize
    }

    /// Session end: close a take in progress. Returns the closed take's position.
    pub fn force_close(&mut self) -> Option<(usize, usize)> {
        self.close_take()
    }

    /// Freeze takes and marks once the session is on disk
    pub fn mark_saved(&mut self) {
        self.saved = true;
    }

    fn close_take(&mut self) -> Option<(usize, usize)> {
        let TakeState::Recording { anchor, chunk } = self.state else {
            return None;
        };

        let end = self.buffer.len();
        let take = Take::new(anchor, end);
        let index = self.document.chunk_mut(chunk)?.push_take(take);

        self.state = TakeState::Idle;
        self.cursor.selected_chunk = chunk;
        self.cursor.selected_take = Some(index);

        info!(
            "Take {} of chunk {} recorded: samples {}..{} ({:.2}s)",
            index,
            chunk,
            anchor,
            end,
            self.buffer.duration_of(end - anchor).as_secs_f64()
        );

        Some((chunk, index))
    }
}
