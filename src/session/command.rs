use std::fmt;

/// Snapshot of controller state that decides which commands apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControllerStatus {
    pub recording: bool,
    /// The buffer still accepts audio (not sealed by finalize)
    pub can_record: bool,
    /// The session has been written to disk; takes and marks are frozen
    pub saved: bool,
    pub chunk_count: usize,
    pub selected_chunk: usize,
    pub takes_in_chunk: usize,
    pub selected_take: Option<usize>,
    /// The selected take has at least one sample
    pub selected_take_playable: bool,
    /// Both selection bounds are staged
    pub has_selection: bool,
    /// At least one selection bound is staged
    pub selection_staged: bool,
}

/// Everything the user can ask the session to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    NextChunk,
    PrevChunk,
    NextTake,
    PrevTake,
    StartTake,
    EndTake,
    MarkGood,
    MarkBad,
    PlayTake,
    SelectionStart,
    SelectionEnd,
    ClearSelection,
    PromoteSelection,
    Finalize,
    Quit,
}

impl Command {
    pub const ALL: [Command; 15] = [
        Command::NextChunk,
        Command::PrevChunk,
        Command::NextTake,
        Command::PrevTake,
        Command::StartTake,
        Command::EndTake,
        Command::MarkGood,
        Command::MarkBad,
        Command::PlayTake,
        Command::SelectionStart,
        Command::SelectionEnd,
        Command::ClearSelection,
        Command::PromoteSelection,
        Command::Finalize,
        Command::Quit,
    ];

    /// Whether the command does anything in the given state
    pub fn is_available(&self, status: &ControllerStatus) -> bool {
        let idle = !status.recording;
        let editable = !status.saved;

        match self {
            Command::NextChunk => idle && status.selected_chunk + 1 < status.chunk_count,
            Command::PrevChunk => idle && status.selected_chunk > 0,
            Command::NextTake => {
                idle && matches!(status.selected_take, Some(i) if i + 1 < status.takes_in_chunk)
            }
            Command::PrevTake => idle && matches!(status.selected_take, Some(i) if i > 0),
            Command::StartTake => idle && editable && status.can_record,
            Command::EndTake => status.recording,
            Command::MarkGood | Command::MarkBad => {
                editable && (status.recording || status.selected_take.is_some())
            }
            Command::PlayTake => status.selected_take_playable,
            Command::SelectionStart | Command::SelectionEnd => editable && status.can_record,
            Command::ClearSelection => status.selection_staged,
            Command::PromoteSelection => idle && editable && status.has_selection,
            Command::Finalize => editable,
            Command::Quit => true,
        }
    }

    /// Short label for the controls bar
    pub fn label(&self, status: &ControllerStatus) -> &'static str {
        match self {
            Command::NextChunk => "Next chunk",
            Command::PrevChunk => "Prev chunk",
            Command::NextTake => "Next take",
            Command::PrevTake => "Prev take",
            Command::StartTake => "Start take",
            Command::EndTake => "End take",
            Command::MarkGood if status.recording => "End & good",
            Command::MarkGood => "Good",
            Command::MarkBad if status.recording => "End & bad",
            Command::MarkBad => "Bad",
            Command::PlayTake => "Play",
            Command::SelectionStart => "Sel start",
            Command::SelectionEnd => "Sel end",
            Command::ClearSelection => "Clear sel",
            Command::PromoteSelection => "Sel to take",
            Command::Finalize => "Save session",
            Command::Quit => "Quit",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
