//! Key bindings
//!
//! A key maps to one or more commands; the first one available in the
//! current state runs. The controls bar shows only bindings that would do
//! something right now.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::session::{Command, ControllerStatus};

pub struct Binding {
    /// Key names as shown in the controls bar
    pub label: &'static str,
    /// Key codes with the modifiers they require
    pub keys: &'static [(KeyCode, KeyModifiers)],
    /// Tried in order; the first available one runs
    pub commands: &'static [Command],
}

const fn plain(code: KeyCode) -> (KeyCode, KeyModifiers) {
    (code, KeyModifiers::NONE)
}

pub const BINDINGS: &[Binding] = &[
    Binding {
        label: "Space",
        keys: &[plain(KeyCode::Char(' '))],
        commands: &[Command::StartTake, Command::EndTake],
    },
    Binding {
        label: "g",
        keys: &[plain(KeyCode::Char('g'))],
        commands: &[Command::MarkGood],
    },
    Binding {
        label: "b",
        keys: &[plain(KeyCode::Char('b'))],
        commands: &[Command::MarkBad],
    },
    Binding {
        label: "p",
        keys: &[plain(KeyCode::Char('p'))],
        commands: &[Command::PlayTake],
    },
    Binding {
        label: "↓/j",
        keys: &[plain(KeyCode::Down), plain(KeyCode::Char('j'))],
        commands: &[Command::NextChunk],
    },
    Binding {
        label: "↑/k",
        keys: &[plain(KeyCode::Up), plain(KeyCode::Char('k'))],
        commands: &[Command::PrevChunk],
    },
    Binding {
        label: "→/l",
        keys: &[plain(KeyCode::Right), plain(KeyCode::Char('l'))],
        commands: &[Command::NextTake],
    },
    Binding {
        label: "←/h",
        keys: &[plain(KeyCode::Left), plain(KeyCode::Char('h'))],
        commands: &[Command::PrevTake],
    },
    Binding {
        label: "[",
        keys: &[plain(KeyCode::Char('['))],
        commands: &[Command::SelectionStart],
    },
    Binding {
        label: "]",
        keys: &[plain(KeyCode::Char(']'))],
        commands: &[Command::SelectionEnd],
    },
    Binding {
        label: "Enter",
        keys: &[plain(KeyCode::Enter)],
        commands: &[Command::PromoteSelection],
    },
    Binding {
        label: "x",
        keys: &[plain(KeyCode::Char('x'))],
        commands: &[Command::ClearSelection],
    },
    Binding {
        label: "F",
        keys: &[plain(KeyCode::Char('F'))],
        commands: &[Command::Finalize],
    },
    Binding {
        label: "q",
        keys: &[
            plain(KeyCode::Char('q')),
            plain(KeyCode::Esc),
            (KeyCode::Char('c'), KeyModifiers::CONTROL),
        ],
        commands: &[Command::Quit],
    },
];

/// Commands bound to a key press, in priority order
pub fn commands_for(key: &KeyEvent) -> &'static [Command] {
    BINDINGS
        .iter()
        .find(|binding| {
            binding
                .keys
                .iter()
                .any(|&(code, modifiers)| code == key.code && key.modifiers.contains(modifiers))
        })
        .map(|binding| binding.commands)
        .unwrap_or(&[])
}

/// The command a key press runs in this state; falls back to the first binding
/// so an unavailable command is still reported as ignored
pub fn resolve(key: &KeyEvent, status: &ControllerStatus) -> Option<Command> {
    let commands = commands_for(key);
    commands
        .iter()
        .copied()
        .find(|c| c.is_available(status))
        .or_else(|| commands.first().copied())
}

/// Bindings with at least one available command, with the label to show
pub fn visible(status: &ControllerStatus) -> Vec<(&'static str, &'static str)> {
    BINDINGS
        .iter()
        .filter_map(|binding| {
            binding
                .commands
                .iter()
                .find(|c| c.is_available(status))
                .map(|c| (binding.label, c.label(status)))
        })
        .collect()
}
