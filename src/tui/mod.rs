//! Terminal front end: ratatui + crossterm
//!
//! The event loop runs on a blocking thread and exclusively owns the
//! `TakeController`; every key press becomes one controller call. Async
//! session work (finalize, shutdown) is driven with the runtime handle.

mod keymap;
mod view;

pub use keymap::{commands_for, resolve, Binding, BINDINGS};

use std::io::Stdout;
use std::time::Duration;

use anyhow::Result;
use crossterm::event::{self, Event, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use tokio::runtime::Handle;
use tracing::{error, info, warn};

use crate::session::{Outcome, RecordingSession, SessionStats, TakeController};

/// Redraw interval while waiting for input
const TICK: Duration = Duration::from_millis(50);

/// Window of recent audio the level meter looks at
const LEVEL_WINDOW: Duration = Duration::from_millis(100);

/// Puts the terminal back on drop, including on early return or panic unwind
struct TerminalGuard {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl TerminalGuard {
    fn enter() -> Result<Self> {
        terminal::enable_raw_mode()?;
        if let Err(e) = std::io::stdout().execute(EnterAlternateScreen) {
            let _ = terminal::disable_raw_mode();
            return Err(e.into());
        }
        let terminal = Terminal::new(CrosstermBackend::new(std::io::stdout()))?;
        Ok(Self { terminal })
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        restore_terminal();
    }
}

/// Leave raw mode and the alternate screen; safe to call more than once
pub fn restore_terminal() {
    let _ = terminal::disable_raw_mode();
    let _ = std::io::stdout().execute(LeaveAlternateScreen);
}

/// Run the interactive session until the user quits
///
/// Must be called from a blocking thread (`spawn_blocking`), never from an
/// async task, since finalize and shutdown are driven with `runtime.block_on`.
pub fn run(
    mut session: RecordingSession,
    mut controller: TakeController,
    runtime: Handle,
) -> Result<SessionStats> {
    let mut guard = TerminalGuard::enter()?;
    let mut message: Option<String> = None;
    // Set after a failed exit save; the next quit leaves without saving.
    let mut quit_unsaved = false;

    info!("TUI started for session {}", session.id());

    let result: Result<()> = loop {
        let stats = session.stats(&controller);
        let level = input_level(&controller);

        if let Err(e) = guard.terminal.draw(|frame| {
            view::draw(
                frame,
                &view::ViewState {
                    controller: &controller,
                    stats: &stats,
                    level,
                    message: message.as_deref(),
                },
            )
        }) {
            break Err(e.into());
        }

        let key = match poll_key() {
            Ok(Some(key)) => key,
            Ok(None) => continue,
            Err(e) => break Err(e),
        };

        let Some(command) = keymap::resolve(&key, &controller.status()) else {
            continue;
        };

        let outcome = controller.apply(command);
        if !matches!(outcome, Outcome::Quit) {
            quit_unsaved = false;
        }

        match outcome {
            Outcome::Applied => message = None,
            Outcome::Ignored(reason) => message = Some(reason.to_string()),
            Outcome::Play(take) => {
                message = match session.play(&take) {
                    Ok(_) => None,
                    Err(e) => Some(e.to_string()),
                };
            }
            Outcome::Finalize => {
                message = Some(match runtime.block_on(session.finalize(&mut controller)) {
                    Ok(path) => format!("saved to {}", path.display()),
                    Err(e) => {
                        error!("Finalize failed: {:#}", e);
                        format!("save failed: {:#} (press F to retry)", e)
                    }
                });
            }
            Outcome::Quit if quit_unsaved => break Ok(()),
            Outcome::Quit => match runtime.block_on(session.save_before_exit(&mut controller)) {
                Ok(_) => break Ok(()),
                Err(e) => {
                    error!("Failed to save session on exit: {:#}", e);
                    quit_unsaved = true;
                    message = Some(format!(
                        "save failed: {:#} (press F to retry, q again to quit without saving)",
                        e
                    ));
                }
            },
        }
    };

    drop(guard);

    // The terminal failed; there is no UI left to retry from.
    if result.is_err() && !quit_unsaved {
        if let Err(e) = runtime.block_on(session.save_before_exit(&mut controller)) {
            error!("Failed to save session after terminal error: {:#}", e);
        }
    }

    let stats = runtime.block_on(session.shutdown(&mut controller));
    if !stats.saved {
        warn!("Exited without saving session {}", stats.session_id);
    }

    result.map(|_| stats)
}

fn poll_key() -> Result<Option<event::KeyEvent>> {
    if !event::poll(TICK)? {
        return Ok(None);
    }
    match event::read()? {
        Event::Key(key) if key.kind == KeyEventKind::Press => Ok(Some(key)),
        _ => Ok(None),
    }
}

/// Peak of the most recent audio as a fraction of full scale
fn input_level(controller: &TakeController) -> f64 {
    let buffer = controller.buffer();
    let per_second = buffer.sample_rate() as f64 * buffer.channels() as f64;
    let window = (per_second * LEVEL_WINDOW.as_secs_f64()) as usize;
    let peak = buffer
        .tail(window)
        .iter()
        .map(|s| s.unsigned_abs())
        .max()
        .unwrap_or(0);
    peak as f64 / i16::MAX as f64
}
