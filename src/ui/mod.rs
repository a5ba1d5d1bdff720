//! UI module - the two front ends over one chat session.
//!
//! `terminal` is a plain line-mode loop; `tui` is the full-screen
//! ratatui interface. Both drive the same chat loop and differ only in
//! how they render the transcript and solicit input.

pub mod markdown;
pub mod terminal;
pub mod tui;

/// What should happen when a UI exits its run loop.
#[derive(Debug, Clone)]
pub enum UiExitAction {
    Quit,
}
