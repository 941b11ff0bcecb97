//! Keyboard input event handling for the ATM TUI.
//!
//! Events are consumed in the main loop. The handler mutates [`App`] state
//! directly; rendering happens separately.
//!
//! # Key Bindings
//!
//! ## Global (any focus)
//!
//! | Key | Action |
//! |-----|--------|
//! | `q` | Quit |
//! | `Ctrl-C` | Quit |
//! | `↑` | Move selection up |
//! | `↓` | Move selection down |
//! | `Tab` | Cycle panel focus |
//!
//! ## Agent Terminal panel (when selected agent is live)
//!
//! | Key | Action |
//! |-----|--------|
//! | _printable char_ | Append to control input |
//! | `Enter` | Submit stdin text (non-empty) |
//! | `Backspace` | Delete last character |
//! | `Ctrl-K` | Send interrupt |
//! | `Esc` | Clear control input |
//!
//! Dashboard panel ignores character input — it is mail-only.

use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};

use crate::app::{App, FocusPanel, PendingControl};

/// Process a single terminal input event and update [`App`] state accordingly.
///
/// Returns `true` if the application should quit after this event.
pub fn handle_event(event: &Event, app: &mut App) -> bool {
    if let Event::Key(KeyEvent { code, modifiers, .. }) = event {
        // ── Global bindings ───────────────────────────────────────────────────
        match (code, modifiers) {
            (KeyCode::Char('c'), m) if m.contains(KeyModifiers::CONTROL) => {
                app.should_quit = true;
                return true;
            }
            (KeyCode::Up, _) => {
                app.select_previous();
                return false;
            }
            (KeyCode::Down, _) => {
                app.select_next();
                return false;
            }
            (KeyCode::Tab, _) => {
                app.cycle_focus();
                return false;
            }
            _ => {}
        }

        // ── Panel-specific bindings ───────────────────────────────────────────
        return match app.focus {
            FocusPanel::AgentTerminal => handle_agent_terminal_key(code, modifiers, app),
            FocusPanel::Dashboard => handle_dashboard_key(code, app),
        };
    }
    false
}

/// Handle keys while the Agent Terminal panel is focused.
fn handle_agent_terminal_key(
    code: &KeyCode,
    modifiers: &KeyModifiers,
    app: &mut App,
) -> bool {
    // Ctrl-K sends interrupt (preferred to avoid Ctrl-I/Tab collision).
    // Ctrl-I is accepted as a legacy fallback when distinguishable.
    // When not live, the interrupt is dropped client-side to avoid sending
    // to a session that cannot receive input.
    if (matches!(code, KeyCode::Char('k')) || matches!(code, KeyCode::Char('i')))
        && modifiers.contains(KeyModifiers::CONTROL)
    {
        if app.is_live() {
            app.pending_control = Some(PendingControl::Interrupt);
        }
        return false;
    }

    // Esc → clear control input
    if matches!(code, KeyCode::Esc) {
        app.control_input.clear();
        return false;
    }

    // Backspace → delete last character
    if matches!(code, KeyCode::Backspace) {
        app.control_input.pop();
        return false;
    }

    // Enter → submit if non-empty and agent is live
    if matches!(code, KeyCode::Enter) {
        let text = app.control_input.trim().to_string();
        if !text.is_empty() && app.is_live() {
            app.pending_control = Some(PendingControl::Stdin(text));
            app.control_input.clear();
        }
        return false;
    }

    // Printable character → quit shortcut or append to input
    if let KeyCode::Char(c) = code {
        // 'q' in the agent terminal still quits when no modifiers are held
        // and control_input is empty (consistent UX: once typing starts, 'q'
        // is just a character).
        if *c == 'q' && modifiers.is_empty() && app.control_input.is_empty() {
            app.should_quit = true;
            return true;
        }
        // Append character — only when agent is live (or user is typing for
        // an agent that became not-live mid-edit; input is allowed to accumulate
        // but Enter will be rejected).
        if app.is_live() {
            app.control_input.push(*c);
        }
    }

    false
}

/// Handle keys while the Dashboard panel is focused.
///
/// The Dashboard is mail-only: character input is ignored here. Navigation
/// keys are handled globally before this function is reached.
fn handle_dashboard_key(code: &KeyCode, app: &mut App) -> bool {
    if let KeyCode::Char('q') = code {
        app.should_quit = true;
        return true;
    }
    false
}
