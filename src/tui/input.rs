//! Keyboard mapping

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// What a key press asks the app to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    Send,
    Stop,
    Clear,
    ToggleTheme,
    Approve,
    Deny,
    Insert(char),
    Backspace,
    ScrollUp,
    ScrollDown,
    Ignore,
}

/// Map a key press. While a confirmation is owed, `y`/`n` answer it instead
/// of typing.
pub fn map_key(key: KeyEvent, awaiting_confirmation: bool) -> Action {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let navigation = matches!(
        key.code,
        KeyCode::Esc | KeyCode::Up | KeyCode::Down | KeyCode::PageUp | KeyCode::PageDown
    );
    match key.code {
        KeyCode::Char('c') if ctrl => Action::Quit,
        KeyCode::Char('l') if ctrl => Action::Clear,
        KeyCode::Char('t') if ctrl => Action::ToggleTheme,
        KeyCode::Char('y' | 'Y') if awaiting_confirmation => Action::Approve,
        KeyCode::Char('n' | 'N') if awaiting_confirmation => Action::Deny,
        _ if ctrl => Action::Ignore,
        _ if awaiting_confirmation && !navigation => Action::Ignore,
        KeyCode::Char(c) => Action::Insert(c),
        KeyCode::Enter => Action::Send,
        KeyCode::Backspace => Action::Backspace,
        KeyCode::Esc => Action::Stop,
        KeyCode::Up | KeyCode::PageUp => Action::ScrollUp,
        KeyCode::Down | KeyCode::PageDown => Action::ScrollDown,
        _ => Action::Ignore,
    }
}
