//! User actions decoded from key presses
use crossterm::event::KeyCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    Up,
    Down,
    Open,
    Back,
    Reload,
    SwitchTab,
    ReverseRoute,
    ToggleArrival,
    /// Resets the route time to now.
    Now,
    ToggleFavorite,
    MoveFavoriteUp,
    MoveFavoriteDown,
    ResetFavoritesOrder,
    /// Zero-based index into the favourite stops or routes, depending on the tab.
    SelectFavorite(usize),
}

impl Action {
    pub fn from_key(code: KeyCode) -> Option<Self> {
        let action = match code {
            KeyCode::Char('q') | KeyCode::Char('Q') => Action::Quit,
            KeyCode::Up | KeyCode::Char('k') => Action::Up,
            KeyCode::Down | KeyCode::Char('j') => Action::Down,
            KeyCode::Enter => Action::Open,
            KeyCode::Esc | KeyCode::Backspace | KeyCode::Left => Action::Back,
            KeyCode::Char('r') | KeyCode::Char('R') => Action::Reload,
            KeyCode::Tab | KeyCode::BackTab => Action::SwitchTab,
            KeyCode::Char('x') => Action::ReverseRoute,
            KeyCode::Char('a') => Action::ToggleArrival,
            KeyCode::Char('n') => Action::Now,
            KeyCode::Char('f') => Action::ToggleFavorite,
            KeyCode::Char('[') => Action::MoveFavoriteUp,
            KeyCode::Char(']') => Action::MoveFavoriteDown,
            KeyCode::Char('o') => Action::ResetFavoritesOrder,
            KeyCode::Char(c @ '1'..='9') => Action::SelectFavorite(c as usize - '1' as usize),
            _ => return None,
        };
        Some(action)
    }
}
