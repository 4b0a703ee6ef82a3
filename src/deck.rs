//! Slide deck navigation state

/// Where the presenter is in the document
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeckState {
    /// Current page (0-indexed)
    pub current_page: usize,

    /// Total page count
    pub page_count: usize,

    /// Whether pages carry speaker notes on their right half
    pub notes_mode: bool,
}

impl DeckState {
    #[must_use]
    pub fn new(page_count: usize) -> Self {
        Self {
            current_page: 0,
            page_count,
            notes_mode: false,
        }
    }

    /// Apply a command and return resulting effects
    #[must_use]
    pub fn apply(&mut self, cmd: Command) -> Vec<Effect> {
        match cmd {
            Command::GoToPage(page) => {
                let clamped = page.min(self.page_count.saturating_sub(1));
                if self.current_page != clamped {
                    self.current_page = clamped;
                    vec![Effect::Prerender { around: clamped }]
                } else {
                    vec![]
                }
            }

            Command::NextPage => {
                let next = self.current_page + 1;
                self.apply(Command::GoToPage(next))
            }

            Command::PreviousPage => {
                let previous = self.current_page.saturating_sub(1);
                self.apply(Command::GoToPage(previous))
            }

            Command::SetPageCount(count) => {
                self.set_page_count(count);
                vec![]
            }

            Command::SetNotesMode(enabled) => {
                if self.notes_mode != enabled {
                    self.notes_mode = enabled;
                    vec![
                        Effect::SetNotesMode(enabled),
                        Effect::Prerender {
                            around: self.current_page,
                        },
                    ]
                } else {
                    vec![]
                }
            }

            Command::ToggleNotesMode => self.apply(Command::SetNotesMode(!self.notes_mode)),

            Command::Reload { page_count } => {
                self.set_page_count(page_count);
                vec![
                    Effect::DocumentChanged,
                    Effect::Prerender {
                        around: self.current_page,
                    },
                ]
            }
        }
    }

    fn set_page_count(&mut self, count: usize) {
        self.page_count = count;
        if self.current_page >= count && count > 0 {
            self.current_page = count - 1;
        }
    }

    /// Pages to prerender around `page`: the following ones first, nearest first
    #[must_use]
    pub fn prerender_window(&self, page: usize, ahead: usize, behind: usize) -> Vec<usize> {
        if self.page_count == 0 {
            return vec![];
        }

        let after = (page.saturating_add(1)..=page.saturating_add(ahead))
            .take_while(|p| *p < self.page_count);
        let before = (1..=behind).filter_map(|offset| page.checked_sub(offset));
        after.chain(before).collect()
    }
}

/// Navigation commands from the UI
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Jump to a page (clamped to the document)
    GoToPage(usize),
    NextPage,
    PreviousPage,
    /// Update the page count
    SetPageCount(usize),
    /// Enable or disable split content/notes pages
    SetNotesMode(bool),
    ToggleNotesMode,
    /// The document was reopened
    Reload { page_count: usize },
}

/// Effects produced by state changes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Queue the neighbourhood of a page
    Prerender { around: usize },
    /// Switch every surface to its normal or notes-mode page kind
    SetNotesMode(bool),
    /// Drop every cached page and cancel outstanding renders
    DocumentChanged,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> DeckState {
        DeckState::new(10)
    }

    #[test]
    fn go_to_page_updates_and_prerenders() {
        let mut state = test_state();

        let effects = state.apply(Command::GoToPage(5));
        assert_eq!(state.current_page, 5);
        assert_eq!(effects, vec![Effect::Prerender { around: 5 }]);
    }

    #[test]
    fn go_to_same_page_returns_empty() {
        let mut state = test_state();
        state.current_page = 3;

        assert!(state.apply(Command::GoToPage(3)).is_empty());
    }

    #[test]
    fn go_to_page_clamps_to_max() {
        let mut state = test_state();

        let effects = state.apply(Command::GoToPage(999));
        assert_eq!(state.current_page, 9);
        assert_eq!(effects, vec![Effect::Prerender { around: 9 }]);
    }

    #[test]
    fn next_and_previous_stop_at_edges() {
        let mut state = test_state();
        assert!(state.apply(Command::PreviousPage).is_empty());

        state.current_page = 9;
        assert!(state.apply(Command::NextPage).is_empty());

        let effects = state.apply(Command::PreviousPage);
        assert_eq!(state.current_page, 8);
        assert_eq!(effects, vec![Effect::Prerender { around: 8 }]);
    }

    #[test]
    fn toggle_notes_mode_switches_kinds() {
        let mut state = test_state();

        let effects = state.apply(Command::ToggleNotesMode);
        assert!(state.notes_mode);
        assert_eq!(
            effects,
            vec![Effect::SetNotesMode(true), Effect::Prerender { around: 0 }]
        );

        assert!(state.apply(Command::SetNotesMode(true)).is_empty());
    }

    #[test]
    fn reload_clamps_and_invalidates() {
        let mut state = test_state();
        state.current_page = 8;

        let effects = state.apply(Command::Reload { page_count: 4 });
        assert_eq!(state.current_page, 3);
        assert_eq!(
            effects,
            vec![Effect::DocumentChanged, Effect::Prerender { around: 3 }]
        );
    }

    #[test]
    fn prerender_window_is_clamped() {
        let state = test_state();
        assert_eq!(state.prerender_window(0, 4, 2), vec![1, 2, 3, 4]);
        assert_eq!(state.prerender_window(5, 4, 2), vec![6, 7, 8, 9, 4, 3]);
        assert_eq!(state.prerender_window(8, 4, 2), vec![9, 7, 6]);
        assert!(DeckState::new(0).prerender_window(0, 4, 2).is_empty());
    }
}
