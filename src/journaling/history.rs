use std::collections::VecDeque;

/// Linear undo/redo stacks of text snapshots for one open draft.
///
/// `past` is oldest-first; `future` is most-recently-undone first. Together
/// with the live text they reconstruct the edit sequence, so a new forward
/// edit always discards `future`.
#[derive(Debug, Clone, Default)]
pub struct EditHistory {
    past: VecDeque<String>,
    future: VecDeque<String>,
    max_entries: usize,
}

impl EditHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps at most `max_entries` undo snapshots; 0 means unbounded.
    pub fn with_limit(max_entries: usize) -> Self {
        Self {
            max_entries,
            ..Self::default()
        }
    }

    /// Remembers `current` as the state before a user edit.
    pub fn record(&mut self, current: impl Into<String>) {
        self.past.push_back(current.into());
        self.future.clear();
        if self.max_entries > 0 {
            while self.past.len() > self.max_entries {
                self.past.pop_front();
            }
        }
    }

    /// Returns the text to show after undoing, or `None` when there is nothing to undo.
    pub fn undo(&mut self, current: &str) -> Option<String> {
        let previous = self.past.pop_back()?;
        self.future.push_front(current.to_string());
        Some(previous)
    }

    pub fn redo(&mut self, current: &str) -> Option<String> {
        let next = self.future.pop_front()?;
        self.past.push_back(current.to_string());
        Some(next)
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.past.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.future.len()
    }

    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
    }
}
