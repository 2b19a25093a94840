//! # Undo/Redo History
//!
//! Bounded, linear history of whole-state snapshots.
//!
//! ## Design
//!
//! - Each entry stores the complete state after an action, so undo/redo is
//!   a cursor move and never replays mutations
//! - Pushing while the cursor is behind the newest entry discards the
//!   entries after it (no redo branches)
//! - Exceeding `max_size` evicts the oldest entry
//! - Recording can be suppressed while history itself drives the state
//!
//! ## Empty-state guard
//!
//! Installing an empty state on top of a non-empty one is refused unless
//! forced. A transient empty snapshot (a source that has not loaded yet)
//! would otherwise become the newest entry and push real content out of the
//! bounded history. This is intentional policy: the refusal is logged and
//! recorded in `warnings()`, and the history is left unchanged. Only the
//! newest `MAX_WARNINGS` refusals are kept; `take_warnings` drains them.
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut history = History::new(5);
//! history.push_state(vec!["a"], "add", None);
//! history.push_state(vec!["a", "b"], "add", None);
//!
//! assert_eq!(history.undo(), Some(&vec!["a"]));
//! assert_eq!(history.redo(), Some(&vec!["a", "b"]));
//! ```

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Guard refusals kept before the oldest is dropped
pub const MAX_WARNINGS: usize = 32;

/// Snapshot types the history can hold
pub trait HistoryState: Clone {
    /// True when the snapshot carries no user content
    fn is_empty_state(&self) -> bool;
}

impl<T: Clone> HistoryState for Vec<T> {
    fn is_empty_state(&self) -> bool {
        self.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct HistoryEntry<S> {
    pub state: S,
    pub action: String,
    pub timestamp: DateTime<Utc>,
    pub details: Option<serde_json::Value>,
}

/// Result of an attempt to record a state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Recorded,
    /// Recording is currently suppressed
    Suppressed,
    /// Refused by the empty-state guard
    Refused,
}

#[derive(Debug)]
pub struct History<S> {
    entries: VecDeque<HistoryEntry<S>>,
    current: Option<usize>,
    max_size: usize,
    recording: bool,
    warnings: Vec<String>,
}

impl<S: HistoryState> History<S> {
    /// `max_size` is clamped to at least one entry
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            current: None,
            max_size: max_size.max(1),
            recording: true,
            warnings: Vec::new(),
        }
    }

    pub fn push_state(
        &mut self,
        state: S,
        action: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> PushOutcome {
        self.push(state, action.into(), details, false)
    }

    /// Push bypassing the empty-state guard
    pub fn force_push_state(
        &mut self,
        state: S,
        action: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> PushOutcome {
        self.push(state, action.into(), details, true)
    }

    fn push(
        &mut self,
        state: S,
        action: String,
        details: Option<serde_json::Value>,
        force: bool,
    ) -> PushOutcome {
        if !self.recording {
            debug!(action = %action, "History recording suppressed");
            return PushOutcome::Suppressed;
        }
        if !force && self.would_erase_content(&state) {
            self.refuse(&action);
            return PushOutcome::Refused;
        }

        if let Some(current) = self.current {
            self.entries.truncate(current + 1);
        }
        self.entries.push_back(HistoryEntry {
            state,
            action,
            timestamp: Utc::now(),
            details,
        });
        while self.entries.len() > self.max_size {
            self.entries.pop_front();
        }
        self.current = Some(self.entries.len() - 1);

        PushOutcome::Recorded
    }

    /// Replace every entry with a single baseline state
    pub fn clear_history(&mut self, state: S, action: impl Into<String>, force: bool) -> PushOutcome {
        let action = action.into();
        if !force && self.would_erase_content(&state) {
            self.refuse(&action);
            return PushOutcome::Refused;
        }

        self.entries.clear();
        self.entries.push_back(HistoryEntry {
            state,
            action,
            timestamp: Utc::now(),
            details: None,
        });
        self.current = Some(0);
        PushOutcome::Recorded
    }

    /// Overwrite the state of the current entry (history coalescing).
    /// Falls back to a push when there is no current entry.
    pub fn replace_current(&mut self, state: S, action: impl Into<String>) -> PushOutcome {
        let action = action.into();
        if !self.recording {
            return PushOutcome::Suppressed;
        }
        if self.would_erase_content(&state) {
            self.refuse(&action);
            return PushOutcome::Refused;
        }
        let Some(current) = self.current else {
            return self.push(state, action, None, false);
        };

        self.entries.truncate(current + 1);
        if let Some(entry) = self.entries.get_mut(current) {
            entry.state = state;
            entry.action = action;
            entry.timestamp = Utc::now();
        }
        PushOutcome::Recorded
    }

    /// Edit the current entry's state in place (e.g. to stamp live selection)
    pub fn amend_current(&mut self, f: impl FnOnce(&mut S)) {
        if let Some(entry) = self.current.and_then(|i| self.entries.get_mut(i)) {
            f(&mut entry.state);
        }
    }

    /// Apply `f` to every stored state
    pub fn rewrite_states(&mut self, mut f: impl FnMut(&mut S)) {
        for entry in self.entries.iter_mut() {
            f(&mut entry.state);
        }
    }

    pub fn undo(&mut self) -> Option<&S> {
        match self.current {
            Some(current) if current > 0 => self.go_to_history(current - 1),
            _ => None,
        }
    }

    pub fn redo(&mut self) -> Option<&S> {
        match self.current {
            Some(current) if current + 1 < self.entries.len() => self.go_to_history(current + 1),
            _ => None,
        }
    }

    /// Jump the cursor, clamped to the stored range
    pub fn go_to_history(&mut self, index: usize) -> Option<&S> {
        if self.entries.is_empty() {
            return None;
        }
        let index = index.min(self.entries.len() - 1);
        self.current = Some(index);
        self.entries.get(index).map(|e| &e.state)
    }

    /// Run `f` with recording suppressed, restoring the previous mode after
    pub fn without_recording<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = self.set_recording(false);
        let result = f(self);
        self.recording = previous;
        result
    }

    /// Set the recording mode, returning the previous one
    pub fn set_recording(&mut self, recording: bool) -> bool {
        std::mem::replace(&mut self.recording, recording)
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn can_undo(&self) -> bool {
        matches!(self.current, Some(current) if current > 0)
    }

    pub fn can_redo(&self) -> bool {
        matches!(self.current, Some(current) if current + 1 < self.entries.len())
    }

    pub fn current(&self) -> Option<&HistoryEntry<S>> {
        self.current.and_then(|i| self.entries.get(i))
    }

    pub fn current_state(&self) -> Option<&S> {
        self.current().map(|e| &e.state)
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry<S>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Guard refusals not yet taken, oldest first
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    fn would_erase_content(&self, state: &S) -> bool {
        state.is_empty_state()
            && self
                .current_state()
                .map(|current| !current.is_empty_state())
                .unwrap_or(false)
    }

    fn refuse(&mut self, action: &str) {
        warn!(action, "Refusing to replace non-empty history state with an empty one");
        if self.warnings.len() >= MAX_WARNINGS {
            self.warnings.remove(0);
        }
        self.warnings.push(format!(
            "refused '{}': empty state would replace non-empty state",
            action
        ));
    }
}
