//! Label filters swept at exit when no watchdog is looking after us.

use std::sync::Mutex;
use std::sync::PoisonError;

use api_types::FilterSet;

/// Append-only list of filter sets.
///
/// One lock covers both appends and the exit-time walk so a late append
/// cannot race with the sweep.
#[derive(Debug)]
pub struct DeathNote {
    entries: Mutex<Vec<FilterSet>>,
}

impl DeathNote {
    /// Creates a note whose first entry is `seed`.
    pub fn new(seed: FilterSet) -> Self {
        Self {
            entries: Mutex::new(vec![seed]),
        }
    }

    pub fn push(&self, filters: FilterSet) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(filters);
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Runs `f` over the entries while holding the lock.
    pub fn with_entries<R>(&self, f: impl FnOnce(&[FilterSet]) -> R) -> R {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        f(&entries)
    }
}
