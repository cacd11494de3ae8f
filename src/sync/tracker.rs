//! New-arrival detection across successive snapshots.

use std::collections::HashSet;

use crate::model::{Turn, TurnKey};

/// Remembers every called turn a surface has already announced.
///
/// The baseline only grows: once a key has been reported it is never
/// reported again for the lifetime of the tracker, even if it drops out of
/// a listing and reappears later.
#[derive(Debug, Default, Clone)]
pub struct ArrivalTracker {
    seen: HashSet<TurnKey>,
}

impl ArrivalTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold the current called set into the baseline and return the turns
    /// that were not in it, in the order given.
    pub fn observe(&mut self, called: &[Turn]) -> Vec<Turn> {
        called
            .iter()
            .filter(|turn| self.seen.insert(turn.key()))
            .cloned()
            .collect()
    }

    pub fn has_seen(&self, key: &TurnKey) -> bool {
        self.seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
