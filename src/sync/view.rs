//! The rendered state of one surface after a successful poll.

use chrono::{DateTime, Utc};

use crate::model::{Bucket, Turn, bucket, rank};
use crate::surface::SurfaceFilter;

#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceView {
    /// Waiting turns, ranked.
    pub pending: Vec<Turn>,
    /// Called turns, ranked.
    pub called: Vec<Turn>,
    /// Index into `called` of the featured turn, on rotating surfaces.
    pub featured: Option<usize>,
    /// `None` until the first successful poll.
    pub fetched_at: Option<DateTime<Utc>>,
}

impl SurfaceView {
    pub fn empty() -> Self {
        Self {
            pending: Vec::new(),
            called: Vec::new(),
            featured: None,
            fetched_at: None,
        }
    }

    /// Filter, bucket and rank a raw listing.
    pub fn build(turns: Vec<Turn>, filter: SurfaceFilter, fetched_at: DateTime<Utc>) -> Self {
        let mut pending = Vec::new();
        let mut called = Vec::new();
        for turn in turns.into_iter().filter(|t| filter.matches(t)) {
            match bucket(&turn) {
                Some(Bucket::Pending) => pending.push(turn),
                Some(Bucket::Called) => called.push(turn),
                None => {}
            }
        }
        pending.sort_by(rank);
        called.sort_by(rank);
        Self {
            pending,
            called,
            featured: None,
            fetched_at: Some(fetched_at),
        }
    }

    pub fn featured_turn(&self) -> Option<&Turn> {
        self.featured.and_then(|i| self.called.get(i))
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.called.is_empty()
    }
}

impl Default for SurfaceView {
    fn default() -> Self {
        Self::empty()
    }
}
