//! Operator desk actions: call, complete, and cancel turns.
//!
//! The desk validates the transition against the state it last observed,
//! asks the backend to apply it, and leaves local state alone. The next
//! poll is what shows the change.

use std::sync::Arc;

use tracing::info;

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::model::{Lane, Turn, TurnState};

pub struct OperatorDesk {
    backend: Arc<dyn Backend>,
    lane: Option<Lane>,
}

impl OperatorDesk {
    /// A desk serving `lane`, or every lane when `None`.
    pub fn new(backend: Arc<dyn Backend>, lane: Option<Lane>) -> Self {
        Self { backend, lane }
    }

    /// Active turns this desk serves, as the backend reports them now.
    pub async fn queue(&self) -> Result<Vec<Turn>> {
        let mut turns = self.backend.list_active_turns(self.lane).await?;
        if let Some(lane) = self.lane {
            turns.retain(|t| t.lane() == lane);
        }
        Ok(turns)
    }

    pub async fn call(&self, turn: &Turn) -> Result<()> {
        Self::check(turn, TurnState::Called)?;
        self.backend.call_turn(&turn.number).await?;
        info!(turn = %turn.number, module = %turn.module, "turn called");
        Ok(())
    }

    pub async fn complete(&self, turn: &Turn) -> Result<()> {
        Self::check(turn, TurnState::Attended)?;
        self.backend.complete_turn(&turn.number).await?;
        info!(turn = %turn.number, module = %turn.module, "turn completed");
        Ok(())
    }

    pub async fn cancel(&self, turn: &Turn) -> Result<()> {
        Self::check(turn, TurnState::Cancelled)?;
        self.backend.cancel_turn(&turn.number).await?;
        info!(turn = %turn.number, module = %turn.module, "turn cancelled");
        Ok(())
    }

    /// Call the highest-ranked pending turn, if any.
    pub async fn call_next(&self) -> Result<Option<Turn>> {
        let mut pending: Vec<Turn> = self
            .queue()
            .await?
            .into_iter()
            .filter(|t| t.state == TurnState::Pending)
            .collect();
        pending.sort_by(crate::model::rank);
        let Some(next) = pending.into_iter().next() else {
            return Ok(None);
        };
        self.call(&next).await?;
        Ok(Some(next))
    }

    fn check(turn: &Turn, to: TurnState) -> Result<()> {
        if turn.state.can_transition_to(to) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: turn.state,
                to,
            })
        }
    }
}
