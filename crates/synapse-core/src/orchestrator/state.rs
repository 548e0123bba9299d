//! Run state machine with checked transitions.

use chrono::Utc;

use crate::domain::{Result, RunState, SynapseError, Transition};

/// Tracks the current [`RunState`] and every state entered so far.
///
/// A run starts in `Planning`. Terminal states accept no further transitions.
#[derive(Debug, Clone)]
pub struct RunMachine {
    state: RunState,
    history: Vec<Transition>,
}

impl Default for RunMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RunMachine {
    pub fn new() -> Self {
        Self {
            state: RunState::Planning,
            history: vec![Transition {
                state: RunState::Planning,
                at: Utc::now(),
            }],
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    pub fn into_history(self) -> Vec<Transition> {
        self.history
    }

    /// Whether `from -> to` is a legal edge.
    pub fn allows(from: RunState, to: RunState) -> bool {
        use RunState::*;
        matches!(
            (from, to),
            (Planning, Building)
                | (Building, Reviewing)
                | (Reviewing, Done)
                | (Planning | Building | Reviewing, Failed | Cancelled)
        )
    }

    /// Move to `to`, recording the transition.
    pub fn advance(&mut self, to: RunState) -> Result<()> {
        if !Self::allows(self.state, to) {
            return Err(SynapseError::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        tracing::debug!(from = %self.state, to = %to, "run state transition");
        self.state = to;
        self.history.push(Transition {
            state: to,
            at: Utc::now(),
        });
        Ok(())
    }
}
