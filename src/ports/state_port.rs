//! Durable run-state port.

use crate::domain::error::BarwardenError;
use crate::domain::state::RunState;

pub trait StatePort {
    /// Durably replaces the stored state. Either the new state or the previous
    /// one is readable afterwards, never a partial write.
    fn snapshot(&mut self, state: &RunState) -> Result<(), BarwardenError>;

    /// The last committed state, if any.
    fn load(&self) -> Result<Option<RunState>, BarwardenError>;

    fn load_or_init(&self, initial_equity: f64) -> Result<RunState, BarwardenError> {
        Ok(self
            .load()?
            .unwrap_or_else(|| RunState::fresh(initial_equity)))
    }
}
