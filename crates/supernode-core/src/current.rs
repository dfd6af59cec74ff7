//! Shared holder for the most recent completed run.
//!
//! Readers (replay, export) see either no run or one complete frozen
//! run; a new run replaces the previous one wholesale.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::pipeline::RunState;

/// Slot holding the latest [`RunState`], if any.
#[derive(Debug, Default)]
pub struct CurrentRun {
    slot: RwLock<Option<Arc<RunState>>>,
}

impl CurrentRun {
    /// Empty holder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a completed run, replacing any previous one.
    pub fn publish(&self, state: RunState) -> Arc<RunState> {
        let state = Arc::new(state);
        *self.slot.write() = Some(Arc::clone(&state));
        state
    }

    /// Latest run, if one has been published.
    pub fn get(&self) -> Option<Arc<RunState>> {
        self.slot.read().clone()
    }

    /// Drop the current run. Outstanding `Arc` handles stay valid.
    pub fn clear(&self) {
        *self.slot.write() = None;
    }
}
