//! Single-slot frequency change mailbox
//!
//! Written by the elasticity evaluator, read by the harvest scheduler.
//! It is a slot, not a queue: a second `set` before the reader's next
//! `take` replaces the first value, and only the latest change is applied.

/// Overwrite-on-set, clear-on-take cell for a pending harvest frequency
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrequencyMailbox {
    pending: Option<f64>,
}

impl FrequencyMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Post a new frequency, replacing any unconsumed one
    pub fn set(&mut self, frequency: f64) {
        self.pending = Some(frequency);
    }

    /// Consume the pending frequency, leaving the slot empty
    pub fn take(&mut self) -> Option<f64> {
        self.pending.take()
    }

    pub fn peek(&self) -> Option<f64> {
        self.pending
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }
}
