//! One-shot flush deadline.

use tokio::time::Instant;

/// A single armed deadline.
///
/// Re-arming while armed is a no-op, as is cancelling while unarmed. A
/// firing that races a flush which already cancelled the deadline must be
/// ignored by the caller (see [`is_due`](Deadline::is_due)).
#[derive(Debug, Default)]
pub struct Deadline {
    armed: Option<Instant>,
}

impl Deadline {
    pub fn new() -> Self {
        Self { armed: None }
    }

    /// Arm the deadline. No-op if already armed.
    pub fn arm(&mut self, at: Instant) {
        if self.armed.is_none() {
            self.armed = Some(at);
        }
    }

    /// Cancel the deadline. No-op if unarmed.
    pub fn cancel(&mut self) {
        self.armed = None;
    }

    /// The armed deadline, if any.
    pub fn get(&self) -> Option<Instant> {
        self.armed
    }

    /// Check whether the deadline is armed and has expired.
    pub fn is_due(&self, now: Instant) -> bool {
        self.armed.is_some_and(|at| at <= now)
    }
}
