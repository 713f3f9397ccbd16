//! Expiring typing indicators

use crate::protocol::Id;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Who is typing, each entry expiring `timeout` after its last signal
///
/// Time is passed in rather than read, so the owner decides when to
/// sweep. A new signal resets the sender's deadline instead of adding one.
#[derive(Debug, Clone)]
pub struct TypingIndicators {
    timeout: Duration,
    deadlines: HashMap<Id, Instant>,
}

impl TypingIndicators {
    /// Create with the given expiry
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadlines: HashMap::new(),
        }
    }

    /// Record a typing signal from `sender`
    pub fn set(&mut self, sender: Id, is_typing: bool, now: Instant) {
        if is_typing {
            self.deadlines.insert(sender, now + self.timeout);
        } else {
            self.deadlines.remove(&sender);
        }
    }

    /// Whether `sender` is typing at `now`
    pub fn is_typing(&self, sender: &Id, now: Instant) -> bool {
        self.deadlines
            .get(sender)
            .is_some_and(|deadline| *deadline > now)
    }

    /// Whether anyone is typing at `now`
    pub fn any(&self, now: Instant) -> bool {
        self.deadlines.values().any(|deadline| *deadline > now)
    }

    /// Drop expired entries, returning who stopped
    pub fn expire(&mut self, now: Instant) -> Vec<Id> {
        let expired: Vec<Id> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            self.deadlines.remove(id);
        }
        expired
    }

    /// Earliest pending expiry
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Forget everyone
    pub fn clear(&mut self) {
        self.deadlines.clear();
    }
}
