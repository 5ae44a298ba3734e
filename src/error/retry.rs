/// Retry accounting for the read engine
///
/// Two kinds of bound apply. A per-call [`RetryBudget`] is created fresh for
/// every logical read and covers not-ready, illegal request, medium errors
/// without an address and unclassified failures. The session-wide
/// [`RetryCeilings`] cover unit attentions and aborted commands across the
/// whole run and never replenish.
use serde::{Deserialize, Serialize};

/// Default per-call retry count
pub const DEFAULT_RETRIES: u32 = 2;

/// Default session ceiling for unit attentions
pub const MAX_UNIT_ATTENTIONS: u32 = 10;

/// Default session ceiling for aborted commands
pub const MAX_ABORTED_COMMANDS: u32 = 256;

/// Per-call retry counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    remaining: u32,
}

impl RetryBudget {
    pub fn new(retries: u32) -> Self {
        Self { remaining: retries }
    }

    /// Take one retry if any remain
    pub fn try_consume(&mut self) -> bool {
        if self.remaining > 0 {
            self.remaining -= 1;
            true
        } else {
            false
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::new(DEFAULT_RETRIES)
    }
}

/// Condition whose retries are bounded for the whole session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeilingKind {
    UnitAttention,
    AbortedCommand,
}

/// Session-wide retry ceilings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryCeilings {
    /// Unit attentions that may still be retried
    pub unit_attentions: u32,

    /// Aborted commands that may still be retried
    pub aborted_commands: u32,
}

impl RetryCeilings {
    pub fn new(unit_attentions: u32, aborted_commands: u32) -> Self {
        Self {
            unit_attentions,
            aborted_commands,
        }
    }

    /// Take one retry from the given ceiling if it still has budget
    pub fn try_consume(&mut self, kind: CeilingKind) -> bool {
        let slot = match kind {
            CeilingKind::UnitAttention => &mut self.unit_attentions,
            CeilingKind::AbortedCommand => &mut self.aborted_commands,
        };
        if *slot > 0 {
            *slot -= 1;
            true
        } else {
            false
        }
    }

    pub fn remaining(&self, kind: CeilingKind) -> u32 {
        match kind {
            CeilingKind::UnitAttention => self.unit_attentions,
            CeilingKind::AbortedCommand => self.aborted_commands,
        }
    }
}

impl Default for RetryCeilings {
    fn default() -> Self {
        Self::new(MAX_UNIT_ATTENTIONS, MAX_ABORTED_COMMANDS)
    }
}
