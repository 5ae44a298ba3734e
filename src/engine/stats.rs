/// Session counters accumulated by the engine for the life of a run
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadStats {
    /// Blocks transferred from the device by plain READ commands
    pub blocks_read: u64,

    /// Blocks replaced by zeros under continue-on-error
    pub blocks_zero_filled: u64,

    /// Errors the device corrected itself
    pub recovered_errors: u64,

    /// Failed transfers, less those that were retried
    pub unrecovered_errors: u64,

    /// Retries attempted across every bound
    pub retries: u64,

    /// Blocks rebuilt from READ LONG
    pub read_longs: u64,
}

impl ReadStats {
    /// Undo the unrecovered count of a transfer that is about to be retried
    pub(crate) fn forgive_unrecovered(&mut self) {
        self.unrecovered_errors = self.unrecovered_errors.saturating_sub(1);
    }

    /// Blocks whose contents were produced some way other than a plain READ
    pub fn blocks_substituted(&self) -> u64 {
        self.blocks_zero_filled + self.read_longs
    }

    /// Whether anything went wrong at all during the run
    pub fn has_errors(&self) -> bool {
        self.recovered_errors > 0 || self.unrecovered_errors > 0 || self.blocks_substituted() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forgive_never_underflows() {
        let mut stats = ReadStats::default();
        stats.forgive_unrecovered();
        assert_eq!(stats.unrecovered_errors, 0);

        stats.unrecovered_errors = 2;
        stats.forgive_unrecovered();
        assert_eq!(stats.unrecovered_errors, 1);
    }

    #[test]
    fn test_substituted_blocks() {
        let stats = ReadStats {
            blocks_zero_filled: 3,
            read_longs: 2,
            ..Default::default()
        };
        assert_eq!(stats.blocks_substituted(), 5);
        assert!(stats.has_errors());
        assert!(!ReadStats::default().has_errors());
    }
}
