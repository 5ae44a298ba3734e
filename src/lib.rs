// Allow uppercase acronyms for industry-standard terms like CDB, LBA
#![allow(clippy::upper_case_acronyms)]

pub mod device;
pub mod engine;
pub mod error;
pub mod scan;
pub mod scsi;
pub mod ui;

pub use engine::{read_blocks, DeviceContext, ReadPolicy, ReadReport, ReadRequest, ReadStats, ReadStatus, Session};
pub use error::{ConfigError, DeviceError, ReadError, RetryCeilings};
pub use scan::{ScanPlan, ScanRunner};

use scsi::CdbSize;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

// Global flag for SIGINT/SIGQUIT/SIGPIPE
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

// Global flag for SIGUSR1
static PROGRESS_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Set the interrupt flag (called by signal handler)
pub fn set_interrupted() {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Check if an interrupt has been received
pub fn is_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Reset the interrupt flag (primarily for testing)
pub fn reset_interrupted() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}

/// Ask the scan loop for a statistics report (called by signal handler)
pub fn request_progress() {
    PROGRESS_REQUESTED.store(true, Ordering::SeqCst);
}

/// Consume a pending progress request
pub fn take_progress_request() -> bool {
    PROGRESS_REQUESTED.swap(false, Ordering::SeqCst)
}

/// Everything a run can be configured with
///
/// Loaded from a JSON file when one is given; command-line arguments are
/// applied on top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadConfig {
    pub policy: ReadPolicy,
    pub cdb_size: CdbSize,
    pub scan: ScanPlan,
    pub ceilings: RetryCeilings,

    /// Request direct I/O from the sg driver
    pub direct_io: bool,

    /// Seconds between progress lines
    pub refresh_secs: u64,

    /// Report rates in MiB rather than MB
    pub kilobyte: bool,

    /// Append every substituted block to this file
    pub bad_block_log: Option<PathBuf>,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            policy: ReadPolicy::default(),
            cdb_size: CdbSize::default(),
            scan: ScanPlan::default(),
            ceilings: RetryCeilings::default(),
            direct_io: false,
            refresh_secs: scan::DEFAULT_REFRESH_SECS,
            kilobyte: false,
            bad_block_log: None,
        }
    }
}

impl ReadConfig {
    /// Load a configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scan
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.refresh_secs == 0 {
            return Err(ConfigError::Invalid("refresh interval must be at least 1 second".to_string()));
        }
        Ok(())
    }

    pub fn refresh(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }

    pub fn runner(&self) -> ScanRunner {
        ScanRunner::new(self.scan)
            .with_refresh(self.refresh())
            .with_direct_io(self.direct_io)
    }
}
