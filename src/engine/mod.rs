// Block read-recovery engine
//
// Organized structure:
// - executor.rs: One bounded READ transfer and the classification of its result
// - read_long.rs: READ LONG(10) and single-block recovery under continue-on-error
// - recovery.rs: The controller turning fallible transfers into one logical read
// - stats.rs: Session counters

pub mod executor;
pub mod read_long;
pub mod recovery;
pub mod stats;

#[cfg(test)]
mod executor_tests;

pub use executor::{classify, read_low};
pub use recovery::read_blocks;
pub use stats::ReadStats;

use crate::error::{BadBlockLog, RetryCeilings};
use crate::scsi::{CdbSize, ScsiTransport};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default READ LONG length increment over the block size
pub const READ_LONG_DEFAULT_INCREMENT: i32 = 8;

/// Policy flags applied to every read on a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadPolicy {
    /// Set FUA on READ commands
    pub fua: bool,

    /// Set DPO on READ commands
    pub dpo: bool,

    /// Continue-on-error level
    ///
    /// 0 stops at the first unreadable block, 1 zero-fills it, 2 tries READ
    /// LONG on disks, 3 and above also ask the device to apply ECC correction.
    pub coe: u8,

    /// Per-call retries for not-ready and unclassified failures
    pub retries: u32,
}

impl Default for ReadPolicy {
    fn default() -> Self {
        Self {
            fua: false,
            dpo: false,
            coe: 0,
            retries: crate::error::retry::DEFAULT_RETRIES,
        }
    }
}

/// Everything the engine needs to know about one open device
#[derive(Debug)]
pub struct DeviceContext<T: ScsiTransport> {
    /// Command channel to the device
    pub transport: T,

    /// Name used in diagnostics
    pub name: String,

    /// Logical block size in bytes
    pub block_size: u32,

    /// READ CDB length
    pub cdb_size: CdbSize,

    /// Peripheral device type from INQUIRY
    pub pdt: u8,

    pub policy: ReadPolicy,
}

impl<T: ScsiTransport> DeviceContext<T> {
    pub fn new(transport: T, name: impl Into<String>, block_size: u32) -> Self {
        Self {
            transport,
            name: name.into(),
            block_size,
            cdb_size: CdbSize::default(),
            pdt: crate::scsi::device_type::DISK,
            policy: ReadPolicy::default(),
        }
    }

    pub fn with_cdb_size(mut self, cdb_size: CdbSize) -> Self {
        self.cdb_size = cdb_size;
        self
    }

    pub fn with_pdt(mut self, pdt: u8) -> Self {
        self.pdt = pdt;
        self
    }

    pub fn with_policy(mut self, policy: ReadPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// State shared by every read of a run, across devices
#[derive(Debug)]
pub struct Session {
    pub stats: ReadStats,

    /// Remaining unit attention and aborted command retries
    pub ceilings: RetryCeilings,

    /// Bytes READ LONG transfers beyond the block size; learned from the device
    pub read_long_increment: i32,

    pub bad_blocks: BadBlockLog,
}

impl Session {
    pub fn new(ceilings: RetryCeilings) -> Self {
        Self {
            stats: ReadStats::default(),
            ceilings,
            read_long_increment: READ_LONG_DEFAULT_INCREMENT,
            bad_blocks: BadBlockLog::new(),
        }
    }

    pub fn with_bad_block_log(mut self, log: BadBlockLog) -> Self {
        self.bad_blocks = log;
        self
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(RetryCeilings::default())
    }
}

/// Result of a single READ transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Clean,
    /// The device corrected an error; the data is good
    Recovered { error_lba: Option<u64> },
    UnitAttention,
    AbortedCommand,
    NotReady,
    IllegalRequest { asc: u8, ascq: u8 },
    /// Unreadable block, with its address when the device reported one
    MediumError { error_lba: Option<u64> },
    /// The driver could not allocate a buffer for this transfer size
    ResourceExhausted,
    /// The CDB could not be built
    SyntaxError,
    Other,
}

/// Terminal status of a logical read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadStatus {
    Success,
    MediumHard,
    SyntaxError,
    ResourceExhausted,
    NotReady,
    UnitAttention,
    AbortedCommand,
    Other,
}

impl ReadStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ReadStatus::Success)
    }

    /// Exit code in the sg3_utils numbering
    pub fn exit_code(&self) -> i32 {
        match self {
            ReadStatus::Success => 0,
            ReadStatus::SyntaxError => 1,
            ReadStatus::NotReady => 2,
            ReadStatus::MediumHard => 3,
            ReadStatus::UnitAttention => 6,
            ReadStatus::AbortedCommand => 11,
            ReadStatus::ResourceExhausted => 50 + libc::ENOMEM,
            ReadStatus::Other => 99,
        }
    }
}

impl fmt::Display for ReadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ReadStatus::Success => "success",
            ReadStatus::MediumHard => "medium or hardware error",
            ReadStatus::SyntaxError => "syntax error",
            ReadStatus::ResourceExhausted => "resource exhausted",
            ReadStatus::NotReady => "device not ready",
            ReadStatus::UnitAttention => "unit attention",
            ReadStatus::AbortedCommand => "aborted command",
            ReadStatus::Other => "other error",
        };
        write!(f, "{}", text)
    }
}

/// One logical read: `count` blocks from `start` into `buffer`
///
/// `buffer` must be exactly `count * block_size` bytes long.
#[derive(Debug)]
pub struct ReadRequest<'a> {
    pub start: u64,
    pub count: u32,
    pub buffer: &'a mut [u8],
}

impl<'a> ReadRequest<'a> {
    pub fn new(start: u64, count: u32, buffer: &'a mut [u8]) -> Self {
        Self { start, count, buffer }
    }
}

/// What a logical read achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadReport {
    /// Blocks whose contents in the buffer are defined (read or substituted)
    pub blocks_read: u32,
    pub status: ReadStatus,
}
