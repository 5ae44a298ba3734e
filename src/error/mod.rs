/// Error types and recovery bookkeeping for dskread
///
/// This module provides:
/// - Error classification for terminal read statuses
/// - Per-call retry budgets and session-wide retry ceilings
/// - Bad block recording and reporting
/// - The error enums of the device, scan and configuration layers
///
/// # Architecture
///
/// ```text
/// ┌─────────────────────────────────────────┐
/// │     Scan loop (ReadError)               │
/// └────────────────┬────────────────────────┘
///                  │
///      ┌───────────┴───────────┐
///      ↓                       ↓
/// ┌──────────────┐      ┌──────────────┐
/// │Classification│      │ Bad block log │
/// │   & Retry    │      │               │
/// └──────────────┘      └──────────────┘
/// ```
pub mod classification;
pub mod mechanisms;
pub mod retry;

pub use classification::ErrorClass;
pub use mechanisms::{BadBlockEntry, BadBlockLog, BadBlockReport, Substitution};
pub use retry::{CeilingKind, RetryBudget, RetryCeilings};

use crate::device::FileType;
use crate::engine::ReadStatus;
use crate::scsi::{SenseCategory, TransportError};
use std::path::PathBuf;
use thiserror::Error;

/// Failures while identifying, opening or querying a device
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("unable to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("{path} is a {file_type}, which cannot be read through SG_IO")]
    UnsupportedFileType { path: PathBuf, file_type: FileType },

    #[error("could not open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} not supported by device")]
    NotSupported { command: &'static str },

    #[error("{command} failed: unit attention")]
    UnitAttention { command: &'static str },

    #[error("{command} failed: aborted command")]
    AbortedCommand { command: &'static str },

    #[error("{command} failed: {category}")]
    CommandFailed {
        command: &'static str,
        category: SenseCategory,
    },

    #[error("{command} returned a short or malformed response")]
    MalformedResponse { command: &'static str },

    #[error("device call failed: {0}")]
    Transport(#[from] TransportError),
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Failures of a whole-device scan
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("read failed ({status}) at or after lba={lba} [{lba:#x}]")]
    Failed { status: ReadStatus, lba: u64 },

    #[error("invalid scan range: {0}")]
    InvalidRange(String),

    #[error("scan interrupted by signal")]
    Interrupted,

    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl ReadError {
    /// Classification used for reporting and the process exit code
    pub fn class(&self) -> ErrorClass {
        match self {
            ReadError::Failed { status, .. } => ErrorClass::of_status(*status).unwrap_or(ErrorClass::Fatal),
            ReadError::InvalidRange(_) => ErrorClass::Parameter,
            ReadError::Interrupted | ReadError::Device(_) => ErrorClass::Fatal,
        }
    }

    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            ReadError::Failed { status, .. } => status.exit_code(),
            ReadError::InvalidRange(_) => ReadStatus::SyntaxError.exit_code(),
            ReadError::Interrupted => 128 + libc::SIGINT,
            ReadError::Device(DeviceError::UnitAttention { .. }) => ReadStatus::UnitAttention.exit_code(),
            ReadError::Device(DeviceError::AbortedCommand { .. }) => ReadStatus::AbortedCommand.exit_code(),
            ReadError::Device(_) => ReadStatus::Other.exit_code(),
        }
    }
}

/// Failures while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
