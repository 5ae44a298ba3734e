/// Error classification for read failures
///
/// Every terminal read status falls into one of five classes. The class
/// decides whether the engine may retry, whether continue-on-error may
/// substitute zeros for the failed range, and what the binary reports.
use crate::engine::{ReadStatus, TransferOutcome};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of failures for recovery strategy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Parameter errors - the request itself was malformed
    /// Examples: CDB cannot express the range, buffer length mismatch
    Parameter,

    /// The driver could not reserve a buffer of the requested size
    /// The caller shrinks its transfer window and tries again
    ResourceExhausted,

    /// Transient device conditions - retried to a bound
    /// Examples: unit attention, aborted command, not ready
    Transient,

    /// Unreadable media - recoverable per continue-on-error policy
    Media,

    /// Cannot continue with this device at all
    /// Examples: device cannot be opened, capacity unknown
    Fatal,
}

impl ErrorClass {
    /// Get human-readable description of error class
    pub fn description(&self) -> &'static str {
        match self {
            ErrorClass::Parameter => "Malformed request, never retried",
            ErrorClass::ResourceExhausted => "Transfer too large for the driver buffer",
            ErrorClass::Transient => "Device condition that may clear on retry",
            ErrorClass::Media => "Unreadable block on the medium",
            ErrorClass::Fatal => "Unrecoverable device error",
        }
    }

    /// Check if this error class allows retries inside the engine
    pub fn allows_retry(&self) -> bool {
        matches!(self, ErrorClass::Transient | ErrorClass::Media)
    }

    /// Check if continue-on-error may replace the failed range with zeros
    pub fn allows_zero_fill(&self) -> bool {
        matches!(self, ErrorClass::Transient | ErrorClass::Media)
    }

    /// Class of a terminal read status; `None` for success
    pub fn of_status(status: ReadStatus) -> Option<Self> {
        match status {
            ReadStatus::Success => None,
            ReadStatus::SyntaxError => Some(ErrorClass::Parameter),
            ReadStatus::ResourceExhausted => Some(ErrorClass::ResourceExhausted),
            ReadStatus::MediumHard => Some(ErrorClass::Media),
            ReadStatus::NotReady
            | ReadStatus::UnitAttention
            | ReadStatus::AbortedCommand
            | ReadStatus::Other => Some(ErrorClass::Transient),
        }
    }

    /// Class of a single transfer outcome; `None` for clean and recovered transfers
    pub fn of_outcome(outcome: &TransferOutcome) -> Option<Self> {
        match outcome {
            TransferOutcome::Clean | TransferOutcome::Recovered { .. } => None,
            TransferOutcome::SyntaxError => Some(ErrorClass::Parameter),
            TransferOutcome::ResourceExhausted => Some(ErrorClass::ResourceExhausted),
            TransferOutcome::MediumError { .. } => Some(ErrorClass::Media),
            TransferOutcome::UnitAttention
            | TransferOutcome::AbortedCommand
            | TransferOutcome::NotReady
            | TransferOutcome::IllegalRequest { .. }
            | TransferOutcome::Other => Some(ErrorClass::Transient),
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Parameter => write!(f, "Parameter"),
            ErrorClass::ResourceExhausted => write!(f, "ResourceExhausted"),
            ErrorClass::Transient => write!(f, "Transient"),
            ErrorClass::Media => write!(f, "Media"),
            ErrorClass::Fatal => write!(f, "Fatal"),
        }
    }
}
