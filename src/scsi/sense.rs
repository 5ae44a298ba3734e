/// Sense data decoding
///
/// Handles both fixed (0x70/0x71) and descriptor (0x72/0x73) sense formats
/// and folds a command completion (SCSI status, host status, driver status,
/// sense bytes) into a single [`SenseCategory`].
use super::{sense_key, status};
use serde::{Deserialize, Serialize};
use std::fmt;

const HOST_NO_CONNECT: u16 = 0x01;
const HOST_BUS_BUSY: u16 = 0x02;
const HOST_TIME_OUT: u16 = 0x03;
const HOST_NEXUS_FAILURE: u16 = 0x11;

const DRIVER_STATUS_MASK: u16 = 0x0F;
const DRIVER_TIMEOUT: u16 = 0x06;

/// Driver status bit signalling that sense data was collected
pub const DRIVER_SENSE: u16 = 0x08;

/// Additional sense code reported by MMC devices for "illegal mode for this track"
pub const ASC_ILLEGAL_MODE_FOR_TRACK: u8 = 0x64;

/// Additional sense code for "invalid command operation code"
pub const ASC_INVALID_OPCODE: u8 = 0x20;

/// Outcome category of a completed command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SenseCategory {
    Clean,
    ConditionMet,
    NoSense,
    Recovered,
    NotReady,
    /// Medium error, hardware error or blank check
    MediumHard,
    UnitAttention,
    IllegalRequest,
    /// Illegal request because the device does not implement the opcode
    InvalidOpcode,
    AbortedCommand,
    DataProtect,
    Miscompare,
    Busy,
    ReservationConflict,
    Timeout,
    Other,
}

impl SenseCategory {
    /// Fold a command completion into a category
    pub fn from_completion(scsi_status: u8, host_status: u16, driver_status: u16, sense: &[u8]) -> Self {
        let masked_driver = driver_status & DRIVER_STATUS_MASK;
        let scsi_status = scsi_status & 0x7E;

        if scsi_status == status::GOOD && host_status == 0 && masked_driver == 0 {
            return SenseCategory::Clean;
        }

        if scsi_status == status::CHECK_CONDITION || masked_driver == DRIVER_SENSE {
            return SenseData::new(sense).category();
        }

        if scsi_status != status::GOOD {
            return match scsi_status {
                status::CONDITION_MET => SenseCategory::ConditionMet,
                status::RESERVATION_CONFLICT => SenseCategory::ReservationConflict,
                status::BUSY => SenseCategory::Busy,
                status::TASK_ABORTED => SenseCategory::AbortedCommand,
                _ => SenseCategory::Other,
            };
        }

        if host_status != 0 {
            return match host_status {
                HOST_NO_CONNECT | HOST_BUS_BUSY | HOST_TIME_OUT => SenseCategory::Timeout,
                HOST_NEXUS_FAILURE => SenseCategory::ReservationConflict,
                _ => SenseCategory::Other,
            };
        }

        if masked_driver == DRIVER_TIMEOUT {
            return SenseCategory::Timeout;
        }

        SenseCategory::Other
    }
}

impl fmt::Display for SenseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SenseCategory::Clean => "clean",
            SenseCategory::ConditionMet => "condition met",
            SenseCategory::NoSense => "no sense",
            SenseCategory::Recovered => "recovered error",
            SenseCategory::NotReady => "not ready",
            SenseCategory::MediumHard => "medium or hardware error",
            SenseCategory::UnitAttention => "unit attention",
            SenseCategory::IllegalRequest => "illegal request",
            SenseCategory::InvalidOpcode => "invalid opcode",
            SenseCategory::AbortedCommand => "aborted command",
            SenseCategory::DataProtect => "data protect",
            SenseCategory::Miscompare => "miscompare",
            SenseCategory::Busy => "busy",
            SenseCategory::ReservationConflict => "reservation conflict",
            SenseCategory::Timeout => "timeout",
            SenseCategory::Other => "other",
        };
        write!(f, "{}", text)
    }
}

/// Normalized sense header, common to both formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenseHeader {
    pub response_code: u8,
    pub sense_key: u8,
    pub asc: u8,
    pub ascq: u8,
}

impl SenseHeader {
    pub fn is_descriptor_format(&self) -> bool {
        self.response_code >= 0x72
    }
}

/// The INFORMATION field of sense data
///
/// Devices fill the value even when the VALID bit is clear; MMC devices in
/// particular often report a usable address without setting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoField {
    pub value: u64,
    pub valid: bool,
}

/// Borrowed view over the sense bytes the driver actually wrote
#[derive(Debug, Clone, Copy)]
pub struct SenseData<'a> {
    bytes: &'a [u8],
}

impl<'a> SenseData<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decode the response code, sense key and additional sense codes
    pub fn header(&self) -> Option<SenseHeader> {
        let b = self.bytes;
        if b.is_empty() || (b[0] & 0x70) != 0x70 {
            return None;
        }
        let response_code = b[0] & 0x7F;
        let byte = |i: usize| b.get(i).copied().unwrap_or(0);

        if response_code >= 0x72 {
            Some(SenseHeader {
                response_code,
                sense_key: byte(1) & 0x0F,
                asc: byte(2),
                ascq: byte(3),
            })
        } else {
            Some(SenseHeader {
                response_code,
                sense_key: byte(2) & 0x0F,
                asc: byte(12),
                ascq: byte(13),
            })
        }
    }

    /// Locate a descriptor of the given type in descriptor-format sense
    fn descriptor(&self, desc_type: u8) -> Option<&'a [u8]> {
        let b = self.bytes;
        if b.len() < 8 {
            return None;
        }
        let end = (8 + b[7] as usize).min(b.len());
        let mut pos = 8;
        while pos + 2 <= end {
            let len = b[pos + 1] as usize + 2;
            if b[pos] == desc_type {
                return b.get(pos..(pos + len).min(end));
            }
            pos += len;
        }
        None
    }

    /// Read the INFORMATION field, if the format carries one
    pub fn information(&self) -> Option<InfoField> {
        let header = self.header()?;
        let b = self.bytes;
        if header.is_descriptor_format() {
            let desc = self.descriptor(0x00)?;
            if desc.len() < 12 {
                return None;
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&desc[4..12]);
            Some(InfoField {
                value: u64::from_be_bytes(raw),
                valid: desc[2] & 0x80 != 0,
            })
        } else {
            if b.len() < 7 {
                return None;
            }
            Some(InfoField {
                value: u32::from_be_bytes([b[3], b[4], b[5], b[6]]) as u64,
                valid: b[0] & 0x80 != 0,
            })
        }
    }

    /// INFORMATION value only when the VALID bit is set
    pub fn valid_information(&self) -> Option<u64> {
        self.information().filter(|info| info.valid).map(|info| info.value)
    }

    /// Incorrect length indicator
    pub fn ili(&self) -> bool {
        let Some(header) = self.header() else {
            return false;
        };
        if header.is_descriptor_format() {
            // Stream commands (0x04) or block commands (0x05) descriptor
            [0x04, 0x05].iter().any(|&desc_type| {
                self.descriptor(desc_type)
                    .and_then(|desc| desc.get(3))
                    .map(|flags| flags & 0x20 != 0)
                    .unwrap_or(false)
            })
        } else {
            self.bytes.get(2).map(|flags| flags & 0x20 != 0).unwrap_or(false)
        }
    }

    /// Category implied by the sense key and additional sense codes
    pub fn category(&self) -> SenseCategory {
        let Some(header) = self.header() else {
            return SenseCategory::Other;
        };
        match header.sense_key {
            sense_key::NO_SENSE => SenseCategory::NoSense,
            sense_key::RECOVERED_ERROR => SenseCategory::Recovered,
            sense_key::NOT_READY => SenseCategory::NotReady,
            sense_key::MEDIUM_ERROR | sense_key::HARDWARE_ERROR | sense_key::BLANK_CHECK => {
                SenseCategory::MediumHard
            }
            sense_key::UNIT_ATTENTION => SenseCategory::UnitAttention,
            sense_key::ILLEGAL_REQUEST => {
                if header.asc == ASC_INVALID_OPCODE && header.ascq == 0x00 {
                    SenseCategory::InvalidOpcode
                } else {
                    SenseCategory::IllegalRequest
                }
            }
            sense_key::ABORTED_COMMAND => SenseCategory::AbortedCommand,
            sense_key::DATA_PROTECT => SenseCategory::DataProtect,
            sense_key::MISCOMPARE => SenseCategory::Miscompare,
            _ => SenseCategory::Other,
        }
    }
}

/// Builder for fixed-format sense data
///
/// Used by device simulators and tests to fabricate the sense bytes a real
/// device would return.
#[derive(Debug, Clone, Copy)]
pub struct FixedSense {
    bytes: [u8; 18],
}

impl FixedSense {
    pub fn new(key: u8, asc: u8, ascq: u8) -> Self {
        let mut bytes = [0u8; 18];
        bytes[0] = 0x70;
        bytes[2] = key & 0x0F;
        bytes[7] = 10;
        bytes[12] = asc;
        bytes[13] = ascq;
        Self { bytes }
    }

    /// Set the INFORMATION field and the VALID bit
    pub fn info(mut self, value: u32) -> Self {
        self.bytes[0] |= 0x80;
        self.bytes[3..7].copy_from_slice(&value.to_be_bytes());
        self
    }

    /// Set the INFORMATION field without the VALID bit
    pub fn info_unflagged(mut self, value: u32) -> Self {
        self.bytes[0] &= 0x7F;
        self.bytes[3..7].copy_from_slice(&value.to_be_bytes());
        self
    }

    /// Set the incorrect length indicator
    pub fn ili(mut self) -> Self {
        self.bytes[2] |= 0x20;
        self
    }

    pub fn bytes(&self) -> [u8; 18] {
        self.bytes
    }
}
