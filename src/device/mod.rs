// Device identification and setup
//
// Organized structure:
// - mod.rs: File type detection and opening a node for SG_IO
// - inquiry.rs: Standard INQUIRY (peripheral type, identification strings)
// - capacity.rs: READ CAPACITY(10)/(16)

pub mod capacity;
pub mod inquiry;

pub use capacity::{read_capacity, read_capacity_with_retry, Capacity};
pub use inquiry::{inquiry, InquiryData};

use crate::error::{DeviceError, DeviceResult};
use crate::scsi::{CommandResponse, SenseCategory};
use nix::sys::stat::{major, minor, stat, SFlag};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

/// Character major of memory devices (/dev/null is minor 3)
const MEM_MAJOR: u64 = 1;
const DEV_NULL_MINOR: u64 = 3;
const SCSI_GENERIC_MAJOR: u64 = 21;
const SCSI_TAPE_MAJOR: u64 = 9;
const RAW_MAJOR: u64 = 255;

const PROC_DEVICES: &str = "/proc/devices";

/// What kind of node a path names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileType {
    NullDevice,
    /// sg or bsg character device
    ScsiGeneric,
    Raw,
    ScsiTape,
    Block,
    Fifo,
    Other,
}

impl FileType {
    /// Whether reads can be issued to the node with SG_IO
    pub fn supports_sg_io(self) -> bool {
        matches!(self, FileType::ScsiGeneric | FileType::Block)
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileType::NullDevice => "null device",
            FileType::ScsiGeneric => "SCSI generic (sg) device",
            FileType::Raw => "raw device",
            FileType::ScsiTape => "SCSI tape device",
            FileType::Block => "block device",
            FileType::Fifo => "fifo (named pipe)",
            FileType::Other => "other file type",
        };
        write!(f, "{}", s)
    }
}

/// Character major of the bsg driver, if the kernel registered one
fn bsg_major() -> Option<u64> {
    static BSG_MAJOR: OnceLock<Option<u64>> = OnceLock::new();
    *BSG_MAJOR.get_or_init(|| match std::fs::read_to_string(PROC_DEVICES) {
        Ok(text) => {
            let found = parse_bsg_major(&text);
            tracing::trace!(bsg_major = ?found, "scanned {}", PROC_DEVICES);
            found
        }
        Err(e) => {
            tracing::debug!(error = %e, "could not read {}", PROC_DEVICES);
            None
        }
    })
}

/// Find the `bsg` entry in the character device section of /proc/devices
pub(crate) fn parse_bsg_major(text: &str) -> Option<u64> {
    let mut lines = text.lines();
    lines.find(|line| line.trim_start().starts_with("Character"))?;

    for line in lines {
        let mut fields = line.split_whitespace();
        let (Some(number), Some(name)) = (fields.next(), fields.next()) else {
            // Blank line ends the section
            return None;
        };
        let Ok(number) = number.parse::<u64>() else {
            return None;
        };
        if name == "bsg" {
            return Some(number);
        }
    }
    None
}

/// Map a node's type bits and device numbers to a [`FileType`]
pub(crate) fn classify_node(kind: SFlag, dev_major: u64, dev_minor: u64, bsg: Option<u64>) -> FileType {
    if kind == SFlag::S_IFCHR {
        match dev_major {
            MEM_MAJOR if dev_minor == DEV_NULL_MINOR => FileType::NullDevice,
            RAW_MAJOR => FileType::Raw,
            SCSI_GENERIC_MAJOR => FileType::ScsiGeneric,
            SCSI_TAPE_MAJOR => FileType::ScsiTape,
            m if Some(m) == bsg => FileType::ScsiGeneric,
            _ => FileType::Other,
        }
    } else if kind == SFlag::S_IFBLK {
        FileType::Block
    } else if kind == SFlag::S_IFIFO {
        FileType::Fifo
    } else {
        FileType::Other
    }
}

/// Determine what kind of node `path` is
///
/// A path of `.` is treated as the null device.
pub fn detect_file_type(path: &Path) -> DeviceResult<FileType> {
    if path.as_os_str() == "." {
        return Ok(FileType::NullDevice);
    }

    let st = stat(path).map_err(|source| DeviceError::Stat {
        path: path.to_path_buf(),
        source,
    })?;
    let kind = SFlag::from_bits_truncate(st.st_mode & SFlag::S_IFMT.bits());

    // The bsg lookup touches /proc; skip it for nodes it cannot affect
    let bsg = if kind == SFlag::S_IFCHR { bsg_major() } else { None };
    Ok(classify_node(kind, major(st.st_rdev), minor(st.st_rdev), bsg))
}

/// Open `path` for SG_IO reads
///
/// Only sg and block nodes are accepted. sg nodes get their reserved buffer
/// sized to `reserve` bytes.
#[cfg(target_os = "linux")]
pub fn open_device(path: &Path, reserve: usize) -> DeviceResult<crate::scsi::SgDevice> {
    let file_type = detect_file_type(path)?;
    tracing::debug!(device = %path.display(), %file_type, "output file type");

    if !file_type.supports_sg_io() {
        return Err(DeviceError::UnsupportedFileType {
            path: path.to_path_buf(),
            file_type,
        });
    }

    crate::scsi::SgDevice::open(path, file_type == FileType::ScsiGeneric, reserve).map_err(|source| {
        DeviceError::Open {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Turn a non-data completion into the matching [`DeviceError`]
pub(crate) fn check_completion(command: &'static str, response: &CommandResponse) -> DeviceResult<()> {
    match response.category() {
        SenseCategory::Clean | SenseCategory::ConditionMet | SenseCategory::Recovered => Ok(()),
        SenseCategory::InvalidOpcode => Err(DeviceError::NotSupported { command }),
        SenseCategory::UnitAttention => Err(DeviceError::UnitAttention { command }),
        SenseCategory::AbortedCommand => Err(DeviceError::AbortedCommand { command }),
        category => Err(DeviceError::CommandFailed { command, category }),
    }
}

/// Bytes the device actually returned into a buffer of `len` bytes
pub(crate) fn returned_len(response: &CommandResponse, len: usize) -> usize {
    len.saturating_sub(response.residual as usize)
}
