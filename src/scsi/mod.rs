// SCSI command plumbing
//
// Organized structure:
// - cdb.rs: Command descriptor block builders and decoders
// - sense.rs: Sense data decoding and completion categories
// - transport.rs: The device-control call abstraction
// - sg_io.rs: Linux SG_IO implementation of the transport

pub mod cdb;
pub mod sense;
pub mod transport;

#[cfg(target_os = "linux")]
pub mod sg_io;


pub use cdb::{Cdb, CdbError, CdbSize};
pub use sense::{SenseCategory, SenseData};
pub use transport::{CommandResponse, DataDirection, ScsiTransport, TransportError};

#[cfg(target_os = "linux")]
pub use sg_io::SgDevice;

use std::time::Duration;

/// Timeout applied to every command issued by this crate
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Size of the sense capture area handed to the driver
pub const SENSE_BUFFER_LEN: usize = 64;

/// SCSI operation codes
pub mod opcode {
    pub const INQUIRY: u8 = 0x12;
    pub const READ_CAPACITY_10: u8 = 0x25;
    pub const SERVICE_ACTION_IN_16: u8 = 0x9E;
    pub const READ_LONG_10: u8 = 0x3E;

    /// READ(6), READ(10), READ(12), READ(16)
    pub const READ: [u8; 4] = [0x08, 0x28, 0xA8, 0x88];
    /// WRITE(6), WRITE(10), WRITE(12), WRITE(16)
    pub const WRITE: [u8; 4] = [0x0A, 0x2A, 0xAA, 0x8A];

    /// Service action of SERVICE ACTION IN(16) selecting READ CAPACITY(16)
    pub const SA_READ_CAPACITY_16: u8 = 0x10;
}

/// SCSI status byte values
pub mod status {
    pub const GOOD: u8 = 0x00;
    pub const CHECK_CONDITION: u8 = 0x02;
    pub const CONDITION_MET: u8 = 0x04;
    pub const BUSY: u8 = 0x08;
    pub const RESERVATION_CONFLICT: u8 = 0x18;
    pub const TASK_ABORTED: u8 = 0x40;
}

/// Sense keys
pub mod sense_key {
    pub const NO_SENSE: u8 = 0x0;
    pub const RECOVERED_ERROR: u8 = 0x1;
    pub const NOT_READY: u8 = 0x2;
    pub const MEDIUM_ERROR: u8 = 0x3;
    pub const HARDWARE_ERROR: u8 = 0x4;
    pub const ILLEGAL_REQUEST: u8 = 0x5;
    pub const UNIT_ATTENTION: u8 = 0x6;
    pub const DATA_PROTECT: u8 = 0x7;
    pub const BLANK_CHECK: u8 = 0x8;
    pub const COPY_ABORTED: u8 = 0xA;
    pub const ABORTED_COMMAND: u8 = 0xB;
    pub const VOLUME_OVERFLOW: u8 = 0xD;
    pub const MISCOMPARE: u8 = 0xE;
}

/// Peripheral device type codes (INQUIRY byte 0, low 5 bits)
pub mod device_type {
    pub const DISK: u8 = 0x00;
    pub const TAPE: u8 = 0x01;
    /// MMC devices (CD/DVD/BD)
    pub const OPTICAL: u8 = 0x05;
}
