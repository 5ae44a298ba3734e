use super::{check_completion, returned_len};
use crate::engine::executor::issue;
use crate::error::{DeviceError, DeviceResult};
use crate::scsi::cdb::Cdb;
use crate::scsi::{DataDirection, ScsiTransport};
use serde::Serialize;

const READ_CAPACITY_10: &str = "READ CAPACITY(10)";
const READ_CAPACITY_16: &str = "READ CAPACITY(16)";
const REPLY_LEN_10: usize = 8;
const REPLY_LEN_16: usize = 32;

/// Number of addressable blocks and their size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capacity {
    pub blocks: u64,
    pub block_size: u32,
}

impl Capacity {
    pub fn bytes(&self) -> u64 {
        self.blocks.saturating_mul(self.block_size as u64)
    }
}

/// READ CAPACITY(10), escalating to READ CAPACITY(16) when the last LBA
/// does not fit in 32 bits
pub fn read_capacity<T: ScsiTransport + ?Sized>(transport: &mut T) -> DeviceResult<Capacity> {
    let mut reply = [0u8; REPLY_LEN_10];
    let response = issue(
        transport,
        &Cdb::read_capacity_10(),
        DataDirection::FromDevice,
        &mut reply,
        false,
    )?;
    check_completion(READ_CAPACITY_10, &response)?;
    if returned_len(&response, reply.len()) < REPLY_LEN_10 {
        return Err(DeviceError::MalformedResponse {
            command: READ_CAPACITY_10,
        });
    }

    let last_lba = u32::from_be_bytes([reply[0], reply[1], reply[2], reply[3]]);
    if last_lba != u32::MAX {
        let capacity = Capacity {
            blocks: last_lba as u64 + 1,
            block_size: u32::from_be_bytes([reply[4], reply[5], reply[6], reply[7]]),
        };
        tracing::debug!(
            blocks = capacity.blocks,
            block_size = capacity.block_size,
            "number of blocks={} [{:#x}]",
            capacity.blocks,
            capacity.blocks
        );
        return Ok(capacity);
    }

    let mut reply = [0u8; REPLY_LEN_16];
    let response = issue(
        transport,
        &Cdb::read_capacity_16(REPLY_LEN_16 as u32),
        DataDirection::FromDevice,
        &mut reply,
        false,
    )?;
    check_completion(READ_CAPACITY_16, &response)?;
    if returned_len(&response, reply.len()) < 12 {
        return Err(DeviceError::MalformedResponse {
            command: READ_CAPACITY_16,
        });
    }

    let mut last = [0u8; 8];
    last.copy_from_slice(&reply[..8]);
    let capacity = Capacity {
        blocks: u64::from_be_bytes(last).saturating_add(1),
        block_size: u32::from_be_bytes([reply[8], reply[9], reply[10], reply[11]]),
    };
    tracing::debug!(
        blocks = capacity.blocks,
        block_size = capacity.block_size,
        "number of blocks={} [{:#x}] (16 byte reply)",
        capacity.blocks,
        capacity.blocks
    );
    Ok(capacity)
}

/// [`read_capacity`], tried a second time after a unit attention or an
/// aborted command
pub fn read_capacity_with_retry<T: ScsiTransport + ?Sized>(transport: &mut T) -> DeviceResult<Capacity> {
    match read_capacity(transport) {
        Err(DeviceError::UnitAttention { .. }) => {
            tracing::warn!("Unit attention (readcap), continuing");
            read_capacity(transport)
        }
        Err(DeviceError::AbortedCommand { .. }) => {
            tracing::warn!("Aborted command (readcap), continuing");
            read_capacity(transport)
        }
        result => result,
    }
}
