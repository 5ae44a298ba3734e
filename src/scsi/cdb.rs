/// Command descriptor block builders
///
/// READ/WRITE CDBs come in four sizes. The smaller forms trade address and
/// transfer-length range for compatibility with older devices, so every
/// builder validates that the requested range is representable before any
/// byte reaches the device.
use super::opcode;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Highest block address a 6-byte CDB can carry (21 bits)
pub const MAX_LBA_6: u64 = 0x1F_FFFF;

/// Largest transfer of a 6-byte CDB; encoded as 0 on the wire
pub const MAX_BLOCKS_6: u32 = 256;

/// Largest transfer of a 10-byte CDB
pub const MAX_BLOCKS_10: u32 = 0xFFFF;

const DPO_BIT: u8 = 0x10;
const FUA_BIT: u8 = 0x08;
const READ_LONG_CORRCT_BIT: u8 = 0x02;

/// Supported CDB lengths for READ/WRITE
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CdbSize {
    Six,
    #[default]
    Ten,
    Twelve,
    Sixteen,
}

impl CdbSize {
    /// Length of the CDB in bytes
    pub fn len(self) -> usize {
        match self {
            CdbSize::Six => 6,
            CdbSize::Ten => 10,
            CdbSize::Twelve => 12,
            CdbSize::Sixteen => 16,
        }
    }

    /// Index into the opcode tables
    fn class(self) -> usize {
        match self {
            CdbSize::Six => 0,
            CdbSize::Ten => 1,
            CdbSize::Twelve => 2,
            CdbSize::Sixteen => 3,
        }
    }
}

impl TryFrom<usize> for CdbSize {
    type Error = CdbError;

    fn try_from(len: usize) -> Result<Self, Self::Error> {
        match len {
            6 => Ok(CdbSize::Six),
            10 => Ok(CdbSize::Ten),
            12 => Ok(CdbSize::Twelve),
            16 => Ok(CdbSize::Sixteen),
            other => Err(CdbError::UnsupportedSize(other)),
        }
    }
}

impl TryFrom<u8> for CdbSize {
    type Error = CdbError;

    fn try_from(len: u8) -> Result<Self, Self::Error> {
        CdbSize::try_from(len as usize)
    }
}

impl From<CdbSize> for u8 {
    fn from(size: CdbSize) -> u8 {
        size.len() as u8
    }
}

impl fmt::Display for CdbSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.len())
    }
}

/// Data direction of a READ/WRITE command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Option bits carried in byte 1 of the 10/12/16-byte forms
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RwOptions {
    /// Force unit access: bypass the device's volatile cache
    pub fua: bool,
    /// Disable page out: hint that the data need not be retained in cache
    pub dpo: bool,
}

/// Errors raised while building a CDB
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CdbError {
    #[error("expected cdb size of 6, 10, 12, or 16 but got {0}")]
    UnsupportedSize(usize),

    #[error("for {size} byte commands, maximum number of blocks is {max} (requested {blocks})")]
    TooManyBlocks { size: CdbSize, blocks: u32, max: u32 },

    #[error("6 byte commands cannot express a zero block transfer")]
    ZeroBlocks,

    #[error("for {size} byte commands, can't address blocks beyond {max:#x} (last block {last:#x})")]
    AddressOutOfRange { size: CdbSize, last: u64, max: u64 },

    #[error("for 6 byte commands, neither dpo nor fua bits supported")]
    OptionsUnsupported,
}

/// A built command descriptor block
#[derive(Clone, PartialEq, Eq)]
pub struct Cdb {
    bytes: [u8; 16],
    len: usize,
}

impl Cdb {
    fn zeroed(len: usize) -> Self {
        Self {
            bytes: [0; 16],
            len,
        }
    }

    /// Raw CDB bytes, exactly `len()` long
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn opcode(&self) -> u8 {
        self.bytes[0]
    }

    /// Build a READ or WRITE CDB of the given length
    ///
    /// `len` must be 6, 10, 12 or 16; anything else is a build failure.
    pub fn read_write(
        len: usize,
        direction: Direction,
        start: u64,
        blocks: u32,
        options: RwOptions,
    ) -> Result<Self, CdbError> {
        Self::read_write_sized(CdbSize::try_from(len)?, direction, start, blocks, options)
    }

    /// Build a READ or WRITE CDB for an already validated size
    pub fn read_write_sized(
        size: CdbSize,
        direction: Direction,
        start: u64,
        blocks: u32,
        options: RwOptions,
    ) -> Result<Self, CdbError> {
        let mut cdb = Self::zeroed(size.len());
        cdb.bytes[0] = match direction {
            Direction::Read => opcode::READ[size.class()],
            Direction::Write => opcode::WRITE[size.class()],
        };

        match size {
            CdbSize::Six => {
                if options.fua || options.dpo {
                    return Err(CdbError::OptionsUnsupported);
                }
                if blocks == 0 {
                    return Err(CdbError::ZeroBlocks);
                }
                if blocks > MAX_BLOCKS_6 {
                    return Err(CdbError::TooManyBlocks {
                        size,
                        blocks,
                        max: MAX_BLOCKS_6,
                    });
                }
                let last = start.saturating_add(blocks as u64 - 1);
                if last > MAX_LBA_6 {
                    return Err(CdbError::AddressOutOfRange {
                        size,
                        last,
                        max: MAX_LBA_6,
                    });
                }
                let lba = (start as u32 & MAX_LBA_6 as u32).to_be_bytes();
                cdb.bytes[1..4].copy_from_slice(&lba[1..4]);
                cdb.bytes[4] = if blocks == MAX_BLOCKS_6 { 0 } else { blocks as u8 };
            }
            CdbSize::Ten => {
                if blocks > MAX_BLOCKS_10 {
                    return Err(CdbError::TooManyBlocks {
                        size,
                        blocks,
                        max: MAX_BLOCKS_10,
                    });
                }
                let lba = Self::lba32(size, start, blocks)?;
                cdb.bytes[2..6].copy_from_slice(&lba.to_be_bytes());
                cdb.bytes[7..9].copy_from_slice(&(blocks as u16).to_be_bytes());
            }
            CdbSize::Twelve => {
                let lba = Self::lba32(size, start, blocks)?;
                cdb.bytes[2..6].copy_from_slice(&lba.to_be_bytes());
                cdb.bytes[6..10].copy_from_slice(&blocks.to_be_bytes());
            }
            CdbSize::Sixteen => {
                cdb.bytes[2..10].copy_from_slice(&start.to_be_bytes());
                cdb.bytes[10..14].copy_from_slice(&blocks.to_be_bytes());
            }
        }

        if size != CdbSize::Six {
            if options.dpo {
                cdb.bytes[1] |= DPO_BIT;
            }
            if options.fua {
                cdb.bytes[1] |= FUA_BIT;
            }
        }

        Ok(cdb)
    }

    fn lba32(size: CdbSize, start: u64, blocks: u32) -> Result<u32, CdbError> {
        let last = start.saturating_add((blocks as u64).saturating_sub(1));
        if last > u32::MAX as u64 {
            return Err(CdbError::AddressOutOfRange {
                size,
                last,
                max: u32::MAX as u64,
            });
        }
        Ok(start as u32)
    }

    /// READ LONG(10): fetch a block plus its redundancy bytes
    ///
    /// `correct` asks the device to apply ECC correction before returning data.
    pub fn read_long_10(lba: u32, transfer_len: u16, correct: bool) -> Self {
        let mut cdb = Self::zeroed(10);
        cdb.bytes[0] = opcode::READ_LONG_10;
        if correct {
            cdb.bytes[1] |= READ_LONG_CORRCT_BIT;
        }
        cdb.bytes[2..6].copy_from_slice(&lba.to_be_bytes());
        cdb.bytes[7..9].copy_from_slice(&transfer_len.to_be_bytes());
        cdb
    }

    /// READ CAPACITY(10)
    pub fn read_capacity_10() -> Self {
        let mut cdb = Self::zeroed(10);
        cdb.bytes[0] = opcode::READ_CAPACITY_10;
        cdb
    }

    /// READ CAPACITY(16), i.e. SERVICE ACTION IN(16) with service action 0x10
    pub fn read_capacity_16(alloc_len: u32) -> Self {
        let mut cdb = Self::zeroed(16);
        cdb.bytes[0] = opcode::SERVICE_ACTION_IN_16;
        cdb.bytes[1] = opcode::SA_READ_CAPACITY_16;
        cdb.bytes[10..14].copy_from_slice(&alloc_len.to_be_bytes());
        cdb
    }

    /// Standard INQUIRY
    pub fn inquiry(alloc_len: u16) -> Self {
        let mut cdb = Self::zeroed(6);
        cdb.bytes[0] = opcode::INQUIRY;
        cdb.bytes[3..5].copy_from_slice(&alloc_len.to_be_bytes());
        cdb
    }

    /// Size class of a READ/WRITE CDB, `None` for other opcodes
    fn rw_size(&self) -> Option<CdbSize> {
        let op = self.opcode();
        let class = opcode::READ
            .iter()
            .position(|&o| o == op)
            .or_else(|| opcode::WRITE.iter().position(|&o| o == op))?;
        Some([CdbSize::Six, CdbSize::Ten, CdbSize::Twelve, CdbSize::Sixteen][class])
    }

    /// Direction of a READ/WRITE CDB
    pub fn direction(&self) -> Option<Direction> {
        let op = self.opcode();
        if opcode::READ.contains(&op) {
            Some(Direction::Read)
        } else if opcode::WRITE.contains(&op) {
            Some(Direction::Write)
        } else {
            None
        }
    }

    /// Starting block encoded in a READ/WRITE or READ LONG CDB
    pub fn lba(&self) -> Option<u64> {
        let b = &self.bytes;
        if self.opcode() == opcode::READ_LONG_10 {
            return Some(u32::from_be_bytes([b[2], b[3], b[4], b[5]]) as u64);
        }
        Some(match self.rw_size()? {
            CdbSize::Six => u32::from_be_bytes([0, b[1] & 0x1F, b[2], b[3]]) as u64,
            CdbSize::Ten | CdbSize::Twelve => u32::from_be_bytes([b[2], b[3], b[4], b[5]]) as u64,
            CdbSize::Sixteen => u64::from_be_bytes([b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9]]),
        })
    }

    /// Block count encoded in a READ/WRITE CDB (byte count for READ LONG)
    pub fn transfer_length(&self) -> Option<u32> {
        let b = &self.bytes;
        if self.opcode() == opcode::READ_LONG_10 {
            return Some(u16::from_be_bytes([b[7], b[8]]) as u32);
        }
        Some(match self.rw_size()? {
            CdbSize::Six if b[4] == 0 => MAX_BLOCKS_6,
            CdbSize::Six => b[4] as u32,
            CdbSize::Ten => u16::from_be_bytes([b[7], b[8]]) as u32,
            CdbSize::Twelve => u32::from_be_bytes([b[6], b[7], b[8], b[9]]),
            CdbSize::Sixteen => u32::from_be_bytes([b[10], b[11], b[12], b[13]]),
        })
    }

    /// Option bits present in byte 1 of a READ/WRITE CDB
    pub fn options(&self) -> RwOptions {
        match self.rw_size() {
            Some(CdbSize::Six) | None => RwOptions::default(),
            Some(_) => RwOptions {
                fua: self.bytes[1] & FUA_BIT != 0,
                dpo: self.bytes[1] & DPO_BIT != 0,
            },
        }
    }

    /// CORRCT bit of a READ LONG(10) CDB
    pub fn read_long_correct(&self) -> bool {
        self.opcode() == opcode::READ_LONG_10 && self.bytes[1] & READ_LONG_CORRCT_BIT != 0
    }
}

impl TryFrom<&[u8]> for Cdb {
    type Error = CdbError;

    /// Wrap raw bytes received from a caller (e.g. a simulated device)
    fn try_from(raw: &[u8]) -> Result<Self, Self::Error> {
        if raw.is_empty() || raw.len() > 16 {
            return Err(CdbError::UnsupportedSize(raw.len()));
        }
        let mut cdb = Self::zeroed(raw.len());
        cdb.bytes[..raw.len()].copy_from_slice(raw);
        Ok(cdb)
    }
}

impl fmt::Debug for Cdb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cdb[")?;
        for (i, byte) in self.as_bytes().iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "]")
    }
}
