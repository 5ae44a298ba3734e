/// Simulated SCSI disk
///
/// Answers READ(6/10/12/16), READ LONG(10), READ CAPACITY(10/16) and INQUIRY
/// the way a real direct-access device would, with injectable faults:
/// unreadable blocks, pending unit attentions, aborted and not-ready
/// completions, and driver buffer exhaustion above a transfer size.
use dskread::scsi::sense::FixedSense;
use dskread::scsi::{
    opcode, sense_key, Cdb, CommandResponse, DataDirection, ScsiTransport, TransportError,
};
use std::collections::BTreeSet;
use std::time::Duration;

/// Byte stored at every offset of `lba`; never zero
#[allow(dead_code)]
pub fn pattern_byte(lba: u64) -> u8 {
    (lba % 251) as u8 + 1
}

/// Expected device data for `count` blocks from `start`
#[allow(dead_code)]
pub fn expected_data(start: u64, count: u32, block_size: u32) -> Vec<u8> {
    (start..start + count as u64)
        .flat_map(|lba| std::iter::repeat(pattern_byte(lba)).take(block_size as usize))
        .collect()
}

/// One command seen by the disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub struct LoggedCommand {
    pub opcode: u8,
    pub lba: Option<u64>,
    pub length: Option<u32>,
}

#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct MockScsiDisk {
    pub block_size: u32,
    pub blocks: u64,
    pub pdt: u8,
    pub bad_blocks: BTreeSet<u64>,

    /// Bytes READ LONG returns beyond the block
    pub ecc_len: u32,
    pub read_long_supported: bool,
    pub read_capacity_16_supported: bool,

    /// Completions injected before any other processing, consumed one per command
    pub pending_unit_attentions: u32,
    pub pending_aborted: u32,
    pub pending_not_ready: u32,

    /// READs longer than this many blocks fail with ENOMEM
    pub enomem_above: Option<u32>,
    pub reserved: Option<usize>,

    pub commands: Vec<LoggedCommand>,
}

#[allow(dead_code)]
impl MockScsiDisk {
    pub fn new(blocks: u64, block_size: u32) -> Self {
        Self {
            block_size,
            blocks,
            pdt: 0,
            bad_blocks: BTreeSet::new(),
            ecc_len: 8,
            read_long_supported: true,
            read_capacity_16_supported: true,
            pending_unit_attentions: 0,
            pending_aborted: 0,
            pending_not_ready: 0,
            enomem_above: None,
            reserved: None,
            commands: Vec::new(),
        }
    }

    pub fn with_bad_blocks(mut self, bad: impl IntoIterator<Item = u64>) -> Self {
        self.bad_blocks.extend(bad);
        self
    }

    pub fn with_pdt(mut self, pdt: u8) -> Self {
        self.pdt = pdt;
        self
    }

    pub fn with_ecc_len(mut self, ecc_len: u32) -> Self {
        self.ecc_len = ecc_len;
        self
    }

    pub fn without_read_long(mut self) -> Self {
        self.read_long_supported = false;
        self
    }

    pub fn with_unit_attentions(mut self, count: u32) -> Self {
        self.pending_unit_attentions = count;
        self
    }

    pub fn with_aborted_commands(mut self, count: u32) -> Self {
        self.pending_aborted = count;
        self
    }

    pub fn with_not_ready(mut self, count: u32) -> Self {
        self.pending_not_ready = count;
        self
    }

    pub fn with_buffer_limit(mut self, max_blocks: u32, reserved: Option<usize>) -> Self {
        self.enomem_above = Some(max_blocks);
        self.reserved = reserved;
        self
    }

    /// READ commands issued so far, as (lba, blocks)
    pub fn reads(&self) -> Vec<(u64, u32)> {
        self.commands
            .iter()
            .filter(|c| opcode::READ.contains(&c.opcode))
            .filter_map(|c| Some((c.lba?, c.length?)))
            .collect()
    }

    pub fn count_opcode(&self, op: u8) -> usize {
        self.commands.iter().filter(|c| c.opcode == op).count()
    }

    fn read(&self, lba: u64, blocks: u32, data: &mut [u8]) -> CommandResponse {
        let end = lba + blocks as u64;
        if end > self.blocks {
            return illegal_request(0x21, 0);
        }
        if let Some(&bad) = self.bad_blocks.range(lba..end).next() {
            let sense = FixedSense::new(sense_key::MEDIUM_ERROR, 0x11, 0).info(bad as u32);
            return CommandResponse::check_condition(&sense.bytes());
        }

        let bs = self.block_size as usize;
        for (i, block) in data.chunks_mut(bs).take(blocks as usize).enumerate() {
            block.fill(pattern_byte(lba + i as u64));
        }
        CommandResponse::good()
    }

    fn read_long(&self, lba: u64, len: u32, data: &mut [u8]) -> CommandResponse {
        if !self.read_long_supported {
            return illegal_request(0x20, 0);
        }
        if lba >= self.blocks {
            return illegal_request(0x21, 0);
        }

        let expected = self.block_size + self.ecc_len;
        if len != expected {
            let sense = FixedSense::new(sense_key::ILLEGAL_REQUEST, 0x24, 0)
                .ili()
                .info((len as i64 - expected as i64) as i32 as u32);
            return CommandResponse::check_condition(&sense.bytes());
        }

        let bs = self.block_size as usize;
        data[..bs].fill(pattern_byte(lba));
        data[bs..].fill(0xEC);
        CommandResponse::good()
    }

    fn read_capacity_10(&self, data: &mut [u8]) -> CommandResponse {
        let last = self.blocks.saturating_sub(1).min(u32::MAX as u64) as u32;
        data[..4].copy_from_slice(&last.to_be_bytes());
        data[4..8].copy_from_slice(&self.block_size.to_be_bytes());
        CommandResponse::good()
    }

    fn read_capacity_16(&self, data: &mut [u8]) -> CommandResponse {
        if !self.read_capacity_16_supported {
            return illegal_request(0x20, 0);
        }
        data.fill(0);
        data[..8].copy_from_slice(&self.blocks.saturating_sub(1).to_be_bytes());
        data[8..12].copy_from_slice(&self.block_size.to_be_bytes());
        CommandResponse::good()
    }

    fn inquiry(&self, data: &mut [u8]) -> CommandResponse {
        let mut reply = [b' '; 36];
        reply[0] = self.pdt;
        reply[1..8].fill(0);
        reply[4] = 31;
        reply[8..12].copy_from_slice(b"SIM ");
        reply[16..26].copy_from_slice(b"Virtual HD");
        reply[32..36].copy_from_slice(b"0001");

        let n = data.len().min(reply.len());
        data[..n].copy_from_slice(&reply[..n]);
        CommandResponse::good().with_residual((data.len() - n) as u32)
    }
}

fn illegal_request(asc: u8, ascq: u8) -> CommandResponse {
    CommandResponse::check_condition(&FixedSense::new(sense_key::ILLEGAL_REQUEST, asc, ascq).bytes())
}

impl ScsiTransport for MockScsiDisk {
    fn execute(
        &mut self,
        cdb: &[u8],
        _direction: DataDirection,
        data: &mut [u8],
        _timeout: Duration,
        direct_io: bool,
    ) -> Result<CommandResponse, TransportError> {
        let cdb = Cdb::try_from(cdb).map_err(|e| {
            TransportError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))
        })?;
        let op = cdb.opcode();
        self.commands.push(LoggedCommand {
            opcode: op,
            lba: cdb.lba(),
            length: cdb.transfer_length(),
        });

        if opcode::READ.contains(&op) {
            if let (Some(limit), Some(blocks)) = (self.enomem_above, cdb.transfer_length()) {
                if blocks > limit {
                    return Err(TransportError::OutOfMemory);
                }
            }
        }

        if self.pending_unit_attentions > 0 {
            self.pending_unit_attentions -= 1;
            let sense = FixedSense::new(sense_key::UNIT_ATTENTION, 0x29, 0);
            return Ok(CommandResponse::check_condition(&sense.bytes()));
        }
        if self.pending_aborted > 0 {
            self.pending_aborted -= 1;
            let sense = FixedSense::new(sense_key::ABORTED_COMMAND, 0x47, 0);
            return Ok(CommandResponse::check_condition(&sense.bytes()));
        }
        if self.pending_not_ready > 0 {
            self.pending_not_ready -= 1;
            let sense = FixedSense::new(sense_key::NOT_READY, 0x04, 0x01);
            return Ok(CommandResponse::check_condition(&sense.bytes()));
        }

        let response = match op {
            _ if opcode::READ.contains(&op) => {
                let lba = cdb.lba().unwrap_or(0);
                let blocks = cdb.transfer_length().unwrap_or(0);
                self.read(lba, blocks, data)
            }
            opcode::READ_LONG_10 => {
                let lba = cdb.lba().unwrap_or(0);
                let len = cdb.transfer_length().unwrap_or(0);
                self.read_long(lba, len, data)
            }
            opcode::READ_CAPACITY_10 => self.read_capacity_10(data),
            opcode::SERVICE_ACTION_IN_16 if cdb.as_bytes()[1] & 0x1F == opcode::SA_READ_CAPACITY_16 => {
                self.read_capacity_16(data)
            }
            opcode::INQUIRY => self.inquiry(data),
            _ => illegal_request(0x20, 0),
        };

        Ok(response.with_direct_io_done(direct_io))
    }

    fn reserved_size(&mut self) -> Option<usize> {
        self.reserved
    }
}
