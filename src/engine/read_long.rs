/// READ LONG(10) and single-block recovery
///
/// READ LONG returns a block together with its ECC bytes, and on many disks
/// succeeds where a plain READ of the same block fails. The number of extra
/// bytes is device specific; devices that disagree with the requested length
/// answer with ILLEGAL REQUEST, ILI set and the length difference in the
/// INFORMATION field, so the engine learns the right length on first use.
use super::executor::issue;
use super::{DeviceContext, Session};
use crate::error::Substitution;
use crate::scsi::cdb::Cdb;
use crate::scsi::{device_type, DataDirection, ScsiTransport, SenseCategory, TransportError};

/// Smallest READ LONG transfer considered plausible
pub const MIN_READ_LONG_LEN: usize = 32;

/// Result of one READ LONG(10)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadLongOutcome {
    Done,
    /// Length rejected; `offset` is the requested length minus the device's
    WrongLength { offset: i64 },
    InvalidOpcode,
    IllegalRequest,
    NotReady,
    UnitAttention,
    AbortedCommand,
    MediumError,
    ResourceExhausted,
    Other,
}

/// Issue READ LONG(10) for `lba`, transferring `buffer.len()` bytes
pub fn read_long_10<T: ScsiTransport + ?Sized>(
    transport: &mut T,
    lba: u32,
    correct: bool,
    buffer: &mut [u8],
) -> ReadLongOutcome {
    let Ok(transfer_len) = u16::try_from(buffer.len()) else {
        return ReadLongOutcome::Other;
    };
    let cdb = Cdb::read_long_10(lba, transfer_len, correct);

    let response = match issue(transport, &cdb, DataDirection::FromDevice, buffer, false) {
        Ok(response) => response,
        Err(TransportError::OutOfMemory) => return ReadLongOutcome::ResourceExhausted,
        Err(e) => {
            tracing::warn!(lba, error = %e, "read_long(10) device call failed");
            return ReadLongOutcome::Other;
        }
    };

    let sense = response.sense();
    match response.category() {
        SenseCategory::Clean | SenseCategory::ConditionMet | SenseCategory::Recovered => ReadLongOutcome::Done,
        SenseCategory::IllegalRequest => match sense.information() {
            Some(info) if info.valid && sense.ili() => ReadLongOutcome::WrongLength {
                offset: info.value as u32 as i32 as i64,
            },
            _ => ReadLongOutcome::IllegalRequest,
        },
        SenseCategory::InvalidOpcode => ReadLongOutcome::InvalidOpcode,
        SenseCategory::NotReady => ReadLongOutcome::NotReady,
        SenseCategory::UnitAttention => ReadLongOutcome::UnitAttention,
        SenseCategory::AbortedCommand => ReadLongOutcome::AbortedCommand,
        SenseCategory::MediumHard => ReadLongOutcome::MediumError,
        _ => ReadLongOutcome::Other,
    }
}

/// Produce the contents of one unreadable block under continue-on-error
///
/// `block` is exactly one block long. Disks at level 2 and above get a READ
/// LONG attempt (with ECC correction above level 2); every other case, and
/// every READ LONG failure, leaves the block zero-filled. Counting and
/// bad block bookkeeping are left to the caller.
pub fn recover_block<T: ScsiTransport>(
    ctx: &mut DeviceContext<T>,
    session: &mut Session,
    lba: u64,
    block: &mut [u8],
) -> Substitution {
    let bs = block.len();

    if ctx.pdt != device_type::DISK || ctx.policy.coe < 2 {
        tracing::warn!(
            device = %ctx.name,
            lba,
            pdt = ctx.pdt,
            "unrecovered read error at blk={}, use zeros",
            lba
        );
        block.fill(0);
        return Substitution::ZeroFilled;
    }

    let lba32 = match u32::try_from(lba) {
        Ok(lba32) if lba32 < u32::MAX => lba32,
        _ => {
            tracing::warn!(device = %ctx.name, lba, "read_long(10) cannot handle blk={}, use zeros", lba);
            block.fill(0);
            return Substitution::ZeroFilled;
        }
    };

    let correct = ctx.policy.coe > 2;
    let first_len = (bs as i64 + session.read_long_increment as i64).max(0) as usize;
    let mut scratch = vec![0u8; first_len.max(bs * 2)];

    let recovered = match read_long_10(&mut ctx.transport, lba32, correct, &mut scratch[..first_len]) {
        ReadLongOutcome::Done => first_len >= bs,
        ReadLongOutcome::WrongLength { offset } => {
            let adjusted = first_len as i64 - offset;
            if adjusted < MIN_READ_LONG_LEN as i64 || adjusted > (bs * 2) as i64 {
                tracing::warn!(device = %ctx.name, lba, len = adjusted, "read_long(10) len unexpected");
                false
            } else {
                let adjusted = adjusted as usize;
                session.read_long_increment = (adjusted as i64 - bs as i64) as i32;
                tracing::debug!(device = %ctx.name, len = adjusted, "read_long(10): adjusted len");

                match read_long_10(&mut ctx.transport, lba32, correct, &mut scratch[..adjusted]) {
                    ReadLongOutcome::Done => adjusted >= bs,
                    other => {
                        tracing::warn!(device = %ctx.name, lba, result = ?other, "unexpected result on second read_long(10)");
                        false
                    }
                }
            }
        }
        ReadLongOutcome::InvalidOpcode => {
            tracing::warn!(device = %ctx.name, "read_long(10) not supported");
            false
        }
        other => {
            tracing::warn!(device = %ctx.name, lba, result = ?other, "read_long(10) problem");
            false
        }
    };

    if recovered {
        block.copy_from_slice(&scratch[..bs]);
        Substitution::ReadLong
    } else {
        block.fill(0);
        Substitution::ZeroFilled
    }
}
