/// Transfer executor and failure classifier
///
/// Issues exactly one READ for a block range and folds the completion into
/// a [`TransferOutcome`]. Interrupted and busy device calls never escape
/// this module: they are reissued until the driver gives a real answer.
use super::{DeviceContext, ReadStats, TransferOutcome};
use crate::scsi::cdb::{Cdb, Direction, RwOptions};
use crate::scsi::sense::ASC_ILLEGAL_MODE_FOR_TRACK;
use crate::scsi::{
    device_type, CommandResponse, DataDirection, ScsiTransport, SenseCategory, TransportError,
    DEFAULT_TIMEOUT,
};

/// Issue one command, reissuing it while the driver reports it was
/// interrupted or busy
pub fn issue<T: ScsiTransport + ?Sized>(
    transport: &mut T,
    cdb: &Cdb,
    direction: DataDirection,
    data: &mut [u8],
    direct_io: bool,
) -> Result<CommandResponse, TransportError> {
    loop {
        match transport.execute(cdb.as_bytes(), direction, data, DEFAULT_TIMEOUT, direct_io) {
            Err(TransportError::Interrupted) => continue,
            result => return result,
        }
    }
}

/// Map a READ completion to a transfer outcome
///
/// `pdt` matters for MMC devices, which report unreadable sectors with an
/// unflagged INFORMATION field or as "illegal mode for this track".
pub fn classify(response: &CommandResponse, pdt: u8) -> TransferOutcome {
    let sense = response.sense();

    match response.category() {
        SenseCategory::Clean | SenseCategory::ConditionMet => TransferOutcome::Clean,
        SenseCategory::Recovered => TransferOutcome::Recovered {
            error_lba: sense.valid_information(),
        },
        SenseCategory::UnitAttention => TransferOutcome::UnitAttention,
        SenseCategory::AbortedCommand => TransferOutcome::AbortedCommand,
        SenseCategory::MediumHard => {
            let error_lba = match sense.information() {
                Some(info) if info.valid => Some(info.value),
                Some(info) if pdt == device_type::OPTICAL && info.value > 0 => Some(info.value),
                _ => None,
            };
            TransferOutcome::MediumError { error_lba }
        }
        SenseCategory::NotReady => TransferOutcome::NotReady,
        SenseCategory::IllegalRequest | SenseCategory::InvalidOpcode => {
            let (asc, ascq) = sense.header().map(|h| (h.asc, h.ascq)).unwrap_or((0, 0));
            if pdt == device_type::OPTICAL && asc == ASC_ILLEGAL_MODE_FOR_TRACK && ascq == 0 {
                let info = sense.information().map(|i| i.value).unwrap_or(0);
                let error_lba = if sense.ili() && info > 0 { Some(info) } else { None };
                TransferOutcome::MediumError { error_lba }
            } else {
                TransferOutcome::IllegalRequest { asc, ascq }
            }
        }
        SenseCategory::NoSense
        | SenseCategory::DataProtect
        | SenseCategory::Miscompare
        | SenseCategory::Busy
        | SenseCategory::ReservationConflict
        | SenseCategory::Timeout
        | SenseCategory::Other => TransferOutcome::Other,
    }
}

/// Read `blocks` blocks starting at `start` with a single READ command
///
/// `buffer` must hold at least `blocks * block_size` bytes. When `dio` is
/// given and set, direct I/O is requested; it is cleared if the driver
/// reports the transfer went through its own buffers instead.
pub fn read_low<T: ScsiTransport>(
    ctx: &mut DeviceContext<T>,
    stats: &mut ReadStats,
    start: u64,
    blocks: u32,
    buffer: &mut [u8],
    dio: Option<&mut bool>,
) -> TransferOutcome {
    let options = RwOptions {
        fua: ctx.policy.fua,
        dpo: ctx.policy.dpo,
    };
    let cdb = match Cdb::read_write_sized(ctx.cdb_size, Direction::Read, start, blocks, options) {
        Ok(cdb) => cdb,
        Err(e) => {
            tracing::error!(device = %ctx.name, start, blocks, error = %e, "bad read cdb build");
            return TransferOutcome::SyntaxError;
        }
    };

    let len = blocks as usize * ctx.block_size as usize;
    let available = buffer.len();
    let Some(data) = buffer.get_mut(..len) else {
        tracing::error!(
            device = %ctx.name,
            needed = len,
            available,
            "read buffer too small for transfer"
        );
        return TransferOutcome::SyntaxError;
    };

    tracing::trace!(device = %ctx.name, cdb = ?cdb, "read cdb");

    let direct_io = dio.as_deref().copied().unwrap_or(false);
    let response = match issue(&mut ctx.transport, &cdb, DataDirection::FromDevice, data, direct_io) {
        Ok(response) => response,
        Err(TransportError::OutOfMemory) => return TransferOutcome::ResourceExhausted,
        Err(e) => {
            tracing::error!(device = %ctx.name, start, error = %e, "reading (SG_IO) on device failed");
            stats.unrecovered_errors += 1;
            return TransferOutcome::Other;
        }
    };

    tracing::trace!(
        device = %ctx.name,
        duration = %humantime::format_duration(response.duration),
        "read completed"
    );

    let outcome = classify(&response, ctx.pdt);
    match outcome {
        TransferOutcome::Clean => {}
        TransferOutcome::Recovered { error_lba } => {
            stats.recovered_errors += 1;
            match error_lba {
                Some(lba) => tracing::warn!(
                    device = %ctx.name,
                    lba,
                    "lba of last recovered error in this READ = {:#x}",
                    lba
                ),
                None => tracing::warn!(
                    device = %ctx.name,
                    start,
                    blocks,
                    "recovered error without information field"
                ),
            }
        }
        TransferOutcome::UnitAttention | TransferOutcome::AbortedCommand => {
            tracing::warn!(device = %ctx.name, start, category = %response.category(), "reading");
            return outcome;
        }
        TransferOutcome::MediumError { error_lba } => {
            stats.unrecovered_errors += 1;
            match error_lba {
                Some(lba) => tracing::debug!(device = %ctx.name, start, lba, "medium error"),
                None => tracing::warn!(
                    device = %ctx.name,
                    start,
                    "medium, hardware or blank check error but no lba of failure in sense"
                ),
            }
            return outcome;
        }
        TransferOutcome::NotReady | TransferOutcome::IllegalRequest { .. } | TransferOutcome::Other => {
            stats.unrecovered_errors += 1;
            tracing::warn!(device = %ctx.name, start, category = %response.category(), "reading");
            return outcome;
        }
        TransferOutcome::ResourceExhausted | TransferOutcome::SyntaxError => return outcome,
    }

    if let Some(dio) = dio {
        if *dio && !response.direct_io_done {
            tracing::debug!(device = %ctx.name, "direct I/O requested but not done");
            *dio = false;
        }
    }

    outcome
}
