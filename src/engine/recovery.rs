/// Recovery controller
///
/// Turns a sequence of fallible, possibly truncated READ transfers into one
/// logical "read N blocks starting at LBA X". The controller scans the
/// remaining range with the executor; a medium error that names its block
/// splits the range so the good prefix is kept, and under continue-on-error
/// the bad block is substituted before scanning resumes.
use super::executor::read_low;
use super::read_long::{recover_block, MIN_READ_LONG_LEN};
use super::{DeviceContext, ReadReport, ReadRequest, ReadStatus, Session, TransferOutcome};
use crate::error::{CeilingKind, ErrorClass, RetryBudget, Substitution};
use crate::scsi::ScsiTransport;

/// What the controller does after one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Progress was made; keep scanning
    Advance,
    /// Same sub-range again
    Retry,
    /// Terminal failure; continue-on-error may substitute the rest
    Fail(ReadStatus),
    /// Return this status as is, with the progress made so far
    Stop(ReadStatus),
}

/// Read `request.count` blocks from `request.start` into `request.buffer`
///
/// On return `blocks_read` never exceeds the requested count, and every
/// block before it holds device data or zeros. With continue-on-error
/// enabled, any terminal failure other than a parameter error or resource
/// exhaustion zero-fills the rest of the range and reports success.
pub fn read_blocks<T: ScsiTransport>(
    ctx: &mut DeviceContext<T>,
    session: &mut Session,
    request: ReadRequest<'_>,
    mut dio: Option<&mut bool>,
) -> ReadReport {
    let ReadRequest { start, count, buffer } = request;
    let bs = ctx.block_size as usize;

    if bs == 0 || buffer.len() != count as usize * bs {
        tracing::error!(
            device = %ctx.name,
            block_size = bs,
            count,
            buffer_len = buffer.len(),
            "read buffer does not match block count"
        );
        return ReadReport {
            blocks_read: 0,
            status: ReadStatus::SyntaxError,
        };
    }

    let mut budget = RetryBudget::new(ctx.policy.retries);
    let mut done: u32 = 0;

    while done < count {
        let lba = start + done as u64;
        let remaining = count - done;
        let window = &mut buffer[done as usize * bs..];

        let outcome = read_low(ctx, &mut session.stats, lba, remaining, window, dio.as_deref_mut());
        let retryable = ErrorClass::of_outcome(&outcome)
            .map(|class| class.allows_retry())
            .unwrap_or(false);
        let step = match outcome {
            TransferOutcome::Clean | TransferOutcome::Recovered { .. } => {
                session.stats.blocks_read += remaining as u64;
                done = count;
                Step::Advance
            }
            TransferOutcome::ResourceExhausted => Step::Stop(ReadStatus::ResourceExhausted),
            TransferOutcome::SyntaxError => Step::Stop(ReadStatus::SyntaxError),
            TransferOutcome::UnitAttention => {
                retry_ceiling(ctx, session, CeilingKind::UnitAttention, ReadStatus::UnitAttention)
            }
            TransferOutcome::AbortedCommand => {
                retry_ceiling(ctx, session, CeilingKind::AbortedCommand, ReadStatus::AbortedCommand)
            }
            TransferOutcome::MediumError { error_lba: Some(bad) } => {
                split_at_bad_block(ctx, session, lba, remaining, bad, &mut done, dio.as_deref_mut(), buffer)
            }
            TransferOutcome::MediumError { error_lba: None } => {
                retry_or_fail(ctx, session, &mut budget, retryable, lba, ReadStatus::MediumHard)
            }
            TransferOutcome::NotReady => {
                retry_or_fail(ctx, session, &mut budget, retryable, lba, ReadStatus::NotReady)
            }
            TransferOutcome::IllegalRequest { .. } | TransferOutcome::Other => {
                retry_or_fail(ctx, session, &mut budget, retryable, lba, ReadStatus::Other)
            }
        };

        match step {
            Step::Advance | Step::Retry => continue,
            Step::Stop(status) => {
                return ReadReport {
                    blocks_read: done,
                    status,
                }
            }
            Step::Fail(status) => return fail(ctx, session, start, count, done, buffer, status),
        }
    }

    ReadReport {
        blocks_read: count,
        status: ReadStatus::Success,
    }
}

/// Retry bounded by a session-wide ceiling
fn retry_ceiling<T: ScsiTransport>(
    ctx: &DeviceContext<T>,
    session: &mut Session,
    kind: CeilingKind,
    status: ReadStatus,
) -> Step {
    if session.ceilings.try_consume(kind) {
        session.stats.retries += 1;
        tracing::info!(
            device = %ctx.name,
            remaining = session.ceilings.remaining(kind),
            "{}, continuing (r)",
            status
        );
        Step::Retry
    } else {
        tracing::error!(device = %ctx.name, "{}, too many (r)", status);
        Step::Fail(status)
    }
}

/// Retry bounded by the per-call budget
///
/// A retried transfer does not count as unrecovered; only the attempt that
/// exhausts the budget does.
fn retry_or_fail<T: ScsiTransport>(
    ctx: &DeviceContext<T>,
    session: &mut Session,
    budget: &mut RetryBudget,
    retryable: bool,
    lba: u64,
    status: ReadStatus,
) -> Step {
    if retryable && budget.try_consume() {
        session.stats.retries += 1;
        session.stats.forgive_unrecovered();
        tracing::warn!(device = %ctx.name, lba, %status, ">>> retrying a sgio read, lba={:#x}", lba);
        Step::Retry
    } else {
        Step::Fail(status)
    }
}

/// Handle a medium error that names its block
///
/// Keeps the good prefix before `bad` with one more READ, then either stops
/// (continue-on-error off) or substitutes the bad block and advances past it.
#[allow(clippy::too_many_arguments)]
fn split_at_bad_block<T: ScsiTransport>(
    ctx: &mut DeviceContext<T>,
    session: &mut Session,
    lba: u64,
    remaining: u32,
    bad: u64,
    done: &mut u32,
    dio: Option<&mut bool>,
    buffer: &mut [u8],
) -> Step {
    let bs = ctx.block_size as usize;

    if bad < lba || bad >= lba + remaining as u64 {
        tracing::error!(
            device = %ctx.name,
            bad,
            first = lba,
            last = lba + remaining as u64 - 1,
            "unrecovered error lba {:#x} not in correct range",
            bad
        );
        return Step::Fail(ReadStatus::MediumHard);
    }

    let prefix = (bad - lba) as u32;
    if prefix > 0 {
        tracing::debug!(device = %ctx.name, blocks = prefix, "partial read prior to medium error");
        let offset = *done as usize * bs;
        let window = &mut buffer[offset..offset + prefix as usize * bs];
        match read_low(ctx, &mut session.stats, lba, prefix, window, dio) {
            TransferOutcome::Clean | TransferOutcome::Recovered { .. } => {}
            TransferOutcome::NotReady => return Step::Stop(ReadStatus::NotReady),
            TransferOutcome::UnitAttention => return Step::Stop(ReadStatus::UnitAttention),
            TransferOutcome::AbortedCommand => return Step::Stop(ReadStatus::AbortedCommand),
            TransferOutcome::ResourceExhausted => return Step::Stop(ReadStatus::ResourceExhausted),
            TransferOutcome::MediumError { .. } => return Step::Fail(ReadStatus::MediumHard),
            TransferOutcome::SyntaxError => return Step::Fail(ReadStatus::SyntaxError),
            other @ (TransferOutcome::IllegalRequest { .. } | TransferOutcome::Other) => {
                tracing::error!(device = %ctx.name, result = ?other, "unexpected result re-reading before medium error");
                return Step::Fail(ReadStatus::Other);
            }
        }
        session.stats.blocks_read += prefix as u64;
        *done += prefix;
    }

    if ctx.policy.coe == 0 {
        return Step::Stop(ReadStatus::MediumHard);
    }

    if bs < MIN_READ_LONG_LEN {
        tracing::error!(device = %ctx.name, block_size = bs, "bs too small for read_long");
        return Step::Stop(ReadStatus::Other);
    }

    let offset = *done as usize * bs;
    let block = &mut buffer[offset..offset + bs];
    let how = recover_block(ctx, session, bad, block);
    note_substitution(session, bad, 1, how);
    *done += 1;

    Step::Advance
}

/// Terminal failure: substitute the rest of the range when policy allows
fn fail<T: ScsiTransport>(
    ctx: &DeviceContext<T>,
    session: &mut Session,
    start: u64,
    count: u32,
    done: u32,
    buffer: &mut [u8],
    status: ReadStatus,
) -> ReadReport {
    let zero_fill = ctx.policy.coe > 0
        && ErrorClass::of_status(status)
            .map(|class| class.allows_zero_fill())
            .unwrap_or(false);

    if !zero_fill {
        return ReadReport {
            blocks_read: done,
            status,
        };
    }

    let bs = ctx.block_size as usize;
    let first = start + done as u64;
    let blocks = count - done;
    buffer[done as usize * bs..].fill(0);

    tracing::warn!(
        device = %ctx.name,
        lba = first,
        blocks,
        cause = %status,
        "unable to read at blk={} for {} bytes, use zeros",
        first,
        blocks as usize * bs
    );
    if blocks > 1 {
        tracing::warn!(device = %ctx.name, "try reducing transfer size to limit number of zeros near bad block(s)");
    }

    note_substitution(session, first, blocks as u64, Substitution::ZeroFilled);

    ReadReport {
        blocks_read: count,
        status: ReadStatus::Success,
    }
}

/// Count substituted blocks and add them to the bad block log as one run
fn note_substitution(session: &mut Session, lba: u64, blocks: u64, how: Substitution) {
    match how {
        Substitution::ZeroFilled => session.stats.blocks_zero_filled += blocks,
        Substitution::ReadLong => session.stats.read_longs += blocks,
    }
    if let Err(e) = session.bad_blocks.record_range(lba, blocks, how) {
        tracing::warn!(lba, error = %e, "could not write bad block log");
    }
}
