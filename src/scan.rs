// Whole-device scan - drives the recovery engine across a block range
//
// The scan reads every block of a range in windows of `blocks_per_transfer`,
// once per pass, and reports progress through a `ProgressSink`. The data read
// is discarded; what matters is that every block was readable, recovered or
// substituted.

use crate::device::Capacity;
use crate::engine::{read_blocks, DeviceContext, ReadRequest, ReadStats, ReadStatus, Session};
use crate::error::ReadError;
use crate::scsi::ScsiTransport;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Blocks per READ unless configured otherwise
pub const DEFAULT_BLOCKS_PER_TRANSFER: u32 = 128;

/// Transfers of this many blocks or more are refused
pub const MAX_BLOCKS_PER_TRANSFER: u32 = 0x10_0000;

/// Floor applied to the driver's reserved buffer when shrinking transfers
pub const MIN_RESERVED_SIZE: usize = 8192;

/// Seconds between progress lines unless configured otherwise
pub const DEFAULT_REFRESH_SECS: u64 = 5;

/// Which blocks to read, how many at a time, and how often
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanPlan {
    /// First block to read
    pub start: u64,

    /// One past the last block to read; 0 means the device capacity
    pub end: u64,

    pub blocks_per_transfer: u32,

    pub passes: u32,
}

impl Default for ScanPlan {
    fn default() -> Self {
        Self {
            start: 0,
            end: 0,
            blocks_per_transfer: DEFAULT_BLOCKS_PER_TRANSFER,
            passes: 1,
        }
    }
}

impl ScanPlan {
    /// Check the transfer size and pass count, independent of any device
    pub fn validate(&self) -> Result<(), ReadError> {
        if self.blocks_per_transfer == 0 || self.blocks_per_transfer >= MAX_BLOCKS_PER_TRANSFER {
            return Err(ReadError::InvalidRange(format!(
                "blocks per transfer must be between 1 and {:#x}, got {}",
                MAX_BLOCKS_PER_TRANSFER - 1,
                self.blocks_per_transfer
            )));
        }
        if self.passes == 0 {
            return Err(ReadError::InvalidRange("at least one pass is required".to_string()));
        }
        if self.end != 0 && self.start > self.end {
            return Err(ReadError::InvalidRange(format!(
                "ending sector {} must be greater than starting sector {}",
                self.end, self.start
            )));
        }
        Ok(())
    }

    /// Resolve the plan against a device of `capacity` blocks
    ///
    /// Returns the half-open block range `[start, end)` to read.
    pub fn resolve(&self, capacity: u64) -> Result<(u64, u64), ReadError> {
        self.validate()?;

        if self.end > capacity {
            return Err(ReadError::InvalidRange(format!(
                "ending sector must be less than or equal to {}",
                capacity
            )));
        }
        let end = if self.end == 0 { capacity } else { self.end };
        if self.start > end {
            return Err(ReadError::InvalidRange(format!(
                "ending sector {} must be greater than starting sector {}",
                end, self.start
            )));
        }
        Ok((self.start, end))
    }
}

/// Where the scan stands, handed to a [`ProgressSink`]
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub device: String,
    pub pass: u32,
    pub passes: u32,
    /// Next block to be read in this pass
    pub position: u64,
    pub start: u64,
    pub end: u64,
    pub block_size: u32,
    /// Wall-clock time since the device scan began
    pub elapsed: Duration,
    /// Time spent inside reads, all passes
    pub read_time: Duration,
    /// Time spent inside reads, this pass
    pub pass_read_time: Duration,
    pub started_at: DateTime<Local>,
}

impl ProgressSnapshot {
    /// Blocks read so far in this pass
    pub fn pass_blocks_done(&self) -> u64 {
        self.position.saturating_sub(self.start)
    }

    /// Blocks per pass
    pub fn span(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Blocks read so far across all passes
    pub fn total_blocks_done(&self) -> u64 {
        self.span() * self.pass.saturating_sub(1) as u64 + self.pass_blocks_done()
    }

    pub fn total_blocks(&self) -> u64 {
        self.span() * self.passes as u64
    }

    pub fn pass_complete(&self) -> bool {
        self.position >= self.end
    }
}

/// Receiver of scan progress
pub trait ProgressSink {
    /// The scan of a device is about to start
    fn begin(&mut self, _device: &str) {}

    fn update(&mut self, snapshot: &ProgressSnapshot);

    /// A progress report was requested by signal
    fn report(&mut self, _device: &str, _stats: &ReadStats) {}
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn update(&mut self, _snapshot: &ProgressSnapshot) {}
}

/// What a completed device scan covered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub start: u64,
    pub end: u64,
    pub passes: u32,
    /// Blocks per transfer in use at the end, after any shrinking
    pub blocks_per_transfer: u32,
    pub blocks_scanned: u64,
}

/// Runs a [`ScanPlan`] against one device
#[derive(Debug, Clone)]
pub struct ScanRunner {
    plan: ScanPlan,
    refresh: Duration,
    direct_io: bool,
}

impl ScanRunner {
    pub fn new(plan: ScanPlan) -> Self {
        Self {
            plan,
            refresh: Duration::from_secs(DEFAULT_REFRESH_SECS),
            direct_io: false,
        }
    }

    pub fn with_refresh(mut self, refresh: Duration) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn with_direct_io(mut self, direct_io: bool) -> Self {
        self.direct_io = direct_io;
        self
    }

    pub fn plan(&self) -> &ScanPlan {
        &self.plan
    }

    /// Scan the device in `ctx`, which reports `capacity`
    ///
    /// Returns at the first window that cannot be completed. The interrupt
    /// flag is honoured between windows.
    pub fn run<T: ScsiTransport>(
        &self,
        ctx: &mut DeviceContext<T>,
        session: &mut Session,
        capacity: Capacity,
        sink: &mut dyn ProgressSink,
    ) -> Result<ScanSummary, ReadError> {
        let (start, end) = self.plan.resolve(capacity.blocks)?;
        let bs = ctx.block_size as usize;
        if bs == 0 {
            return Err(ReadError::InvalidRange(format!("{} reports a zero block size", ctx.name)));
        }

        let mut bpt = self.plan.blocks_per_transfer;
        let mut buffer = vec![0u8; bpt as usize * bs];
        let mut dio = self.direct_io;

        let scan_start = Instant::now();
        let started_at = Local::now();
        let mut last_update = scan_start;
        let mut read_time = Duration::ZERO;
        let mut blocks_scanned = 0u64;

        tracing::info!(
            device = %ctx.name,
            start,
            end,
            blocks_per_transfer = bpt,
            passes = self.plan.passes,
            "starting scan"
        );
        sink.begin(&ctx.name);

        for pass in 1..=self.plan.passes {
            let mut pass_read_time = Duration::ZERO;
            let mut lba = start;

            while lba < end {
                if crate::is_interrupted() {
                    tracing::warn!(device = %ctx.name, lba, "scan interrupted");
                    return Err(ReadError::Interrupted);
                }
                if crate::take_progress_request() {
                    sink.report(&ctx.name, &session.stats);
                }

                let count = (end - lba).min(bpt as u64) as u32;
                let before = Instant::now();
                let outcome = self.read_window(ctx, session, lba, count, &mut bpt, &mut buffer, &mut dio);
                let spent = before.elapsed();
                read_time += spent;
                pass_read_time += spent;

                let read = outcome?;
                lba += read as u64;
                blocks_scanned += read as u64;

                if last_update.elapsed() >= self.refresh {
                    last_update = Instant::now();
                    sink.update(&ProgressSnapshot {
                        device: ctx.name.clone(),
                        pass,
                        passes: self.plan.passes,
                        position: lba,
                        start,
                        end,
                        block_size: ctx.block_size,
                        elapsed: scan_start.elapsed(),
                        read_time,
                        pass_read_time,
                        started_at,
                    });
                }
            }

            sink.update(&ProgressSnapshot {
                device: ctx.name.clone(),
                pass,
                passes: self.plan.passes,
                position: end,
                start,
                end,
                block_size: ctx.block_size,
                elapsed: scan_start.elapsed(),
                read_time,
                pass_read_time,
                started_at,
            });
            tracing::debug!(
                device = %ctx.name,
                pass,
                duration = %humantime::format_duration(Duration::from_secs(pass_read_time.as_secs())),
                "pass complete"
            );
        }

        Ok(ScanSummary {
            start,
            end,
            passes: self.plan.passes,
            blocks_per_transfer: bpt,
            blocks_scanned,
        })
    }

    /// Read one window of `count` blocks at `lba`
    ///
    /// Returns how many blocks the window advanced by, which is less than
    /// `count` when the transfer size had to shrink. A shrunken size is
    /// written back to `bpt`.
    #[allow(clippy::too_many_arguments)]
    fn read_window<T: ScsiTransport>(
        &self,
        ctx: &mut DeviceContext<T>,
        session: &mut Session,
        lba: u64,
        count: u32,
        bpt: &mut u32,
        buffer: &mut [u8],
        dio: &mut bool,
    ) -> Result<u32, ReadError> {
        let bs = ctx.block_size as usize;
        let dio_hint = if self.direct_io { Some(&mut *dio) } else { None };
        let report = read_blocks(
            ctx,
            session,
            ReadRequest::new(lba, count, &mut buffer[..count as usize * bs]),
            dio_hint,
        );

        let report = if report.status == ReadStatus::ResourceExhausted {
            let Some(reserved) = ctx.transport.reserved_size() else {
                tracing::error!(device = %ctx.name, "RESERVED_SIZE ioctls failed");
                return Err(ReadError::Failed {
                    status: ReadStatus::ResourceExhausted,
                    lba,
                });
            };
            let reserved = reserved.max(MIN_RESERVED_SIZE);
            let blocks_per = reserved.div_ceil(bs) as u32;
            if blocks_per >= count {
                tracing::error!(
                    device = %ctx.name,
                    lba,
                    "sg_read failed, try reducing bpt, at or after lba={} [{:#x}]",
                    lba,
                    lba
                );
                return Err(ReadError::Failed {
                    status: ReadStatus::ResourceExhausted,
                    lba,
                });
            }

            tracing::warn!(device = %ctx.name, blocks_per, "Reducing read to {} blocks per loop", blocks_per);
            *bpt = blocks_per;
            let dio_hint = if self.direct_io { Some(&mut *dio) } else { None };
            read_blocks(
                ctx,
                session,
                ReadRequest::new(lba, blocks_per, &mut buffer[..blocks_per as usize * bs]),
                dio_hint,
            )
        } else {
            report
        };

        if report.status.is_success() {
            return Ok(report.blocks_read);
        }

        let failed_at = lba + report.blocks_read as u64;
        tracing::error!(
            device = %ctx.name,
            status = %report.status,
            "sg_read failed, at or after lba={} [{:#x}]",
            failed_at,
            failed_at
        );
        Err(ReadError::Failed {
            status: report.status,
            lba: failed_at,
        })
    }
}

#[cfg(test)]
mod scan_tests;
