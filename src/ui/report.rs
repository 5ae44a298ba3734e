//! End-of-run reporting: the statistics block and the JSON document

use crate::device::{Capacity, InquiryData};
use crate::engine::ReadStats;
use crate::error::BadBlockReport;
use crate::scan::ScanSummary;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt::Write;
use uuid::Uuid;

/// The statistics block printed at the end of a run and on request
///
/// Every line starts with `indent`. Unrecovered and READ LONG counts are
/// always shown when continue-on-error is on, otherwise only when nonzero.
pub fn format_stats(stats: &ReadStats, coe: bool, indent: &str) -> String {
    let mut out = String::new();
    writeln!(out, "{}{} blocks read", indent, stats.blocks_read).ok();
    if stats.blocks_zero_filled > 0 {
        writeln!(out, "{}{} blocks zero-filled", indent, stats.blocks_zero_filled).ok();
    }
    if stats.recovered_errors > 0 {
        writeln!(out, "{}{} recovered errors", indent, stats.recovered_errors).ok();
    }
    if stats.retries > 0 {
        writeln!(out, "{}{} retries attempted", indent, stats.retries).ok();
    }
    if coe {
        writeln!(out, "{}{} unrecovered errors", indent, stats.unrecovered_errors).ok();
        writeln!(
            out,
            "{}{} read_longs fetched part of unrecovered read errors",
            indent, stats.read_longs
        )
        .ok();
    } else if stats.unrecovered_errors > 0 {
        writeln!(out, "{}{} unrecovered error(s)", indent, stats.unrecovered_errors).ok();
    }
    out
}

/// Outcome of one device in a run
#[derive(Debug, Clone, Serialize)]
pub struct DeviceReport {
    pub device: String,
    pub inquiry: Option<InquiryData>,
    pub capacity: Option<Capacity>,
    pub summary: Option<ScanSummary>,
    /// Failure message, absent on success
    pub error: Option<String>,
    pub exit_code: i32,
}

impl DeviceReport {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            inquiry: None,
            capacity: None,
            summary: None,
            error: None,
            exit_code: 0,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Everything a run did, for `--json`
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started: DateTime<Local>,
    pub finished: DateTime<Local>,
    pub devices: Vec<DeviceReport>,
    pub stats: ReadStats,
    pub bad_blocks: BadBlockReport,
}

impl RunReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Exit code of the last device that failed, 0 when all succeeded
    pub fn exit_code(&self) -> i32 {
        self.devices
            .iter()
            .rev()
            .find(|d| !d.succeeded())
            .map(|d| d.exit_code)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BadBlockLog;

    #[test]
    fn test_format_stats_without_coe() {
        let stats = ReadStats {
            blocks_read: 1000,
            ..Default::default()
        };
        assert_eq!(format_stats(&stats, false, ""), "1000 blocks read\n");

        let stats = ReadStats {
            blocks_read: 2,
            unrecovered_errors: 1,
            retries: 2,
            ..Default::default()
        };
        let text = format_stats(&stats, false, "  ");
        assert!(text.contains("  2 retries attempted\n"));
        assert!(text.contains("  1 unrecovered error(s)\n"));
        assert!(!text.contains("read_longs"));
    }

    #[test]
    fn test_format_stats_with_coe() {
        let stats = ReadStats {
            blocks_read: 98,
            blocks_zero_filled: 2,
            recovered_errors: 1,
            ..Default::default()
        };
        let text = format_stats(&stats, true, "");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "98 blocks read",
                "2 blocks zero-filled",
                "1 recovered errors",
                "0 unrecovered errors",
                "0 read_longs fetched part of unrecovered read errors",
            ]
        );
    }

    #[test]
    fn test_run_report_exit_code_is_last_failure() {
        let mut first = DeviceReport::new("/dev/sg1");
        first.error = Some("not ready".to_string());
        first.exit_code = 2;
        let ok = DeviceReport::new("/dev/sg2");
        let mut last = DeviceReport::new("/dev/sg3");
        last.error = Some("medium error".to_string());
        last.exit_code = 3;

        let now = Local::now();
        let mut report = RunReport {
            run_id: Uuid::new_v4(),
            started: now,
            finished: now,
            devices: vec![first, ok, last],
            stats: ReadStats::default(),
            bad_blocks: BadBlockLog::new().generate_report(),
        };
        assert_eq!(report.exit_code(), 3);

        report.devices.pop();
        assert_eq!(report.exit_code(), 2);

        report.devices.clear();
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_run_report_json() {
        let mut device = DeviceReport::new("/dev/sg1");
        device.capacity = Some(Capacity {
            blocks: 100,
            block_size: 512,
        });
        let now = Local::now();
        let report = RunReport {
            run_id: Uuid::nil(),
            started: now,
            finished: now,
            devices: vec![device],
            stats: ReadStats {
                blocks_read: 100,
                ..Default::default()
            },
            bad_blocks: BadBlockLog::new().generate_report(),
        };

        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(value["devices"][0]["device"], "/dev/sg1");
        assert_eq!(value["devices"][0]["capacity"]["blocks"], 100);
        assert_eq!(value["stats"]["blocks_read"], 100);
        assert!(value["devices"][0]["error"].is_null());
        assert_eq!(value["run_id"], "00000000-0000-0000-0000-000000000000");
    }
}
