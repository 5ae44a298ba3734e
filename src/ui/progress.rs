use crate::engine::ReadStats;
use crate::scan::{ProgressSink, ProgressSnapshot};
use std::io::{self, Write};

/// Column widths of the progress table
const WIDTHS: [usize; 11] = [4, 6, 4, 8, 8, 8, 8, 8, 8, 8, 8];

fn table_line(cells: [&str; 11]) -> String {
    let line = cells
        .iter()
        .zip(WIDTHS)
        .map(|(cell, width)| format!("{:>width$}", cell, width = width))
        .collect::<Vec<_>>()
        .join(" ");
    line.trim_end().to_string()
}

/// Rate unit shown in the header
pub(crate) fn rate_unit(kilobyte: bool) -> &'static str {
    if kilobyte {
        "MiB/"
    } else {
        "MB/"
    }
}

/// The four header lines of the progress table
pub fn header(kilobyte: bool) -> String {
    let unit = rate_unit(kilobyte);
    let dashes = WIDTHS.map(|w| "-".repeat(w));
    let dashes: Vec<&str> = dashes.iter().map(String::as_str).collect();

    [
        table_line(["", "", "", "This", "All", "All", "This", "", "", "", "Single"]),
        table_line(["Pass", "No. of", "", "Pass", "Passes", "Passes", "Pass", "", "Est.", unit, unit]),
        table_line([
            "No.", "Passes", "Op", "Complete", "Complete", "Elapsed", "Consume", "Start", "Finish", "Second", "Second",
        ]),
        dashes.join(" "),
    ]
    .join("\n")
}

/// Format seconds as hh:mm:ss
///
/// Past 99 hours the day count takes over: `DDdHHMM`, and past 99 days
/// `DDDd HHh`.
pub fn format_hhmmss(secs: u64) -> String {
    let mut hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 99 {
        let days = hours / 24;
        hours -= days * 24;
        if days > 99 {
            return format!("{:03}d {:02}h", days, hours);
        }
        return format!("{:02}d{:02}{:02}", days, hours, minutes);
    }

    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// One line of the progress table
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressRow {
    pub pass: u32,
    pub passes: u32,
    pub this_pct: f64,
    pub all_pct: f64,
    pub elapsed: String,
    pub consume: String,
    pub start: String,
    /// Estimated seconds for all passes at the observed rate
    pub finish: u64,
    pub rate: f64,
    pub pass_rate: f64,
}

impl ProgressRow {
    pub fn from_snapshot(s: &ProgressSnapshot, kilobyte: bool) -> Self {
        let kilo: f64 = if kilobyte { 1024.0 } else { 1000.0 };
        let mega = kilo * kilo;
        let bs = s.block_size as f64;

        let done = s.total_blocks_done() as f64;
        let total = s.total_blocks() as f64;
        let span = s.span() as f64;

        let mut all_pct = if total > 0.0 { done / total * 100.0 } else { 100.0 };
        let mut this_pct = if span > 0.0 {
            s.pass_blocks_done() as f64 / span * 100.0
        } else {
            100.0
        };
        if s.pass_complete() {
            this_pct = 100.0;
            all_pct = s.pass as f64 * 100.0 / s.passes.max(1) as f64;
            if s.pass >= s.passes {
                all_pct = 100.0;
            }
        }

        let read_secs = s.read_time.as_secs_f64();
        let pass_secs = s.pass_read_time.as_secs_f64();
        let rate = if read_secs > 0.0 { done * bs / mega / read_secs } else { 0.0 };
        let pass_rate = if pass_secs > 0.0 {
            s.pass_blocks_done() as f64 * bs / mega / pass_secs
        } else {
            0.0
        };

        let finish = (total * bs / mega / rate.max(1.0)) as u64;

        Self {
            pass: s.pass,
            passes: s.passes,
            this_pct,
            all_pct,
            elapsed: format_hhmmss(s.elapsed.as_secs()),
            consume: format_hhmmss(s.pass_read_time.as_secs()),
            start: s.started_at.format("%H:%M:%S").to_string(),
            finish,
            rate,
            pass_rate,
        }
    }

    pub fn format(&self) -> String {
        format!(
            "{:>4} {:>6} {:>4} {:>7.3}% {:>7.3}% {:>8} {:>8} {:>8} {:>8} {:>8.2} {:>8.2}",
            self.pass,
            self.passes,
            "read",
            self.this_pct,
            self.all_pct,
            self.elapsed,
            self.consume,
            self.start,
            format!("{:08}", self.finish),
            self.rate,
            self.pass_rate
        )
    }
}

/// Progress table written to a terminal or any other writer
///
/// Rows within a pass overwrite each other with a carriage return; the
/// row closing a pass is kept.
pub struct ProgressTable<W: Write> {
    out: W,
    kilobyte: bool,
    mid_line: bool,
}

impl ProgressTable<io::Stdout> {
    pub fn stdout(kilobyte: bool) -> Self {
        Self::new(io::stdout(), kilobyte)
    }
}

impl<W: Write> ProgressTable<W> {
    pub fn new(out: W, kilobyte: bool) -> Self {
        Self {
            out,
            kilobyte,
            mid_line: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn end_line(&mut self) {
        if self.mid_line {
            writeln!(self.out).ok();
            self.mid_line = false;
        }
    }
}

impl<W: Write> ProgressSink for ProgressTable<W> {
    fn begin(&mut self, device: &str) {
        self.end_line();
        writeln!(self.out, "Device: {}", device).ok();
        writeln!(self.out, "{}", header(self.kilobyte)).ok();
        self.out.flush().ok();
    }

    fn update(&mut self, snapshot: &ProgressSnapshot) {
        let row = ProgressRow::from_snapshot(snapshot, self.kilobyte).format();
        if snapshot.pass_complete() {
            write!(self.out, "\r{}\n", row).ok();
            self.mid_line = false;
        } else {
            write!(self.out, "\r{}", row).ok();
            self.mid_line = true;
        }
        self.out.flush().ok();
    }

    fn report(&mut self, device: &str, stats: &ReadStats) {
        self.end_line();
        writeln!(self.out, "Progress report for {}:", device).ok();
        write!(self.out, "{}", super::report::format_stats(stats, true, "  ")).ok();
        self.out.flush().ok();
    }
}
