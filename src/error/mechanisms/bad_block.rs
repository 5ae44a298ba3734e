/// Bad block handling - record substituted blocks and log them
///
/// Every block whose contents did not come from a plain READ (zero-filled or
/// rebuilt from READ LONG) is recorded here, optionally appended to a log
/// file, and summarized at the end of the run. Only addresses are kept.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// How a bad block's contents were produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Substitution {
    /// Block replaced by zeros
    ZeroFilled,
    /// Block data recovered through READ LONG
    ReadLong,
}

impl Substitution {
    fn as_str(&self) -> &'static str {
        match self {
            Substitution::ZeroFilled => "zero-filled",
            Substitution::ReadLong => "read-long",
        }
    }
}

/// Extent of consecutive substituted blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Extent {
    end: u64,
    how: Substitution,
}

/// Per-session record of substituted blocks
///
/// Blocks are kept as extents, so a zero-filled window costs one entry
/// however long it is. Adjacent extents with the same substitution merge,
/// and a block recorded again takes its latest substitution.
#[derive(Debug, Default)]
pub struct BadBlockLog {
    /// Extents keyed by (device index, first lba)
    extents: BTreeMap<(usize, u64), Extent>,

    /// Devices seen so far; extents refer to them by index
    devices: Vec<String>,

    /// Index of the device currently being read
    current: usize,

    /// Log file path (optional)
    log_file: Option<PathBuf>,

    /// Open log file, created on the first record
    writer: Option<BufWriter<File>>,
}

impl BadBlockLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set log file path
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Switch to a new device; later records are attributed to it
    pub fn begin_device(&mut self, device: impl Into<String>) {
        let device = device.into();
        self.current = match self.devices.iter().position(|d| *d == device) {
            Some(index) => index,
            None => {
                self.devices.push(device);
                self.devices.len() - 1
            }
        };
    }

    fn device_index(&mut self) -> usize {
        if self.devices.is_empty() {
            self.devices.push(String::new());
            self.current = 0;
        }
        self.current
    }

    /// Record a single substituted block
    pub fn record(&mut self, lba: u64, how: Substitution) -> Result<()> {
        self.record_range(lba, 1, how)
    }

    /// Record `blocks` consecutive substituted blocks starting at `lba`
    ///
    /// Log file failures are returned; the in-memory record is kept regardless.
    pub fn record_range(&mut self, lba: u64, blocks: u64, how: Substitution) -> Result<()> {
        if blocks == 0 {
            return Ok(());
        }
        let dev = self.device_index();
        let end = lba.saturating_add(blocks);

        self.carve(dev, lba, end);

        let mut first = lba;
        let mut last = end;
        if let Some((&(d, s), extent)) = self.extents.range(..(dev, lba)).next_back() {
            if d == dev && extent.end == lba && extent.how == how {
                first = s;
            }
        }
        if let Some(extent) = self.extents.get(&(dev, end)) {
            if extent.how == how {
                last = extent.end;
            }
        }
        self.extents.remove(&(dev, first));
        if last != end {
            self.extents.remove(&(dev, end));
        }
        self.extents.insert((dev, first), Extent { end: last, how });

        tracing::warn!(
            device = %self.devices[dev],
            lba,
            blocks,
            substitution = how.as_str(),
            total_bad = self.len(),
            "Bad block(s) recorded"
        );

        if self.log_file.is_some() {
            self.append_to_log(lba, blocks, how)?;
        }

        Ok(())
    }

    /// Drop `[start, end)` of device `dev` from existing extents, splitting
    /// extents that straddle either edge
    fn carve(&mut self, dev: usize, start: u64, end: u64) {
        let overlapping: Vec<(u64, Extent)> = self
            .extents
            .range((dev, 0)..(dev, end))
            .filter(|(_, extent)| extent.end > start)
            .map(|(&(_, s), extent)| (s, *extent))
            .collect();

        for (s, extent) in overlapping {
            self.extents.remove(&(dev, s));
            if s < start {
                self.extents.insert((dev, s), Extent { end: start, ..extent });
            }
            if extent.end > end {
                self.extents.insert((dev, end), extent);
            }
        }
    }

    /// Append entry to log file
    fn append_to_log(&mut self, lba: u64, blocks: u64, how: Substitution) -> Result<()> {
        if self.writer.is_none() {
            let Some(log_path) = self.log_file.as_deref() else {
                return Ok(());
            };
            self.writer = Some(open_log(log_path)?);
        }
        let device = &self.devices[self.current];
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };

        writeln!(
            writer,
            "{} | Device: {} | LBA: {} ({:#x}) | Blocks: {} | {}",
            chrono::Utc::now().to_rfc3339(),
            device,
            lba,
            lba,
            blocks,
            how.as_str()
        )
        .context("Failed to write to bad block log")?;
        writer.flush().context("Failed to flush bad block log")?;

        Ok(())
    }

    /// Check if a block of the current device was substituted
    pub fn contains(&self, lba: u64) -> bool {
        if self.devices.is_empty() {
            return false;
        }
        let dev = self.current;
        self.extents
            .range((dev, 0)..=(dev, lba))
            .next_back()
            .map(|(_, extent)| extent.end > lba)
            .unwrap_or(false)
    }

    /// Number of substituted blocks across all devices
    pub fn len(&self) -> u64 {
        self.extents.iter().map(|(&(_, s), extent)| extent.end - s).sum()
    }

    /// Number of extents held
    pub fn extent_count(&self) -> usize {
        self.extents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }

    /// Generate bad block report
    pub fn generate_report(&self) -> BadBlockReport {
        let entries: Vec<BadBlockEntry> = self
            .extents
            .iter()
            .map(|(&(dev, lba), extent)| BadBlockEntry {
                device: self.devices[dev].clone(),
                lba,
                blocks: extent.end - lba,
                substitution: extent.how,
            })
            .collect();

        let total = |how: Substitution| -> u64 {
            entries
                .iter()
                .filter(|e| e.substitution == how)
                .map(|e| e.blocks)
                .sum()
        };

        BadBlockReport {
            zero_filled: total(Substitution::ZeroFilled),
            read_long: total(Substitution::ReadLong),
            entries,
            log_file: self.log_file.clone(),
        }
    }
}

fn open_log(log_path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create log directory")?;
        }
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .context("Failed to open bad block log")?;
    Ok(BufWriter::new(file))
}

/// A run of substituted blocks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadBlockEntry {
    pub device: String,
    /// First block of the run
    pub lba: u64,
    pub blocks: u64,
    pub substitution: Substitution,
}

/// Bad block report for the end-of-run summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadBlockReport {
    /// Runs sorted by device then address
    pub entries: Vec<BadBlockEntry>,

    /// Blocks zero-filled
    pub zero_filled: u64,

    /// Blocks rebuilt from READ LONG
    pub read_long: u64,

    /// Log file location
    pub log_file: Option<PathBuf>,
}

impl BadBlockReport {
    /// Format report as human-readable string
    pub fn format(&self) -> String {
        let mut output = String::new();
        output.push_str("Bad Block Report\n");
        output.push_str(&format!("{}\n", "=".repeat(60)));
        output.push_str(&format!("Total bad blocks: {}\n", self.zero_filled + self.read_long));
        output.push_str(&format!("Zero-filled: {}\n", self.zero_filled));
        output.push_str(&format!("Recovered by READ LONG: {}\n", self.read_long));

        if let Some(ref log_file) = self.log_file {
            output.push_str(&format!("Log file: {}\n", log_file.display()));
        }

        if !self.entries.is_empty() {
            output.push_str("\nBad blocks:\n");
            for (i, entry) in self.entries.iter().enumerate() {
                if i >= 100 {
                    output.push_str(&format!("  ... and {} more\n", self.entries.len() - 100));
                    break;
                }
                let span = if entry.blocks > 1 {
                    format!(" +{} blocks", entry.blocks - 1)
                } else {
                    String::new()
                };
                output.push_str(&format!(
                    "  {}: {} lba={} [{:#x}]{} {}\n",
                    i + 1,
                    entry.device,
                    entry.lba,
                    entry.lba,
                    span,
                    entry.substitution.as_str()
                ));
            }
        }

        output
    }
}
