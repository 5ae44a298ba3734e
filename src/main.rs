use anyhow::{Context, Result};
use chrono::Local;
use clap::{ArgAction, Parser};
use colored::Colorize;
use dskread::device::{self, Capacity};
use dskread::error::BadBlockLog;
use dskread::scsi::CdbSize;
use dskread::ui::{format_stats, DeviceReport, ProgressTable, RunReport};
use dskread::*;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "dskread")]
#[command(about = "Read every block of SCSI devices, recovering unreadable blocks where possible")]
#[command(version = "1.0.0")]
struct Cli {
    /// Devices to read (sg or block nodes, e.g. /dev/sg1)
    #[arg(required = true)]
    devices: Vec<PathBuf>,

    /// Blocks per READ command
    #[arg(short = 'n', long, env = "DSKREAD_SECTORS", value_parser = clap::value_parser!(u32).range(1..0x10_0000))]
    sectors: Option<u32>,

    /// Start at block n (default is the first block)
    #[arg(short, long, env = "DSKREAD_START")]
    start: Option<u64>,

    /// End before block n (default is the device capacity)
    #[arg(short, long, env = "DSKREAD_END", value_parser = clap::value_parser!(u64).range(1..))]
    end: Option<u64>,

    /// Number of read passes over the range
    #[arg(long, env = "DSKREAD_PASSES", value_parser = clap::value_parser!(u32).range(1..))]
    passes: Option<u32>,

    /// READ CDB length (6, 10, 12 or 16)
    #[arg(long, env = "DSKREAD_CDB_SIZE", value_parser = parse_cdb_size)]
    cdb_size: Option<CdbSize>,

    /// Continue on error: 0 stop, 1 zero-fill, 2 READ LONG, 3 READ LONG with ECC correction
    #[arg(long, env = "DSKREAD_COE")]
    coe: Option<u8>,

    /// Retries for not-ready and unclassified failures per read
    #[arg(long, env = "DSKREAD_RETRIES")]
    retries: Option<u32>,

    /// Set the FUA bit on READ commands
    #[arg(long)]
    fua: bool,

    /// Set the DPO bit on READ commands
    #[arg(long)]
    dpo: bool,

    /// Request direct I/O from the sg driver
    #[arg(long)]
    dio: bool,

    /// Seconds between progress lines
    #[arg(long, env = "DSKREAD_REFRESH", value_parser = clap::value_parser!(u64).range(1..))]
    refresh: Option<u64>,

    /// Report rates in MiB/s instead of MB/s
    #[arg(short, long)]
    kilobyte: bool,

    /// Append substituted blocks to this file
    #[arg(long, env = "DSKREAD_BAD_BLOCK_LOG")]
    bad_block_log: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long, env = "DSKREAD_CONFIG")]
    config: Option<PathBuf>,

    /// Print a JSON report on stdout at the end of the run
    #[arg(long)]
    json: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Write logs to this file instead of stderr
    #[arg(long, env = "DSKREAD_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Skip the root privilege check
    #[arg(long)]
    unsafe_mode: bool,
}

fn parse_cdb_size(s: &str) -> Result<CdbSize, String> {
    let len: u8 = s.parse().map_err(|e| format!("{}", e))?;
    CdbSize::try_from(len).map_err(|e| e.to_string())
}

fn main() {
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ReadStatus::SyntaxError.exit_code()
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let _guard = init_tracing(cli.verbose, cli.log_file.as_deref())?;
    setup_signal_handlers()?;

    // Check for root privileges
    if !cli.unsafe_mode && !is_root() {
        eprintln!("Error: This program requires root privileges.");
        eprintln!("Please run with sudo or as root user, or pass --unsafe-mode.");
        return Ok(ReadStatus::SyntaxError.exit_code());
    }

    let config = build_config(&cli)?;
    tracing::debug!(?config, "effective configuration");

    let mut bad_blocks = BadBlockLog::new();
    if let Some(path) = &config.bad_block_log {
        bad_blocks = bad_blocks.with_log_file(path);
    }
    let mut session = Session::new(config.ceilings).with_bad_block_log(bad_blocks);

    let started = Local::now();
    println!("Start Task local time and date: {}", started.format("%a %b %e %H:%M:%S %Y"));

    let mut reports = Vec::with_capacity(cli.devices.len());
    for path in &cli.devices {
        let report = read_verify_device(path, &config, &mut session);
        let interrupted = report.exit_code == ReadError::Interrupted.exit_code();
        reports.push(report);
        if interrupted {
            eprintln!("Interrupted by signal,");
            break;
        }
    }

    let finished = Local::now();
    println!("\nend Task local time and date: {}", finished.format("%a %b %e %H:%M:%S %Y"));

    eprint!("{}", format_stats(&session.stats, config.policy.coe > 0, ""));
    let bad_block_report = session.bad_blocks.generate_report();
    if !bad_block_report.entries.is_empty() {
        eprintln!("\n{}", bad_block_report.format());
    }

    for report in &reports {
        match &report.error {
            None => eprintln!("{} {}", "OK  ".green().bold(), report.device),
            Some(e) => eprintln!("{} {}: {}", "FAIL".red().bold(), report.device, e),
        }
    }

    let run_report = RunReport {
        run_id: Uuid::new_v4(),
        started,
        finished,
        devices: reports,
        stats: session.stats,
        bad_blocks: bad_block_report,
    };
    if cli.json {
        println!("{}", run_report.to_json().context("could not serialize run report")?);
    }

    Ok(run_report.exit_code())
}

/// Read one device end to end; failures end up in the report
fn read_verify_device(path: &Path, config: &ReadConfig, session: &mut Session) -> DeviceReport {
    let mut report = DeviceReport::new(path.display().to_string());
    if let Err(e) = scan_device(path, config, session, &mut report) {
        tracing::error!(
            device = %path.display(),
            error = %e,
            class = %e.class(),
            hint = e.class().description(),
            "device read failed"
        );
        report.error = Some(e.to_string());
        report.exit_code = e.exit_code();
    }
    report
}

fn scan_device(
    path: &Path,
    config: &ReadConfig,
    session: &mut Session,
    report: &mut DeviceReport,
) -> Result<(), ReadError> {
    let name = path.display().to_string();
    session.bad_blocks.begin_device(name.clone());

    // Sized for the default block size; the real one is not known yet
    let reserve = config.scan.blocks_per_transfer as usize * 512;
    let mut transport = device::open_device(path, reserve)?;

    let inquiry = device::inquiry(&mut transport)?;
    tracing::info!(
        device = %name,
        vendor = %inquiry.vendor,
        product = %inquiry.product,
        revision = %inquiry.revision,
        pdt = inquiry.pdt,
        "{}: {}  {}  {}",
        name,
        inquiry.vendor,
        inquiry.product,
        inquiry.revision
    );
    report.inquiry = Some(inquiry.clone());

    let capacity: Capacity = device::read_capacity_with_retry(&mut transport)?;
    eprintln!(
        "Start, out_num_sect={},block size={}",
        capacity.blocks, capacity.block_size
    );
    report.capacity = Some(capacity);

    let mut ctx = DeviceContext::new(transport, name, capacity.block_size)
        .with_cdb_size(config.cdb_size)
        .with_pdt(inquiry.pdt)
        .with_policy(config.policy);

    let mut sink = ProgressTable::stdout(config.kilobyte);
    let summary = config.runner().run(&mut ctx, session, capacity, &mut sink)?;
    report.summary = Some(summary);
    Ok(())
}

/// Load the configuration file (explicit, or the per-user default if
/// present) and apply command-line overrides
fn build_config(cli: &Cli) -> Result<ReadConfig> {
    let file = match &cli.config {
        Some(path) => Some(path.clone()),
        None => default_config_path().filter(|p| p.exists()),
    };

    let mut config = match file {
        Some(path) => ReadConfig::from_file(&path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => ReadConfig::default(),
    };

    if let Some(sectors) = cli.sectors {
        config.scan.blocks_per_transfer = sectors;
    }
    if let Some(start) = cli.start {
        config.scan.start = start;
    }
    if let Some(end) = cli.end {
        config.scan.end = end;
    }
    if let Some(passes) = cli.passes {
        config.scan.passes = passes;
    }
    if let Some(cdb_size) = cli.cdb_size {
        config.cdb_size = cdb_size;
    }
    if let Some(coe) = cli.coe {
        config.policy.coe = coe;
    }
    if let Some(retries) = cli.retries {
        config.policy.retries = retries;
    }
    if let Some(refresh) = cli.refresh {
        config.refresh_secs = refresh;
    }
    if let Some(path) = &cli.bad_block_log {
        config.bad_block_log = Some(path.clone());
    }
    config.policy.fua |= cli.fua;
    config.policy.dpo |= cli.dpo;
    config.direct_io |= cli.dio;
    config.kilobyte |= cli.kilobyte;

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "dskread").map(|dirs| dirs.config_dir().join("config.json"))
}

fn init_tracing(verbosity: u8, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("could not open log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

// SIGINT/SIGQUIT/SIGPIPE stop the scan, SIGUSR1 asks for a progress report
fn setup_signal_handlers() -> Result<()> {
    use signal_hook::{
        consts::{SIGINT, SIGPIPE, SIGQUIT, SIGUSR1},
        iterator::Signals,
    };

    let mut signals = Signals::new([SIGINT, SIGQUIT, SIGPIPE, SIGUSR1])?;

    std::thread::spawn(move || {
        for sig in signals.forever() {
            match sig {
                SIGUSR1 => dskread::request_progress(),
                _ => dskread::set_interrupted(),
            }
        }
    });

    Ok(())
}
