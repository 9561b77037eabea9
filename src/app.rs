use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use parking_lot::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{DEFAULT_ABORT_THRESHOLD, DEFAULT_BLOCK_SIZE, DEFAULT_BLOCKS_AT_ONCE, ScanConfig};
use crate::error::{Result, ScanError};
use crate::pattern::FillPattern;
use crate::report::{BadBlockKind, ScanOutcome, ScanReport};
use crate::scanner::{
    BadBlockScanner, CancelToken, EventSink, FileDevice, ProgressUpdate, ScanRange, TestType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TestArg {
    #[value(name = "ro", alias = "read-only")]
    ReadOnly,
    #[value(name = "rw", alias = "read-write")]
    ReadWrite,
    #[value(name = "nd", alias = "non-destructive")]
    NonDestructive,
}

impl From<TestArg> for TestType {
    fn from(value: TestArg) -> Self {
        match value {
            TestArg::ReadOnly => TestType::ReadOnly,
            TestArg::ReadWrite => TestType::ReadWrite,
            TestArg::NonDestructive => TestType::NonDestructive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Human,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "blockscan", version, about = "Scan a block device for bad blocks")]
struct Cli {
    /// Block device or disk image to scan.
    device: PathBuf,
    #[arg(short = 't', long = "test", value_enum, default_value = "ro")]
    test: TestArg,
    #[arg(short = 'b', long, default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: usize,
    /// Blocks transferred per I/O request.
    #[arg(short = 'c', long, default_value_t = DEFAULT_BLOCKS_AT_ONCE)]
    blocks_at_once: usize,
    /// Give up after this many bad blocks (0 = never).
    #[arg(short = 'e', long, default_value_t = DEFAULT_ABORT_THRESHOLD)]
    threshold: u64,
    /// Fill pattern, hex/decimal or "random". Repeat for several passes.
    #[arg(short = 'p', long = "pattern", value_parser = parse_pattern)]
    patterns: Vec<FillPattern>,
    #[arg(long)]
    first_block: Option<u64>,
    /// Last block to test, inclusive.
    #[arg(long)]
    last_block: Option<u64>,
    /// File of already known bad blocks, one per line. They are skipped.
    #[arg(short = 'i', long)]
    input_file: Option<PathBuf>,
    /// Append newly found bad blocks to this file.
    #[arg(short = 'o', long)]
    output_file: Option<PathBuf>,
    #[arg(long)]
    seed: Option<u64>,
    /// Go through the page cache instead of direct I/O.
    #[arg(long)]
    buffered: bool,
    /// Print the final report as JSON.
    #[arg(long)]
    json: bool,
    /// Skip the confirmation before a destructive test.
    #[arg(short = 'f', long)]
    force: bool,
    #[arg(long, value_enum, default_value = "human")]
    log_format: LogFormat,
}

fn parse_pattern(value: &str) -> std::result::Result<FillPattern, String> {
    FillPattern::parse(value).ok_or_else(|| format!("invalid pattern {value:?}"))
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let result = match format {
        LogFormat::Human => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .with_target(false)
            .compact()
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .try_init(),
    };
    if let Err(e) = result {
        eprintln!("[WARN] Failed to initialize logging: {e}");
    }
}

/// Parses a bad block list: one decimal block number per line, blank lines ignored.
pub fn load_block_list(reader: impl BufRead) -> Result<Vec<u64>> {
    let mut blocks = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let value = line.trim();
        if value.is_empty() {
            continue;
        }
        let block = value.parse().map_err(|_| ScanError::InvalidBlockList {
            line: index + 1,
            value: value.to_string(),
        })?;
        blocks.push(block);
    }
    Ok(blocks)
}

struct CliSink {
    output: Option<Mutex<BufWriter<File>>>,
}

impl CliSink {
    fn new(output_path: Option<&Path>) -> Result<Self> {
        let output = match output_path {
            Some(path) => {
                let file = File::options().create(true).append(true).open(path)?;
                Some(Mutex::new(BufWriter::new(file)))
            }
            None => None,
        };
        Ok(Self { output })
    }

    fn flush(&self) -> io::Result<()> {
        match &self.output {
            Some(output) => output.lock().flush(),
            None => Ok(()),
        }
    }
}

impl EventSink for CliSink {
    fn progress(&self, update: ProgressUpdate) {
        info!(
            "Bad Blocks: PASS {}/{} - {:.2}% ({}/{}/{} errors)",
            update.pattern_index,
            update.pattern_total,
            update.percent,
            update.read_errors,
            update.write_errors,
            update.corruption_errors
        );
    }

    fn bad_block(&self, block: u64, _kind: BadBlockKind) {
        if let Some(output) = &self.output {
            let mut writer = output.lock();
            if let Err(e) = writeln!(writer, "{block}").and_then(|_| writer.flush()) {
                error!(block, error = %e, "Failed to record bad block");
            }
        }
    }

    fn error(&self, message: String) {
        error!("{message}");
    }
}

fn build_config(cli: &Cli) -> Result<ScanConfig> {
    let mut config = ScanConfig {
        block_size: cli.block_size,
        blocks_at_once: cli.blocks_at_once,
        abort_threshold: cli.threshold,
        random_seed: cli.seed,
        ..ScanConfig::default()
    };
    if !cli.patterns.is_empty() {
        config.read_write_patterns = cli.patterns.clone();
        config.non_destructive_patterns = cli.patterns.clone();
    }
    if let Some(path) = &cli.input_file {
        let file = File::open(path)?;
        config.known_bad_blocks = load_block_list(BufReader::new(file))?;
        info!(count = config.known_bad_blocks.len(), "Loaded known bad blocks");
    }
    config.validate()?;
    Ok(config)
}

fn resolve_range(cli: &Cli, total_blocks: u64) -> Result<ScanRange> {
    let first = cli.first_block.unwrap_or(0);
    let last = match cli.last_block {
        Some(block) if block >= total_blocks => {
            return Err(ScanError::InvalidConfig(format!(
                "last block {block} is beyond the device ({total_blocks} blocks)"
            )));
        }
        Some(block) => block + 1,
        None => total_blocks,
    };
    if first >= last {
        return Err(ScanError::InvalidConfig(format!(
            "first block {first} is not before the end of the range ({last})"
        )));
    }
    Ok(ScanRange::new(first, last))
}

fn confirm_destructive(device: &Path) -> io::Result<bool> {
    print!(
        "[WARN] All data on {} will be overwritten. Continue? [y/N]: ",
        device.display()
    );
    io::stdout().flush()?;
    let mut response = String::new();
    io::stdin().read_line(&mut response)?;
    let response = response.trim().to_ascii_lowercase();
    Ok(response == "y" || response == "yes")
}

pub fn print_summary(report: &ScanReport) {
    println!("========================================");
    println!("Bad Blocks Summary");
    println!("Tested blocks     : {}", report.tested_blocks);
    println!("Bad blocks        : {}", report.bad_block_count);
    println!("Read errors       : {}", report.read_errors);
    println!("Write errors      : {}", report.write_errors);
    println!("Corruption errors : {}", report.corruption_errors);
    println!("Conclusion        : {}", report.conclusion());
    println!("========================================");
}

enum CliOutcome {
    Report(ScanReport),
    Declined,
}

fn run(cli: &Cli) -> Result<CliOutcome> {
    let test_type = TestType::from(cli.test);
    let config = build_config(cli)?;

    let writable = test_type != TestType::ReadOnly;
    let mut device = FileDevice::open(&cli.device, writable, !cli.buffered)?;
    let total_blocks = device.total_blocks(config.block_size);
    if total_blocks == 0 {
        return Err(ScanError::InvalidConfig(format!(
            "{} is smaller than one block",
            cli.device.display()
        )));
    }
    let range = resolve_range(cli, total_blocks)?;

    if test_type == TestType::ReadWrite && !cli.force && !confirm_destructive(&cli.device)? {
        return Ok(CliOutcome::Declined);
    }

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        warn!(error = %e, "Unable to install interrupt handler");
    }

    let sink = CliSink::new(cli.output_file.as_deref())?;
    info!(
        device = %cli.device.display(),
        size_bytes = device.size_bytes(),
        test = %test_type,
        first_block = range.first_block,
        last_block = range.last_block - 1,
        "Starting bad block check"
    );

    let scanner = BadBlockScanner::with_config(test_type, config);
    let report = scanner.run(&mut device, range, cancel, Some(&sink))?;
    sink.flush()?;
    if writable {
        device.sync()?;
    }
    Ok(CliOutcome::Report(report))
}

pub fn run_cli() -> i32 {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    match run(&cli) {
        Ok(CliOutcome::Report(report)) => {
            if cli.json {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        error!(error = %e, "Failed to serialize report");
                        return 2;
                    }
                }
            } else {
                print_summary(&report);
            }
            if report.outcome == ScanOutcome::Completed && report.bad_block_count == 0 {
                0
            } else {
                1
            }
        }
        Ok(CliOutcome::Declined) => {
            info!("Aborted by user.");
            1
        }
        Err(e) => {
            error!("Bad blocks check failed: {e}");
            2
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, TestArg, load_block_list, resolve_range};
    use crate::error::ScanError;
    use crate::pattern::FillPattern;

    #[test]
    fn test_load_block_list() {
        let input = "12\n\n  7 \n300\n";
        assert_eq!(load_block_list(input.as_bytes()).unwrap(), vec![12, 7, 300]);
    }

    #[test]
    fn test_load_block_list_rejects_garbage() {
        let err = load_block_list("1\nbad\n".as_bytes()).unwrap_err();
        match err {
            ScanError::InvalidBlockList { line, value } => {
                assert_eq!(line, 2);
                assert_eq!(value, "bad");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from([
            "blockscan", "/dev/sdz", "-t", "nd", "-b", "4096", "-p", "0xaa", "-p", "random",
            "--last-block", "99",
        ])
        .unwrap();
        assert_eq!(cli.test, TestArg::NonDestructive);
        assert_eq!(cli.block_size, 4096);
        assert_eq!(cli.patterns, vec![FillPattern::Fixed(0xaa), FillPattern::Random]);
        assert_eq!(resolve_range(&cli, 1000).unwrap().last_block, 100);
    }

    #[test]
    fn test_range_validation() {
        let cli = Cli::try_parse_from(["blockscan", "img", "--first-block", "50"]).unwrap();
        assert!(resolve_range(&cli, 50).is_err());
        let cli = Cli::try_parse_from(["blockscan", "img", "--last-block", "50"]).unwrap();
        assert!(resolve_range(&cli, 50).is_err());
    }
}
