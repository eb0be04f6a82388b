//! # sconv CLI - UTF-8 to Wide-Character Converter
//!
//! Converts a file (or standard input) from UTF-8 to the platform's wide
//! character encoding, writing standard output or atomically replacing an
//! output file.

#[cfg(feature = "cli")]
use std::io::{self, Write};
#[cfg(feature = "cli")]
use std::path::PathBuf;
#[cfg(feature = "cli")]
use std::process::ExitCode;

#[cfg(feature = "cli")]
use anyhow::{Context, Result};
#[cfg(feature = "cli")]
use clap::{Parser, ValueEnum};

#[cfg(feature = "cli")]
use sconv::{CHUNK_CAPACITY, Config, Encoding, MIN_CHUNK_CAPACITY, Report};

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI features disabled. Enable with --features cli");
    std::process::exit(1);
}

/// Converts an input file (or STDIN when not specified) from UTF-8 to the
/// platform wide-character encoding, writing an output file (or STDOUT when
/// not set)
#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "sconv")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Input file (stdin if not specified or "-")
    input: Option<PathBuf>,

    /// Output file, replaced atomically once conversion succeeds (stdout if not specified)
    #[arg(short = 'o', long = "output-file", value_name = "FILE")]
    output_file: Option<PathBuf>,

    /// Replace invalid UTF-8 with U+FFFD instead of failing
    #[arg(long)]
    lossy: bool,

    /// Chunk size in bytes
    #[arg(long, default_value_t = CHUNK_CAPACITY, value_parser = parse_buffer_size)]
    buffer_size: usize,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Report format (text, json)
    #[arg(long, default_value = "text")]
    format: OutputFormat,
}

#[cfg(feature = "cli")]
#[derive(Clone, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[cfg(feature = "cli")]
impl Cli {
    fn config(&self) -> Config {
        let mut config = Config::new()
            .lossy(self.lossy)
            .chunk_capacity(self.buffer_size);
        if let Some(input) = self.input.as_ref().filter(|path| path.as_os_str() != "-") {
            config = config.input_file(input);
        }
        if let Some(output) = &self.output_file {
            config = config.output_file(output);
        }
        config
    }
}

#[cfg(feature = "cli")]
fn parse_buffer_size(s: &str) -> Result<usize> {
    let size: usize = s.parse().context("buffer size must be a number of bytes")?;
    if size < MIN_CHUNK_CAPACITY {
        anyhow::bail!("buffer size must be at least {} bytes", MIN_CHUNK_CAPACITY);
    }
    Ok(size)
}

#[cfg(feature = "cli")]
fn init_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

#[cfg(feature = "cli")]
fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = cli.config();
    log::debug!(
        "converting {:?} -> {:?} as UTF-8 -> {}",
        config.input,
        config.output,
        Encoding::WCHAR_T.name()
    );

    match sconv::run(&config) {
        Ok(report) => match print_report(&report, &cli.format) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("sconv: {:#}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("sconv: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

/// Reports go to stderr; stdout may be carrying the converted data.
#[cfg(feature = "cli")]
fn print_report(report: &Report, format: &OutputFormat) -> Result<()> {
    let mut stderr = io::stderr().lock();
    match format {
        OutputFormat::Json => {
            let json =
                serde_json::to_string_pretty(report).context("Failed to serialize report")?;
            writeln!(stderr, "{}", json)?;
        }
        OutputFormat::Text => {
            writeln!(stderr, "Written: {} bytes", report.bytes_written)?;
            if report.replaced > 0 {
                writeln!(stderr, "Replaced: {} invalid sequences", report.replaced)?;
            }
        }
    }
    Ok(())
}
