//! # sconv - Streaming UTF-8 to Wide-Character Converter
//!
//! Converts a UTF-8 byte stream into the platform's `wchar_t` encoding
//! (UTF-32 in native byte order on Unix, UTF-16LE on Windows), reading from a
//! file or standard input and writing to a file or standard output.
//!
//! ## Features
//!
//! - **Chunked streaming** with a fixed 4 KiB chunk, constant memory
//! - **No data loss at chunk boundaries**: characters split across reads are
//!   carried into the next chunk
//! - **Atomic output**: a named output file is staged next to the destination
//!   and renamed over it only after the whole input has been converted
//! - **Strict or lossy** handling of invalid UTF-8
//!
//! ## Quick Start
//!
//! ```rust
//! use sconv::{Converter, Encoding};
//!
//! let mut converter = Converter::new(Encoding::UTF8, Encoding::UTF32LE)?;
//! let wide = converter.convert_all("hé".as_bytes())?;
//! assert_eq!(wide, [0x68, 0, 0, 0, 0xE9, 0, 0, 0]);
//! # Ok::<(), sconv::Error>(())
//! ```
//!
//! Converting a file into another file:
//!
//! ```rust
//! use sconv::{Config, Encoding};
//!
//! let dir = tempfile::tempdir()?;
//! let input = dir.path().join("in.txt");
//! std::fs::write(&input, "hello")?;
//!
//! let config = Config::new()
//!     .input_file(&input)
//!     .output_file(dir.path().join("out.bin"));
//! let report = sconv::run(&config)?;
//!
//! let width = Encoding::WCHAR_T.unit_width().unwrap() as u64;
//! assert_eq!(report.bytes_written, 5 * width);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(missing_docs)]

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::time::Instant;

use log::{debug, warn};
use serde::Serialize;
use thiserror::Error;

pub mod codec;
pub mod commit;
pub mod config;
pub mod engine;

pub use codec::{Conversion, Converter, Encoding, InvalidPolicy, MAX_CARRY};
pub use commit::{OUTPUT_MODE, OutputTarget, StagedOutput, TEMP_PREFIX};
pub use config::{Config, InputSource, OutputDestination};
pub use engine::{CHUNK_CAPACITY, MIN_CHUNK_CAPACITY, StreamingTranscoder, Totals};

/// Result type for conversion runs
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort a conversion run
#[derive(Debug, Error)]
pub enum Error {
    /// The named input file could not be opened
    #[error("can't open '{}' as input: {}", .path.display(), .source)]
    InputOpen {
        /// Input path
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },

    /// No conversion context exists for this encoding pair
    #[error("this system can't convert from {from} to {to}")]
    UnsupportedEncoding {
        /// Source encoding name
        from: &'static str,
        /// Target encoding name
        to: &'static str,
    },

    /// Reading the input failed
    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    /// Writing the output failed or was short
    #[error("couldn't write the required bytes: {0}")]
    Write(#[source] io::Error),

    /// The input is not valid in its encoding
    #[error("invalid {encoding} input at byte {position}: {detail}")]
    InvalidInput {
        /// Source encoding name
        encoding: &'static str,
        /// Offset of the offending bytes in the input stream
        position: u64,
        /// What is wrong with them
        detail: &'static str,
    },

    /// The staging file could not be created
    #[error("can't create a temporary file in '{}': {}", .dir.display(), .source)]
    TempFile {
        /// Directory the file was to be created in
        dir: PathBuf,
        /// Underlying error
        source: io::Error,
    },

    /// The staging file's mode could not be set
    #[error("can't change permissions of '{}': {}", .path.display(), .source)]
    Permission {
        /// Staging file, left on disk
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },

    /// The staging file could not be renamed over the destination
    #[error("can't swap '{}' to '{}': {}", .temp.display(), .destination.display(), .source)]
    Commit {
        /// Staging file, left on disk
        temp: PathBuf,
        /// Destination path
        destination: PathBuf,
        /// Underlying error
        source: io::Error,
    },
}

impl Error {
    /// Process exit status for this error, following `sysexits.h`
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::InvalidInput { .. } => 65,        // EX_DATAERR
            Error::InputOpen { .. } => 66,           // EX_NOINPUT
            Error::UnsupportedEncoding { .. } => 69, // EX_UNAVAILABLE
            Error::TempFile { .. } => 73,            // EX_CANTCREAT
            Error::Read(_) | Error::Write(_) => 74,  // EX_IOERR
            Error::Commit { .. } => 75,              // EX_TEMPFAIL
            Error::Permission { .. } => 77,          // EX_NOPERM
        }
    }
}

/// Summary of a successful run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    /// Bytes read from the input
    pub bytes_read: u64,
    /// Bytes written to the output
    pub bytes_written: u64,
    /// Non-empty reads performed
    pub chunks: u64,
    /// Invalid sequences replaced with U+FFFD
    pub replaced: u64,
    /// Encoding of the output
    pub encoding: &'static str,
    /// Committed destination; `None` when writing standard output
    pub destination: Option<PathBuf>,
    /// Wall-clock duration in milliseconds
    pub elapsed_ms: u64,
}

/// Convert according to `config`, writing standard output when no output
/// file is configured
pub fn run(config: &Config) -> Result<Report> {
    run_to(config, io::stdout().lock())
}

/// Convert according to `config`, writing `stdout` when no output file is
/// configured
///
/// A named output file is only replaced if the whole input converts; on any
/// error it is left as it was.
pub fn run_to<W: Write>(config: &Config, stdout: W) -> Result<Report> {
    let started = Instant::now();

    let converter =
        Converter::new(Encoding::UTF8, Encoding::WCHAR_T)?.with_policy(config.policy);
    let input = open_input(&config.input)?;
    let mut target = match &config.output {
        OutputDestination::Stdout => OutputTarget::Direct(stdout),
        OutputDestination::File(path) => OutputTarget::Staged(StagedOutput::create(path)?),
    };

    let mut transcoder = StreamingTranscoder::new(converter, config.chunk_capacity);
    let totals = match transcoder.run(input, &mut target) {
        Ok(totals) => totals,
        Err(e) => {
            target.abandon();
            return Err(e);
        }
    };
    let destination = target.finish()?;

    if totals.replaced > 0 {
        warn!(
            "replaced {} invalid sequences with U+FFFD",
            totals.replaced
        );
    }

    Ok(Report {
        bytes_read: totals.bytes_read,
        bytes_written: totals.bytes_written,
        chunks: totals.chunks,
        replaced: totals.replaced,
        encoding: Encoding::WCHAR_T.name(),
        destination,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

fn open_input(source: &InputSource) -> Result<Box<dyn Read>> {
    match source {
        InputSource::Stdin => {
            debug!("reading from stdin");
            Ok(Box::new(io::stdin().lock()))
        }
        InputSource::File(path) => {
            let file = File::open(path).map_err(|source| Error::InputOpen {
                path: path.clone(),
                source,
            })?;
            debug!("reading from {}", path.display());
            Ok(Box::new(file))
        }
    }
}
