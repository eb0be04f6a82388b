//! Resolved run configuration

use std::path::PathBuf;

use crate::codec::InvalidPolicy;
use crate::engine::CHUNK_CAPACITY;

/// Where input bytes come from
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InputSource {
    /// Standard input
    #[default]
    Stdin,
    /// A named file
    File(PathBuf),
}

/// Where converted bytes go
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OutputDestination {
    /// Standard output, written directly
    #[default]
    Stdout,
    /// A named file, replaced atomically on success
    File(PathBuf),
}

/// Everything one conversion run needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Input source
    pub input: InputSource,
    /// Output destination
    pub output: OutputDestination,
    /// Handling of invalid input
    pub policy: InvalidPolicy,
    /// Chunk capacity in bytes
    pub chunk_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input: InputSource::Stdin,
            output: OutputDestination::Stdout,
            policy: InvalidPolicy::Strict,
            chunk_capacity: CHUNK_CAPACITY,
        }
    }
}

impl Config {
    /// Stdin to stdout, strict, default chunk size
    pub fn new() -> Self {
        Self::default()
    }

    /// Read from `path` instead of standard input
    pub fn input_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.input = InputSource::File(path.into());
        self
    }

    /// Commit output to `path` instead of writing standard output
    pub fn output_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = OutputDestination::File(path.into());
        self
    }

    /// Replace invalid input with U+FFFD instead of failing
    pub fn lossy(mut self, lossy: bool) -> Self {
        self.policy = if lossy {
            InvalidPolicy::Replace
        } else {
            InvalidPolicy::Strict
        };
        self
    }

    /// Use a different chunk capacity
    pub fn chunk_capacity(mut self, capacity: usize) -> Self {
        self.chunk_capacity = capacity;
        self
    }
}
