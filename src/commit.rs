//! Output targets and the temp-file-then-rename commit protocol
//!
//! A staged output is written to a sibling temp file of the destination and
//! only renamed over it once the conversion has succeeded. Readers of the
//! destination therefore see either the old file or the complete new one.
//! The temp file sits in the destination's own directory so the rename never
//! crosses a filesystem.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use tempfile::{NamedTempFile, TempPath};

use crate::{Error, Result};

/// Name prefix of staging files
pub const TEMP_PREFIX: &str = "sconv-";

/// Mode given to a committed file: owner rwx, group and others read
pub const OUTPUT_MODE: u32 = 0o744;

/// Directory a staging file for `destination` is created in
///
/// A bare file name stages in the current directory.
pub fn staging_dir(destination: &Path) -> PathBuf {
    match destination.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Temp file that replaces a named destination on commit
#[derive(Debug)]
pub struct StagedOutput {
    file: NamedTempFile,
    destination: PathBuf,
}

impl StagedOutput {
    /// Create a uniquely named staging file next to `destination`
    pub fn create(destination: impl Into<PathBuf>) -> Result<Self> {
        let destination = destination.into();
        let dir = staging_dir(&destination);
        let file = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .rand_bytes(6)
            .tempfile_in(&dir)
            .map_err(|source| Error::TempFile { dir, source })?;

        debug!(
            "staging {} in {}",
            destination.display(),
            file.path().display()
        );
        Ok(Self { file, destination })
    }

    /// Path of the staging file
    pub fn temp_path(&self) -> &Path {
        self.file.path()
    }

    /// Path the staging file will be renamed to
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Sync and close the staging file, set its mode and rename it over the
    /// destination
    ///
    /// The data reaches the disk before the rename does. On a sync, mode or
    /// rename failure the staging file is kept on disk; mode and rename
    /// errors carry its path.
    pub fn commit(self) -> Result<PathBuf> {
        let Self {
            mut file,
            destination,
        } = self;

        if let Err(source) = sync(&mut file) {
            retain(file.into_temp_path());
            return Err(Error::Write(source));
        }
        // Drops the handle; only the path is left.
        let temp = file.into_temp_path();

        if let Err(source) = set_output_mode(&temp) {
            let path = retain(temp);
            return Err(Error::Permission { path, source });
        }

        match temp.persist(&destination) {
            Ok(()) => {
                info!("committed {}", destination.display());
                Ok(destination)
            }
            Err(err) => {
                let temp = retain(err.path);
                Err(Error::Commit {
                    temp,
                    destination,
                    source: err.error,
                })
            }
        }
    }

    /// Remove the staging file without touching the destination
    pub fn abandon(self) -> io::Result<()> {
        warn!(
            "abandoning {}, {} left unchanged",
            self.file.path().display(),
            self.destination.display()
        );
        self.file.close()
    }
}

impl Write for StagedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Where converted bytes go
pub enum OutputTarget<W: Write> {
    /// An already open sink such as standard output
    Direct(W),
    /// A staging file replacing a named destination on commit
    Staged(StagedOutput),
}

impl<W: Write> OutputTarget<W> {
    /// Finalize a successful run
    ///
    /// Flushes a direct sink, commits a staged one. Returns the committed
    /// destination, if any.
    pub fn finish(self) -> Result<Option<PathBuf>> {
        match self {
            OutputTarget::Direct(mut writer) => {
                writer.flush().map_err(Error::Write)?;
                Ok(None)
            }
            OutputTarget::Staged(staged) => staged.commit().map(Some),
        }
    }

    /// Give up after a failed run, removing any staging file
    pub fn abandon(self) {
        if let OutputTarget::Staged(staged) = self {
            if let Err(e) = staged.abandon() {
                warn!("could not remove staging file: {}", e);
            }
        }
    }
}

impl<W: Write> Write for OutputTarget<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputTarget::Direct(writer) => writer.write(buf),
            OutputTarget::Staged(staged) => staged.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputTarget::Direct(writer) => writer.flush(),
            OutputTarget::Staged(staged) => staged.flush(),
        }
    }
}

/// Flush the staging file and wait for its contents to hit the disk.
fn sync(file: &mut NamedTempFile) -> io::Result<()> {
    file.flush()?;
    file.as_file().sync_all()
}

#[cfg(unix)]
fn set_output_mode(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(OUTPUT_MODE))
}

#[cfg(not(unix))]
fn set_output_mode(path: &Path) -> io::Result<()> {
    // Only the read-only bit exists here; make sure it is clear.
    let mut permissions = std::fs::File::open(path)?.metadata()?.permissions();
    permissions.set_readonly(false);
    std::fs::set_permissions(path, permissions)
}

/// Keep a staging file on disk for diagnosis.
fn retain(temp: TempPath) -> PathBuf {
    let path = temp.to_path_buf();
    match temp.keep() {
        Ok(kept) => {
            warn!("staging file left at {}", kept.display());
            kept
        }
        Err(err) => {
            warn!("could not keep staging file {}: {}", path.display(), err.error);
            path
        }
    }
}
