//! Temporary read-only remounts of live filesystems.
//!
//! [`MountGuard::remount_readonly`] returns a [`ReadOnlyRemount`] guard that
//! restores read-write state when released, or on drop if the caller unwinds.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::core::command::{CommandRunner, run_checked};
use crate::error::{CleanupStep, CleanupWarning, JobError, OperationError, PreconditionError};

/// One row of the host mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub mount_point: PathBuf,
    pub options: Vec<String>,
}

impl MountEntry {
    pub fn is_read_only(&self) -> bool {
        self.options.iter().any(|opt| opt == "ro")
    }
}

pub trait MountTable {
    /// The mount whose mount point is exactly `path`, if any.
    fn lookup(&self, path: &Path) -> io::Result<Option<MountEntry>>;
}

pub struct MountGuard<'a> {
    runner: &'a dyn CommandRunner,
    mounts: &'a dyn MountTable,
}

impl<'a> MountGuard<'a> {
    pub fn new(runner: &'a dyn CommandRunner, mounts: &'a dyn MountTable) -> Self {
        Self { runner, mounts }
    }

    /// Remount `path` read-only until the returned guard is released.
    ///
    /// Fails before touching anything if `path` is missing or not itself a
    /// mount point, so an unrelated parent filesystem is never remounted.
    pub fn remount_readonly(&self, path: &Path) -> Result<ReadOnlyRemount<'a>, JobError> {
        if !path.exists() {
            return Err(PreconditionError::PathMissing(path.to_path_buf()).into());
        }

        let entry = self
            .mounts
            .lookup(path)
            .map_err(PreconditionError::MountTable)?
            .ok_or_else(|| PreconditionError::NotAMountPoint(path.to_path_buf()))?;

        if entry.is_read_only() {
            info!(path = %path.display(), "Already mounted read-only, leaving mount options alone");
            return Ok(ReadOnlyRemount {
                runner: self.runner,
                path: path.to_path_buf(),
                restore: false,
            });
        }

        info!(path = %path.display(), "Remounting read-only");
        run_checked(self.runner, &remount_argv(path, "ro")).map_err(|e| {
            OperationError::Remount {
                path: path.to_path_buf(),
                source: Box::new(e),
            }
        })?;

        Ok(ReadOnlyRemount {
            runner: self.runner,
            path: path.to_path_buf(),
            restore: true,
        })
    }

    /// Run `body` with `path` remounted read-only.
    ///
    /// The read-write remount happens on every exit path of `body`, including
    /// a panic. A failed restore comes back as a warning alongside the body's
    /// result.
    pub fn with_readonly<T>(
        &self,
        path: &Path,
        body: impl FnOnce() -> T,
    ) -> Result<(T, Option<CleanupWarning>), JobError> {
        let guard = self.remount_readonly(path)?;
        let value = body();
        Ok((value, guard.release().err()))
    }
}

fn remount_argv(path: &Path, mode: &str) -> Vec<String> {
    crate::argv!["mount", "-o", format!("remount,{}", mode), path.display()]
}

#[must_use = "dropping the guard immediately restores read-write state"]
pub struct ReadOnlyRemount<'a> {
    runner: &'a dyn CommandRunner,
    path: PathBuf,
    restore: bool,
}

impl ReadOnlyRemount<'_> {
    /// Remount read-write now and report whether it worked.
    pub fn release(mut self) -> Result<(), CleanupWarning> {
        self.restore_read_write()
    }

    fn restore_read_write(&mut self) -> Result<(), CleanupWarning> {
        if !std::mem::take(&mut self.restore) {
            return Ok(());
        }

        info!(path = %self.path.display(), "Remounting read-write");
        run_checked(self.runner, &remount_argv(&self.path, "rw")).map_err(|e| {
            let warning = CleanupWarning::new(
                CleanupStep::RemountReadWrite,
                self.path.display().to_string(),
                e,
            );
            warn!(path = %self.path.display(), error = %warning.message, "Failed to restore read-write mount");
            warning
        })?;
        Ok(())
    }
}

impl Drop for ReadOnlyRemount<'_> {
    fn drop(&mut self) {
        let _ = self.restore_read_write();
    }
}
