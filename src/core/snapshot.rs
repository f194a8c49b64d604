//! Copy-on-write snapshot lifecycle for LVM origins.
//!
//! A [`SnapshotHandle`] moves through `Created -> Mounted -> Unmounted ->
//! Destroyed`. Teardown is best-effort and ordered: unmount, then remove the
//! mount point (only once unmounted), then destroy. Failures become
//! [`CleanupWarning`]s instead of errors, and a handle dropped without
//! teardown tears itself down.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{info, warn};

use crate::argv;
use crate::core::command::{CommandRunner, run_checked};
use crate::core::models::{LogicalVolume, SnapshotSize};
use crate::error::{CleanupStep, CleanupWarning, JobError, OperationError, PreconditionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotState {
    Created,
    Mounted,
    Unmounted,
    Destroyed,
}

pub struct SnapshotController<'a> {
    runner: &'a dyn CommandRunner,
    mount_base: PathBuf,
    issued: HashSet<String>,
}

impl<'a> SnapshotController<'a> {
    pub fn new(runner: &'a dyn CommandRunner, mount_base: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            mount_base: mount_base.into(),
            issued: HashSet::new(),
        }
    }

    /// Confirm the origin volume exists before any host state is touched.
    pub fn check_origin(&self, origin: &LogicalVolume) -> Result<(), JobError> {
        let output = self
            .runner
            .execute(&argv!["lvs", "--noheadings", "-o", "lv_name", origin.qualified_name()])?;

        if output.is_success() {
            Ok(())
        } else {
            Err(PreconditionError::OriginMissing {
                vg: origin.vg_name.clone(),
                lv: origin.lv_name.clone(),
                detail: output.stderr.trim().to_string(),
            }
            .into())
        }
    }

    /// Allocate a snapshot of `origin`. No retry: a rejected request aborts the job.
    pub fn create(
        &mut self,
        origin: &LogicalVolume,
        size: &SnapshotSize,
    ) -> Result<SnapshotHandle<'a>, OperationError> {
        let timestamp = Local::now().format("%Y%m%d%H%M%S").to_string();
        let name = self.claim_name(&origin.lv_name, &timestamp);

        info!(origin = %origin.qualified_name(), snapshot = %name, size = %size, "Creating snapshot");

        run_checked(
            self.runner,
            &argv![
                "lvcreate",
                "--snapshot",
                "--size",
                size,
                "--name",
                name,
                origin.qualified_name()
            ],
        )
        .map_err(|e| OperationError::SnapshotCreate {
            origin: origin.qualified_name(),
            source: Box::new(e),
        })?;

        let mount_point = self.mount_base.join(&name);
        Ok(SnapshotHandle {
            runner: self.runner,
            origin: origin.clone(),
            name,
            mount_point,
            state: SnapshotState::Created,
            created_mount_dir: false,
        })
    }

    /// `<lv>_snapshot_<timestamp>`, suffixed when already issued this run.
    fn claim_name(&mut self, lv_name: &str, timestamp: &str) -> String {
        let base = format!("{}_snapshot_{}", lv_name, timestamp);
        let mut name = base.clone();
        let mut n = 1;
        while self.issued.contains(&name) {
            name = format!("{}_{}", base, n);
            n += 1;
        }
        self.issued.insert(name.clone());
        name
    }
}

pub struct SnapshotHandle<'a> {
    runner: &'a dyn CommandRunner,
    origin: LogicalVolume,
    name: String,
    mount_point: PathBuf,
    state: SnapshotState,
    created_mount_dir: bool,
}

impl SnapshotHandle<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    pub fn state(&self) -> SnapshotState {
        self.state
    }

    pub fn device_path(&self) -> PathBuf {
        PathBuf::from(format!("/dev/{}/{}", self.origin.vg_name, self.name))
    }

    fn snapshot_lv(&self) -> String {
        format!("{}/{}", self.origin.vg_name, self.name)
    }

    /// Create the mount point if absent and mount the snapshot device on it.
    pub fn mount(&mut self) -> Result<(), OperationError> {
        let mount_point = self.mount_point.display().to_string();

        if !self.mount_point.exists() {
            run_checked(self.runner, &argv!["mkdir", "-p", mount_point])
                .map_err(|e| self.mount_failed(e))?;
            self.created_mount_dir = true;
        }

        info!(snapshot = %self.name, mount_point = %mount_point, "Mounting snapshot");
        run_checked(
            self.runner,
            &argv!["mount", self.device_path().display(), mount_point],
        )
        .map_err(|e| self.mount_failed(e))?;

        self.state = SnapshotState::Mounted;
        Ok(())
    }

    fn mount_failed(&self, source: OperationError) -> OperationError {
        OperationError::SnapshotMount {
            snapshot: self.name.clone(),
            mount_point: self.mount_point.clone(),
            source: Box::new(source),
        }
    }

    /// Unmount, then remove the mount point if this handle created it.
    ///
    /// The directory is left in place when the unmount fails.
    pub fn unmount(&mut self) -> Result<(), CleanupWarning> {
        if self.state == SnapshotState::Mounted {
            info!(snapshot = %self.name, mount_point = %self.mount_point.display(), "Unmounting snapshot");
            run_checked(self.runner, &argv!["umount", self.mount_point.display()]).map_err(
                |e| {
                    CleanupWarning::new(
                        CleanupStep::Unmount,
                        self.mount_point.display().to_string(),
                        e,
                    )
                },
            )?;
            self.state = SnapshotState::Unmounted;
        }

        if self.created_mount_dir {
            run_checked(self.runner, &argv!["rmdir", self.mount_point.display()]).map_err(
                |e| {
                    CleanupWarning::new(
                        CleanupStep::RemoveMountPoint,
                        self.mount_point.display().to_string(),
                        e,
                    )
                },
            )?;
            self.created_mount_dir = false;
        }

        Ok(())
    }

    /// Remove the snapshot volume. A no-op once destroyed.
    pub fn destroy(&mut self) -> Result<(), CleanupWarning> {
        if self.state == SnapshotState::Destroyed {
            return Ok(());
        }
        if self.state == SnapshotState::Mounted {
            warn!(snapshot = %self.name, "Destroying snapshot that is still mounted");
        }

        info!(snapshot = %self.name, "Removing snapshot");
        run_checked(self.runner, &argv!["lvremove", "-f", self.snapshot_lv()])
            .map_err(|e| CleanupWarning::new(CleanupStep::Destroy, self.snapshot_lv(), e))?;

        self.state = SnapshotState::Destroyed;
        Ok(())
    }

    /// Unmount and destroy, collecting every failure.
    ///
    /// Destroy is attempted even when unmount fails.
    pub fn teardown(&mut self) -> Vec<CleanupWarning> {
        let mut warnings = Vec::new();
        if let Err(w) = self.unmount() {
            warnings.push(w);
        }
        if let Err(w) = self.destroy() {
            warnings.push(w);
        }
        for w in &warnings {
            warn!(snapshot = %self.name, step = w.step.as_str(), error = %w.message, "Snapshot cleanup failed");
        }
        warnings
    }
}

impl Drop for SnapshotHandle<'_> {
    fn drop(&mut self) {
        if self.state != SnapshotState::Destroyed {
            let _ = self.teardown();
        }
    }
}
