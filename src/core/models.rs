use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::core::command::{CommandRunner, run_checked};
use crate::core::restic::Restic;
use crate::error::{CleanupWarning, JobError, OperationError};

/// Keep parameters handed verbatim to `restic forget`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep_last: u32,
    pub keep_daily: u32,
    pub keep_weekly: u32,
    pub keep_monthly: u32,
    pub keep_yearly: u32,
}

/// One backup destination. Identity is the location string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub location: String,
    pub credential: PathBuf,
    pub retention: RetentionPolicy,
}

impl Repository {
    /// Apply this repository's retention policy.
    pub fn prune(
        &self,
        runner: &dyn CommandRunner,
        restic: &Restic,
        dry_run: bool,
    ) -> Result<(), OperationError> {
        run_checked(runner, &restic.forget(self, dry_run))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobCategory {
    StandardPath,
    LogicalVolumeRoot,
    LogicalVolumeNonroot,
}

impl JobCategory {
    pub const ALL: [JobCategory; 3] = [
        Self::StandardPath,
        Self::LogicalVolumeRoot,
        Self::LogicalVolumeNonroot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StandardPath => "standard_path",
            Self::LogicalVolumeRoot => "logical_volume_root",
            Self::LogicalVolumeNonroot => "logical_volume_nonroot",
        }
    }

    pub fn is_logical_volume(&self) -> bool {
        !matches!(self, Self::StandardPath)
    }
}

impl FromStr for JobCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown backup category '{}'", s))
    }
}

impl fmt::Display for JobCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `category.name`, unique across a configuration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId {
    pub category: JobCategory,
    pub name: String,
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.category, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalVolume {
    pub vg_name: String,
    pub lv_name: String,
}

impl LogicalVolume {
    /// `vg/lv`, the form lvm tools accept.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.vg_name, self.lv_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSize {
    pub amount: u64,
    pub unit: String,
}

impl fmt::Display for SnapshotSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    StandardPath {
        path: PathBuf,
        exclude_patterns: Vec<String>,
        remount_readonly: bool,
    },
    LogicalVolumeOrigin {
        origin: LogicalVolume,
        snapshot_size: SnapshotSize,
        /// Where the origin is normally mounted; excludes are written against it.
        source_root: PathBuf,
        exclude_patterns: Vec<String>,
    },
}

impl DataSource {
    pub fn exclude_patterns(&self) -> &[String] {
        match self {
            Self::StandardPath {
                exclude_patterns, ..
            }
            | Self::LogicalVolumeOrigin {
                exclude_patterns, ..
            } => exclude_patterns,
        }
    }

    /// Human-readable description for plans and logs.
    pub fn describe(&self) -> String {
        match self {
            Self::StandardPath {
                path,
                remount_readonly,
                ..
            } => {
                if *remount_readonly {
                    format!("{} (remount read-only)", path.display())
                } else {
                    path.display().to_string()
                }
            }
            Self::LogicalVolumeOrigin {
                origin,
                snapshot_size,
                source_root,
                ..
            } => format!(
                "{} snapshot {} (mounted at {})",
                origin.qualified_name(),
                snapshot_size,
                source_root.display()
            ),
        }
    }
}

/// One validated backup unit, immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    pub id: JobId,
    pub source: DataSource,
    pub destinations: Vec<Repository>,
    /// Secondary repositories that receive `restic copy` from each destination.
    pub copy_to: Vec<Repository>,
}

impl JobDescriptor {
    pub fn matches(&self, category: Option<JobCategory>, name: Option<&str>) -> bool {
        category.is_none_or(|c| c == self.id.category) && name.is_none_or(|n| n == self.id.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Backup,
    Copy { from: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub repository_location: String,
    pub action: Action,
    pub outcome: Outcome,
}

/// Per-job aggregate of destination outcomes, fatal errors and cleanup warnings.
#[derive(Debug)]
pub struct JobSummary {
    pub job: JobId,
    pub destination_count: usize,
    pub results: Vec<ExecutionResult>,
    /// Set when the job aborted before (or during) source preparation.
    pub fatal: Option<JobError>,
    pub warnings: Vec<CleanupWarning>,
}

impl JobSummary {
    pub fn new(job: JobId, destination_count: usize) -> Self {
        Self {
            job,
            destination_count,
            results: Vec::new(),
            fatal: None,
            warnings: Vec::new(),
        }
    }

    fn backups(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.results.iter().filter(|r| r.action == Action::Backup)
    }

    /// Destinations whose backup succeeded.
    pub fn successes(&self) -> usize {
        self.backups().filter(|r| r.outcome.is_success()).count()
    }

    /// Destinations whose backup failed.
    pub fn failures(&self) -> usize {
        self.backups().filter(|r| !r.outcome.is_success()).count()
    }

    pub fn failed_locations(&self) -> Vec<&str> {
        self.backups()
            .filter(|r| !r.outcome.is_success())
            .map(|r| r.repository_location.as_str())
            .collect()
    }

    pub fn copy_failures(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.action != Action::Backup && !r.outcome.is_success())
            .count()
    }

    /// True when every destination was attempted and succeeded.
    pub fn is_success(&self) -> bool {
        self.fatal.is_none() && self.results.iter().all(|r| r.outcome.is_success())
    }

    /// True when at least one step failed. Cleanup warnings do not degrade a job.
    pub fn is_degraded(&self) -> bool {
        !self.is_success()
    }
}

/// Re-anchor an exclusion written against `source_root` under `mount_point`.
///
/// Relative patterns (globs such as `*.tmp` or `.cache`) match anywhere and
/// are returned unchanged. An absolute pattern outside `source_root` cannot
/// match anything on the snapshot and yields `None`.
pub fn reanchor_exclude(pattern: &str, source_root: &Path, mount_point: &Path) -> Option<String> {
    let path = Path::new(pattern);
    if !path.is_absolute() {
        return Some(pattern.to_string());
    }

    let relative = path.strip_prefix(source_root).ok()?;
    if relative.as_os_str().is_empty() {
        Some(mount_point.display().to_string())
    } else {
        Some(mount_point.join(relative).display().to_string())
    }
}
