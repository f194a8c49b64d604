//! Error taxonomy for the backup core.
//!
//! Configuration errors stop the whole run before anything privileged happens.
//! Precondition and operation errors stop a single job. Cleanup warnings never
//! stop anything but are always surfaced in the job summary.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file {0} not found")]
    NotFound(PathBuf),

    #[error("failed to load configuration: {0}")]
    Parse(#[from] Box<figment::Error>),

    #[error("unknown backup category '{category}'")]
    UnknownCategory { category: String },

    #[error("job [{job}] is missing required field '{field}'")]
    MissingField { job: String, field: &'static str },

    #[error("job [{job}] has invalid value for '{field}': {reason}")]
    InvalidValue {
        job: String,
        field: &'static str,
        reason: String,
    },

    #[error("duplicate repository '{location}' in job [{job}]")]
    DuplicateDestination { job: String, location: String },

    #[error("job [{job}] declares no repositories")]
    NoDestinations { job: String },

    #[error("job [{job}] mixes 'repositories' with legacy 'restic_repo'; use one form")]
    ConflictingDestinations { job: String },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Parse(Box::new(err))
    }
}

#[derive(Error, Debug)]
pub enum PreconditionError {
    #[error("path {0} does not exist")]
    PathMissing(PathBuf),

    #[error("path {0} is not a mount point")]
    NotAMountPoint(PathBuf),

    #[error("logical volume {vg}/{lv} not found: {detail}")]
    OriginMissing {
        vg: String,
        lv: String,
        detail: String,
    },

    #[error("failed to read mount table: {0}")]
    MountTable(#[source] std::io::Error),
}

#[derive(Error, Debug)]
pub enum OperationError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with status {code}: {stderr}")]
    CommandFailed {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("snapshot creation of {origin} failed: {source}")]
    SnapshotCreate {
        origin: String,
        #[source]
        source: Box<OperationError>,
    },

    #[error("mounting snapshot {snapshot} at {mount_point} failed: {source}")]
    SnapshotMount {
        snapshot: String,
        mount_point: PathBuf,
        #[source]
        source: Box<OperationError>,
    },

    #[error("remounting {path} read-only failed: {source}")]
    Remount {
        path: PathBuf,
        #[source]
        source: Box<OperationError>,
    },
}

/// A fatal error that aborts one job without touching the others.
#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error(transparent)]
    Operation(#[from] OperationError),
}

/// Teardown step that did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStep {
    Unmount,
    RemoveMountPoint,
    Destroy,
    RemountReadWrite,
}

impl CleanupStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unmount => "unmount",
            Self::RemoveMountPoint => "remove mount point",
            Self::Destroy => "destroy snapshot",
            Self::RemountReadWrite => "remount read-write",
        }
    }
}

/// Non-fatal teardown failure. Host state likely needs manual attention.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CleanupWarning {
    pub step: CleanupStep,
    pub target: String,
    pub message: String,
}

impl CleanupWarning {
    pub fn new(step: CleanupStep, target: impl Into<String>, err: impl fmt::Display) -> Self {
        Self {
            step,
            target: target.into(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} failed: {}", self.step.as_str(), self.target, self.message)
    }
}
