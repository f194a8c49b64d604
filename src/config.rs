//! Configuration loading.
//!
//! Two layers:
//! - the job file: a TOML document of `[category.job]` tables, loaded into the
//!   raw schema below and resolved once by the job planner;
//! - runtime [`Settings`]: defaults, then `SNAPVAULT_*` environment variables,
//!   then command-line overrides.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Category name -> job name -> job table. Ordered, so iteration is stable.
pub type RawConfig = BTreeMap<String, BTreeMap<String, RawJob>>;

/// A job table as written in the file. Every field is optional here; the
/// planner decides what is required for each category.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawJob {
    // Legacy single-repository shape.
    pub restic_repo: Option<String>,
    pub restic_password_file: Option<PathBuf>,
    pub prune_keep_last: Option<u32>,
    pub prune_keep_daily: Option<u32>,
    pub prune_keep_weekly: Option<u32>,
    pub prune_keep_monthly: Option<u32>,
    pub prune_keep_yearly: Option<u32>,

    // Current shape.
    pub repositories: Option<Vec<RawRepository>>,

    #[serde(default)]
    pub copy_to: Vec<RawCopyDestination>,

    // Source fields.
    pub backup_source_path: Option<PathBuf>,
    #[serde(default)]
    pub exclude_paths: Vec<String>,
    #[serde(default)]
    pub remount_readonly: bool,
    pub vg_name: Option<String>,
    pub lv_name: Option<String>,
    pub snapshot_size: Option<RawSnapshotSize>,
    pub snapshot_size_unit: Option<String>,
}

impl RawJob {
    /// The legacy inline repository, rewritten into the list-entry shape.
    pub fn legacy_repository(&self) -> Option<RawRepository> {
        if self.restic_repo.is_none() && self.restic_password_file.is_none() {
            return None;
        }
        Some(RawRepository {
            repo_path: self.restic_repo.clone(),
            password_file: self.restic_password_file.clone(),
            prune_keep_last: self.prune_keep_last,
            prune_keep_daily: self.prune_keep_daily,
            prune_keep_weekly: self.prune_keep_weekly,
            prune_keep_monthly: self.prune_keep_monthly,
            prune_keep_yearly: self.prune_keep_yearly,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRepository {
    pub repo_path: Option<String>,
    pub password_file: Option<PathBuf>,
    pub prune_keep_last: Option<u32>,
    pub prune_keep_daily: Option<u32>,
    pub prune_keep_weekly: Option<u32>,
    pub prune_keep_monthly: Option<u32>,
    pub prune_keep_yearly: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawCopyDestination {
    pub repo: Option<String>,
    pub password_file: Option<PathBuf>,
    pub prune_keep_last: Option<u32>,
    pub prune_keep_daily: Option<u32>,
    pub prune_keep_weekly: Option<u32>,
    pub prune_keep_monthly: Option<u32>,
    pub prune_keep_yearly: Option<u32>,
}

impl From<&RawCopyDestination> for RawRepository {
    fn from(copy: &RawCopyDestination) -> Self {
        Self {
            repo_path: copy.repo.clone(),
            password_file: copy.password_file.clone(),
            prune_keep_last: copy.prune_keep_last,
            prune_keep_daily: copy.prune_keep_daily,
            prune_keep_weekly: copy.prune_keep_weekly,
            prune_keep_monthly: copy.prune_keep_monthly,
            prune_keep_yearly: copy.prune_keep_yearly,
        }
    }
}

/// `snapshot_size = 2` or `snapshot_size = "2G"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawSnapshotSize {
    Number(u64),
    Text(String),
}

/// Load the job file at `path`.
pub fn load(path: &Path) -> Result<RawConfig, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    Ok(Figment::from(Toml::file(path)).extract()?)
}

/// Parse a job file from a string.
pub fn parse(toml: &str) -> Result<RawConfig, ConfigError> {
    Ok(Figment::from(Toml::string(toml)).extract()?)
}

/// Runtime settings that are not part of any job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// restic executable, looked up on `PATH` unless absolute.
    pub restic_binary: String,
    /// Parent directory for snapshot mount points.
    pub mount_base: PathBuf,
    /// Exported as `SSH_AUTH_SOCK` to child processes (sftp repositories).
    pub ssh_auth_sock: Option<PathBuf>,
    /// Unit for `snapshot_size` values that carry none.
    pub default_size_unit: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            restic_binary: "restic".to_string(),
            mount_base: PathBuf::from("/mnt/snapvault"),
            ssh_auth_sock: None,
            default_size_unit: "G".to_string(),
        }
    }
}

impl Settings {
    pub const ENV_PREFIX: &'static str = "SNAPVAULT_";

    /// Defaults, then `SNAPVAULT_*` environment, then `overrides` (fields
    /// serialized as absent are left alone).
    pub fn new<T: Serialize>(overrides: Option<&T>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Env::prefixed(Self::ENV_PREFIX));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        Ok(figment.extract()?)
    }
}
