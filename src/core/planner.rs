//! Resolution of the raw job file into validated [`JobDescriptor`]s.
//!
//! All configuration errors surface here, before anything privileged runs.

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::config::{RawConfig, RawJob, RawRepository, RawSnapshotSize};
use crate::core::models::{
    DataSource, JobCategory, JobDescriptor, JobId, LogicalVolume, Repository, RetentionPolicy,
    SnapshotSize,
};
use crate::error::ConfigError;

/// Units `lvcreate --size` understands.
const LVM_SIZE_UNITS: &[&str] = &["b", "s", "k", "m", "g", "t", "p", "e"];

/// Field names of one repository shape, for error messages.
struct RepoFields {
    location: &'static str,
    credential: &'static str,
}

const LEGACY_FIELDS: RepoFields = RepoFields {
    location: "restic_repo",
    credential: "restic_password_file",
};

const LIST_FIELDS: RepoFields = RepoFields {
    location: "repo_path",
    credential: "password_file",
};

const COPY_FIELDS: RepoFields = RepoFields {
    location: "repo",
    credential: "password_file",
};

#[derive(Debug, Clone)]
pub struct JobPlanner {
    default_size_unit: String,
}

impl Default for JobPlanner {
    fn default() -> Self {
        Self::new("G")
    }
}

impl JobPlanner {
    pub fn new(default_size_unit: impl Into<String>) -> Self {
        Self {
            default_size_unit: default_size_unit.into(),
        }
    }

    /// Resolve every job, ordered by category then name.
    pub fn resolve(&self, raw: &RawConfig) -> Result<Vec<JobDescriptor>, ConfigError> {
        let mut jobs = Vec::new();

        for (category_key, tables) in raw {
            let category: JobCategory =
                category_key
                    .parse()
                    .map_err(|_| ConfigError::UnknownCategory {
                        category: category_key.clone(),
                    })?;

            for (name, table) in tables {
                jobs.push(self.resolve_job(category, name, table)?);
            }
        }

        jobs.sort_by(|a, b| {
            (a.id.category.as_str(), &a.id.name).cmp(&(b.id.category.as_str(), &b.id.name))
        });

        debug!(count = jobs.len(), "Resolved backup jobs");
        Ok(jobs)
    }

    pub fn resolve_job(
        &self,
        category: JobCategory,
        name: &str,
        raw: &RawJob,
    ) -> Result<JobDescriptor, ConfigError> {
        let id = JobId {
            category,
            name: name.to_string(),
        };
        let label = id.to_string();

        let destinations = resolve_destinations(&label, raw)?;
        let copy_to = resolve_copy_destinations(&label, raw, &destinations)?;
        let source = if category.is_logical_volume() {
            self.resolve_volume_source(&label, raw)?
        } else {
            resolve_path_source(&label, raw)?
        };

        Ok(JobDescriptor {
            id,
            source,
            destinations,
            copy_to,
        })
    }

    fn resolve_volume_source(&self, job: &str, raw: &RawJob) -> Result<DataSource, ConfigError> {
        if raw.remount_readonly {
            warn!(job = %job, "remount_readonly has no effect on logical volume jobs");
        }

        let vg_name = non_empty(job, "vg_name", raw.vg_name.as_deref())?;
        let lv_name = non_empty(job, "lv_name", raw.lv_name.as_deref())?;
        let size = raw.snapshot_size.as_ref().ok_or(ConfigError::MissingField {
            job: job.to_string(),
            field: "snapshot_size",
        })?;

        Ok(DataSource::LogicalVolumeOrigin {
            origin: LogicalVolume {
                vg_name: vg_name.to_string(),
                lv_name: lv_name.to_string(),
            },
            snapshot_size: self.parse_snapshot_size(job, size, raw.snapshot_size_unit.as_deref())?,
            source_root: raw
                .backup_source_path
                .clone()
                .unwrap_or_else(|| PathBuf::from("/")),
            exclude_patterns: raw.exclude_paths.clone(),
        })
    }

    fn parse_snapshot_size(
        &self,
        job: &str,
        raw: &RawSnapshotSize,
        unit_field: Option<&str>,
    ) -> Result<SnapshotSize, ConfigError> {
        let invalid = |field: &'static str, reason: String| ConfigError::InvalidValue {
            job: job.to_string(),
            field,
            reason,
        };

        let (amount, suffix) = match raw {
            RawSnapshotSize::Number(n) => (*n, String::new()),
            RawSnapshotSize::Text(text) => {
                let text = text.trim();
                let digits = text.len() - text.trim_start_matches(|c: char| c.is_ascii_digit()).len();
                let amount = text[..digits]
                    .parse::<u64>()
                    .map_err(|_| invalid("snapshot_size", format!("'{}' is not a size", text)))?;
                (amount, text[digits..].trim().to_string())
            }
        };

        if amount == 0 {
            return Err(invalid("snapshot_size", "size must be positive".to_string()));
        }

        if let Some(unit) = unit_field {
            check_unit(unit).map_err(|reason| invalid("snapshot_size_unit", reason))?;
        }
        if !suffix.is_empty() {
            check_unit(&suffix).map_err(|reason| invalid("snapshot_size", reason))?;
        }

        let unit = match (suffix.is_empty(), unit_field) {
            (false, Some(unit)) if !unit.eq_ignore_ascii_case(&suffix) => {
                return Err(invalid(
                    "snapshot_size_unit",
                    format!("'{}' contradicts the unit in snapshot_size '{}'", unit, suffix),
                ));
            }
            (false, _) => suffix,
            (true, Some(unit)) => unit.to_string(),
            (true, None) => self.default_size_unit.clone(),
        };

        Ok(SnapshotSize { amount, unit })
    }
}

fn check_unit(unit: &str) -> Result<(), String> {
    if LVM_SIZE_UNITS.iter().any(|u| u.eq_ignore_ascii_case(unit)) {
        Ok(())
    } else {
        Err(format!("unknown size unit '{}'", unit))
    }
}

fn resolve_path_source(job: &str, raw: &RawJob) -> Result<DataSource, ConfigError> {
    let path = raw
        .backup_source_path
        .clone()
        .ok_or(ConfigError::MissingField {
            job: job.to_string(),
            field: "backup_source_path",
        })?;

    if raw.vg_name.is_some() || raw.lv_name.is_some() {
        warn!(job = %job, "vg_name/lv_name are ignored for standard_path jobs");
    }

    Ok(DataSource::StandardPath {
        path,
        exclude_patterns: raw.exclude_paths.clone(),
        remount_readonly: raw.remount_readonly,
    })
}

/// Normalize the legacy inline repository and the `repositories` list into
/// one ordered destination list, rejecting duplicate locations.
fn resolve_destinations(job: &str, raw: &RawJob) -> Result<Vec<Repository>, ConfigError> {
    let (entries, fields) = match (&raw.repositories, raw.legacy_repository()) {
        (Some(_), Some(_)) => {
            return Err(ConfigError::ConflictingDestinations {
                job: job.to_string(),
            });
        }
        (Some(list), None) => (list.clone(), &LIST_FIELDS),
        (None, Some(legacy)) => (vec![legacy], &LEGACY_FIELDS),
        (None, None) => {
            return Err(ConfigError::MissingField {
                job: job.to_string(),
                field: "repositories",
            });
        }
    };

    if entries.is_empty() {
        return Err(ConfigError::NoDestinations {
            job: job.to_string(),
        });
    }

    let mut seen = HashSet::new();
    entries
        .iter()
        .map(|entry| {
            let repo = resolve_repository(job, entry, fields)?;
            if !seen.insert(repo.location.clone()) {
                return Err(ConfigError::DuplicateDestination {
                    job: job.to_string(),
                    location: repo.location,
                });
            }
            Ok(repo)
        })
        .collect()
}

fn resolve_copy_destinations(
    job: &str,
    raw: &RawJob,
    primaries: &[Repository],
) -> Result<Vec<Repository>, ConfigError> {
    let mut seen: HashSet<String> = primaries.iter().map(|r| r.location.clone()).collect();

    raw.copy_to
        .iter()
        .map(|entry| {
            let repo = resolve_repository(job, &RawRepository::from(entry), &COPY_FIELDS)?;
            if !seen.insert(repo.location.clone()) {
                return Err(ConfigError::DuplicateDestination {
                    job: job.to_string(),
                    location: repo.location,
                });
            }
            Ok(repo)
        })
        .collect()
}

fn resolve_repository(
    job: &str,
    raw: &RawRepository,
    fields: &RepoFields,
) -> Result<Repository, ConfigError> {
    let missing = |field: &'static str| ConfigError::MissingField {
        job: job.to_string(),
        field,
    };

    let location = non_empty(job, fields.location, raw.repo_path.as_deref())?;
    let credential = raw
        .password_file
        .clone()
        .ok_or_else(|| missing(fields.credential))?;

    Ok(Repository {
        location: location.to_string(),
        credential,
        retention: RetentionPolicy {
            keep_last: raw.prune_keep_last.ok_or_else(|| missing("prune_keep_last"))?,
            keep_daily: raw.prune_keep_daily.ok_or_else(|| missing("prune_keep_daily"))?,
            keep_weekly: raw.prune_keep_weekly.ok_or_else(|| missing("prune_keep_weekly"))?,
            keep_monthly: raw
                .prune_keep_monthly
                .ok_or_else(|| missing("prune_keep_monthly"))?,
            keep_yearly: raw.prune_keep_yearly.ok_or_else(|| missing("prune_keep_yearly"))?,
        },
    })
}

fn non_empty<'a>(
    job: &str,
    field: &'static str,
    value: Option<&'a str>,
) -> Result<&'a str, ConfigError> {
    match value.map(str::trim) {
        None => Err(ConfigError::MissingField {
            job: job.to_string(),
            field,
        }),
        Some("") => Err(ConfigError::InvalidValue {
            job: job.to_string(),
            field,
            reason: "must not be empty".to_string(),
        }),
        Some(v) => Ok(v),
    }
}
