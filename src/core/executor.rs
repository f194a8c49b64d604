//! Runs one job: prepare the source once, fan out to every destination, tear down.

use std::path::Path;

use tracing::{error, info, warn};

use crate::core::command::{CommandRunner, run_checked};
use crate::core::models::{
    Action, DataSource, ExecutionResult, JobDescriptor, JobSummary, LogicalVolume, Outcome,
    Repository, SnapshotSize, reanchor_exclude,
};
use crate::core::mount_guard::{MountGuard, MountTable};
use crate::core::restic::Restic;
use crate::core::snapshot::SnapshotController;
use crate::error::{JobError, PreconditionError};

pub struct BackupExecutor<'a> {
    runner: &'a dyn CommandRunner,
    mounts: &'a dyn MountTable,
    restic: Restic,
    snapshots: SnapshotController<'a>,
}

impl<'a> BackupExecutor<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        mounts: &'a dyn MountTable,
        restic: Restic,
        mount_base: impl Into<std::path::PathBuf>,
    ) -> Self {
        Self {
            runner,
            mounts,
            restic,
            snapshots: SnapshotController::new(runner, mount_base),
        }
    }

    /// Back up `job` to all of its destinations. Never fails: fatal errors,
    /// per-destination failures and cleanup warnings all land in the summary.
    pub fn run(&mut self, job: &JobDescriptor) -> JobSummary {
        let mut summary = JobSummary::new(job.id.clone(), job.destinations.len());

        info!(job = %job.id, source = %job.source.describe(), destinations = job.destinations.len(), "Starting backup job");

        let prepared = match &job.source {
            DataSource::StandardPath {
                path,
                exclude_patterns,
                remount_readonly,
            } => self.run_path(job, path, exclude_patterns, *remount_readonly, &mut summary),
            DataSource::LogicalVolumeOrigin {
                origin,
                snapshot_size,
                source_root,
                exclude_patterns,
            } => self.run_volume(
                job,
                origin,
                snapshot_size,
                source_root,
                exclude_patterns,
                &mut summary,
            ),
        };

        if let Err(e) = prepared {
            error!(job = %job.id, error = %e, "Backup job aborted");
            summary.fatal = Some(e);
        } else if summary.is_success() {
            info!(job = %job.id, successes = summary.successes(), "Backup job complete");
        } else {
            warn!(
                job = %job.id,
                successes = summary.successes(),
                failures = summary.failures(),
                copy_failures = summary.copy_failures(),
                "Backup job degraded"
            );
        }

        summary
    }

    fn run_path(
        &self,
        job: &JobDescriptor,
        path: &Path,
        excludes: &[String],
        remount_readonly: bool,
        summary: &mut JobSummary,
    ) -> Result<(), JobError> {
        if !path.exists() {
            return Err(PreconditionError::PathMissing(path.to_path_buf()).into());
        }

        if !remount_readonly {
            self.fan_out(job, path, excludes, summary);
            return Ok(());
        }

        let guard = MountGuard::new(self.runner, self.mounts);
        let ((), warning) = guard.with_readonly(path, || self.fan_out(job, path, excludes, summary))?;
        summary.warnings.extend(warning);
        Ok(())
    }

    fn run_volume(
        &mut self,
        job: &JobDescriptor,
        origin: &LogicalVolume,
        size: &SnapshotSize,
        source_root: &Path,
        excludes: &[String],
        summary: &mut JobSummary,
    ) -> Result<(), JobError> {
        self.snapshots.check_origin(origin)?;
        let mut snapshot = self.snapshots.create(origin, size)?;

        let mounted = snapshot.mount();
        if mounted.is_ok() {
            let mount_point = snapshot.mount_point();
            let excludes: Vec<String> = excludes
                .iter()
                .filter_map(|pattern| {
                    let reanchored = reanchor_exclude(pattern, source_root, mount_point);
                    if reanchored.is_none() {
                        warn!(
                            job = %job.id,
                            exclude = %pattern,
                            source_root = %source_root.display(),
                            "Exclude lies outside the volume, dropping it"
                        );
                    }
                    reanchored
                })
                .collect();
            self.fan_out(job, mount_point, &excludes, summary);
        }

        summary.warnings.extend(snapshot.teardown());
        mounted.map_err(JobError::from)
    }

    /// One engine invocation per destination, in order. Failures are recorded
    /// and the loop moves on.
    fn fan_out(
        &self,
        job: &JobDescriptor,
        source: &Path,
        excludes: &[String],
        summary: &mut JobSummary,
    ) {
        for repo in &job.destinations {
            info!(job = %job.id, repo = %repo.location, "Backing up");

            let outcome = match run_checked(self.runner, &self.restic.backup(repo, source, excludes)) {
                Ok(_) => Outcome::Success,
                Err(e) => {
                    error!(job = %job.id, repo = %repo.location, error = %e, "Backup failed");
                    Outcome::Failure(e.to_string())
                }
            };
            let succeeded = outcome.is_success();

            summary.results.push(ExecutionResult {
                repository_location: repo.location.clone(),
                action: Action::Backup,
                outcome,
            });

            if succeeded {
                self.copy_out(job, repo, summary);
            }
        }
    }

    fn copy_out(&self, job: &JobDescriptor, from: &Repository, summary: &mut JobSummary) {
        for target in &job.copy_to {
            info!(job = %job.id, from = %from.location, repo = %target.location, "Copying snapshots");

            let outcome = match run_checked(self.runner, &self.restic.copy(from, target)) {
                Ok(_) => Outcome::Success,
                Err(e) => {
                    error!(job = %job.id, repo = %target.location, error = %e, "Copy failed");
                    Outcome::Failure(e.to_string())
                }
            };

            summary.results.push(ExecutionResult {
                repository_location: target.location.clone(),
                action: Action::Copy {
                    from: from.location.clone(),
                },
                outcome,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::command::CommandOutput;
    use crate::core::models::{JobCategory, JobId, RetentionPolicy};
    use crate::core::mount_guard::MountEntry;
    use crate::error::{CleanupStep, OperationError};
    use std::cell::RefCell;
    use std::io;
    use std::path::PathBuf;

    /// Fails any command whose joined argv contains one of `fail_on`.
    #[derive(Default)]
    struct Script {
        calls: RefCell<Vec<String>>,
        fail_on: Vec<String>,
    }

    impl Script {
        fn failing(needles: &[&str]) -> Self {
            Self {
                fail_on: needles.iter().map(|n| n.to_string()).collect(),
                ..Default::default()
            }
        }

        fn restic_commands(&self) -> Vec<String> {
            self.calls
                .borrow()
                .iter()
                .map(|c| c.split(' ').nth(5).unwrap_or_default().to_string())
                .collect()
        }
    }

    impl CommandRunner for Script {
        fn execute(&self, argv: &[String]) -> Result<CommandOutput, OperationError> {
            let line = argv.join(" ");
            let fail = self.fail_on.iter().any(|n| line.contains(n.as_str()));
            self.calls.borrow_mut().push(line);
            Ok(CommandOutput {
                exit_code: if fail { 1 } else { 0 },
                stdout: String::new(),
                stderr: if fail { "Fatal: unable to open repository".to_string() } else { String::new() },
            })
        }
    }

    struct NoMounts;

    impl MountTable for NoMounts {
        fn lookup(&self, _path: &Path) -> io::Result<Option<MountEntry>> {
            Ok(None)
        }
    }

    fn repo(location: &str) -> Repository {
        Repository {
            location: location.to_string(),
            credential: PathBuf::from("/etc/snapvault/pass"),
            retention: RetentionPolicy {
                keep_last: 1,
                keep_daily: 1,
                keep_weekly: 1,
                keep_monthly: 1,
                keep_yearly: 1,
            },
        }
    }

    fn path_job(path: &Path, destinations: &[&str]) -> JobDescriptor {
        JobDescriptor {
            id: JobId {
                category: JobCategory::StandardPath,
                name: "data".to_string(),
            },
            source: DataSource::StandardPath {
                path: path.to_path_buf(),
                exclude_patterns: vec!["*.tmp".to_string()],
                remount_readonly: false,
            },
            destinations: destinations.iter().map(|d| repo(d)).collect(),
            copy_to: vec![],
        }
    }

    #[test]
    fn fans_out_in_order_without_stopping_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Script::failing(&["/srv/a"]);
        let mut executor = BackupExecutor::new(&runner, &NoMounts, Restic::default(), "/mnt");

        let summary = executor.run(&path_job(dir.path(), &["/srv/a", "/srv/b", "/srv/c"]));

        assert_eq!(summary.successes(), 2);
        assert_eq!(summary.failures(), 1);
        assert_eq!(summary.failed_locations(), vec!["/srv/a"]);
        assert!(summary.fatal.is_none());

        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].contains("-r /srv/a"));
        assert!(calls[2].contains("-r /srv/c"));
        assert!(calls[1].ends_with("--exclude *.tmp"));
    }

    #[test]
    fn missing_path_aborts_without_commands() {
        let runner = Script::default();
        let mut executor = BackupExecutor::new(&runner, &NoMounts, Restic::default(), "/mnt");

        let summary = executor.run(&path_job(Path::new("/nonexistent/snapvault"), &["/srv/a"]));

        assert!(matches!(
            summary.fatal,
            Some(JobError::Precondition(PreconditionError::PathMissing(_)))
        ));
        assert!(summary.results.is_empty());
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn copies_follow_each_successful_backup() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Script::failing(&["-r /srv/a "]);
        let mut executor = BackupExecutor::new(&runner, &NoMounts, Restic::default(), "/mnt");

        let mut job = path_job(dir.path(), &["/srv/a", "/srv/b"]);
        job.copy_to = vec![repo("b2:offsite")];
        let summary = executor.run(&job);

        assert_eq!(runner.restic_commands(), ["backup", "backup", "copy"]);
        assert_eq!(summary.successes(), 1);
        assert_eq!(summary.copy_failures(), 0);
        assert_eq!(
            summary.results.last().unwrap().action,
            Action::Copy {
                from: "/srv/b".to_string()
            }
        );
    }

    #[test]
    fn volume_job_reanchors_excludes_and_tears_down_once() {
        let runner = Script::default();
        let mut executor = BackupExecutor::new(&runner, &NoMounts, Restic::default(), "/nonexistent/base");

        let job = JobDescriptor {
            id: JobId {
                category: JobCategory::LogicalVolumeNonroot,
                name: "home".to_string(),
            },
            source: DataSource::LogicalVolumeOrigin {
                origin: LogicalVolume {
                    vg_name: "vg0".to_string(),
                    lv_name: "lv_home".to_string(),
                },
                snapshot_size: SnapshotSize {
                    amount: 1,
                    unit: "G".to_string(),
                },
                source_root: PathBuf::from("/home"),
                exclude_patterns: vec!["/home/alice/.cache".to_string(), "*.iso".to_string()],
            },
            destinations: vec![repo("/srv/home")],
            copy_to: vec![],
        };

        let summary = executor.run(&job);
        assert!(summary.is_success());

        let calls = runner.calls.borrow();
        let backup = calls.iter().find(|c| c.contains(" backup ")).unwrap();
        assert!(backup.contains(" backup /nonexistent/base/lv_home_snapshot_"));
        assert!(backup.contains("/lv_home_snapshot_"));
        assert!(backup.contains("/alice/.cache --exclude *.iso"));
        assert!(!backup.contains("--exclude /home/alice"));
        assert_eq!(calls.iter().filter(|c| c.starts_with("lvremove")).count(), 1);
    }

    #[test]
    fn failed_mount_aborts_job_but_destroys_snapshot() {
        let runner = Script::failing(&["mount /dev/"]);
        let mut executor = BackupExecutor::new(&runner, &NoMounts, Restic::default(), "/nonexistent/base");

        let job = JobDescriptor {
            id: JobId {
                category: JobCategory::LogicalVolumeRoot,
                name: "root".to_string(),
            },
            source: DataSource::LogicalVolumeOrigin {
                origin: LogicalVolume {
                    vg_name: "vg0".to_string(),
                    lv_name: "lv_root".to_string(),
                },
                snapshot_size: SnapshotSize {
                    amount: 2,
                    unit: "G".to_string(),
                },
                source_root: PathBuf::from("/"),
                exclude_patterns: vec![],
            },
            destinations: vec![repo("/srv/root")],
            copy_to: vec![],
        };

        let summary = executor.run(&job);

        assert!(matches!(
            summary.fatal,
            Some(JobError::Operation(OperationError::SnapshotMount { .. }))
        ));
        assert!(summary.results.is_empty());
        assert!(summary.warnings.iter().all(|w| w.step != CleanupStep::Destroy));
        let calls = runner.calls.borrow();
        assert!(calls.last().unwrap().starts_with("lvremove -f vg0/lv_root_snapshot_"));
        assert!(!calls.iter().any(|c| c.contains(" backup ")));
    }
}
