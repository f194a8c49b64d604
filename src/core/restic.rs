//! Argument builder for the restic backup engine.

use std::path::Path;

use crate::core::models::Repository;

#[derive(Debug, Clone)]
pub struct Restic {
    binary: String,
}

impl Default for Restic {
    fn default() -> Self {
        Self::new("restic")
    }
}

impl Restic {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn base(&self, repo: &Repository) -> Vec<String> {
        vec![
            self.binary.clone(),
            "-r".to_string(),
            repo.location.clone(),
            "--password-file".to_string(),
            repo.credential.display().to_string(),
        ]
    }

    /// `restic backup <source>` with one `--exclude` per pattern, in order.
    pub fn backup(&self, repo: &Repository, source: &Path, excludes: &[String]) -> Vec<String> {
        let mut argv = self.base(repo);
        argv.push("backup".to_string());
        argv.push(source.display().to_string());
        for pattern in excludes {
            argv.push("--exclude".to_string());
            argv.push(pattern.clone());
        }
        argv
    }

    /// `restic forget --prune` with the repository's keep policy.
    pub fn forget(&self, repo: &Repository, dry_run: bool) -> Vec<String> {
        let policy = &repo.retention;
        let mut argv = self.base(repo);
        argv.push("forget".to_string());
        for (flag, value) in [
            ("--keep-last", policy.keep_last),
            ("--keep-daily", policy.keep_daily),
            ("--keep-weekly", policy.keep_weekly),
            ("--keep-monthly", policy.keep_monthly),
            ("--keep-yearly", policy.keep_yearly),
        ] {
            argv.push(flag.to_string());
            argv.push(value.to_string());
        }
        argv.push("--prune".to_string());
        if dry_run {
            argv.push("--dry-run".to_string());
        }
        argv
    }

    /// `restic copy` of every snapshot in `from` into `to`.
    pub fn copy(&self, from: &Repository, to: &Repository) -> Vec<String> {
        let mut argv = self.base(to);
        argv.extend([
            "copy".to_string(),
            "--from-repo".to_string(),
            from.location.clone(),
            "--from-password-file".to_string(),
            from.credential.display().to_string(),
        ]);
        argv
    }
}
