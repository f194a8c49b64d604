//! Fake host collaborators shared by the integration tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use snapvault::config;
use snapvault::core::{CommandOutput, CommandRunner, JobDescriptor, JobPlanner, MountEntry, MountTable};
use snapvault::error::OperationError;

/// Records every argv and fails the ones matching a scripted needle.
#[derive(Default)]
pub struct Recorder {
    calls: RefCell<Vec<String>>,
    failures: Vec<(String, String)>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any command whose joined argv contains `needle` exits 1 with `stderr`.
    pub fn fail_when(mut self, needle: &str, stderr: &str) -> Self {
        self.failures.push((needle.to_string(), stderr.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls.borrow().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn restic_calls(&self, subcommand: &str) -> Vec<String> {
        let marker = format!(" {} ", subcommand);
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with("restic ") && format!("{} ", c).contains(&marker))
            .cloned()
            .collect()
    }
}

impl CommandRunner for Recorder {
    fn execute(&self, argv: &[String]) -> Result<CommandOutput, OperationError> {
        let line = argv.join(" ");
        let failure = self
            .failures
            .iter()
            .find(|(needle, _)| line.contains(needle.as_str()));
        self.calls.borrow_mut().push(line);

        Ok(match failure {
            Some((_, stderr)) => CommandOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: stderr.clone(),
            },
            None => CommandOutput::success(),
        })
    }
}

#[derive(Default)]
pub struct FakeMounts(HashMap<PathBuf, MountEntry>);

impl FakeMounts {
    pub fn with(mut self, path: &Path, options: &str) -> Self {
        self.0.insert(
            path.to_path_buf(),
            MountEntry {
                mount_point: path.to_path_buf(),
                options: options.split(',').map(str::to_string).collect(),
            },
        );
        self
    }
}

impl MountTable for FakeMounts {
    fn lookup(&self, path: &Path) -> io::Result<Option<MountEntry>> {
        Ok(self.0.get(path).cloned())
    }
}

pub const KEEP: &str = "prune_keep_last = 7
prune_keep_daily = 7
prune_keep_weekly = 4
prune_keep_monthly = 6
prune_keep_yearly = 1
";

/// A `[[<table>.repositories]]` entry for `repo_path`.
pub fn repository(table: &str, repo_path: &str) -> String {
    format!(
        "[[{table}.repositories]]\nrepo_path = \"{repo_path}\"\npassword_file = \"/etc/snapvault/pass\"\n{KEEP}"
    )
}

/// Write `toml` to a job file, load and resolve it.
pub fn plan(toml: &str) -> Vec<JobDescriptor> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapvault.toml");
    std::fs::write(&path, toml).unwrap();
    let raw = config::load(&path).unwrap();
    JobPlanner::default().resolve(&raw).unwrap()
}
