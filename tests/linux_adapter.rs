//! Host adapter tests.
//!
//! The remount test needs root and mutates a tmpfs it mounts itself.
//!
//! Run ignored tests: `sudo cargo test --test linux_adapter -- --ignored`

#![cfg(target_os = "linux")]

mod common;

use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::process::Command;

use nix::unistd::Uid;
use common::{plan, repository};
use snapvault::adapters::{ProcMountTable, SystemRunner, get_prune_runner};
use snapvault::argv;
use snapvault::core::{
    CommandOutput, CommandRunner, MountGuard, MountTable, Restic, RetentionRunner,
};
use snapvault::error::OperationError;

fn is_root() -> bool {
    Uid::effective().is_root()
}

#[test]
fn captures_output_and_exit_status() {
    let runner = SystemRunner::default();

    let out = runner.execute(&argv!["sh", "-c", "echo out; echo err >&2; exit 3"]).unwrap();
    assert_eq!(out.exit_code, 3);
    assert_eq!(out.stdout, "out\n");
    assert_eq!(out.stderr, "err\n");
}

#[test]
fn arguments_are_not_shell_expanded() {
    let runner = SystemRunner::default();
    let out = runner.execute(&argv!["echo", "$HOME; rm -rf /"]).unwrap();
    assert_eq!(out.stdout, "$HOME; rm -rf /\n");
}

#[test]
fn missing_program_is_a_spawn_error() {
    let err = SystemRunner::default()
        .execute(&argv!["/nonexistent/snapvault-tool"])
        .unwrap_err();
    assert!(matches!(err, OperationError::Spawn { .. }));
}

#[test]
fn forwards_ssh_agent_socket() {
    let runner = SystemRunner::new(Some(PathBuf::from("/run/user/0/agent.sock")));
    let out = runner
        .execute(&argv!["sh", "-c", "printf %s \"$SSH_AUTH_SOCK\""])
        .unwrap();
    assert_eq!(out.stdout, "/run/user/0/agent.sock");
}

#[test]
fn mount_table_reads_alternate_mountinfo() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().canonicalize().unwrap();
    let info = dir.path().join("mountinfo");
    fs::write(
        &info,
        format!(
            "22 1 8:1 / / rw,relatime shared:1 - ext4 /dev/sda1 rw\n\
             40 22 0:35 / {} ro,nosuid shared:9 - tmpfs tmpfs rw\n",
            target.display()
        ),
    )
    .unwrap();

    let table = ProcMountTable::from_file(&info);
    let entry = table.lookup(dir.path()).unwrap().expect("tempdir is listed");
    assert!(entry.is_read_only());
    assert!(table.lookup(&dir.path().join("mountinfo")).unwrap().is_none());
}

#[test]
fn root_is_always_a_mount_point() {
    let entry = ProcMountTable::default()
        .lookup(std::path::Path::new("/"))
        .unwrap();
    assert!(entry.is_some());
}

/// Forwards to a real runner and keeps each child's stdout.
struct Capture<'a> {
    inner: &'a dyn CommandRunner,
    stdout: RefCell<Vec<String>>,
}

impl CommandRunner for Capture<'_> {
    fn execute(&self, argv: &[String]) -> Result<CommandOutput, OperationError> {
        let out = self.inner.execute(argv)?;
        self.stdout.borrow_mut().push(out.stdout.clone());
        Ok(out)
    }
}

fn etc_job() -> Vec<snapvault::core::JobDescriptor> {
    plan(&format!(
        "[standard_path.etc]\nbackup_source_path = \"/etc\"\n{}",
        repository("standard_path.etc", "/srv/backup/etc")
    ))
}

#[test]
fn dry_run_prune_still_executes_restic() {
    let jobs = etc_job();
    let system = get_prune_runner(None);
    let runner = Capture {
        inner: system.as_ref(),
        stdout: RefCell::default(),
    };

    // `echo` stands in for restic and prints the argv it was given.
    let report = RetentionRunner::new(&runner, Restic::new("echo"), true).run(&jobs, None, None);

    assert!(report.is_success());
    let stdout = runner.stdout.borrow();
    assert_eq!(stdout.len(), 1);
    assert!(stdout[0].starts_with("-r /srv/backup/etc "));
    assert!(stdout[0].trim_end().ends_with("--prune --dry-run"));
}

#[test]
fn dry_run_prune_fails_when_restic_is_missing() {
    let jobs = etc_job();
    let runner = get_prune_runner(None);

    let report = RetentionRunner::new(runner.as_ref(), Restic::new("/nonexistent/restic"), true)
        .run(&jobs, None, None);

    assert!(!report.is_success());
    assert_eq!(report.failures(), 1);
}

#[test]
#[ignore = "requires root privileges and tmpfs mount support"]
fn remounts_a_real_tmpfs_read_only_and_back() {
    if !is_root() {
        eprintln!("Skipping: requires root");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let status = Command::new("mount")
        .args(["-t", "tmpfs", "-o", "size=1m", "tmpfs"])
        .arg(dir.path())
        .status()
        .unwrap();
    assert!(status.success());

    let runner = SystemRunner::default();
    let mounts = ProcMountTable::default();
    let (write_result, warning) = MountGuard::new(&runner, &mounts)
        .with_readonly(dir.path(), || fs::write(dir.path().join("marker"), b"x"))
        .unwrap();

    assert!(write_result.is_err(), "tmpfs should be read-only inside the guard");
    assert!(warning.is_none());
    let entry = mounts.lookup(dir.path()).unwrap().unwrap();
    assert!(!entry.is_read_only());
    fs::write(dir.path().join("marker"), b"x").unwrap();

    Command::new("umount").arg(dir.path()).status().unwrap();
}
