use std::path::PathBuf;

use crate::core::command::CommandRunner;

mod linux;
mod simulated;

pub use linux::{ProcMountTable, SystemRunner, find_mount, parse_mountinfo_line};
pub use simulated::SimulatedRunner;

/// Pick the command runner for this invocation.
pub fn get_runner(simulation: bool, ssh_auth_sock: Option<PathBuf>) -> Box<dyn CommandRunner> {
    if simulation {
        return Box::new(SimulatedRunner::new());
    }

    Box::new(SystemRunner::new(ssh_auth_sock))
}

/// Runner for retention. `restic forget --dry-run` only reports what it would
/// remove, so a dry run still executes restic.
pub fn get_prune_runner(ssh_auth_sock: Option<PathBuf>) -> Box<dyn CommandRunner> {
    Box::new(SystemRunner::new(ssh_auth_sock))
}
