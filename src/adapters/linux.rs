use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use crate::core::command::{CommandOutput, CommandRunner, program_name};
use crate::core::mount_guard::{MountEntry, MountTable};
use crate::error::OperationError;

const MOUNTINFO: &str = "/proc/self/mountinfo";

/// Runs commands on the host with `std::process::Command`.
///
/// stdout and stderr are captured so failures can carry the tool's own message.
#[derive(Debug, Default, Clone)]
pub struct SystemRunner {
    ssh_auth_sock: Option<PathBuf>,
}

impl SystemRunner {
    pub fn new(ssh_auth_sock: Option<PathBuf>) -> Self {
        Self { ssh_auth_sock }
    }
}

impl CommandRunner for SystemRunner {
    fn execute(&self, argv: &[String]) -> Result<CommandOutput, OperationError> {
        let (program, args) = argv.split_first().ok_or_else(|| OperationError::Spawn {
            program: String::new(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "empty command"),
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null());
        if let Some(sock) = &self.ssh_auth_sock {
            cmd.env("SSH_AUTH_SOCK", sock);
        }

        let output = cmd.output().map_err(|source| OperationError::Spawn {
            program: program_name(argv),
            source,
        })?;

        let result = CommandOutput {
            // Killed by a signal: no exit code, treat as failure.
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        debug!(
            program = %program,
            exit_code = result.exit_code,
            "Command finished"
        );

        Ok(result)
    }
}

/// Mount table backed by `/proc/self/mountinfo`.
#[derive(Debug, Clone)]
pub struct ProcMountTable {
    source: PathBuf,
}

impl Default for ProcMountTable {
    fn default() -> Self {
        Self {
            source: PathBuf::from(MOUNTINFO),
        }
    }
}

impl ProcMountTable {
    /// Read mounts from an alternate mountinfo file.
    pub fn from_file(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

impl MountTable for ProcMountTable {
    fn lookup(&self, path: &Path) -> io::Result<Option<MountEntry>> {
        let target = path.canonicalize()?;
        let contents = fs::read_to_string(&self.source)?;
        Ok(find_mount(&contents, &target))
    }
}

/// Last matching line wins, so an over-mount shadows what is underneath.
pub fn find_mount(mountinfo: &str, target: &Path) -> Option<MountEntry> {
    mountinfo
        .lines()
        .filter_map(parse_mountinfo_line)
        .filter(|entry| entry.mount_point == target)
        .last()
}

/// Parse one mountinfo line: the mount point is field 5, per-mount options field 6.
pub fn parse_mountinfo_line(line: &str) -> Option<MountEntry> {
    let mut fields = line.split_whitespace();
    let mount_point = fields.nth(4)?;
    let options = fields.next()?;

    Some(MountEntry {
        mount_point: PathBuf::from(unescape_octal(mount_point)),
        options: options.split(',').map(str::to_string).collect(),
    })
}

/// Decode the `\040`-style escapes the kernel uses for whitespace and backslashes.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal_escape(&bytes[i + 1..i + 4]) {
            let value = (bytes[i + 1] - b'0') * 64 + (bytes[i + 2] - b'0') * 8 + (bytes[i + 3] - b'0');
            out.push(value);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_octal_escape(digits: &[u8]) -> bool {
    digits.len() == 3 && digits[0] <= b'3' && digits.iter().all(|d| (b'0'..=b'7').contains(d))
}
