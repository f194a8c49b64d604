//! External command seam.
//!
//! Every privileged operation (lvm, mount, restic) goes through a
//! [`CommandRunner`] as an argument vector. Nothing is ever handed to a shell.

use tracing::debug;

use crate::error::OperationError;

/// Captured result of one external command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

pub trait CommandRunner {
    /// Run `argv[0]` with the remaining arguments and wait for it to exit.
    ///
    /// Only spawn failures are errors here; a non-zero exit is reported through
    /// [`CommandOutput::exit_code`]. Use [`run_checked`] to treat it as a failure.
    fn execute(&self, argv: &[String]) -> Result<CommandOutput, OperationError>;
}

/// Run a command and classify a non-zero exit as [`OperationError::CommandFailed`].
pub fn run_checked(
    runner: &dyn CommandRunner,
    argv: &[String],
) -> Result<CommandOutput, OperationError> {
    debug!(command = %argv.join(" "), "Running command");

    let output = runner.execute(argv)?;
    if output.is_success() {
        return Ok(output);
    }

    Err(OperationError::CommandFailed {
        program: program_name(argv),
        code: output.exit_code,
        stderr: output.stderr.trim().to_string(),
    })
}

pub(crate) fn program_name(argv: &[String]) -> String {
    argv.first().cloned().unwrap_or_default()
}

/// Build an argv from anything string-like.
#[macro_export]
macro_rules! argv {
    ($($arg:expr),* $(,)?) => {
        vec![$(::std::string::ToString::to_string(&$arg)),*]
    };
}
