use std::sync::Mutex;

use tracing::info;

use crate::core::command::{CommandOutput, CommandRunner};
use crate::error::OperationError;

/// Dry-run runner: logs every command, records it, and reports success
/// without touching the host.
#[derive(Debug, Default)]
pub struct SimulatedRunner {
    history: Mutex<Vec<Vec<String>>>,
}

impl SimulatedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands issued so far, in order.
    pub fn history(&self) -> Vec<Vec<String>> {
        self.history
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }
}

impl CommandRunner for SimulatedRunner {
    fn execute(&self, argv: &[String]) -> Result<CommandOutput, OperationError> {
        info!(command = %argv.join(" "), "[dry-run] Would run");

        if let Ok(mut history) = self.history.lock() {
            history.push(argv.to_vec());
        }

        Ok(CommandOutput::success())
    }
}
