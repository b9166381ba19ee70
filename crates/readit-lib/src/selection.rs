//! Selection source — resolves "read the current selection" to text.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::ReadError;

/// Provides the user's current text selection.
#[async_trait]
pub trait SelectionSource: Send + Sync {
    async fn selection(&self) -> Result<String, ReadError>;
}

/// Reads the selection from a command's stdout, e.g. `xclip -o -selection primary`.
pub struct CommandSelection {
    program: String,
    args: Vec<String>,
}

impl CommandSelection {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a whitespace-separated command line.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(String::from);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }
}

#[async_trait]
impl SelectionSource for CommandSelection {
    async fn selection(&self) -> Result<String, ReadError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .await
            .map_err(|e| ReadError::Selection(format!("{}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ReadError::Selection(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!("selection: {} chars from {}", text.chars().count(), self.program);
        Ok(text)
    }
}
