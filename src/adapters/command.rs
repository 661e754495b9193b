//! Subprocess-backed capability.
//!
//! Spawns a worker command, writes the [`CapabilityInput`] as JSON to its
//! stdin and reads a single JSON document from stdout.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use super::{Capability, CapabilityError, CapabilityInput};

/// Capability that shells out to an external worker
pub struct CommandCapability {
    name: String,
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandCapability {
    pub fn new(name: impl Into<String>, program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            timeout,
        }
    }

    /// Parse a shell-style command line ("worker --mode fast") on whitespace
    pub fn from_command_line(
        name: impl Into<String>,
        command_line: &str,
        timeout: Duration,
    ) -> Option<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(name, program, timeout).with_args(parts.map(str::to_string)))
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(args);
        self
    }

    async fn run_process(&self, payload: &[u8]) -> Result<Vec<u8>, CapabilityError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CapabilityError::Transport(format!("failed to spawn '{}': {}", self.program, e))
            })?;

        // Stdin is fed while stdout drains, both under the worker timeout
        let stdin = child.stdin.take();
        let write = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(payload).await?;
                // Dropping stdin signals EOF
            }
            Ok::<_, std::io::Error>(())
        };

        let (written, output) = timeout(self.timeout, async {
            tokio::join!(write, child.wait_with_output())
        })
        .await
        .map_err(|_| CapabilityError::Timeout(self.timeout))?;

        let output = output
            .map_err(|e| CapabilityError::Transport(format!("failed to wait for worker: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CapabilityError::Transport(format!(
                "'{}' exited with code {}: {}",
                self.program,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        // A worker may exit before consuming all of its input
        match written {
            Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => Err(CapabilityError::Transport(
                format!("failed to write worker stdin: {}", e),
            )),
            _ => Ok(output.stdout),
        }
    }
}

#[async_trait]
impl Capability for CommandCapability {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, input: &CapabilityInput) -> Result<serde_json::Value, CapabilityError> {
        let payload = serde_json::to_vec(input)
            .map_err(|e| CapabilityError::Shape(format!("unserializable input: {}", e)))?;

        let stdout = self.run_process(&payload).await?;

        serde_json::from_slice(&stdout)
            .map_err(|e| CapabilityError::Shape(format!("worker output is not JSON: {}", e)))
    }
}
