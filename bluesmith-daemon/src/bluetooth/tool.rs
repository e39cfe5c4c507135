/*!
 * Control Tool Adapter
 * The only place that spawns bluetoothctl, either one-shot or as an interactive session
 */

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

use super::error::{BluetoothError, Result};

/// A running interactive session: what we write to it, what it prints, and
/// a way to end it.
pub struct Session {
    pub input: Box<dyn AsyncWrite + Send + Unpin>,
    pub output: Box<dyn AsyncRead + Send + Unpin>,
    pub process: Box<dyn SessionProcess>,
}

#[async_trait]
pub trait SessionProcess: Send {
    /// Forcibly ends the process and reaps it.
    async fn terminate(&mut self) -> std::io::Result<()>;
}

#[async_trait]
impl SessionProcess for Child {
    async fn terminate(&mut self) -> std::io::Result<()> {
        self.kill().await
    }
}

#[async_trait]
pub trait ControlTool: Send + Sync {
    /// Runs one command to completion and returns its standard output.
    async fn run(&self, args: &[&str]) -> Result<String>;

    /// Starts a long-lived interactive session.
    async fn open_session(&self) -> Result<Session>;
}

pub struct Bluetoothctl {
    program: PathBuf,
    timeout: Duration,
}

impl Bluetoothctl {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn describe(&self, args: &[&str]) -> String {
        let mut command = self.program.display().to_string();
        for arg in args {
            command.push(' ');
            command.push_str(arg);
        }
        command
    }

    fn spawn_error(&self, source: std::io::Error) -> BluetoothError {
        BluetoothError::Spawn {
            program: self.program.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl ControlTool for Bluetoothctl {
    async fn run(&self, args: &[&str]) -> Result<String> {
        let command = self.describe(args);
        tracing::debug!("Running: {}", command);

        let child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(BluetoothError::Timeout {
                    command,
                    duration: self.timeout,
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(BluetoothError::CommandFailed {
                command,
                code: output.status.code(),
                // bluetoothctl reports most failures on stdout
                stderr: if stderr.is_empty() {
                    stdout.trim().to_string()
                } else {
                    stderr
                },
            });
        }

        Ok(stdout)
    }

    async fn open_session(&self) -> Result<Session> {
        tracing::debug!("Opening interactive session: {}", self.program.display());

        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let (Some(input), Some(output)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill().await;
            return Err(BluetoothError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "session stdio was not captured",
            )));
        };

        Ok(Session {
            input: Box::new(input),
            output: Box::new(output),
            process: Box::new(child),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_joins_arguments() {
        let tool = Bluetoothctl::new("bluetoothctl", Duration::from_secs(1));
        assert_eq!(
            tool.describe(&["devices", "Paired"]),
            "bluetoothctl devices Paired"
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let tool = Bluetoothctl::new(
            "/nonexistent/bluesmith-test/bluetoothctl",
            Duration::from_secs(1),
        );

        let err = tool.run(&["show"]).await.unwrap_err();
        assert!(matches!(err, BluetoothError::Spawn { .. }));

        let err = tool.open_session().await.err().unwrap();
        assert!(matches!(err, BluetoothError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_command_failed() {
        let tool = Bluetoothctl::new("false", Duration::from_secs(5));
        let err = tool.run(&[]).await.unwrap_err();
        assert!(matches!(
            err,
            BluetoothError::CommandFailed { code: Some(1), .. }
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdout_is_captured() {
        let tool = Bluetoothctl::new("echo", Duration::from_secs(5));
        let out = tool.run(&["Device", "11:22:33:44:55:66", "Speaker"]).await.unwrap();
        assert_eq!(out, "Device 11:22:33:44:55:66 Speaker\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_command_times_out() {
        let tool = Bluetoothctl::new("sleep", Duration::from_millis(50));
        let err = tool.run(&["5"]).await.unwrap_err();
        assert!(matches!(err, BluetoothError::Timeout { .. }));
    }
}
