//! External command execution
//!
//! All external binaries go through a [`CommandRunner`] so the engine's
//! collaborators can be exercised against canned output in tests. The system
//! implementation spawns each command in its own process group and registers
//! its PID for cleanup.
//!
//! A binary that cannot be found yields [`HardenError::ToolMissing`]; a binary
//! that runs and exits non-zero is NOT an error at this layer. Callers decide
//! what a non-zero exit means (`systemctl is-active` exits 3 for "inactive").

use crate::error::{HardenError, Result};
use crate::process_guard::{ChildRegistry, CommandProcessGroup};
use std::io::ErrorKind;
use std::process::{Command, Stdio};
use tracing::debug;

/// Output from an external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code (None if terminated by signal)
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(code),
            success: false,
        }
    }

    /// Check if the command succeeded and return an error if not
    pub fn ensure_success(&self, context: &str) -> Result<()> {
        if self.success {
            Ok(())
        } else {
            Err(HardenError::command(format!(
                "{} failed (exit code {}): {}",
                context,
                self.exit_code.unwrap_or(-1),
                self.diagnostics()
            )))
        }
    }

    /// Stderr if present, otherwise stdout, trimmed
    pub fn diagnostics(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Runs an external program to completion
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;
}

/// Runs commands on the host
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        debug!("exec: {} {}", program, args.join(" "));

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .in_new_process_group()
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => HardenError::tool_missing(program),
                _ => HardenError::command(format!("failed to spawn {}: {}", program, e)),
            })?;
        let pid = child.id();

        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.register(pid);
        }
        let output = child.wait_with_output();
        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.unregister(pid);
        }
        let output = output
            .map_err(|e| HardenError::command(format!("failed waiting for {}: {}", program, e)))?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
            success: output.status.success(),
        };
        debug!("exit: {} -> {:?}", program, result.exit_code);
        Ok(result)
    }
}

/// Check if a binary is available in PATH
pub fn binary_exists(name: &str) -> bool {
    if name.contains('/') {
        return std::path::Path::new(name).is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(name).is_file()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_runner_captures_stdout() {
        let output = SystemRunner.run("echo", &["hello"]).expect("echo should run");
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.exit_code, Some(0));
    }

    #[test]
    fn test_system_runner_nonzero_exit_is_not_an_error() {
        let output = SystemRunner.run("false", &[]).expect("false should run");
        assert!(!output.success);
        assert_eq!(output.exit_code, Some(1));
    }

    #[test]
    fn test_system_runner_missing_binary() {
        let err = SystemRunner
            .run("this_binary_definitely_does_not_exist_12345", &[])
            .unwrap_err();
        assert!(matches!(err, HardenError::ToolMissing(_)));
    }

    #[test]
    fn test_ensure_success_reports_context() {
        let output = CommandOutput::failed(255, "Bad configuration option: Foo\n");
        let err = output.ensure_success("sshd -t").unwrap_err().to_string();
        assert!(err.contains("sshd -t"));
        assert!(err.contains("Bad configuration option"));
        assert!(CommandOutput::ok("fine").ensure_success("x").is_ok());
    }

    #[test]
    fn test_diagnostics_prefers_stderr() {
        let mut output = CommandOutput::ok("out");
        assert_eq!(output.diagnostics(), "out");
        output.stderr = "err\n".to_string();
        assert_eq!(output.diagnostics(), "err");
    }

    #[test]
    fn test_binary_exists() {
        assert!(binary_exists("sh"));
        assert!(!binary_exists("this_binary_definitely_does_not_exist_12345"));
    }
}
