//! Command execution abstraction for testability
//!
//! Hooks, command-template storage drivers, the command dump executor and
//! command-based failover handlers all shell out through this trait, so tests
//! can swap in the recording mock.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::process::Output;
use std::time::Duration;

/// Abstraction for command execution, enabling mocking in tests
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run a command with optional timeout
    async fn run_command(
        &self,
        program: &str,
        args: &[&str],
        working_dir: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<Output>;

    /// Run a shell command (hooks, templates)
    async fn run_shell_command(
        &self,
        command: &str,
        working_dir: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<Output>;

    /// Run a shell command and return stdout as string
    async fn run_shell_stdout(
        &self,
        command: &str,
        working_dir: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<String> {
        let output = self.run_shell_command(command, working_dir, timeout).await?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Default implementation using real subprocess calls
#[derive(Debug, Clone, Default)]
pub struct RealExecutor;

impl RealExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandExecutor for RealExecutor {
    async fn run_command(
        &self,
        program: &str,
        args: &[&str],
        working_dir: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<Output> {
        super::command::run_command(program, args, working_dir, timeout).await
    }

    async fn run_shell_command(
        &self,
        command: &str,
        working_dir: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<Output> {
        super::command::run_shell_command(command, working_dir, timeout).await
    }
}

/// A mock executor for testing that records calls and returns configured responses
/// Available for use in external test crates
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Recorded command invocation
    #[derive(Clone, Debug)]
    pub struct CommandCall {
        pub program: String,
        pub args: Vec<String>,
        pub working_dir: Option<String>,
    }

    impl CommandCall {
        /// The shell command line, for calls made through `run_shell_command`
        pub fn shell_line(&self) -> Option<&str> {
            self.args.get(1).map(String::as_str)
        }
    }

    /// Response configuration for mock
    #[derive(Clone, Debug)]
    pub enum MockResponse {
        Success { stdout: String, stderr: String },
        Failure { stderr: String, exit_code: i32 },
        Timeout,
    }

    impl Default for MockResponse {
        fn default() -> Self {
            MockResponse::Success {
                stdout: String::new(),
                stderr: String::new(),
            }
        }
    }

    /// Mock executor for testing
    #[derive(Clone, Default)]
    pub struct MockExecutor {
        /// Recorded command invocations
        pub calls: Arc<Mutex<Vec<CommandCall>>>,
        /// Pre-configured responses: substring of the command line -> response
        responses: Arc<Mutex<Vec<(String, MockResponse)>>>,
        /// Default response when no specific response is configured
        default_response: Arc<Mutex<MockResponse>>,
    }

    impl MockExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        /// Configure a response for any command line containing `pattern`
        pub fn expect(self, pattern: &str, response: MockResponse) -> Self {
            self.responses.lock().push((pattern.to_string(), response));
            self
        }

        /// Set the default response for unconfigured commands
        pub fn with_default_response(self, response: MockResponse) -> Self {
            *self.default_response.lock() = response;
            self
        }

        /// Get all recorded calls
        pub fn get_calls(&self) -> Vec<CommandCall> {
            self.calls.lock().clone()
        }

        /// Check if any recorded command line contains `pattern`
        pub fn was_called(&self, pattern: &str) -> bool {
            self.call_count(pattern) > 0
        }

        /// Get number of recorded command lines containing `pattern`
        pub fn call_count(&self, pattern: &str) -> usize {
            self.calls
                .lock()
                .iter()
                .filter(|c| command_line(&c.program, &c.args).contains(pattern))
                .count()
        }

        fn record_call(&self, program: &str, args: &[&str], working_dir: Option<&Path>) {
            self.calls.lock().push(CommandCall {
                program: program.to_string(),
                args: args.iter().map(|s| s.to_string()).collect(),
                working_dir: working_dir.map(|p| p.display().to_string()),
            });
        }

        fn get_response(&self, line: &str) -> MockResponse {
            self.responses
                .lock()
                .iter()
                .find(|(pattern, _)| line.contains(pattern.as_str()))
                .map(|(_, response)| response.clone())
                .unwrap_or_else(|| self.default_response.lock().clone())
        }

        fn execute_response(&self, response: MockResponse) -> Result<Output> {
            match response {
                MockResponse::Success { stdout, stderr } => Ok(Output {
                    status: std::process::ExitStatus::default(),
                    stdout: stdout.into_bytes(),
                    stderr: stderr.into_bytes(),
                }),
                MockResponse::Failure { stderr, exit_code } => {
                    anyhow::bail!("Command failed with exit code {:?}: {}", exit_code, stderr)
                }
                MockResponse::Timeout => {
                    anyhow::bail!("Command timed out")
                }
            }
        }
    }

    fn command_line(program: &str, args: &[String]) -> String {
        std::iter::once(program.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[async_trait]
    impl CommandExecutor for MockExecutor {
        async fn run_command(
            &self,
            program: &str,
            args: &[&str],
            working_dir: Option<&Path>,
            _timeout: Option<Duration>,
        ) -> Result<Output> {
            self.record_call(program, args, working_dir);
            let owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
            let response = self.get_response(&command_line(program, &owned));
            self.execute_response(response)
        }

        async fn run_shell_command(
            &self,
            command: &str,
            working_dir: Option<&Path>,
            timeout: Option<Duration>,
        ) -> Result<Output> {
            self.run_command("sh", &["-c", command], working_dir, timeout).await
        }
    }
}
