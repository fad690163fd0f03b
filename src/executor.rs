use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, error};

use crate::domain::Provider;
use crate::error::FastqDlError;
use crate::retry::{Attempt, RetryPolicy};

/// Exit code the SRA toolkit uses when the requested object does not exist.
pub const SRA_NOT_FOUND_EXIT_CODE: i32 = 3;

/// A program plus its argument vector. Never passed through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arg_list(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Launches a program and waits for it. Only an inability to launch is an error.
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &ToolCommand, cwd: &Path) -> Result<CommandOutput, FastqDlError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, command: &ToolCommand, cwd: &Path) -> Result<CommandOutput, FastqDlError> {
        let output = Command::new(command.program())
            .args(command.arg_list())
            .current_dir(cwd)
            .output()
            .map_err(|err| FastqDlError::Spawn {
                program: command.program().to_string(),
                message: err.to_string(),
            })?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    Success {
        stdout: String,
    },
    /// The SRA toolkit reported that the object does not exist. Never retried.
    NotFound {
        code: i32,
        message: String,
    },
    /// Every attempt exited non-zero.
    Failed {
        provider: Provider,
        code: Option<i32>,
        attempts: u32,
        message: String,
    },
}

enum Failure {
    NotFound { code: i32, message: String },
    Exit { code: Option<i32>, message: String },
    Launch(FastqDlError),
}

pub struct Executor<R: CommandRunner> {
    runner: R,
    policy: RetryPolicy,
}

impl<R: CommandRunner> Executor<R> {
    pub fn new(runner: R, policy: RetryPolicy) -> Self {
        Self { runner, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Runs `command` in `cwd` with the executor's retry policy.
    pub fn execute(
        &self,
        command: &ToolCommand,
        cwd: &Path,
        provider: Provider,
    ) -> Result<ExecOutcome, FastqDlError> {
        self.execute_with(command, cwd, provider, self.policy)
    }

    /// Runs `command` exactly once, for setup steps whose failure is tolerated.
    pub fn execute_once(
        &self,
        command: &ToolCommand,
        cwd: &Path,
        provider: Provider,
    ) -> Result<ExecOutcome, FastqDlError> {
        let once = RetryPolicy::new(1, self.policy.sleep());
        self.execute_with(command, cwd, provider, once)
    }

    fn execute_with(
        &self,
        command: &ToolCommand,
        cwd: &Path,
        provider: Provider,
        policy: RetryPolicy,
    ) -> Result<ExecOutcome, FastqDlError> {
        let label = format!("\"{command}\"");
        let result = policy.run(&label, |_| {
            debug!("Executing command: {command}");
            debug!("Working directory: {}", cwd.display());
            let output = match self.runner.run(command, cwd) {
                Ok(output) => output,
                Err(err) => return Attempt::Abort(Failure::Launch(err)),
            };
            debug!("STDOUT: {}", output.stdout);
            debug!("STDERR: {}", output.stderr);
            if output.success() {
                return Attempt::Done(output.stdout);
            }

            let message = first_line(&output.stderr);
            match output.code {
                Some(code) => error!("\"{command}\" return exit code {code}"),
                None => error!("\"{command}\" was terminated by a signal"),
            }
            if provider == Provider::Sra && output.code == Some(SRA_NOT_FOUND_EXIT_CODE) {
                error!("{message}");
                return Attempt::Abort(Failure::NotFound {
                    code: SRA_NOT_FOUND_EXIT_CODE,
                    message,
                });
            }
            Attempt::Retry(Failure::Exit {
                code: output.code,
                message,
            })
        });

        let err = match result {
            Ok(stdout) => return Ok(ExecOutcome::Success { stdout }),
            Err(err) => err,
        };
        let attempts = err.attempts();
        match err.into_inner() {
            Failure::Launch(err) => Err(err),
            Failure::NotFound { code, message } => Ok(ExecOutcome::NotFound { code, message }),
            Failure::Exit { code, message } => Ok(ExecOutcome::Failed {
                provider,
                code,
                attempts,
                message,
            }),
        }
    }
}

fn first_line(text: &str) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    if line.is_empty() {
        "Unknown error".to_string()
    } else {
        line.to_string()
    }
}

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}

pub fn tool_version(path: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new(path).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if stdout.is_empty() {
        None
    } else {
        Some(stdout)
    }
}
