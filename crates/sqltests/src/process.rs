//! Process invocation.
//!
//! Every external CLI the engine drives (`docker compose`, `terraform`) goes
//! through the `ProcessInvoker` trait so orchestration logic can be tested
//! with a scripted invoker instead of real subprocesses.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// A command to run: program, arguments, working directory, extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Added on top of the inherited environment.
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, cwd: impl AsRef<Path>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.as_ref().to_path_buf(),
            env: BTreeMap::new(),
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

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Renders as a shell-like command line, e.g. `terraform apply -auto-approve`.
impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs external commands to completion.
///
/// `Err` means the process could not be started at all; a process that ran
/// and failed is an `Ok` with a non-zero exit code.
#[async_trait::async_trait]
pub trait ProcessInvoker: Send + Sync {
    async fn run(&self, command: &CommandSpec) -> Result<ProcessOutput, std::io::Error>;
}

/// Invoker backed by real subprocesses.
#[derive(Debug, Clone, Default)]
pub struct SystemInvoker;

#[async_trait::async_trait]
impl ProcessInvoker for SystemInvoker {
    async fn run(&self, command: &CommandSpec) -> Result<ProcessOutput, std::io::Error> {
        tracing::debug!(
            target: "sqltests.process",
            command = %command,
            cwd = %command.cwd.display(),
            "Running command"
        );

        let output = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .current_dir(&command.cwd)
            .envs(&command.env)
            .stdin(std::process::Stdio::null())
            .output()
            .await?;

        let result = ProcessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        };

        tracing::debug!(
            target: "sqltests.process",
            command = %command,
            exit_code = ?result.exit_code,
            "Command finished"
        );

        Ok(result)
    }
}

/// Mock invoker module for testing.
///
/// This module provides a scripted invoker that records every command and
/// answers from a list of rules.
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    type Hook = Box<dyn Fn(&CommandSpec) + Send + Sync>;

    struct Rule {
        /// Matches when every token appears, in order, in `program args..`.
        pattern: Vec<String>,
        output: Result<ProcessOutput, std::io::ErrorKind>,
        hook: Option<Hook>,
    }

    /// Scripted invoker.
    ///
    /// Commands that match no rule succeed with empty output.
    #[derive(Default)]
    pub struct ScriptedInvoker {
        rules: Vec<Rule>,
        calls: Mutex<Vec<CommandSpec>>,
    }

    impl ScriptedInvoker {
        /// Create an invoker where every command succeeds.
        pub fn new() -> Self {
            Self::default()
        }

        /// Answer commands matching `pattern` with a non-zero exit.
        pub fn fail_on(self, pattern: &str, exit_code: i32, stdout: &str, stderr: &str) -> Self {
            self.respond(
                pattern,
                ProcessOutput {
                    stdout: stdout.to_string(),
                    stderr: stderr.to_string(),
                    exit_code: Some(exit_code),
                },
            )
        }

        /// Answer commands matching `pattern` with a spawn failure.
        pub fn spawn_error_on(mut self, pattern: &str, kind: std::io::ErrorKind) -> Self {
            self.rules.push(Rule {
                pattern: tokens(pattern),
                output: Err(kind),
                hook: None,
            });
            self
        }

        /// Answer commands matching `pattern` with `output`.
        pub fn respond(mut self, pattern: &str, output: ProcessOutput) -> Self {
            self.rules.push(Rule {
                pattern: tokens(pattern),
                output: Ok(output),
                hook: None,
            });
            self
        }

        /// Run `hook` for commands matching `pattern`, then succeed.
        pub fn on(
            mut self,
            pattern: &str,
            hook: impl Fn(&CommandSpec) + Send + Sync + 'static,
        ) -> Self {
            self.rules.push(Rule {
                pattern: tokens(pattern),
                output: Ok(ProcessOutput {
                    exit_code: Some(0),
                    ..ProcessOutput::default()
                }),
                hook: Some(Box::new(hook)),
            });
            self
        }

        /// All commands run so far, in order.
        pub fn calls(&self) -> Vec<CommandSpec> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }

        /// Rendered command lines run so far, in order.
        pub fn command_lines(&self) -> Vec<String> {
            self.calls().iter().map(ToString::to_string).collect()
        }

        /// Number of commands run so far that match `pattern`.
        pub fn count(&self, pattern: &str) -> usize {
            let pattern = tokens(pattern);
            self.calls().iter().filter(|c| matches(&pattern, c)).count()
        }
    }

    fn tokens(pattern: &str) -> Vec<String> {
        pattern.split_whitespace().map(str::to_string).collect()
    }

    fn matches(pattern: &[String], command: &CommandSpec) -> bool {
        let line = std::iter::once(&command.program).chain(command.args.iter());
        let mut wanted = pattern.iter().peekable();
        for token in line {
            if wanted.peek().is_some_and(|w| *w == token) {
                wanted.next();
            }
        }
        wanted.peek().is_none()
    }

    #[async_trait::async_trait]
    impl ProcessInvoker for ScriptedInvoker {
        async fn run(&self, command: &CommandSpec) -> Result<ProcessOutput, std::io::Error> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(command.clone());
            }

            let Some(rule) = self.rules.iter().find(|r| matches(&r.pattern, command)) else {
                return Ok(ProcessOutput {
                    exit_code: Some(0),
                    ..ProcessOutput::default()
                });
            };

            if let Some(hook) = &rule.hook {
                hook(command);
            }

            match &rule.output {
                Ok(output) => Ok(output.clone()),
                Err(kind) => Err(std::io::Error::new(*kind, "scripted spawn failure")),
            }
        }
    }
}
