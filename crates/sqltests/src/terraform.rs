//! Terraform driver.
//!
//! Wraps the infra CLI as two operations: `init` once per run and `apply`
//! once per case. Both run in the provisioner's working directory so the
//! generated `provider.tf` and the staged case files are visible. Neither
//! is retried.

use crate::errors::SqlTestError;
use crate::process::{CommandSpec, ProcessInvoker};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Drives `terraform` in one working directory.
pub struct Terraform {
    invoker: Arc<dyn ProcessInvoker>,
    binary: String,
    workdir: PathBuf,
    tf_log: String,
}

impl Terraform {
    pub fn new(
        invoker: Arc<dyn ProcessInvoker>,
        binary: impl Into<String>,
        workdir: impl AsRef<Path>,
        tf_log: impl Into<String>,
    ) -> Self {
        Self {
            invoker,
            binary: binary.into(),
            workdir: workdir.as_ref().to_path_buf(),
            tf_log: tf_log.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Resolve providers and modules for the working directory.
    pub async fn init(&self) -> Result<(), SqlTestError> {
        let command = CommandSpec::new(&self.binary, &self.workdir).args(["init", "-no-color"]);
        self.run(command).await
    }

    /// Converge live resources to the files currently on disk.
    pub async fn apply(&self) -> Result<(), SqlTestError> {
        let command = CommandSpec::new(&self.binary, &self.workdir)
            .args(["apply", "-auto-approve", "-no-color"])
            .env("TF_LOG", self.tf_log.as_str());
        self.run(command).await
    }

    async fn run(&self, command: CommandSpec) -> Result<(), SqlTestError> {
        tracing::info!(target: "sqltests.terraform", command = %command, "Running terraform");

        let output = self
            .invoker
            .run(&command)
            .await
            .map_err(|e| SqlTestError::Infra {
                command: command.to_string(),
                stdout: String::new(),
                stderr: e.to_string(),
                exit_code: None,
            })?;

        if !output.success() {
            tracing::warn!(
                target: "sqltests.terraform",
                command = %command,
                exit_code = ?output.exit_code,
                "Terraform command failed"
            );
            return Err(SqlTestError::Infra {
                command: command.to_string(),
                stdout: output.stdout,
                stderr: output.stderr,
                exit_code: output.exit_code,
            });
        }

        Ok(())
    }
}
