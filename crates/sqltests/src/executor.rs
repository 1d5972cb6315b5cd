//! Suite execution.
//!
//! `SuiteRunner` drives one suite through the run state machine:
//!
//! ```text
//! Idle -> Provisioned -> Initialized
//!      -> (CaseStaged -> CaseApplied -> CaseChecked -> CaseUnstaged)*
//!      -> TornDown | Aborted
//! ```
//!
//! Any failure aborts the remaining cases. Teardown runs on every exit path
//! once `prepare()` has been attempted, and a teardown failure never masks
//! the error that aborted the run.

use crate::config::Config;
use crate::errors::SqlTestError;
use crate::process::{ProcessInvoker, SystemInvoker};
use crate::provisioner::{http_client_factory, ClientFactory, Provisioner};
use crate::suite::{ConfigFile, TestCase, TestSuite};
use crate::terraform::Terraform;
use crate::validator::Validator;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Position of a run in the execution state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Provisioned,
    Initialized,
    CaseStaged { case: usize },
    CaseApplied { case: usize },
    CaseChecked { case: usize },
    CaseUnstaged { case: usize },
    TornDown,
    Aborted,
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteReport {
    pub suite: String,
    pub cases: usize,
    pub checks: usize,
}

/// Runs suites against a freshly provisioned environment.
pub struct SuiteRunner {
    config: Config,
    invoker: Arc<dyn ProcessInvoker>,
    provisioner: Provisioner,
    validator: Validator,
    history: Vec<RunState>,
}

impl SuiteRunner {
    pub fn new(
        config: Config,
        invoker: Arc<dyn ProcessInvoker>,
        client_factory: ClientFactory,
    ) -> Self {
        let provisioner = Provisioner::new(config.clone(), invoker.clone(), client_factory);

        Self {
            config,
            invoker,
            provisioner,
            validator: Validator::default(),
            history: vec![RunState::Idle],
        }
    }

    /// Runner backed by real subprocesses and the HTTP client.
    pub fn from_config(config: Config) -> Self {
        Self::new(config, Arc::new(SystemInvoker), http_client_factory())
    }

    /// Replace the validator (e.g. to plug in extra scalar encoders).
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    /// Current state of the last run.
    pub fn state(&self) -> RunState {
        self.history.last().copied().unwrap_or(RunState::Idle)
    }

    /// Every state the last run passed through, in order.
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    /// Run every case of `suite` in order.
    pub async fn run_suite(&mut self, suite: &TestSuite) -> Result<SuiteReport, SqlTestError> {
        self.history = vec![RunState::Idle];

        tracing::info!(
            target: "sqltests.executor",
            suite = %suite.name,
            cases = suite.cases.len(),
            "Running suite"
        );

        let outcome = self.execute(suite).await;
        if outcome.is_err() {
            self.transition(RunState::Aborted);
        }

        let teardown = self.provisioner.cleanup().await;

        match (outcome, teardown) {
            (Ok(report), Ok(())) => {
                self.transition(RunState::TornDown);
                tracing::info!(
                    target: "sqltests.executor",
                    suite = %suite.name,
                    cases = report.cases,
                    checks = report.checks,
                    "Suite passed"
                );
                Ok(report)
            }
            (Ok(_), Err(teardown_err)) => {
                self.transition(RunState::Aborted);
                tracing::error!(
                    target: "sqltests.executor",
                    suite = %suite.name,
                    error = %teardown_err,
                    "Teardown failed after a successful run"
                );
                Err(teardown_err)
            }
            (Err(err), Ok(())) => {
                tracing::error!(
                    target: "sqltests.executor",
                    suite = %suite.name,
                    kind = err.kind(),
                    "Suite aborted"
                );
                Err(err)
            }
            (Err(err), Err(teardown_err)) => {
                tracing::error!(
                    target: "sqltests.executor",
                    suite = %suite.name,
                    kind = err.kind(),
                    teardown_error = %teardown_err,
                    "Suite aborted and teardown failed"
                );
                Err(err)
            }
        }
    }

    async fn execute(&mut self, suite: &TestSuite) -> Result<SuiteReport, SqlTestError> {
        let workdir = self.provisioner.prepare().await?.workdir().to_path_buf();
        self.transition(RunState::Provisioned);

        let terraform = Terraform::new(
            self.invoker.clone(),
            self.config.terraform_binary.as_str(),
            &workdir,
            self.config.tf_log.as_str(),
        );
        terraform.init().await?;
        self.transition(RunState::Initialized);

        let mut checks = 0;
        for (index, case) in suite.cases.iter().enumerate() {
            checks += self.run_case(&terraform, &workdir, index, case).await?;
        }

        Ok(SuiteReport {
            suite: suite.name.clone(),
            cases: suite.cases.len(),
            checks,
        })
    }

    async fn run_case(
        &mut self,
        terraform: &Terraform,
        workdir: &Path,
        index: usize,
        case: &TestCase,
    ) -> Result<usize, SqlTestError> {
        tracing::info!(
            target: "sqltests.executor",
            case = %case.name,
            files = case.files.len(),
            checks = case.checks.len(),
            "Running case"
        );

        let staged = StagedFiles::stage(workdir, &case.files)?;
        self.transition(RunState::CaseStaged { case: index });

        terraform.apply().await?;
        self.transition(RunState::CaseApplied { case: index });

        for check in &case.checks {
            let rows = self.provisioner.query(&check.query).await?;
            self.validator.validate(check, rows)?;
            tracing::debug!(target: "sqltests.executor", query = %check.query, "Check passed");
        }
        self.transition(RunState::CaseChecked { case: index });

        staged.unstage()?;
        self.transition(RunState::CaseUnstaged { case: index });

        Ok(case.checks.len())
    }

    fn transition(&mut self, next: RunState) {
        tracing::trace!(
            target: "sqltests.executor",
            from = ?self.state(),
            to = ?next,
            "State transition"
        );
        self.history.push(next);
    }
}

/// Files written into the working directory for one case.
///
/// Baseline files overwritten by the case are remembered and restored on
/// unstage; files the case created are removed.
#[derive(Debug)]
pub struct StagedFiles {
    entries: Vec<StagedFile>,
}

#[derive(Debug)]
struct StagedFile {
    path: PathBuf,
    previous: Option<Vec<u8>>,
}

impl StagedFiles {
    /// Write every file of a case under `workdir`.
    pub fn stage(workdir: &Path, files: &[ConfigFile]) -> Result<Self, SqlTestError> {
        let mut entries = Vec::with_capacity(files.len());

        for file in files {
            let path = workdir.join(&file.name);

            let previous = if path.is_file() {
                Some(fs::read(&path).map_err(|e| workspace_error(&path, e))?)
            } else {
                None
            };

            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| workspace_error(parent, e))?;
            }
            fs::write(&path, &file.content).map_err(|e| workspace_error(&path, e))?;

            entries.push(StagedFile { path, previous });
        }

        Ok(Self { entries })
    }

    /// Remove what `stage` wrote, restoring overwritten baseline files.
    pub fn unstage(self) -> Result<(), SqlTestError> {
        for entry in self.entries.into_iter().rev() {
            let restored = match entry.previous {
                Some(content) => fs::write(&entry.path, content),
                None => fs::remove_file(&entry.path),
            };
            restored.map_err(|e| workspace_error(&entry.path, e))?;
        }

        Ok(())
    }
}

fn workspace_error(path: &Path, e: std::io::Error) -> SqlTestError {
    SqlTestError::Workspace {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}
