//! Environment provisioning for the service under test.
//!
//! The `Provisioner` owns one isolated ClickHouse instance per suite run:
//! a docker compose project with a random name, OS-assigned host ports, a
//! private working directory and a client handle. Identities never repeat,
//! so several runs can share a host.
//!
//! # Lifecycle
//!
//! ```text
//! prepare()  -> identity, workdir, generated files, `compose up`, readiness
//! query()    -> check queries against the live instance
//! cleanup()  -> `compose down`, secondary `down` on failure, workdir removal
//! ```
//!
//! The environment is registered as live before `compose up` runs, so
//! `cleanup()` tears it down even when bring-up or readiness failed.

use crate::clickhouse::{
    ClientError, HttpClickHouseClient, QueryRows, ServiceClient, DEFAULT_PASSWORD, DEFAULT_USER,
};
use crate::config::{Config, Protocol};
use crate::errors::SqlTestError;
use crate::process::{CommandSpec, ProcessInvoker, ProcessOutput, SystemInvoker};
use crate::readiness::{wait_until_ready, ReadinessPolicy};
use std::fs;
use std::io;
use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use walkdir::WalkDir;

/// Prefix of every per-run working directory under the system temp area.
pub const WORKDIR_PREFIX: &str = "terraform-provider-clickhouse-";

/// Compose file location, relative to the working directory.
pub const COMPOSE_FILE: &str = "clickhouse/docker-compose.yaml";

/// Generated provider connection configuration, relative to the working directory.
pub const PROVIDER_FILE: &str = "provider.tf";

/// Builds the client for a freshly generated identity.
pub type ClientFactory =
    Arc<dyn Fn(&Identity) -> Result<Arc<dyn ServiceClient>, ClientError> + Send + Sync>;

/// Ephemeral identity of one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Compose project name; also prefixes container and network names.
    pub namespace: String,
    /// Host port bound to the server's native protocol port (9000).
    pub native_port: u16,
    /// Host port bound to the server's HTTP port (8123).
    pub http_port: u16,
    pub protocol: Protocol,
    pub version: String,
}

impl Identity {
    /// Generate a fresh identity with a random namespace and free ports.
    ///
    /// The ports are released on return; use `reserve` to keep them bound
    /// until bring-up.
    pub fn generate(protocol: Protocol, version: &str) -> io::Result<Self> {
        Self::reserve(protocol, version).map(|(identity, _)| identity)
    }

    /// Generate a fresh identity and keep its ports bound.
    ///
    /// Another process can only take the ports between
    /// `PortReservation::release` and the container binding them.
    pub fn reserve(protocol: Protocol, version: &str) -> io::Result<(Self, PortReservation)> {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let short_token = token.get(..12).unwrap_or("000000000000");

        let native = TcpListener::bind("127.0.0.1:0")?;
        let http = TcpListener::bind("127.0.0.1:0")?;

        let identity = Self {
            namespace: format!("sqltests-{}", short_token),
            native_port: native.local_addr()?.port(),
            http_port: http.local_addr()?.port(),
            protocol,
            version: version.to_string(),
        };

        Ok((
            identity,
            PortReservation {
                _listeners: [native, http],
            },
        ))
    }

    /// Port the provider under test connects to.
    pub fn provider_port(&self) -> u16 {
        match self.protocol {
            Protocol::Native => self.native_port,
            Protocol::Http => self.http_port,
        }
    }
}

/// Host ports held bound until the container is about to take them.
#[derive(Debug)]
pub struct PortReservation {
    _listeners: [TcpListener; 2],
}

impl PortReservation {
    /// Unbind the reserved ports.
    pub fn release(self) {
        drop(self);
    }
}

/// A provisioned environment. Owned exclusively by the `Provisioner`.
pub struct Environment {
    identity: Identity,
    workdir: TempDir,
    client: Arc<dyn ServiceClient>,
    ready: bool,
}

impl Environment {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Working directory holding fixtures, generated files and staged case files.
    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    pub fn client(&self) -> &Arc<dyn ServiceClient> {
        &self.client
    }
}

/// Owns the lifecycle of the isolated service instance.
pub struct Provisioner {
    config: Config,
    invoker: Arc<dyn ProcessInvoker>,
    client_factory: ClientFactory,
    live: Option<Environment>,
}

impl Provisioner {
    pub fn new(
        config: Config,
        invoker: Arc<dyn ProcessInvoker>,
        client_factory: ClientFactory,
    ) -> Self {
        Self {
            config,
            invoker,
            client_factory,
            live: None,
        }
    }

    /// Provisioner backed by real subprocesses and the HTTP client.
    pub fn from_config(config: Config) -> Self {
        Self::new(config, Arc::new(SystemInvoker), http_client_factory())
    }

    /// The live environment, if any.
    pub fn environment(&self) -> Option<&Environment> {
        self.live.as_ref()
    }

    /// Bring up a fresh environment and wait until it accepts queries.
    ///
    /// Idempotent: returns the live environment when one is already ready.
    /// An environment whose bring-up failed must be cleaned up before
    /// preparing again.
    pub async fn prepare(&mut self) -> Result<&Environment, SqlTestError> {
        let state = self
            .live
            .as_ref()
            .map(|env| (env.ready, env.identity.namespace.clone()));

        match state {
            Some((true, _)) => {}
            Some((false, namespace)) => {
                return Err(provisioning_error(format!(
                    "environment {} failed to come up; cleanup() must run before prepare()",
                    namespace
                )));
            }
            None => self.bring_up().await?,
        }

        self.live
            .as_ref()
            .ok_or_else(|| provisioning_error("environment vanished during prepare()".to_string()))
    }

    async fn bring_up(&mut self) -> Result<(), SqlTestError> {
        let (identity, ports) =
            Identity::reserve(self.config.protocol, &self.config.clickhouse_version)
                .map_err(|e| provisioning_error(format!("cannot allocate ports: {}", e)))?;

        let workdir = tempfile::Builder::new()
            .prefix(WORKDIR_PREFIX)
            .tempdir()
            .map_err(|e| provisioning_error(format!("cannot create working directory: {}", e)))?;

        if let Some(fixtures) = &self.config.fixtures_dir {
            copy_dir(fixtures, workdir.path()).map_err(|e| {
                provisioning_error(format!(
                    "cannot copy fixtures from {}: {}",
                    fixtures.display(),
                    e
                ))
            })?;
        }

        write_generated(workdir.path(), COMPOSE_FILE, &compose_file(&identity))?;
        write_generated(workdir.path(), PROVIDER_FILE, &provider_config(&identity))?;

        let client = (self.client_factory)(&identity)
            .map_err(|e| provisioning_error(format!("cannot create client: {}", e)))?;

        tracing::info!(
            target: "sqltests.provisioner",
            namespace = %identity.namespace,
            native_port = identity.native_port,
            http_port = identity.http_port,
            protocol = %identity.protocol,
            version = %identity.version,
            workdir = %workdir.path().display(),
            "Starting ClickHouse environment"
        );

        let up = self
            .compose_command(&identity, workdir.path())
            .args(["up", "-d"]);

        self.live = Some(Environment {
            identity,
            workdir,
            client,
            ready: false,
        });

        ports.release();
        let output = self.invoker.run(&up).await.map_err(|e| SqlTestError::Provisioning {
            reason: format!("cannot run `{}`: {}", up, e),
            stdout: String::new(),
            stderr: String::new(),
        })?;

        if !output.success() {
            return Err(SqlTestError::Provisioning {
                reason: format!("`{}` exited with {}", up, exit_text(&output)),
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        let Some(env) = self.live.as_mut() else {
            return Err(provisioning_error("environment vanished during bring-up".to_string()));
        };

        let policy = ReadinessPolicy::new(
            self.config.readiness_attempts,
            self.config.readiness_interval,
        );
        let client = env.client.clone();

        let attempts = wait_until_ready(policy, || {
            let client = client.clone();
            async move { client.ping().await }
        })
        .await
        .map_err(|not_ready| {
            provisioning_error(format!(
                "ClickHouse not ready after {} attempts: {}",
                not_ready.attempts, not_ready.last_error
            ))
        })?;

        env.ready = true;

        tracing::info!(
            target: "sqltests.provisioner",
            namespace = %env.identity.namespace,
            attempts,
            "ClickHouse environment ready"
        );

        Ok(())
    }

    /// Execute a query against the live environment.
    pub async fn query(&self, sql: &str) -> Result<QueryRows, SqlTestError> {
        let env = self.live.as_ref().ok_or_else(|| SqlTestError::Query {
            query: sql.to_string(),
            reason: "no live environment".to_string(),
        })?;

        env.client.query(sql).await.map_err(|e| SqlTestError::Query {
            query: sql.to_string(),
            reason: e.to_string(),
        })
    }

    /// Tear down the live environment. No-op when nothing is live.
    ///
    /// When the primary teardown fails, a secondary project-wide `down` is
    /// attempted and its outcome ignored; the primary failure is returned.
    pub async fn cleanup(&mut self) -> Result<(), SqlTestError> {
        let Some(env) = self.live.take() else {
            return Ok(());
        };

        let namespace = env.identity.namespace.clone();
        let down = self
            .compose_command(&env.identity, env.workdir())
            .args(["down", "-v", "--remove-orphans"]);

        let failure = match self.invoker.run(&down).await {
            Ok(output) if output.success() => None,
            Ok(output) => Some(SqlTestError::Teardown {
                reason: format!("`{}` exited with {}", down, exit_text(&output)),
                stdout: output.stdout,
                stderr: output.stderr,
            }),
            Err(e) => Some(SqlTestError::Teardown {
                reason: format!("cannot run `{}`: {}", down, e),
                stdout: String::new(),
                stderr: String::new(),
            }),
        };

        if let Some(err) = failure {
            tracing::warn!(
                target: "sqltests.provisioner",
                namespace = %namespace,
                error = %err,
                "Primary teardown failed, attempting secondary teardown"
            );

            let secondary = CommandSpec::new(&self.config.docker_binary, env.workdir())
                .args(["compose", "-p", namespace.as_str()])
                .args(["down", "-v", "--remove-orphans"]);

            match self.invoker.run(&secondary).await {
                Ok(output) if output.success() => {}
                Ok(output) => tracing::warn!(
                    target: "sqltests.provisioner",
                    namespace = %namespace,
                    exit_code = ?output.exit_code,
                    "Secondary teardown failed"
                ),
                Err(e) => tracing::warn!(
                    target: "sqltests.provisioner",
                    namespace = %namespace,
                    error = %e,
                    "Secondary teardown could not start"
                ),
            }

            // Dropping the guard removes the working directory best-effort.
            drop(env);
            return Err(err);
        }

        let workdir = env.workdir.path().to_path_buf();
        env.workdir.close().map_err(|e| SqlTestError::Teardown {
            reason: format!("cannot remove working directory {}: {}", workdir.display(), e),
            stdout: String::new(),
            stderr: String::new(),
        })?;

        tracing::info!(
            target: "sqltests.provisioner",
            namespace = %namespace,
            "ClickHouse environment torn down"
        );

        Ok(())
    }

    fn compose_command(&self, identity: &Identity, workdir: &Path) -> CommandSpec {
        CommandSpec::new(&self.config.docker_binary, workdir)
            .args(["compose", "-p", identity.namespace.as_str(), "-f", COMPOSE_FILE])
            .env("CLICKHOUSE_VERSION", identity.version.as_str())
    }
}

impl Drop for Provisioner {
    fn drop(&mut self) {
        if let Some(env) = &self.live {
            tracing::warn!(
                target: "sqltests.provisioner",
                namespace = %env.identity.namespace,
                "Provisioner dropped without cleanup(); containers may still be running"
            );
        }
    }
}

/// Client factory for the ClickHouse HTTP interface on the identity's HTTP port.
pub fn http_client_factory() -> ClientFactory {
    Arc::new(|identity: &Identity| {
        let client = HttpClickHouseClient::new(format!("http://127.0.0.1:{}", identity.http_port))?;
        Ok(Arc::new(client) as Arc<dyn ServiceClient>)
    })
}

/// docker-compose definition for one isolated ClickHouse server.
///
/// The image tag is interpolated from `CLICKHOUSE_VERSION` at bring-up.
pub fn compose_file(identity: &Identity) -> String {
    format!(
        r#"services:
  clickhouse:
    image: clickhouse/clickhouse-server:${{CLICKHOUSE_VERSION}}
    ports:
      - "127.0.0.1:{native}:9000"
      - "127.0.0.1:{http}:8123"
    environment:
      CLICKHOUSE_USER: {user}
      CLICKHOUSE_PASSWORD: {password}
      CLICKHOUSE_DEFAULT_ACCESS_MANAGEMENT: "1"
    labels:
      sqltests.namespace: {namespace}
    ulimits:
      nofile:
        soft: 262144
        hard: 262144
"#,
        native = identity.native_port,
        http = identity.http_port,
        user = DEFAULT_USER,
        password = DEFAULT_PASSWORD,
        namespace = identity.namespace,
    )
}

/// Provider connection configuration for the selected protocol.
pub fn provider_config(identity: &Identity) -> String {
    let protocol_line = match identity.protocol {
        Protocol::Native => String::new(),
        Protocol::Http => "  protocol = \"http\"\n".to_string(),
    };

    format!(
        r#"provider "clickhouse" {{
  host     = "127.0.0.1"
  port     = {port}
  username = "{user}"
  password = "{password}"
{protocol_line}}}
"#,
        port = identity.provider_port(),
        user = DEFAULT_USER,
        password = DEFAULT_PASSWORD,
        protocol_line = protocol_line,
    )
}

fn write_generated(workdir: &Path, relative: &str, content: &str) -> Result<(), SqlTestError> {
    let path = workdir.join(relative);
    let result = match path.parent() {
        Some(parent) => fs::create_dir_all(parent).and_then(|()| fs::write(&path, content)),
        None => fs::write(&path, content),
    };

    result.map_err(|e| provisioning_error(format!("cannot write {}: {}", path.display(), e)))
}

/// Recursively copy `from` into `to`, overwriting existing files.
fn copy_dir(from: &Path, to: &Path) -> io::Result<()> {
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let target = to.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}

fn provisioning_error(reason: String) -> SqlTestError {
    SqlTestError::Provisioning {
        reason,
        stdout: String::new(),
        stderr: String::new(),
    }
}

fn exit_text(output: &ProcessOutput) -> String {
    match output.exit_code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}
