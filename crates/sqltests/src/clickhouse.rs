//! ClickHouse client used for readiness probes and check queries.
//!
//! The engine talks to the server over the HTTP interface regardless of the
//! protocol the provider under test is configured with. Results are requested
//! in `JSONCompact` format so every row arrives as a JSON array together with
//! the column type metadata the canonicalizer needs.

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// User created by the generated docker-compose file.
pub const DEFAULT_USER: &str = "default";

/// Password for [`DEFAULT_USER`].
pub const DEFAULT_PASSWORD: &str = "default";

/// ClickHouse client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Server returned status {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("Unexpected ping response: {0}")]
    NotReady(String),

    #[error("JSON deserialization failed: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// A result column: name and ClickHouse type, e.g. `Nullable(UUID)`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

/// Rows returned by a query, cells in the server's JSON representation.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct QueryRows {
    #[serde(rename = "meta", default)]
    pub columns: Vec<Column>,
    #[serde(rename = "data", default)]
    pub rows: Vec<Vec<Value>>,
}

impl QueryRows {
    /// Rows with untyped columns, for fakes and tests.
    pub fn untyped(rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns: Vec::new(),
            rows,
        }
    }
}

/// Client operations the engine needs from the service under test.
#[async_trait::async_trait]
pub trait ServiceClient: Send + Sync {
    /// Lightweight liveness probe.
    async fn ping(&self) -> Result<(), ClientError>;

    /// Execute a query verbatim and return its rows.
    async fn query(&self, sql: &str) -> Result<QueryRows, ClientError>;
}

/// Timeout of a single liveness probe.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for the ClickHouse HTTP interface.
pub struct HttpClickHouseClient {
    base_url: String,
    user: String,
    password: String,
    ping_timeout: Duration,
    http_client: Client,
}

impl HttpClickHouseClient {
    /// Create a new client for `base_url` (e.g. `http://127.0.0.1:8123`).
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http_client = Client::builder().build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user: DEFAULT_USER.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            ping_timeout: DEFAULT_PING_TIMEOUT,
            http_client,
        })
    }

    /// Bound each liveness probe by `timeout`. Queries stay unbounded.
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// Get the base URL of the server.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait::async_trait]
impl ServiceClient for HttpClickHouseClient {
    async fn ping(&self) -> Result<(), ClientError> {
        let ping_url = format!("{}/ping", self.base_url);

        let response = self
            .http_client
            .get(&ping_url)
            .timeout(self.ping_timeout)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ClientError::ServerError {
                status: status.as_u16(),
                body,
            });
        }

        // ClickHouse answers "Ok.\n" once it accepts connections.
        if body.trim() != "Ok." {
            return Err(ClientError::NotReady(body));
        }

        Ok(())
    }

    async fn query(&self, sql: &str) -> Result<QueryRows, ClientError> {
        let response = self
            .http_client
            .post(format!("{}/", self.base_url))
            .header("X-ClickHouse-User", &self.user)
            .header("X-ClickHouse-Key", &self.password)
            .query(&[
                ("default_format", "JSONCompact"),
                // Keep (U)Int64 as JSON numbers so `[[1]]` compares as written.
                ("output_format_json_quote_64bit_integers", "0"),
            ])
            .body(sql.to_string())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ClientError::ServerError {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        // DDL and other statements without a result set return an empty body.
        if body.trim().is_empty() {
            return Ok(QueryRows::default());
        }

        Ok(serde_json::from_str(&body)?)
    }
}

/// Mock service client module for testing.
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type Responder = Box<dyn Fn(&str) -> Result<QueryRows, ClientError> + Send + Sync>;

    /// Mock ClickHouse client.
    ///
    /// Pings succeed after a configurable number of failures; queries are
    /// answered by a responder function.
    pub struct MockServiceClient {
        failing_pings: Option<usize>,
        ping_count: AtomicUsize,
        responder: Responder,
        queries: Mutex<VecDeque<String>>,
    }

    impl MockServiceClient {
        /// A client that is immediately ready and returns no rows.
        pub fn ready() -> Self {
            Self {
                failing_pings: Some(0),
                ping_count: AtomicUsize::new(0),
                responder: Box::new(|_| Ok(QueryRows::default())),
                queries: Mutex::new(VecDeque::new()),
            }
        }

        /// A client whose first `failures` pings fail.
        pub fn ready_after(failures: usize) -> Self {
            Self {
                failing_pings: Some(failures),
                ..Self::ready()
            }
        }

        /// A client that never becomes ready.
        pub fn never_ready() -> Self {
            Self {
                failing_pings: None,
                ..Self::ready()
            }
        }

        /// Answer queries with `responder`.
        pub fn with_responder(
            mut self,
            responder: impl Fn(&str) -> Result<QueryRows, ClientError> + Send + Sync + 'static,
        ) -> Self {
            self.responder = Box::new(responder);
            self
        }

        /// Answer every query with the same untyped rows.
        pub fn with_rows(self, rows: Vec<Vec<Value>>) -> Self {
            self.with_responder(move |_| Ok(QueryRows::untyped(rows.clone())))
        }

        /// Number of pings received.
        pub fn ping_count(&self) -> usize {
            self.ping_count.load(Ordering::SeqCst)
        }

        /// Queries received, in order.
        pub fn queries(&self) -> Vec<String> {
            self.queries
                .lock()
                .map(|q| q.iter().cloned().collect())
                .unwrap_or_default()
        }
    }

    #[async_trait::async_trait]
    impl ServiceClient for MockServiceClient {
        async fn ping(&self) -> Result<(), ClientError> {
            let count = self.ping_count.fetch_add(1, Ordering::SeqCst);

            match self.failing_pings {
                Some(failures) if count >= failures => Ok(()),
                _ => Err(ClientError::NotReady("Mock server is starting".to_string())),
            }
        }

        async fn query(&self, sql: &str) -> Result<QueryRows, ClientError> {
            if let Ok(mut queries) = self.queries.lock() {
                queries.push_back(sql.to_string());
            }
            (self.responder)(sql)
        }
    }
}
