//! # SQL Tests Test Utilities
//!
//! Shared test utilities for the sqltests engine.
//!
//! This crate provides:
//! - `FakeCluster`: an in-memory ClickHouse catalog plus a Terraform invoker
//!   that converges it to the staged `.tf` files on every apply
//! - Suite builders (`SuiteBuilder`, `CaseBuilder`) rendered through the
//!   engine's YAML loader
//! - HCL snippets and a baseline fixtures directory
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sqltests_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let cluster = FakeCluster::new();
//!     let invoker = Arc::new(cluster.invoker());
//!     let fixtures = baseline_fixtures();
//!
//!     let mut runner = SuiteRunner::new(config_for(&fixtures), invoker, cluster.factory());
//!     runner.run_suite(&suite).await?;
//!
//!     assert_eq!(cluster.applies().len(), suite.cases.len());
//! }
//! ```

pub mod builders;
pub mod fake_cluster;

use sqltests::Config;
use tempfile::TempDir;

// Re-export commonly used items
pub use builders::*;
pub use fake_cluster::*;

/// Engine configuration pointing at `fixtures`, with a fast readiness policy.
pub fn config_for(fixtures: &TempDir) -> Config {
    Config {
        fixtures_dir: Some(fixtures.path().to_path_buf()),
        readiness_attempts: 3,
        readiness_interval: std::time::Duration::from_millis(1),
        ..Config::default()
    }
}
