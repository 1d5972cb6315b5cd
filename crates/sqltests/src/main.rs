//! SQL Tests runner
//!
//! Runs ClickHouse provider acceptance suites one after another and prints a
//! pass/fail line per suite. Arguments are suite files or directories
//! (default: `tests/suites`).

use sqltests::discovery::discover_suites;
use sqltests::{load_file, Config, RunnableTest, SuiteRunner, SuiteTest};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_SUITES_DIR: &str = "tests/suites";

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sqltests=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        protocol = %config.protocol,
        clickhouse_version = %config.clickhouse_version,
        fixtures_dir = ?config.fixtures_dir,
        "Configuration loaded successfully"
    );

    let mut args: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if args.is_empty() {
        args.push(PathBuf::from(DEFAULT_SUITES_DIR));
    }

    let mut suite_files = Vec::new();
    for path in args {
        if path.is_dir() {
            suite_files.extend(discover_suites(&path).map_err(|e| {
                error!("Failed to scan {}: {}", path.display(), e);
                e
            })?);
        } else {
            suite_files.push(path);
        }
    }

    let mut failed = 0usize;
    for path in &suite_files {
        let suite = match load_file(path) {
            Ok(suite) => suite,
            Err(e) => {
                println!("FAILED {}\n{}", path.display(), e);
                failed += 1;
                continue;
            }
        };

        let mut test = SuiteTest::new(suite, SuiteRunner::from_config(config.clone()));
        match test.run().await {
            Ok(()) => println!("ok     {}", test.name()),
            Err(e) => {
                println!("FAILED {}\n{}", test.name(), test.describe_failure(&e));
                failed += 1;
            }
        }
    }

    println!(
        "\n{} suites, {} passed, {} failed",
        suite_files.len(),
        suite_files.len() - failed,
        failed
    );

    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
