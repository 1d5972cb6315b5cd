//! Readiness polling for a freshly started service.
//!
//! This is the only retried operation in the engine: a liveness probe is
//! attempted up to a fixed number of times with a fixed sleep in between.
//! Infra commands are never retried.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Bounded fixed-interval retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Maximum number of probes, including the first one.
    pub max_attempts: u32,

    /// Sleep between two consecutive probes.
    pub interval: Duration,
}

impl ReadinessPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }
}

/// The probe never succeeded within the attempt budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotReady {
    pub attempts: u32,
    /// Error reported by the final probe.
    pub last_error: String,
}

/// Probe until `probe` succeeds or the attempt budget is exhausted.
///
/// Returns the number of probes made. No probe is made after the first
/// success, and there is no sleep after the final failed probe.
pub async fn wait_until_ready<F, Fut, E>(
    policy: ReadinessPolicy,
    mut probe: F,
) -> Result<u32, NotReady>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let mut last_error = String::from("no probe attempted");

    for attempt in 1..=policy.max_attempts {
        match probe().await {
            Ok(()) => {
                tracing::debug!(target: "sqltests.readiness", attempt, "Service is ready");
                return Ok(attempt);
            }
            Err(e) => {
                last_error = e.to_string();
                tracing::debug!(
                    target: "sqltests.readiness",
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %last_error,
                    "Service not ready yet"
                );
            }
        }

        if attempt < policy.max_attempts {
            sleep(policy.interval).await;
        }
    }

    Err(NotReady {
        attempts: policy.max_attempts,
        last_error,
    })
}
