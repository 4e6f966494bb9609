use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::checker::Checker;
use super::types::CheckOutcome;

/// Extra time a checker gets beyond the probe timeout before it is cut off.
const CHECK_SLACK: Duration = Duration::from_secs(1);

/// Monitoring executor - runs one probe with the deployment's checker
pub struct MonitoringExecutor {
    checker: Arc<dyn Checker>,
}

impl MonitoringExecutor {
    /// Create a new monitoring executor around the selected checker
    pub fn new(checker: Arc<dyn Checker>) -> Self {
        Self { checker }
    }

    /// Execute a monitoring check.
    ///
    /// Always returns an outcome: a checker that overruns its budget is
    /// abandoned and reported as a timeout with the elapsed time.
    pub async fn execute_check(&self, monitor_id: i64, target: &str, probe_timeout: Duration) -> CheckOutcome {
        let start = Instant::now();

        let outcome = match tokio::time::timeout(
            probe_timeout + CHECK_SLACK,
            self.checker.check(target, probe_timeout),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(monitor_id, target, "Checker exceeded its budget; reporting timeout");
                CheckOutcome::timed_out(probe_timeout, start)
            }
        };

        debug!(
            monitor_id,
            target,
            success = outcome.success,
            status_code = ?outcome.status_code,
            latency_ms = ?outcome.latency_ms,
            "Check finished"
        );
        outcome
    }
}
