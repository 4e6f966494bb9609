use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::executor::MonitoringExecutor;
use super::scheduler::MonitorJob;
use super::transition::Transition;
use crate::database::MonitorStore;
use crate::database::models::DEFAULT_TIMEOUT_SECONDS;
use crate::notifications::NotificationDispatcher;

/// Bound on loading the monitor before its own timeout is known.
const LOAD_TIMEOUT: Duration = Duration::from_secs(DEFAULT_TIMEOUT_SECONDS);

/// Probe, persist, classify, notify - once per scheduler tick
pub struct CheckPipeline {
    store: Arc<dyn MonitorStore>,
    executor: Arc<MonitoringExecutor>,
    dispatcher: Arc<dyn NotificationDispatcher>,
}

impl CheckPipeline {
    pub fn new(
        store: Arc<dyn MonitorStore>,
        executor: Arc<MonitoringExecutor>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            store,
            executor,
            dispatcher,
        }
    }

    /// Run one check for a monitor.
    ///
    /// Returns the detected transition, or `None` when nothing was recorded
    /// (monitor gone or paused, store failure).
    pub async fn run_check(&self, monitor_id: i64) -> Option<Transition> {
        let monitor = match timeout(LOAD_TIMEOUT, self.store.get_monitor(monitor_id)).await {
            Ok(Ok(Some(monitor))) => monitor,
            Ok(Ok(None)) => {
                info!(monitor_id, "Monitor no longer exists; dropping tick");
                return None;
            }
            Ok(Err(e)) => {
                error!(monitor_id, error = %e, "Failed to load monitor");
                return None;
            }
            Err(_) => {
                warn!(monitor_id, "Timed out loading monitor");
                return None;
            }
        };

        if monitor.is_paused {
            debug!(monitor_id, "Monitor is paused; skipping check");
            return None;
        }

        let probe_timeout = monitor.probe_timeout();
        let outcome = self
            .executor
            .execute_check(monitor_id, &monitor.target, probe_timeout)
            .await;

        let recorded = timeout(
            probe_timeout,
            self.store.record_check(monitor_id, &outcome, Utc::now()),
        )
        .await;

        let state = match recorded {
            Ok(Ok(Some(state))) => state,
            Ok(Ok(None)) => {
                info!(monitor_id, "Monitor deleted during check; result discarded");
                return None;
            }
            Ok(Err(e)) => {
                error!(monitor_id, error = %e, "Failed to record check result");
                return None;
            }
            Err(_) => {
                warn!(monitor_id, "Timed out recording check result");
                return None;
            }
        };

        let transition = state.transition();
        match transition {
            Transition::BecameDown => {
                warn!(monitor_id, message = %outcome.message, "Monitor went down");
                self.dispatcher.notify_down(&monitor, &outcome.message).await;
            }
            Transition::BecameUp => {
                info!(monitor_id, "Monitor recovered");
                self.dispatcher.notify_up(&monitor).await;
            }
            Transition::NoObservation | Transition::Unchanged => {
                debug!(monitor_id, up = state.current, %transition, "Check recorded");
            }
        }

        Some(transition)
    }
}

#[async_trait]
impl MonitorJob for CheckPipeline {
    async fn run(&self, monitor_id: i64) {
        self.run_check(monitor_id).await;
    }
}
