use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Semaphore, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout, timeout_at};
use tracing::{debug, info, warn};

use crate::config::SchedulerSettings;
use crate::database::MonitorStore;
use crate::database::models::{Monitor, job_id};

/// Work performed on every tick of a monitor's job
#[async_trait]
pub trait MonitorJob: Send + Sync {
    async fn run(&self, monitor_id: i64);
}

/// Description of an installed job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledJobInfo {
    pub job_id: String,
    pub monitor_id: i64,
    pub interval: Duration,
    /// Increases with every install, across all monitors
    pub generation: u64,
}

struct JobHandle {
    info: ScheduledJobInfo,
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl JobHandle {
    /// Stop future ticks; a check already running is left to finish.
    fn cancel(self) -> JoinHandle<()> {
        let _ = self.cancel.send(());
        self.task
    }
}

type Lane = Arc<tokio::sync::Mutex<()>>;

#[derive(Default)]
struct JobTable {
    jobs: HashMap<i64, JobHandle>,
    /// Per-monitor execution locks; outlive job replacement
    lanes: HashMap<i64, Lane>,
    next_generation: u64,
}

impl JobTable {
    /// Drop lanes of unscheduled monitors once no job task holds them.
    fn prune_lanes(&mut self) {
        let JobTable { jobs, lanes, .. } = self;
        lanes.retain(|monitor_id, lane| jobs.contains_key(monitor_id) || Arc::strong_count(lane) > 1);
    }
}

/// Keeps exactly one recurring job per active monitor
pub struct JobScheduler {
    job: Arc<dyn MonitorJob>,
    table: Mutex<JobTable>,
    workers: Arc<Semaphore>,
    worker_count: usize,
    misfire_grace: Duration,
    shutdown_grace: Duration,
}

impl JobScheduler {
    pub fn new(job: Arc<dyn MonitorJob>, settings: &SchedulerSettings) -> Self {
        let worker_count = settings.workers.max(1);
        Self {
            job,
            table: Mutex::new(JobTable::default()),
            workers: Arc::new(Semaphore::new(worker_count)),
            worker_count,
            misfire_grace: settings.misfire_grace(),
            shutdown_grace: settings.shutdown_grace(),
        }
    }

    fn lock_table(&self) -> MutexGuard<'_, JobTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install (or replace) the job for a monitor. Paused monitors end up
    /// with no job and `None` is returned.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule(&self, monitor: &Monitor) -> Option<ScheduledJobInfo> {
        let mut table = self.lock_table();

        if let Some(previous) = table.jobs.remove(&monitor.id) {
            previous.cancel();
            debug!(monitor_id = monitor.id, "Replaced existing job");
        }
        table.prune_lanes();

        if monitor.is_paused {
            info!(monitor_id = monitor.id, "Monitor is paused; not scheduling");
            return None;
        }

        if self.workers.is_closed() {
            warn!(monitor_id = monitor.id, "Scheduler is shut down; ignoring schedule request");
            return None;
        }

        table.next_generation += 1;
        let info = ScheduledJobInfo {
            job_id: job_id(monitor.id),
            monitor_id: monitor.id,
            interval: monitor.effective_interval(),
            generation: table.next_generation,
        };

        let lane = table.lanes.entry(monitor.id).or_default().clone();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(run_job(
            monitor.id,
            info.interval,
            lane,
            self.workers.clone(),
            self.job.clone(),
            self.misfire_grace,
            cancel_rx,
        ));

        table.jobs.insert(
            monitor.id,
            JobHandle {
                info: info.clone(),
                cancel: cancel_tx,
                task,
            },
        );

        info!(
            monitor_id = monitor.id,
            job_id = %info.job_id,
            interval_secs = info.interval.as_secs(),
            generation = info.generation,
            "Scheduled monitor"
        );
        Some(info)
    }

    /// Remove a monitor's job; returns whether one existed
    pub fn unschedule(&self, monitor_id: i64) -> bool {
        let mut table = self.lock_table();
        let removed = table.jobs.remove(&monitor_id);
        table.prune_lanes();

        match removed {
            Some(job) => {
                job.cancel();
                info!(monitor_id, "Unscheduled monitor");
                true
            }
            None => {
                debug!(monitor_id, "No job to unschedule");
                false
            }
        }
    }

    /// Schedule every persisted, non-paused monitor
    pub async fn initialize(&self, store: &dyn MonitorStore) -> Result<usize> {
        let monitors = store.get_active_monitors().await?;
        let scheduled = monitors
            .iter()
            .filter(|monitor| self.schedule(monitor).is_some())
            .count();

        info!(scheduled, "Scheduler initialized");
        Ok(scheduled)
    }

    /// Cancel every job and wait, within the shutdown grace, for running
    /// checks to finish. Later `schedule` calls are ignored.
    pub async fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = {
            let mut table = self.lock_table();
            table.lanes.clear();
            table.jobs.drain().map(|(_, job)| job.cancel()).collect()
        };
        info!(jobs = tasks.len(), "Shutting down scheduler");

        // Holding every worker permit means no check is running anymore.
        match timeout(
            self.shutdown_grace,
            self.workers.acquire_many(self.worker_count as u32),
        )
        .await
        {
            Ok(Ok(_permits)) => debug!("All in-flight checks finished"),
            Ok(Err(_)) => debug!("Worker pool already closed"),
            Err(_) => warn!(
                grace_secs = self.shutdown_grace.as_secs(),
                "Checks still running after shutdown grace; abandoning them"
            ),
        }
        self.workers.close();

        for task in &tasks {
            if !task.is_finished() {
                task.abort();
            }
        }
        join_all(tasks).await;
        info!("Scheduler stopped");
    }

    pub fn job_count(&self) -> usize {
        self.lock_table().jobs.len()
    }

    pub fn job_info(&self, monitor_id: i64) -> Option<ScheduledJobInfo> {
        self.lock_table().jobs.get(&monitor_id).map(|job| job.info.clone())
    }

    pub fn is_scheduled(&self, monitor_id: i64) -> bool {
        self.lock_table().jobs.contains_key(&monitor_id)
    }
}

/// Tick loop of one installed job
async fn run_job(
    monitor_id: i64,
    period: Duration,
    lane: Lane,
    workers: Arc<Semaphore>,
    job: Arc<dyn MonitorJob>,
    misfire_grace: Duration,
    mut cancel: oneshot::Receiver<()>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let scheduled_at = tokio::select! {
            biased;
            _ = &mut cancel => break,
            scheduled_at = ticker.tick() => scheduled_at,
        };

        let deadline = scheduled_at + misfire_grace;
        if Instant::now() > deadline {
            warn!(monitor_id, "Tick fired past its misfire grace; skipping run");
            continue;
        }

        let Ok(_lane_guard) = lane.clone().try_lock_owned() else {
            debug!(monitor_id, "Previous check still running; coalescing tick");
            continue;
        };

        let permit = tokio::select! {
            biased;
            _ = &mut cancel => break,
            permit = timeout_at(deadline, workers.clone().acquire_owned()) => permit,
        };
        let _permit = match permit {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => break,
            Err(_) => {
                warn!(
                    monitor_id,
                    grace_secs = misfire_grace.as_secs(),
                    "No worker available within misfire grace; skipping run"
                );
                continue;
            }
        };

        job.run(monitor_id).await;
    }

    debug!(monitor_id, "Job stopped");
}
