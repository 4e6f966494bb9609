use anyhow::Result;
use std::sync::Arc;

use crate::config::Config;
use crate::database::{LibsqlStore, open_store};
use crate::monitoring::{CheckPipeline, Checker, JobScheduler, MonitoringExecutor, checker_for};
use crate::notifications::{NotificationDispatcher, Notifier};
use crate::service::MonitorService;

/// The wired-up monitoring engine: store, scheduler and lifecycle API
pub struct Engine {
    pub store: Arc<LibsqlStore>,
    pub pipeline: Arc<CheckPipeline>,
    pub scheduler: Arc<JobScheduler>,
    pub service: MonitorService,
}

impl Engine {
    /// Open the configured database and build every component from config
    pub async fn open(config: &Config) -> Result<Self> {
        let store = Arc::new(open_store(&config.database.path, config.database.max_connections).await?);
        let checker = checker_for(&config.probe)?;
        let notifier = Arc::new(Notifier::from_settings(store.clone(), &config.notifications)?);
        Ok(Self::assemble(store, checker, notifier, config))
    }

    /// Wire the engine around explicit collaborators
    pub fn assemble(
        store: Arc<LibsqlStore>,
        checker: Arc<dyn Checker>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        config: &Config,
    ) -> Self {
        let executor = Arc::new(MonitoringExecutor::new(checker));
        let pipeline = Arc::new(CheckPipeline::new(store.clone(), executor, dispatcher));
        let scheduler = Arc::new(JobScheduler::new(pipeline.clone(), &config.scheduler));
        let service = MonitorService::new(store.clone(), scheduler.clone(), config.probe.strategy);

        Self {
            store,
            pipeline,
            scheduler,
            service,
        }
    }

    /// Schedule every persisted active monitor
    pub async fn start(&self) -> Result<usize> {
        self.scheduler.initialize(self.store.as_ref()).await
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
