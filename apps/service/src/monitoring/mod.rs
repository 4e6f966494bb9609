//! Monitoring engine module - schedules and executes checks
//!
//! This module is responsible for:
//! - Probing targets over HTTP or with a reachability ping
//! - Keeping one recurring job per active monitor
//! - Recording outcomes and reacting to up/down transitions

pub mod checker;
pub mod executor;
pub mod pipeline;
pub mod scheduler;
pub mod transition;
pub mod types;
pub mod validation;

pub use checker::{Checker, checker_for};
pub use executor::MonitoringExecutor;
pub use pipeline::CheckPipeline;
pub use scheduler::{JobScheduler, MonitorJob, ScheduledJobInfo};
pub use transition::Transition;
pub use types::CheckOutcome;
