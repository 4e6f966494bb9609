//! PulseWatch: scheduled uptime checks with transition notifications.

pub mod config;
pub mod database;
pub mod engine;
pub mod monitoring;
pub mod notifications;
pub mod pool;
pub mod service;

pub use engine::Engine;
