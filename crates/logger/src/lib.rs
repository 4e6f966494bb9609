//! Shared tracing setup for the PulseWatch binaries.

mod tracing;

pub use crate::tracing::{LogFormat, init_with_level};
