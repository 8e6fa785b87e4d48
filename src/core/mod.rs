pub mod config;
pub mod context;
pub mod metrics;
pub mod telemetry;
pub(crate) mod time;
