//! The transit delivery probe application.
//!
//! Loads the configuration file, wires the live Graph and Gmail providers
//! into a [`transit_probe::CycleController`], and runs a cycle every
//! `test_interval_secs` until SIGINT or SIGTERM, pushing two measurements
//! per cycle through [`transit_metrics::MetricsReporter`].

pub mod config;
pub mod controller;
pub mod scheduler;

pub use config::{TransitConfig, find_config_file};
pub use controller::{SHUTDOWN_BROADCAST, Transit, sample_for};
pub use scheduler::{Job, Scheduler};
