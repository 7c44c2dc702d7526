//! Shared plumbing for the transit delivery probe.
//!
//! Everything in here is independent of any particular mail provider:
//! logging setup, the clock seam used by every time-dependent component,
//! configuration helpers and the signal type broadcast on shutdown.

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use tracing;

/// Process-wide control signals broadcast to long running tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
