//! Fixed-interval driver for probe cycles.
//!
//! Cycles never overlap: a tick that comes due while a cycle is still running
//! is skipped rather than queued, and the first cycle starts immediately.

use std::{ops::ControlFlow, time::Duration};

use async_trait::async_trait;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    time::MissedTickBehavior,
};
use transit_common::{Signal, internal};

/// One unit of scheduled work.
#[async_trait]
pub trait Job: Send + Sync {
    /// Run once. The receiver is handed through so long waits inside the job
    /// can react to shutdown; `Break` stops the schedule.
    async fn tick(&self, shutdown: &mut broadcast::Receiver<Signal>) -> ControlFlow<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    period: Duration,
}

impl Scheduler {
    pub const fn new(period: Duration) -> Self {
        Self { period }
    }

    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Run `job` every period until shutdown or until the job breaks.
    /// Returns the number of runs started.
    pub async fn run(&self, job: &dyn Job, mut shutdown: broadcast::Receiver<Signal>) -> u64 {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut runs = 0;

        loop {
            tokio::select! {
                biased;

                signal = shutdown.recv() => match signal {
                    Ok(Signal::Shutdown) | Err(RecvError::Lagged(_) | RecvError::Closed) => {
                        internal!(level = INFO, runs, "Scheduler stopping");
                        break;
                    }
                },

                _ = interval.tick() => {
                    runs += 1;
                    internal!(level = DEBUG, run = runs, "Scheduler tick");

                    if job.tick(&mut shutdown).await.is_break() {
                        internal!(level = INFO, runs, "Job asked the scheduler to stop");
                        break;
                    }
                }
            }
        }

        runs
    }
}
