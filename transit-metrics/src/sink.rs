use std::{
    fmt::Debug,
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;

use crate::MetricsError;

/// One value for one item on one host.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub host: String,
    pub key: String,
    pub value: f64,
    /// Epoch seconds the value belongs to; the sink's receive time if absent.
    pub clock: Option<i64>,
    /// Extra dimensions. Sinks without a notion of labels ignore them.
    pub tags: Vec<(String, String)>,
}

impl Measurement {
    pub fn new(host: impl Into<String>, key: impl Into<String>, value: f64) -> Self {
        Self {
            host: host.into(),
            key: key.into(),
            value,
            clock: None,
            tags: Vec::new(),
        }
    }

    #[must_use]
    pub const fn at(mut self, clock: i64) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn tagged(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((name.into(), value.into()));
        self
    }
}

/// What the sink said about a push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushSummary {
    pub processed: u64,
    pub failed: u64,
    pub total: u64,
}

/// A push-only destination for measurements.
#[async_trait]
pub trait MetricsSink: Send + Sync + Debug {
    /// Push one batch.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the batch could not be delivered or was
    /// refused outright.
    async fn push(&self, measurements: &[Measurement]) -> Result<PushSummary, MetricsError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Flush anything buffered and release the sink. Called once on exit.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the final flush fails.
    async fn shutdown(&self) -> Result<(), MetricsError> {
        Ok(())
    }
}

/// Keeps every batch in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Mutex<Vec<Vec<Measurement>>>,
    fail: Mutex<bool>,
    closed: Mutex<bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following push fail with a connection error.
    pub fn set_failing(&self, fail: bool) {
        *lock(&self.fail) = fail;
    }

    pub fn batches(&self) -> Vec<Vec<Measurement>> {
        lock(&self.batches).clone()
    }

    pub fn is_closed(&self) -> bool {
        *lock(&self.closed)
    }

    /// Every measurement pushed so far, in order.
    pub fn measurements(&self) -> Vec<Measurement> {
        lock(&self.batches).iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl MetricsSink for MemorySink {
    async fn push(&self, measurements: &[Measurement]) -> Result<PushSummary, MetricsError> {
        if *lock(&self.fail) {
            return Err(MetricsError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "memory sink set to fail",
            )));
        }

        lock(&self.batches).push(measurements.to_vec());

        let total = measurements.len() as u64;
        Ok(PushSummary {
            processed: total,
            failed: 0,
            total,
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    async fn shutdown(&self) -> Result<(), MetricsError> {
        *lock(&self.closed) = true;
        Ok(())
    }
}
