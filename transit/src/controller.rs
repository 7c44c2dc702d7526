use std::{
    ops::ControlFlow,
    sync::{Arc, LazyLock},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::broadcast,
    task::JoinHandle,
};
use transit_common::{Clock, Signal, SystemClock, internal, logging};
use transit_metrics::{DeliverySample, MetricsReporter};
use transit_probe::{
    CredentialCache, CycleController, CycleReport, CycleSettings, FailureReason, Outcome,
    PollAdapter, SendAdapter,
    credential::{ClientCredentialsProvider, RefreshTokenProvider},
    poll::GmailMailbox,
    send::GraphMailSender,
};

use crate::{
    config::TransitConfig,
    scheduler::{Job, Scheduler},
};

/// Upper bound on any single provider request.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// What a report turns into on the metrics side.
pub fn sample_for(report: &CycleReport) -> DeliverySample {
    match &report.outcome {
        Outcome::Delivered(latency) => DeliverySample::Delivered {
            seconds: latency.seconds,
            estimated: latency.is_estimated(),
        },
        Outcome::Failed { reason, .. } => DeliverySample::Failed {
            reason: reason.as_str().to_string(),
        },
        // A reported cycle always carries a final outcome.
        Outcome::Pending => DeliverySample::Failed {
            reason: FailureReason::PollFailed.as_str().to_string(),
        },
    }
}

#[allow(
    clippy::cast_possible_truncation,
    reason = "Epoch seconds fit comfortably in an i64"
)]
fn clock_of(report: &CycleReport) -> i64 {
    report.finished_at.floor() as i64
}

/// SIGTERM is registered before spawning so a failure surfaces before any cycle runs.
fn install_signal_handlers() -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                internal!(level = INFO, "CTRL+C entered, finishing the current cycle");
            }
            _ = terminate.recv() => {
                internal!(level = INFO, "Terminate Signal received, finishing the current cycle");
            }
        };

        SHUTDOWN_BROADCAST
            .send(Signal::Shutdown)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

        Ok(())
    }))
}

async fn finish_signals(signals: JoinHandle<anyhow::Result<()>>) -> anyhow::Result<()> {
    if signals.is_finished() {
        signals.await??;
    } else {
        signals.abort();
    }

    Ok(())
}

/// The probe application: a cycle controller, a reporter and a cadence.
#[derive(Debug)]
pub struct Transit {
    controller: CycleController,
    reporter: MetricsReporter,
    interval: Duration,
}

impl Transit {
    pub const fn new(
        controller: CycleController,
        reporter: MetricsReporter,
        interval: Duration,
    ) -> Self {
        Self {
            controller,
            reporter,
            interval,
        }
    }

    /// Wire the live providers described by `config`.
    ///
    /// # Errors
    ///
    /// This function will return an error if the HTTP client cannot be built,
    /// the stored refresh token cannot be loaded, or the metrics sink cannot be
    /// initialised.
    pub fn from_config(config: &TransitConfig) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("transit/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let sender = &config.sender;
        let send_credentials = Arc::new(CredentialCache::new(
            "graph",
            Arc::new(
                ClientCredentialsProvider::new(
                    http.clone(),
                    &sender.authority,
                    &sender.tenant_id,
                    sender.client_id.as_str(),
                    sender.client_secret.as_str(),
                )
                .with_scope(sender.scope.as_str()),
            ),
            clock.clone(),
        ));
        let send = SendAdapter::new(
            Arc::new(GraphMailSender::new(http.clone(), sender.graph_base.as_str())),
            send_credentials,
            clock.clone(),
            sender.sender_email.as_str(),
        )
        .with_display_timezone(config.monitoring.display_tz()?)
        .with_save_to_sent_items(sender.save_to_sent_items);

        let receiver = &config.receiver;
        let poll_credentials = Arc::new(CredentialCache::new(
            "gmail",
            Arc::new(RefreshTokenProvider::from_file(
                http.clone(),
                &receiver.token_file,
            )?),
            clock.clone(),
        ));
        let poll = PollAdapter::new(
            Arc::new(GmailMailbox::new(
                http,
                receiver.gmail_base.as_str(),
                poll_credentials,
            )),
            clock.clone(),
        )
        .with_backoff(config.monitoring.poll_backoff())
        .with_max_results(config.monitoring.max_results);

        let controller = CycleController::new(
            send,
            poll,
            clock,
            CycleSettings {
                recipient: receiver.recipient_email.clone(),
                subject_prefix: config.monitoring.subject_prefix.clone(),
                timeout: config.monitoring.timeout(),
            },
        );

        let reporter = MetricsReporter::from_config(config.metrics.as_ref())?;

        Ok(Self::new(
            controller,
            reporter,
            config.monitoring.test_interval(),
        ))
    }

    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one cycle and report it.
    pub async fn run_once(&self, shutdown: &mut broadcast::Receiver<Signal>) -> CycleReport {
        let report = self.controller.run_cycle(shutdown).await;

        match &report.outcome {
            Outcome::Delivered(latency) => internal!(
                level = INFO,
                test_id = %report.test_id,
                latency = latency.seconds,
                source = %latency.source,
                "Delivery succeeded"
            ),
            Outcome::Failed { reason, detail } => internal!(
                level = WARN,
                test_id = %report.test_id,
                reason = %reason,
                detail = %detail,
                "Delivery failed"
            ),
            Outcome::Pending => internal!(
                level = ERROR,
                test_id = %report.test_id,
                "Cycle finished without an outcome"
            ),
        }

        self.reporter
            .report(&report.test_id, &sample_for(&report), Some(clock_of(&report)))
            .await;

        report
    }

    /// Run cycles on the configured interval until SIGINT or SIGTERM.
    ///
    /// A signal interrupts the cycle in flight, which is still reported.
    ///
    /// # Errors
    ///
    /// This function will return an error if the signal handlers cannot be
    /// installed.
    pub async fn run(self) -> anyhow::Result<()> {
        internal!(
            level = INFO,
            interval = ?self.interval,
            metrics = self.reporter.is_enabled(),
            "Transit running"
        );

        let receiver = SHUTDOWN_BROADCAST.subscribe();
        let signals = install_signal_handlers()?;

        let cycles = Scheduler::new(self.interval).run(&self, receiver).await;

        internal!(level = INFO, cycles, "Shutting down...");
        self.close().await;

        finish_signals(signals).await
    }

    /// Run a single cycle, with signal handling, and report it.
    ///
    /// # Errors
    ///
    /// This function will return an error if the signal handlers cannot be
    /// installed.
    pub async fn run_single(self) -> anyhow::Result<CycleReport> {
        let mut receiver = SHUTDOWN_BROADCAST.subscribe();
        let signals = install_signal_handlers()?;

        let report = self.run_once(&mut receiver).await;
        self.close().await;

        finish_signals(signals).await?;
        Ok(report)
    }

    /// Flush and release the metrics sink. Safe to call with metrics disabled.
    pub async fn close(&self) {
        self.reporter.shutdown().await;
    }
}

#[async_trait]
impl Job for Transit {
    async fn tick(&self, shutdown: &mut broadcast::Receiver<Signal>) -> ControlFlow<()> {
        let report = self.run_once(shutdown).await;

        if report.outcome.failure_reason() == Some(FailureReason::Interrupted) {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}

/// Initialise logging and run until shutdown.
///
/// # Errors
///
/// See [`Transit::from_config`] and [`Transit::run`].
pub async fn run(config: &TransitConfig) -> anyhow::Result<()> {
    logging::init();
    internal!(level = DEBUG, monitoring = ?config.monitoring, "Loaded monitoring settings");

    Transit::from_config(config)?.run().await
}
