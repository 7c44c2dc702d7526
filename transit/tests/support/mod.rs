#![allow(dead_code)] // not every test binary uses every fixture

use std::{sync::Arc, time::Duration};

use tokio::sync::broadcast;
use transit::Transit;
use transit_common::{ManualClock, Signal};
use transit_metrics::{ItemKeys, MemorySink, MetricsReporter};
use transit_probe::{
    CredentialCache, CycleController, CycleSettings, PollAdapter, SendAdapter,
    testing::{MockMailSender, MockMailbox, StaticTokenProvider},
};

pub const START: f64 = 1_700_000_000.0;
pub const HOST: &str = "mail-probe";

/// A [`Transit`] wired to in-memory providers, a manual clock and a memory sink.
pub struct App {
    pub clock: Arc<ManualClock>,
    pub sender: Arc<MockMailSender>,
    pub mailbox: Arc<MockMailbox>,
    pub sink: Arc<MemorySink>,
    pub transit: Transit,
    pub shutdown: broadcast::Sender<Signal>,
}

pub struct AppBuilder {
    statuses: Vec<u16>,
    delivery_delay: Option<f64>,
    timeout: Duration,
    interval: Duration,
}

impl AppBuilder {
    pub fn statuses(mut self, statuses: &[u16]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn delivered_after(mut self, seconds: f64) -> Self {
        self.delivery_delay = Some(seconds);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn build(self) -> App {
        let clock = Arc::new(ManualClock::new(START));
        let mailbox = Arc::new(MockMailbox::new());

        let mut sender = MockMailSender::new().with_statuses(self.statuses);
        if let Some(delay) = self.delivery_delay {
            sender = sender.delivering_to(Arc::clone(&mailbox), delay);
        }
        let sender = Arc::new(sender);

        let credentials = Arc::new(CredentialCache::new(
            "graph",
            Arc::new(StaticTokenProvider::new(Some(3600))),
            clock.clone(),
        ));
        let send = SendAdapter::new(
            sender.clone(),
            credentials,
            clock.clone(),
            "monitor@contoso.com",
        );
        let poll = PollAdapter::new(mailbox.clone(), clock.clone());

        let controller = CycleController::new(
            send,
            poll,
            clock.clone(),
            CycleSettings {
                recipient: "probe@gmail.com".to_string(),
                subject_prefix: "Email Delivery Test".to_string(),
                timeout: self.timeout,
            },
        );

        let sink = Arc::new(MemorySink::new());
        let reporter = MetricsReporter::new(sink.clone(), HOST, ItemKeys::default());

        let (shutdown, _) = broadcast::channel(4);

        App {
            clock,
            sender,
            mailbox,
            sink,
            transit: Transit::new(controller, reporter, self.interval),
            shutdown,
        }
    }
}

impl App {
    pub fn builder() -> AppBuilder {
        AppBuilder {
            statuses: Vec::new(),
            delivery_delay: None,
            timeout: Duration::from_secs(300),
            interval: Duration::from_secs(60),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.shutdown.subscribe()
    }

    /// `(key, value)` of every measurement pushed so far.
    pub fn values(&self) -> Vec<(String, f64)> {
        self.sink
            .measurements()
            .into_iter()
            .map(|m| (m.key, m.value))
            .collect()
    }
}
