#![allow(dead_code)] // not every test binary uses every fixture

pub mod http;

use std::{sync::Arc, time::Duration};

use tokio::sync::broadcast;
use transit_common::{ManualClock, Signal};
use transit_probe::{
    CredentialCache, CycleController, CycleSettings, PollAdapter, SendAdapter,
    testing::{MockMailSender, MockMailbox, StaticTokenProvider},
};

pub const START: f64 = 1_700_000_000.0;

/// A cycle controller wired to in-memory providers and a manual clock.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub send_tokens: Arc<StaticTokenProvider>,
    pub sender: Arc<MockMailSender>,
    pub mailbox: Arc<MockMailbox>,
    pub controller: CycleController,
    pub shutdown: broadcast::Sender<Signal>,
}

pub struct HarnessBuilder {
    statuses: Vec<u16>,
    delivery_delay: Option<f64>,
    timeout: Duration,
    mailbox: Arc<MockMailbox>,
}

impl HarnessBuilder {
    pub fn statuses(mut self, statuses: &[u16]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    /// Accepted probes show up this many seconds after their send epoch.
    pub fn delivered_after(mut self, seconds: f64) -> Self {
        self.delivery_delay = Some(seconds);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Harness {
        let clock = Arc::new(ManualClock::new(START));
        let send_tokens = Arc::new(StaticTokenProvider::new(Some(3600)));

        let mut sender = MockMailSender::new().with_statuses(self.statuses);
        if let Some(delay) = self.delivery_delay {
            sender = sender.delivering_to(Arc::clone(&self.mailbox), delay);
        }
        let sender = Arc::new(sender);

        let send_cache = Arc::new(CredentialCache::new(
            "graph",
            send_tokens.clone(),
            clock.clone(),
        ));
        let send = SendAdapter::new(
            sender.clone(),
            send_cache,
            clock.clone(),
            "monitor@contoso.com",
        );
        let poll = PollAdapter::new(self.mailbox.clone(), clock.clone());

        let controller = CycleController::new(
            send,
            poll,
            clock.clone(),
            CycleSettings {
                recipient: "probe@gmail.com".to_string(),
                subject_prefix: "Delivery Probe".to_string(),
                timeout: self.timeout,
            },
        );

        let (shutdown, _) = broadcast::channel(4);

        Harness {
            clock,
            send_tokens,
            sender,
            mailbox: self.mailbox,
            controller,
            shutdown,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            statuses: Vec::new(),
            delivery_delay: None,
            timeout: Duration::from_secs(300),
            mailbox: Arc::new(MockMailbox::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.shutdown.subscribe()
    }
}
