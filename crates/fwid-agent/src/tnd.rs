//! Trusted network detection by HTTPS reachability
//!
//! The configured servers are only reachable from inside the trusted
//! network, so the machine is considered trusted while any of them
//! answers. Results are reported only when they change.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::select_ok;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use fwid_core::config::TndServer;
use fwid_core::error::MonitorError;
use fwid_core::traits::{EventSource, TrustDetector};

/// Timeout for a single probe request
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Trust detector probing HTTPS servers periodically
pub struct ProbeDetector {
    servers: Vec<TndServer>,
    interval: Duration,
    results_tx: Option<mpsc::Sender<bool>>,
    results: mpsc::Receiver<bool>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ProbeDetector {
    /// Create a detector probing every `interval`
    pub fn new(interval: Duration) -> Self {
        let (results_tx, results) = mpsc::channel(1);
        Self {
            servers: Vec::new(),
            interval,
            results_tx: Some(results_tx),
            results,
            cancel: CancellationToken::new(),
            task: None,
        }
    }
}

impl TrustDetector for ProbeDetector {
    fn configure(&mut self, url: &str, hash: &str) {
        self.servers.push(TndServer {
            url: url.to_string(),
            hash: hash.to_string(),
        });
    }
}

#[async_trait]
impl EventSource for ProbeDetector {
    type Event = bool;

    async fn start(&mut self) -> Result<(), MonitorError> {
        let results_tx = self.results_tx.take().ok_or(MonitorError::AlreadyStarted)?;
        // Probes never go through a proxy
        let http = reqwest::Client::builder()
            .no_proxy()
            .timeout(PROBE_TIMEOUT)
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .build()
            .map_err(|e| MonitorError::Other(format!("could not create HTTP client: {}", e)))?;

        let probe = ProbeLoop {
            http,
            servers: self.servers.clone(),
            interval: self.interval,
            results_tx,
            cancel: self.cancel.clone(),
        };
        self.task = Some(tokio::spawn(probe.run()));
        Ok(())
    }

    async fn stop(&mut self) {
        self.cancel.cancel();
        self.results_tx = None;
        while self.results.recv().await.is_some() {}
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn events(&mut self) -> &mut mpsc::Receiver<bool> {
        &mut self.results
    }
}

struct ProbeLoop {
    http: reqwest::Client,
    servers: Vec<TndServer>,
    interval: Duration,
    results_tx: mpsc::Sender<bool>,
    cancel: CancellationToken,
}

impl ProbeLoop {
    async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = None;

        loop {
            let trusted = tokio::select! {
                _ = self.cancel.cancelled() => break,
                trusted = async {
                    ticker.tick().await;
                    self.probe().await
                } => trusted,
            };

            if last == Some(trusted) {
                continue;
            }
            last = Some(trusted);
            tracing::debug!("Trusted network detection result: {}", trusted);

            tokio::select! {
                result = self.results_tx.send(trusted) => {
                    if result.is_err() {
                        break;
                    }
                }
                _ = self.cancel.cancelled() => break,
            }
        }
    }

    async fn probe(&self) -> bool {
        if self.servers.is_empty() {
            return false;
        }

        let probes = self.servers.iter().map(|server| {
            Box::pin(async move {
                let result = self.http.head(&server.url).send().await;
                if let Err(e) = &result {
                    tracing::trace!("Probe of {} failed: {}", server.url, e);
                }
                result
            })
        });

        select_ok(probes).await.is_ok()
    }
}
