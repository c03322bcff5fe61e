//! The agent: reconciles network trust, credentials and session state
//!
//! A single reactor task owns all agent state and handles one event at a
//! time from the trust detector, the session client, both Kerberos
//! monitors, the control surface and the sleep monitor. It decides when a
//! [`SessionClient`] exists: only on a trusted network, and only once both
//! a credential cache and a Kerberos configuration have been seen.

use std::sync::Arc;

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use fwid_core::config::AgentConfig;
use fwid_core::error::ReLoginError;
use fwid_core::time::current_time_secs;
use fwid_core::traits::{ControlRequest, ControlSurface, EventSource, Notifier, TrustDetector};
use fwid_core::{KerberosTicket, LoginState, Property, SleepEvent, TrustedNetworkState};
use fwid_krb::{CCache, Krb5Config};

use crate::client::{SessionClient, SessionService};
use crate::krbmon::{CCacheUpdate, ConfUpdate};

/// Fatal reactor errors
#[derive(Debug, Error)]
pub enum AgentError {
    /// An event source closed its channel while the agent was running
    #[error("{0} channel closed unexpectedly")]
    ChannelClosed(&'static str),
}

/// Collaborators the agent is built from
pub struct AgentParts {
    /// Publishes properties and forwards re-login requests
    pub control: Box<dyn ControlSurface>,
    /// Credential cache monitor
    pub ccache: Box<dyn EventSource<Event = CCacheUpdate>>,
    /// Kerberos configuration monitor
    pub krb5_conf: Box<dyn EventSource<Event = ConfUpdate>>,
    /// Trusted network detection
    pub detector: Box<dyn TrustDetector>,
    /// Suspend/resume signals
    pub sleep: Box<dyn EventSource<Event = SleepEvent>>,
    /// Desktop notifications
    pub notifier: Arc<dyn Notifier>,
    /// Transport for session clients
    pub service: Arc<dyn SessionService>,
}

/// Handle to the agent reactor
pub struct Agent {
    reactor: Option<Reactor>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    errors_tx: mpsc::Sender<AgentError>,
    errors: mpsc::Receiver<AgentError>,
}

impl Agent {
    /// Create an agent; nothing runs until [`Agent::start`]
    pub fn new(config: AgentConfig, parts: AgentParts) -> Self {
        let (errors_tx, errors) = mpsc::channel(1);
        Self {
            reactor: Some(Reactor::new(config, parts)),
            cancel: CancellationToken::new(),
            task: None,
            errors_tx,
            errors,
        }
    }

    /// Start all event sources and the reactor.
    ///
    /// Fails if any source cannot start; sources started before the
    /// failure are stopped again.
    pub async fn start(&mut self) -> Result<()> {
        let mut reactor = self.reactor.take().context("agent already started")?;
        let config_json = reactor
            .config
            .to_json()
            .context("could not convert config to JSON")?;

        if let Err(e) = reactor.start_sources().await {
            reactor.stop_sources().await;
            return Err(e);
        }

        reactor.set_trusted_network(false).await;
        reactor.set_login_state(LoginState::LoggedOut);
        reactor.control.set_property(Property::Config(config_json));

        self.task = Some(tokio::spawn(
            reactor.run(self.cancel.clone(), self.errors_tx.clone()),
        ));
        Ok(())
    }

    /// Stop the reactor, logging out a running session, and wait for it to exit
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("Agent task failed: {}", e);
            }
        }
    }

    /// Fatal errors ending the reactor
    pub fn errors(&mut self) -> &mut mpsc::Receiver<AgentError> {
        &mut self.errors
    }
}

/// Agent state, owned by the reactor task
struct Reactor {
    config: AgentConfig,

    control: Box<dyn ControlSurface>,
    ccache_monitor: Box<dyn EventSource<Event = CCacheUpdate>>,
    conf_monitor: Box<dyn EventSource<Event = ConfUpdate>>,
    detector: Box<dyn TrustDetector>,
    sleep: Box<dyn EventSource<Event = SleepEvent>>,
    notifier: Arc<dyn Notifier>,
    service: Arc<dyn SessionService>,

    trusted_network: TrustedNetworkState,
    login_state: LoginState,
    /// Last logged in/out state, for notifications
    logged_in: bool,
    kerberos_tgt: KerberosTicket,
    last_keep_alive: i64,

    /// Last credential cache holding a TGT for the realm
    ccache: Option<Arc<CCache>>,
    krb5_conf: Option<Arc<Krb5Config>>,
    client: Option<SessionClient>,
}

impl Reactor {
    fn new(config: AgentConfig, parts: AgentParts) -> Self {
        Self {
            config,
            control: parts.control,
            ccache_monitor: parts.ccache,
            conf_monitor: parts.krb5_conf,
            detector: parts.detector,
            sleep: parts.sleep,
            notifier: parts.notifier,
            service: parts.service,
            trusted_network: TrustedNetworkState::Unknown,
            login_state: LoginState::Unknown,
            logged_in: false,
            kerberos_tgt: KerberosTicket::default(),
            last_keep_alive: 0,
            ccache: None,
            krb5_conf: None,
            client: None,
        }
    }

    async fn start_sources(&mut self) -> Result<()> {
        self.control
            .start()
            .await
            .context("could not start control surface")?;
        self.ccache_monitor
            .start()
            .await
            .context("could not start credential cache monitor")?;
        self.conf_monitor
            .start()
            .await
            .context("could not start Kerberos config monitor")?;

        for server in &self.config.tnd.https_servers {
            tracing::debug!("Adding trusted network server {} ({})", server.url, server.hash);
            self.detector.configure(&server.url, &server.hash);
        }
        self.detector
            .start()
            .await
            .context("could not start trusted network detection")?;

        self.sleep
            .start()
            .await
            .context("could not start sleep monitor")?;
        Ok(())
    }

    async fn stop_sources(&mut self) {
        self.sleep.stop().await;
        self.detector.stop().await;
        self.conf_monitor.stop().await;
        self.ccache_monitor.stop().await;
        self.control.stop().await;
    }

    async fn run(mut self, cancel: CancellationToken, errors_tx: mpsc::Sender<AgentError>) {
        if let Err(e) = self.event_loop(&cancel).await {
            tracing::error!("Agent stopped: {}", e);
            let _ = errors_tx.try_send(e);
        }

        self.stop_client().await;
        self.stop_sources().await;
        tracing::debug!("Agent stopped");
    }

    async fn event_loop(&mut self, cancel: &CancellationToken) -> Result<(), AgentError> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Agent stopping");
                    return Ok(());
                }

                result = self.detector.events().recv() => {
                    let trusted = result.ok_or(AgentError::ChannelClosed("trusted network detection"))?;
                    self.set_trusted_network(trusted).await;
                }

                result = next_login_state(&mut self.client) => {
                    let state = result.ok_or(AgentError::ChannelClosed("session client results"))?;
                    self.handle_login_result(state);
                }

                result = self.ccache_monitor.events().recv() => {
                    let update = result.ok_or(AgentError::ChannelClosed("credential cache updates"))?;
                    self.handle_ccache_update(update);
                }

                result = self.conf_monitor.events().recv() => {
                    let update = result.ok_or(AgentError::ChannelClosed("Kerberos config updates"))?;
                    self.handle_conf_update(update);
                }

                result = self.control.events().recv() => {
                    let request = result.ok_or(AgentError::ChannelClosed("control requests"))?;
                    self.handle_control_request(request).await;
                }

                result = self.sleep.events().recv() => {
                    let event = result.ok_or(AgentError::ChannelClosed("sleep events"))?;
                    self.handle_sleep_event(event).await;
                }
            }
        }
    }

    fn notify(&self, title: &str, message: &str) {
        if self.config.notifications {
            self.notifier.notify(title, message);
        }
    }

    async fn set_trusted_network(&mut self, trusted: bool) {
        let state = TrustedNetworkState::from(trusted);
        if state == self.trusted_network {
            return;
        }

        self.trusted_network = state;
        tracing::info!("Trusted network status changed: {}", state);
        self.control.set_property(Property::TrustedNetwork(state));

        if trusted {
            self.notify("Trusted Network", "Trusted network detected");
            self.start_client();
        } else {
            self.notify("No Trusted Network", "No trusted network detected");
            self.stop_client().await;
        }
    }

    fn set_login_state(&mut self, state: LoginState) {
        if state == self.login_state {
            return;
        }

        self.login_state = state;
        tracing::info!("Login state changed: {}", state);

        match state {
            LoginState::LoggedOut if self.logged_in => {
                self.logged_in = false;
                tracing::info!("Agent logged out");
                self.notify("Identity Agent Logout", "Identity Agent logged out");
            }
            LoginState::LoggedIn if !self.logged_in => {
                self.logged_in = true;
                tracing::info!("Agent logged in successfully");
                self.notify("Identity Agent Login", "Identity Agent logged in successfully");
            }
            _ => {}
        }

        self.control.set_property(Property::LoginState(state));
    }

    fn set_kerberos_ticket(&mut self, ticket: KerberosTicket) {
        if ticket == self.kerberos_tgt {
            return;
        }

        self.kerberos_tgt = ticket;
        tracing::info!(
            "Kerberos TGT times changed: start {}, end {}",
            ticket.start_time,
            ticket.end_time
        );
        self.control
            .set_property(Property::KerberosTgtStartTime(ticket.start_time));
        self.control
            .set_property(Property::KerberosTgtEndTime(ticket.end_time));
    }

    fn set_last_keep_alive(&mut self, at: i64) {
        if at == self.last_keep_alive {
            return;
        }

        self.last_keep_alive = at;
        tracing::debug!("Last keep-alive at {}", at);
        self.control.set_property(Property::LastKeepAliveAt(at));
    }

    /// Start a session client unless one runs or credentials are missing
    fn start_client(&mut self) {
        if self.client.is_some() {
            return;
        }
        let (Some(ccache), Some(krb5_conf)) = (&self.ccache, &self.krb5_conf) else {
            return;
        };

        tracing::debug!("Starting session client");
        let mut client = SessionClient::new(
            &self.config,
            Arc::clone(&self.service),
            Arc::clone(ccache),
            Arc::clone(krb5_conf),
        );
        client.start();
        self.client = Some(client);
    }

    /// Stop the session client, if any, and wait for its logout
    async fn stop_client(&mut self) {
        let Some(mut client) = self.client.take() else {
            return;
        };

        tracing::debug!("Stopping session client");
        self.set_login_state(LoginState::LoggingOut);
        client.stop().await;
        self.set_login_state(LoginState::LoggedOut);
    }

    fn handle_login_result(&mut self, state: LoginState) {
        self.set_login_state(state);
        if state == LoginState::LoggedIn {
            self.set_last_keep_alive(current_time_secs());
        }
    }

    fn handle_ccache_update(&mut self, update: CCacheUpdate) {
        let Some(tgt) = update.tgt(&self.config.realm) else {
            if self.client.is_some() {
                tracing::warn!(
                    "Credential cache has no TGT for realm {}, session keeps its previous credentials",
                    self.config.realm
                );
            } else {
                tracing::debug!("Credential cache has no TGT for realm {}", self.config.realm);
            }
            return;
        };

        let ticket = KerberosTicket::new(tgt.start_unix(), tgt.end_unix());
        if ticket == self.kerberos_tgt {
            return;
        }

        self.set_kerberos_ticket(ticket);
        self.ccache = Some(Arc::clone(&update.ccache));

        if let Some(client) = &self.client {
            client.set_credential(update.ccache);
        }
        if self.trusted_network == TrustedNetworkState::Trusted {
            self.start_client();
        }
    }

    fn handle_conf_update(&mut self, update: ConfUpdate) {
        tracing::debug!("Got updated Kerberos config");
        self.krb5_conf = Some(Arc::clone(&update.config));

        if let Some(client) = &self.client {
            client.set_config(update.config);
        }
        if self.trusted_network == TrustedNetworkState::Trusted {
            self.start_client();
        }
    }

    async fn handle_control_request(&mut self, request: ControlRequest) {
        match request {
            ControlRequest::ReLogin { reply } => {
                tracing::info!("Got re-login request");
                let result = self.relogin().await;
                if reply.send(result).is_err() {
                    tracing::debug!("Re-login requester went away");
                }
            }
        }
    }

    async fn relogin(&mut self) -> Result<(), ReLoginError> {
        if self.trusted_network != TrustedNetworkState::Trusted {
            tracing::error!("Not on a trusted network, not restarting session client");
            return Err(ReLoginError::NotTrusted);
        }

        tracing::info!("Restarting session client");
        self.stop_client().await;
        self.start_client();
        Ok(())
    }

    async fn handle_sleep_event(&mut self, event: SleepEvent) {
        if event == SleepEvent::Wake {
            return;
        }

        tracing::info!("Got sleep event, resetting trusted network status and stopping session");
        self.set_trusted_network(false).await;
        self.stop_client().await;
    }
}

/// Next report of the running session client; pending while there is none
async fn next_login_state(client: &mut Option<SessionClient>) -> Option<LoginState> {
    match client {
        Some(client) => client.results().recv().await,
        None => std::future::pending().await,
    }
}
