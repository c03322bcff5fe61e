//! Session client
//!
//! Keeps one authenticated session with the identity service alive. A
//! single timer drives the loop: each time it fires the client logs in,
//! then re-arms the timer with the keep-alive interval on success or the
//! retry interval on failure. Repeated logins are the keep-alive. On stop
//! the client logs out once and closes its result channel.

mod negotiate;
mod service;

pub use negotiate::{HelperNegotiator, Negotiator};
pub use service::{HttpSessionService, SessionService};

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use fwid_core::config::AgentConfig;
use fwid_core::error::SessionError;
use fwid_core::LoginState;
use fwid_krb::{CCache, Krb5Config};

/// Credential material used for one request
#[derive(Debug, Clone)]
pub struct SessionCredentials {
    pub ccache: Arc<CCache>,
    pub krb5_conf: Arc<Krb5Config>,
}

/// Longest keep-alive interval accepted from a login response
pub const MAX_KEEP_ALIVE: Duration = Duration::from_secs(24 * 60 * 60);

/// Login response from the identity service
#[derive(Debug, Deserialize)]
struct LoginResponse {
    /// Minutes until the next login is due
    #[serde(rename = "keep-alive", default)]
    keep_alive: i64,
}

/// Timing settings taken from the agent configuration
#[derive(Debug, Clone)]
struct Timing {
    keep_alive: Duration,
    login_timeout: Duration,
    logout_timeout: Duration,
    retry_timer: Duration,
}

/// Client for one authenticated session
pub struct SessionClient {
    timing: Timing,
    service: Arc<dyn SessionService>,
    credentials: Arc<Mutex<SessionCredentials>>,
    results_tx: Option<mpsc::Sender<LoginState>>,
    results: mpsc::Receiver<LoginState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SessionClient {
    /// Create a client seeded with the current credential cache and configuration
    pub fn new(
        config: &AgentConfig,
        service: Arc<dyn SessionService>,
        ccache: Arc<CCache>,
        krb5_conf: Arc<Krb5Config>,
    ) -> Self {
        let (results_tx, results) = mpsc::channel(1);
        Self {
            timing: Timing {
                keep_alive: config.keep_alive,
                login_timeout: config.login_timeout,
                logout_timeout: config.logout_timeout,
                retry_timer: config.retry_timer,
            },
            service,
            credentials: Arc::new(Mutex::new(SessionCredentials { ccache, krb5_conf })),
            results_tx: Some(results_tx),
            results,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Start the login loop. The first login is attempted immediately.
    pub fn start(&mut self) {
        let Some(results_tx) = self.results_tx.take() else {
            return;
        };
        let worker = Worker {
            timing: self.timing.clone(),
            service: Arc::clone(&self.service),
            credentials: Arc::clone(&self.credentials),
            results_tx,
        };
        self.task = Some(tokio::spawn(worker.run(self.cancel.clone())));
    }

    /// Log out and stop the login loop.
    ///
    /// Reports sent while stopping are drained and discarded. Returns once
    /// the loop has exited.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        self.results_tx = None;
        while self.results.recv().await.is_some() {}
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("Session client task failed: {}", e);
            }
        }
    }

    /// Login state reports
    pub fn results(&mut self) -> &mut mpsc::Receiver<LoginState> {
        &mut self.results
    }

    /// Use a new credential cache from the next request on
    pub fn set_credential(&self, ccache: Arc<CCache>) {
        let mut credentials = self.credentials.lock().unwrap_or_else(PoisonError::into_inner);
        credentials.ccache = ccache;
    }

    /// Use a new Kerberos configuration from the next request on
    pub fn set_config(&self, krb5_conf: Arc<Krb5Config>) {
        let mut credentials = self.credentials.lock().unwrap_or_else(PoisonError::into_inner);
        credentials.krb5_conf = krb5_conf;
    }
}

struct Worker {
    timing: Timing,
    service: Arc<dyn SessionService>,
    credentials: Arc<Mutex<SessionCredentials>>,
    results_tx: mpsc::Sender<LoginState>,
}

impl Worker {
    async fn run(mut self, cancel: CancellationToken) {
        let timer = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                _ = &mut timer => {
                    let next = match self.login().await {
                        Ok(()) => self.timing.keep_alive,
                        Err(e) => {
                            tracing::error!("Login failed (error {}): {}", e.code(), e);
                            self.timing.retry_timer
                        }
                    };
                    tracing::debug!("Next login in {:?}", next);
                    timer.as_mut().reset(Instant::now() + next);
                }

                _ = cancel.cancelled() => {
                    if let Err(e) = self.logout().await {
                        // Expected when the trusted network is already gone
                        tracing::debug!("Logout failed (error {}): {}", e.code(), e);
                    }
                    break;
                }
            }
        }
    }

    fn credentials(&self) -> SessionCredentials {
        self.credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn report(&self, state: LoginState) {
        if self.results_tx.send(state).await.is_err() {
            tracing::debug!("Dropped login state {:?}, receiver is gone", state);
        }
    }

    async fn login(&mut self) -> Result<(), SessionError> {
        self.report(LoginState::LoggingIn).await;

        let credentials = self.credentials();
        let result =
            match tokio::time::timeout(self.timing.login_timeout, self.service.login(&credentials)).await {
                Ok(result) => result,
                Err(_) => Err(SessionError::Timeout(self.timing.login_timeout)),
            };

        let body = match result {
            Ok(body) => body,
            Err(e) => {
                self.report(LoginState::LoggedOut).await;
                return Err(e);
            }
        };

        match serde_json::from_str::<LoginResponse>(&body) {
            Ok(response) if response.keep_alive > 0 => {
                let interval = Duration::from_secs((response.keep_alive as u64).saturating_mul(60));
                if interval > MAX_KEEP_ALIVE {
                    tracing::warn!(
                        "Keep-alive of {} minutes in login response exceeds {:?}",
                        response.keep_alive,
                        MAX_KEEP_ALIVE
                    );
                }
                self.timing.keep_alive = interval.min(MAX_KEEP_ALIVE);
            }
            Ok(response) => {
                tracing::warn!(
                    "Invalid keep-alive {} in login response, keeping {:?}",
                    response.keep_alive,
                    self.timing.keep_alive
                );
            }
            Err(e) => {
                tracing::warn!(
                    "Could not parse login response ({}), keeping keep-alive {:?}",
                    e,
                    self.timing.keep_alive
                );
            }
        }

        self.report(LoginState::LoggedIn).await;
        Ok(())
    }

    async fn logout(&self) -> Result<(), SessionError> {
        self.report(LoginState::LoggingOut).await;

        let credentials = self.credentials();
        let result =
            match tokio::time::timeout(self.timing.logout_timeout, self.service.logout(&credentials)).await {
                Ok(result) => result,
                Err(_) => Err(SessionError::Timeout(self.timing.logout_timeout)),
            };

        self.report(LoginState::LoggedOut).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fwid_krb::Principal;
    use std::collections::VecDeque;

    /// Answers logins from a script, then repeats the last answer
    struct ScriptedService {
        logins: Mutex<VecDeque<Result<String, u16>>>,
        logouts: Mutex<u32>,
        seen_realms: Mutex<Vec<String>>,
    }

    impl ScriptedService {
        fn new(logins: Vec<Result<&str, u16>>) -> Arc<Self> {
            Arc::new(Self {
                logins: Mutex::new(logins.into_iter().map(|r| r.map(str::to_string)).collect()),
                logouts: Mutex::new(0),
                seen_realms: Mutex::new(vec![]),
            })
        }
    }

    #[async_trait]
    impl SessionService for ScriptedService {
        async fn login(&self, credentials: &SessionCredentials) -> Result<String, SessionError> {
            self.seen_realms
                .lock()
                .unwrap()
                .push(credentials.ccache.default_principal.realm.clone());
            let mut logins = self.logins.lock().unwrap();
            let next = if logins.len() > 1 {
                logins.pop_front().unwrap()
            } else {
                logins.front().cloned().unwrap()
            };
            next.map_err(|status| SessionError::Status {
                status,
                body: String::new(),
            })
        }

        async fn logout(&self, _: &SessionCredentials) -> Result<(), SessionError> {
            *self.logouts.lock().unwrap() += 1;
            Err(SessionError::Communication("network unreachable".to_string()))
        }
    }

    fn ccache(realm: &str) -> Arc<CCache> {
        Arc::new(CCache {
            version: fwid_krb::ccache::VERSION_4,
            header: vec![],
            default_principal: Principal::new(1, realm, vec!["alice".to_string()]),
            credentials: vec![],
        })
    }

    fn client(service: Arc<ScriptedService>) -> SessionClient {
        SessionClient::new(
            &AgentConfig::default(),
            service,
            ccache("EXAMPLE.COM"),
            Arc::new(Krb5Config::default()),
        )
    }

    /// Next report and the time it arrived
    async fn next(client: &mut SessionClient) -> (LoginState, Instant) {
        let state = client.results().recv().await.unwrap();
        (state, Instant::now())
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_from_response() {
        let service = ScriptedService::new(vec![Ok(r#"{"keep-alive": 42}"#)]);
        let mut client = client(Arc::clone(&service));
        let started = Instant::now();
        client.start();

        assert_eq!(next(&mut client).await, (LoginState::LoggingIn, started));
        assert_eq!(next(&mut client).await.0, LoginState::LoggedIn);

        let (state, at) = next(&mut client).await;
        assert_eq!(state, LoginState::LoggingIn);
        assert_eq!(at - started, Duration::from_secs(42 * 60));

        client.stop().await;
        assert_eq!(*service.logouts.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_keep_alive_is_clamped() {
        let service = ScriptedService::new(vec![Ok(r#"{"keep-alive": 9223372036854775807}"#)]);
        let mut client = client(Arc::clone(&service));
        let started = Instant::now();
        client.start();

        assert_eq!(next(&mut client).await.0, LoginState::LoggingIn);
        assert_eq!(next(&mut client).await.0, LoginState::LoggedIn);

        let (state, at) = next(&mut client).await;
        assert_eq!(state, LoginState::LoggingIn);
        assert_eq!(at - started, MAX_KEEP_ALIVE);
        assert_eq!(next(&mut client).await.0, LoginState::LoggedIn);

        client.stop().await;
        assert_eq!(*service.logouts.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparseable_response_keeps_default() {
        for body in ["{}", "not json", r#"{"keep-alive": -3}"#] {
            let service = ScriptedService::new(vec![Ok(body)]);
            let mut client = client(service);
            let started = Instant::now();
            client.start();

            assert_eq!(next(&mut client).await.0, LoginState::LoggingIn);
            assert_eq!(next(&mut client).await.0, LoginState::LoggedIn, "body {body}");

            let (state, at) = next(&mut client).await;
            assert_eq!(state, LoginState::LoggingIn);
            assert_eq!(at - started, Duration::from_secs(5 * 60), "body {body}");

            client.stop().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_status_uses_retry_timer() {
        let service = ScriptedService::new(vec![Err(500), Ok("{}")]);
        let mut client = client(service);
        let started = Instant::now();
        client.start();

        assert_eq!(next(&mut client).await.0, LoginState::LoggingIn);
        assert_eq!(next(&mut client).await.0, LoginState::LoggedOut);

        let (state, at) = next(&mut client).await;
        assert_eq!(state, LoginState::LoggingIn);
        assert_eq!(at - started, Duration::from_secs(15));
        assert_eq!(next(&mut client).await.0, LoginState::LoggedIn);

        client.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_timeout() {
        struct Hanging;

        #[async_trait]
        impl SessionService for Hanging {
            async fn login(&self, _: &SessionCredentials) -> Result<String, SessionError> {
                std::future::pending().await
            }

            async fn logout(&self, _: &SessionCredentials) -> Result<(), SessionError> {
                std::future::pending().await
            }
        }

        let mut client = SessionClient::new(
            &AgentConfig::default(),
            Arc::new(Hanging),
            ccache("EXAMPLE.COM"),
            Arc::new(Krb5Config::default()),
        );
        let started = Instant::now();
        client.start();

        assert_eq!(next(&mut client).await.0, LoginState::LoggingIn);
        let (state, at) = next(&mut client).await;
        assert_eq!(state, LoginState::LoggedOut);
        assert_eq!(at - started, Duration::from_secs(15));

        // Logout is bounded by its own timeout
        client.stop().await;
        assert!(Instant::now() - at >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_reports_are_drained() {
        let service = ScriptedService::new(vec![Ok("{}")]);
        let mut client = client(service);
        client.start();
        assert_eq!(next(&mut client).await.0, LoginState::LoggingIn);

        client.stop().await;
        assert!(client.results().recv().await.is_none());

        // Stopping twice is harmless
        client.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_without_start() {
        let service = ScriptedService::new(vec![Ok("{}")]);
        let mut client = client(Arc::clone(&service));
        client.stop().await;
        assert_eq!(*service.logouts.lock().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_credential_applies_to_next_login() {
        let service = ScriptedService::new(vec![Err(401)]);
        let mut client = client(Arc::clone(&service));
        client.start();

        assert_eq!(next(&mut client).await.0, LoginState::LoggingIn);
        assert_eq!(next(&mut client).await.0, LoginState::LoggedOut);

        client.set_credential(ccache("OTHER.COM"));
        client.set_config(Arc::new(Krb5Config::default()));

        assert_eq!(next(&mut client).await.0, LoginState::LoggingIn);
        assert_eq!(next(&mut client).await.0, LoginState::LoggedOut);
        client.stop().await;

        assert_eq!(
            *service.seen_realms.lock().unwrap(),
            vec!["EXAMPLE.COM".to_string(), "OTHER.COM".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_credential_updates_survive_poisoned_lock() {
        let service = ScriptedService::new(vec![Err(401)]);
        let mut client = client(Arc::clone(&service));

        let credentials = Arc::clone(&client.credentials);
        let poisoned = std::thread::spawn(move || {
            let _guard = credentials.lock().unwrap();
            panic!("poison the credential lock");
        })
        .join();
        assert!(poisoned.is_err());
        assert!(client.credentials.is_poisoned());

        client.set_credential(ccache("OTHER.COM"));
        client.start();
        assert_eq!(next(&mut client).await.0, LoginState::LoggingIn);
        assert_eq!(next(&mut client).await.0, LoginState::LoggedOut);
        client.stop().await;

        assert_eq!(*service.seen_realms.lock().unwrap(), vec!["OTHER.COM".to_string()]);
    }
}
