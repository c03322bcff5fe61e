//! Fakes shared by the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use fwid_agent::client::{SessionCredentials, SessionService};
use fwid_agent::krbmon::CCacheUpdate;
use fwid_core::config::{AgentConfig, TndConfig, TndServer};
use fwid_core::error::{MonitorError, SessionError};
use fwid_core::traits::{ControlRequest, ControlSurface, EventSource, Notifier, TrustDetector};
use fwid_core::Property;
use fwid_krb::ccache::{Credential, KeyBlock, VERSION_4};
use fwid_krb::{CCache, Principal};

pub const REALM: &str = "EXAMPLE.COM";

/// Event source fed by the test through a channel
pub struct ChannelSource<E> {
    pub events: mpsc::Receiver<E>,
    pub fail_start: bool,
    pub stopped: Arc<AtomicBool>,
}

impl<E> ChannelSource<E> {
    pub fn new() -> (Self, mpsc::Sender<E>) {
        let (tx, events) = mpsc::channel(1);
        let source = Self {
            events,
            fail_start: false,
            stopped: Arc::new(AtomicBool::new(false)),
        };
        (source, tx)
    }
}

#[async_trait]
impl<E: Send + 'static> EventSource for ChannelSource<E> {
    type Event = E;

    async fn start(&mut self) -> Result<(), MonitorError> {
        if self.fail_start {
            return Err(MonitorError::Other("cannot start".to_string()));
        }
        Ok(())
    }

    async fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.events.close();
        while self.events.recv().await.is_some() {}
    }

    fn events(&mut self) -> &mut mpsc::Receiver<E> {
        &mut self.events
    }
}

/// Control surface recording every published property
pub struct FakeControl {
    pub source: ChannelSource<ControlRequest>,
    pub properties: Arc<Mutex<Vec<Property>>>,
}

#[async_trait]
impl EventSource for FakeControl {
    type Event = ControlRequest;

    async fn start(&mut self) -> Result<(), MonitorError> {
        self.source.start().await
    }

    async fn stop(&mut self) {
        self.source.stop().await
    }

    fn events(&mut self) -> &mut mpsc::Receiver<ControlRequest> {
        self.source.events()
    }
}

impl ControlSurface for FakeControl {
    fn set_property(&self, property: Property) {
        self.properties.lock().unwrap().push(property);
    }
}

/// Trust detector fed by the test
pub struct FakeDetector {
    pub source: ChannelSource<bool>,
    pub configured: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl EventSource for FakeDetector {
    type Event = bool;

    async fn start(&mut self) -> Result<(), MonitorError> {
        self.source.start().await
    }

    async fn stop(&mut self) {
        self.source.stop().await
    }

    fn events(&mut self) -> &mut mpsc::Receiver<bool> {
        self.source.events()
    }
}

impl TrustDetector for FakeDetector {
    fn configure(&mut self, url: &str, hash: &str) {
        self.configured
            .lock()
            .unwrap()
            .push((url.to_string(), hash.to_string()));
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub titles: Mutex<Vec<String>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, title: &str, _message: &str) {
        self.titles.lock().unwrap().push(title.to_string());
    }
}

/// Identity service answering every login the same way
pub struct ScriptedService {
    pub login: Mutex<Result<String, u16>>,
    pub logins: AtomicUsize,
    pub logouts: AtomicUsize,
    /// TGT start and end time of the cache each login was given
    pub tgt_windows: Mutex<Vec<Option<(u32, u32)>>>,
}

impl ScriptedService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            login: Mutex::new(Ok(r#"{"keep-alive": 42}"#.to_string())),
            logins: AtomicUsize::new(0),
            logouts: AtomicUsize::new(0),
            tgt_windows: Mutex::new(Vec::new()),
        })
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn logouts(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }

    pub fn tgt_windows(&self) -> Vec<Option<(u32, u32)>> {
        self.tgt_windows.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionService for ScriptedService {
    async fn login(&self, credentials: &SessionCredentials) -> Result<String, SessionError> {
        let window = credentials
            .ccache
            .tgt(REALM)
            .map(|tgt| (tgt.start_time, tgt.end_time));
        self.tgt_windows.lock().unwrap().push(window);
        self.logins.fetch_add(1, Ordering::SeqCst);
        self.login
            .lock()
            .unwrap()
            .clone()
            .map_err(|status| SessionError::Status {
                status,
                body: String::new(),
            })
    }

    async fn logout(&self, _: &SessionCredentials) -> Result<(), SessionError> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn test_config() -> AgentConfig {
    AgentConfig {
        service_url: "https://id.example.com".to_string(),
        realm: REALM.to_string(),
        tnd: TndConfig {
            https_servers: vec![TndServer {
                url: "https://tnd.example.com".to_string(),
                hash: "0123abcd".to_string(),
            }],
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn ccache_update(realm: &str, start: u32, end: u32) -> CCacheUpdate {
    let client = Principal::new(1, realm, vec!["alice".to_string()]);
    let tgt = Credential {
        client: client.clone(),
        server: Principal::new(2, realm, vec!["krbtgt".to_string(), realm.to_string()]),
        key: KeyBlock {
            enctype: 18,
            data: vec![1; 32],
        },
        auth_time: start,
        start_time: start,
        end_time: end,
        renew_till: end,
        is_skey: false,
        ticket_flags: 0,
        addresses: vec![],
        auth_data: vec![],
        ticket: vec![2; 16],
        second_ticket: vec![],
    };
    CCacheUpdate::from(Arc::new(CCache {
        version: VERSION_4,
        header: vec![],
        default_principal: client,
        credentials: vec![tgt],
    }))
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

