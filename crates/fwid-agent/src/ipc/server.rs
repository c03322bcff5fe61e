//! IPC server implementation
//!
//! Clients exchange JSON lines over a Unix socket that only the owning
//! user can open. Every client receives a `property_changed` event for
//! each published change in addition to the responses to its requests.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use fwid_core::error::MonitorError;
use fwid_core::ipc::{AgentStatus, IpcEvent, IpcMessage, IpcRequest, IpcResponse};
use fwid_core::traits::{ControlRequest, ControlSurface, EventSource};
use fwid_core::Property;

/// Control surface over a Unix socket
pub struct IpcServer {
    /// Socket path
    path: PathBuf,
    /// Current values of all properties
    status: watch::Sender<AgentStatus>,
    /// Property change broadcast to connected clients
    event_tx: broadcast::Sender<IpcEvent>,
    requests_tx: Option<mpsc::Sender<ControlRequest>>,
    requests: mpsc::Receiver<ControlRequest>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl IpcServer {
    /// Create a server for the socket at `path`; nothing listens until started
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let (status, _) = watch::channel(AgentStatus::default());
        let (event_tx, _) = broadcast::channel(64);
        let (requests_tx, requests) = mpsc::channel(1);
        Self {
            path: path.into(),
            status,
            event_tx,
            requests_tx: Some(requests_tx),
            requests,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Socket path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current property values
    pub fn status(&self) -> AgentStatus {
        self.status.borrow().clone()
    }

    fn bind(&self) -> Result<UnixListener, MonitorError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Removed stale socket {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let listener = UnixListener::bind(&self.path)?;
        std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        Ok(listener)
    }
}

impl ControlSurface for IpcServer {
    fn set_property(&self, property: Property) {
        tracing::trace!("Property {} = {}", property.name(), property.value());
        self.status.send_modify(|status| status.apply(&property));
        // No subscribers is fine
        let _ = self.event_tx.send(IpcEvent::from(&property));
    }
}

#[async_trait]
impl EventSource for IpcServer {
    type Event = ControlRequest;

    async fn start(&mut self) -> Result<(), MonitorError> {
        if self.requests_tx.is_none() || self.task.is_some() {
            return Err(MonitorError::AlreadyStarted);
        }
        let listener = self.bind()?;
        let requests_tx = self.requests_tx.take().ok_or(MonitorError::AlreadyStarted)?;
        tracing::info!("IPC server listening on {}", self.path.display());

        let status = self.status.subscribe();
        let event_tx = self.event_tx.clone();
        let cancel = self.cancel.clone();
        self.task = Some(tokio::spawn(accept_loop(
            listener,
            status,
            event_tx,
            requests_tx,
            cancel,
        )));
        Ok(())
    }

    async fn stop(&mut self) {
        for property in Property::initial() {
            self.set_property(property);
        }

        self.cancel.cancel();
        self.requests_tx = None;
        while self.requests.recv().await.is_some() {}
        if let Some(task) = self.task.take() {
            let _ = task.await;
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::debug!("Could not remove socket {}: {}", self.path.display(), e);
            }
        }
    }

    fn events(&mut self) -> &mut mpsc::Receiver<ControlRequest> {
        &mut self.requests
    }
}

async fn accept_loop(
    listener: UnixListener,
    status: watch::Receiver<AgentStatus>,
    event_tx: broadcast::Sender<IpcEvent>,
    requests_tx: mpsc::Sender<ControlRequest>,
    cancel: CancellationToken,
) {
    loop {
        let stream = tokio::select! {
            _ = cancel.cancelled() => break,
            result = listener.accept() => match result {
                Ok((stream, _)) => stream,
                Err(e) => {
                    tracing::error!("Failed to accept IPC connection: {}", e);
                    continue;
                }
            },
        };

        let client = Client {
            status: status.clone(),
            events: event_tx.subscribe(),
            requests_tx: requests_tx.clone(),
            cancel: cancel.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = client.run(stream).await {
                tracing::warn!("IPC client error: {}", e);
            }
        });
    }
}

/// A single connected client
struct Client {
    status: watch::Receiver<AgentStatus>,
    events: broadcast::Receiver<IpcEvent>,
    requests_tx: mpsc::Sender<ControlRequest>,
    cancel: CancellationToken,
}

impl Client {
    async fn run(mut self, stream: UnixStream) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                result = reader.read_line(&mut line) => {
                    if result? == 0 {
                        break;
                    }
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        line.clear();
                        continue;
                    }

                    let response = match serde_json::from_str::<IpcRequest>(trimmed) {
                        Ok(request) => self.handle_request(request).await,
                        Err(e) => IpcResponse::Error {
                            message: format!("Invalid request: {}", e),
                        },
                    };
                    line.clear();

                    if !self.write(&mut writer, IpcMessage::from(response)).await? {
                        break;
                    }
                }

                result = self.events.recv() => match result {
                    Ok(event) => {
                        if !self.write(&mut writer, IpcMessage::from(event)).await? {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("IPC client lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        Ok(())
    }

    /// Write one message line; `false` if the server stopped first
    async fn write(&self, writer: &mut OwnedWriteHalf, message: IpcMessage) -> Result<bool> {
        let line = message.to_line()?;
        tokio::select! {
            result = writer.write_all(line.as_bytes()) => {
                result?;
                Ok(true)
            }
            _ = self.cancel.cancelled() => Ok(false),
        }
    }

    async fn handle_request(&self, request: IpcRequest) -> IpcResponse {
        match request {
            IpcRequest::GetStatus => IpcResponse::Status(self.status.borrow().clone()),
            IpcRequest::Ping => IpcResponse::Pong,
            IpcRequest::ReLogin => match self.relogin().await {
                Ok(()) => IpcResponse::Ok,
                Err(message) => IpcResponse::Error { message },
            },
        }
    }

    async fn relogin(&self) -> Result<(), String> {
        let (reply, result) = oneshot::channel();
        tokio::select! {
            sent = self.requests_tx.send(ControlRequest::ReLogin { reply }) => {
                sent.map_err(|_| "agent is not running".to_string())?;
            }
            _ = self.cancel.cancelled() => return Err("agent is stopping".to_string()),
        }

        tokio::select! {
            result = result => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err("agent dropped the request".to_string()),
            },
            _ = self.cancel.cancelled() => Err("agent is stopping".to_string()),
        }
    }
}
