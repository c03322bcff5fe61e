//! IPC protocol between local clients and the agent's control socket
//!
//! Messages are JSON objects, one per line, over a Unix domain socket.

use serde::{Deserialize, Serialize};

use crate::time::INVALID_TIMESTAMP;
use crate::types::Property;

/// IPC request from a client to the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Get all published properties
    GetStatus,

    /// Replace the running session (only on a trusted network)
    ReLogin,

    /// Ping (for keepalive)
    Ping,
}

/// IPC response from the agent to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Published properties
    Status(AgentStatus),

    /// Generic success
    Ok,

    /// Error response
    Error { message: String },

    /// Pong response
    Pong,
}

/// IPC event pushed to every connected client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcEvent {
    /// A property changed
    PropertyChanged {
        name: String,
        value: serde_json::Value,
    },
}

impl From<&Property> for IpcEvent {
    fn from(property: &Property) -> Self {
        IpcEvent::PropertyChanged {
            name: property.name().to_string(),
            value: property.value(),
        }
    }
}

/// Snapshot of all published properties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    /// Effective configuration as JSON, empty until the agent started
    pub config: String,
    pub trusted_network: u32,
    pub login_state: u32,
    pub last_keep_alive_at: i64,
    #[serde(rename = "kerberosTGTStartTime")]
    pub kerberos_tgt_start_time: i64,
    #[serde(rename = "kerberosTGTEndTime")]
    pub kerberos_tgt_end_time: i64,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self {
            config: String::new(),
            trusted_network: 0,
            login_state: 0,
            last_keep_alive_at: INVALID_TIMESTAMP,
            kerberos_tgt_start_time: INVALID_TIMESTAMP,
            kerberos_tgt_end_time: INVALID_TIMESTAMP,
        }
    }
}

impl AgentStatus {
    /// Record a property change
    pub fn apply(&mut self, property: &Property) {
        let value = property.value();
        match property {
            Property::Config(json) => self.config = json.clone(),
            Property::TrustedNetwork(state) => self.trusted_network = state.as_u32(),
            Property::LoginState(state) => self.login_state = state.as_u32(),
            Property::LastKeepAliveAt(_) => {
                self.last_keep_alive_at = value.as_i64().unwrap_or(INVALID_TIMESTAMP)
            }
            Property::KerberosTgtStartTime(_) => {
                self.kerberos_tgt_start_time = value.as_i64().unwrap_or(INVALID_TIMESTAMP)
            }
            Property::KerberosTgtEndTime(_) => {
                self.kerberos_tgt_end_time = value.as_i64().unwrap_or(INVALID_TIMESTAMP)
            }
        }
    }
}

/// IPC message wrapper (for framing)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IpcMessage {
    Request(IpcRequest),
    Response(IpcResponse),
    Event(IpcEvent),
}

impl IpcMessage {
    /// Serialize to a single JSON line, including the trailing newline
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Deserialize from a JSON line
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim_end())
    }
}

impl From<IpcRequest> for IpcMessage {
    fn from(req: IpcRequest) -> Self {
        IpcMessage::Request(req)
    }
}

impl From<IpcResponse> for IpcMessage {
    fn from(resp: IpcResponse) -> Self {
        IpcMessage::Response(resp)
    }
}

impl From<IpcEvent> for IpcMessage {
    fn from(event: IpcEvent) -> Self {
        IpcMessage::Event(event)
    }
}
