//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::time::published_timestamp;

/// Whether the machine is attached to a trusted network
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustedNetworkState {
    /// No detector result yet
    #[default]
    Unknown,
    /// Not on a trusted network
    NotTrusted,
    /// On a trusted network
    Trusted,
}

impl TrustedNetworkState {
    /// Numeric value published to observers
    pub fn as_u32(self) -> u32 {
        match self {
            TrustedNetworkState::Unknown => 0,
            TrustedNetworkState::NotTrusted => 1,
            TrustedNetworkState::Trusted => 2,
        }
    }
}

impl From<bool> for TrustedNetworkState {
    fn from(trusted: bool) -> Self {
        if trusted {
            TrustedNetworkState::Trusted
        } else {
            TrustedNetworkState::NotTrusted
        }
    }
}

impl fmt::Display for TrustedNetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrustedNetworkState::Unknown => "unknown",
            TrustedNetworkState::NotTrusted => "not trusted",
            TrustedNetworkState::Trusted => "trusted",
        };
        f.write_str(s)
    }
}

/// Lifecycle of the authenticated session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginState {
    #[default]
    Unknown,
    LoggedOut,
    LoggingIn,
    LoggedIn,
    LoggingOut,
}

impl LoginState {
    /// Numeric value published to observers
    pub fn as_u32(self) -> u32 {
        match self {
            LoginState::Unknown => 0,
            LoginState::LoggedOut => 1,
            LoginState::LoggingIn => 2,
            LoginState::LoggedIn => 3,
            LoginState::LoggingOut => 4,
        }
    }
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoginState::Unknown => "unknown",
            LoginState::LoggedOut => "logged out",
            LoginState::LoggingIn => "logging in",
            LoginState::LoggedIn => "logged in",
            LoginState::LoggingOut => "logging out",
        };
        f.write_str(s)
    }
}

/// Validity window of the realm's ticket-granting ticket, in Unix seconds
///
/// Zero means no ticket is known. Two tickets are equal when their windows are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KerberosTicket {
    pub start_time: i64,
    pub end_time: i64,
}

impl KerberosTicket {
    /// Create a ticket window
    pub fn new(start_time: i64, end_time: i64) -> Self {
        Self {
            start_time,
            end_time,
        }
    }
}

/// Suspend/resume signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepEvent {
    Sleep,
    Wake,
}

/// A published agent property
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    /// Effective configuration as JSON
    Config(String),
    TrustedNetwork(TrustedNetworkState),
    LoginState(LoginState),
    /// Unix seconds, `-1` if unknown
    LastKeepAliveAt(i64),
    KerberosTgtStartTime(i64),
    KerberosTgtEndTime(i64),
}

impl Property {
    /// Property name as seen by observers
    pub fn name(&self) -> &'static str {
        match self {
            Property::Config(_) => "Config",
            Property::TrustedNetwork(_) => "TrustedNetwork",
            Property::LoginState(_) => "LoginState",
            Property::LastKeepAliveAt(_) => "LastKeepAliveAt",
            Property::KerberosTgtStartTime(_) => "KerberosTGTStartTime",
            Property::KerberosTgtEndTime(_) => "KerberosTGTEndTime",
        }
    }

    /// Property value as seen by observers
    pub fn value(&self) -> serde_json::Value {
        match self {
            Property::Config(json) => serde_json::Value::from(json.as_str()),
            Property::TrustedNetwork(state) => serde_json::Value::from(state.as_u32()),
            Property::LoginState(state) => serde_json::Value::from(state.as_u32()),
            Property::LastKeepAliveAt(t)
            | Property::KerberosTgtStartTime(t)
            | Property::KerberosTgtEndTime(t) => serde_json::Value::from(published_timestamp(*t)),
        }
    }

    /// Every property in its initial (unknown) state
    pub fn initial() -> [Property; 6] {
        [
            Property::Config(String::new()),
            Property::TrustedNetwork(TrustedNetworkState::Unknown),
            Property::LoginState(LoginState::Unknown),
            Property::LastKeepAliveAt(0),
            Property::KerberosTgtStartTime(0),
            Property::KerberosTgtEndTime(0),
        ]
    }
}
