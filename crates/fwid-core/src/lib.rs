//! fwid-core: Core abstractions and configuration for the firewall identity agent
//!
//! This crate provides the shared status types, configuration structures,
//! error taxonomy and the capability traits through which the agent talks
//! to its collaborators (monitors, trust detection, the control surface
//! and desktop notifications).

pub mod config;
pub mod error;
pub mod ipc;
pub mod time;
pub mod traits;
pub mod types;

pub use error::FwidError;
pub use types::{KerberosTicket, LoginState, Property, SleepEvent, TrustedNetworkState};
