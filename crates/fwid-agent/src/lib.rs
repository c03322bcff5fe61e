//! fwid-agent: Kerberos identity agent
//!
//! Keeps an authenticated session with a firewall identity service alive
//! while the machine is on a trusted network. The agent watches the user's
//! credential cache and the Kerberos configuration, probes for the trusted
//! network and publishes its state on a local control socket.

pub mod agent;
pub mod client;
pub mod ipc;
pub mod krbmon;
pub mod notifier;
pub mod sleep;
pub mod tnd;

pub use agent::{Agent, AgentError, AgentParts};
