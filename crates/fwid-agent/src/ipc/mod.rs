//! Control socket for local clients
//!
//! Provides a Unix socket server that status applets and scripts use to
//! read the agent's properties, follow their changes and request a
//! re-login.

mod server;

pub use server::IpcServer;
