//! fwid-krb: Kerberos file formats for the firewall identity agent
//!
//! This crate parses the two files the agent watches: the MIT credential
//! cache holding the user's tickets and the Kerberos library configuration.
//! It performs no I/O of its own.

pub mod ccache;
pub mod error;
pub mod krb5conf;

pub use ccache::{CCache, Credential, Principal, MIN_CCACHE_LEN};
pub use error::KrbError;
pub use krb5conf::{ConfValue, Krb5Config};
