//! Kerberos file monitors
//!
//! Watch the credential cache and the Kerberos configuration, parse them
//! on change and emit an update only when the parsed contents differ from
//! the last ones seen.

mod ccache;
mod conf;
mod watcher;

pub use ccache::{ccache_path, CCacheLoader, CCacheMonitor, CCacheUpdate, KRB5CCNAME};
pub use conf::{ConfLoader, ConfMonitor, ConfUpdate};
pub use watcher::{FileMonitor, SnapshotLoader};
