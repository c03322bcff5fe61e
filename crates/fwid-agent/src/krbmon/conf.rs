//! Kerberos configuration monitor

use std::path::PathBuf;
use std::sync::Arc;

use fwid_core::error::MonitorError;
use fwid_krb::Krb5Config;

use super::watcher::{FileMonitor, SnapshotLoader};

/// A changed Kerberos configuration
#[derive(Debug, Clone)]
pub struct ConfUpdate {
    pub config: Arc<Krb5Config>,
}

impl From<Arc<Krb5Config>> for ConfUpdate {
    fn from(config: Arc<Krb5Config>) -> Self {
        Self { config }
    }
}

/// Loads a krb5.conf file
pub struct ConfLoader {
    path: PathBuf,
}

impl SnapshotLoader for ConfLoader {
    type Snapshot = Krb5Config;
    type Update = ConfUpdate;

    fn name(&self) -> &'static str {
        "Kerberos Config Monitor"
    }

    fn path(&self) -> Result<PathBuf, MonitorError> {
        Ok(self.path.clone())
    }

    fn parse(&self, data: &[u8]) -> Result<Krb5Config, String> {
        let text = std::str::from_utf8(data).map_err(|e| e.to_string())?;
        Krb5Config::parse(text).map_err(|e| e.to_string())
    }
}

/// Monitor for the Kerberos library configuration
pub type ConfMonitor = FileMonitor<ConfLoader>;

impl ConfMonitor {
    /// Watch the configuration at `path`
    pub fn for_file(path: impl Into<PathBuf>) -> Self {
        FileMonitor::new(ConfLoader { path: path.into() })
    }
}
