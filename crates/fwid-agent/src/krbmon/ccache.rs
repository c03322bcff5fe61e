//! Credential cache monitor

use std::path::PathBuf;
use std::sync::Arc;

use fwid_core::error::MonitorError;
use fwid_krb::{CCache, Credential};

use super::watcher::{FileMonitor, SnapshotLoader};

/// Environment variable naming the credential cache
pub const KRB5CCNAME: &str = "KRB5CCNAME";

/// A changed credential cache
#[derive(Debug, Clone)]
pub struct CCacheUpdate {
    pub ccache: Arc<CCache>,
}

impl CCacheUpdate {
    /// Ticket-granting ticket for `realm`, if the cache holds one
    pub fn tgt(&self, realm: &str) -> Option<&Credential> {
        self.ccache.tgt(realm)
    }
}

impl From<Arc<CCache>> for CCacheUpdate {
    fn from(ccache: Arc<CCache>) -> Self {
        Self { ccache }
    }
}

/// Loads the user's credential cache file
pub struct CCacheLoader {
    path_override: Option<PathBuf>,
}

impl SnapshotLoader for CCacheLoader {
    type Snapshot = CCache;
    type Update = CCacheUpdate;

    fn name(&self) -> &'static str {
        "Kerberos CCache Monitor"
    }

    fn path(&self) -> Result<PathBuf, MonitorError> {
        ccache_path(self.path_override.clone())
    }

    fn parse(&self, data: &[u8]) -> Result<CCache, String> {
        CCache::parse(data).map_err(|e| e.to_string())
    }
}

/// Monitor for the user's credential cache
pub type CCacheMonitor = FileMonitor<CCacheLoader>;

impl CCacheMonitor {
    /// Watch the cache named by `KRB5CCNAME`, or `path_override` if given
    pub fn for_user(path_override: Option<PathBuf>) -> Self {
        FileMonitor::new(CCacheLoader { path_override })
    }
}

/// Resolve the credential cache file.
///
/// An explicit path wins; otherwise `KRB5CCNAME` is used when it names a
/// `FILE:` cache, falling back to `/tmp/krb5cc_<uid>`.
pub fn ccache_path(path_override: Option<PathBuf>) -> Result<PathBuf, MonitorError> {
    if let Some(path) = path_override {
        return Ok(path);
    }
    ccache_path_from(std::env::var(KRB5CCNAME).ok(), current_uid())
}

fn ccache_path_from(env: Option<String>, uid: Option<u32>) -> Result<PathBuf, MonitorError> {
    let fallback = || {
        uid.map(|uid| format!("FILE:/tmp/krb5cc_{}", uid))
            .ok_or_else(|| MonitorError::CCachePath("cannot determine user id".to_string()))
    };

    let value = match env {
        Some(value) if value.starts_with("FILE:") => value,
        Some(value) if !value.is_empty() => {
            let new = fallback()?;
            tracing::error!(
                "Invalid {} {:?} (only FILE: caches are supported), using {:?}",
                KRB5CCNAME,
                value,
                new
            );
            new
        }
        _ => {
            let new = fallback()?;
            tracing::debug!("{} not set, using {:?}", KRB5CCNAME, new);
            new
        }
    };

    let path = value.trim_start_matches("FILE:");
    if path.is_empty() {
        return Err(MonitorError::CCachePath(format!("{} names no file", KRB5CCNAME)));
    }
    Ok(PathBuf::from(path))
}

#[cfg(unix)]
fn current_uid() -> Option<u32> {
    // SAFETY: getuid has no preconditions and cannot fail
    Some(unsafe { libc::getuid() })
}

#[cfg(not(unix))]
fn current_uid() -> Option<u32> {
    None
}
