//! User notifications

use std::sync::Arc;
use std::time::Duration;

use fwid_core::traits::Notifier;

const NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(5);
const APP_NAME: &str = "Identity Agent";

/// Desktop notifications over the session notification service.
///
/// All notifications share one id, so a new one replaces the previous.
pub struct DesktopNotifier {
    id: u32,
}

impl DesktopNotifier {
    pub fn new() -> Self {
        Self {
            id: rand::random(),
        }
    }

    fn show(id: u32, title: String, message: String) {
        let mut notification = notify_rust::Notification::new();
        notification
            .appname(APP_NAME)
            .summary(&title)
            .body(&message)
            .timeout(notify_rust::Timeout::Milliseconds(
                NOTIFICATION_TIMEOUT.as_millis() as u32,
            ));
        #[cfg(all(unix, not(target_os = "macos")))]
        notification.id(id);
        #[cfg(not(all(unix, not(target_os = "macos"))))]
        let _ = id;

        if let Err(e) = notification.show() {
            tracing::warn!("Could not show notification '{}': {}", title, e);
        }
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, message: &str) {
        tracing::debug!("Notification: {}: {}", title, message);
        let (id, title, message) = (self.id, title.to_string(), message.to_string());
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || Self::show(id, title, message));
            }
            Err(_) => Self::show(id, title, message),
        }
    }
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Notifier that only writes to the log
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, message: &str) {
        tracing::info!("{}: {}", title, message);
    }
}

/// Desktop notifier when a session bus is available, log notifier otherwise
pub fn default_notifier() -> Arc<dyn Notifier> {
    if std::env::var_os("DBUS_SESSION_BUS_ADDRESS").is_some() {
        Arc::new(DesktopNotifier::new())
    } else {
        Arc::new(LogNotifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_notifier_outside_runtime() {
        LogNotifier.notify("Trusted Network", "Trusted network detected");
    }

    #[test]
    fn test_default_notifier_without_session_bus() {
        if std::env::var_os("DBUS_SESSION_BUS_ADDRESS").is_none() {
            default_notifier().notify("No Trusted Network", "No trusted network detected");
        }
    }
}
