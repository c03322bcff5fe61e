//! Desktop notification trait

/// Shows user-facing notifications
pub trait Notifier: Send + Sync {
    /// Show a notification
    fn notify(&self, title: &str, message: &str);
}
