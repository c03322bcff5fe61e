//! Event source traits

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::MonitorError;

/// A component running its own task that reports events over a channel
///
/// Credential monitors, the trust detector, the sleep monitor and the
/// control surface all share this lifecycle.
#[async_trait]
pub trait EventSource: Send {
    /// Event type delivered on [`EventSource::events`]
    type Event: Send + 'static;

    /// Begin producing events. Failing here aborts agent startup.
    async fn start(&mut self) -> Result<(), MonitorError>;

    /// Stop producing events.
    ///
    /// Returns once the internal task has exited and the event channel
    /// is closed. Stopping a source that is not running is a no-op.
    async fn stop(&mut self);

    /// Channel of events
    fn events(&mut self) -> &mut mpsc::Receiver<Self::Event>;
}

/// Trusted network detection: emits `true` while on a trusted network
pub trait TrustDetector: EventSource<Event = bool> {
    /// Add a server used for detection. Called before [`EventSource::start`].
    fn configure(&mut self, url: &str, hash: &str);
}
