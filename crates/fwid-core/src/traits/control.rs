//! Control surface trait

use tokio::sync::oneshot;

use super::EventSource;
use crate::error::ReLoginError;
use crate::types::Property;

/// Request from the control surface to the agent
#[derive(Debug)]
pub enum ControlRequest {
    /// Replace the running session; the outcome is sent on `reply`
    ReLogin {
        reply: oneshot::Sender<Result<(), ReLoginError>>,
    },
}

/// Surface exposing agent properties to the rest of the system and
/// forwarding requests to the agent
pub trait ControlSurface: EventSource<Event = ControlRequest> {
    /// Publish a property change
    fn set_property(&self, property: Property);
}
