//! Capability traits the agent uses to talk to its collaborators

mod control;
mod notifier;
mod source;

pub use control::{ControlRequest, ControlSurface};
pub use notifier::Notifier;
pub use source::{EventSource, TrustDetector};
