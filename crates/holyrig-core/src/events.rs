//! Runtime state and status change events.
//!
//! Each rig task publishes its lifecycle state through a `watch` channel and
//! emits [`StatusEvent`]s after every successful poll that changed the
//! status vector. The subscription manager consumes status events and fans
//! them out to clients; the dispatcher consumes [`LinkEvent`]s to keep the
//! `list_rigs` view current.

use std::collections::BTreeMap;
use std::fmt;

use crate::value::Value;

/// The lifecycle state of a rig runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RigState {
    /// No serial channel is open yet.
    NotConnected,
    /// The channel is open and init frames are being exchanged.
    Initializing,
    /// Init completed; commands and status polls are being dispatched.
    Online,
    /// Repeated exchange failures; periodic reconnection attempts run.
    NotResponding,
    /// Administratively disabled. No I/O is performed and command
    /// submissions are rejected.
    Disabled,
}

impl RigState {
    /// Whether clients should see this rig as connected in `list_rigs`.
    pub fn is_connected(&self) -> bool {
        matches!(self, RigState::Online)
    }
}

impl fmt::Display for RigState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RigState::NotConnected => "not_connected",
            RigState::Initializing => "initializing",
            RigState::Online => "online",
            RigState::NotResponding => "not_responding",
            RigState::Disabled => "disabled",
        };
        write!(f, "{name}")
    }
}

/// A batch of status field changes observed by one rig.
///
/// `changed` lists only the fields whose value differs from the previous
/// poll; `values` carries the new value for each changed field. The full
/// status vector stays private to the rig task.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    /// The rig that observed the change.
    pub rig_id: String,
    /// New values for the changed fields only.
    pub values: BTreeMap<String, Value>,
}

/// A rig link state transition, delivered alongside status updates.
#[derive(Debug, Clone)]
pub struct LinkEvent {
    /// The rig whose link state changed.
    pub rig_id: String,
    /// The new state.
    pub state: RigState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_online_counts_as_connected() {
        assert!(RigState::Online.is_connected());
        assert!(!RigState::NotConnected.is_connected());
        assert!(!RigState::Initializing.is_connected());
        assert!(!RigState::NotResponding.is_connected());
        assert!(!RigState::Disabled.is_connected());
    }

    #[test]
    fn state_display_names() {
        assert_eq!(RigState::Online.to_string(), "online");
        assert_eq!(RigState::NotResponding.to_string(), "not_responding");
    }
}
