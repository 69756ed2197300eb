//! Filter deciding which events change what a user can see.

use crate::events::{Event, EventPayload};
use crate::upstream::domain::ConnectionState;

/// Returns whether `event` changes the user-visible status of its server.
///
/// Configuration changes and tool updates always do. A state change does
/// when it crosses the connected, error or connecting boundary; moves
/// between the connecting sub-phases do not.
#[must_use]
pub fn is_significant(event: &Event) -> bool {
    match *event.payload() {
        EventPayload::StateChange { old, new } => crosses_visible_boundary(old, new),
        EventPayload::ConfigChange { .. } | EventPayload::ToolsUpdated { .. } => true,
    }
}

const fn crosses_visible_boundary(old: ConnectionState, new: ConnectionState) -> bool {
    old.is_connected() != new.is_connected()
        || old.is_error() != new.is_error()
        || old.is_connecting() != new.is_connecting()
}
