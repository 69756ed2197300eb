//! Typed event bus connecting connection producers to their consumers.
//!
//! Three event kinds flow through the bus: connection state changes,
//! configuration changes and tool discovery results. The bus is an
//! explicitly constructed value; clone it to share it.

mod bus;
mod error;
mod event;

pub use bus::{
    BusMetrics, DEFAULT_SUBSCRIPTION_CAPACITY, EventBus, PublishReport, Subscription,
    SubscriptionId,
};
pub use error::EventError;
pub use event::{ConfigAction, Event, EventKind, EventPayload};
