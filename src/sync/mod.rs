//! Debounced synchronization of the user-facing status view.
//!
//! Connection and configuration events arrive in bursts. The
//! [`SynchronizationManager`] filters them for user-visible significance,
//! waits for a burst to go quiet and then refreshes either the changed
//! servers or, under heavy churn, the whole [`StatusView`].

mod buffer;
mod manager;
mod significance;
mod view;

pub use buffer::{DebounceBuffer, FlushPlan};
pub use manager::{SyncHandle, SyncStats, SynchronizationManager};
pub use significance::is_significant;
pub use view::{InMemoryStatusView, StatusView, StatusViewError, StatusViewResult, ViewActivity};
