//! Pending-update set and debounce deadline.

use crate::upstream::domain::ServerName;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::Instant;

/// Work produced by flushing the pending set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushPlan {
    /// Rebuild the whole status view.
    Full {
        /// Servers that changed during the window.
        changed: usize,
    },
    /// Refresh only these servers, in name order.
    Targeted(Vec<ServerName>),
}

/// Collects servers with pending status changes and tracks when they are
/// due.
///
/// Every recorded change pushes the deadline out by the full window, so a
/// burst is flushed once it has gone quiet. Time is supplied by the
/// caller.
#[derive(Debug, Clone)]
pub struct DebounceBuffer {
    window: Duration,
    full_resync_threshold: usize,
    pending: BTreeSet<ServerName>,
    deadline: Option<Instant>,
}

impl DebounceBuffer {
    /// Creates an empty buffer.
    ///
    /// A flush with more than `full_resync_threshold` pending servers is
    /// planned as a full resynchronization.
    #[must_use]
    pub const fn new(window: Duration, full_resync_threshold: usize) -> Self {
        Self {
            window,
            full_resync_threshold,
            pending: BTreeSet::new(),
            deadline: None,
        }
    }

    /// Marks `server` as changed at `now` and restarts the window.
    pub fn record(&mut self, server: ServerName, now: Instant) {
        self.pending.insert(server);
        self.deadline = Some(now + self.window);
    }

    /// Returns when the pending set is due, if anything is pending.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns how many servers are pending.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Takes the pending set when its deadline has passed at `now`.
    pub fn take_due(&mut self, now: Instant) -> Option<FlushPlan> {
        match self.deadline {
            Some(deadline) if deadline <= now => self.drain(),
            _ => None,
        }
    }

    /// Takes the pending set regardless of the deadline.
    pub fn drain(&mut self) -> Option<FlushPlan> {
        self.deadline = None;
        if self.pending.is_empty() {
            return None;
        }

        let pending = std::mem::take(&mut self.pending);
        if pending.len() > self.full_resync_threshold {
            Some(FlushPlan::Full {
                changed: pending.len(),
            })
        } else {
            Some(FlushPlan::Targeted(pending.into_iter().collect()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const WINDOW: Duration = Duration::from_millis(100);

    fn name(raw: &str) -> ServerName {
        ServerName::new(raw).expect("valid server name")
    }

    #[test]
    fn repeated_changes_collapse_into_one_entry() {
        let start = Instant::now();
        let mut buffer = DebounceBuffer::new(WINDOW, 5);
        for step in 0..5_u64 {
            buffer.record(name("github"), start + Duration::from_millis(step * 10));
        }

        assert_eq!(buffer.take_due(start + Duration::from_millis(100)), None);
        assert_eq!(
            buffer.take_due(start + Duration::from_millis(140)),
            Some(FlushPlan::Targeted(vec![name("github")]))
        );
        assert_eq!(buffer.pending_len(), 0);
        assert_eq!(buffer.deadline(), None);
    }

    #[rstest]
    #[case(4, false)]
    #[case(5, false)]
    #[case(6, true)]
    fn bursts_above_threshold_plan_full_resync(#[case] servers: usize, #[case] full: bool) {
        let now = Instant::now();
        let mut buffer = DebounceBuffer::new(WINDOW, 5);
        for index in 0..servers {
            buffer.record(name(&format!("server-{index}")), now);
        }

        let plan = buffer.take_due(now + WINDOW).expect("flush due");

        match plan {
            FlushPlan::Full { changed } => {
                assert!(full);
                assert_eq!(changed, servers);
            }
            FlushPlan::Targeted(names) => {
                assert!(!full);
                assert_eq!(names.len(), servers);
            }
        }
    }

    #[test]
    fn drain_ignores_deadline_and_empty_buffer() {
        let now = Instant::now();
        let mut buffer = DebounceBuffer::new(WINDOW, 5);
        assert_eq!(buffer.drain(), None);

        buffer.record(name("github"), now);

        assert_eq!(
            buffer.drain(),
            Some(FlushPlan::Targeted(vec![name("github")]))
        );
    }
}
