//! Cancellation of blocked waiters.
//!
//! Two level-triggered flags, one per wait direction, read and written under
//! the queue lock. Setting them wakes every waiter; queue contents are left
//! untouched.

use crate::error::QueueError;

/// Caller context for [`CaptureQueue::enqueue_wait`](crate::CaptureQueue::enqueue_wait).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Recovery {
    /// Normal operation: a cancelled wait is a hard failure.
    #[default]
    Idle,
    /// The session is recovering: a cancelled wait reports
    /// [`QueueError::Timeout`] so the caller can retry afterwards.
    InProgress,
}

impl Recovery {
    /// Error an enqueue wait returns when cancelled in this context.
    pub(crate) fn cancelled_error(self) -> QueueError {
        match self {
            Recovery::InProgress => QueueError::Timeout,
            Recovery::Idle => QueueError::Failed("enqueue wait cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CancelFlags {
    full_wait: bool,
    empty_wait: bool,
}

impl CancelFlags {
    pub(crate) fn cancel_all(&mut self) {
        self.full_wait = true;
        self.empty_wait = true;
    }

    pub(crate) fn enable_all(&mut self) {
        self.full_wait = false;
        self.empty_wait = false;
    }

    /// Enqueue waiters must give up.
    pub(crate) fn full_wait_cancelled(&self) -> bool {
        self.full_wait
    }

    /// Dequeue waiters must give up.
    pub(crate) fn empty_wait_cancelled(&self) -> bool {
        self.empty_wait
    }

    pub(crate) fn any(&self) -> bool {
        self.full_wait || self.empty_wait
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_and_rearm() {
        let mut flags = CancelFlags::default();
        assert!(!flags.any());
        flags.cancel_all();
        assert!(flags.full_wait_cancelled());
        assert!(flags.empty_wait_cancelled());
        flags.enable_all();
        assert_eq!(flags, CancelFlags::default());
        // Re-arming an idle controller changes nothing.
        flags.enable_all();
        assert!(!flags.any());
    }

    #[test]
    fn recovery_maps_cancellation() {
        assert_eq!(Recovery::InProgress.cancelled_error(), QueueError::Timeout);
        assert!(matches!(
            Recovery::Idle.cancelled_error(),
            QueueError::Failed(_)
        ));
    }
}
