//! Error types for the capture queue.

use thiserror::Error;

/// Result type alias using the queue's error.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Errors reported by queue construction and queue operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// A caller-supplied value is out of range (too many pipelines,
    /// more stream buffers than a slot holds, zero sizing).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A slot's stream buffer region no longer belongs to that slot.
    ///
    /// Only happens when a region is moved between slots behind the
    /// queue's back, e.g. swapped between two dequeued handles.
    /// Also returned when a released slot fails its signature check.
    #[error("invalid pointer: {0}")]
    InvalidPointer(String),

    /// The slot arena could not be allocated.
    #[error("failed to allocate {bytes} bytes for the slot arena")]
    NoMemory {
        /// Size of the failed request.
        bytes: usize,
    },

    /// An enqueue wait was cancelled while recovery is in progress.
    #[error("wait cancelled during recovery")]
    Timeout,

    /// Definitive failure: queue full, wait cancelled, or zero capacity.
    #[error("operation failed: {0}")]
    Failed(&'static str),
}

impl QueueError {
    /// Whether the caller may retry once recovery completes.
    ///
    /// Every other error is fatal to the in-flight request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_timeout_is_retryable() {
        assert!(QueueError::Timeout.is_retryable());
        assert!(!QueueError::Failed("queue is full").is_retryable());
        assert!(!QueueError::InvalidPointer("slot 0".into()).is_retryable());
        assert!(!QueueError::NoMemory { bytes: 64 }.is_retryable());
    }

    #[test]
    fn display_messages() {
        let err = QueueError::InvalidPointer("slot 3 pipeline 1 region not bound".into());
        assert_eq!(err.to_string(), "invalid pointer: slot 3 pipeline 1 region not bound");
        assert_eq!(
            QueueError::Failed("queue is full").to_string(),
            "operation failed: queue is full"
        );
    }
}
