//! Queue construction parameters.

use crate::error::{QueueError, Result};

/// Initial state of every slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CreatedAs {
    /// All slots free.
    #[default]
    Empty,
    /// All slots in use, as if filled with records before startup. Each one
    /// must be dequeued and released before it can be reused.
    Full,
}

/// Configuration for a [`CaptureQueue`](crate::CaptureQueue).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Name used in log events and state dumps.
    pub name: String,
    /// Number of slots.
    pub capacity: usize,
    /// Stream buffer entries reserved per capture request.
    pub stream_buffers_per_request: usize,
    /// Initial slot state.
    pub created_as: CreatedAs,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "capture-queue".to_string(),
            capacity: 8,
            stream_buffers_per_request: 1,
            created_as: CreatedAs::Empty,
        }
    }
}

impl QueueConfig {
    /// Config with the given sizing and defaults for everything else.
    pub fn new(capacity: usize, stream_buffers_per_request: usize) -> Self {
        Self {
            capacity,
            stream_buffers_per_request,
            ..Self::default()
        }
    }

    /// Set a custom name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the initial slot state.
    pub fn created_as(mut self, created_as: CreatedAs) -> Self {
        self.created_as = created_as;
        self
    }

    /// Reject sizing the queue cannot be built with.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(QueueError::Failed("capacity must be non-zero"));
        }
        if self.capacity > u32::MAX as usize {
            return Err(QueueError::InvalidArgument(format!(
                "capacity {} exceeds slot index range",
                self.capacity
            )));
        }
        if self.stream_buffers_per_request == 0 {
            return Err(QueueError::InvalidArgument(
                "stream buffers per request must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder() {
        let config = QueueConfig::new(4, 2)
            .with_name("session-0")
            .created_as(CreatedAs::Full);
        assert_eq!(config.name, "session-0");
        assert_eq!(config.capacity, 4);
        assert_eq!(config.stream_buffers_per_request, 2);
        assert_eq!(config.created_as, CreatedAs::Full);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_sizes_rejected() {
        assert_eq!(
            QueueConfig::new(0, 1).validate(),
            Err(QueueError::Failed("capacity must be non-zero"))
        );
        assert!(matches!(
            QueueConfig::new(4, 0).validate(),
            Err(QueueError::InvalidArgument(_))
        ));
    }
}
