//! Error types for AutoDMA buffer and decode operations.
//!
//! Errors fall into two families. Configuration and layout errors are
//! software bugs (contradictory geometry, a decode shape that does not match
//! the buffer) and should surface loudly. Driver, allocation and timeout
//! errors originate from the board; of these only [`AlazarError::Timeout`]
//! is worth retrying.

use std::time::Duration;

use thiserror::Error;

use crate::driver::ElementWidth;

/// Result type alias for digitizer data-plane operations.
pub type Result<T> = std::result::Result<T, AlazarError>;

/// Errors that can occur while sizing, owning or decoding DMA buffers.
#[derive(Error, Debug)]
pub enum AlazarError {
    /// Contradictory or invalid acquisition geometry
    #[error("Invalid configuration: {message}")]
    Configuration { message: String },

    /// The driver refused to reserve DMA memory
    #[error("Failed to allocate {size_bytes}-byte {width} DMA buffer: {message}")]
    Allocation {
        width: ElementWidth,
        size_bytes: usize,
        message: String,
    },

    /// Buffer contents inconsistent with the requested decode shape
    #[error("Layout error: {message}")]
    Layout { message: String },

    /// A blocking wait exceeded its deadline
    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// Non-success return code from the driver
    #[error("{operation}({args}) failed with code {code}: {message}")]
    Driver {
        operation: &'static str,
        args: String,
        code: u32,
        message: String,
    },

    /// The acquisition was aborted; no further buffers will complete
    #[error("Acquisition aborted")]
    Aborted,

    /// A buffer operation was attempted from the wrong ownership state
    #[error("Invalid buffer state: {message}")]
    InvalidState { message: String },

    /// Configuration file or environment could not be loaded
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(#[from] Box<figment::Error>),
}

impl AlazarError {
    /// Shorthand for a [`AlazarError::Configuration`] error.
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Shorthand for a [`AlazarError::Layout`] error.
    pub(crate) fn layout(message: impl Into<String>) -> Self {
        Self::Layout {
            message: message.into(),
        }
    }

    /// Build a timeout error for `operation` waiting `timeout`.
    pub(crate) fn timeout(operation: &'static str, timeout: Duration) -> Self {
        Self::Timeout {
            operation,
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Classify a wait return code that is not a plain driver failure.
    ///
    /// `ApiWaitTimeout` leaves the buffer posted and maps to
    /// [`AlazarError::Timeout`]; `ApiWaitCanceled` means the transfer was
    /// aborted and maps to [`AlazarError::Aborted`].
    #[cfg_attr(not(feature = "hardware"), allow(dead_code))]
    pub(crate) fn from_wait_code(
        operation: &'static str,
        code: u32,
        timeout: Duration,
    ) -> Option<Self> {
        match code {
            ats_sys::ApiWaitTimeout => Some(Self::timeout(operation, timeout)),
            ats_sys::ApiWaitCanceled => Some(Self::Aborted),
            _ => None,
        }
    }

    /// Check if the caller may retry the failed operation.
    ///
    /// Only wait timeouts are recoverable; everything else means the
    /// acquisition should be aborted.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this error was caused by an invalid configuration.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::ConfigLoad(_))
    }

    /// Check if this error was signalled by the board or its driver.
    #[must_use]
    pub fn is_hardware(&self) -> bool {
        matches!(
            self,
            Self::Driver { .. } | Self::Allocation { .. } | Self::Aborted
        )
    }
}

impl From<figment::Error> for AlazarError {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AlazarError::Driver {
            operation: "AlazarPostAsyncBuffer",
            args: "buffer=0x1000, length=4096".to_string(),
            code: 513,
            message: "ApiFailed".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("AlazarPostAsyncBuffer"));
        assert!(text.contains("length=4096"));
        assert!(text.contains("513"));
    }

    #[test]
    fn test_allocation_display() {
        let err = AlazarError::Allocation {
            width: ElementWidth::U16,
            size_bytes: 8192,
            message: "null handle".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to allocate 8192-byte u16 DMA buffer: null handle"
        );
    }

    #[test]
    fn test_classification() {
        let timeout = AlazarError::timeout("AlazarWaitAsyncBufferComplete", Duration::from_secs(10));
        assert!(timeout.is_recoverable());
        assert!(!timeout.is_hardware());
        assert!(timeout.to_string().contains("10000 ms"));

        let config = AlazarError::config("header and footer both enabled");
        assert!(config.is_configuration());
        assert!(!config.is_recoverable());

        assert!(AlazarError::Aborted.is_hardware());
        assert!(!AlazarError::layout("short buffer").is_hardware());
    }

    #[test]
    fn test_wait_codes() {
        let wait = Duration::from_millis(250);
        let err = AlazarError::from_wait_code("AlazarWaitAsyncBufferComplete", ats_sys::ApiWaitTimeout, wait);
        assert!(matches!(err, Some(AlazarError::Timeout { timeout_ms: 250, .. })));
        let err = AlazarError::from_wait_code("AlazarWaitAsyncBufferComplete", ats_sys::ApiWaitCanceled, wait);
        assert!(matches!(err, Some(AlazarError::Aborted)));
        assert!(AlazarError::from_wait_code("AlazarWaitAsyncBufferComplete", ats_sys::ApiFailed, wait).is_none());
    }
}
