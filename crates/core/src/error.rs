//! Error types

use thiserror::Error;

use crate::types::{Layout, Location};

/// Engine Result type
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine error types
#[derive(Debug, Error)]
pub enum EngineError {
    // Caller errors, detected before any work is scheduled
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Tile placement errors
    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Layout conversion {from:?} -> {to:?} not supported on {location}")]
    Layout {
        location: Location,
        from: Layout,
        to: Layout,
    },

    #[error("Unsupported backend: {0}")]
    UnsupportedBackend(String),

    // Failures captured inside tasks or queue jobs
    #[error("Kernel error: {context}")]
    Kernel {
        context: String,
        #[source]
        source: Option<Box<EngineError>>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Kernel failure without an underlying cause
    pub fn kernel(context: impl Into<String>) -> Self {
        EngineError::Kernel {
            context: context.into(),
            source: None,
        }
    }

    /// Wrap a failure captured from a task or queue job
    pub fn from_task(context: impl Into<String>, source: EngineError) -> Self {
        EngineError::Kernel {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Follow `Kernel` wrappers down to the first recorded failure
    pub fn root_cause(&self) -> &EngineError {
        let mut current = self;
        while let EngineError::Kernel {
            source: Some(inner),
            ..
        } = current
        {
            current = inner;
        }
        current
    }

    /// True for failures raised synchronously before scheduling
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, EngineError::InvalidArgument(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_unwraps_kernel_chain() {
        let inner = EngineError::Resource("device 3 out of range".into());
        let err = EngineError::from_task("outer", EngineError::from_task("inner", inner));
        assert!(matches!(err.root_cause(), EngineError::Resource(_)));
    }

    #[test]
    fn test_layout_display() {
        let err = EngineError::Layout {
            location: Location::Device(1),
            from: Layout::ColMajor,
            to: Layout::RowMajor,
        };
        assert_eq!(
            err.to_string(),
            "Layout conversion ColMajor -> RowMajor not supported on device 1"
        );
    }
}
