use thiserror::Error;

/// Unified error type for the pool and its execution units
#[derive(Debug, Error)]
pub enum PoolError {
    /// A unit failed to spawn or did not complete the ready handshake
    #[error("Unit {unit} failed to start: {message}")]
    Startup { unit: usize, message: String },

    /// Another invocation is still being dispatched on this pool
    #[error("Worker pool is busy processing '{operation}'")]
    Busy { operation: String },

    /// The module loaded into the units does not export this operation
    #[error("Unknown operation: {operation}")]
    UnknownOperation { operation: String },

    /// A unit reported that the operation failed for one input
    #[error("Operation '{operation}' failed for index {index}: {message}")]
    TaskFailed {
        operation: String,
        index: usize,
        message: String,
    },

    /// A unit sent a frame that does not follow the wire protocol
    #[error("Protocol violation from unit {unit}: {message}")]
    Protocol { unit: usize, message: String },

    /// A message could not be delivered to a unit
    #[error("Transport error for unit {unit}: {message}")]
    Transport { unit: usize, message: String },

    /// A unit went away while it still owned an input
    #[error("Unit {unit} exited while processing index {index}")]
    UnitExited { unit: usize, index: usize },

    /// The pool has been destroyed
    #[error("Worker pool has been destroyed")]
    Closed,

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PoolError {
    /// Create a startup error for a unit
    pub fn startup<M: Into<String>>(unit: usize, message: M) -> Self {
        Self::Startup {
            unit,
            message: message.into(),
        }
    }

    /// Create a protocol error for a unit
    pub fn protocol<M: Into<String>>(unit: usize, message: M) -> Self {
        Self::Protocol {
            unit,
            message: message.into(),
        }
    }

    /// Create a transport error for a unit
    pub fn transport<M: Into<String>>(unit: usize, message: M) -> Self {
        Self::Transport {
            unit,
            message: message.into(),
        }
    }

    /// Create a configuration error tied to a field
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Whether the pool is still usable after this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Busy { .. } | Self::UnknownOperation { .. } | Self::TaskFailed { .. } => true,
            Self::Json(_) => true,
            Self::Protocol { .. } | Self::Transport { .. } | Self::UnitExited { .. } => false,
            Self::Startup { .. } | Self::Closed | Self::Configuration { .. } => false,
            _ => false,
        }
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Startup { .. } => "startup",
            Self::Busy { .. } => "busy",
            Self::UnknownOperation { .. } => "operation",
            Self::TaskFailed { .. } => "task",
            Self::Protocol { .. } => "protocol",
            Self::Transport { .. } | Self::UnitExited { .. } => "transport",
            Self::Closed => "closed",
            Self::Configuration { .. } => "configuration",
            Self::Io(_) => "io",
            Self::Json(_) | Self::Yaml(_) => "serialization",
            Self::Internal(_) => "internal",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, PoolError>;
