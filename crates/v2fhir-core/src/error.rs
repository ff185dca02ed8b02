//! Error types for the conversion engine
//!
//! Two levels of failure exist. [`ConversionError`] covers data-level problems
//! (a field that will not convert, a code that cannot be mapped, a missing
//! resource) and is always downgraded to an [`Issue`](crate::issues::Issue) by
//! the dispatcher. [`V2FhirError`] covers programming and configuration
//! mistakes and is the only error that aborts a conversion.

use thiserror::Error;

/// Fatal error type for the engine
#[derive(Debug, Error)]
pub enum V2FhirError {
    /// A rule names a converter that was never registered
    #[error("Rule '{rule}' on {structure} references unknown converter '{converter}'")]
    UnknownConverter {
        structure: String,
        rule: String,
        converter: String,
    },

    /// Two handlers were registered for the same structure type
    #[error("Duplicate handler registered for structure type '{structure}'")]
    DuplicateHandler { structure: String },

    /// A rule declaration is malformed (bad address, bad target path)
    #[error("Invalid rule '{rule}' on {structure}: {message}")]
    InvalidRule {
        structure: String,
        rule: String,
        message: String,
    },

    /// A handler reported a failure it cannot recover from
    #[error("Handler failure at {location} ({rule}): {message}")]
    Handler {
        location: String,
        rule: String,
        message: String,
    },

    /// Configuration loading or validation errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Error kind enumeration for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Rule,
    Handler,
    Config,
}

impl V2FhirError {
    /// Get the error kind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            V2FhirError::UnknownConverter { .. } => ErrorKind::Rule,
            V2FhirError::DuplicateHandler { .. } => ErrorKind::Rule,
            V2FhirError::InvalidRule { .. } => ErrorKind::Rule,
            V2FhirError::Handler { .. } => ErrorKind::Handler,
            V2FhirError::Config { .. } => ErrorKind::Config,
        }
    }

    /// Check if this error is recoverable (processing of other messages can continue)
    ///
    /// Every variant aborts the current conversion. A handler failure is tied
    /// to the message being converted, so the engine can take the next one;
    /// rule and configuration errors need a fixed setup first.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Handler)
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Data-level failure raised by a converter or handler
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConversionError {
    /// The raw value cannot be converted to the requested type
    #[error("Cannot convert '{value}' to {target}")]
    InvalidValue { value: String, target: String },

    /// A code could not be mapped through its table
    #[error("Unknown code '{code}' in table {table}")]
    UnknownCode { code: String, table: String },

    /// A resource that a handler depends on does not exist yet
    #[error("No {resource_type} resource available")]
    MissingResource { resource_type: String },

    /// A target attribute path cannot be written
    #[error("Cannot write '{path}': {message}")]
    Path { path: String, message: String },

    /// Escalates to [`V2FhirError::Handler`] and aborts the conversion
    #[error("{0}")]
    Fatal(String),
}

impl ConversionError {
    pub fn invalid_value(value: impl Into<String>, target: impl Into<String>) -> Self {
        Self::InvalidValue {
            value: value.into(),
            target: target.into(),
        }
    }

    pub fn missing_resource(resource_type: impl Into<String>) -> Self {
        Self::MissingResource {
            resource_type: resource_type.into(),
        }
    }

    /// Whether this failure must abort the conversion
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConversionError::Fatal(_))
    }
}

impl From<PathError> for ConversionError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::InvalidSyntax(path) => Self::Path {
                path,
                message: "invalid syntax".to_string(),
            },
            PathError::TypeMismatch { path, expected } => Self::Path {
                path,
                message: format!("expected {expected}"),
            },
        }
    }
}

/// Attribute path errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathError {
    /// Invalid path syntax
    #[error("Invalid path syntax: {0}")]
    InvalidSyntax(String),

    /// A segment along the path holds a value of the wrong shape
    #[error("Path {path} does not hold {expected}")]
    TypeMismatch { path: String, expected: String },
}

/// Standard Result type for fatal engine operations
pub type Result<T> = std::result::Result<T, V2FhirError>;

/// Extension trait for downgrading data-level failures
pub trait ResultExt<T> {
    /// Keep fatal errors, turn data errors into `None` after logging them
    fn recoverable(self) -> std::result::Result<Option<T>, ConversionError>;
}

impl<T> ResultExt<T> for std::result::Result<T, ConversionError> {
    fn recoverable(self) -> std::result::Result<Option<T>, ConversionError> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(err) if !err.is_fatal() => {
                tracing::warn!("Recoverable error: {}", err);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}
