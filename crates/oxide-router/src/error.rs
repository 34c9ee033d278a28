//! Error types for routing.

use thiserror::Error;

/// A boxed error returned by route handlers.
///
/// Handlers are written by independent modules, so any error type is accepted.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Router-specific errors.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Invalid path pattern.
    #[error("invalid path pattern: {0}")]
    InvalidPattern(String),

    /// The method part of a route specification is not a known HTTP method.
    #[error("unsupported method in route `{0}`")]
    UnsupportedMethod(String),

    /// A route declared a template the module never registered.
    #[error("{module}: template `{template}` not found")]
    MissingTemplate { module: String, template: String },

    /// A route handler signalled a failure.
    #[error("{module}: {message}")]
    Handler {
        module: String,
        message: String,
        /// Rendered error chain, outermost first.
        stack: Vec<String>,
    },

    /// The block cache failed.
    #[error("cache error: {0}")]
    Cache(String),
}

impl RouterError {
    /// Wraps a handler failure, annotating it with the owning module.
    pub fn handler(module: &str, err: &(dyn std::error::Error + 'static)) -> Self {
        let mut stack = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            stack.push(cause.to_string());
            source = cause.source();
        }
        Self::Handler {
            module: module.to_string(),
            message: err.to_string(),
            stack,
        }
    }

    /// Returns the module this error is attributed to, if any.
    pub fn module(&self) -> Option<&str> {
        match self {
            Self::MissingTemplate { module, .. } | Self::Handler { module, .. } => Some(module),
            _ => None,
        }
    }
}

/// Result type alias for router operations.
pub type Result<T> = std::result::Result<T, RouterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("query failed")]
    struct Outer(#[source] std::io::Error);

    #[test]
    fn test_handler_error_keeps_chain() {
        let err = Outer(std::io::Error::other("disk gone"));
        let wrapped = RouterError::handler("content", &err);
        assert_eq!(wrapped.to_string(), "content: query failed");
        assert_eq!(wrapped.module(), Some("content"));
        match wrapped {
            RouterError::Handler { stack, .. } => assert_eq!(stack, vec!["disk gone".to_string()]),
            other => panic!("unexpected {other:?}"),
        }
    }
}
