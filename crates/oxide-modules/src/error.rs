//! Error types for the module system.

use oxide_router::RouterError;
use thiserror::Error;

use crate::config::ConfigError;

/// Module system errors.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Routing error.
    #[error(transparent)]
    Router(#[from] RouterError),

    /// Two descriptors share a name.
    #[error("module `{0}` is registered twice")]
    DuplicateModule(String),

    /// No module by that name.
    #[error("unknown module `{0}`")]
    UnknownModule(String),

    /// The module exists but is disabled.
    #[error("module `{0}` is disabled")]
    ModuleDisabled(String),

    /// The module has no job by that name.
    #[error("module `{module}` has no job `{job}`")]
    UnknownJob { module: String, job: String },

    /// A job failed.
    #[error("job `{module}.{job}` failed: {message}")]
    Job {
        module: String,
        job: String,
        message: String,
    },

    /// The coordinator was told about a module it is not running.
    #[error("module `{module}` cannot complete: {reason}")]
    InvalidTransition { module: String, reason: String },

    /// Modules never became ready.
    #[error("orchestration stalled with pending modules: {}", pending.join(", "))]
    Stalled { pending: Vec<String> },
}

/// Result type alias for module operations.
pub type Result<T> = std::result::Result<T, ModuleError>;
