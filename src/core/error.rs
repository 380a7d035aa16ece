// ! Error types for modswap
// !
// ! Module defines the error taxonomy shared by the lifecycle manager,
// ! the directory watcher and the update orchestrator. Every variant is
// ! recovered locally and surfaced as a status string or a log line.

use thiserror::Error;

/// The main error type for modswap
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlugError {
    /// No archive in the plugins directory matches the requested module
    #[error("Could not find a plugin archive for '{0}'")]
    ArtifactNotFound(String),

    /// The archive descriptor is missing or malformed
    #[error("Invalid descriptor in {path}: {reason}")]
    InvalidDescriptor { path: String, reason: String },

    /// The host could not materialize the module
    #[error("{name} is not a valid module: {reason}")]
    InvalidModule { name: String, reason: String },

    /// A module with the same name is already registered
    #[error("{0} is already loaded")]
    AlreadyLoaded(String),

    /// No module with that name is registered
    #[error("{0} is not loaded")]
    NotLoaded(String),

    /// Registry surgery could not start; nothing was mutated
    #[error("Failed to unload {name}: {reason}")]
    UnloadFailed { name: String, reason: String },

    /// The module refused a cooperative unload; nothing was mutated
    #[error("{0} did not want to unload")]
    GentleUnloadDeclined(String),

    /// The module is exempt from lifecycle actions
    #[error("{0} is ignored")]
    Ignored(String),

    /// Version check could not produce a result
    #[error("Update check failed for {name}: {reason}")]
    CheckFailed { name: String, reason: String },

    /// Replacement artifact could not be downloaded or installed
    #[error("Update download failed for {name}: {reason}")]
    DownloadFailed { name: String, reason: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The main context is gone or a task on it aborted
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// I/O errors from the standard library
    #[error("I/O error: {0}")]
    Io(String),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// Operator command could not be parsed
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}

// Manual From implementations for types that don't implement Clone
impl From<std::io::Error> for PlugError {
    fn from(err: std::io::Error) -> Self {
        PlugError::Io(err.to_string())
    }
}

impl From<serde_yaml::Error> for PlugError {
    fn from(err: serde_yaml::Error) -> Self {
        PlugError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for PlugError {
    fn from(err: reqwest::Error) -> Self {
        PlugError::Http(err.to_string())
    }
}

impl From<zip::result::ZipError> for PlugError {
    fn from(err: zip::result::ZipError) -> Self {
        PlugError::Io(format!("archive: {err}"))
    }
}

impl From<url::ParseError> for PlugError {
    fn from(err: url::ParseError) -> Self {
        PlugError::Config(format!("invalid URL: {err}"))
    }
}

/// Result type alias for modswap operations
pub type PlugResult<T> = Result<T, PlugError>;

impl PlugError {
    /// Create a new invalid descriptor error
    pub fn invalid_descriptor<P: Into<String>, S: Into<String>>(path: P, reason: S) -> Self {
        Self::InvalidDescriptor {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a new invalid module error
    pub fn invalid_module<N: Into<String>, S: Into<String>>(name: N, reason: S) -> Self {
        Self::InvalidModule {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a new unload failure
    pub fn unload_failed<N: Into<String>, S: Into<String>>(name: N, reason: S) -> Self {
        Self::UnloadFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a new check failure
    pub fn check_failed<N: Into<String>, S: Into<String>>(name: N, reason: S) -> Self {
        Self::CheckFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a new download failure
    pub fn download_failed<N: Into<String>, S: Into<String>>(name: N, reason: S) -> Self {
        Self::DownloadFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a new scheduler error
    pub fn scheduler<S: Into<String>>(message: S) -> Self {
        Self::Scheduler(message.into())
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// True for failures that are guaranteed to have left the registry untouched
    pub fn is_non_mutating(&self) -> bool {
        matches!(
            self,
            PlugError::UnloadFailed { .. }
                | PlugError::GentleUnloadDeclined(_)
                | PlugError::NotLoaded(_)
                | PlugError::AlreadyLoaded(_)
                | PlugError::ArtifactNotFound(_)
                | PlugError::InvalidDescriptor { .. }
                | PlugError::Ignored(_)
        )
    }

    /// Check if this error is worth trying again on a later cycle
    pub fn is_recoverable(&self) -> bool {
        match self {
            PlugError::ArtifactNotFound(_) => true,
            PlugError::InvalidDescriptor { .. } => false,
            PlugError::InvalidModule { .. } => false,
            PlugError::AlreadyLoaded(_) => false,
            PlugError::NotLoaded(_) => false,
            PlugError::UnloadFailed { .. } => false,
            PlugError::GentleUnloadDeclined(_) => true,
            PlugError::Ignored(_) => false,
            PlugError::CheckFailed { .. } => true,
            PlugError::DownloadFailed { .. } => true,
            PlugError::Config(_) => false,
            PlugError::Scheduler(_) => false,
            PlugError::Io(_) => true,
            PlugError::Http(_) => true,
            PlugError::InvalidCommand(_) => false,
        }
    }

    /// Get the error category for logging/metrics
    pub fn category(&self) -> &'static str {
        match self {
            PlugError::ArtifactNotFound(_) => "not_found",
            PlugError::InvalidDescriptor { .. } => "descriptor",
            PlugError::InvalidModule { .. } => "module",
            PlugError::AlreadyLoaded(_) => "state",
            PlugError::NotLoaded(_) => "not_found",
            PlugError::UnloadFailed { .. } => "registry",
            PlugError::GentleUnloadDeclined(_) => "declined",
            PlugError::Ignored(_) => "ignored",
            PlugError::CheckFailed { .. } => "update",
            PlugError::DownloadFailed { .. } => "update",
            PlugError::Config(_) => "config",
            PlugError::Scheduler(_) => "scheduler",
            PlugError::Io(_) => "io",
            PlugError::Http(_) => "http",
            PlugError::InvalidCommand(_) => "validation",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = PlugError::unload_failed("Greeter", "registry layout v9 is not supported");
        assert_eq!(
            error.to_string(),
            "Failed to unload Greeter: registry layout v9 is not supported"
        );
        assert_eq!(error.category(), "registry");
        assert!(!error.is_recoverable());
        assert!(error.is_non_mutating());
    }

    #[test]
    fn test_declined_status_text() {
        let error = PlugError::GentleUnloadDeclined("Reluctant".to_string());
        assert_eq!(error.to_string(), "Reluctant did not want to unload");
        assert!(error.is_non_mutating());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            PlugError::ArtifactNotFound("x".to_string()).category(),
            "not_found"
        );
        assert_eq!(PlugError::download_failed("x", "404").category(), "update");
        assert!(!PlugError::invalid_module("x", "boom").is_non_mutating());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let error: PlugError = io.into();
        assert!(matches!(error, PlugError::Io(_)));
        assert!(error.is_recoverable());
    }
}
