// ! Structured logging for modswap
// !
// ! Module provides structured error logging with categorization and
// ! context preservation, plus a default subscriber for hosts that do not
// ! install their own.

use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::{error, info, warn};

use crate::core::error::PlugError;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLogLevel {
    /// Registry may be inconsistent; needs an operator
    Critical,
    /// Errors that affect functionality but the host can continue
    Error,
    /// Transient problems, usually retried on the next cycle
    Warning,
    /// Expected refusals and lookups that came up empty
    Info,
}

impl From<&PlugError> for ErrorLogLevel {
    fn from(error: &PlugError) -> Self {
        match error {
            PlugError::Scheduler(_) => ErrorLogLevel::Critical,

            PlugError::InvalidModule { .. }
            | PlugError::InvalidDescriptor { .. }
            | PlugError::UnloadFailed { .. }
            | PlugError::Config(_) => ErrorLogLevel::Error,

            PlugError::CheckFailed { .. }
            | PlugError::DownloadFailed { .. }
            | PlugError::Io(_)
            | PlugError::Http(_) => ErrorLogLevel::Warning,

            PlugError::ArtifactNotFound(_)
            | PlugError::AlreadyLoaded(_)
            | PlugError::NotLoaded(_)
            | PlugError::GentleUnloadDeclined(_)
            | PlugError::Ignored(_)
            | PlugError::InvalidCommand(_) => ErrorLogLevel::Info,
        }
    }
}

/// Extended error context for logging
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Operation being performed when error occurred
    pub operation: String,
    /// Module the operation targeted
    pub module: Option<String>,
    /// Component that observed the failure (manager, watcher, updater)
    pub component: Option<String>,
    /// Additional context data
    pub extra: HashMap<String, Value>,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            operation: "unknown".to_string(),
            module: None,
            component: None,
            extra: HashMap::new(),
        }
    }
}

impl ErrorContext {
    /// Create a new error context
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    /// Set the target module
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    /// Set component identifier
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Add extra context data
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Error logging with a level derived from the error itself
pub struct ErrorLogger;

impl ErrorLogger {
    /// Log an error with full context
    pub fn log_error(error: &PlugError, context: &ErrorContext) {
        let category = error.category();
        let recoverable = error.is_recoverable();

        let log_data = json!({
            "error_category": category,
            "error_recoverable": recoverable,
            "error_message": error.to_string(),
            "operation": context.operation,
            "module": context.module,
            "component": context.component,
            "extra_context": context.extra,
        });
        let rendered = serde_json::to_string(&log_data).unwrap_or_default();

        match ErrorLogLevel::from(error) {
            ErrorLogLevel::Critical => {
                error!(
                    target: "modswap_errors",
                    error_category = category,
                    operation = context.operation.as_str(),
                    "CRITICAL: {} - {}",
                    error,
                    rendered
                );
            }
            ErrorLogLevel::Error => {
                error!(
                    target: "modswap_errors",
                    error_category = category,
                    operation = context.operation.as_str(),
                    "{} - {}",
                    error,
                    rendered
                );
            }
            ErrorLogLevel::Warning => {
                warn!(
                    target: "modswap_errors",
                    error_category = category,
                    error_recoverable = recoverable,
                    operation = context.operation.as_str(),
                    "{} - {}",
                    error,
                    rendered
                );
            }
            ErrorLogLevel::Info => {
                info!(
                    target: "modswap_errors",
                    error_category = category,
                    operation = context.operation.as_str(),
                    "{}",
                    error
                );
            }
        }
    }
}

/// Install a formatting subscriber driven by `RUST_LOG` (default `info`).
///
/// Returns false when a global subscriber was already set by the host.
#[cfg(feature = "tracing-subscriber")]
pub fn init_tracing() -> bool {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping() {
        assert_eq!(
            ErrorLogLevel::from(&PlugError::scheduler("main context stopped")),
            ErrorLogLevel::Critical
        );
        assert_eq!(
            ErrorLogLevel::from(&PlugError::unload_failed("a", "b")),
            ErrorLogLevel::Error
        );
        assert_eq!(
            ErrorLogLevel::from(&PlugError::check_failed("a", "timeout")),
            ErrorLogLevel::Warning
        );
        assert_eq!(
            ErrorLogLevel::from(&PlugError::GentleUnloadDeclined("a".into())),
            ErrorLogLevel::Info
        );
    }

    #[test]
    fn test_context_builder() {
        let ctx = ErrorContext::new("unload")
            .with_module("Greeter")
            .with_component("watcher")
            .with_extra("file", "Greeter.zip");

        assert_eq!(ctx.operation, "unload");
        assert_eq!(ctx.module.as_deref(), Some("Greeter"));
        assert_eq!(ctx.extra["file"], "Greeter.zip");

        // Must not panic without a subscriber installed
        ErrorLogger::log_error(&PlugError::NotLoaded("Greeter".into()), &ctx);
    }

    #[cfg(feature = "tracing-subscriber")]
    #[test]
    fn test_init_tracing_installs_once() {
        init_tracing();
        assert!(!init_tracing());
        ErrorLogger::log_error(
            &PlugError::download_failed("floodgate", "404"),
            &ErrorContext::new("update").with_component("updater"),
        );
    }
}
