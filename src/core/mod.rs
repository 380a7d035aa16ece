//! Core building blocks shared by every modswap component: the error
//! taxonomy, structured error logging and lifecycle metrics.

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{PlugError, PlugResult};
pub use logging::{ErrorContext, ErrorLogLevel, ErrorLogger};
pub use metrics::MetricsCollector;
