// ! Host services used by the update orchestrator

use crate::core::error::{PlugError, PlugResult};
use tracing::{info, warn};

/// Messaging sink for operator-facing notices
pub trait Broadcaster: Send + Sync {
    /// Send a message to everyone
    fn broadcast(&self, message: &str);

    /// Send a message to holders of `permission`
    fn broadcast_to_permission(&self, permission: &str, message: &str);
}

/// Process control
pub trait ServerControl: Send + Sync {
    /// Restart the host; an error makes callers fall back to [`ServerControl::shutdown`]
    fn restart(&self) -> PlugResult<()>;

    fn shutdown(&self);
}

/// Broadcaster that writes to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogBroadcaster;

impl Broadcaster for LogBroadcaster {
    fn broadcast(&self, message: &str) {
        info!(target: "modswap", "[broadcast] {}", message);
    }

    fn broadcast_to_permission(&self, permission: &str, message: &str) {
        info!(target: "modswap", "[{}] {}", permission, message);
    }
}

/// Server control for hosts without a restart script
#[derive(Debug, Default, Clone, Copy)]
pub struct LogServerControl;

impl ServerControl for LogServerControl {
    fn restart(&self) -> PlugResult<()> {
        Err(PlugError::config("no restart script configured"))
    }

    fn shutdown(&self) {
        warn!(target: "modswap", "Shutdown requested");
    }
}
