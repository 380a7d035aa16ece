// ! Restart staging
// !
// ! Module turns a restart delay into a schedule of broadcast warnings and
// ! the final restart, and stages that schedule on the main context.

use crate::core::error::PlugResult;
use crate::host::{Broadcaster, MainContext, ServerControl};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Seconds-remaining marks that get a warning when the delay reaches them
pub const WARNING_THRESHOLDS: [u64; 3] = [30, 10, 5];

/// One scheduled action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartStep {
    Announce { updated: Vec<String> },
    Warning { remaining: u64 },
    Restart,
}

/// Offsets (seconds from staging) of every step, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPlan {
    delay: u64,
    steps: Vec<(u64, RestartStep)>,
}

impl RestartPlan {
    pub fn new(delay_secs: u64, updated: Vec<String>) -> Self {
        let mut steps = vec![(0, RestartStep::Announce { updated })];
        for threshold in WARNING_THRESHOLDS {
            if delay_secs >= threshold {
                steps.push((
                    delay_secs - threshold,
                    RestartStep::Warning {
                        remaining: threshold,
                    },
                ));
            }
        }
        steps.push((delay_secs, RestartStep::Restart));
        Self {
            delay: delay_secs,
            steps,
        }
    }

    pub fn delay(&self) -> u64 {
        self.delay
    }

    pub fn steps(&self) -> &[(u64, RestartStep)] {
        &self.steps
    }

    pub fn warnings(&self) -> Vec<u64> {
        self.steps
            .iter()
            .filter_map(|(_, step)| match step {
                RestartStep::Warning { remaining } => Some(*remaining),
                _ => None,
            })
            .collect()
    }
}

/// Schedule every step of `plan` on the main context
pub fn stage(
    plan: &RestartPlan,
    main: &MainContext,
    broadcaster: Arc<dyn Broadcaster>,
    control: Arc<dyn ServerControl>,
) -> PlugResult<()> {
    warn!(
        "Updates downloaded. Server will restart in {} seconds...",
        plan.delay
    );

    for (offset, step) in plan.steps.iter().cloned() {
        let broadcaster = broadcaster.clone();
        let control = control.clone();
        let delay = plan.delay;
        main.run_after(Duration::from_secs(offset), move |_host| match step {
            RestartStep::Announce { updated } => broadcaster.broadcast(&format!(
                "Server restarting in {delay} seconds to apply updates: {}",
                updated.join(", ")
            )),
            RestartStep::Warning { remaining } => {
                broadcaster.broadcast(&format!("Server restarting in {remaining} seconds..."))
            }
            RestartStep::Restart => {
                broadcaster.broadcast("Restarting now!");
                if let Err(e) = control.restart() {
                    error!("Restart command failed, using shutdown instead: {}", e);
                    control.shutdown();
                }
            }
        })?;
    }
    Ok(())
}
