//! Automatic updates
//!
//! Version polling against the remote feed, download and archive swap
//! with a `.old` backup, and restart staging on the main context.

pub mod catalog;
pub mod checker;
pub mod client;
pub mod restart;
pub mod version;

pub use catalog::{ResourceEntry, ResourceMap, UpstreamCatalog};
pub use checker::{ADMIN_PERMISSION, CycleReport, InstalledModules, UpdateChecker, find_artifact, swap_artifact};
pub use client::VersionClient;
pub use restart::{RestartPlan, RestartStep};
pub use version::{UpdateResult, UpdateResultType, compare, compare_versions};
