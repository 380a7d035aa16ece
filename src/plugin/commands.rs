//! Operator commands
//!
//! Text commands an operator issues against the lifecycle manager. Each one
//! returns a human-readable status line (or several).

use crate::core::error::{PlugError, PlugResult};
use crate::plugin::manager::PluginManager;
use std::fmt;

/// A parsed operator command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Load(String),
    Unload(String),
    Reload(String),
    ReloadAll,
    Enable(String),
    EnableAll,
    Disable(String),
    DisableAll,
    List,
    Info(String),
    Usage(String),
    Lookup(String),
}

impl OperatorCommand {
    /// Parse whitespace-separated arguments, e.g. `["reload", "Greeter"]`.
    ///
    /// Module names may contain spaces; everything after the subcommand
    /// is joined back together.
    pub fn parse<S: AsRef<str>>(args: &[S]) -> PlugResult<Self> {
        let Some((head, rest)) = args.split_first() else {
            return Err(PlugError::InvalidCommand("missing subcommand".to_string()));
        };
        let target = rest
            .iter()
            .map(|s| s.as_ref())
            .collect::<Vec<_>>()
            .join(" ");
        let needs_target = |target: String| {
            if target.is_empty() {
                Err(PlugError::InvalidCommand(format!(
                    "'{}' needs a plugin name",
                    head.as_ref()
                )))
            } else {
                Ok(target)
            }
        };
        let all = target.eq_ignore_ascii_case("all") || target == "*";

        match head.as_ref().to_lowercase().as_str() {
            "load" => Ok(Self::Load(needs_target(target)?)),
            "unload" => Ok(Self::Unload(needs_target(target)?)),
            "reload" if all => Ok(Self::ReloadAll),
            "reload" => Ok(Self::Reload(needs_target(target)?)),
            "enable" if all => Ok(Self::EnableAll),
            "enable" => Ok(Self::Enable(needs_target(target)?)),
            "disable" if all => Ok(Self::DisableAll),
            "disable" => Ok(Self::Disable(needs_target(target)?)),
            "list" => Ok(Self::List),
            "info" => Ok(Self::Info(needs_target(target)?)),
            "usage" => Ok(Self::Usage(needs_target(target)?)),
            "lookup" => Ok(Self::Lookup(needs_target(target)?)),
            other => Err(PlugError::InvalidCommand(format!("unknown subcommand '{other}'"))),
        }
    }

    fn target(&self) -> Option<&str> {
        match self {
            Self::Unload(name) | Self::Reload(name) | Self::Disable(name) => Some(name),
            _ => None,
        }
    }

    /// Execute against `manager`; destructive commands refuse ignored modules
    pub async fn run(self, manager: &PluginManager) -> String {
        if let Some(name) = self.target() {
            if manager.ignored().contains(name) {
                return PlugError::Ignored(name.to_string()).to_string();
            }
        }

        match self {
            Self::Load(name) => status(manager.load(&name).await),
            Self::Unload(name) => teardown_status(manager.unload(&name).await),
            Self::Reload(name) => teardown_status(manager.reload(&name).await),
            Self::ReloadAll => {
                let results = manager.reload_all().await;
                if results.is_empty() {
                    return "No plugins to reload.".to_string();
                }
                results
                    .into_iter()
                    .map(|(_, result)| status(result))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            Self::Enable(name) => match manager.enable(&name).await {
                Ok(()) => format!("{name} has been enabled."),
                Err(e) => e.to_string(),
            },
            Self::Disable(name) => match manager.disable(&name).await {
                Ok(()) => format!("{name} has been disabled."),
                Err(e) => e.to_string(),
            },
            Self::EnableAll => summary("enabled", manager.enable_all().await),
            Self::DisableAll => summary("disabled", manager.disable_all().await),
            Self::List => match manager.list().await {
                Ok(infos) if infos.is_empty() => "Plugins (0):".to_string(),
                Ok(infos) => format!(
                    "Plugins ({}): {}",
                    infos.len(),
                    infos
                        .iter()
                        .map(|i| {
                            let state = if i.enabled { "" } else { " (disabled)" };
                            format!("{}{}", i.full_name, state)
                        })
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                Err(e) => e.to_string(),
            },
            Self::Info(name) => match manager.info(&name).await {
                Ok(info) => {
                    let mut lines = vec![
                        info.full_name.clone(),
                        format!("Enabled: {}", info.enabled),
                        format!("Native library: {}", info.native),
                        format!("Artifact: {}", info.artifact.display()),
                    ];
                    if let Some(description) = &info.description {
                        lines.push(format!("Description: {description}"));
                    }
                    if !info.authors.is_empty() {
                        lines.push(format!("Authors: {}", info.authors.join(", ")));
                    }
                    if !info.depend.is_empty() {
                        lines.push(format!("Depends on: {}", info.depend.join(", ")));
                    }
                    lines.push(format!("Loaded at: {}", info.loaded_at.to_rfc3339()));
                    lines.join("\n")
                }
                Err(e) => e.to_string(),
            },
            Self::Usage(name) => match manager.usages(&name).await {
                Ok(commands) if commands.is_empty() => format!("{name} has no commands."),
                Ok(commands) => format!("Commands for {name}: {}", commands.join(", ")),
                Err(e) => e.to_string(),
            },
            Self::Lookup(label) => match manager.find_by_command(&label).await {
                Ok(owners) if owners.is_empty() => format!("No plugin registers '{label}'."),
                Ok(owners) => format!("'{label}' is registered by: {}", owners.join(", ")),
                Err(e) => e.to_string(),
            },
        }
    }
}

impl fmt::Display for OperatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load(n) => write!(f, "load {n}"),
            Self::Unload(n) => write!(f, "unload {n}"),
            Self::Reload(n) => write!(f, "reload {n}"),
            Self::ReloadAll => write!(f, "reload all"),
            Self::Enable(n) => write!(f, "enable {n}"),
            Self::EnableAll => write!(f, "enable all"),
            Self::Disable(n) => write!(f, "disable {n}"),
            Self::DisableAll => write!(f, "disable all"),
            Self::List => write!(f, "list"),
            Self::Info(n) => write!(f, "info {n}"),
            Self::Usage(n) => write!(f, "usage {n}"),
            Self::Lookup(n) => write!(f, "lookup {n}"),
        }
    }
}

impl PluginManager {
    /// Parse and run an operator command line
    pub async fn execute(&self, line: &str) -> String {
        let args: Vec<&str> = line.split_whitespace().collect();
        match OperatorCommand::parse(&args) {
            Ok(command) => command.run(self).await,
            Err(e) => e.to_string(),
        }
    }
}

fn status<T: fmt::Display>(result: PlugResult<T>) -> String {
    match result {
        Ok(report) => report.to_string(),
        Err(e) => e.to_string(),
    }
}

/// Like [`status`], but tells the operator when a failure left the module as it was
fn teardown_status<T: fmt::Display>(result: PlugResult<T>) -> String {
    match result {
        Ok(report) => report.to_string(),
        Err(e) if e.is_non_mutating() => format!("{e}; nothing was changed."),
        Err(e) => e.to_string(),
    }
}

fn summary(verb: &str, results: Vec<(String, PlugResult<()>)>) -> String {
    let failed: Vec<String> = results
        .iter()
        .filter_map(|(name, r)| r.as_ref().err().map(|e| format!("{name}: {e}")))
        .collect();
    let ok = results.len() - failed.len();
    if failed.is_empty() {
        format!("All plugins have been {verb} ({ok}).")
    } else {
        format!("{ok} plugins {verb}; failures:\n{}", failed.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subcommands() {
        assert_eq!(
            OperatorCommand::parse(&["load", "Greeter"]).unwrap(),
            OperatorCommand::Load("Greeter".into())
        );
        assert_eq!(
            OperatorCommand::parse(&["RELOAD", "all"]).unwrap(),
            OperatorCommand::ReloadAll
        );
        assert_eq!(
            OperatorCommand::parse(&["disable", "*"]).unwrap(),
            OperatorCommand::DisableAll
        );
        assert_eq!(
            OperatorCommand::parse(&["info", "World", "Edit"]).unwrap(),
            OperatorCommand::Info("World Edit".into())
        );
        assert_eq!(OperatorCommand::parse(&["list"]).unwrap(), OperatorCommand::List);
    }

    #[test]
    fn test_parse_errors() {
        let empty: [&str; 0] = [];
        assert!(matches!(
            OperatorCommand::parse(&empty),
            Err(PlugError::InvalidCommand(_))
        ));
        assert!(
            OperatorCommand::parse(&["unload"])
                .unwrap_err()
                .to_string()
                .contains("needs a plugin name")
        );
        assert!(OperatorCommand::parse(&["explode", "x"]).is_err());
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for command in [
            OperatorCommand::ReloadAll,
            OperatorCommand::Lookup("greet".into()),
            OperatorCommand::Usage("Greeter".into()),
        ] {
            let line = command.to_string();
            let args: Vec<&str> = line.split_whitespace().collect();
            assert_eq!(OperatorCommand::parse(&args).unwrap(), command);
        }
    }
}
