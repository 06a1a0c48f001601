//! Timeout integration for the shell command executor.
//!
//! ```text
//! command text → classify → ToolKind → ToolProfile → TimeoutConfig → ResilientTimeout
//! ```
//!
//! The free functions below use the built-in profile table. Callers that load
//! user overrides build a [`ProfileRegistry`] from configuration instead.

mod classifier;
mod profiles;
mod wrapper;

pub use classifier::classify_command;
pub use profiles::{builtin_profiles, ProfileRegistry, ToolKind, ToolProfile};
pub use wrapper::{ShellTimeout, ShellTimeoutState, TimeoutCallback};

use crate::timeout::TimeoutConfig;

pub fn install_config() -> TimeoutConfig {
    ProfileRegistry::builtin().config_for(ToolKind::PackageInstall)
}

pub fn uninstall_config() -> TimeoutConfig {
    ProfileRegistry::builtin().config_for(ToolKind::PackageUninstall)
}

pub fn environment_activation_config() -> TimeoutConfig {
    ProfileRegistry::builtin().config_for(ToolKind::EnvironmentActivation)
}

pub fn version_probe_config() -> TimeoutConfig {
    ProfileRegistry::builtin().config_for(ToolKind::VersionProbe)
}

pub fn quick_command_config() -> TimeoutConfig {
    ProfileRegistry::builtin().config_for(ToolKind::QuickCommand)
}

pub fn generic_config() -> TimeoutConfig {
    ProfileRegistry::builtin().config_for(ToolKind::Generic)
}

/// Configuration for a named tool; unknown names get the generic profile.
pub fn config_for_tool(name: &str) -> TimeoutConfig {
    let tool = ToolKind::parse(name).unwrap_or_else(|| {
        tracing::debug!(tool = %name, "Unknown tool, using generic timeout profile");
        ToolKind::Generic
    });
    ProfileRegistry::builtin().config_for(tool)
}

/// Configuration derived by classifying a command line.
pub fn config_for_command(command: &str) -> TimeoutConfig {
    ProfileRegistry::builtin().config_for_command(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factories_match_profiles() {
        assert_eq!(install_config().base_timeout_ms, 60_000);
        assert_eq!(uninstall_config().base_timeout_ms, 30_000);
        assert_eq!(environment_activation_config().base_timeout_ms, 15_000);
        assert_eq!(version_probe_config().base_timeout_ms, 10_000);
        assert_eq!(quick_command_config().base_timeout_ms, 5_000);
        assert_eq!(generic_config().base_timeout_ms, 30_000);
    }

    #[test]
    fn unknown_tool_falls_back_to_generic() {
        assert_eq!(config_for_tool("deploy"), generic_config());
        assert_eq!(config_for_tool("install"), install_config());
    }

    #[test]
    fn command_classification_drives_config() {
        assert_eq!(config_for_command("npm install left-pad"), install_config());
        assert_eq!(config_for_command("./run-something"), generic_config());
    }
}
