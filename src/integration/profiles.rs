//! Tool profiles: the single source of truth for per-tool timeout budgets.

use std::collections::HashMap;

use crate::config::{ConfigError, ProfileOverride, ShellRpcConfig};
use crate::timeout::TimeoutConfig;

/// Kinds of shell work the package layer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    /// `npm install`, `pip install`, `poetry add`, ...
    PackageInstall,
    /// `npm uninstall`, `pip uninstall`, `yarn remove`, ...
    PackageUninstall,
    /// `source .venv/bin/activate`, `conda activate`, ...
    EnvironmentActivation,
    /// `node --version`, `pip --version`, ...
    VersionProbe,
    /// Short read-only commands (`pwd`, `npm ls`, `pip show`).
    QuickCommand,
    /// Anything unrecognised.
    Generic,
}

impl ToolKind {
    pub const ALL: [ToolKind; 6] = [
        ToolKind::PackageInstall,
        ToolKind::PackageUninstall,
        ToolKind::EnvironmentActivation,
        ToolKind::VersionProbe,
        ToolKind::QuickCommand,
        ToolKind::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::PackageInstall => "package_install",
            ToolKind::PackageUninstall => "package_uninstall",
            ToolKind::EnvironmentActivation => "environment_activation",
            ToolKind::VersionProbe => "version_probe",
            ToolKind::QuickCommand => "quick_command",
            ToolKind::Generic => "generic",
        }
    }

    /// Parse a tool name. Accepts the canonical names plus short aliases.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "package_install" | "install" => Some(ToolKind::PackageInstall),
            "package_uninstall" | "uninstall" => Some(ToolKind::PackageUninstall),
            "environment_activation" | "activate" | "activation" => {
                Some(ToolKind::EnvironmentActivation)
            }
            "version_probe" | "version" => Some(ToolKind::VersionProbe),
            "quick_command" | "quick" => Some(ToolKind::QuickCommand),
            "generic" => Some(ToolKind::Generic),
            _ => None,
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timeout budget and patterns for one tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolProfile {
    pub tool: ToolKind,
    pub base_timeout_ms: u64,
    pub activity_extension_ms: u64,
    pub grace_timeout_ms: u64,
    pub absolute_maximum_ms: u64,
    pub progress_patterns: Vec<String>,
    pub error_patterns: Vec<String>,
}

impl ToolProfile {
    pub fn to_config(&self, debug: bool) -> TimeoutConfig {
        TimeoutConfig {
            base_timeout_ms: self.base_timeout_ms,
            activity_extension_ms: self.activity_extension_ms,
            grace_timeout_ms: self.grace_timeout_ms,
            absolute_maximum_ms: self.absolute_maximum_ms,
            progress_patterns: self.progress_patterns.clone(),
            error_patterns: self.error_patterns.clone(),
            debug,
        }
    }

    fn apply(&mut self, overrides: &ProfileOverride) {
        if let Some(value) = overrides.base_timeout_ms {
            self.base_timeout_ms = value;
        }
        if let Some(value) = overrides.activity_extension_ms {
            self.activity_extension_ms = value;
        }
        if let Some(value) = overrides.grace_timeout_ms {
            self.grace_timeout_ms = value;
        }
        if let Some(value) = overrides.absolute_maximum_ms {
            self.absolute_maximum_ms = value;
        }
        self.progress_patterns
            .extend(overrides.extra_progress_patterns.iter().cloned());
        self.error_patterns
            .extend(overrides.extra_error_patterns.iter().cloned());
    }
}

const COMMON_ERRORS: &[&str] = &[
    r"(?i)npm ERR!",
    r"ERR_PNPM_[A-Z_]+",
    r"\b(EACCES|EPERM|ENOSPC|ENOTFOUND|ECONNREFUSED)\b",
    r"(?i)\bpermission denied\b",
    r"(?i)\bcommand not found\b",
    r"(?m)^ERROR: ",
    r"(?m)^error (An unexpected error occurred|Couldn't find)",
    r"(?i)\bfatal:",
];

const INSTALL_ERRORS: &[&str] = &[
    r"(?i)No matching distribution found",
    r"(?i)Could not find a version that satisfies",
    r"\bE404\b",
    r"\bERESOLVE\b",
    r"(?i)error: externally-managed-environment",
    r"(?i)No solution found when resolving",
    r"(?i)SolverProblemError",
];

const INSTALL_PROGRESS: &[&str] = &[
    r"(?i)\bdownloading\b",
    r"(?i)\bcollecting\b",
    r"(?i)\binstalling\b",
    r"(?i)\bbuilding wheel",
    r"(?i)\b(resolving|fetching|linking)\b",
    r"(?i)\badded \d+ packages?\b",
    r"(?i)\bsuccessfully installed\b",
    r"(?i)progress: resolved \d+",
    r"\b\d{1,3}%",
];

const UNINSTALL_PROGRESS: &[&str] = &[
    r"(?i)\buninstalling\b",
    r"(?i)\bfound existing installation\b",
    r"(?i)\bremoved \d+ packages?\b",
    r"(?i)\bsuccessfully uninstalled\b",
];

const ACTIVATION_PROGRESS: &[&str] = &[r"(?i)\bactivat(ing|ed)\b", r"(?i)\bcreated virtual environment\b"];

const ACTIVATION_ERRORS: &[&str] = &[
    r"(?i)no such file or directory",
    r"(?i)EnvironmentNameNotFound",
    r"(?i)could not find conda environment",
];

const VERSION_PROGRESS: &[&str] = &[r"\bv?\d+\.\d+(\.\d+)?\b"];

fn patterns(groups: &[&[&str]]) -> Vec<String> {
    groups
        .iter()
        .flat_map(|group| group.iter().map(|p| p.to_string()))
        .collect()
}

/// Build the complete built-in profile table.
pub fn builtin_profiles() -> Vec<ToolProfile> {
    vec![
        ToolProfile {
            tool: ToolKind::PackageInstall,
            base_timeout_ms: 60_000,
            activity_extension_ms: 20_000,
            grace_timeout_ms: 15_000,
            absolute_maximum_ms: 600_000,
            progress_patterns: patterns(&[INSTALL_PROGRESS]),
            error_patterns: patterns(&[COMMON_ERRORS, INSTALL_ERRORS]),
        },
        ToolProfile {
            tool: ToolKind::PackageUninstall,
            base_timeout_ms: 30_000,
            activity_extension_ms: 10_000,
            grace_timeout_ms: 10_000,
            absolute_maximum_ms: 180_000,
            progress_patterns: patterns(&[UNINSTALL_PROGRESS]),
            error_patterns: patterns(&[COMMON_ERRORS]),
        },
        ToolProfile {
            tool: ToolKind::EnvironmentActivation,
            base_timeout_ms: 15_000,
            activity_extension_ms: 5_000,
            grace_timeout_ms: 5_000,
            absolute_maximum_ms: 60_000,
            progress_patterns: patterns(&[ACTIVATION_PROGRESS]),
            error_patterns: patterns(&[COMMON_ERRORS, ACTIVATION_ERRORS]),
        },
        ToolProfile {
            tool: ToolKind::VersionProbe,
            base_timeout_ms: 10_000,
            activity_extension_ms: 3_000,
            grace_timeout_ms: 3_000,
            absolute_maximum_ms: 30_000,
            progress_patterns: patterns(&[VERSION_PROGRESS]),
            error_patterns: patterns(&[COMMON_ERRORS]),
        },
        ToolProfile {
            tool: ToolKind::QuickCommand,
            base_timeout_ms: 5_000,
            activity_extension_ms: 2_000,
            grace_timeout_ms: 2_000,
            absolute_maximum_ms: 20_000,
            progress_patterns: Vec::new(),
            error_patterns: patterns(&[COMMON_ERRORS]),
        },
        // Fallback: the most common progress and error signals combined.
        ToolProfile {
            tool: ToolKind::Generic,
            base_timeout_ms: 30_000,
            activity_extension_ms: 10_000,
            grace_timeout_ms: 10_000,
            absolute_maximum_ms: 300_000,
            progress_patterns: patterns(&[INSTALL_PROGRESS, UNINSTALL_PROGRESS]),
            error_patterns: patterns(&[COMMON_ERRORS, INSTALL_ERRORS]),
        },
    ]
}

/// Profile lookup table, optionally adjusted by user configuration.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: HashMap<ToolKind, ToolProfile>,
    fallback: ToolKind,
    debug: bool,
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProfileRegistry {
    pub fn builtin() -> Self {
        Self {
            profiles: builtin_profiles()
                .into_iter()
                .map(|profile| (profile.tool, profile))
                .collect(),
            fallback: ToolKind::Generic,
            debug: false,
        }
    }

    /// Built-in table with the user's overrides applied.
    ///
    /// Every resulting profile is validated so a bad override fails here
    /// rather than on the first command.
    pub fn from_config(config: &ShellRpcConfig) -> Result<Self, ConfigError> {
        let mut registry = Self::builtin();
        registry.debug = config.defaults.debug;

        if let Some(name) = &config.defaults.fallback_tool {
            registry.fallback = ToolKind::parse(name).ok_or_else(|| ConfigError::ValidationError {
                message: format!("Unknown fallback tool '{}'", name),
            })?;
        }

        let mut names: Vec<&String> = config.profiles.keys().collect();
        names.sort();
        for name in names {
            let tool = ToolKind::parse(name).ok_or_else(|| ConfigError::ValidationError {
                message: format!("Unknown tool profile '{}'", name),
            })?;
            if let Some(profile) = registry.profiles.get_mut(&tool) {
                profile.apply(&config.profiles[name]);
            }
        }

        for tool in ToolKind::ALL {
            let config = registry.config_for(tool);
            if let Err(err) = config.validate() {
                return Err(ConfigError::ValidationError {
                    message: format!("Profile '{}': {}", tool, err),
                });
            }
        }

        Ok(registry)
    }

    pub fn profile(&self, tool: ToolKind) -> &ToolProfile {
        self.profiles
            .get(&tool)
            .or_else(|| self.profiles.get(&ToolKind::Generic))
            .expect("generic profile is always registered")
    }

    pub fn fallback(&self) -> ToolKind {
        self.fallback
    }

    pub fn config_for(&self, tool: ToolKind) -> TimeoutConfig {
        self.profile(tool).to_config(self.debug)
    }

    /// Classify `command` and return the matching tool, or the fallback.
    pub fn resolve(&self, command: &str) -> ToolKind {
        super::classify_command(command).unwrap_or(self.fallback)
    }

    pub fn config_for_command(&self, command: &str) -> TimeoutConfig {
        self.config_for(self.resolve(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_profile_is_valid() {
        let registry = ProfileRegistry::builtin();
        for tool in ToolKind::ALL {
            let config = registry.config_for(tool);
            assert!(config.validate().is_ok(), "{} is invalid", tool);
            assert!(config.warnings().is_empty(), "{} has warnings", tool);
        }
    }

    #[test]
    fn tool_names_round_trip() {
        for tool in ToolKind::ALL {
            assert_eq!(ToolKind::parse(tool.as_str()), Some(tool));
        }
        assert_eq!(ToolKind::parse("Install"), Some(ToolKind::PackageInstall));
        assert_eq!(ToolKind::parse("quick-command"), Some(ToolKind::QuickCommand));
        assert_eq!(ToolKind::parse("deploy"), None);
    }

    #[test]
    fn overrides_are_applied() {
        let mut config = ShellRpcConfig::default();
        config.profiles.insert(
            "install".to_string(),
            ProfileOverride {
                base_timeout_ms: Some(90_000),
                extra_error_patterns: vec!["disk quota".to_string()],
                ..ProfileOverride::default()
            },
        );

        let registry = ProfileRegistry::from_config(&config).unwrap();
        let profile = registry.profile(ToolKind::PackageInstall);
        assert_eq!(profile.base_timeout_ms, 90_000);
        assert_eq!(profile.grace_timeout_ms, 15_000);
        assert_eq!(profile.error_patterns.last().unwrap(), "disk quota");
    }

    #[test]
    fn unknown_profile_name_is_rejected() {
        let mut config = ShellRpcConfig::default();
        config
            .profiles
            .insert("deploy".to_string(), ProfileOverride::default());
        assert!(matches!(
            ProfileRegistry::from_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn invalid_override_is_rejected() {
        let mut config = ShellRpcConfig::default();
        config.profiles.insert(
            "quick".to_string(),
            ProfileOverride {
                grace_timeout_ms: Some(0),
                ..ProfileOverride::default()
            },
        );
        let err = ProfileRegistry::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("quick_command"));
    }

    #[test]
    fn fallback_tool_is_configurable() {
        let mut config = ShellRpcConfig::default();
        config.defaults.fallback_tool = Some("quick".to_string());
        let registry = ProfileRegistry::from_config(&config).unwrap();
        assert_eq!(registry.resolve("make test"), ToolKind::QuickCommand);
    }
}
