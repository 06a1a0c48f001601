use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Root configuration container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellRpcConfig {
    #[serde(default)]
    pub defaults: Defaults,
    /// Per-tool overrides keyed by tool name (e.g. "package_install", "quick").
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverride>,
}

/// Settings applied to every timeout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Defaults {
    /// Log every timeout event (same effect as `DEBUG_SHELL_RPC=true`).
    #[serde(default)]
    pub debug: bool,
    /// Profile used when a command matches no known tool (default: "generic").
    #[serde(default)]
    pub fallback_tool: Option<String>,
}

/// Partial override of a built-in tool profile.
///
/// Unset fields keep the built-in value. Extra patterns are appended to the
/// built-in lists, never replace them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileOverride {
    #[serde(default)]
    pub base_timeout_ms: Option<u64>,
    #[serde(default)]
    pub activity_extension_ms: Option<u64>,
    #[serde(default)]
    pub grace_timeout_ms: Option<u64>,
    #[serde(default)]
    pub absolute_maximum_ms: Option<u64>,
    #[serde(default)]
    pub extra_progress_patterns: Vec<String>,
    #[serde(default)]
    pub extra_error_patterns: Vec<String>,
}
