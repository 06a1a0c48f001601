//! Command classifier: free-text command → tool kind.

use once_cell::sync::Lazy;
use regex::Regex;

use super::profiles::ToolKind;

/// Signatures in precedence order; the first match wins.
///
/// Uninstall comes before install because `npm uninstall` contains `install`,
/// and version probes come before quick commands so `npm --version` is not
/// mistaken for a generic npm call.
const SIGNATURES: &[(ToolKind, &str)] = &[
    (ToolKind::PackageUninstall, r"\b(npm|pnpm)\s+(uninstall|remove|rm|un)\b"),
    (ToolKind::PackageUninstall, r"\byarn\s+remove\b"),
    (ToolKind::PackageUninstall, r"\b(pip3?|uv\s+pip)\s+uninstall\b"),
    (ToolKind::PackageUninstall, r"\bpython3?\s+-m\s+pip\s+uninstall\b"),
    (ToolKind::PackageUninstall, r"\b(poetry|uv)\s+remove\b"),
    (ToolKind::PackageUninstall, r"\bconda\s+(remove|uninstall)\b"),
    (ToolKind::PackageInstall, r"\b(npm|pnpm)\s+(install|i|add|ci)\b"),
    (ToolKind::PackageInstall, r"\byarn\s+(add|install)\b"),
    (ToolKind::PackageInstall, r"\b(pip3?|uv\s+pip)\s+install\b"),
    (ToolKind::PackageInstall, r"\bpython3?\s+-m\s+pip\s+install\b"),
    (ToolKind::PackageInstall, r"\bpoetry\s+(add|install)\b"),
    (ToolKind::PackageInstall, r"\buv\s+(add|sync)\b"),
    (ToolKind::PackageInstall, r"\bconda\s+install\b"),
    (ToolKind::EnvironmentActivation, r"(^|[\s;&|])(source|\.)\s+\S*activate\b"),
    (ToolKind::EnvironmentActivation, r"\bconda\s+activate\b"),
    (ToolKind::EnvironmentActivation, r"\bpoetry\s+(shell|env\s+use)\b"),
    (ToolKind::EnvironmentActivation, r"\bpython3?\s+-m\s+venv\b"),
    (ToolKind::EnvironmentActivation, r"\bvirtualenv\b"),
    (ToolKind::VersionProbe, r"(^|\s)(--version|-v|-V)(\s|$)"),
    (ToolKind::QuickCommand, r"^\s*(echo|pwd|ls|cat|which|where|whoami|printenv|env|true)\b"),
    (ToolKind::QuickCommand, r"\bnpm\s+(ls|list|view|root|prefix|config\s+get)\b"),
    (ToolKind::QuickCommand, r"\bpip3?\s+(show|list|freeze)\b"),
];

static COMPILED: Lazy<Vec<(ToolKind, Regex)>> = Lazy::new(|| {
    SIGNATURES
        .iter()
        .map(|(tool, pattern)| {
            let regex = Regex::new(pattern).expect("built-in command signature is valid");
            (*tool, regex)
        })
        .collect()
});

/// Classify a command line against the known tool signatures.
///
/// Returns `None` when nothing matches; callers fall back to a generic profile.
pub fn classify_command(command: &str) -> Option<ToolKind> {
    let command = command.trim();
    if command.is_empty() {
        return None;
    }
    COMPILED
        .iter()
        .find(|(_, regex)| regex.is_match(command))
        .map(|(tool, _)| *tool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signatures_compile() {
        assert_eq!(COMPILED.len(), SIGNATURES.len());
    }

    #[test]
    fn install_commands() {
        for cmd in [
            "npm install lodash",
            "npm i -D typescript",
            "pnpm add zod",
            "yarn add react",
            "pip install requests==2.31",
            "pip3 install -r requirements.txt",
            "python -m pip install flask",
            "uv pip install numpy",
            "poetry add httpx",
            "uv sync",
        ] {
            assert_eq!(classify_command(cmd), Some(ToolKind::PackageInstall), "{}", cmd);
        }
    }

    #[test]
    fn uninstall_wins_over_install() {
        for cmd in [
            "npm uninstall lodash",
            "yarn remove react",
            "pip uninstall -y requests",
            "python3 -m pip uninstall flask",
            "poetry remove httpx",
        ] {
            assert_eq!(classify_command(cmd), Some(ToolKind::PackageUninstall), "{}", cmd);
        }
    }

    #[test]
    fn activation_commands() {
        for cmd in [
            "source .venv/bin/activate",
            "cd proj && . venv/bin/activate",
            "conda activate ml",
            "python3 -m venv .venv",
        ] {
            assert_eq!(
                classify_command(cmd),
                Some(ToolKind::EnvironmentActivation),
                "{}",
                cmd
            );
        }
    }

    #[test]
    fn version_and_quick_commands() {
        assert_eq!(classify_command("node --version"), Some(ToolKind::VersionProbe));
        assert_eq!(classify_command("python -V"), Some(ToolKind::VersionProbe));
        assert_eq!(classify_command("pwd"), Some(ToolKind::QuickCommand));
        assert_eq!(classify_command("npm ls --depth=0"), Some(ToolKind::QuickCommand));
        assert_eq!(classify_command("pip show requests"), Some(ToolKind::QuickCommand));
    }

    #[test]
    fn unknown_commands_are_unclassified() {
        assert_eq!(classify_command(""), None);
        assert_eq!(classify_command("   "), None);
        assert_eq!(classify_command("make test"), None);
        assert_eq!(classify_command("cargo build --release"), None);
    }
}
