//! User configuration: debug defaults and per-tool profile overrides.

mod loader;
mod types;

pub use loader::{ConfigError, CONFIG_PATH_ENV};
pub use types::{Defaults, ProfileOverride, ShellRpcConfig};
