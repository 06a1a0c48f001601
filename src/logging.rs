use tracing_subscriber::EnvFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Enables verbose timeout event logging when set to `true`.
pub const DEBUG_ENV: &str = "DEBUG_SHELL_RPC";

/// File path prefix for log output.
pub const LOG_FILE_ENV: &str = "SHELL_RPC_LOG";

/// Whether `DEBUG_SHELL_RPC=true` is set.
pub fn debug_enabled() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|value| is_truthy(&value))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1")
}

/// Initialize tracing.
///
/// - `SHELL_RPC_LOG=<path>` writes to `{path}.{timestamp}.{pid}` so that
///   concurrent watchers never share a file.
/// - Otherwise `DEBUG_SHELL_RPC=true` logs to stderr at debug level.
/// - With neither set, only warnings and errors reach stderr.
///
/// `RUST_LOG` overrides the level filter in every mode.
pub fn init_tracing() {
    let debug = debug_enabled();
    let default_level = if debug { "shell_rpc=debug,info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if let Ok(log_path) = std::env::var(LOG_FILE_ENV) {
        let pid = std::process::id();
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let unique_path = format!("{}.{}.{}", log_path, timestamp, pid);

        match std::fs::File::create(&unique_path) {
            Ok(file) => {
                let file_layer = fmt::layer()
                    .with_writer(file)
                    .with_ansi(false)
                    .with_target(true)
                    .with_level(true);
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(file_layer)
                    .try_init();
                return;
            }
            Err(_) => eprintln!("Warning: Failed to create log file: {}", unique_path),
        }
    }

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true);
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .try_init();
}
