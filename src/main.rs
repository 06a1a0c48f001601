use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;

use shell_rpc::config::ShellRpcConfig;
use shell_rpc::integration::{ProfileRegistry, ShellTimeout};
use shell_rpc::logging;
use shell_rpc::timeout::{TerminationReason, TokioTimerDriver};

/// Exit status used by coreutils `timeout`.
const EXIT_TIMED_OUT: i32 = 124;

/// Watch a command's output stream and stop when it hangs or fails.
///
/// Reads from stdin, e.g. `npm install 2>&1 | shell-rpc-watch -c "npm install"`.
#[derive(Parser, Debug)]
#[command(name = "shell-rpc-watch", version)]
struct Cli {
    /// Command text used to pick a timeout profile.
    #[arg(short, long, default_value = "")]
    command: String,

    /// Base timeout in milliseconds (defaults to the profile's).
    #[arg(short, long)]
    timeout_ms: Option<u64>,

    /// Config file (defaults to $SHELL_RPC_CONFIG or the user config dir).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Do not echo the watched output to stdout.
    #[arg(short, long)]
    quiet: bool,
}

enum Outcome {
    Finished,
    Terminated(TerminationReason),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ShellRpcConfig::load_from(path),
        None => ShellRpcConfig::load(),
    }
    .context("loading configuration")?;
    let registry = Arc::new(ProfileRegistry::from_config(&config)?);

    let timeout_ms = cli
        .timeout_ms
        .unwrap_or_else(|| registry.config_for_command(&cli.command).base_timeout_ms);

    let driver = Arc::new(TokioTimerDriver::current()?);
    let watcher = ShellTimeout::with_registry(driver, registry);

    let (sender, mut terminated) = oneshot::channel();
    watcher.start(&cli.command, timeout_ms, move |reason| {
        let _ = sender.send(reason);
    })?;

    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut buffer = vec![0u8; 8192];
    let mut pending = Vec::new();

    let outcome = loop {
        tokio::select! {
            reason = &mut terminated => {
                break match reason {
                    Ok(reason) => Outcome::Terminated(reason),
                    Err(_) => Outcome::Finished,
                };
            }
            _ = tokio::signal::ctrl_c() => {
                watcher.terminate(TerminationReason::ExternalTermination);
            }
            read = stdin.read(&mut buffer) => {
                let count = read.context("reading stdin")?;
                if count == 0 {
                    if !pending.is_empty() {
                        watcher.process_output(&String::from_utf8_lossy(&pending))?;
                    }
                    break Outcome::Finished;
                }
                if !cli.quiet {
                    stdout.write_all(&buffer[..count]).await?;
                    stdout.flush().await?;
                }
                pending.extend_from_slice(&buffer[..count]);
                let text = take_complete_utf8(&mut pending);
                if !text.is_empty() {
                    watcher.process_output(&text)?;
                }
            }
        }
    };

    if let Some(stats) = watcher.stats() {
        tracing::info!(
            chunks = stats.chunks_processed,
            grace_recoveries = stats.grace_recoveries,
            progress_matches = stats.progress_matches,
            avg_processing_ms = stats.avg_processing_ms,
            "Watch finished"
        );
    }
    watcher.stop();

    match outcome {
        Outcome::Finished => Ok(()),
        Outcome::Terminated(reason) => {
            eprintln!("shell-rpc-watch: command stopped ({})", reason);
            std::process::exit(EXIT_TIMED_OUT);
        }
    }
}

/// Drain the decodable prefix of `pending`.
///
/// A multi-byte character cut off at the end of a read stays in `pending`
/// until the next read completes it. Bytes that can never be valid UTF-8 are
/// replaced with U+FFFD.
fn take_complete_utf8(pending: &mut Vec<u8>) -> String {
    let split = match std::str::from_utf8(pending) {
        Ok(_) => pending.len(),
        Err(err) if err.error_len().is_none() => err.valid_up_to(),
        Err(_) => pending.len(),
    };
    let text = String::from_utf8_lossy(&pending[..split]).into_owned();
    pending.drain(..split);
    text
}
