//! Console and log-file output through `tracing`.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{LogSettings, Verbosity};

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured verbosity. Lines go to stderr and,
/// when a file is configured, are appended to it without colour codes. Calling this
/// more than once keeps the first subscriber.
pub fn init(settings: &LogSettings) -> Result<()> {
    init_with_console(settings, std::io::stderr)
}

/// Like [`init`], with console lines written through `console` instead of plain stderr.
pub fn init_with_console<W>(settings: &LogSettings, console: W) -> Result<()>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(settings.verbosity)));

    let file_layer = match settings.file.as_deref() {
        Some(path) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(open_log_file(path)?)),
        ),
        None => None,
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(console))
        .with(file_layer)
        .try_init();
    Ok(())
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {}", path.display()))
}

fn filter_directive(verbosity: Verbosity) -> &'static str {
    match verbosity {
        Verbosity::Quiet => "warn",
        Verbosity::Normal => "info",
        Verbosity::Verbose => "debug",
    }
}
