use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::app::{Result, TickerError};

/// Logs to stderr and appends to `log_path`. The level comes from
/// `RUST_LOG` and defaults to `info`.
pub fn init_logging(log_path: &Path) -> Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(log_path)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .try_init()
        .map_err(|e| TickerError::Other(format!("Cannot set up logging: {}", e)))
}
