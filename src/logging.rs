use crate::config::{LogMode, LogSettings};
use crate::types::{RelayError, Result};
use std::fs::{self, OpenOptions};
use std::sync::Arc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// Used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "rss_broadcaster=info";

/// Installs the global subscriber. `RUST_LOG` still controls the filter.
pub fn init(settings: &LogSettings) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(settings.path.is_none())
        .with_writer(make_writer(settings)?);

    let installed = match settings.mode {
        LogMode::Human => builder.try_init(),
        LogMode::Machine => builder.json().try_init(),
    };
    installed.map_err(|e| RelayError::Config(format!("failed to install logger: {}", e)))
}

/// Stdout, or the configured file opened for append (parent directories are created).
pub fn make_writer(settings: &LogSettings) -> Result<BoxMakeWriter> {
    let Some(path) = &settings.path else {
        return Ok(BoxMakeWriter::new(std::io::stdout));
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BoxMakeWriter::new(Arc::new(file)))
}
