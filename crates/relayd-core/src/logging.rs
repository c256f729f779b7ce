use tracing_subscriber::{fmt, EnvFilter};

use crate::{errors::Error, Result};

/// Initialize tracing for the daemon.
///
/// `RUST_LOG` wins when set; otherwise `debug` selects verbose
/// output (every inbound message) over the default `info` level.
pub fn init(service_name: &str, debug: bool) -> Result<()> {
    let level = if debug { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,relayd_core={level},relayd_telegram={level},{service_name}={level}"
        ))
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .try_init()
        .map_err(|e| Error::External(format!("logging init failed: {e}")))?;

    Ok(())
}
