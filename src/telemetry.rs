use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: OnceCell<()> = OnceCell::new();

/// Installs the process-wide subscriber. `RUST_LOG` wins over `level` when set.
///
/// Later calls are no-ops, so tests and embedding hosts may call it freely.
pub fn init_logging(level: &str, json: bool) -> Result<()> {
    let level: tracing::Level = level.parse().context("Invalid log level")?;
    INIT.get_or_init(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
        let registry = tracing_subscriber::registry().with(filter);
        // A host may already own the global subscriber.
        let _ = if json {
            registry.with(fmt::layer().json()).try_init()
        } else {
            registry.with(fmt::layer().with_ansi(false)).try_init()
        };
    });
    Ok(())
}
