use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging for a sweep run.
///
/// Log lines go to `{log_dir}/trisim.log` (appended across runs) and, in
/// compact form, to stderr. The level is controlled by the `level`
/// parameter or the `RUST_LOG` environment variable.
pub fn init_logging(log_dir: &Path, level: &str) -> color_eyre::Result<()> {
    std::fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join("trisim.log");

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let default_filter = format!("trisim={level},trisim_core={level}");
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .with_target(true),
        )
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();

    tracing::info!(log_path = %log_path.display(), "trisim logging initialized");
    Ok(())
}
