use std::{fs::File, path::Path, sync::OnceLock};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const LOG_FILE: &str = "kubectl-picker.log";
pub const FILTER_ENV: &str = "KUBECTL_PICKER_LOG";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs a non-blocking file logger at `<log_dir>/kubectl-picker.log`.
/// The level comes from `KUBECTL_PICKER_LOG` and defaults to `info`. Only the
/// first call installs anything; the endpoint is used by the telemetry build.
pub fn setup_logger(
    log_dir: &str,
    _endpoint: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }

    let file = File::create(Path::new(log_dir).join(LOG_FILE))?;
    let (writer, guard) = tracing_appender::non_blocking(file);
    if LOG_GUARD.set(guard).is_err() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_env(FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = fmt::layer()
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(filter);

    tracing_subscriber::registry().with(file_layer).try_init().ok();
    Ok(())
}

pub fn shutdown() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();

        setup_logger(path, "").unwrap();
        setup_logger(path, "").unwrap();
        assert!(dir.path().join(LOG_FILE).exists());
    }
}
