use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt};

/// Initialize the global subscriber.
///
/// `RUST_LOG` wins over `default_level`. With `log_dir` set, output goes to a
/// daily-rolling `brain.log` there instead of stderr; keep the returned guard
/// alive until exit so buffered lines are flushed.
///
/// Safe to call multiple times (e.g. in tests); later calls are no-ops.
pub fn init_logging(default_level: &str, json: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (writer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "brain.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (fmt::writer::BoxMakeWriter::new(writer), Some(guard))
        }
        None => (fmt::writer::BoxMakeWriter::new(std::io::stderr), None),
    };

    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(true)
        .with_level(true);

    let installed = if json {
        builder.json().with_current_span(false).try_init().is_ok()
    } else {
        builder.with_ansi(log_dir.is_none()).try_init().is_ok()
    };

    if installed {
        tracing::debug!(json, file = log_dir.is_some(), "logging initialised");
    }
    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let first = init_logging("debug", false, Some(dir.path()));
        let second = init_logging("info", true, None);
        assert!(first.is_some());
        assert!(second.is_none());
    }
}
