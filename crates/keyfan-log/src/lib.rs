// ABOUTME: Shared logging setup for keyfan binaries
// ABOUTME: stdout carries the plugin response, so logs only ever go to stderr or a file

use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Logging to stderr. Default: INFO level, RUST_LOG override.
pub fn init() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_ansi(false)
        .init();
}

/// File-based logging. Default: INFO level, RUST_LOG override.
///
/// Logs to `path` when given, otherwise to ~/.config/keyfan/{app_name}.log.
/// If setup fails, falls back to stderr logging.
pub fn init_file(app_name: &str, path: Option<PathBuf>) {
    if let Err(e) = init_file_inner(app_name, path) {
        eprintln!("Warning: failed to set up file logging: {e}");
        init();
    }
}

fn init_file_inner(app_name: &str, path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let log_path = match path {
        Some(p) => p,
        None => default_log_path(app_name).ok_or("could not determine config directory")?,
    };
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_ansi(false)
        .try_init()?;

    Ok(())
}

/// Default log file location (~/.config/keyfan/{app_name}.log).
pub fn default_log_path(app_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("keyfan").join(format!("{app_name}.log")))
}

#[cfg(test)]
mod tests {
    #[test]
    fn exports_init() {
        let _ = super::init as fn();
    }

    #[test]
    fn exports_init_file() {
        let _ = super::init_file as fn(&str, Option<std::path::PathBuf>);
    }

    #[test]
    fn default_log_path_is_named_after_app() {
        if let Some(path) = super::default_log_path("keyfan") {
            assert!(path.ends_with("keyfan/keyfan.log"));
        }
    }
}
