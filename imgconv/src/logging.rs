//! Logging setup
//!
//! The library only emits `tracing` events. Binaries call [`init_logging`]
//! once to get a daily-rolling log file plus coloured stderr output.
//!
//! ```no_run
//! use imgconv::logging::{init_logging, LogConfig};
//!
//! init_logging("imgconv", LogConfig::default()).expect("Failed to initialize logging");
//! tracing::info!("Program started");
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Defaults to the system temp dir.
    pub log_dir: PathBuf,
    /// Log files kept after pruning.
    pub max_files: usize,
    pub level: Level,
    /// Mirror events to stderr.
    pub stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: std::env::temp_dir(),
            max_files: 5,
            level: Level::INFO,
            stderr: true,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.log_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_max_files(mut self, count: usize) -> Self {
        self.max_files = count;
        self
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_stderr(mut self, enabled: bool) -> Self {
        self.stderr = enabled;
        self
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the configured
/// level. Log files are named `{program_name}.log.{date}`.
pub fn init_logging(program_name: &str, config: LogConfig) -> Result<()> {
    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("Failed to create log directory: {:?}", config.log_dir))?;

    let log_file_name = format!("{}.log", program_name);
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &config.log_dir, &log_file_name);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{}={},imgconv={}",
            program_name.replace('-', "_"),
            config.level,
            config.level
        ))
    });

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true);

    let stderr_layer = config.stderr.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(false)
            .with_line_number(false)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    tracing::debug!(
        program = program_name,
        log_dir = ?config.log_dir,
        log_file = log_file_name,
        max_files = config.max_files,
        level = ?config.level,
        "Logging system initialized"
    );

    cleanup_old_logs(&config.log_dir, program_name, config.max_files)?;

    Ok(())
}

/// Delete all but the `max_files` most recently modified logs of `program_name`.
fn cleanup_old_logs(log_dir: &Path, program_name: &str, max_files: usize) -> Result<()> {
    let entries = std::fs::read_dir(log_dir)
        .with_context(|| format!("Failed to read log directory: {:?}", log_dir))?;

    let prefix = format!("{}.log", program_name);
    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();

    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with(&prefix))
            .unwrap_or(false);
        if !matches {
            continue;
        }
        if let Ok(modified) = std::fs::metadata(&path).and_then(|m| m.modified()) {
            log_files.push((path, modified));
        }
    }

    if log_files.len() > max_files {
        log_files.sort_by(|a, b| b.1.cmp(&a.1));
        for (path, _) in log_files.iter().skip(max_files) {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!(path = ?path, error = %e, "Failed to remove old log file");
            } else {
                tracing::debug!(path = ?path, "Removed old log file");
            }
        }
    }

    Ok(())
}

/// Record one external converter run.
pub fn log_external_tool(
    program: &Path,
    args: &[String],
    diagnostics: &str,
    exit_code: Option<i32>,
    duration: Duration,
) {
    let command = format!("{} {}", program.display(), args.join(" "));

    match exit_code {
        Some(0) => {
            tracing::info!(
                command = %command,
                duration_secs = duration.as_secs_f64(),
                exit_code = 0,
                "External tool completed successfully"
            );
            if !diagnostics.is_empty() {
                tracing::debug!(command = %command, stderr = %diagnostics, "External tool stderr");
            }
        }
        Some(code) => {
            tracing::error!(
                command = %command,
                duration_secs = duration.as_secs_f64(),
                exit_code = code,
                stderr = %diagnostics,
                "External tool failed"
            );
        }
        None => {
            tracing::error!(
                command = %command,
                duration_secs = duration.as_secs_f64(),
                stderr = %diagnostics,
                "External tool terminated without exit code"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::new()
            .with_log_dir("/tmp/imgconv-logs")
            .with_max_files(2)
            .with_level(Level::DEBUG)
            .with_stderr(false);
        assert_eq!(config.log_dir, PathBuf::from("/tmp/imgconv-logs"));
        assert_eq!(config.max_files, 2);
        assert_eq!(config.level, Level::DEBUG);
        assert!(!config.stderr);
    }

    #[test]
    fn test_cleanup_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        for day in 1..=4 {
            let path = dir.path().join(format!("imgconv.log.2026-01-0{day}"));
            fs::write(&path, "x").unwrap();
            // distinct mtimes
            std::thread::sleep(Duration::from_millis(20));
        }
        fs::write(dir.path().join("other.log"), "keep").unwrap();

        cleanup_old_logs(dir.path(), "imgconv", 2).unwrap();

        let mut left: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(
            left,
            ["imgconv.log.2026-01-03", "imgconv.log.2026-01-04", "other.log"]
        );
    }

    #[test]
    fn test_log_external_tool_without_subscriber() {
        log_external_tool(
            Path::new("convert"),
            &["-".to_string(), "png:-".to_string()],
            "warning",
            Some(1),
            Duration::from_millis(5),
        );
    }
}
