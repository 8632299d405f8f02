use std::path::Path;
use thiserror::Error;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const KEEP_LOG_FILES: usize = 7;

#[derive(Debug, Error)]
pub enum LogFileError {
    #[error("log.file '{0}' does not name a file")]
    InvalidPath(String),
    #[error("cannot open log file: {0}")]
    Init(#[from] InitError),
}

// "/var/log/bobcatd.log" rolls at midnight into /var/log/bobcatd.YYYY-MM-DD.log
pub fn rolling_appender(path: &str) -> Result<RollingFileAppender, LogFileError> {
    let path = Path::new(path);
    let prefix = path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| LogFileError::InvalidPath(path.display().to_string()))?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(KEEP_LOG_FILES);
    if let Some(ext) = path.extension().and_then(|s| s.to_str()) {
        builder = builder.filename_suffix(ext);
    }
    Ok(builder.build(dir)?)
}

pub fn init_tracing(log_file: Option<RollingFileAppender>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = log_file.map(|appender| fmt::layer().with_ansi(false).with_writer(appender));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
}
