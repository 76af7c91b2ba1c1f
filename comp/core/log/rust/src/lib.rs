// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Logging backend for the process control daemon.
//!
//! Installs a single [`log`] implementation that fans each record out to up to
//! three sinks: the console (stderr), an append-only log file, and the host
//! syslog facility. Console and file records share one line format:
//!
//! ```text
//! 2026-01-02 03:04:05 UTC | CPCD | INFO | (src/registry.rs:42 in ndb_cpcd::registry) | message
//! ```

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, Once};

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::format_description;

/// Environment variable that overrides the configured level.
pub const LOG_LEVEL_ENV: &str = "CPCD_LOG_LEVEL";

const COMPONENT: &str = "CPCD";
const SYSLOG_IDENT: &std::ffi::CStr = c"ndb_cpcd";

static SYSLOG_OPEN: Once = Once::new();

#[derive(Debug, Error)]
pub enum InitError {
    #[error("failed to open log file {}: {source}", path.display())]
    OpenFile { path: PathBuf, source: io::Error },
    #[error(transparent)]
    SetLogger(#[from] SetLoggerError),
}

/// Which sinks to enable and at what level.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LevelFilter,
    pub console: bool,
    pub file: Option<PathBuf>,
    pub syslog: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            console: true,
            file: None,
            syslog: false,
        }
    }
}

impl LogConfig {
    /// Apply the `CPCD_LOG_LEVEL` override, if it parses.
    pub fn with_env_override(mut self) -> Self {
        if let Ok(value) = std::env::var(LOG_LEVEL_ENV)
            && let Ok(level) = LevelFilter::from_str(value.trim())
        {
            self.level = level;
        }
        self
    }
}

/// Install the global logger. Fails if a logger is already installed or the
/// log file cannot be opened.
pub fn init(config: LogConfig) -> Result<(), InitError> {
    let level = config.level;
    let logger = CpcdLogger::new(&config)?;
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(level);
    Ok(())
}

pub struct CpcdLogger {
    level: LevelFilter,
    console: bool,
    file: Option<Mutex<File>>,
    syslog: bool,
}

impl CpcdLogger {
    pub fn new(config: &LogConfig) -> Result<Self, InitError> {
        let file = match config.file {
            Some(ref path) => Some(Mutex::new(open_log_file(path)?)),
            None => None,
        };
        if config.syslog {
            open_syslog();
        }
        Ok(Self {
            level: config.level,
            console: config.console,
            file,
            syslog: config.syslog,
        })
    }

    fn write_syslog(&self, record: &Record) {
        let Ok(message) = CString::new(record.args().to_string().replace('\0', "")) else {
            return;
        };
        // SAFETY: both pointers refer to valid NUL-terminated strings that
        // outlive the call, and "%s" consumes exactly one string argument.
        unsafe {
            libc::syslog(
                syslog_priority(record.level()),
                c"%s".as_ptr(),
                message.as_ptr(),
            );
        }
    }
}

impl Log for CpcdLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        if self.console || self.file.is_some() {
            let line = format_record(record, OffsetDateTime::now_utc());
            if self.console {
                let _ = writeln!(io::stderr().lock(), "{line}");
            }
            if let Some(ref file) = self.file {
                let mut file = file.lock().unwrap_or_else(|e| e.into_inner());
                let _ = writeln!(file, "{line}");
            }
        }

        if self.syslog {
            self.write_syslog(record);
        }
    }

    fn flush(&self) {
        if let Some(ref file) = self.file {
            let mut file = file.lock().unwrap_or_else(|e| e.into_inner());
            let _ = file.flush();
        }
    }
}

/// Render a record in the console/file line format.
pub fn format_record(record: &Record, now: OffsetDateTime) -> String {
    let timestamp = now
        .format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .unwrap_or_default();
    format!(
        "{timestamp} UTC | {COMPONENT} | {} | ({}:{} in {}) | {}",
        record.level(),
        record.file().unwrap_or("<unknown>"),
        record.line().unwrap_or(0),
        record.module_path().unwrap_or("<unknown>"),
        record.args()
    )
}

fn open_log_file(path: &Path) -> Result<File, InitError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| InitError::OpenFile {
            path: path.to_path_buf(),
            source,
        })
}

fn open_syslog() {
    SYSLOG_OPEN.call_once(|| {
        // SAFETY: the ident is a 'static C string, as openlog(3) requires.
        unsafe {
            libc::openlog(
                SYSLOG_IDENT.as_ptr(),
                libc::LOG_PID | libc::LOG_NDELAY,
                libc::LOG_DAEMON,
            );
        }
    });
}

fn syslog_priority(level: Level) -> libc::c_int {
    match level {
        Level::Error => libc::LOG_ERR,
        Level::Warn => libc::LOG_WARNING,
        Level::Info => libc::LOG_INFO,
        Level::Debug | Level::Trace => libc::LOG_DEBUG,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn test_format_record_layout() {
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let line = format_record(
            &Record::builder()
                .args(format_args!("process {} started", 7))
                .level(Level::Info)
                .file(Some("src/registry.rs"))
                .line(Some(42))
                .module_path(Some("ndb_cpcd::registry"))
                .build(),
            now,
        );

        let re = Regex::new(
            r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2} UTC \| CPCD \| INFO \| \(src/registry\.rs:42 in ndb_cpcd::registry\) \| process 7 started$",
        )
        .unwrap();
        assert!(re.is_match(&line), "unexpected line: {line}");
        assert!(line.starts_with("2023-11-14 22:13:20 UTC"));
    }

    #[test]
    fn test_format_record_missing_location() {
        let now = OffsetDateTime::from_unix_timestamp(0).unwrap();
        let line = format_record(
            &Record::builder()
                .args(format_args!("hello"))
                .level(Level::Warn)
                .build(),
            now,
        );
        assert_eq!(
            line,
            "1970-01-01 00:00:00 UTC | CPCD | WARN | (<unknown>:0 in <unknown>) | hello"
        );
    }

    #[test]
    fn test_file_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cpcd.log");
        std::fs::write(&path, "previous line\n").unwrap();

        let logger = CpcdLogger::new(&LogConfig {
            level: LevelFilter::Debug,
            console: false,
            file: Some(path.clone()),
            syslog: false,
        })
        .unwrap();

        logger.log(
            &Record::builder()
                .args(format_args!("first"))
                .level(Level::Info)
                .build(),
        );
        logger.log(
            &Record::builder()
                .args(format_args!("filtered"))
                .level(Level::Trace)
                .build(),
        );
        logger.flush();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "previous line");
        assert!(lines[1].ends_with("| first"));
    }

    #[test]
    fn test_open_file_error() {
        let err = CpcdLogger::new(&LogConfig {
            file: Some(PathBuf::from("/nonexistent/dir/cpcd.log")),
            console: false,
            ..LogConfig::default()
        })
        .err()
        .unwrap();
        assert!(matches!(err, InitError::OpenFile { .. }));
        assert!(err.to_string().contains("/nonexistent/dir/cpcd.log"));
    }

    #[test]
    fn test_syslog_priority_mapping() {
        assert_eq!(syslog_priority(Level::Error), libc::LOG_ERR);
        assert_eq!(syslog_priority(Level::Warn), libc::LOG_WARNING);
        assert_eq!(syslog_priority(Level::Info), libc::LOG_INFO);
        assert_eq!(syslog_priority(Level::Trace), libc::LOG_DEBUG);
    }
}
