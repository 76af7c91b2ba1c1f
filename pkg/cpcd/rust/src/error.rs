// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::constants::MAX_STATUS_MESSAGE_LEN;

/// Non-OK reply codes of the control protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Error = 1,
    AlreadyExists = 2,
    NotExists = 3,
    AlreadyStopped = 4,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            1 => Some(ErrorCode::Error),
            2 => Some(ErrorCode::AlreadyExists),
            3 => Some(ErrorCode::NotExists),
            4 => Some(ErrorCode::AlreadyStopped),
            _ => None,
        }
    }
}

/// A rejected request: a code plus a bounded human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RequestError {
    code: ErrorCode,
    message: String,
}

impl RequestError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: truncate_message(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Error, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AlreadyExists, message)
    }

    pub fn not_exists() -> Self {
        Self::new(ErrorCode::NotExists, "No such process")
    }

    pub fn already_stopped() -> Self {
        Self::new(ErrorCode::AlreadyStopped, "Already stopped")
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Outcome of a control request as reported on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestStatus {
    Ok,
    Error(RequestError),
}

impl RequestStatus {
    pub fn code(&self) -> i32 {
        match self {
            RequestStatus::Ok => 0,
            RequestStatus::Error(e) => e.code().as_i32(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, RequestStatus::Ok)
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            RequestStatus::Ok => None,
            RequestStatus::Error(e) => Some(e.message()),
        }
    }
}

impl<T> From<&Result<T, RequestError>> for RequestStatus {
    fn from(result: &Result<T, RequestError>) -> Self {
        match result {
            Ok(_) => RequestStatus::Ok,
            Err(e) => RequestStatus::Error(e.clone()),
        }
    }
}

fn truncate_message(mut message: String) -> String {
    if message.len() > MAX_STATUS_MESSAGE_LEN {
        let mut end = MAX_STATUS_MESSAGE_LEN;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }
    // Replies are line based.
    if message.contains('\n') {
        message = message.replace('\n', " ");
    }
    message
}

/// Failures detected by the supervisor while launching a child.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("no path given")]
    MissingPath,
    #[error("invalid ulimit '{0}'")]
    InvalidLimit(String),
    #[error("unknown user '{0}'")]
    UnknownUser(String),
    #[error("invalid string for exec: {0}")]
    InvalidString(String),
    #[error("failed to open {stream} '{}': {source}", path.display())]
    Redirect {
        stream: &'static str,
        path: PathBuf,
        source: io::Error,
    },
    #[error("spawn failed: {0}")]
    Os(#[from] io::Error),
    #[error("intermediate process exited with {0}")]
    Intermediate(std::process::ExitStatus),
    #[error("pid file {} never appeared", .0.display())]
    PidFileTimeout(PathBuf),
}

/// Failures while persisting or reading the process list.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    /// No current-file representation is left on disk.
    #[error("process list lost: {} missing after failed link: {source}", path.display())]
    Fatal { path: PathBuf, source: io::Error },
}

/// Control-protocol grammar failures.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Unknown argument: {0}")]
    UnknownArgument(String),
    #[error("Missing mandatory argument: {0}")]
    MissingArgument(&'static str),
    #[error("Invalid value for {name}: {value}")]
    TypeMismatch { name: &'static str, value: String },
    #[error("Malformed line: {0}")]
    MalformedLine(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}
