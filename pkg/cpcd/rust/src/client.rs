// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Blocking client for the control protocol.

use std::fmt::Write as _;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use thiserror::Error;

use crate::error::{ErrorCode, RequestError};
use crate::process::{ProcessDefinition, ProcessId};
use crate::protocol::{
    DEFINE_PROCESS, LIST_PROCESSES, PARSE_ERROR, SHOW_VERSION, START_PROCESS, STOP_PROCESS,
    UNDEFINE_PROCESS, definition_arguments,
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Io(#[from] io::Error),
    #[error("connection closed by daemon")]
    Disconnected,
    #[error("expected reply '{expected}', got '{got}'")]
    UnexpectedReply { expected: String, got: String },
    #[error("malformed reply: {0}")]
    Malformed(String),
    #[error("request rejected ({code:?}): {source}")]
    Rejected {
        code: ErrorCode,
        #[source]
        source: RequestError,
    },
}

impl From<RequestError> for ClientError {
    fn from(source: RequestError) -> Self {
        ClientError::Rejected {
            code: source.code(),
            source,
        }
    }
}

/// A parsed reply block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyBlock {
    pub command: String,
    pub fields: Vec<(String, String)>,
}

impl ReplyBlock {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// The reply's status as a result.
    pub fn status(&self) -> Result<(), ClientError> {
        let raw = self
            .get("status")
            .ok_or_else(|| ClientError::Malformed(format!("'{}' without status", self.command)))?;
        let code: i32 = raw
            .parse()
            .map_err(|_| ClientError::Malformed(format!("status '{raw}'")))?;
        if code == 0 {
            return Ok(());
        }
        let code = ErrorCode::from_i32(code)
            .ok_or_else(|| ClientError::Malformed(format!("status '{raw}'")))?;
        let message = self.get("errormessage").unwrap_or_default();
        Err(RequestError::new(code, message).into())
    }

    fn id(&self) -> Result<ProcessId, ClientError> {
        let raw = self
            .get("id")
            .ok_or_else(|| ClientError::Malformed(format!("'{}' without id", self.command)))?;
        ProcessId::parse(raw).ok_or_else(|| ClientError::Malformed(format!("id '{raw}'")))
    }
}

/// One entry of a `list processes` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedProcess {
    pub fields: Vec<(String, String)>,
}

impl ListedProcess {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn id(&self) -> Option<ProcessId> {
        self.get("id").and_then(ProcessId::parse)
    }

    pub fn status(&self) -> Option<&str> {
        self.get("status")
    }

    pub fn pid(&self) -> Option<u32> {
        self.get("pid").and_then(|pid| pid.parse().ok())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub protocol: u32,
    pub version: String,
}

pub struct CpcClient {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl CpcClient {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)?;
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> Result<Self, ClientError> {
        stream.set_nodelay(true)?;
        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: stream,
        })
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), ClientError> {
        self.writer.set_read_timeout(timeout)?;
        Ok(())
    }

    pub fn define(&mut self, definition: &ProcessDefinition) -> Result<ProcessId, ClientError> {
        let args = definition_arguments(definition);
        let reply = self.request(DEFINE_PROCESS, &args)?;
        reply.status()?;
        reply.id()
    }

    pub fn undefine(&mut self, id: ProcessId) -> Result<(), ClientError> {
        self.id_request(UNDEFINE_PROCESS, id)
    }

    pub fn start(&mut self, id: ProcessId) -> Result<(), ClientError> {
        self.id_request(START_PROCESS, id)
    }

    pub fn stop(&mut self, id: ProcessId) -> Result<(), ClientError> {
        self.id_request(STOP_PROCESS, id)
    }

    fn id_request(&mut self, command: &'static str, id: ProcessId) -> Result<(), ClientError> {
        self.request(command, &[("id", id.to_string())])?.status()
    }

    pub fn show_version(&mut self) -> Result<VersionInfo, ClientError> {
        let reply = self.request(SHOW_VERSION, &[])?;
        let protocol = reply
            .get("supported protocol")
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| ClientError::Malformed("missing protocol version".into()))?;
        Ok(VersionInfo {
            protocol,
            version: reply.get("version").unwrap_or_default().to_string(),
        })
    }

    pub fn list(&mut self) -> Result<Vec<ListedProcess>, ClientError> {
        self.send(LIST_PROCESSES, &[])?;
        let header = self.read_block()?;
        if header.command != "start processes" {
            return Err(unexpected("start processes", header.command));
        }
        let mut processes = Vec::new();
        loop {
            let block = self.read_block()?;
            match block.command.as_str() {
                "end processes" => return Ok(processes),
                "process" => processes.push(ListedProcess {
                    fields: block.fields,
                }),
                _ => return Err(unexpected("process", block.command)),
            }
        }
    }

    /// Send a request and read its single-block reply.
    pub fn request(
        &mut self,
        command: &str,
        args: &[(&str, String)],
    ) -> Result<ReplyBlock, ClientError> {
        self.send(command, args)?;
        let reply = self.read_block()?;
        if reply.command == PARSE_ERROR {
            reply.status()?;
        }
        if reply.command != command {
            return Err(unexpected(command, reply.command));
        }
        Ok(reply)
    }

    fn send(&mut self, command: &str, args: &[(&str, String)]) -> Result<(), ClientError> {
        let mut text = String::new();
        text.push_str(command);
        text.push('\n');
        for (name, value) in args {
            let _ = writeln!(text, "{name}: {value}");
        }
        text.push('\n');
        self.writer.write_all(text.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    /// Read up to the next blank line, skipping leading blank lines.
    fn read_block(&mut self) -> Result<ReplyBlock, ClientError> {
        let mut command = None;
        let mut fields = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Err(ClientError::Disconnected);
            }
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if trimmed.is_empty() {
                if command.is_some() {
                    break;
                }
                continue;
            }
            if command.is_none() {
                command = Some(trimmed.to_string());
                continue;
            }
            let (name, value) = trimmed
                .split_once(':')
                .ok_or_else(|| ClientError::Malformed(trimmed.to_string()))?;
            fields.push((name.trim().to_string(), value.trim().to_string()));
        }
        Ok(ReplyBlock {
            command: command.unwrap_or_default(),
            fields,
        })
    }
}

fn unexpected(expected: &str, got: String) -> ClientError {
    ClientError::UnexpectedReply {
        expected: expected.to_string(),
        got,
    }
}
