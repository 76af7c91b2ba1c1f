// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Line-based control protocol.
//!
//! A request is a command line followed by `name: value` argument lines and
//! a blank line. A reply is the echoed command, `name: value` lines and a
//! blank line. The same grammar is used for the persisted process list.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::{self, BufRead, Write};

use log::debug;

use crate::constants::PROTOCOL_VERSION;
use crate::error::{ParseError, RequestError, RequestStatus};
use crate::process::{Process, ProcessDefinition, ProcessId, ProcessType, ShutdownSignal};

pub const DEFINE_PROCESS: &str = "define process";
pub const UNDEFINE_PROCESS: &str = "undefine process";
pub const START_PROCESS: &str = "start process";
pub const STOP_PROCESS: &str = "stop process";
pub const LIST_PROCESSES: &str = "list processes";
pub const SHOW_VERSION: &str = "show version";
pub const PARSE_ERROR: &str = "parse error";

const LIST_BEGIN: &str = "start processes";
const LIST_END: &str = "end processes";
const LIST_ENTRY: &str = "process";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgType {
    Int,
    Str,
}

#[derive(Debug)]
struct ArgSpec {
    name: &'static str,
    arg_type: ArgType,
    required: bool,
}

const fn required(name: &'static str, arg_type: ArgType) -> ArgSpec {
    ArgSpec {
        name,
        arg_type,
        required: true,
    }
}

const fn optional(name: &'static str, arg_type: ArgType) -> ArgSpec {
    ArgSpec {
        name,
        arg_type,
        required: false,
    }
}

#[derive(Debug)]
struct CommandSpec {
    name: &'static str,
    args: &'static [ArgSpec],
    /// `(alias, argument)` pairs.
    aliases: &'static [(&'static str, &'static str)],
}

const ID_ONLY: &[ArgSpec] = &[required("id", ArgType::Int)];

const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: DEFINE_PROCESS,
        args: &[
            optional("id", ArgType::Int),
            required("name", ArgType::Str),
            required("group", ArgType::Str),
            optional("env", ArgType::Str),
            required("path", ArgType::Str),
            optional("args", ArgType::Str),
            required("type", ArgType::Str),
            required("cwd", ArgType::Str),
            required("owner", ArgType::Str),
            optional("runas", ArgType::Str),
            optional("stdin", ArgType::Str),
            optional("stdout", ArgType::Str),
            optional("stderr", ArgType::Str),
            optional("ulimit", ArgType::Str),
            optional("shutdown", ArgType::Str),
        ],
        aliases: &[],
    },
    CommandSpec {
        name: UNDEFINE_PROCESS,
        args: ID_ONLY,
        aliases: &[("i", "id")],
    },
    CommandSpec {
        name: START_PROCESS,
        args: ID_ONLY,
        aliases: &[],
    },
    CommandSpec {
        name: STOP_PROCESS,
        args: ID_ONLY,
        aliases: &[],
    },
    CommandSpec {
        name: LIST_PROCESSES,
        args: &[],
        aliases: &[],
    },
    CommandSpec {
        name: SHOW_VERSION,
        args: &[],
        aliases: &[],
    },
];

const COMMAND_ALIASES: &[(&str, &str)] = &[("undef", UNDEFINE_PROCESS)];

fn lookup_command(line: &str) -> Option<&'static CommandSpec> {
    let name = COMMAND_ALIASES
        .iter()
        .find(|(alias, _)| *alias == line)
        .map_or(line, |&(_, target)| target);
    COMMANDS.iter().find(|spec| spec.name == name)
}

/// A well-formed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Define(ProcessDefinition),
    Undefine(ProcessId),
    Start(ProcessId),
    Stop(ProcessId),
    List,
    ShowVersion,
}

/// What the reader produced for one request.
#[derive(Debug)]
pub enum Incoming {
    Request(Request),
    /// A known command with bad arguments. The whole request has been
    /// consumed, so the session can carry on.
    Rejected {
        command: &'static str,
        error: ParseError,
    },
}

/// Pulls requests off a line stream.
pub struct RequestReader<R> {
    input: R,
    line: String,
}

impl<R: BufRead> RequestReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            line: String::new(),
        }
    }

    /// Next line with surrounding whitespace removed, or `None` at end of
    /// stream. Comment lines are skipped.
    fn next_line(&mut self) -> Result<Option<&str>, ParseError> {
        loop {
            self.line.clear();
            if self.input.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            if !self.line.trim_start().starts_with('#') {
                return Ok(Some(self.line.trim()));
            }
        }
    }

    /// Read the next request. `Ok(None)` is a clean end of stream; `Err` means
    /// the session cannot continue (unknown command or I/O failure).
    pub fn next_request(&mut self) -> Result<Option<Incoming>, ParseError> {
        let command = loop {
            match self.next_line()? {
                None => return Ok(None),
                Some("") => continue,
                Some(line) => break line.to_string(),
            }
        };

        let Some(spec) = lookup_command(&command) else {
            self.skip_arguments()?;
            return Err(ParseError::UnknownCommand(command));
        };

        let mut values: HashMap<&'static str, String> = HashMap::new();
        let mut first_error = None;
        while let Some(line) = self.next_line()? {
            if line.is_empty() {
                break;
            }
            if first_error.is_some() {
                continue;
            }
            match parse_argument(spec, line) {
                Ok((name, value)) => {
                    values.insert(name, value);
                }
                Err(e) => first_error = Some(e),
            }
        }

        let incoming = match first_error.map_or_else(|| build_request(spec, values), Err) {
            Ok(request) => Incoming::Request(request),
            Err(error) => Incoming::Rejected {
                command: spec.name,
                error,
            },
        };
        Ok(Some(incoming))
    }

    fn skip_arguments(&mut self) -> Result<(), ParseError> {
        while let Some(line) = self.next_line()? {
            if line.is_empty() {
                break;
            }
        }
        Ok(())
    }
}

fn parse_argument(spec: &CommandSpec, line: &str) -> Result<(&'static str, String), ParseError> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| ParseError::MalformedLine(line.to_string()))?;
    let (name, value) = (name.trim(), value.trim());

    let name = match spec.aliases.iter().find(|(alias, _)| *alias == name) {
        Some((alias, target)) => {
            debug!("argument alias '{alias}' used for '{target}' in '{}'", spec.name);
            *target
        }
        None => name,
    };
    let arg = spec
        .args
        .iter()
        .find(|arg| arg.name == name)
        .ok_or_else(|| ParseError::UnknownArgument(name.to_string()))?;
    if arg.arg_type == ArgType::Int && ProcessId::parse(value).is_none() {
        return Err(ParseError::TypeMismatch {
            name: arg.name,
            value: value.to_string(),
        });
    }
    Ok((arg.name, value.to_string()))
}

fn build_request(
    spec: &CommandSpec,
    mut values: HashMap<&'static str, String>,
) -> Result<Request, ParseError> {
    if let Some(missing) = spec
        .args
        .iter()
        .find(|arg| arg.required && !values.contains_key(arg.name))
    {
        return Err(ParseError::MissingArgument(missing.name));
    }
    // Int arguments were validated while parsing.
    let id = |values: &HashMap<&'static str, String>| {
        values.get("id").and_then(|v| ProcessId::parse(v))
    };
    let id_arg = |values: &HashMap<&'static str, String>| {
        id(values).ok_or(ParseError::MissingArgument("id"))
    };

    match spec.name {
        DEFINE_PROCESS => {
            let mut take = |name: &str| values.remove(name).unwrap_or_default();
            let type_value = take("type");
            let process_type =
                ProcessType::parse(&type_value).ok_or_else(|| ParseError::TypeMismatch {
                    name: "type",
                    value: type_value.clone(),
                })?;
            let shutdown_value = take("shutdown");
            let shutdown =
                ShutdownSignal::parse(&shutdown_value).ok_or_else(|| ParseError::TypeMismatch {
                    name: "shutdown",
                    value: shutdown_value.clone(),
                })?;
            let id = take("id");
            Ok(Request::Define(ProcessDefinition {
                id: ProcessId::parse(&id),
                name: take("name"),
                group: take("group"),
                path: take("path"),
                args: take("args"),
                cwd: take("cwd"),
                env: take("env"),
                owner: take("owner"),
                runas: take("runas"),
                stdin: take("stdin"),
                stdout: take("stdout"),
                stderr: take("stderr"),
                ulimit: take("ulimit"),
                process_type,
                shutdown,
            }))
        }
        UNDEFINE_PROCESS => Ok(Request::Undefine(id_arg(&values)?)),
        START_PROCESS => Ok(Request::Start(id_arg(&values)?)),
        STOP_PROCESS => Ok(Request::Stop(id_arg(&values)?)),
        LIST_PROCESSES => Ok(Request::List),
        SHOW_VERSION => Ok(Request::ShowVersion),
        other => Err(ParseError::UnknownCommand(other.to_string())),
    }
}

/// A reply block: the echoed command followed by `name: value` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    command: &'static str,
    lines: Vec<(&'static str, String)>,
}

impl Reply {
    pub fn new(command: &'static str) -> Self {
        Self {
            command,
            lines: Vec::new(),
        }
    }

    pub fn with(mut self, name: &'static str, value: impl ToString) -> Self {
        self.lines.push((name, value.to_string()));
        self
    }

    pub fn error_message(&self) -> Option<&str> {
        self.lines
            .iter()
            .find(|(name, _)| *name == "errormessage")
            .map(|(_, value)| value.as_str())
    }

    fn with_status(self, status: &RequestStatus) -> Self {
        let reply = self.with("status", status.code());
        match status.error_message() {
            Some(message) => reply.with("errormessage", message),
            None => reply,
        }
    }

    pub fn define(result: &Result<ProcessId, RequestError>) -> Self {
        let reply = Self::new(DEFINE_PROCESS).with_status(&RequestStatus::from(result));
        match result {
            Ok(id) => reply.with("id", id),
            Err(_) => reply,
        }
    }

    /// Reply shape shared by undefine, start and stop.
    pub fn for_id(
        command: &'static str,
        id: ProcessId,
        result: &Result<(), RequestError>,
    ) -> Self {
        Self::new(command)
            .with("id", id)
            .with_status(&RequestStatus::from(result))
    }

    pub fn rejected(command: &'static str, error: &ParseError) -> Self {
        Self::new(command)
            .with_status(&RequestStatus::Error(RequestError::error(error.to_string())))
    }

    pub fn parse_error(error: &ParseError) -> Self {
        Self::rejected(PARSE_ERROR, error)
    }

    pub fn version() -> Self {
        Self::new(SHOW_VERSION)
            .with("supported protocol", PROTOCOL_VERSION)
            .with("version", env!("CARGO_PKG_VERSION"))
    }

    pub fn write_to(&self, out: &mut impl Write) -> io::Result<()> {
        let mut text = String::new();
        text.push_str(self.command);
        text.push('\n');
        for (name, value) in &self.lines {
            let _ = writeln!(text, "{name}: {value}");
        }
        text.push('\n');
        out.write_all(text.as_bytes())?;
        out.flush()
    }
}

/// `name: value` arguments of a `define process` request for `def`, in
/// schema order. `id` is present only when set.
pub fn definition_arguments(def: &ProcessDefinition) -> Vec<(&'static str, String)> {
    let mut args = Vec::with_capacity(15);
    if let Some(id) = def.id {
        args.push(("id", id.to_string()));
    }
    args.extend([
        ("name", def.name.clone()),
        ("group", def.group.clone()),
        ("env", def.env.clone()),
        ("path", def.path.clone()),
        ("args", def.args.clone()),
        ("type", def.process_type.to_string()),
        ("cwd", def.cwd.clone()),
        ("owner", def.owner.clone()),
        ("runas", def.runas.clone()),
        ("stdin", def.stdin.clone()),
        ("stdout", def.stdout.clone()),
        ("stderr", def.stderr.clone()),
        ("ulimit", def.ulimit.clone()),
        ("shutdown", def.shutdown.to_string()),
    ]);
    args
}

/// Write the `list processes` reply.
pub fn write_process_list(out: &mut impl Write, processes: &[Process]) -> io::Result<()> {
    let mut text = String::new();
    let _ = write!(text, "{LIST_BEGIN}\n\n");
    for process in processes {
        let _ = writeln!(text, "{LIST_ENTRY}");
        for (name, value) in definition_arguments(process.definition()) {
            let _ = writeln!(text, "{name}: {value}");
        }
        let _ = writeln!(text, "status: {}", process.status());
        if let Some(pid) = process.pid() {
            let _ = writeln!(text, "pid: {pid}");
        }
        text.push('\n');
    }
    let _ = write!(text, "{LIST_END}\n\n");
    out.write_all(text.as_bytes())?;
    out.flush()
}

/// Append the requests that recreate `processes`: a `define process` block
/// for each, plus a `start process` block for each started permanent one.
pub fn serialize_process_list(processes: &[Process]) -> String {
    let mut text = String::new();
    for process in processes {
        let _ = writeln!(text, "{DEFINE_PROCESS}");
        for (name, value) in definition_arguments(process.definition()) {
            let _ = writeln!(text, "{name}: {value}");
        }
        text.push('\n');
        if process.status().is_started() && !process.is_temporary() {
            let _ = write!(text, "{START_PROCESS}\nid: {}\n\n", process.id());
        }
    }
    text
}
