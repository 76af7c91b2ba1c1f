// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Managed process records: the user-declared definition plus the runtime
//! state maintained by the supervisor.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::constants::MAX_PROCESS_ID;

/// Registry key, always in `1..=8191`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(u32);

impl ProcessId {
    pub fn new(id: u32) -> Option<Self> {
        (1..=MAX_PROCESS_ID).contains(&id).then_some(Self(id))
    }

    /// Strict decimal parse: ASCII digits only, no sign, no padding.
    pub fn parse(s: &str) -> Option<Self> {
        if s.is_empty() || s.len() > 4 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        s.parse().ok().and_then(Self::new)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessType {
    /// Respawned whenever it exits.
    #[default]
    Permanent,
    /// Started once; never respawned and never survives a daemon restart.
    Temporary,
}

impl ProcessType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "permanent" => Some(ProcessType::Permanent),
            "temporary" => Some(ProcessType::Temporary),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessType::Permanent => "permanent",
            ProcessType::Temporary => "temporary",
        }
    }
}

impl fmt::Display for ProcessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First signal sent when stopping a process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownSignal {
    #[default]
    Term,
    Kill,
}

impl ShutdownSignal {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "" | "SIGTERM" => Some(ShutdownSignal::Term),
            "SIGKILL" => Some(ShutdownSignal::Kill),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ShutdownSignal::Term => "SIGTERM",
            ShutdownSignal::Kill => "SIGKILL",
        }
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl ProcessStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessStatus::Stopped => "stopped",
            ProcessStatus::Starting => "starting",
            ProcessStatus::Running => "running",
            ProcessStatus::Stopping => "stopping",
        }
    }

    /// Whether a `start process` directive is persisted for this status.
    pub fn is_started(self) -> bool {
        matches!(self, ProcessStatus::Starting | ProcessStatus::Running)
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a client declares with `define process`.
///
/// List-valued fields (`args`, `env`, `ulimit`) keep their wire spelling so
/// that a definition survives a save/load cycle unchanged; they are parsed
/// when the process is spawned.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessDefinition {
    pub id: Option<ProcessId>,
    pub name: String,
    pub group: String,
    pub path: String,
    pub args: String,
    pub cwd: String,
    pub env: String,
    pub owner: String,
    pub runas: String,
    pub stdin: String,
    pub stdout: String,
    pub stderr: String,
    pub ulimit: String,
    pub process_type: ProcessType,
    pub shutdown: ShutdownSignal,
}

/// A registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
    id: ProcessId,
    definition: ProcessDefinition,
    status: ProcessStatus,
    pid: Option<u32>,
}

impl Process {
    pub(crate) fn new(id: ProcessId, mut definition: ProcessDefinition) -> Self {
        definition.id = Some(id);
        Self {
            id,
            definition,
            status: ProcessStatus::Stopped,
            pid: None,
        }
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn definition(&self) -> &ProcessDefinition {
        &self.definition
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn group(&self) -> &str {
        &self.definition.group
    }

    pub fn process_type(&self) -> ProcessType {
        self.definition.process_type
    }

    pub fn is_temporary(&self) -> bool {
        self.definition.process_type == ProcessType::Temporary
    }

    pub fn status(&self) -> ProcessStatus {
        self.status
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Location of this process's pid file: `<cwd>/<id>`, with an empty
    /// `cwd` meaning the daemon's working directory.
    pub fn pidfile_path(&self) -> PathBuf {
        let dir = if self.definition.cwd.is_empty() {
            Path::new(".")
        } else {
            Path::new(&self.definition.cwd)
        };
        dir.join(self.id.to_string())
    }

    pub(crate) fn set_starting(&mut self) {
        self.status = ProcessStatus::Starting;
    }

    pub(crate) fn set_running(&mut self, pid: u32) {
        self.status = ProcessStatus::Running;
        self.pid = Some(pid);
    }

    /// Replay only: a previously started entry whose group id came from its
    /// pid file, pending the next supervisor tick.
    pub(crate) fn set_adopted(&mut self, pid: u32) {
        self.status = ProcessStatus::Starting;
        self.pid = Some(pid);
    }

    pub(crate) fn set_stopping(&mut self) {
        self.status = ProcessStatus::Stopping;
    }

    pub(crate) fn set_stopped(&mut self) {
        self.status = ProcessStatus::Stopped;
        self.pid = None;
    }
}
