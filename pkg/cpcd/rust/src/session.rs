// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! A control session: requests from one reader applied to the registry.

use std::io::{self, BufRead, Write};

use log::{debug, info, warn};

use crate::error::ParseError;
use crate::events::{Event, EventKind};
use crate::protocol::{
    Incoming, Reply, Request, RequestReader, START_PROCESS, STOP_PROCESS, UNDEFINE_PROCESS,
    write_process_list,
};
use crate::process::{ProcessId, ProcessType};
use crate::registry::{Mode, Registry};

pub struct Session<'a, R, W> {
    registry: &'a Registry,
    reader: RequestReader<R>,
    writer: W,
    mode: Mode,
    /// Temporaries defined here; undefined when the session ends.
    temporaries: Vec<ProcessId>,
}

impl<'a, R: BufRead, W: Write> Session<'a, R, W> {
    pub fn new(registry: &'a Registry, reader: R, writer: W) -> Self {
        Self {
            registry,
            reader: RequestReader::new(reader),
            writer,
            mode: Mode::Live,
            temporaries: Vec::new(),
        }
    }

    /// Serve requests until end of stream, an unknown command or an I/O
    /// error, then undefine the temporaries this session created.
    pub fn run(mut self) -> io::Result<()> {
        let result = self.serve();
        for id in std::mem::take(&mut self.temporaries) {
            debug!("session ended, undefining temporary process {id}");
            if let Err(e) = self.registry.undefine_process(id, Mode::Live) {
                debug!("temporary process {id} already gone: {e}");
            }
        }
        result
    }

    fn serve(&mut self) -> io::Result<()> {
        loop {
            match self.reader.next_request() {
                Ok(None) => return Ok(()),
                Ok(Some(Incoming::Request(request))) => self.dispatch(request)?,
                Ok(Some(Incoming::Rejected { command, error })) => {
                    warn!("rejected '{command}' request: {error}");
                    self.reply(Reply::rejected(command, &error))?;
                }
                Err(ParseError::Io(e)) => return Err(e),
                Err(error) if self.mode == Mode::Replay => {
                    warn!("skipping invalid request in process list: {error}");
                }
                Err(error) => {
                    warn!("closing session: {error}");
                    return self.reply(Reply::parse_error(&error));
                }
            }
        }
    }

    fn dispatch(&mut self, request: Request) -> io::Result<()> {
        let registry = self.registry;
        let mode = self.mode;
        let reply = match request {
            Request::Define(definition) => {
                let temporary = definition.process_type == ProcessType::Temporary;
                let result = registry.define_process(definition, mode);
                if let (Ok(id), true, Mode::Live) = (&result, temporary, mode) {
                    self.temporaries.push(*id);
                }
                Reply::define(&result)
            }
            Request::Undefine(id) => {
                let result = registry.undefine_process(id, mode);
                if result.is_ok() {
                    self.temporaries.retain(|&t| t != id);
                }
                Reply::for_id(UNDEFINE_PROCESS, id, &result)
            }
            Request::Start(id) => {
                Reply::for_id(START_PROCESS, id, &registry.start_process(id, mode))
            }
            Request::Stop(id) => Reply::for_id(STOP_PROCESS, id, &registry.stop_process(id, mode)),
            Request::List => {
                let processes = registry.list_processes();
                if mode == Mode::Replay {
                    return Ok(());
                }
                return write_process_list(&mut self.writer, &processes);
            }
            Request::ShowVersion => Reply::version(),
        };
        if let Some(message) = reply.error_message() {
            debug!("request failed: {message}");
        }
        self.reply(reply)
    }

    /// Replies are suppressed while replaying.
    fn reply(&mut self, reply: Reply) -> io::Result<()> {
        match self.mode {
            Mode::Live => reply.write_to(&mut self.writer),
            Mode::Replay => Ok(()),
        }
    }
}

/// Apply a persisted process list through a replaying session. Nothing is
/// written back, persisted or spawned; bad requests are logged and skipped.
pub fn replay<R: BufRead>(registry: &Registry, reader: R) {
    let mut session = Session {
        registry,
        reader: RequestReader::new(reader),
        writer: io::sink(),
        mode: Mode::Replay,
        temporaries: Vec::new(),
    };
    match session.serve() {
        Ok(()) => info!("process list replayed"),
        Err(e) => warn!("failed to read process list: {e}"),
    }
}

/// Session bookkeeping for network clients: connect and disconnect events
/// around [`Session::run`].
pub fn serve_client<R: BufRead, W: Write>(
    registry: &Registry,
    peer: &str,
    reader: R,
    writer: W,
) -> io::Result<()> {
    info!("client {peer} connected");
    registry
        .events()
        .emit(Event::new(EventKind::UserConnect, None));
    let result = Session::new(registry, reader, writer).run();
    registry
        .events()
        .emit(Event::new(EventKind::UserDisconnect, None));
    info!("client {peer} disconnected");
    result
}
