// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! The process registry and its mutators.
//!
//! A single mutex guards every `Process` along with the unreaped children of
//! temporary processes. Mutators persist and wake the supervisor while still
//! holding it, then release it before emitting their event.

use std::process::Child;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use rand_core::{OsRng, RngCore};

use crate::constants::{MAX_PROCESS_ID, POLL_STEP, STOP_GRACE};
use crate::error::{RequestError, StoreError};
use crate::events::{Event, EventBus, EventKind};
use crate::executor::ProcessExecutor;
use crate::pidfile;
use crate::process::{Process, ProcessDefinition, ProcessId, ProcessStatus, ShutdownSignal};
use crate::session;
use crate::store::ProcessStore;

/// Whether a mutation comes from a client or from replaying the process
/// list at startup. Replayed mutations are neither persisted nor spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Live,
    Replay,
}

#[derive(Default)]
pub(crate) struct RegistryState {
    /// Insertion order is the listing order.
    pub(crate) processes: Vec<Process>,
    /// Temporaries are forked directly and must be waited on.
    pub(crate) children: Vec<Child>,
    pub(crate) shutdown: bool,
}

impl RegistryState {
    fn position(&self, id: ProcessId) -> Option<usize> {
        self.processes.iter().position(|p| p.id() == id)
    }

    pub(crate) fn reap_children(&mut self) {
        self.children.retain_mut(|child| match child.try_wait() {
            Ok(Some(status)) => {
                debug!("reaped temporary process {}: {status}", child.id());
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!("failed to wait for process {}: {e}", child.id());
                false
            }
        });
    }
}

/// Registry of managed processes.
pub struct Registry {
    pub(crate) state: Mutex<RegistryState>,
    pub(crate) wakeup: Condvar,
    pub(crate) executor: Arc<dyn ProcessExecutor>,
    store: Option<ProcessStore>,
    events: EventBus,
}

impl Registry {
    /// A registry without a store keeps everything in memory.
    pub fn new(executor: Arc<dyn ProcessExecutor>, store: Option<ProcessStore>) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            wakeup: Condvar::new(),
            executor,
            store,
            events: EventBus::new(),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn wait_timeout<'a>(
        &self,
        guard: MutexGuard<'a, RegistryState>,
        timeout: Duration,
    ) -> MutexGuard<'a, RegistryState> {
        match self.wakeup.wait_timeout(guard, timeout) {
            Ok((guard, _)) => guard,
            Err(e) => e.into_inner().0,
        }
    }

    pub fn define_process(
        &self,
        definition: ProcessDefinition,
        mode: Mode,
    ) -> Result<ProcessId, RequestError> {
        let mut state = self.lock();
        if state
            .processes
            .iter()
            .any(|p| p.name() == definition.name && p.group() == definition.group)
        {
            return Err(RequestError::already_exists("Name already exists"));
        }
        let id = match definition.id {
            Some(id) if state.position(id).is_some() => {
                return Err(RequestError::already_exists("Id already exists"));
            }
            Some(id) => id,
            None => free_id(&state).ok_or_else(|| RequestError::error("No free process id"))?,
        };

        let process = Process::new(id, definition);
        info!(
            "defined process {id} ({}/{}) type {}",
            process.group(),
            process.name(),
            process.process_type()
        );
        state.processes.push(process);
        self.commit(&state, mode);
        drop(state);

        self.events.emit(Event::process(EventKind::ProcUserDefine, id));
        Ok(id)
    }

    pub fn undefine_process(&self, id: ProcessId, mode: Mode) -> Result<(), RequestError> {
        let mut state = self.lock();
        let idx = state.position(id).ok_or_else(RequestError::not_exists)?;
        if state.processes[idx].status() != ProcessStatus::Stopped {
            self.stop_locked(&mut state, idx);
        }
        let process = state.processes.remove(idx);
        if let Err(e) = pidfile::remove(&process.pidfile_path()) {
            warn!("failed to remove pid file of process {id}: {e}");
        }
        info!("undefined process {id}");
        self.commit(&state, mode);
        drop(state);

        self.events.emit(Event::process(EventKind::ProcUserUndefine, id));
        Ok(())
    }

    pub fn start_process(&self, id: ProcessId, mode: Mode) -> Result<(), RequestError> {
        let mut state = self.lock();
        let idx = state.position(id).ok_or_else(RequestError::not_exists)?;
        match state.processes[idx].status() {
            ProcessStatus::Starting => return Err(RequestError::error("Already starting")),
            ProcessStatus::Running => return Err(RequestError::error("Already started")),
            ProcessStatus::Stopping => return Err(RequestError::error("Currently stopping")),
            ProcessStatus::Stopped => {}
        }
        state.processes[idx].set_starting();

        if mode == Mode::Live {
            match self.spawn_locked(&mut state, idx) {
                Ok(pgid) => info!("started process {id} as group {pgid}"),
                Err(message) => {
                    state.processes[idx].set_stopped();
                    return Err(RequestError::error(message));
                }
            }
        }
        self.commit(&state, mode);
        drop(state);

        self.events.emit(Event::process(EventKind::ProcUserStart, id));
        Ok(())
    }

    pub fn stop_process(&self, id: ProcessId, mode: Mode) -> Result<(), RequestError> {
        let mut state = self.lock();
        let idx = state.position(id).ok_or_else(RequestError::not_exists)?;
        match state.processes[idx].status() {
            ProcessStatus::Stopped => return Err(RequestError::already_stopped()),
            ProcessStatus::Stopping => return Err(RequestError::error("Already stopping")),
            ProcessStatus::Starting | ProcessStatus::Running => {}
        }
        self.stop_locked(&mut state, idx);
        info!("stopped process {id}");
        self.commit(&state, mode);
        drop(state);

        // Stops are reported with the start kind.
        self.events.emit(Event::process(EventKind::ProcUserStart, id));
        Ok(())
    }

    /// Snapshot of every entry in definition order.
    pub fn list_processes(&self) -> Vec<Process> {
        let snapshot = self.lock().processes.clone();
        self.events.emit(Event::new(EventKind::ProcUserStart, None));
        snapshot
    }

    pub fn get(&self, id: ProcessId) -> Option<Process> {
        let state = self.lock();
        state.position(id).map(|idx| state.processes[idx].clone())
    }

    /// Replay the persisted process list, then reconcile the replayed state
    /// with what is actually running. Never fails on malformed content.
    pub fn restore(&self) -> Result<(), StoreError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        match store.open()? {
            Some((path, reader)) => {
                info!("loading process list from {}", path.display());
                session::replay(self, reader);
            }
            None => info!("no process list found, starting empty"),
        }
        self.adopt_replayed();
        Ok(())
    }

    fn adopt_replayed(&self) {
        let mut events = Vec::new();
        let mut temporaries = Vec::new();
        {
            let mut state = self.lock();
            for idx in 0..state.processes.len() {
                let process = &state.processes[idx];
                let id = process.id();
                let recorded = match pidfile::read(&process.pidfile_path()) {
                    Ok(pgid) => pgid,
                    Err(e) => {
                        warn!("failed to read pid file of process {id}: {e}");
                        None
                    }
                };

                if process.is_temporary() {
                    if let Some(pgid) = recorded.filter(|&pgid| self.executor.is_alive(pgid)) {
                        // Marked running so that undefining it stops the group.
                        state.processes[idx].set_running(pgid);
                    }
                    temporaries.push(id);
                    continue;
                }
                if process.status() != ProcessStatus::Starting {
                    continue;
                }
                match recorded {
                    Some(pgid) => {
                        debug!("process {id} recorded as group {pgid}, checking on next tick");
                        state.processes[idx].set_adopted(pgid);
                    }
                    None => match self.spawn_locked(&mut state, idx) {
                        Ok(pgid) => {
                            info!("started process {id} as group {pgid}");
                            events.push(Event::process(EventKind::ProcStateRunning, id));
                        }
                        Err(message) => {
                            error!("failed to start process {id}: {message}");
                            state.processes[idx].set_stopped();
                        }
                    },
                }
            }
            self.commit(&state, Mode::Live);
        }
        self.events.emit_all(events);

        for id in temporaries {
            debug!("removing temporary process {id} left from a previous run");
            if let Err(e) = self.undefine_process(id, Mode::Live) {
                warn!("failed to undefine temporary process {id}: {e}");
            }
        }
    }

    /// Ask the supervisor loop to exit.
    pub fn request_shutdown(&self) {
        self.lock().shutdown = true;
        self.wakeup.notify_all();
    }

    /// Persist and wake the supervisor after a client mutation.
    fn commit(&self, state: &RegistryState, mode: Mode) {
        if mode == Mode::Replay {
            return;
        }
        self.save_locked(state);
        self.wakeup.notify_all();
    }

    pub(crate) fn save_locked(&self, state: &RegistryState) {
        let Some(store) = &self.store else {
            return;
        };
        match store.save(&state.processes) {
            Ok(()) => {}
            Err(e @ StoreError::Fatal { .. }) => error!("CRITICAL: {e}"),
            Err(e) => error!("failed to save process list: {e}"),
        }
    }

    /// Launch the entry at `idx`. On success it is RUNNING with its group id;
    /// on failure its status is left for the caller to settle.
    pub(crate) fn spawn_locked(
        &self,
        state: &mut RegistryState,
        idx: usize,
    ) -> Result<u32, String> {
        let spawned = self
            .executor
            .spawn(&state.processes[idx])
            .map_err(|e| e.to_string())?;
        state.processes[idx].set_running(spawned.pgid);
        state.children.extend(spawned.child);
        Ok(spawned.pgid)
    }

    /// Stop the entry at `idx` and leave it STOPPED. Stopping a stopped or
    /// stopping entry does nothing.
    pub(crate) fn stop_locked(&self, state: &mut RegistryState, idx: usize) {
        let process = &mut state.processes[idx];
        if matches!(
            process.status(),
            ProcessStatus::Stopped | ProcessStatus::Stopping
        ) {
            return;
        }
        let id = process.id();
        let first = process.definition().shutdown;
        let pgid = process.pid();
        let pidfile_path = process.pidfile_path();
        process.set_stopping();

        if let Err(e) = pidfile::remove(&pidfile_path) {
            warn!("failed to remove pid file of process {id}: {e}");
        }
        if let Some(pgid) = pgid {
            debug!("sending {first} to process {id} (group {pgid})");
            if let Err(e) = self.executor.signal(pgid, first) {
                warn!("failed to signal process {id}: {e}");
            }
            if !self.wait_for_exit(state, pgid, STOP_GRACE) {
                debug!("process {id} outlived {first}, sending SIGKILL");
                if let Err(e) = self.executor.signal(pgid, ShutdownSignal::Kill) {
                    warn!("failed to kill process {id}: {e}");
                }
                if !self.wait_for_exit(state, pgid, STOP_GRACE) {
                    warn!("process {id} (group {pgid}) still alive after SIGKILL");
                }
            }
        }
        state.processes[idx].set_stopped();
    }

    fn wait_for_exit(&self, state: &mut RegistryState, pgid: u32, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            state.reap_children();
            if !self.executor.is_alive(pgid) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(POLL_STEP);
        }
    }
}

/// Pick a random unused id, probing linearly from a random start.
fn free_id(state: &RegistryState) -> Option<ProcessId> {
    let start = OsRng.next_u32() % MAX_PROCESS_ID;
    (0..MAX_PROCESS_ID)
        .map(|offset| (start + offset) % MAX_PROCESS_ID + 1)
        .filter_map(ProcessId::new)
        .find(|&id| state.position(id).is_none())
}
