// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Synchronous lifecycle event fan-out.
//!
//! Subscribers are invoked in registration order on the emitting thread, with
//! only a snapshot of the subscriber list taken under the bus lock. The
//! registry never emits while holding its own lock, so subscribers may call
//! back into it.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use log::{error, info};

use crate::process::ProcessId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    UserConnect,
    UserDisconnect,
    ProcUserDefine,
    ProcUserUndefine,
    ProcUserStart,
    ProcUserStop,
    ProcStateRunning,
    ProcStateStopped,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::UserConnect => "USER_CONNECT",
            EventKind::UserDisconnect => "USER_DISCONNECT",
            EventKind::ProcUserDefine => "PROC_USER_DEFINE",
            EventKind::ProcUserUndefine => "PROC_USER_UNDEFINE",
            EventKind::ProcUserStart => "PROC_USER_START",
            EventKind::ProcUserStop => "PROC_USER_STOP",
            EventKind::ProcStateRunning => "PROC_STATE_RUNNING",
            EventKind::ProcStateStopped => "PROC_STATE_STOPPED",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Process the event concerns; `None` for session events.
    pub process: Option<ProcessId>,
    pub timestamp: SystemTime,
    pub kind: EventKind,
}

impl Event {
    pub fn new(kind: EventKind, process: Option<ProcessId>) -> Self {
        Self {
            process,
            timestamp: SystemTime::now(),
            kind,
        }
    }

    pub fn process(kind: EventKind, id: ProcessId) -> Self {
        Self::new(kind, Some(id))
    }
}

pub trait EventListener: Send + Sync {
    fn report(&self, event: &Event);
}

#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<Arc<dyn EventListener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn EventListener>) {
        self.lock().push(listener);
    }

    /// Remove the first registration of `listener`.
    pub fn unregister(&self, listener: &Arc<dyn EventListener>) -> Option<Arc<dyn EventListener>> {
        let mut listeners = self.lock();
        let pos = listeners.iter().position(|l| Arc::ptr_eq(l, listener))?;
        Some(listeners.remove(pos))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn emit(&self, event: Event) {
        let snapshot: Vec<Arc<dyn EventListener>> = self.lock().clone();
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener.report(&event))).is_err() {
                error!("event listener panicked while handling {}", event.kind);
            }
        }
    }

    pub fn emit_all(&self, events: impl IntoIterator<Item = Event>) {
        for event in events {
            self.emit(event);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn EventListener>>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Writes every event to the daemon log.
pub struct LogListener;

impl EventListener for LogListener {
    fn report(&self, event: &Event) {
        match event.process {
            Some(id) => info!("event {} process {id}", event.kind),
            None => info!("event {}", event.kind),
        }
    }
}
