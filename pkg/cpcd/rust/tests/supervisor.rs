// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

mod helpers;

use helpers::{DEFAULT_TIMEOUT, GroupReaper, wait_for_group_gone, wait_until};
use ndb_cpcd::supervisor::tick;
use ndb_cpcd::{
    ErrorCode, Event, EventKind, EventListener, ForkExecutor, Mode, ProcessDefinition, ProcessId,
    ProcessStatus, ProcessStore, ProcessType, Registry, ShutdownSignal, Supervisor,
};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Collector {
    events: Mutex<Vec<Event>>,
}

impl Collector {
    fn kinds_for(&self, id: ProcessId) -> Vec<EventKind> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.process == Some(id))
            .map(|e| e.kind)
            .collect()
    }

    fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl EventListener for Collector {
    fn report(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}

struct Fixture {
    dir: tempfile::TempDir,
    registry: Arc<Registry>,
    events: Arc<Collector>,
    reaper: GroupReaper,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = ProcessStore::new(dir.path().join("ndb_cpcd.conf"));
        let registry = Arc::new(Registry::new(Arc::new(ForkExecutor::new()), Some(store)));
        let events = Arc::new(Collector::default());
        registry.events().register(events.clone());
        Self {
            dir,
            registry,
            events,
            reaper: GroupReaper::default(),
        }
    }

    fn definition(&self, name: &str, args: &str) -> ProcessDefinition {
        ProcessDefinition {
            name: name.into(),
            group: "supervisor".into(),
            path: "/bin/sh".into(),
            args: format!("-c \"{args}\""),
            cwd: self.dir.path().display().to_string(),
            owner: "tests".into(),
            ..Default::default()
        }
    }

    fn define_and_start(&mut self, definition: ProcessDefinition) -> (ProcessId, u32) {
        let id = self.registry.define_process(definition, Mode::Live).unwrap();
        self.registry.start_process(id, Mode::Live).unwrap();
        let pgid = self.pid(id).expect("started process has a pid");
        self.reaper.track(pgid);
        (id, pgid)
    }

    fn pid(&self, id: ProcessId) -> Option<u32> {
        self.registry.get(id).and_then(|p| p.pid())
    }

    fn status(&self, id: ProcessId) -> ProcessStatus {
        self.registry.get(id).unwrap().status()
    }

    fn pidfile(&self, id: ProcessId) -> std::path::PathBuf {
        self.dir.path().join(id.to_string())
    }
}

fn read_pidfile(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim_end().parse().ok()
}

fn kill_group(pgid: u32) {
    killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL).unwrap();
    assert!(wait_for_group_gone(pgid, DEFAULT_TIMEOUT));
}

#[test]
fn test_permanent_start_writes_pidfile_and_detaches() {
    let mut fx = Fixture::new();
    let (id, pgid) = fx.define_and_start(fx.definition("detached", "sleep 300"));

    assert_eq!(fx.status(id), ProcessStatus::Running);
    assert_eq!(read_pidfile(&fx.pidfile(id)), Some(pgid));
    assert!(!fx.dir.path().join(format!("{id}.tmp")).exists());
    // The group leader is not our child: it was started through an
    // intermediate process that already exited.
    assert_ne!(
        nix::unistd::getpgid(Some(Pid::from_raw(pgid as i32))).unwrap(),
        nix::unistd::getpgrp()
    );
    assert_eq!(
        fx.events.kinds_for(id),
        vec![EventKind::ProcUserDefine, EventKind::ProcUserStart]
    );

    fx.registry.stop_process(id, Mode::Live).unwrap();
    assert!(wait_for_group_gone(pgid, DEFAULT_TIMEOUT));
    assert!(!fx.pidfile(id).exists());
    assert_eq!(fx.pid(id), None);
}

#[test]
fn test_killed_permanent_process_is_respawned() {
    let mut fx = Fixture::new();
    let (id, first) = fx.define_and_start(fx.definition("respawn", "sleep 300"));
    fx.events.clear();

    kill_group(first);
    tick(&fx.registry);

    assert_eq!(
        fx.events.kinds_for(id),
        vec![EventKind::ProcStateStopped, EventKind::ProcStateRunning]
    );
    let second = fx.pid(id).expect("respawned process has a pid");
    fx.reaper.track(second);
    assert_ne!(second, first);
    assert_eq!(fx.status(id), ProcessStatus::Running);
    assert_eq!(read_pidfile(&fx.pidfile(id)), Some(second));

    // A healthy process leaves the tick quiet.
    fx.events.clear();
    tick(&fx.registry);
    assert!(fx.events.kinds_for(id).is_empty());
    assert_eq!(fx.pid(id), Some(second));
}

#[test]
fn test_exited_temporary_process_is_not_respawned() {
    let mut fx = Fixture::new();
    let mut definition = fx.definition("oneshot", "exit 3");
    definition.process_type = ProcessType::Temporary;
    let (id, _) = fx.define_and_start(definition);
    fx.events.clear();

    assert!(wait_until(DEFAULT_TIMEOUT, || {
        tick(&fx.registry);
        fx.status(id) == ProcessStatus::Stopped
    }));
    assert_eq!(fx.events.kinds_for(id), vec![EventKind::ProcStateStopped]);
    assert_eq!(fx.pid(id), None);
    assert!(!fx.pidfile(id).exists());
}

#[test]
fn test_term_ignoring_group_is_killed() {
    let mut fx = Fixture::new();
    let (id, pgid) = fx.define_and_start(fx.definition("stubborn", "trap '' TERM; sleep 300"));

    let started = Instant::now();
    fx.registry.stop_process(id, Mode::Live).unwrap();
    assert!(wait_for_group_gone(pgid, DEFAULT_TIMEOUT));
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(fx.status(id), ProcessStatus::Stopped);
}

#[test]
fn test_sigkill_shutdown_skips_term() {
    let mut fx = Fixture::new();
    let mut definition = fx.definition("brutal", "trap '' TERM; sleep 300");
    definition.shutdown = ShutdownSignal::Kill;
    let (id, pgid) = fx.define_and_start(definition);

    fx.registry.stop_process(id, Mode::Live).unwrap();
    assert!(wait_for_group_gone(pgid, DEFAULT_TIMEOUT));
    assert_eq!(fx.status(id), ProcessStatus::Stopped);
}

#[test]
fn test_start_failures_leave_process_stopped() {
    let fx = Fixture::new();
    let cases = [
        ("missing", {
            let mut d = fx.definition("missing", "true");
            d.path = "/nonexistent/ndb_cpcd_test".into();
            d.args = String::new();
            d
        }),
        ("runas", {
            let mut d = fx.definition("runas", "true");
            d.runas = "no-such-user-ndb-cpcd".into();
            d
        }),
        ("ulimit", {
            let mut d = fx.definition("ulimit", "true");
            d.ulimit = "q:12".into();
            d
        }),
    ];

    for (label, definition) in cases {
        let id = fx.registry.define_process(definition, Mode::Live).unwrap();
        let err = fx.registry.start_process(id, Mode::Live).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Error, "{label}");
        assert_eq!(fx.status(id), ProcessStatus::Stopped, "{label}");
        assert_eq!(fx.pid(id), None, "{label}");
    }
}

#[test]
fn test_supervisor_thread_respawns_and_shuts_down() {
    let mut fx = Fixture::new();
    let (id, first) = fx.define_and_start(fx.definition("watched", "sleep 300"));
    let supervisor =
        Supervisor::spawn(fx.registry.clone(), Duration::from_millis(100)).unwrap();

    kill_group(first);
    assert!(wait_until(DEFAULT_TIMEOUT, || {
        fx.pid(id).is_some_and(|pgid| pgid != first)
    }));
    if let Some(pgid) = fx.pid(id) {
        fx.reaper.track(pgid);
    }

    let started = Instant::now();
    supervisor.shutdown();
    assert!(started.elapsed() < DEFAULT_TIMEOUT);
    fx.registry.stop_process(id, Mode::Live).unwrap();
}

#[test]
fn test_restore_adopts_and_respawns() {
    let mut fx = Fixture::new();
    let (alive, alive_pgid) = fx.define_and_start(fx.definition("alive", "sleep 300"));
    let (dead, dead_pgid) = fx.define_and_start(fx.definition("dead", "sleep 300"));
    kill_group(dead_pgid);

    // A second daemon instance over the same list.
    let store = ProcessStore::new(fx.dir.path().join("ndb_cpcd.conf"));
    let restarted = Registry::new(Arc::new(ForkExecutor::new()), Some(store));
    let events = Arc::new(Collector::default());
    restarted.events().register(events.clone());
    restarted.restore().unwrap();
    // Replay goes through the regular request path, so each entry reports
    // its define and start before the supervisor has looked at it.
    assert_eq!(
        events.kinds_for(alive),
        vec![EventKind::ProcUserDefine, EventKind::ProcUserStart]
    );
    events.clear();

    assert_eq!(
        restarted.get(alive).unwrap().status(),
        ProcessStatus::Starting
    );
    assert_eq!(restarted.get(alive).unwrap().pid(), Some(alive_pgid));

    tick(&restarted);
    assert_eq!(
        events.kinds_for(alive),
        vec![EventKind::ProcStateRunning]
    );
    assert_eq!(
        events.kinds_for(dead),
        vec![EventKind::ProcStateStopped, EventKind::ProcStateRunning]
    );
    let respawned = restarted.get(dead).unwrap().pid().unwrap();
    fx.reaper.track(respawned);
    assert_ne!(respawned, dead_pgid);
    assert_eq!(
        restarted.get(alive).unwrap().status(),
        ProcessStatus::Running
    );

    restarted.stop_process(alive, Mode::Live).unwrap();
    restarted.stop_process(dead, Mode::Live).unwrap();
}
