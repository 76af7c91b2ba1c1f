// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Background reconciliation of declared and observed process state.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::pidfile;
use crate::process::ProcessStatus;
use crate::registry::Registry;

/// Handle of the supervisor thread.
pub struct Supervisor {
    registry: Arc<Registry>,
    handle: JoinHandle<()>,
}

impl Supervisor {
    pub fn spawn(registry: Arc<Registry>, interval: Duration) -> io::Result<Self> {
        let worker = registry.clone();
        let handle = thread::Builder::new()
            .name("cpcd-supervisor".to_string())
            .spawn(move || run(&worker, interval))?;
        Ok(Self { registry, handle })
    }

    /// Stop the loop and wait for it. Supervised processes keep running.
    pub fn shutdown(self) {
        self.registry.request_shutdown();
        if self.handle.join().is_err() {
            error!("supervisor thread panicked");
        }
    }
}

fn run(registry: &Registry, interval: Duration) {
    info!("supervisor started, polling every {}s", interval.as_secs_f32());
    loop {
        tick(registry);
        let state = registry.lock();
        if state.shutdown {
            break;
        }
        let state = registry.wait_timeout(state, interval);
        if state.shutdown {
            break;
        }
    }
    info!("supervisor stopped");
}

/// One reconciliation pass over every entry.
///
/// A RUNNING entry whose group has exited is reported stopped, then
/// respawned if permanent. A STARTING entry carrying a group id was adopted
/// from a pid file at load and is confirmed or replaced here. Other states
/// are owned by the request that set them.
pub fn tick(registry: &Registry) {
    let mut events = Vec::new();
    {
        let mut state = registry.lock();
        state.reap_children();
        let mut changed = false;

        for idx in 0..state.processes.len() {
            let process = &state.processes[idx];
            let id = process.id();
            let (status, Some(pgid)) = (process.status(), process.pid()) else {
                continue;
            };
            let permanent = !process.is_temporary();
            let alive = registry.executor.is_alive(pgid);

            match status {
                ProcessStatus::Starting if alive => {
                    info!("process {id} adopted as group {pgid}");
                    state.processes[idx].set_running(pgid);
                    events.push(Event::process(EventKind::ProcStateRunning, id));
                    changed = true;
                }
                ProcessStatus::Starting | ProcessStatus::Running if !alive => {
                    warn!("process {id} (group {pgid}) is no longer running");
                    events.push(Event::process(EventKind::ProcStateStopped, id));
                    changed = true;
                    if !permanent {
                        let pidfile_path = state.processes[idx].pidfile_path();
                        if let Err(e) = pidfile::remove(&pidfile_path) {
                            warn!("failed to remove pid file of process {id}: {e}");
                        }
                        state.processes[idx].set_stopped();
                        continue;
                    }
                    state.processes[idx].set_starting();
                    match registry.spawn_locked(&mut state, idx) {
                        Ok(pgid) => {
                            info!("respawned process {id} as group {pgid}");
                            events.push(Event::process(EventKind::ProcStateRunning, id));
                        }
                        Err(message) => {
                            error!("failed to respawn process {id}: {message}");
                            state.processes[idx].set_stopped();
                        }
                    }
                }
                ProcessStatus::Stopped if alive => {
                    debug!("stopped process {id} still has a live group {pgid}");
                }
                _ => {}
            }
        }

        if changed {
            registry.save_locked(&state);
        }
    }
    registry.events().emit_all(events);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::tests::Collector;
    use crate::process::ProcessType;
    use crate::registry::Mode;
    use crate::registry::tests::{FakeExecutor, definition};
    use std::time::Instant;

    fn setup() -> (Arc<Registry>, Arc<FakeExecutor>, Arc<Collector>) {
        let executor = Arc::new(FakeExecutor::default());
        let registry = Arc::new(Registry::new(executor.clone(), None));
        let collector = Arc::new(Collector::default());
        registry.events().register(collector.clone());
        (registry, executor, collector)
    }

    #[test]
    fn test_permanent_process_is_respawned() {
        let (registry, executor, collector) = setup();
        let id = registry.define_process(definition("p"), Mode::Live).unwrap();
        registry.start_process(id, Mode::Live).unwrap();

        executor.kill(100);
        tick(&registry);
        let process = registry.get(id).unwrap();
        assert_eq!(process.status(), ProcessStatus::Running);
        assert_eq!(process.pid(), Some(101));

        executor.kill(101);
        tick(&registry);
        assert_eq!(registry.get(id).unwrap().pid(), Some(102));

        let kinds = collector.kinds();
        assert_eq!(
            kinds[2..],
            [
                EventKind::ProcStateStopped,
                EventKind::ProcStateRunning,
                EventKind::ProcStateStopped,
                EventKind::ProcStateRunning,
            ]
        );
    }

    #[test]
    fn test_temporary_process_is_not_respawned() {
        let (registry, executor, collector) = setup();
        let mut def = definition("t");
        def.process_type = ProcessType::Temporary;
        let id = registry.define_process(def, Mode::Live).unwrap();
        registry.start_process(id, Mode::Live).unwrap();

        executor.kill(100);
        tick(&registry);
        let process = registry.get(id).unwrap();
        assert_eq!(process.status(), ProcessStatus::Stopped);
        assert_eq!(process.pid(), None);
        assert_eq!(executor.spawned_count(), 1);
        assert_eq!(collector.kinds().last(), Some(&EventKind::ProcStateStopped));
    }

    #[test]
    fn test_failed_respawn_leaves_process_stopped() {
        let (registry, executor, _) = setup();
        let id = registry.define_process(definition("f"), Mode::Live).unwrap();
        registry.start_process(id, Mode::Live).unwrap();
        executor.kill(100);
        *executor.fail_spawn.lock().unwrap() = true;

        tick(&registry);
        let process = registry.get(id).unwrap();
        assert_eq!(process.status(), ProcessStatus::Stopped);
        assert_eq!(process.pid(), None);
    }

    #[test]
    fn test_live_processes_are_left_alone() {
        let (registry, executor, collector) = setup();
        let id = registry.define_process(definition("l"), Mode::Live).unwrap();
        registry.start_process(id, Mode::Live).unwrap();
        let before = collector.kinds().len();

        tick(&registry);
        tick(&registry);
        assert_eq!(registry.get(id).unwrap().pid(), Some(100));
        assert_eq!(executor.spawned_count(), 1);
        assert_eq!(collector.kinds().len(), before);
    }

    #[test]
    fn test_thread_reacts_and_shuts_down() {
        let (registry, executor, collector) = setup();
        let id = registry.define_process(definition("w"), Mode::Live).unwrap();
        registry.start_process(id, Mode::Live).unwrap();
        let supervisor = Supervisor::spawn(registry.clone(), Duration::from_millis(20)).unwrap();

        executor.kill(100);
        let deadline = Instant::now() + Duration::from_secs(5);
        while registry.get(id).unwrap().pid() == Some(100) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        supervisor.shutdown();

        assert_eq!(registry.get(id).unwrap().status(), ProcessStatus::Running);
        assert!(collector.kinds().contains(&EventKind::ProcStateStopped));
        assert!(registry.lock().shutdown);
    }
}
