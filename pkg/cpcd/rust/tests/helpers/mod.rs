// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

#![allow(dead_code)]

use ndb_cpcd::{CpcClient, ProcessDefinition, ProcessType};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader};
use std::net::{SocketAddr, TcpListener};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to a running ndb_cpcd daemon.
pub struct DaemonHandle {
    child: Child,
    addr: SocketAddr,
    work_dir: PathBuf,
    log_lines: Arc<Mutex<Vec<String>>>,
    _stderr_thread: std::thread::JoinHandle<()>,
}

impl DaemonHandle {
    /// Start the daemon in `work_dir` on a free loopback port and wait until
    /// it accepts connections.
    pub fn start(work_dir: &Path) -> Self {
        Self::start_in(work_dir, work_dir, &[])
    }

    /// Start the daemon from `cwd`, passing `work_dir` verbatim (it may be
    /// relative to `cwd`) plus any `extra` flags.
    pub fn start_in(cwd: &Path, work_dir: &Path, extra: &[&str]) -> Self {
        let port = free_port();
        let bin = env!("CARGO_BIN_EXE_ndb_cpcd");
        let mut child = Command::new(bin)
            .current_dir(cwd)
            .arg(format!("--work-dir={}", work_dir.display()))
            .arg(format!("--port={port}"))
            .arg("--bind-address=127.0.0.1")
            .arg("--poll-interval=1")
            .arg("--debug")
            .args(extra)
            .env_remove("CPCD_LOG_LEVEL")
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to start ndb_cpcd");

        // The console sink writes every record to stderr.
        let stderr = child.stderr.take().expect("failed to capture stderr");
        let log_lines = Arc::new(Mutex::new(Vec::<String>::new()));
        let lines_clone = Arc::clone(&log_lines);
        let stderr_thread = std::thread::spawn(move || {
            let reader = BufReader::new(stderr);
            for line in reader.lines() {
                match line {
                    Ok(l) => {
                        eprintln!("[daemon] {l}");
                        lines_clone.lock().unwrap().push(l);
                    }
                    Err(_) => break,
                }
            }
        });

        let daemon = Self {
            child,
            addr: SocketAddr::from(([127, 0, 0, 1], port)),
            work_dir: cwd.join(work_dir),
            log_lines,
            _stderr_thread: stderr_thread,
        };
        assert!(
            daemon.wait_for_log_default("listening on"),
            "daemon did not start listening"
        );
        daemon
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn client(&self) -> CpcClient {
        let client = CpcClient::connect(self.addr).expect("failed to connect to daemon");
        client
            .set_read_timeout(Some(DEFAULT_TIMEOUT))
            .expect("failed to set read timeout");
        client
    }

    /// Wait until a log line containing `pattern` appears, or timeout.
    pub fn wait_for_log(&self, pattern: &str, timeout: Duration) -> bool {
        wait_until(timeout, || {
            let lines = self.log_lines.lock().unwrap();
            lines.iter().any(|l| l.contains(pattern))
        })
    }

    pub fn wait_for_log_default(&self, pattern: &str) -> bool {
        self.wait_for_log(pattern, DEFAULT_TIMEOUT)
    }

    pub fn count_log_matches(&self, pattern: &str) -> usize {
        let lines = self.log_lines.lock().unwrap();
        lines.iter().filter(|l| l.contains(pattern)).count()
    }

    /// Wait until at least `n` log lines contain `pattern`.
    pub fn wait_for_log_count(&self, pattern: &str, n: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.count_log_matches(pattern) >= n)
    }

    pub fn send_signal(&self, sig: Signal) {
        let pid = self.child.id() as i32;
        signal::kill(Pid::from_raw(pid), sig).expect("failed to send signal to daemon");
    }

    /// Send SIGTERM and wait for the daemon to exit.
    pub fn stop(&mut self) -> std::process::ExitStatus {
        self.send_signal(Signal::SIGTERM);
        self.wait_with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn wait_with_timeout(&mut self, timeout: Duration) -> std::process::ExitStatus {
        let deadline = Instant::now() + timeout;
        loop {
            match self
                .child
                .try_wait()
                .expect("failed to check daemon status")
            {
                Some(status) => return status,
                None => {
                    if Instant::now() >= deadline {
                        self.child.kill().ok();
                        return self.child.wait().expect("failed to wait on killed daemon");
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }
    }
}

impl Drop for DaemonHandle {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Kills every listed process group when dropped, so a failing test does not
/// leak sleepers.
#[derive(Default)]
pub struct GroupReaper(pub Vec<u32>);

impl GroupReaper {
    pub fn track(&mut self, pgid: u32) {
        self.0.push(pgid);
    }
}

impl Drop for GroupReaper {
    fn drop(&mut self) {
        for &pgid in &self.0 {
            let _ = signal::killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL);
        }
    }
}

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind probe socket");
    listener.local_addr().unwrap().port()
}

/// Poll `condition` every 50ms until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// A sleeper definition.
pub fn sleeper(name: &str, process_type: ProcessType) -> ProcessDefinition {
    ProcessDefinition {
        name: name.into(),
        group: "test".into(),
        path: "/bin/sleep".into(),
        args: "300".into(),
        owner: "tests".into(),
        process_type,
        ..Default::default()
    }
}

/// Whether any process in group `pgid` is alive.
pub fn group_is_alive(pgid: u32) -> bool {
    signal::killpg(Pid::from_raw(pgid as i32), None).is_ok()
}

/// Whether `pid` exists and is not a zombie.
pub fn pid_is_running(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_some_and(|state| state != "Z"),
        Err(_) => true,
    }
}

pub fn wait_for_group_gone(pgid: u32, timeout: Duration) -> bool {
    wait_until(timeout, || !pid_is_running(pgid))
}
